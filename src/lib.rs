pub mod app;
pub mod catalog;
pub mod config;
pub mod domain;
pub mod error;
pub mod output;
pub mod progress;
pub mod prompt;
pub mod search;
pub mod session;
pub mod store;
