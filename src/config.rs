use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use camino::Utf8PathBuf;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::catalog::DEFAULT_CATALOG_URL;
use crate::error::MalqError;
use crate::search::{
    DEFAULT_CATEGORY, DEFAULT_MAX_RESULTS, DEFAULT_PLUGIN, DEFAULT_POLL_INTERVAL, SearchScope,
};
use crate::store::CacheStore;

pub const CONFIG_FILE_NAME: &str = "malq.json";
pub const DEFAULT_TOKEN_FILE: &str = "secret_token.json";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

const ENV_SEARCH_HOST: &str = "QBITTORRENTAPI_HOST";
const ENV_SEARCH_USERNAME: &str = "QBITTORRENTAPI_USERNAME";
const ENV_SEARCH_PASSWORD: &str = "QBITTORRENTAPI_PASSWORD";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub cache_file: Option<Utf8PathBuf>,
    #[serde(default)]
    pub token_file: Option<PathBuf>,
    #[serde(default)]
    pub catalog_base_url: Option<String>,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    #[serde(default)]
    pub search: SearchConfig,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct SearchConfig {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub plugin: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,
    #[serde(default)]
    pub max_results: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchCredentials {
    pub host: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct ResolvedSearch {
    pub credentials: Option<SearchCredentials>,
    pub scope: SearchScope,
    pub poll_interval: Duration,
    pub max_results: usize,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub cache_file: Utf8PathBuf,
    pub token_file: PathBuf,
    pub catalog_base_url: String,
    pub request_timeout: Duration,
    pub search: ResolvedSearch,
}

#[derive(Debug, Deserialize)]
struct TokenFile {
    access_token: String,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Resolves the explicit path, else `./malq.json`, else the per-user
    /// config file. Only an explicit path is required to exist.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, MalqError> {
        let config_path = match path {
            Some(path) => Some(PathBuf::from(path)),
            None => [Some(PathBuf::from(CONFIG_FILE_NAME)), user_config_path()]
                .into_iter()
                .flatten()
                .find(|candidate| candidate.exists()),
        };

        let config = match config_path {
            Some(config_path) => {
                let content = fs::read_to_string(&config_path)
                    .map_err(|_| MalqError::ConfigRead(config_path.clone()))?;
                serde_json::from_str(&content)
                    .map_err(|err| MalqError::ConfigParse(err.to_string()))?
            }
            None => Config::default(),
        };

        Self::resolve_config(config, |key| env::var(key).ok())
    }

    pub fn resolve_config<F>(config: Config, env_var: F) -> Result<ResolvedConfig, MalqError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let cache_file = match config.cache_file {
            Some(path) => path,
            None => CacheStore::default_path()?,
        };

        let search = config.search;
        let host = env_var(ENV_SEARCH_HOST).or(search.host);
        let username = env_var(ENV_SEARCH_USERNAME).or(search.username);
        let password = env_var(ENV_SEARCH_PASSWORD).or(search.password);
        let credentials = host
            .filter(|host| !host.trim().is_empty())
            .map(|host| SearchCredentials {
                host,
                username: username.unwrap_or_default(),
                password: password.unwrap_or_default(),
            });

        Ok(ResolvedConfig {
            cache_file,
            token_file: config
                .token_file
                .unwrap_or_else(|| PathBuf::from(DEFAULT_TOKEN_FILE)),
            catalog_base_url: config
                .catalog_base_url
                .unwrap_or_else(|| DEFAULT_CATALOG_URL.to_string()),
            request_timeout: Duration::from_secs(
                config.request_timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
            ),
            search: ResolvedSearch {
                credentials,
                scope: SearchScope {
                    plugin: search.plugin.unwrap_or_else(|| DEFAULT_PLUGIN.to_string()),
                    category: search
                        .category
                        .unwrap_or_else(|| DEFAULT_CATEGORY.to_string()),
                },
                poll_interval: search
                    .poll_interval_ms
                    .map(Duration::from_millis)
                    .unwrap_or(DEFAULT_POLL_INTERVAL),
                max_results: search.max_results.unwrap_or(DEFAULT_MAX_RESULTS),
            },
        })
    }
}

pub fn load_access_token(path: &Path) -> Result<String, MalqError> {
    let content =
        fs::read_to_string(path).map_err(|_| MalqError::TokenRead(path.to_path_buf()))?;
    let token: TokenFile =
        serde_json::from_str(&content).map_err(|err| MalqError::ConfigParse(err.to_string()))?;
    Ok(token.access_token)
}

fn user_config_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "malq").map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
}
