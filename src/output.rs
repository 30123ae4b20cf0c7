use std::io::{self, Write};

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

impl OutputMode {
    pub fn from_flag(non_interactive: bool) -> Self {
        if non_interactive {
            OutputMode::NonInteractive
        } else {
            OutputMode::Interactive
        }
    }
}

/// Pretty JSON on stdout, one document per call, for scripted use.
pub fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value).map_err(io::Error::other)?;
    writeln!(stdout)
}
