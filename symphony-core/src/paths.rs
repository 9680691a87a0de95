// ABOUTME: Where the bot keeps its files: config, rolling logs, and stream transcripts
// ABOUTME: Platform directories via `directories`, overridable with SYMPHONY_DATA_DIR

use std::path::PathBuf;

use directories::ProjectDirs;

/// Overrides the platform data directory, e.g. for containers
pub const DATA_DIR_ENV: &str = "SYMPHONY_DATA_DIR";

fn bot_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "symphony", "symphony-bot")
}

/// Root for everything the bot writes at runtime.
///
/// `SYMPHONY_DATA_DIR` if set, else the platform data directory
/// (`~/.local/share/symphony-bot` on Linux), else `./data`.
pub fn data_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os(DATA_DIR_ENV).filter(|v| !v.is_empty()) {
        return PathBuf::from(dir);
    }
    bot_dirs()
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("data"))
}

/// Daily-rotated log files
pub fn log_dir() -> PathBuf {
    data_dir().join("logs")
}

pub fn transcript_dir() -> PathBuf {
    data_dir().join("transcripts")
}

/// `config.toml` in the platform config directory, or the working directory
/// when there is no home to resolve against
pub fn config_file() -> PathBuf {
    let dir = bot_dirs()
        .map(|dirs| dirs.config_dir().to_path_buf())
        .unwrap_or_default();
    dir.join("config.toml")
}
