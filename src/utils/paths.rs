use std::path::PathBuf;

/// Get the base directory for paneforge data.
///
/// # Panics
///
/// Panics if the home directory cannot be determined.
#[must_use]
pub fn base_dir() -> PathBuf {
    #[expect(clippy::expect_used, reason = "home directory is required for operation")]
    dirs::home_dir()
        .expect("Could not find home directory")
        .join(".paneforge")
}

/// Get the directory for log files.
#[must_use]
pub fn logs_dir() -> PathBuf {
    base_dir().join("logs")
}

/// Get the path to the config file.
#[must_use]
pub fn config_path() -> PathBuf {
    base_dir().join("config.toml")
}

/// Get the default sandboxed root for agent session transcripts, used by
/// `usage::token_source` when no override is configured.
#[must_use]
pub fn default_transcripts_root() -> PathBuf {
    base_dir().join("transcripts")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_path_lives_under_base_dir() {
        assert!(config_path().starts_with(base_dir()));
    }
}
