use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{ClipError, Result};

const HOME_ENV: &str = "CLIPKEEP_HOME";

#[derive(Debug, Clone)]
pub struct AppPaths {
    pub base_dir: PathBuf,
    pub db_path: PathBuf,
    pub images_dir: PathBuf,
    pub pid_file: PathBuf,
    pub log_file: PathBuf,
    pub config_file: PathBuf,
}

impl AppPaths {
    /// Resolves `$CLIPKEEP_HOME`, falling back to `~/.clipkeep`.
    pub fn new() -> Result<Self> {
        if let Ok(home) = std::env::var(HOME_ENV)
            && !home.is_empty()
        {
            return Ok(Self::from_base(PathBuf::from(home)));
        }
        let base = dirs::home_dir()
            .ok_or_else(|| ClipError::Invalid("could not determine home directory".into()))?
            .join(".clipkeep");
        Ok(Self::from_base(base))
    }

    pub fn from_base(base: PathBuf) -> Self {
        Self {
            db_path: base.join("clipkeep.db"),
            images_dir: base.join("images"),
            pid_file: base.join("clipkeep.pid"),
            log_file: base.join("clipkeep.log"),
            config_file: base.join("config.json"),
            base_dir: base,
        }
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        fs::create_dir_all(&self.base_dir)?;
        fs::create_dir_all(&self.images_dir)?;
        Ok(())
    }
}

/// Runtime knobs, read from `config.json` when present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub poll_interval_ms: u64,
    /// Row cap enforced by pruning; only non-permanent rows are removed to meet it.
    pub max_history: i64,
    pub max_clip_bytes: usize,
    pub paste_delay_ms: u64,
    pub paste_timeout_ms: u64,
    /// Stamp captured command lines with a tool label as their category.
    pub auto_label: bool,
    /// Non-permanent entries older than this are dropped by the watcher,
    /// checked hourly. 0 disables expiry.
    pub expire_after_hours: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            max_history: 200,
            max_clip_bytes: 50 * 1024 * 1024,
            paste_delay_ms: 200,
            paste_timeout_ms: 2000,
            auto_label: true,
            expire_after_hours: 0,
        }
    }
}

impl Settings {
    pub fn load(paths: &AppPaths) -> Result<Self> {
        match fs::read_to_string(&paths.config_file) {
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(ClipError::Io(e)),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.clamp(50, 2000))
    }

    pub fn paste_delay(&self) -> Duration {
        Duration::from_millis(self.paste_delay_ms)
    }

    pub fn paste_timeout(&self) -> Duration {
        Duration::from_millis(self.paste_timeout_ms)
    }

    pub fn expire_after(&self) -> Option<chrono::Duration> {
        match self.expire_after_hours {
            0 => None,
            hours => i64::try_from(hours).ok().and_then(chrono::Duration::try_hours),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_from_base() {
        let paths = AppPaths::from_base(PathBuf::from("/tmp/test-ck"));
        assert_eq!(paths.base_dir, PathBuf::from("/tmp/test-ck"));
        assert_eq!(paths.db_path, PathBuf::from("/tmp/test-ck/clipkeep.db"));
        assert_eq!(paths.images_dir, PathBuf::from("/tmp/test-ck/images"));
        assert_eq!(paths.pid_file, PathBuf::from("/tmp/test-ck/clipkeep.pid"));
        assert_eq!(paths.log_file, PathBuf::from("/tmp/test-ck/clipkeep.log"));
        assert_eq!(paths.config_file, PathBuf::from("/tmp/test-ck/config.json"));
    }

    #[test]
    fn test_settings_default_when_missing() {
        let dir = TempDir::new().unwrap();
        let paths = AppPaths::from_base(dir.path().to_path_buf());
        assert_eq!(Settings::load(&paths).unwrap(), Settings::default());
    }

    #[test]
    fn test_settings_partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let paths = AppPaths::from_base(dir.path().to_path_buf());
        fs::write(&paths.config_file, r#"{"max_history": 5}"#).unwrap();
        let settings = Settings::load(&paths).unwrap();
        assert_eq!(settings.max_history, 5);
        assert_eq!(settings.poll_interval_ms, 500);
    }

    #[test]
    fn test_settings_malformed_is_parse_error() {
        let dir = TempDir::new().unwrap();
        let paths = AppPaths::from_base(dir.path().to_path_buf());
        fs::write(&paths.config_file, "{not json").unwrap();
        assert!(matches!(Settings::load(&paths), Err(ClipError::Parse(_))));
    }

    #[test]
    fn test_expire_after() {
        assert_eq!(Settings::default().expire_after(), None);
        let settings = Settings {
            expire_after_hours: 24,
            ..Default::default()
        };
        assert_eq!(settings.expire_after(), Some(chrono::Duration::hours(24)));
    }

    #[test]
    fn test_poll_interval_is_clamped() {
        let settings = Settings {
            poll_interval_ms: 5,
            ..Default::default()
        };
        assert_eq!(settings.poll_interval(), Duration::from_millis(50));
    }
}
