//! Environment configuration.
//!
//! Values come from an optional JSON file named by `SDD_CONFIG_PATH`, then
//! from individual `SDD_*` variables, which win.

use std::env;
use std::fs;
use std::path::{Component, Path, PathBuf};

use provenance_store::{RotationPolicy, TraceConfig, DEFAULT_STORAGE_DIR};
use serde::Deserialize;
use thiserror::Error;

use crate::logging::DEFAULT_FILTER;

pub const ENV_CONFIG_PATH: &str = "SDD_CONFIG_PATH";
pub const ENV_TRACE_DISABLED: &str = "SDD_TRACE_DISABLED";
pub const ENV_LEDGER_MAX_BYTES: &str = "SDD_LEDGER_MAX_BYTES";
pub const ENV_LEDGER_MAX_LINES: &str = "SDD_LEDGER_MAX_LINES";
pub const ENV_STORAGE_DIR: &str = "SDD_STORAGE_DIR";
pub const ENV_TRASH_DIR: &str = "SDD_TRASH_DIR";
pub const ENV_LOG: &str = "SDD_LOG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error while reading config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid value for '{key}' in {path}: {message}")]
    Invalid {
        path: PathBuf,
        key: &'static str,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellConfig {
    pub trace_enabled: bool,
    /// Workspace-relative ledger directory.
    pub storage_dir: String,
    pub rotation: RotationPolicy,
    pub trash_dir: PathBuf,
    pub log_filter: String,
    /// Ignored environment values, reported once logging is up.
    pub warnings: Vec<String>,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            trace_enabled: true,
            storage_dir: DEFAULT_STORAGE_DIR.to_string(),
            rotation: RotationPolicy::default(),
            trash_dir: default_trash_dir(),
            log_filter: DEFAULT_FILTER.to_string(),
            warnings: Vec::new(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct FileConfig {
    trace_enabled: Option<bool>,
    storage_dir: Option<String>,
    ledger_max_bytes: Option<u64>,
    ledger_max_lines: Option<usize>,
    trash_dir: Option<PathBuf>,
    log: Option<String>,
}

impl ShellConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = match env_string_opt(ENV_CONFIG_PATH) {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    /// Defaults overlaid with the values in a JSON config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let file: FileConfig = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        let invalid = |key: &'static str, message: &str| ConfigError::Invalid {
            path: path.to_path_buf(),
            key,
            message: message.to_string(),
        };

        let mut config = Self::default();
        if let Some(enabled) = file.trace_enabled {
            config.trace_enabled = enabled;
        }
        if let Some(storage_dir) = file.storage_dir {
            if !is_relative_inside(&storage_dir) {
                return Err(invalid("storageDir", "must be a relative path inside the workspace"));
            }
            config.storage_dir = storage_dir;
        }
        if let Some(max_bytes) = file.ledger_max_bytes {
            if max_bytes == 0 {
                return Err(invalid("ledgerMaxBytes", "must be a positive integer"));
            }
            config.rotation.max_bytes = max_bytes;
        }
        if let Some(max_lines) = file.ledger_max_lines {
            if max_lines == 0 {
                return Err(invalid("ledgerMaxLines", "must be a positive integer"));
            }
            config.rotation.max_lines = max_lines;
        }
        if let Some(trash_dir) = file.trash_dir {
            config.trash_dir = trash_dir;
        }
        if let Some(log) = file.log.filter(|log| !log.trim().is_empty()) {
            config.log_filter = log;
        }

        Ok(config)
    }

    #[must_use]
    pub fn trace_config(&self) -> TraceConfig {
        TraceConfig {
            enabled: self.trace_enabled,
            storage_dir: self.storage_dir.clone(),
            rotation: self.rotation,
        }
    }

    fn apply_env(&mut self) {
        if env_flag(ENV_TRACE_DISABLED) {
            self.trace_enabled = false;
        }

        if let Some(value) = env_string_opt(ENV_LEDGER_MAX_BYTES) {
            match parse_positive::<u64>(&value) {
                Some(max_bytes) => self.rotation.max_bytes = max_bytes,
                None => self.warn_ignored(ENV_LEDGER_MAX_BYTES, &value),
            }
        }
        if let Some(value) = env_string_opt(ENV_LEDGER_MAX_LINES) {
            match parse_positive::<usize>(&value) {
                Some(max_lines) => self.rotation.max_lines = max_lines,
                None => self.warn_ignored(ENV_LEDGER_MAX_LINES, &value),
            }
        }

        if let Some(storage_dir) = env_string_opt(ENV_STORAGE_DIR) {
            if is_relative_inside(&storage_dir) {
                self.storage_dir = storage_dir;
            } else {
                self.warn_ignored(ENV_STORAGE_DIR, &storage_dir);
            }
        }

        if let Some(trash_dir) = env_string_opt(ENV_TRASH_DIR) {
            self.trash_dir = PathBuf::from(trash_dir);
        }
        if let Some(log) = env_string_opt(ENV_LOG) {
            self.log_filter = log;
        }
    }

    fn warn_ignored(&mut self, key: &str, value: &str) {
        self.warnings
            .push(format!("ignoring invalid {key}={value:?}; keeping the default"));
    }
}

fn default_trash_dir() -> PathBuf {
    if let Some(data_home) = env_string_opt("XDG_DATA_HOME") {
        return PathBuf::from(data_home).join("Trash").join("files");
    }
    if let Some(home) = env_string_opt("HOME") {
        return PathBuf::from(home)
            .join(".local")
            .join("share")
            .join("Trash")
            .join("files");
    }
    env::temp_dir().join("sdd-trash")
}

fn is_relative_inside(path: &str) -> bool {
    let path = Path::new(path);
    path.is_relative()
        && path
            .components()
            .all(|component| matches!(component, Component::Normal(_) | Component::CurDir))
        && path.components().any(|component| matches!(component, Component::Normal(_)))
}

fn parse_positive<T>(value: &str) -> Option<T>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    value
        .trim()
        .parse::<T>()
        .ok()
        .filter(|parsed| *parsed > T::default())
}

fn env_flag(key: &str) -> bool {
    env::var(key).map(|value| value == "1").unwrap_or(false)
}

fn env_string_opt(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        if value.trim().is_empty() {
            None
        } else {
            Some(value)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, OnceLock};

    const KEYS: [&str; 7] = [
        ENV_CONFIG_PATH,
        ENV_TRACE_DISABLED,
        ENV_LEDGER_MAX_BYTES,
        ENV_LEDGER_MAX_LINES,
        ENV_STORAGE_DIR,
        ENV_TRASH_DIR,
        ENV_LOG,
    ];

    struct EnvGuard {
        key: &'static str,
        previous: Option<String>,
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            if let Some(value) = &self.previous {
                env::set_var(self.key, value);
            } else {
                env::remove_var(self.key);
            }
        }
    }

    fn env_lock() -> std::sync::MutexGuard<'static, ()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(()))
            .lock()
            .expect("env lock poisoned")
    }

    fn set_env_guard(key: &'static str, value: Option<&str>) -> EnvGuard {
        let previous = env::var(key).ok();
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
        EnvGuard { key, previous }
    }

    fn clear_all() -> Vec<EnvGuard> {
        KEYS.iter().map(|key| set_env_guard(key, None)).collect()
    }

    #[test]
    fn env_defaults() {
        let _lock = env_lock();
        let _cleared = clear_all();

        let config = ShellConfig::from_env().expect("config");
        assert!(config.trace_enabled);
        assert_eq!(config.storage_dir, ".sdd/trace");
        assert_eq!(config.rotation, RotationPolicy::default());
        assert_eq!(config.rotation.max_bytes, 5 * 1024 * 1024);
        assert_eq!(config.rotation.max_lines, 50_000);
        assert_eq!(config.log_filter, "warn");
        assert!(config.warnings.is_empty());
    }

    #[test]
    fn env_values_override_defaults() {
        let _lock = env_lock();
        let _cleared = clear_all();
        let _g1 = set_env_guard(ENV_TRACE_DISABLED, Some("1"));
        let _g2 = set_env_guard(ENV_LEDGER_MAX_BYTES, Some("1024"));
        let _g3 = set_env_guard(ENV_LEDGER_MAX_LINES, Some("10"));
        let _g4 = set_env_guard(ENV_STORAGE_DIR, Some(".trace"));
        let _g5 = set_env_guard(ENV_TRASH_DIR, Some("/tmp/sdd-test-trash"));
        let _g6 = set_env_guard(ENV_LOG, Some("debug"));

        let config = ShellConfig::from_env().expect("config");
        assert!(!config.trace_enabled);
        assert_eq!(
            config.rotation,
            RotationPolicy {
                max_bytes: 1024,
                max_lines: 10,
            }
        );
        assert_eq!(config.storage_dir, ".trace");
        assert_eq!(config.trash_dir, PathBuf::from("/tmp/sdd-test-trash"));
        assert_eq!(config.log_filter, "debug");

        let trace = config.trace_config();
        assert!(!trace.enabled);
        assert_eq!(trace.storage_dir, ".trace");
    }

    #[test]
    fn invalid_env_values_fall_back_with_a_warning() {
        let _lock = env_lock();
        let _cleared = clear_all();
        let _g1 = set_env_guard(ENV_LEDGER_MAX_BYTES, Some("0"));
        let _g2 = set_env_guard(ENV_LEDGER_MAX_LINES, Some("many"));
        let _g3 = set_env_guard(ENV_STORAGE_DIR, Some("../elsewhere"));
        let _g4 = set_env_guard(ENV_TRACE_DISABLED, Some("true"));

        let config = ShellConfig::from_env().expect("config");
        assert_eq!(config.rotation, RotationPolicy::default());
        assert_eq!(config.storage_dir, ".sdd/trace");
        assert!(config.trace_enabled);
        assert_eq!(config.warnings.len(), 3, "{:?}", config.warnings);
    }

    #[test]
    fn config_file_is_overridden_by_env() {
        let _lock = env_lock();
        let _cleared = clear_all();
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("sdd.json");
        fs::write(
            &path,
            r#"{"storageDir": "meta/trace", "ledgerMaxLines": 7, "log": "info"}"#,
        )
        .expect("write config");
        let path_string = path.display().to_string();
        let _g1 = set_env_guard(ENV_CONFIG_PATH, Some(&path_string));
        let _g2 = set_env_guard(ENV_LOG, Some("trace"));

        let config = ShellConfig::from_env().expect("config");
        assert_eq!(config.storage_dir, "meta/trace");
        assert_eq!(config.rotation.max_lines, 7);
        assert_eq!(config.log_filter, "trace");
    }

    #[test]
    fn config_file_rejects_unknown_keys_and_bad_values() {
        let dir = tempfile::tempdir().expect("tempdir");

        let unknown = dir.path().join("unknown.json");
        fs::write(&unknown, r#"{"ledgerMaxLine": 7}"#).expect("write config");
        assert!(matches!(
            ShellConfig::from_file(&unknown),
            Err(ConfigError::Parse { .. })
        ));

        let zero = dir.path().join("zero.json");
        fs::write(&zero, r#"{"ledgerMaxBytes": 0}"#).expect("write config");
        assert!(matches!(
            ShellConfig::from_file(&zero),
            Err(ConfigError::Invalid { key: "ledgerMaxBytes", .. })
        ));

        assert!(matches!(
            ShellConfig::from_file(&dir.path().join("missing.json")),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn storage_dir_must_stay_inside_the_workspace() {
        assert!(is_relative_inside(".sdd/trace"));
        assert!(is_relative_inside("trace"));
        assert!(!is_relative_inside("/abs/trace"));
        assert!(!is_relative_inside("a/../../b"));
        assert!(!is_relative_inside("."));
    }
}
