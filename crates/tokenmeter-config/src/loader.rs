use std::ffi::OsString;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use crate::Config;

/// Environment variable naming the config file; wins over the search path.
pub const CONFIG_ENV: &str = "TOKENMETER_CONFIG";

const CONFIG_FILE: &str = "config.json";

/// Resolve a directory path, expanding ~ to the home directory.
pub fn resolve_dir(path: &str) -> PathBuf {
    if path.starts_with("~/") || path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home.join(path.strip_prefix("~/").unwrap_or(""));
        }
    }
    PathBuf::from(path)
}

/// Locate the config file: `$TOKENMETER_CONFIG`, then `./config.json`, then
/// `~/.tokenmeter/config.json`. The last is returned even when absent so a
/// later save has somewhere to go.
pub fn find_config_path() -> PathBuf {
    search_config_path(std::env::var_os(CONFIG_ENV), Path::new("."), dirs::home_dir())
}

fn search_config_path(overridden: Option<OsString>, cwd: &Path, home: Option<PathBuf>) -> PathBuf {
    if let Some(path) = overridden.filter(|p| !p.is_empty()) {
        return PathBuf::from(path);
    }
    let local = cwd.join(CONFIG_FILE);
    if local.exists() {
        return local;
    }
    home.map(|h| h.join(".tokenmeter").join(CONFIG_FILE))
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILE))
}

/// Load and validate configuration. A missing file yields defaults.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config '{}'", path.display()))?;
    let config: Config = serde_json::from_str(&contents)
        .with_context(|| format!("failed to parse config '{}'", path.display()))?;
    validate(&config).with_context(|| format!("invalid config '{}'", path.display()))?;
    Ok(config)
}

/// Validate, then write configuration as pretty JSON, creating the parent
/// directory.
pub fn save_config(path: &Path, config: &Config) -> Result<()> {
    validate(config)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create config directory '{}'", parent.display()))?;
    }
    std::fs::write(path, serde_json::to_string_pretty(config)?)
        .with_context(|| format!("failed to write config '{}'", path.display()))
}

/// Rates must be finite and non-negative; model names and the file name non-empty.
fn validate(config: &Config) -> Result<()> {
    if config.storage.file_name.trim().is_empty() {
        bail!("storage.fileName must not be empty");
    }
    for (model, rates) in &config.pricing {
        if model.is_empty() {
            bail!("pricing entry has an empty model name");
        }
        for (direction, rate) in [("input", rates.input), ("output", rates.output)] {
            if !rate.is_finite() || rate < 0.0 {
                bail!("pricing for '{model}': {direction} rate {rate} is not a non-negative number");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ModelPricing;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config(&dir.path().join("nope.json")).unwrap();
        assert_eq!(cfg.storage.file_name, "usage.db");
        assert!(cfg.pricing.is_empty());
    }

    #[test]
    fn save_then_load_preserves_pricing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut cfg = Config::default();
        cfg.storage.dir = "/var/lib/tokenmeter".into();
        cfg.pricing.insert(
            "gpt-4".into(),
            ModelPricing {
                input: 30.0,
                output: 30.0,
            },
        );
        save_config(&path, &cfg).unwrap();

        let loaded = load_config(&path).unwrap();
        assert_eq!(loaded.storage.dir, "/var/lib/tokenmeter");
        assert_eq!(loaded.pricing["gpt-4"].input, 30.0);
    }

    #[test]
    fn malformed_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = load_config(&path).unwrap_err();
        assert!(format!("{err:#}").contains("failed to parse config"));
    }

    #[test]
    fn negative_rate_is_rejected_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{ "pricing": { "gpt-4": { "input": 30.0, "output": -1.0 } } }"#,
        )
        .unwrap();

        let err = format!("{:#}", load_config(&path).unwrap_err());
        assert!(err.contains("invalid config"));
        assert!(err.contains("gpt-4"));
        assert!(err.contains("output"));
    }

    #[test]
    fn invalid_config_is_not_saved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut cfg = Config::default();
        cfg.pricing.insert(
            "gpt-4".into(),
            ModelPricing {
                input: f64::NAN,
                output: 0.0,
            },
        );
        assert!(save_config(&path, &cfg).is_err());

        let mut cfg = Config::default();
        cfg.storage.file_name = "  ".into();
        assert!(save_config(&path, &cfg).is_err());
        assert!(!path.exists());
    }

    #[test]
    fn env_override_wins_over_search() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.json"), "{}").unwrap();

        let found = search_config_path(
            Some(OsString::from("/etc/tokenmeter.json")),
            dir.path(),
            None,
        );
        assert_eq!(found, PathBuf::from("/etc/tokenmeter.json"));

        // An empty override is ignored.
        let found = search_config_path(Some(OsString::new()), dir.path(), None);
        assert_eq!(found, dir.path().join("config.json"));
    }

    #[test]
    fn falls_back_to_home_config() {
        let cwd = tempfile::tempdir().unwrap();
        let home = tempfile::tempdir().unwrap();

        let found = search_config_path(None, cwd.path(), Some(home.path().to_path_buf()));
        assert_eq!(found, home.path().join(".tokenmeter").join("config.json"));
    }

    #[test]
    fn resolve_dir_leaves_plain_paths_alone() {
        assert_eq!(resolve_dir("/tmp/usage"), PathBuf::from("/tmp/usage"));
        assert_eq!(resolve_dir("relative"), PathBuf::from("relative"));
    }
}
