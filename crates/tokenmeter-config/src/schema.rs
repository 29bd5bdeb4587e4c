use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub storage: StorageConfig,
    /// Per-model token pricing, keyed by model name or model-name prefix.
    pub pricing: HashMap<String, ModelPricing>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageConfig {
    /// Directory holding the usage database. `~` is expanded.
    pub dir: String,
    pub file_name: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: "~/.tokenmeter".into(),
            file_name: "usage.db".into(),
        }
    }
}

/// USD rates per one million tokens.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ModelPricing {
    pub input: f64,
    pub output: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_uses_defaults() {
        let cfg: Config = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(cfg.storage.dir, "~/.tokenmeter");
        assert_eq!(cfg.storage.file_name, "usage.db");
        assert!(cfg.pricing.is_empty());
    }

    #[test]
    fn camel_case_keys_parsed() {
        let cfg: Config = serde_json::from_value(serde_json::json!({
            "storage": { "dir": "/data", "fileName": "telemetry.db" },
            "pricing": {
                "gpt-4": { "input": 30.0, "output": 60.0 },
                "claude-3-haiku": { "input": 0.25 }
            }
        }))
        .unwrap();
        assert_eq!(cfg.storage.dir, "/data");
        assert_eq!(cfg.storage.file_name, "telemetry.db");
        assert_eq!(
            cfg.pricing["gpt-4"],
            ModelPricing {
                input: 30.0,
                output: 60.0
            }
        );
        // Missing rate defaults to zero.
        assert_eq!(cfg.pricing["claude-3-haiku"].output, 0.0);
    }
}
