// schemarestore/src/config/mod.rs
pub mod coerce;

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::plan::stages::Stage;

const DEFAULT_MAX_RETRY_PASSES: u32 = 10;

// Structs for deserializing config.json
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonSecretsConfig {
    pub master_key_password: Option<String>,
    pub symmetric_keys: Option<HashMap<String, String>>,
    pub certificates: Option<HashMap<String, String>>,
    pub application_roles: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawJsonConfig {
    pub target_database_url: Option<String>,
    pub export_root: Option<PathBuf>,
    // Loosely-typed scalars stay as Value until coerce.rs has seen them.
    pub max_retry_passes: Option<serde_json::Value>,
    pub script_timeout_secs: Option<serde_json::Value>,
    pub fail_fast: Option<serde_json::Value>,
    pub exclude_stages: Option<Vec<String>>,
    pub error_log_dir: Option<PathBuf>,
    pub retryable_error_numbers: Option<serde_json::Value>,
    pub secrets: Option<JsonSecretsConfig>,
}

// Application's internal configuration structs

/// Operator-supplied secret material, keyed per kind. Name keys are
/// lowercased here so lookups elsewhere are case-insensitive.
#[derive(Debug, Clone, Default)]
pub struct SecretsConfig {
    pub master_key_password: Option<String>,
    pub symmetric_keys: HashMap<String, String>,
    pub certificates: HashMap<String, String>,
    pub application_roles: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct ImportConfig {
    pub target_db_url: String,
    pub export_root: PathBuf,
    pub max_retry_passes: u32,
    pub script_timeout: Option<Duration>,
    pub fail_fast: bool,
    pub exclude_stages: Vec<Stage>,
    pub error_log_dir: PathBuf,
    pub retryable_error_numbers: Option<Vec<u32>>,
    pub secrets: SecretsConfig,
}

/// What the `secrets` and `plan` operations need: the export tree and the
/// operator's secret material, no target server required.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub export_root: PathBuf,
    pub exclude_stages: Vec<Stage>,
    pub secrets: SecretsConfig,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub raw_json_config: RawJsonConfig, // Store the parsed raw config
}

impl AppConfig {
    pub fn load_from_json(config_path: &Path) -> Result<Self> {
        let config_content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file at {}", config_path.display()))?;
        let raw_json_config: RawJsonConfig = serde_json::from_str(&config_content)
            .with_context(|| {
                format!(
                    "Failed to parse JSON from config file at {}",
                    config_path.display()
                )
            })?;

        Ok(AppConfig { raw_json_config })
    }
}

pub fn load_import_config_from_json(raw_config: &RawJsonConfig) -> Result<ImportConfig> {
    let target_db_url = raw_config
        .target_database_url
        .as_ref()
        .context("target_database_url must be set in config.json for import")?
        .trim()
        .to_string();
    if target_db_url.is_empty() {
        return Err(anyhow::anyhow!(
            "target_database_url cannot be empty in config.json."
        ));
    }

    let export_root = require_export_root(raw_config)?;

    let max_retry_passes = match &raw_config.max_retry_passes {
        Some(value) => coerce::coerce_u32("max_retry_passes", value)?,
        None => DEFAULT_MAX_RETRY_PASSES,
    };

    // 0 disables the timeout, like leaving the field out.
    let script_timeout = match &raw_config.script_timeout_secs {
        Some(value) => {
            let secs = coerce::coerce_u32("script_timeout_secs", value)?;
            (secs > 0).then(|| Duration::from_secs(u64::from(secs)))
        }
        None => None,
    };

    let fail_fast = match &raw_config.fail_fast {
        Some(value) => coerce::coerce_bool("fail_fast", value)?,
        None => false,
    };

    let retryable_error_numbers = match &raw_config.retryable_error_numbers {
        Some(value) => Some(coerce::coerce_u32_list("retryable_error_numbers", value)?),
        None => None,
    };

    Ok(ImportConfig {
        target_db_url,
        export_root,
        max_retry_passes,
        script_timeout,
        fail_fast,
        exclude_stages: parse_exclude_stages(&raw_config.exclude_stages)?,
        error_log_dir: raw_config
            .error_log_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(".")),
        retryable_error_numbers,
        secrets: load_secrets_config(&raw_config.secrets),
    })
}

pub fn load_discovery_config_from_json(raw_config: &RawJsonConfig) -> Result<DiscoveryConfig> {
    Ok(DiscoveryConfig {
        export_root: require_export_root(raw_config)?,
        exclude_stages: parse_exclude_stages(&raw_config.exclude_stages)?,
        secrets: load_secrets_config(&raw_config.secrets),
    })
}

fn require_export_root(raw_config: &RawJsonConfig) -> Result<PathBuf> {
    let export_root = raw_config
        .export_root
        .as_ref()
        .context("export_root must be set in config.json")?
        .clone();
    if export_root.as_os_str().is_empty() {
        return Err(anyhow::anyhow!("export_root cannot be empty in config.json."));
    }
    Ok(export_root)
}

/// Resolves stage names from `exclude_stages` against the stage enum,
/// rejecting unknown names so a typo cannot silently include a stage.
fn parse_exclude_stages(names: &Option<Vec<String>>) -> Result<Vec<Stage>> {
    let mut stages = Vec::new();
    if let Some(names) = names {
        for name in names {
            let stage = Stage::from_config_name(name).with_context(|| {
                format!(
                    "Unknown stage '{}' in exclude_stages (expected one of the stage names, e.g. \"Tables\", \"Triggers\")",
                    name
                )
            })?;
            if !stages.contains(&stage) {
                stages.push(stage);
            }
        }
    }
    Ok(stages)
}

fn load_secrets_config(raw: &Option<JsonSecretsConfig>) -> SecretsConfig {
    let Some(raw) = raw else {
        return SecretsConfig::default();
    };
    SecretsConfig {
        master_key_password: raw
            .master_key_password
            .clone()
            .filter(|s| !s.is_empty()),
        symmetric_keys: lowercase_keys(&raw.symmetric_keys),
        certificates: lowercase_keys(&raw.certificates),
        application_roles: lowercase_keys(&raw.application_roles),
    }
}

fn lowercase_keys(map: &Option<HashMap<String, String>>) -> HashMap<String, String> {
    map.as_ref()
        .map(|m| {
            m.iter()
                .map(|(k, v)| (k.to_lowercase(), v.clone()))
                .collect()
        })
        .unwrap_or_default()
}
