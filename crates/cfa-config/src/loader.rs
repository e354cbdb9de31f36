use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use cfa_core::AgentError;

use crate::schema::AgentConfig;

/// Locations of the three layered config files.
#[derive(Debug, Clone)]
pub struct ConfigPaths {
    pub config: PathBuf,
    pub defaults: PathBuf,
    pub calculated: PathBuf,
}

impl Default for ConfigPaths {
    fn default() -> Self {
        Self {
            config: PathBuf::from("config.json"),
            defaults: PathBuf::from("default.json"),
            calculated: PathBuf::from("calculated.json"),
        }
    }
}

impl ConfigPaths {
    /// Build paths from optional CLI overrides, falling back to the default file names.
    pub fn from_overrides(
        config: Option<&Path>,
        defaults: Option<&Path>,
        calculated: Option<&Path>,
    ) -> Self {
        let base = Self::default();
        Self {
            config: config.map(Path::to_path_buf).unwrap_or(base.config),
            defaults: defaults.map(Path::to_path_buf).unwrap_or(base.defaults),
            calculated: calculated.map(Path::to_path_buf).unwrap_or(base.calculated),
        }
    }
}

/// Loads the layered configuration into an immutable snapshot.
///
/// Loading usually happens before logging is set up, so warnings are kept
/// as notices for [`ConfigLoader::log_notices`] instead of being logged.
pub struct ConfigLoader {
    config: Arc<AgentConfig>,
    notices: Vec<String>,
}

impl ConfigLoader {
    /// Load and merge `defaults < config < calculated`, then apply env overrides.
    pub fn load(paths: &ConfigPaths) -> cfa_core::Result<Self> {
        Self::load_with_env(paths, |key| std::env::var(key).ok())
    }

    /// Same as [`ConfigLoader::load`] with an injectable environment lookup.
    pub fn load_with_env(
        paths: &ConfigPaths,
        env: impl Fn(&str) -> Option<String>,
    ) -> cfa_core::Result<Self> {
        let mut merged = Value::Object(serde_json::Map::new());
        let mut notices = Vec::new();

        if let Some(defaults) = read_layer(&paths.defaults)? {
            merge_json(&mut merged, defaults);
        }
        match read_layer(&paths.config)? {
            Some(main) => merge_json(&mut merged, main),
            None => notices.push(format!(
                "config file not found, using defaults: {}",
                paths.config.display()
            )),
        }
        if let Some(calculated) = read_layer(&paths.calculated)? {
            merge_json(&mut merged, calculated);
        }

        let config: AgentConfig = serde_json::from_value(merged)
            .map_err(|e| AgentError::ConfigInvalid(format!("merged config: {e}")))?;
        let config = Self::apply_env_overrides(config, env)?;

        // Validate config: keep warnings, fail on errors
        let warnings = config.validate().map_err(AgentError::ConfigInvalid)?;
        notices.extend(warnings.iter().map(ToString::to_string));

        Ok(Self {
            config: Arc::new(config),
            notices,
        })
    }

    /// Shared read-only snapshot.
    pub fn get(&self) -> Arc<AgentConfig> {
        Arc::clone(&self.config)
    }

    /// Warnings gathered while loading.
    pub fn notices(&self) -> &[String] {
        &self.notices
    }

    /// Log the gathered warnings and a summary of the loaded config.
    pub fn log_notices(&self) {
        for notice in &self.notices {
            warn!("{}", notice);
        }
        info!(
            bridge = %self.config.bridge,
            wda_method = %self.config.wda.method,
            "configuration loaded"
        );
    }

    /// Apply env var overrides (CFAGENT_BRIDGE, CFAGENT_WDA_METHOD, etc.)
    fn apply_env_overrides(
        mut config: AgentConfig,
        env: impl Fn(&str) -> Option<String>,
    ) -> cfa_core::Result<AgentConfig> {
        if let Some(v) = env("CFAGENT_BRIDGE") {
            config.bridge = v.parse().map_err(AgentError::ConfigInvalid)?;
        }
        if let Some(v) = env("CFAGENT_WDA_METHOD") {
            config.wda.method = v.parse().map_err(AgentError::ConfigInvalid)?;
        }
        if let Some(v) = env("CFAGENT_CONTROL_FLOOR_URL") {
            config.control_floor.url = Some(v);
        }
        if let Some(v) = env("CFAGENT_LOG_FORMAT") {
            config.logging.format = v;
        }
        Ok(config)
    }
}

/// Read one layer. A missing file is `None`; unreadable or malformed JSON is an error.
fn read_layer(path: &Path) -> cfa_core::Result<Option<Value>> {
    if !path.exists() {
        debug!(path = %path.display(), "config layer absent");
        return Ok(None);
    }
    let raw = std::fs::read_to_string(path).map_err(|e| {
        AgentError::ConfigInvalid(format!("cannot read {}: {}", path.display(), e))
    })?;
    let value: Value = serde_json::from_str(&raw).map_err(|e| {
        AgentError::ConfigInvalid(format!("failed to parse {}: {}", path.display(), e))
    })?;
    if !value.is_object() {
        return Err(AgentError::ConfigInvalid(format!(
            "{} must contain a JSON object",
            path.display()
        )));
    }
    Ok(Some(value))
}

/// Deep-merge `overlay` into `base`. Objects merge key by key; anything else replaces.
pub fn merge_json(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}
