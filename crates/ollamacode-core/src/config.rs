use crate::{
    DEFAULT_BASE_URL, DEFAULT_MODEL, LARGE_MODEL, Mode, ModelSpec, Result, SMALL_MODEL, TaskClass,
    runtime_dir, user_runtime_dir,
};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid router configuration: {0}")]
    InvalidRouter(String),
    #[error("router is enabled but task class '{0}' has no model")]
    MissingTaskClass(TaskClass),
}

// ── Router configuration ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub enabled: bool,
    pub default_model: ModelSpec,
    pub models: BTreeMap<TaskClass, ModelSpec>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        let mut models = BTreeMap::new();
        models.insert(
            TaskClass::Intent,
            ModelSpec::new(SMALL_MODEL, 512, 0.1, "fast intent classification"),
        );
        models.insert(
            TaskClass::Code,
            ModelSpec::new(DEFAULT_MODEL, 4096, 0.2, "code generation and edits"),
        );
        models.insert(
            TaskClass::Search,
            ModelSpec::new(SMALL_MODEL, 2048, 0.3, "search synthesis"),
        );
        models.insert(
            TaskClass::Analysis,
            ModelSpec::new(LARGE_MODEL, 8192, 0.3, "project analysis and planning"),
        );
        models.insert(
            TaskClass::Default,
            ModelSpec::new(DEFAULT_MODEL, 4096, 0.7, "general conversation"),
        );
        Self {
            enabled: false,
            default_model: ModelSpec::new(DEFAULT_MODEL, 4096, 0.7, "default model"),
            models,
        }
    }
}

impl RouterConfig {
    /// A disabled router that sends every class to `name`.
    pub fn single_model(name: impl Into<String>) -> Self {
        let mut cfg = Self::default();
        cfg.default_model.name = name.into();
        cfg
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.default_model.name.trim().is_empty() {
            return Err(ConfigError::InvalidRouter(
                "default_model.name must not be empty".to_string(),
            ));
        }
        if !self.enabled {
            return Ok(());
        }
        for class in TaskClass::ALL {
            let spec = self
                .models
                .get(&class)
                .ok_or(ConfigError::MissingTaskClass(class))?;
            if spec.name.trim().is_empty() {
                return Err(ConfigError::InvalidRouter(format!(
                    "models.{class}.name must not be empty"
                )));
            }
            if spec.max_tokens == 0 {
                return Err(ConfigError::InvalidRouter(format!(
                    "models.{class}.max_tokens must be greater than 0"
                )));
            }
            if !(0.0..=1.0).contains(&spec.temperature) {
                return Err(ConfigError::InvalidRouter(format!(
                    "models.{class}.temperature must be within [0, 1], got {}",
                    spec.temperature
                )));
            }
        }
        Ok(())
    }

    /// Model spec for `class`; the default model when routing is disabled.
    pub fn spec_for(&self, class: TaskClass) -> Option<&ModelSpec> {
        if self.enabled {
            self.models.get(&class)
        } else {
            Some(&self.default_model)
        }
    }
}

// ── Application settings ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub mode: Mode,
    /// How many recently touched files are offered to the intent detector.
    pub recent_files: usize,
    pub command_timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Interactive,
            recent_files: 10,
            command_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubagentsConfig {
    pub max_concurrent: usize,
}

impl Default for SubagentsConfig {
    fn default() -> Self {
        Self { max_concurrent: 4 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub web_results: usize,
    pub code_results: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            web_results: 3,
            code_results: 50,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SkillsConfig {
    /// Extra skill roots, relative to the workspace unless absolute.
    pub paths: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub router: RouterConfig,
    pub agent: AgentConfig,
    pub subagents: SubagentsConfig,
    pub search: SearchConfig,
    pub skills: SkillsConfig,
    pub verbose: bool,
}

impl AppConfig {
    pub fn user_settings_path() -> Option<PathBuf> {
        user_runtime_dir().map(|dir| dir.join("settings.json"))
    }

    pub fn project_settings_path(workspace: &Path) -> PathBuf {
        runtime_dir(workspace).join("settings.json")
    }

    pub fn project_local_settings_path(workspace: &Path) -> PathBuf {
        runtime_dir(workspace).join("settings.local.json")
    }

    /// Defaults, then user settings, then project settings, then project-local
    /// settings. Later layers win key by key.
    pub fn load(workspace: &Path) -> Result<Self> {
        let mut paths = Vec::new();
        if let Some(user) = Self::user_settings_path() {
            paths.push(user);
        }
        paths.push(Self::project_settings_path(workspace));
        paths.push(Self::project_local_settings_path(workspace));
        Self::load_layers(&paths)
    }

    pub fn load_layers(paths: &[PathBuf]) -> Result<Self> {
        let mut merged = serde_json::to_value(Self::default())?;
        for path in paths {
            if !path.exists() {
                continue;
            }
            let raw = fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let value: serde_json::Value = serde_json::from_str(&raw)
                .with_context(|| format!("failed to parse {}", path.display()))?;
            merge_json_value(&mut merged, &value);
        }
        serde_json::from_value(merged).context("invalid settings")
    }

    pub fn save(&self, workspace: &Path) -> Result<()> {
        let path = Self::project_settings_path(workspace);
        fs::create_dir_all(
            path.parent()
                .ok_or_else(|| anyhow::anyhow!("invalid config path"))?,
        )?;
        fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }
}

pub fn merge_json_value(base: &mut serde_json::Value, overlay: &serde_json::Value) {
    match (base, overlay) {
        (serde_json::Value::Object(base_obj), serde_json::Value::Object(overlay_obj)) => {
            for (key, overlay_value) in overlay_obj {
                if let Some(base_value) = base_obj.get_mut(key) {
                    merge_json_value(base_value, overlay_value);
                } else {
                    base_obj.insert(key.clone(), overlay_value.clone());
                }
            }
        }
        (base_slot, overlay_value) => {
            *base_slot = overlay_value.clone();
        }
    }
}
