//! `settings.toml` / `models.toml` loading and the one-time resolution of
//! model roles to backends.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::geometry::GridSpec;

pub(crate) const SETTINGS_FILE: &str = "settings.toml";
pub(crate) const MODELS_FILE: &str = "models.toml";

pub(crate) const VISION_ROLE: &str = "vision_caption";
pub(crate) const DIARY_ROLE: &str = "diary_writer";

#[derive(Debug, thiserror::Error)]
pub(crate) enum ConfigError {
    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid grid: {0}")]
    InvalidGrid(String),

    #[error("backend '{backend}' for role '{role}' is not supported")]
    UnsupportedBackend { role: String, backend: String },

    #[error("role '{role}' needs an API key in ${var}")]
    MissingApiKey { role: String, var: String },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub(crate) struct Settings {
    pub data_root: PathBuf,
    pub frame_interval_sec: f64,
    pub max_bestshots: usize,
    pub diary: DiarySettings,
    pub logging: LoggingSettings,
    pub grid: GridSpec,
    pub preprocess: PreprocessSettings,
    pub alerts: AlertSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("outputs"),
            frame_interval_sec: 5.0,
            max_bestshots: 2,
            diary: DiarySettings::default(),
            logging: LoggingSettings::default(),
            grid: GridSpec::default(),
            preprocess: PreprocessSettings::default(),
            alerts: AlertSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub(crate) struct DiarySettings {
    pub max_chars: usize,
    pub language: String,
}

impl Default for DiarySettings {
    fn default() -> Self {
        Self {
            max_chars: 500,
            language: "ja".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub(crate) struct LoggingSettings {
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub(crate) struct PreprocessSettings {
    pub resize_long_side: u32,
    pub dark_threshold: f64,
    pub blur_threshold: f64,
}

impl Default for PreprocessSettings {
    fn default() -> Self {
        Self {
            resize_long_side: 640,
            dark_threshold: 40.0,
            blur_threshold: 100.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub(crate) struct AlertSettings {
    pub keywords: Vec<String>,
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            keywords: ["泣", "転ぶ", "危ない", "暴れる"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

fn read_toml<T: Default + serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(T::default()),
        Err(source) => {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    toml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

impl Settings {
    /// Reads `settings.toml` from `config_dir`, falling back to defaults when
    /// the file does not exist.
    pub(crate) fn load(config_dir: &Path) -> Result<Self, ConfigError> {
        let settings: Self = read_toml(&config_dir.join(SETTINGS_FILE))?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.grid.rows == 0 || self.grid.cols == 0 {
            return Err(ConfigError::InvalidGrid(format!(
                "{}x{} has no cells",
                self.grid.rows, self.grid.cols
            )));
        }
        Ok(())
    }
}

/// One entry of `models.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub(crate) struct RoleConfig {
    pub backend: Option<String>,
    pub model_name: String,
    pub api_base: Option<String>,
    pub api_key_env: Option<String>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
}

pub(crate) fn load_model_settings(config_dir: &Path) -> Result<BTreeMap<String, RoleConfig>, ConfigError> {
    read_toml(&config_dir.join(MODELS_FILE))
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum BackendConfig {
    Dummy,
    /// Any endpoint speaking the OpenAI chat completions API.
    OpenAi {
        api_base: Option<String>,
        api_key: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ResolvedModel {
    pub backend: BackendConfig,
    pub model_name: String,
    pub temperature: f32,
    pub top_p: f32,
}

impl ResolvedModel {
    fn dummy(role: &str) -> Self {
        Self {
            backend: BackendConfig::Dummy,
            model_name: format!("dummy-{role}"),
            temperature: 0.2,
            top_p: 0.9,
        }
    }
}

/// Role → backend, resolved once at startup and never changed afterwards.
#[derive(Debug, Clone, Default)]
pub(crate) struct ModelRegistry {
    roles: BTreeMap<String, ResolvedModel>,
}

const SAMBANOVA_API_BASE: &str = "https://api.sambanova.ai/v1";
const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/openai/";

impl ModelRegistry {
    /// Resolves every configured role. `env` looks up API keys.
    pub(crate) fn resolve(
        roles: &BTreeMap<String, RoleConfig>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut resolved = BTreeMap::new();
        for (role, cfg) in roles {
            resolved.insert(role.clone(), resolve_role(role, cfg, &env)?);
        }
        Ok(Self { roles: resolved })
    }

    /// The model for `role`; roles absent from `models.toml` use the dummy
    /// backend.
    pub(crate) fn for_role(&self, role: &str) -> ResolvedModel {
        self.roles
            .get(role)
            .cloned()
            .unwrap_or_else(|| ResolvedModel::dummy(role))
    }
}

fn resolve_role(
    role: &str,
    cfg: &RoleConfig,
    env: &impl Fn(&str) -> Option<String>,
) -> Result<ResolvedModel, ConfigError> {
    let backend = cfg.backend.as_deref().unwrap_or("dummy");
    let (api_base, default_key_env) = match backend {
        "dummy" => {
            let mut model = ResolvedModel::dummy(role);
            if !cfg.model_name.is_empty() {
                model.model_name = cfg.model_name.clone();
            }
            return Ok(model);
        }
        "openai" => (cfg.api_base.clone(), "OPENAI_API_KEY"),
        "sambanova" => (
            Some(api_base_or(cfg, SAMBANOVA_API_BASE)),
            "SAMBANOVA_API_KEY",
        ),
        "gemini" => (Some(api_base_or(cfg, GEMINI_API_BASE)), "GEMINI_API_KEY"),
        other => {
            return Err(ConfigError::UnsupportedBackend {
                role: role.to_owned(),
                backend: other.to_owned(),
            })
        }
    };

    let var = cfg.api_key_env.as_deref().unwrap_or(default_key_env);
    let api_key = env(var)
        .filter(|k| !k.is_empty())
        .ok_or_else(|| ConfigError::MissingApiKey {
            role: role.to_owned(),
            var: var.to_owned(),
        })?;

    Ok(ResolvedModel {
        backend: BackendConfig::OpenAi { api_base, api_key },
        model_name: cfg.model_name.clone(),
        temperature: cfg.temperature.unwrap_or(0.2),
        top_p: cfg.top_p.unwrap_or(0.9),
    })
}

fn api_base_or(cfg: &RoleConfig, default: &str) -> String {
    cfg.api_base.clone().unwrap_or_else(|| default.to_owned())
}
