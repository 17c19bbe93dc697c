use std::path::PathBuf;

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

use crate::prompt::{DEFAULT_INITIAL_PROMPT, DEFAULT_TERM_PROMPT};
use crate::session::SeedStrategy;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct StudyConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub terms: TermsConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub prompts: PromptConfig,
    #[serde(default)]
    pub app: AppConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    pub log_level: String,
    /// Append-only diagnostic log. Unset disables the file layer.
    pub log_file: Option<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_file: Some("study.log".to_string()),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8501,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    pub idle_timeout_minutes: i64,
    pub sweep_interval_seconds: u64,
    pub seed_strategy: SeedStrategy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_minutes: 120,
            sweep_interval_seconds: 300,
            seed_strategy: SeedStrategy::ClickCounter,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct TermsConfig {
    pub default_path: String,
    pub max_upload_bytes: usize,
}

impl Default for TermsConfig {
    fn default() -> Self {
        Self {
            default_path: "terms_template.csv".to_string(),
            max_upload_bytes: 1024 * 1024,
        }
    }
}

impl TermsConfig {
    pub fn resolved_default_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.default_path).into_owned())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    pub base_url: String,
    pub api_key_env: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub frequency_penalty: f32,
    pub presence_penalty: f32,
    pub timeout_seconds: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            model: "gpt-4o".to_string(),
            temperature: 0.0,
            max_tokens: 500,
            frequency_penalty: 0.5,
            presence_penalty: 0.5,
            timeout_seconds: 120,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub enabled: bool,
    pub password_env: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            password_env: "STUDY_PASSWORD".to_string(),
        }
    }
}

/// Prompt templates. `{term}` and `{schema}` are substituted in `term`.
#[derive(Debug, Deserialize, Clone)]
pub struct PromptConfig {
    pub initial: String,
    pub term: String,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            initial: DEFAULT_INITIAL_PROMPT.to_string(),
            term: DEFAULT_TERM_PROMPT.to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    pub title: String,
    pub author: String,
    pub instructions: String,
    pub warning_message: String,
    #[serde(default)]
    pub resources: Vec<Resource>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            title: "Schema Study: an AI-enhanced study app".to_string(),
            author: String::new(),
            instructions: "Pick a term, take thirty seconds to recall everything you associate \
                           with it, then write a short definition with an example. Follow up \
                           with questions and keep the conversation going."
                .to_string(),
            warning_message: "The assistant can make mistakes and does not replace verified \
                              course resources."
                .to_string(),
            resources: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Resource {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub description: String,
}

impl StudyConfig {
    /// Load from a TOML file, with `STUDY__SECTION__KEY` environment overrides.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("STUDY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        s.try_deserialize()
    }
}
