use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] serde_json::Error),

    #[error("Failed to create config directory")]
    CreateDirError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SmtpSecurity {
    None,
    #[default]
    StartTLS,
    SSL,
}

impl SmtpSecurity {
    /// Lenient parse of a form/CLI value; unknown values fall back to STARTTLS.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "none" | "plain" => SmtpSecurity::None,
            "ssl" | "tls" => SmtpSecurity::SSL,
            _ => SmtpSecurity::StartTLS,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SmtpSecurity::None => "none",
            SmtpSecurity::StartTLS => "starttls",
            SmtpSecurity::SSL => "ssl",
        }
    }
}

/// Connection settings for the test-management API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub endpoint: String,
    pub api_token: Option<String>,
    /// Authorization scheme sent with collaborator lookups (`Api-Token` or `Bearer`).
    pub token_type: String,
    /// Skip TLS certificate verification. Only for self-signed internal servers.
    pub insecure_tls: bool,
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://testops.example.com".to_string(),
            api_token: None,
            token_type: "Api-Token".to_string(),
            insecure_tls: false,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectsConfig {
    pub page_size: u32,
    pub output: PathBuf,
}

impl Default for ProjectsConfig {
    fn default() -> Self {
        Self {
            page_size: 200,
            output: PathBuf::from("project_ids.csv"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OwnersConfig {
    pub input: PathBuf,
    pub output: PathBuf,
    pub request_delay_ms: u64,
    /// Number of raw collaborator records to log per project (0 disables).
    pub debug_samples: usize,
}

impl Default for OwnersConfig {
    fn default() -> Self {
        Self {
            input: PathBuf::from("project_ids.csv"),
            output: PathBuf::from("emails.csv"),
            request_delay_ms: 100,
            debug_samples: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MailerConfig {
    pub bind: String,
    pub utc_offset_hours: i32,
    pub max_upload_bytes: usize,
    pub smtp_timeout_secs: u64,
}

impl Default for MailerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:5000".to_string(),
            utc_offset_hours: 3,
            max_upload_bytes: 10 * 1024 * 1024,
            smtp_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub projects: ProjectsConfig,
    pub owners: OwnersConfig,
    pub mailer: MailerConfig,
}

impl Config {
    /// Default location: `<config dir>/ownermail/config.json`.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ownermail")
            .join("config.json")
    }

    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let path = Path::new(path);

        // If the file doesn't exist, return default config
        if !path.exists() {
            return Ok(Config::default());
        }

        let content = fs::read_to_string(path)?;
        let config = serde_json::from_str(&content)?;

        Ok(config)
    }

    pub fn save(&self, path: &str) -> Result<(), ConfigError> {
        let path = Path::new(path);

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|_| ConfigError::CreateDirError)?;
            }
        }

        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;

        Ok(())
    }

    /// Overlay values from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_vars(|key| std::env::var(key).ok());
    }

    fn apply_vars<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(endpoint) = get("ALLURE_ENDPOINT") {
            self.api.endpoint = endpoint;
        }
        if let Some(token) = get("ALLURE_USER_TOKEN").or_else(|| get("ALLURE_TOKEN")) {
            self.api.api_token = Some(token);
        }
        if let Some(token_type) = get("ALLURE_TOKEN_TYPE") {
            self.api.token_type = token_type;
        }
        if let Some(flag) = get("ALLURE_INSECURE_TLS") {
            self.api.insecure_tls = parse_flag(&flag);
        }
        if let Some(out) = get("OUT_CSV") {
            self.projects.output = PathBuf::from(out);
        }
        if let Some(input) = get("OWNERS_INPUT_CSV") {
            self.owners.input = PathBuf::from(input);
        }
        if let Some(output) = get("OWNERS_OUTPUT_CSV") {
            self.owners.output = PathBuf::from(output);
        }
        if let Some(bind) = get("MAILER_BIND") {
            self.mailer.bind = bind;
        }
    }

    pub fn masked_token(&self) -> String {
        match &self.api.api_token {
            Some(token) => mask_secret(token, 4, 4),
            None => "<not set>".to_string(),
        }
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

pub fn mask_secret(s: &str, left: usize, right: usize) -> String {
    let chars: Vec<char> = s.chars().collect();
    if chars.len() <= left + right {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..left].iter().collect();
    let tail: String = chars[chars.len() - right..].iter().collect();
    format!("{}{}{}", head, "*".repeat(chars.len() - left - right), tail)
}
