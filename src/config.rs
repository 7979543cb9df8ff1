use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::alert::channels::{
    http_client, ChannelContext, DEFAULT_BOT_API_BASE, DEFAULT_EMAIL_API_BASE, DEFAULT_EMAIL_FROM,
};
use crate::alert::{AlertChannelConfig, RetryPolicy};
use crate::pipeline::{FileSpecProvider, ScheduledSource};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertsConfig {
    #[serde(default = "default_bot_api_base")]
    pub bot_api_base: String,
    #[serde(default = "default_email_api_base")]
    pub email_api_base: String,
    #[serde(default)]
    pub email_api_key: String,
    #[serde(default = "default_email_from")]
    pub email_from: String,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub channels: Vec<ProjectChannel>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectChannel {
    pub project_id: String,
    #[serde(flatten)]
    pub channel: AlertChannelConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_interval_secs")]
    pub default_interval_secs: u64,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub id: String,
    pub project_id: String,
    pub path: String,
    #[serde(default)]
    pub interval_secs: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub db_path: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
}

impl Config {
    pub fn default_path() -> PathBuf {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        home.join(".config/breakwatch/config.toml")
    }

    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path
            .map(|p| p.to_path_buf())
            .unwrap_or_else(Self::default_path);
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = fs::read_to_string(&path)
            .with_context(|| format!("failed reading config: {}", path.display()))?;
        let parsed: Self = toml::from_str(&data)
            .with_context(|| format!("failed parsing TOML config: {}", path.display()))?;
        Ok(parsed)
    }

    pub fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(db_path) = overrides.db_path {
            self.storage.db_path = db_path;
        }
        if let Some(host) = overrides.host {
            self.server.host = host;
        }
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
    }

    pub fn write_template(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed creating config directory: {}", parent.display())
            })?;
        }
        fs::write(path, Self::default_template())
            .with_context(|| format!("failed writing config template: {}", path.display()))
    }

    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.db_path)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let retry = &self.alerts.retry;
        RetryPolicy::new(retry.max_attempts, Duration::from_millis(retry.base_delay_ms))
            .with_multiplier(retry.multiplier)
    }

    pub fn channel_context(&self) -> Result<ChannelContext> {
        let client = http_client(
            Duration::from_secs(self.http.timeout_secs),
            Duration::from_secs(self.http.connect_timeout_secs),
        )
        .context("failed building HTTP client")?;
        let api_key = Some(self.alerts.email_api_key.trim())
            .filter(|key| !key.is_empty())
            .map(str::to_string);
        Ok(ChannelContext::new(client, self.retry_policy())
            .with_bot_api_base(self.alerts.bot_api_base.clone())
            .with_email(
                self.alerts.email_api_base.clone(),
                api_key,
                self.alerts.email_from.clone(),
            ))
    }

    pub fn scheduled_sources(&self) -> (Vec<ScheduledSource>, FileSpecProvider) {
        let mut provider = FileSpecProvider::new();
        let mut sources = Vec::new();
        for source in &self.schedule.sources {
            provider = provider.with_source(source.id.clone(), expand_tilde(&source.path));
            sources.push(ScheduledSource {
                source_id: source.id.clone(),
                project_id: source.project_id.clone(),
                interval: Duration::from_secs(
                    source
                        .interval_secs
                        .unwrap_or(self.schedule.default_interval_secs),
                ),
            });
        }
        (sources, provider)
    }

    pub fn default_template() -> String {
        let template = r#"[storage]
db_path = "~/.local/share/breakwatch/breakwatch.db"

[http]
timeout_secs = 10
connect_timeout_secs = 5

[server]
host = "127.0.0.1"
port = 8080

[alerts]
bot_api_base = "https://slack.com/api"
email_api_base = "https://api.resend.com"
email_api_key = ""
email_from = "breakwatch <alerts@breakwatch.dev>"

[alerts.retry]
max_attempts = 3
base_delay_ms = 1000
multiplier = 2

# [[alerts.channels]]
# project_id = "my-project"
# type = "generic"
# parameters = { url = "https://example.com/hooks/breakwatch", method = "POST" }

[schedule]
enabled = true
default_interval_secs = 300

# [[schedule.sources]]
# id = "public-api"
# project_id = "my-project"
# path = "~/src/my-project/openapi.yaml"
"#;
        template.to_string()
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            bot_api_base: default_bot_api_base(),
            email_api_base: default_email_api_base(),
            email_api_key: String::new(),
            email_from: default_email_from(),
            retry: RetryConfig::default(),
            channels: Vec::new(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            multiplier: default_multiplier(),
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_interval_secs: default_interval_secs(),
            sources: Vec::new(),
        }
    }
}

fn default_db_path() -> String {
    "~/.local/share/breakwatch/breakwatch.db".to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_connect_timeout_secs() -> u64 {
    5
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_bot_api_base() -> String {
    DEFAULT_BOT_API_BASE.to_string()
}

fn default_email_api_base() -> String {
    DEFAULT_EMAIL_API_BASE.to_string()
}

fn default_email_from() -> String {
    DEFAULT_EMAIL_FROM.to_string()
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_multiplier() -> u32 {
    2
}

fn default_interval_secs() -> u64 {
    300
}

fn default_true() -> bool {
    true
}
