use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:8000"). Ignored by worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Redis connection string for the task result cache
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Redis connection string for the work queue (defaults to `redis_url`)
    #[serde(default)]
    pub queue_url: Option<String>,

    #[serde(default = "default_queue_name")]
    pub queue_name: String,

    /// Lifetime of a task record, restarted on every write
    #[serde(default = "default_result_ttl_seconds")]
    pub result_ttl_seconds: u64,

    /// Upper bound for a single registry lookup
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,

    /// User-Agent sent to the SINTEGRA portal
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default = "default_sintegra_base_url")]
    pub sintegra_base_url: String,

    /// Attempts per lookup on transport errors
    #[serde(default = "default_extract_attempts")]
    pub extract_attempts: u32,

    /// PostgreSQL connection string, required when `persist_to_db` is set
    #[serde(default)]
    pub database_url: Option<String>,

    #[serde(default)]
    pub persist_to_db: bool,

    /// Stable worker name; keys the worker's in-flight list
    #[serde(default = "default_worker_id")]
    pub worker_id: String,

    /// Worker loops per worker process
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379/0".to_string()
}

fn default_queue_name() -> String {
    "scrape_tasks".to_string()
}

fn default_result_ttl_seconds() -> u64 {
    3600
}

fn default_request_timeout_seconds() -> u64 {
    30
}

fn default_user_agent() -> String {
    concat!(
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) ",
        "AppleWebKit/537.36 (KHTML, like Gecko) ",
        "Chrome/120.0.0.0 Safari/537.36"
    )
    .to_string()
}

fn default_sintegra_base_url() -> String {
    "https://appasp.sefaz.go.gov.br/sintegra/consulta/".to_string()
}

fn default_extract_attempts() -> u32 {
    3
}

fn default_worker_id() -> String {
    "worker-1".to_string()
}

fn default_worker_concurrency() -> usize {
    1
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let config: Self = envy::from_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints that serde defaults cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.result_ttl_seconds == 0 {
            return Err(ConfigError::Invalid("RESULT_TTL_SECONDS must be positive".into()));
        }
        if self.request_timeout_seconds == 0 {
            return Err(ConfigError::Invalid(
                "REQUEST_TIMEOUT_SECONDS must be positive".into(),
            ));
        }
        if self.worker_concurrency == 0 {
            return Err(ConfigError::Invalid("WORKER_CONCURRENCY must be positive".into()));
        }
        if self.extract_attempts == 0 {
            return Err(ConfigError::Invalid("EXTRACT_ATTEMPTS must be positive".into()));
        }
        if self.persist_to_db && self.database_url.is_none() {
            return Err(ConfigError::Invalid(
                "DATABASE_URL is required when PERSIST_TO_DB=true".into(),
            ));
        }
        Ok(())
    }

    pub fn queue_url(&self) -> &str {
        self.queue_url.as_deref().unwrap_or(&self.redis_url)
    }

    pub fn result_ttl(&self) -> Duration {
        Duration::from_secs(self.result_ttl_seconds)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    /// Budget for one whole lookup: every attempt may use the full request
    /// timeout, plus the longest backoff between attempts.
    pub fn extraction_deadline(&self) -> Duration {
        let attempts = self.extract_attempts.max(1);
        self.request_timeout() * attempts + Duration::from_secs(6) * (attempts - 1)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read environment: {0}")]
    Env(#[from] envy::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
