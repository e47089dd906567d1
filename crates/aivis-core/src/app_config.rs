use std::net::SocketAddr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Development,
    Test,
    Production,
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Test => write!(f, "test"),
            Environment::Production => write!(f, "production"),
        }
    }
}

#[derive(Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub env: Environment,
    pub bind_addr: SocketAddr,
    pub log_level: String,
    pub db_max_connections: u32,
    pub db_min_connections: u32,
    pub db_acquire_timeout_secs: u64,
    /// Base URL of the external analysis backend. `None` means module results
    /// are reported through the module-write endpoint instead.
    pub analysis_url: Option<String>,
    pub analysis_request_timeout_secs: u64,
    pub module_max_retries: u32,
    pub module_retry_backoff_base_ms: u64,
    pub module_timeout_secs: u64,
    pub scan_max_lifetime_secs: u64,
    pub poll_interval_secs: u64,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("env", &self.env)
            .field("bind_addr", &self.bind_addr)
            .field("log_level", &self.log_level)
            .field("database_url", &"[redacted]")
            .field("db_max_connections", &self.db_max_connections)
            .field("db_min_connections", &self.db_min_connections)
            .field("db_acquire_timeout_secs", &self.db_acquire_timeout_secs)
            .field("analysis_url", &self.analysis_url)
            .field(
                "analysis_request_timeout_secs",
                &self.analysis_request_timeout_secs,
            )
            .field("module_max_retries", &self.module_max_retries)
            .field(
                "module_retry_backoff_base_ms",
                &self.module_retry_backoff_base_ms,
            )
            .field("module_timeout_secs", &self.module_timeout_secs)
            .field("scan_max_lifetime_secs", &self.scan_max_lifetime_secs)
            .field("poll_interval_secs", &self.poll_interval_secs)
            .finish()
    }
}
