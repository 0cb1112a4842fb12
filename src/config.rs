use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_LISTEN_PORT: u16 = 50061;
pub const DEFAULT_BATCH_TIMEOUT_MS: u64 = 10;
pub const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_MAX_VALIDATORS: usize = 4;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("validator '{0}' not found")]
    ValidatorNotFound(PathBuf),

    #[error("validator '{0}' is not executable")]
    ValidatorNotExecutable(PathBuf),

    #[error("max validator workers must be at least 1")]
    NoValidatorWorkers,

    #[error("batch timeout must be greater than zero")]
    ZeroBatchTimeout,

    #[error("security mode ed25519 requires a trusted key file")]
    MissingTrustedKeys,

    #[error("component {0} is not the primary and needs --primary")]
    MissingPrimary(u32),
}

/// External validator process pool.
///
/// With no `path`, jobspecs are only checked to be JSON objects.
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    pub path: Option<PathBuf>,
    pub args: Vec<String>,
    pub max_workers: usize,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            path: None,
            args: Vec::new(),
            max_workers: DEFAULT_MAX_VALIDATORS,
        }
    }
}

impl ValidatorConfig {
    /// Split a comma-separated argument list, as given on the command line.
    pub fn parse_args(list: &str) -> Vec<String> {
        list.split(',')
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(String::from)
            .collect()
    }

    pub fn check(&self) -> Result<(), ConfigError> {
        if self.max_workers == 0 {
            return Err(ConfigError::NoValidatorWorkers);
        }
        let Some(path) = &self.path else {
            return Ok(());
        };
        let meta =
            std::fs::metadata(path).map_err(|_| ConfigError::ValidatorNotFound(path.clone()))?;
        if !meta.is_file() || !is_executable(&meta) {
            return Err(ConfigError::ValidatorNotExecutable(path.clone()));
        }
        Ok(())
    }
}

#[cfg(unix)]
fn is_executable(meta: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_meta: &std::fs::Metadata) -> bool {
    true
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum SecurityMode {
    /// Accept only unsigned envelopes (owner submissions).
    #[default]
    None,
    /// Verify ed25519 envelopes against trusted keys.
    Ed25519,
}

#[derive(Debug, Clone, Default)]
pub struct SecurityConfig {
    pub mode: SecurityMode,
    /// JSON object of `"userid": "<base64 public key>"`.
    pub trusted_keys: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Generator id of this instance; 0 is the primary.
    pub component_id: u32,
    pub listen_addr: SocketAddr,
    /// Primary instance, queried by non-primary components at startup.
    pub primary_addr: Option<String>,
    /// Remote job manager. In-memory when unset.
    pub job_manager_addr: Option<String>,
    pub batch_timeout_ms: u64,
    pub shutdown_timeout_ms: u64,
    pub validator: ValidatorConfig,
    pub security: SecurityConfig,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            component_id: 0,
            listen_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_LISTEN_PORT)),
            primary_addr: None,
            job_manager_addr: None,
            batch_timeout_ms: DEFAULT_BATCH_TIMEOUT_MS,
            shutdown_timeout_ms: DEFAULT_SHUTDOWN_TIMEOUT_MS,
            validator: ValidatorConfig::default(),
            security: SecurityConfig::default(),
        }
    }
}

impl IngestConfig {
    pub fn new(component_id: u32, listen_addr: SocketAddr) -> Self {
        Self {
            component_id,
            listen_addr,
            ..Default::default()
        }
    }

    pub fn with_primary(mut self, addr: impl Into<String>) -> Self {
        self.primary_addr = Some(addr.into());
        self
    }

    pub fn with_job_manager(mut self, addr: impl Into<String>) -> Self {
        self.job_manager_addr = Some(addr.into());
        self
    }

    pub fn with_batch_timeout_ms(mut self, ms: u64) -> Self {
        self.batch_timeout_ms = ms;
        self
    }

    pub fn with_shutdown_timeout_ms(mut self, ms: u64) -> Self {
        self.shutdown_timeout_ms = ms;
        self
    }

    pub fn with_validator(mut self, validator: ValidatorConfig) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_security(mut self, security: SecurityConfig) -> Self {
        self.security = security;
        self
    }

    pub fn is_primary(&self) -> bool {
        self.component_id == 0
    }

    pub fn batch_timeout(&self) -> Duration {
        Duration::from_millis(self.batch_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_timeout_ms == 0 {
            return Err(ConfigError::ZeroBatchTimeout);
        }
        if !self.is_primary() && self.primary_addr.is_none() {
            return Err(ConfigError::MissingPrimary(self.component_id));
        }
        if self.security.mode == SecurityMode::Ed25519 && self.security.trusted_keys.is_none() {
            return Err(ConfigError::MissingTrustedKeys);
        }
        self.validator.check()
    }
}
