//! `RuntimeEnv`: the single process-wide configuration value constructed
//! once at worker start and threaded explicitly into every constructor
//! that needs it (`Worker::new`, `ProcessPool::new`, `JobExecutor::spawn`,
//! the agent entry function), per spec.md's Design Notes ("Global mutable
//! configuration" — replace a process-wide context-local/module-global
//! with an explicit constructor argument).
//!
//! Loaded from an optional TOML file (looked up under
//! `dirs::config_dir()`, the same lookup the teacher's desktop app uses
//! for its own config) and then overridden by environment variables,
//! following the `toml`/`serde`/`dirs` stack already in the teacher's
//! workspace dependencies.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("missing required environment variable {0}")]
    MissingEnv(&'static str),
}

/// Transport credentials (spec §6.4's environment surface). Opaque to the
/// core — forwarded to the Room implementation, never inspected here.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TransportCredentials {
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
}

/// Worker/pool tuning knobs named throughout spec §4.1-4.3 and §5.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerTuning {
    pub num_idle_processes: usize,
    pub max_concurrent_initializations: usize,
    pub initialize_timeout_ms: u64,
    pub close_timeout_ms: u64,
    pub ping_interval_ms: u64,
    pub ping_timeout_ms: u64,
    pub high_ping_threshold_ms: u64,
    pub max_unrecoverable_errors: u32,
    pub memory_warn_mb: u64,
    pub memory_limit_mb: u64,
}

impl Default for WorkerTuning {
    fn default() -> Self {
        Self {
            num_idle_processes: 3,
            max_concurrent_initializations: 3,
            initialize_timeout_ms: 10_000,
            close_timeout_ms: 60_000,
            ping_interval_ms: 2_500,
            ping_timeout_ms: 90_000,
            high_ping_threshold_ms: 1_500,
            max_unrecoverable_errors: 3,
            memory_warn_mb: 500,
            memory_limit_mb: 1_000,
        }
    }
}

impl WorkerTuning {
    pub fn initialize_timeout(&self) -> Duration {
        Duration::from_millis(self.initialize_timeout_ms)
    }
    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }
    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }
    pub fn high_ping_threshold(&self) -> Duration {
        Duration::from_millis(self.high_ping_threshold_ms)
    }
}

/// Session-level tuning (§4.4's EOU scheduling, §4.6's tool-step budget).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionTuning {
    pub min_endpointing_delay_ms: u64,
    pub max_endpointing_delay_ms: u64,
    pub max_tool_steps: u32,
    pub discard_audio_if_uninterruptible: bool,
}

impl Default for SessionTuning {
    fn default() -> Self {
        Self {
            min_endpointing_delay_ms: 800,
            max_endpointing_delay_ms: 5_000,
            max_tool_steps: 4,
            discard_audio_if_uninterruptible: true,
        }
    }
}

impl SessionTuning {
    pub fn min_endpointing_delay(&self) -> Duration {
        Duration::from_millis(self.min_endpointing_delay_ms)
    }
    pub fn max_endpointing_delay(&self) -> Duration {
        Duration::from_millis(self.max_endpointing_delay_ms)
    }
}

/// Logger options forwarded to a job process at `initializeRequest` time.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LoggerConfig {
    pub level: String,
    pub json: bool,
}

/// The on-disk/TOML-shaped configuration, before environment overrides
/// are layered on top.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
struct RawConfig {
    transport: TransportCredentials,
    worker: WorkerTuning,
    session: SessionTuning,
    logger: LoggerConfig,
}

/// The fully resolved, process-wide runtime configuration.
#[derive(Debug, Clone)]
pub struct RuntimeEnv {
    pub transport: TransportCredentials,
    pub worker: WorkerTuning,
    pub session: SessionTuning,
    pub logger: LoggerConfig,
}

impl RuntimeEnv {
    /// Load from (in increasing precedence): built-in defaults, an
    /// optional TOML file at `config_path` (or the default
    /// `dirs::config_dir()/vagent/config.toml` lookup if `None`), then
    /// environment variables.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut raw = match config_path {
            Some(path) => read_toml(path)?,
            None => match default_config_path() {
                Some(path) if path.exists() => read_toml(&path)?,
                _ => RawConfig::default(),
            },
        };

        apply_env_overrides(&mut raw);

        Ok(Self {
            transport: raw.transport,
            worker: raw.worker,
            session: raw.session,
            logger: raw.logger,
        })
    }

    /// Build directly from the process environment with no config file,
    /// for tests and for hosts that manage their own file lookup.
    pub fn from_env() -> Self {
        let mut raw = RawConfig::default();
        apply_env_overrides(&mut raw);
        Self {
            transport: raw.transport,
            worker: raw.worker,
            session: raw.session,
            logger: raw.logger,
        }
    }
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("vagent").join("config.toml"))
}

fn read_toml(path: &Path) -> Result<RawConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn apply_env_overrides(raw: &mut RawConfig) {
    if let Ok(url) = std::env::var("LIVEKIT_URL") {
        raw.transport.url = Some(url);
    }
    if let Ok(key) = std::env::var("LIVEKIT_API_KEY") {
        raw.transport.api_key = Some(key);
    }
    if let Ok(secret) = std::env::var("LIVEKIT_API_SECRET") {
        raw.transport.api_secret = Some(secret);
    }

    if let Some(v) = env_usize("VAGENT_NUM_IDLE_PROCESSES") {
        raw.worker.num_idle_processes = v;
    }
    if let Some(v) = env_usize("VAGENT_MAX_CONCURRENT_INITIALIZATIONS") {
        raw.worker.max_concurrent_initializations = v;
    }
    if let Some(v) = env_u64("VAGENT_INITIALIZE_TIMEOUT_MS") {
        raw.worker.initialize_timeout_ms = v;
    }
    if let Some(v) = env_u64("VAGENT_MEMORY_LIMIT_MB") {
        raw.worker.memory_limit_mb = v;
    }
    if let Ok(level) = std::env::var("VAGENT_LOG_LEVEL") {
        raw.logger.level = level;
    }
}

fn env_usize(name: &str) -> Option<usize> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_sane() {
        let tuning = WorkerTuning::default();
        assert_eq!(tuning.num_idle_processes, 3);
        assert!(tuning.initialize_timeout() > Duration::from_secs(0));
    }

    #[test]
    fn env_overrides_transport_credentials() {
        std::env::set_var("LIVEKIT_URL", "wss://test.example");
        let env = RuntimeEnv::from_env();
        assert_eq!(env.transport.url.as_deref(), Some("wss://test.example"));
        std::env::remove_var("LIVEKIT_URL");
    }

    #[test]
    fn loads_worker_tuning_from_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [worker]
            num_idle_processes = 5
            max_concurrent_initializations = 2
            "#
        )
        .unwrap();

        let env = RuntimeEnv::load(Some(file.path())).unwrap();
        assert_eq!(env.worker.num_idle_processes, 5);
        assert_eq!(env.worker.max_concurrent_initializations, 2);
    }

    #[test]
    fn missing_config_file_falls_back_to_defaults_when_path_is_explicit_and_absent() {
        let result = RuntimeEnv::load(Some(Path::new("/nonexistent/vagent.toml")));
        assert!(result.is_err());
    }
}
