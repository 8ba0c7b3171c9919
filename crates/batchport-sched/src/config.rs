//! Configuration management.
//!
//! Supports loading configuration from:
//! 1. Configuration files (YAML)
//! 2. Environment variables (with `BATCHPORT_` prefix)
//! 3. .env files
//!
//! Configuration precedence (highest to lowest):
//! 1. Environment variables
//! 2. Configuration file
//! 3. Default values

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use batchport_channel::{Channel, LocalChannel, SshChannel, SshConfig};
use batchport_launch::{LauncherKind, ResourceSpec};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::cluster::{ClusterProvider, ProviderSettings};
use crate::dialect::{Cobalt, Condor, GridEngine, LocalFork, Pbs, Slurm};
use crate::error::{SchedError, SchedResult};
use crate::provider::Provider;
use crate::retry::RetryPolicy;

/// Complete configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// How to reach the execution target.
    #[serde(default)]
    pub channel: ChannelConfig,

    /// Which scheduler to drive and how.
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Submission retry policy.
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Background polling.
    #[serde(default)]
    pub tracker: TrackerConfig,

    /// Logging output.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Directory for job records and local scripts.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
}

/// Channel selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ChannelConfig {
    Local(LocalChannelConfig),
    Ssh(SshChannelConfig),
}

impl Default for ChannelConfig {
    fn default() -> Self {
        ChannelConfig::Local(LocalChannelConfig::default())
    }
}

/// Local channel settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocalChannelConfig {
    /// Script directory; defaults to `<state_dir>/scripts`.
    #[serde(default)]
    pub script_dir: Option<PathBuf>,

    /// Extra environment for every command.
    #[serde(default)]
    pub envs: FxHashMap<String, String>,
}

/// SSH channel settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct SshChannelConfig {
    pub host: String,

    #[serde(default = "default_ssh_port")]
    pub port: u16,

    /// Login user; defaults to `$USER`.
    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default)]
    pub key_path: Option<PathBuf>,

    #[serde(default)]
    pub known_hosts: Option<PathBuf>,

    /// Remote script directory; relative paths are under the login home.
    #[serde(default)]
    pub script_dir: Option<PathBuf>,

    #[serde(default)]
    pub envs: FxHashMap<String, String>,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl fmt::Debug for SshChannelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshChannelConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("key_path", &self.key_path)
            .field("known_hosts", &self.known_hosts)
            .field("script_dir", &self.script_dir)
            .field("envs", &self.envs)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .finish()
    }
}

/// Scheduler family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    #[default]
    Local,
    Slurm,
    Pbs,
    Torque,
    Cobalt,
    GridEngine,
    Condor,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 7] = [
        ProviderKind::Local,
        ProviderKind::Slurm,
        ProviderKind::Pbs,
        ProviderKind::Torque,
        ProviderKind::Cobalt,
        ProviderKind::GridEngine,
        ProviderKind::Condor,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Local => "local",
            ProviderKind::Slurm => "slurm",
            ProviderKind::Pbs => "pbs",
            ProviderKind::Torque => "torque",
            ProviderKind::Cobalt => "cobalt",
            ProviderKind::GridEngine => "grid-engine",
            ProviderKind::Condor => "condor",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = SchedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('_', "-");
        match normalized.as_str() {
            "sge" | "gridengine" => return Ok(ProviderKind::GridEngine),
            "htcondor" => return Ok(ProviderKind::Condor),
            _ => {}
        }
        ProviderKind::ALL
            .into_iter()
            .find(|k| k.as_str() == normalized)
            .ok_or_else(|| SchedError::Config(format!("unknown provider kind: {s}")))
    }
}

/// Provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub kind: ProviderKind,

    /// Label for logs and job records; defaults to the scheduler name.
    #[serde(default)]
    pub label: Option<String>,

    #[serde(default)]
    pub launcher: LauncherKind,

    /// Extra `aprun` flags for the aprun launcher.
    #[serde(default)]
    pub aprun_overrides: String,

    /// Maximum jobs in flight.
    #[serde(default)]
    pub max_jobs: Option<usize>,

    /// Timeout for each backend command, in seconds.
    #[serde(default = "default_cmd_timeout")]
    pub cmd_timeout_secs: u64,

    /// Environment modules to load in every job.
    #[serde(default)]
    pub modules: Vec<String>,

    /// Shell lines run in every job before the command.
    #[serde(default)]
    pub worker_init: String,

    /// Resources used when a submission does not override them.
    #[serde(default)]
    pub resources: ResourceSpec,

    /// SLURM: request whole nodes.
    #[serde(default)]
    pub exclusive: bool,

    /// Grid Engine: parallel environment for multi-slot jobs.
    #[serde(default)]
    pub parallel_environment: Option<String>,

    /// HTCondor: `requirements` expression.
    #[serde(default)]
    pub requirements: Option<String>,

    /// HTCondor: job environment.
    #[serde(default)]
    pub environment: FxHashMap<String, String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::default(),
            label: None,
            launcher: LauncherKind::default(),
            aprun_overrides: String::new(),
            max_jobs: None,
            cmd_timeout_secs: default_cmd_timeout(),
            modules: Vec::new(),
            worker_init: String::new(),
            resources: ResourceSpec::default(),
            exclusive: false,
            parallel_environment: None,
            requirements: None,
            environment: FxHashMap::default(),
        }
    }
}

/// Tracker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Seconds between polling rounds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Seconds a terminal job is kept before being swept.
    #[serde(default = "default_retention")]
    pub retention_secs: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            retention_secs: default_retention(),
        }
    }
}

impl TrackerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "console" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// Default value functions
fn default_state_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".batchport"))
        .unwrap_or_else(|| std::env::temp_dir().join("batchport"))
}

fn default_ssh_port() -> u16 {
    22
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_cmd_timeout() -> u64 {
    10
}

fn default_poll_interval() -> u64 {
    5
}

fn default_retention() -> u64 {
    3600
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "console".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            channel: ChannelConfig::default(),
            provider: ProviderConfig::default(),
            retry: RetryPolicy::default(),
            tracker: TrackerConfig::default(),
            logging: LoggingConfig::default(),
            state_dir: default_state_dir(),
        }
    }
}

impl Config {
    /// Default config file location, `~/.batchport/config.yaml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".batchport").join("config.yaml"))
    }

    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> SchedResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            SchedError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from YAML text.
    pub fn from_yaml(contents: &str) -> SchedResult<Self> {
        let config: Config = serde_yaml_ng::from_str(contents)
            .map_err(|e| SchedError::Config(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with the following precedence:
    /// 1. Load `.env` if it exists
    /// 2. Load `config_file`, else the default file if present, else defaults
    /// 3. Apply environment variable overrides
    pub fn load(config_file: Option<&Path>) -> SchedResult<Self> {
        dotenvy::dotenv().ok();

        let mut config = match config_file {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(path) => Self::from_file(path)?,
                None => Config::default(),
            },
        };

        config = config.merge_env();
        config.validate()?;
        Ok(config)
    }

    /// Merge `BATCHPORT_*` environment variables into this configuration.
    pub fn merge_env(self) -> Self {
        self.merge_vars(|key| std::env::var(key).ok())
    }

    /// Merge overrides from `lookup`. Only keys that are present change
    /// the configuration.
    pub fn merge_vars<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("BATCHPORT_PROVIDER") {
            match v.parse() {
                Ok(kind) => self.provider.kind = kind,
                Err(e) => tracing::warn!("Ignoring BATCHPORT_PROVIDER: {}", e),
            }
        }
        if let Some(v) = lookup("BATCHPORT_QUEUE") {
            self.provider.resources.queue = Some(v);
        }
        if let Some(v) = lookup("BATCHPORT_ACCOUNT") {
            self.provider.resources.account = Some(v);
        }
        if let Some(v) = lookup("BATCHPORT_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = lookup("BATCHPORT_LOG_FORMAT") {
            self.logging.format = v;
        }
        if let Some(v) = lookup("BATCHPORT_STATE_DIR") {
            self.state_dir = PathBuf::from(v);
        }
        self
    }

    /// Validate configuration values.
    pub fn validate(&self) -> SchedResult<()> {
        if self.retry.max_attempts == 0 {
            return Err(SchedError::Config(
                "retry.max_attempts must be greater than 0".to_string(),
            ));
        }
        if self.retry.base_delay > self.retry.max_delay {
            return Err(SchedError::Config(
                "retry.base_delay must not exceed retry.max_delay".to_string(),
            ));
        }
        if self.tracker.poll_interval_secs == 0 {
            return Err(SchedError::Config(
                "tracker.poll_interval_secs must be greater than 0".to_string(),
            ));
        }
        if self.provider.cmd_timeout_secs == 0 {
            return Err(SchedError::Config(
                "provider.cmd_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.provider.max_jobs == Some(0) {
            return Err(SchedError::Config(
                "provider.max_jobs must be greater than 0; omit it for no limit".to_string(),
            ));
        }

        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(SchedError::Config(format!("Invalid log level: {other}")));
            }
        }
        match self.logging.format.as_str() {
            "console" | "json" => {}
            other => {
                return Err(SchedError::Config(format!("Invalid log format: {other}")));
            }
        }

        if let ChannelConfig::Ssh(ref ssh) = self.channel {
            if ssh.host.trim().is_empty() {
                return Err(SchedError::Config("channel.host must not be empty".to_string()));
            }
        }

        Ok(())
    }

    /// Directory for job records.
    pub fn jobs_dir(&self) -> PathBuf {
        self.state_dir.join("jobs")
    }

    fn local_script_dir(&self) -> PathBuf {
        self.state_dir.join("scripts")
    }

    /// Open the configured channel.
    pub async fn build_channel(&self) -> SchedResult<Arc<dyn Channel>> {
        match self.channel {
            ChannelConfig::Local(ref local) => {
                let script_dir = local
                    .script_dir
                    .clone()
                    .unwrap_or_else(|| self.local_script_dir());
                let channel = LocalChannel::new(script_dir)
                    .await?
                    .with_envs(local.envs.clone());
                Ok(Arc::new(channel))
            }
            ChannelConfig::Ssh(ref ssh) => {
                let username = ssh
                    .username
                    .clone()
                    .or_else(|| std::env::var("USER").ok())
                    .ok_or_else(|| {
                        SchedError::Config("channel.username is required".to_string())
                    })?;
                let mut config = SshConfig::new(&ssh.host, username);
                config.port = ssh.port;
                config.password = ssh.password.clone();
                config.key_path = ssh.key_path.clone();
                config.known_hosts = ssh.known_hosts.clone();
                if let Some(ref dir) = ssh.script_dir {
                    config.script_dir = dir.clone();
                }
                config.envs = ssh.envs.clone();
                config.connect_timeout = Duration::from_secs(ssh.connect_timeout_secs);
                Ok(Arc::new(SshChannel::connect(config).await?))
            }
        }
    }

    /// Provider settings derived from this configuration.
    pub fn provider_settings(&self) -> ProviderSettings {
        let staging_dir = match self.channel {
            ChannelConfig::Local(ref local) => local
                .script_dir
                .clone()
                .unwrap_or_else(|| self.local_script_dir()),
            ChannelConfig::Ssh(_) => self.state_dir.join("staging"),
        };
        ProviderSettings {
            label: self.provider.label.clone(),
            cmd_timeout: Duration::from_secs(self.provider.cmd_timeout_secs),
            max_jobs: self.provider.max_jobs,
            modules: self.provider.modules.clone(),
            worker_init: self.provider.worker_init.clone(),
            staging_dir,
            retry: self.retry,
        }
    }

    /// Open the channel and build the configured provider on it.
    pub async fn build_provider(&self) -> SchedResult<Arc<dyn Provider>> {
        let channel = self.build_channel().await?;
        Ok(self.provider_on(channel))
    }

    /// Build the configured provider on an existing channel.
    pub fn provider_on(&self, channel: Arc<dyn Channel>) -> Arc<dyn Provider> {
        let cfg = &self.provider;
        let launcher = || cfg.launcher.build(&cfg.aprun_overrides);
        let settings = self.provider_settings();

        match cfg.kind {
            ProviderKind::Local => Arc::new(
                ClusterProvider::new(LocalFork, channel)
                    .with_launcher(launcher())
                    .with_settings(settings),
            ),
            ProviderKind::Slurm => Arc::new(
                ClusterProvider::new(
                    Slurm {
                        exclusive: cfg.exclusive,
                    },
                    channel,
                )
                .with_launcher(launcher())
                .with_settings(settings),
            ),
            ProviderKind::Pbs => Arc::new(
                ClusterProvider::new(Pbs::new(), channel)
                    .with_launcher(launcher())
                    .with_settings(settings),
            ),
            ProviderKind::Torque => Arc::new(
                ClusterProvider::new(Pbs::torque(), channel)
                    .with_launcher(launcher())
                    .with_settings(settings),
            ),
            ProviderKind::Cobalt => Arc::new(
                ClusterProvider::new(Cobalt, channel)
                    .with_launcher(launcher())
                    .with_settings(settings),
            ),
            ProviderKind::GridEngine => {
                let mut system = GridEngine::default();
                if let Some(ref pe) = cfg.parallel_environment {
                    system.parallel_environment = pe.clone();
                }
                Arc::new(
                    ClusterProvider::new(system, channel)
                        .with_launcher(launcher())
                        .with_settings(settings),
                )
            }
            ProviderKind::Condor => Arc::new(
                ClusterProvider::new(
                    Condor {
                        environment: cfg.environment.clone(),
                        requirements: cfg.requirements.clone(),
                    },
                    channel,
                )
                .with_launcher(launcher())
                .with_settings(settings),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.provider.kind, ProviderKind::Local);
        assert_eq!(config.tracker.poll_interval_secs, 5);
        assert!(matches!(config.channel, ChannelConfig::Local(_)));
    }

    #[test]
    fn test_from_yaml() {
        let yaml = r#"
channel:
  kind: ssh
  host: login.cluster.org
  username: alice
  password: hunter2
  script_dir: /scratch/alice/bp
provider:
  kind: slurm
  launcher: srun
  max_jobs: 8
  modules: [gcc, openmpi]
  resources:
    nodes: 2
    tasks_per_node: 16
    walltime: "01:00:00"
    queue: debug
retry:
  max_attempts: 5
tracker:
  poll_interval_secs: 30
logging:
  level: debug
  format: json
state_dir: /tmp/bp-state
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.provider.kind, ProviderKind::Slurm);
        assert_eq!(config.provider.launcher, LauncherKind::Srun);
        assert_eq!(config.provider.max_jobs, Some(8));
        assert_eq!(config.provider.resources.nodes, 2);
        assert_eq!(config.provider.resources.walltime.as_secs(), 3600);
        assert_eq!(config.provider.resources.queue.as_deref(), Some("debug"));
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.tracker.poll_interval(), Duration::from_secs(30));
        assert_eq!(config.jobs_dir(), PathBuf::from("/tmp/bp-state/jobs"));

        match config.channel {
            ChannelConfig::Ssh(ref ssh) => {
                assert_eq!(ssh.port, 22);
                let debug = format!("{ssh:?}");
                assert!(debug.contains("[REDACTED]"));
                assert!(!debug.contains("hunter2"));
            }
            ref other => panic!("expected ssh channel, got {other:?}"),
        }
    }

    #[test]
    fn test_validation_rejects_zeroes() {
        let mut config = Config::default();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.tracker.poll_interval_secs = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.provider.max_jobs = Some(0);
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.logging.format = "xml".into();
        assert!(config.validate().is_err());

        assert!(Config::from_yaml("provider:\n  kind: lsf\n").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let vars: FxHashMap<&str, &str> = [
            ("BATCHPORT_PROVIDER", "grid_engine"),
            ("BATCHPORT_QUEUE", "long"),
            ("BATCHPORT_LOG_LEVEL", "warn"),
            ("BATCHPORT_STATE_DIR", "/var/tmp/bp"),
        ]
        .into_iter()
        .collect();

        let config = Config::default().merge_vars(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(config.provider.kind, ProviderKind::GridEngine);
        assert_eq!(config.provider.resources.queue.as_deref(), Some("long"));
        assert_eq!(config.provider.resources.account, None);
        assert_eq!(config.logging.level, "warn");
        assert_eq!(config.state_dir, PathBuf::from("/var/tmp/bp"));
    }

    #[test]
    fn test_provider_kind_names() {
        for kind in ProviderKind::ALL {
            assert_eq!(kind.as_str().parse::<ProviderKind>().unwrap(), kind);
        }
        assert_eq!("SGE".parse::<ProviderKind>().unwrap(), ProviderKind::GridEngine);
        assert!("lsf".parse::<ProviderKind>().is_err());
    }

    #[tokio::test]
    async fn test_build_local_provider() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.state_dir = dir.path().to_path_buf();
        config.provider.label = Some("laptop".into());

        let provider = config.build_provider().await.unwrap();
        assert_eq!(provider.label(), "laptop");
        assert!(dir.path().join("scripts").is_dir());
    }
}
