//! Layered configuration: CLI flags (highest priority) override an
//! optional TOML file, which overrides built-in defaults.
//!
//! Shared by both binaries since most fields (`server`, `port`,
//! `authkey_file`, retry/timeout knobs) apply to either a coordinator or
//! a worker depending on which command is running.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::constants::{
    DEFAULT_JOB_Q_TIMEOUT, DEFAULT_MSG_INTERVAL, DEFAULT_PING_RETRY, DEFAULT_PING_TIMEOUT,
    DEFAULT_PORT, DEFAULT_RECONNECT_TRIES, DEFAULT_RECONNECT_WAIT, DEFAULT_RESULT_Q_TIMEOUT,
};
use crate::error::Result;
use crate::wire::RetryConfig;

/// The on-disk shape of an optional TOML config file. Every field is
/// optional so a file only needs to mention what it overrides.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileConfig {
    pub server: Option<String>,
    pub port: Option<u16>,
    pub authkey_file: Option<PathBuf>,
    pub nproc: Option<i64>,
    pub njobs: Option<i64>,
    pub reconnect_wait_secs: Option<u64>,
    pub reconnect_tries: Option<u32>,
    pub ping_timeout_secs: Option<u64>,
    pub ping_retry: Option<u32>,
    pub job_q_timeout_secs: Option<u64>,
    pub result_q_timeout_secs: Option<u64>,
    pub msg_interval_secs: Option<u64>,
    pub fname_dump: Option<PathBuf>,
    pub niceness: Option<i32>,
}

impl FileConfig {
    /// Read and parse `path`. A missing file is not an error here — the
    /// config layering treats "no file" the same as "an empty file";
    /// callers that require an explicitly-named file to exist should
    /// check that separately.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text)
            .map_err(|e| crate::error::CorralError::Unexpected(format!("invalid config file {}: {e}", path.display())))
    }
}

/// The fully resolved configuration fields shared by the coordinator and
/// worker binaries, after CLI > file > default layering.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub server: String,
    pub port: u16,
    pub authkey_file: PathBuf,
    pub nproc: i64,
    pub njobs: i64,
    pub retry: RetryConfig,
    pub job_q_timeout: Duration,
    pub result_q_timeout: Duration,
    pub msg_interval: Duration,
    pub fname_dump: Option<PathBuf>,
    pub niceness: Option<i32>,
}

/// The subset of CLI flags relevant to config layering, expressed as
/// `Option`s so "flag not passed" can fall through to the file/default
/// layers. The two binaries' `clap` structs convert into this.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub server: Option<String>,
    pub port: Option<u16>,
    pub authkey_file: Option<PathBuf>,
    pub nproc: Option<i64>,
    pub njobs: Option<i64>,
    pub reconnect_wait_secs: Option<u64>,
    pub reconnect_tries: Option<u32>,
    pub ping_timeout_secs: Option<u64>,
    pub ping_retry: Option<u32>,
    pub job_q_timeout_secs: Option<u64>,
    pub result_q_timeout_secs: Option<u64>,
    pub msg_interval_secs: Option<u64>,
    pub fname_dump: Option<PathBuf>,
    pub niceness: Option<i32>,
}

impl ResolvedConfig {
    /// Merge `cli` over `file` over the documented defaults.
    #[must_use]
    pub fn resolve(cli: CliOverrides, file: FileConfig) -> Self {
        let retry = RetryConfig {
            reconnect_tries: cli.reconnect_tries.or(file.reconnect_tries).unwrap_or(DEFAULT_RECONNECT_TRIES),
            reconnect_wait: secs(cli.reconnect_wait_secs.or(file.reconnect_wait_secs), DEFAULT_RECONNECT_WAIT),
            ping_timeout: secs(cli.ping_timeout_secs.or(file.ping_timeout_secs), DEFAULT_PING_TIMEOUT),
            ping_retry: cli.ping_retry.or(file.ping_retry).unwrap_or(DEFAULT_PING_RETRY),
            connect_timeout: crate::constants::DEFAULT_CONNECT_TIMEOUT,
        };
        Self {
            server: cli.server.or(file.server).unwrap_or_else(|| "127.0.0.1".to_string()),
            port: cli.port.or(file.port).unwrap_or(DEFAULT_PORT),
            authkey_file: cli.authkey_file.or(file.authkey_file).unwrap_or_else(default_authkey_file),
            nproc: cli.nproc.or(file.nproc).unwrap_or(0),
            njobs: cli.njobs.or(file.njobs).unwrap_or(crate::constants::UNBOUNDED_NJOBS),
            retry,
            job_q_timeout: secs(cli.job_q_timeout_secs.or(file.job_q_timeout_secs), DEFAULT_JOB_Q_TIMEOUT),
            result_q_timeout: secs(cli.result_q_timeout_secs.or(file.result_q_timeout_secs), DEFAULT_RESULT_Q_TIMEOUT),
            msg_interval: secs(cli.msg_interval_secs.or(file.msg_interval_secs), DEFAULT_MSG_INTERVAL),
            fname_dump: cli.fname_dump.or(file.fname_dump),
            niceness: cli.niceness.or(file.niceness),
        }
    }

    /// Load layered config: `file_path` (if given, or the default config
    /// directory's `corral.toml` if present) under `cli`.
    pub fn load(cli: CliOverrides, file_path: Option<&Path>) -> Result<Self> {
        let file = match file_path {
            Some(path) => FileConfig::load(path)?,
            None => {
                let default_path = config_dir()?.join("corral.toml");
                FileConfig::load(&default_path)?
            }
        };
        Ok(Self::resolve(cli, file))
    }
}

fn secs(value: Option<u64>, default: Duration) -> Duration {
    value.map(Duration::from_secs).unwrap_or(default)
}

fn default_authkey_file() -> PathBuf {
    config_dir().unwrap_or_else(|_| PathBuf::from(".")).join("authkey")
}

/// The platform config directory for `corral`, creating it if necessary.
/// Honors `CORRAL_CONFIG_DIR` as an override, matching the crate's
/// existing env-var-escape-hatch convention.
pub fn config_dir() -> Result<PathBuf> {
    let dir = if let Ok(over) = std::env::var("CORRAL_CONFIG_DIR") {
        PathBuf::from(over)
    } else {
        dirs::config_dir().unwrap_or_else(|| PathBuf::from(".")).join("corral")
    };
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_overrides_take_priority_over_file_and_defaults() {
        let file = FileConfig { port: Some(9000), nproc: Some(2), ..FileConfig::default() };
        let cli = CliOverrides { port: Some(9500), ..CliOverrides::default() };
        let resolved = ResolvedConfig::resolve(cli, file);
        assert_eq!(resolved.port, 9500);
        assert_eq!(resolved.nproc, 2);
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let resolved = ResolvedConfig::resolve(CliOverrides::default(), FileConfig::default());
        assert_eq!(resolved.port, DEFAULT_PORT);
        assert_eq!(resolved.njobs, crate::constants::UNBOUNDED_NJOBS);
        assert_eq!(resolved.retry.reconnect_tries, DEFAULT_RECONNECT_TRIES);
    }

    #[test]
    fn missing_file_falls_back_to_empty_config() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("does-not-exist.toml");
        let loaded = FileConfig::load(&missing).unwrap();
        assert!(loaded.server.is_none());
    }
}
