use miette::{IntoDiagnostic, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    pub server: Server,
    pub authz: Authz,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Authz {
    /// When false every decision and management call fails with
    /// `AUTHZ_DISABLED`.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Directory of `.kdl` policy files. Default: policies
    pub policies_dir: PathBuf,
    /// Seconds between repository polls; 0 turns polling off.
    pub poll_interval_secs: u64,
    /// Batches with at least this many requests are evaluated in parallel.
    pub parallel_batch_threshold: usize,
}

fn default_enabled() -> bool {
    true
}

impl Default for Server {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8090,
        }
    }
}

impl Default for Authz {
    fn default() -> Self {
        Self {
            enabled: true,
            policies_dir: PathBuf::from("policies"),
            poll_interval_secs: 30,
            parallel_batch_threshold: crate::authz::service::DEFAULT_PARALLEL_BATCH_THRESHOLD,
        }
    }
}

impl Authz {
    pub fn poll_interval(&self) -> Option<Duration> {
        (self.poll_interval_secs > 0).then(|| Duration::from_secs(self.poll_interval_secs))
    }
}

impl Settings {
    pub fn load(path: &str) -> Result<Self> {
        let server = Server::default();
        let authz = Authz::default();
        let mut builder = config::Config::builder()
            .set_default("server.host", server.host)
            .into_diagnostic()?
            .set_default("server.port", server.port)
            .into_diagnostic()?
            .set_default("authz.enabled", authz.enabled)
            .into_diagnostic()?
            .set_default(
                "authz.policies_dir",
                authz.policies_dir.to_string_lossy().to_string(),
            )
            .into_diagnostic()?
            .set_default("authz.poll_interval_secs", authz.poll_interval_secs)
            .into_diagnostic()?
            .set_default(
                "authz.parallel_batch_threshold",
                authz.parallel_batch_threshold as u64,
            )
            .into_diagnostic()?;

        // Optional file
        if Path::new(path).exists() {
            builder = builder.add_source(config::File::with_name(path));
        }

        // Environment overrides: AUTHZD__SERVER__PORT=9090, etc.
        builder = builder.add_source(config::Environment::with_prefix("AUTHZD").separator("__"));

        let cfg = builder.build().into_diagnostic()?;
        let mut s: Settings = cfg.try_deserialize().into_diagnostic()?;

        if s.authz.policies_dir.is_relative() {
            s.authz.policies_dir = std::env::current_dir()
                .into_diagnostic()?
                .join(&s.authz.policies_dir);
        }

        Ok(s)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
