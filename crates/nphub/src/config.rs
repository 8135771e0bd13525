use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// CLI arguments for the hub.
#[derive(Parser, Debug, Clone)]
#[command(name = "nphub")]
#[command(about = "Neural protocol hub")]
#[command(version)]
pub struct Args {
    /// Socket address to accept agent connections on.
    #[arg(long, default_value = "0.0.0.0:8765", env = "NPHUB_LISTEN")]
    pub listen: SocketAddr,
    /// Socket address for the metrics endpoint.
    #[arg(long, default_value = "127.0.0.1:9090", env = "NPHUB_METRICS")]
    pub metrics_addr: SocketAddr,
    /// Outbound queue capacity per connected agent.
    #[arg(long, default_value = "1000", env = "NPHUB_MAILBOX")]
    pub mailbox: usize,
    /// Seconds an agent has to send `register` after connecting.
    #[arg(long, default_value = "10", env = "NPHUB_REGISTER_TIMEOUT")]
    pub register_timeout: u64,
    /// Idle seconds before the hub pings a quiet agent.
    #[arg(long, default_value = "30", env = "NPHUB_READ_TIMEOUT")]
    pub read_timeout: u64,
    /// Largest message in bytes the hub will route.
    #[arg(long, default_value = "1048576", env = "NPHUB_MAX_PAYLOAD")]
    pub max_payload: usize,
    /// PEM certificate chain; with `--tls-key` the hub serves `wss://`.
    #[arg(long, env = "NPHUB_TLS_CERT", requires = "tls_key")]
    pub tls_cert: Option<PathBuf>,
    /// PEM private key matching `--tls-cert`.
    #[arg(long, env = "NPHUB_TLS_KEY", requires = "tls_cert")]
    pub tls_key: Option<PathBuf>,
    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Runtime configuration derived from [`Args`].
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Socket address to accept agent connections on.
    pub listen: SocketAddr,
    /// Socket address for the metrics endpoint.
    pub metrics_addr: SocketAddr,
    /// Outbound queue capacity per connected agent.
    pub mailbox: usize,
    /// Seconds an agent has to register.
    pub register_timeout: u64,
    /// Idle seconds before a keepalive ping.
    pub read_timeout: u64,
    /// Largest routable message in bytes.
    pub max_payload: usize,
    /// Certificate and key for `wss://`; `None` serves plain `ws://`.
    pub tls: Option<TlsFiles>,
}

/// PEM files the listener's TLS configuration is built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsFiles {
    /// Certificate chain.
    pub cert: PathBuf,
    /// Private key.
    pub key: PathBuf,
}

impl HubConfig {
    /// Validates the configuration values are within acceptable bounds.
    /// Returns Ok(()) if valid, Err with description otherwise.
    pub fn validate(&self) -> Result<(), String> {
        if self.mailbox == 0 {
            return Err("mailbox must be greater than 0".to_string());
        }
        if self.mailbox > 1_000_000 {
            return Err("mailbox exceeds reasonable limit (1,000,000)".to_string());
        }

        if self.register_timeout == 0 {
            return Err("register_timeout must be greater than 0".to_string());
        }
        if self.register_timeout > 300 {
            return Err("register_timeout exceeds reasonable limit (300 seconds)".to_string());
        }

        if self.read_timeout == 0 {
            return Err("read_timeout must be greater than 0".to_string());
        }
        if self.read_timeout > 3600 {
            return Err("read_timeout exceeds reasonable limit (3600 seconds)".to_string());
        }

        if self.max_payload == 0 {
            return Err("max_payload must be greater than 0".to_string());
        }
        if self.max_payload > np_ws::frame::MAX_PAYLOAD {
            return Err(format!(
                "max_payload exceeds frame limit ({} bytes)",
                np_ws::frame::MAX_PAYLOAD
            ));
        }

        if let Some(tls) = &self.tls {
            if !tls.cert.is_file() {
                return Err(format!("tls cert not found: {}", tls.cert.display()));
            }
            if !tls.key.is_file() {
                return Err(format!("tls key not found: {}", tls.key.display()));
            }
        }
        Ok(())
    }

    /// Registration deadline as a [`Duration`].
    #[must_use]
    pub const fn register_timeout(&self) -> Duration {
        Duration::from_secs(self.register_timeout)
    }

    /// Keepalive interval as a [`Duration`].
    #[must_use]
    pub const fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout)
    }
}

impl From<Args> for HubConfig {
    fn from(args: Args) -> Self {
        Self {
            listen: args.listen,
            metrics_addr: args.metrics_addr,
            mailbox: args.mailbox,
            register_timeout: args.register_timeout,
            read_timeout: args.read_timeout,
            max_payload: args.max_payload,
            tls: args
                .tls_cert
                .zip(args.tls_key)
                .map(|(cert, key)| TlsFiles { cert, key }),
        }
    }
}
