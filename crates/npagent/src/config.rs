use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Command-line interface of the agent binary.
#[derive(Parser)]
#[command(name = "npagent", about = "Neural protocol agent")]
#[command(version)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Path to a custom configuration file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Hub URL override (`ws://host:port/path` or `wss://...`).
    #[arg(long, global = true)]
    pub hub: Option<String>,

    /// Increase log verbosity (repeat for more detail).
    #[arg(short = 'v', long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Write logs to a file instead of stderr
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,
}

/// Available subcommands.
#[derive(Subcommand)]
pub enum Commands {
    /// Connect to the hub and log incoming signals until interrupted.
    Run {
        /// Logical agent name.
        #[arg(long)]
        name: String,
    },
    /// Transmit a single signal and exit.
    Send {
        /// Logical name of the sending agent.
        #[arg(long)]
        name: String,
        /// Target agent name; omit to broadcast.
        #[arg(long, default_value = "")]
        to: String,
        /// Signal kind, e.g. `action_potential` or `dopamine`.
        #[arg(long = "type", default_value = "action_potential")]
        signal_type: String,
        /// JSON object payload.
        #[arg(long, default_value = "{}")]
        payload: String,
    },
    /// Generate and print a fresh identity.
    Identity {
        /// Logical agent name.
        #[arg(long)]
        name: String,
    },
}

/// Runtime configuration loaded from file, env, and defaults.
#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    /// WebSocket URL of the hub, `ws://` or `wss://`.
    pub hub_url: String,
    /// Certificate checks for `wss://` hubs.
    pub tls: TlsConfig,
    /// Reconnection backoff settings.
    pub reconnect: ReconnectConfig,
    /// Dial retry settings for a single connect attempt.
    pub dial: DialConfig,
    /// Bounded waits.
    pub timeouts: TimeoutConfig,
}

/// How a `wss://` hub's certificate is checked.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct TlsConfig {
    /// Accept any certificate. Development hubs with self-signed
    /// certificates only.
    pub insecure: bool,
    /// Extra PEM certificates to trust besides the platform roots.
    pub ca_file: Option<PathBuf>,
}

/// Reconnect backoff parameters.
#[derive(Debug, Deserialize, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnect attempt, in milliseconds.
    pub base_delay_ms: u64,
    /// Maximum delay between reconnect attempts, in milliseconds.
    pub max_delay_ms: u64,
    /// Multiplier applied to the delay after each failed attempt.
    pub factor: f64,
}

/// Client connector retry parameters.
#[derive(Debug, Deserialize, Clone)]
pub struct DialConfig {
    /// Consecutive dial attempts before a connect attempt fails.
    pub max_retries: u32,
    /// Linear retry step, in milliseconds.
    pub retry_delay_ms: u64,
}

/// Bounded waits, in seconds.
#[derive(Debug, Deserialize, Clone)]
pub struct TimeoutConfig {
    /// Wait for the hub's `registered` reply.
    pub register_s: u64,
    /// Wait for the link to come up before transmitting.
    pub transmit_wait_s: u64,
    /// Wait for the first registration on start.
    pub start_s: u64,
    /// Idle read time before a keepalive ping.
    pub read_s: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            hub_url: "ws://localhost:8765".to_string(),
            tls: TlsConfig::default(),
            reconnect: ReconnectConfig::default(),
            dial: DialConfig::default(),
            timeouts: TimeoutConfig::default(),
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            factor: 2.0,
        }
    }
}

impl Default for DialConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            retry_delay_ms: 1000,
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            register_s: 10,
            transmit_wait_s: 10,
            start_s: 15,
            read_s: 30,
        }
    }
}

impl AgentConfig {
    /// Validates the configuration values are within acceptable bounds.
    /// Returns Ok(()) if valid, Err with description otherwise.
    pub fn validate(&self) -> Result<(), String> {
        parse_hub_url(&self.hub_url)?;
        if let Some(ca_file) = &self.tls.ca_file {
            if !ca_file.is_file() {
                return Err(format!("tls.ca_file not found: {}", ca_file.display()));
            }
        }

        if self.reconnect.base_delay_ms == 0 {
            return Err("reconnect.base_delay_ms must be greater than 0".to_string());
        }
        if self.reconnect.max_delay_ms < self.reconnect.base_delay_ms {
            return Err("reconnect.max_delay_ms must be >= base_delay_ms".to_string());
        }
        if !self.reconnect.factor.is_finite() || self.reconnect.factor < 1.0 {
            return Err("reconnect.factor must be a finite number >= 1".to_string());
        }

        if self.dial.max_retries == 0 {
            return Err("dial.max_retries must be greater than 0".to_string());
        }

        if self.timeouts.register_s == 0 {
            return Err("timeouts.register_s must be greater than 0".to_string());
        }
        if self.timeouts.transmit_wait_s == 0 {
            return Err("timeouts.transmit_wait_s must be greater than 0".to_string());
        }
        if self.timeouts.start_s == 0 {
            return Err("timeouts.start_s must be greater than 0".to_string());
        }
        if self.timeouts.read_s == 0 {
            return Err("timeouts.read_s must be greater than 0".to_string());
        }

        Ok(())
    }

    /// Reconnect base delay.
    #[must_use]
    pub const fn base_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect.base_delay_ms)
    }

    /// Reconnect delay cap.
    #[must_use]
    pub const fn max_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect.max_delay_ms)
    }
}

/// A parsed hub URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubUrl {
    /// `true` for `wss://`.
    pub secure: bool,
    /// Host name or address.
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// Request path, starting with `/`.
    pub path: String,
}

/// Split a `ws://` or `wss://host[:port][/path]` URL into its parts. The
/// port defaults to 80 for `ws://` and 443 for `wss://`, the path to `/`.
///
/// # Errors
///
/// Returns a description when the scheme is neither `ws://` nor `wss://`,
/// the host is empty, or the port does not parse.
pub fn parse_hub_url(url: &str) -> Result<HubUrl, String> {
    let (secure, rest) = if let Some(rest) = url.strip_prefix("wss://") {
        (true, rest)
    } else if let Some(rest) = url.strip_prefix("ws://") {
        (false, rest)
    } else {
        return Err(format!("hub URL must start with ws:// or wss://, got: {url}"));
    };
    let (authority, path) = match rest.find('/') {
        Some(i) => (&rest[..i], &rest[i..]),
        None => (rest, "/"),
    };
    let (host, port) = match authority.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|_| format!("invalid port in hub URL: {url}"))?;
            (host, port)
        }
        None => (authority, if secure { 443 } else { 80 }),
    };
    if host.is_empty() {
        return Err(format!("hub URL has no host: {url}"));
    }
    Ok(HubUrl {
        secure,
        host: host.to_string(),
        port,
        path: path.to_string(),
    })
}

/// # Errors
///
/// Returns an error if the configuration file cannot be read or parsed.
#[allow(clippy::cast_possible_wrap)]
pub fn load_config(path: Option<&Path>) -> anyhow::Result<AgentConfig> {
    let defaults = AgentConfig::default();
    let mut builder = config::Config::builder()
        .set_default("hub_url", defaults.hub_url.as_str())?
        .set_default("tls.insecure", defaults.tls.insecure)?
        .set_default(
            "reconnect.base_delay_ms",
            defaults.reconnect.base_delay_ms as i64,
        )?
        .set_default(
            "reconnect.max_delay_ms",
            defaults.reconnect.max_delay_ms as i64,
        )?
        .set_default("reconnect.factor", defaults.reconnect.factor)?
        .set_default("dial.max_retries", i64::from(defaults.dial.max_retries))?
        .set_default("dial.retry_delay_ms", defaults.dial.retry_delay_ms as i64)?
        .set_default("timeouts.register_s", defaults.timeouts.register_s as i64)?
        .set_default(
            "timeouts.transmit_wait_s",
            defaults.timeouts.transmit_wait_s as i64,
        )?
        .set_default("timeouts.start_s", defaults.timeouts.start_s as i64)?
        .set_default("timeouts.read_s", defaults.timeouts.read_s as i64)?;

    if let Some(config_path) = path {
        if config_path.exists() {
            builder = builder.add_source(config::File::from(config_path));
        }
    } else if let Some(config_path) = dirs::config_dir()
        .map(|d| d.join("npagent").join("config.toml"))
        .filter(|p| p.exists())
    {
        builder = builder.add_source(config::File::from(config_path));
    }

    // NEURAL_HUB_URL -> hub_url, NEURAL_RECONNECT__FACTOR -> reconnect.factor
    builder = builder.add_source(
        config::Environment::with_prefix("NEURAL")
            .prefix_separator("_")
            .separator("__"),
    );

    let settings = builder.build()?;
    let config: AgentConfig = settings.try_deserialize()?;

    Ok(config)
}
