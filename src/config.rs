//! Configuration types.
//!
//! Everything is read from the environment once at startup and passed
//! explicitly into the transport, executor and pipeline constructors.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Subject line that marks a message as a query request.
pub const DEFAULT_TRIGGER_SUBJECT: &str = "Execute the query Luffy";

/// Email transport configuration.
#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub imap_host: String,
    pub imap_port: u16,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: String,
    pub password: SecretString,
    /// Our own address. Used as From and excluded from Cc.
    pub from_address: String,
    pub mailbox: String,
    /// Only the most recent N matching unread messages are fetched per cycle.
    pub fetch_window: usize,
}

/// Execution backend invocation settings.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub program: String,
    /// Arguments placed before the per-query `--extra-vars`.
    pub base_args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    /// Where query scratch files are created (system temp dir if unset).
    pub scratch_dir: Option<PathBuf>,
    pub timeout: Option<Duration>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            program: "ansible-playbook".to_string(),
            base_args: vec![
                "-i".to_string(),
                "hosts.ini".to_string(),
                "playbooks/run_query.yml".to_string(),
            ],
            working_dir: None,
            scratch_dir: None,
            timeout: None,
        }
    }
}

/// Poll loop timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSchedule {
    pub interval: Duration,
    /// Upper bound for the backoff applied after transport failures.
    pub max_backoff: Duration,
}

impl Default for PollSchedule {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            max_backoff: Duration::from_secs(900), // 15 minutes
        }
    }
}

/// Agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub email: EmailConfig,
    pub backend: BackendConfig,
    pub schedule: PollSchedule,
    /// Exact subject a message must carry to be processed.
    pub trigger_subject: String,
    /// Directory for rolling log files. Logs go to stderr only when unset.
    pub log_dir: Option<PathBuf>,
}

impl AgentConfig {
    /// Build config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let require = |key: &str| get(key).ok_or_else(|| ConfigError::MissingEnvVar(key.into()));

        let imap_host = require("EMAIL_IMAP_HOST")?;
        let imap_port = parse_or(&get, "EMAIL_IMAP_PORT", 993)?;
        let smtp_host = get("EMAIL_SMTP_HOST").unwrap_or_else(|| imap_host.replace("imap", "smtp"));
        let smtp_port = parse_or(&get, "EMAIL_SMTP_PORT", 465)?;
        let username = require("EMAIL_USERNAME")?;
        let password = SecretString::from(require("EMAIL_PASSWORD")?);
        let from_address = get("EMAIL_FROM_ADDRESS").unwrap_or_else(|| username.clone());
        let mailbox = get("EMAIL_MAILBOX").unwrap_or_else(|| "INBOX".to_string());

        let fetch_window: usize = parse_or(&get, "QUERY_FETCH_WINDOW", 10)?;
        if fetch_window == 0 {
            return Err(ConfigError::InvalidValue {
                key: "QUERY_FETCH_WINDOW".into(),
                message: "must be at least 1".into(),
            });
        }

        let defaults = PollSchedule::default();
        let schedule = PollSchedule {
            interval: Duration::from_secs(parse_or(
                &get,
                "QUERY_POLL_INTERVAL_SECS",
                defaults.interval.as_secs(),
            )?),
            max_backoff: Duration::from_secs(parse_or(
                &get,
                "QUERY_MAX_BACKOFF_SECS",
                defaults.max_backoff.as_secs(),
            )?),
        };

        let mut backend = BackendConfig::default();
        if let Some(program) = get("BACKEND_PROGRAM") {
            backend.program = program;
        }
        if let Some(args) = get("BACKEND_ARGS") {
            backend.base_args = args.split_whitespace().map(str::to_string).collect();
        }
        backend.working_dir = get("BACKEND_WORKDIR").map(PathBuf::from);
        backend.scratch_dir = get("BACKEND_SCRATCH_DIR").map(PathBuf::from);
        backend.timeout = match get("BACKEND_TIMEOUT_SECS") {
            Some(raw) => Some(Duration::from_secs(parse_value("BACKEND_TIMEOUT_SECS", &raw)?)),
            None => None,
        };

        Ok(Self {
            email: EmailConfig {
                imap_host,
                imap_port,
                smtp_host,
                smtp_port,
                username,
                password,
                from_address,
                mailbox,
                fetch_window,
            },
            backend,
            schedule,
            trigger_subject: get("QUERY_TRIGGER_SUBJECT")
                .unwrap_or_else(|| DEFAULT_TRIGGER_SUBJECT.to_string()),
            log_dir: get("LOG_DIR").map(PathBuf::from),
        })
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("{raw:?}: {e}"),
    })
}
