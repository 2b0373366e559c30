//! Runtime configuration, read from `OUTREACH_*` environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::gateway::SmtpConfig;
use crate::pipeline::processor::DEFAULT_MAX_STAGE_FAILURES;
use crate::worker::SchedulerConfig;

/// Service configuration.
#[derive(Debug, Clone)]
pub struct OutreachConfig {
    /// Record store file.
    pub db_path: PathBuf,
    /// Root of the file handoff directory read by `FileGateway`.
    pub handoff_dir: PathBuf,
    /// Port for the HTTP / WebSocket API. `None` disables the API.
    pub api_port: Option<u16>,
    pub poll_interval: Duration,
    pub max_concurrent_steps: usize,
    pub max_stage_failures: u32,
    /// Exit once every workload is terminal.
    pub exit_when_idle: bool,
    /// POST every notification event here.
    pub webhook_url: Option<String>,
    /// Write a daily rolling log file here in addition to stderr.
    pub log_dir: Option<PathBuf>,
    /// Outgoing mail. Without it deliveries are logged and reported failed.
    pub smtp: Option<SmtpConfig>,
}

impl Default for OutreachConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/outreach.db"),
            handoff_dir: PathBuf::from("./data/handoff"),
            api_port: Some(8080),
            poll_interval: Duration::from_millis(1000),
            max_concurrent_steps: 1,
            max_stage_failures: DEFAULT_MAX_STAGE_FAILURES,
            exit_when_idle: false,
            webhook_url: None,
            log_dir: None,
            smtp: None,
        }
    }
}

impl OutreachConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unset or blank keys fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = Self::default();

        let api_port = match get("OUTREACH_API_PORT").as_deref() {
            Some("off") | Some("none") => None,
            Some(raw) => Some(parse("OUTREACH_API_PORT", raw)?),
            None => defaults.api_port,
        };

        let poll_interval = match get("OUTREACH_POLL_INTERVAL_MS") {
            Some(raw) => Duration::from_millis(parse("OUTREACH_POLL_INTERVAL_MS", &raw)?),
            None => defaults.poll_interval,
        };

        let max_concurrent_steps = match get("OUTREACH_MAX_CONCURRENT_STEPS") {
            Some(raw) => {
                let n: usize = parse("OUTREACH_MAX_CONCURRENT_STEPS", &raw)?;
                if n == 0 {
                    return Err(invalid("OUTREACH_MAX_CONCURRENT_STEPS", "must be at least 1"));
                }
                n
            }
            None => defaults.max_concurrent_steps,
        };

        let max_stage_failures = match get("OUTREACH_MAX_STAGE_FAILURES") {
            Some(raw) => parse("OUTREACH_MAX_STAGE_FAILURES", &raw)?,
            None => defaults.max_stage_failures,
        };

        let exit_when_idle = match get("OUTREACH_EXIT_WHEN_IDLE") {
            Some(raw) => parse_bool("OUTREACH_EXIT_WHEN_IDLE", &raw)?,
            None => defaults.exit_when_idle,
        };

        let smtp = match get("OUTREACH_SMTP_HOST") {
            Some(host) => {
                let port = match get("OUTREACH_SMTP_PORT") {
                    Some(raw) => parse("OUTREACH_SMTP_PORT", &raw)?,
                    None => 587,
                };
                let username = get("OUTREACH_SMTP_USERNAME").unwrap_or_default();
                let password = SecretString::from(get("OUTREACH_SMTP_PASSWORD").unwrap_or_default());
                let from_address = get("OUTREACH_SMTP_FROM")
                    .or_else(|| (!username.is_empty()).then(|| username.clone()))
                    .ok_or_else(|| ConfigError::MissingEnvVar("OUTREACH_SMTP_FROM".into()))?;
                Some(SmtpConfig {
                    host,
                    port,
                    username,
                    password,
                    from_address,
                })
            }
            None => None,
        };

        Ok(Self {
            db_path: get("OUTREACH_DB_PATH").map(PathBuf::from).unwrap_or(defaults.db_path),
            handoff_dir: get("OUTREACH_HANDOFF_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.handoff_dir),
            api_port,
            poll_interval,
            max_concurrent_steps,
            max_stage_failures,
            exit_when_idle,
            webhook_url: get("OUTREACH_WEBHOOK_URL"),
            log_dir: get("OUTREACH_LOG_DIR").map(PathBuf::from),
            smtp,
        })
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            poll_interval: self.poll_interval,
            max_concurrent_steps: self.max_concurrent_steps,
            max_stage_failures: self.max_stage_failures,
            exit_when_idle: self.exit_when_idle,
        }
    }
}

fn invalid(key: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.into(),
    }
}

fn parse<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse()
        .map_err(|e: T::Err| invalid(key, format!("{raw:?}: {e}")))
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(key, format!("{raw:?} is not a boolean"))),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<OutreachConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        OutreachConfig::from_lookup(|k| vars.get(k).cloned())
    }

    #[test]
    fn defaults_when_nothing_set() {
        let c = config(&[]).unwrap();
        assert_eq!(c.db_path, PathBuf::from("./data/outreach.db"));
        assert_eq!(c.api_port, Some(8080));
        assert_eq!(c.max_concurrent_steps, 1);
        assert_eq!(c.max_stage_failures, DEFAULT_MAX_STAGE_FAILURES);
        assert!(!c.exit_when_idle);
        assert!(c.smtp.is_none());
        assert!(c.webhook_url.is_none());
    }

    #[test]
    fn reads_overrides() {
        let c = config(&[
            ("OUTREACH_DB_PATH", "/tmp/o.db"),
            ("OUTREACH_API_PORT", "off"),
            ("OUTREACH_POLL_INTERVAL_MS", "250"),
            ("OUTREACH_MAX_CONCURRENT_STEPS", "4"),
            ("OUTREACH_EXIT_WHEN_IDLE", "yes"),
            ("OUTREACH_WEBHOOK_URL", "http://hooks.local/outreach"),
        ])
        .unwrap();
        assert_eq!(c.db_path, PathBuf::from("/tmp/o.db"));
        assert_eq!(c.api_port, None);
        assert_eq!(c.poll_interval, Duration::from_millis(250));
        assert!(c.exit_when_idle);

        let sched = c.scheduler_config();
        assert_eq!(sched.max_concurrent_steps, 4);
        assert!(sched.exit_when_idle);
        assert_eq!(c.webhook_url.as_deref(), Some("http://hooks.local/outreach"));
    }

    #[test]
    fn blank_values_fall_back() {
        let c = config(&[("OUTREACH_API_PORT", "  "), ("OUTREACH_DB_PATH", "")]).unwrap();
        assert_eq!(c.api_port, Some(8080));
        assert_eq!(c.db_path, PathBuf::from("./data/outreach.db"));
    }

    #[test]
    fn rejects_bad_values() {
        for (key, value) in [
            ("OUTREACH_API_PORT", "eighty"),
            ("OUTREACH_MAX_CONCURRENT_STEPS", "0"),
            ("OUTREACH_EXIT_WHEN_IDLE", "maybe"),
            ("OUTREACH_POLL_INTERVAL_MS", "-5"),
        ] {
            let err = config(&[(key, value)]).unwrap_err();
            match err {
                ConfigError::InvalidValue { key: k, .. } => assert_eq!(k, key),
                other => panic!("unexpected error for {key}: {other}"),
            }
        }
    }

    #[test]
    fn smtp_from_defaults_to_username() {
        let c = config(&[
            ("OUTREACH_SMTP_HOST", "smtp.acme.com"),
            ("OUTREACH_SMTP_USERNAME", "bot@acme.com"),
            ("OUTREACH_SMTP_PASSWORD", "hunter2"),
        ])
        .unwrap();
        let smtp = c.smtp.unwrap();
        assert_eq!(smtp.port, 587);
        assert_eq!(smtp.from_address, "bot@acme.com");
        assert_eq!(smtp.password.expose_secret(), "hunter2");
    }

    #[test]
    fn smtp_without_sender_address_is_an_error() {
        let err = config(&[("OUTREACH_SMTP_HOST", "smtp.acme.com")]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref k) if k == "OUTREACH_SMTP_FROM"));
    }
}
