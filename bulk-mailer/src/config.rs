//! Configuration module for environment variable parsing.
//!
//! Everything the mailer needs is read once at startup into [`Config`] and
//! handed down explicitly; core modules never consult the environment.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use crate::dispatch::{DelayRange, DispatchPolicy, SendMode};
use crate::message::{Identity, MessageError, TemplateValues};
use crate::transport::{Encryption, TransportConfig};

/// Problems that make a configuration unusable for real sends.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("SENDER_EMAIL is not configured")]
    MissingSenderEmail,

    #[error("SENDER_PASSWORD is not configured")]
    MissingSenderPassword,

    #[error("sender identity is invalid: {0}")]
    InvalidSender(#[from] MessageError),
}

/// Application configuration loaded from environment variables.
#[derive(Clone)]
pub struct Config {
    /// Relay hostname
    pub smtp_host: String,

    /// Relay submission port
    pub smtp_port: u16,

    /// How the relay connection is encrypted
    pub smtp_encryption: Encryption,

    /// Sender address, also used as the SMTP login
    pub sender_email: String,

    /// Sender secret (app password)
    pub sender_password: String,

    /// Display name used in the From header and templates
    pub sender_name: String,

    /// Job title substituted into subject and cover letter
    pub job_title: String,

    /// Company wording substituted into the cover letter
    pub company_preference: String,

    /// Delay range in seconds between sends in safe mode (min, max)
    pub safe_delay_secs: (u64, u64),

    /// Worker pool width for instant mode
    pub parallel_workers: usize,

    /// Per-message send timeout in milliseconds
    pub send_timeout_ms: u64,

    /// Connection establishment timeout in milliseconds
    pub connect_timeout_ms: u64,

    /// Consecutive send timeouts tolerated before a session is treated as lost
    pub max_consecutive_timeouts: u32,

    /// Fresh sessions attempted after a lost connection
    pub reconnect_attempts: u32,

    /// Default CV attached when present on disk
    pub cv_path: PathBuf,

    /// Cover letter template file
    pub cover_letter_path: PathBuf,

    /// Mode used when the caller does not pick one
    pub default_mode: String,

    /// Route sends to the in-memory stub instead of the relay
    pub dry_run: bool,

    /// Port for the web server to listen on
    pub port: u16,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Config {
            smtp_host: env::var("SMTP_HOST").unwrap_or_else(|_| "smtp.gmail.com".to_string()),

            smtp_port: parse_number("SMTP_PORT", 587),

            smtp_encryption: parse_encryption("SMTP_TLS", Encryption::StartTls),

            sender_email: env::var("SENDER_EMAIL").unwrap_or_default(),

            sender_password: env::var("SENDER_PASSWORD").unwrap_or_default(),

            sender_name: env::var("SENDER_NAME").unwrap_or_else(|_| "Job Applicant".to_string()),

            job_title: env::var("JOB_TITLE").unwrap_or_else(|_| "Software Engineer".to_string()),

            company_preference: env::var("COMPANY_PREFERENCE")
                .unwrap_or_else(|_| "your organization".to_string()),

            safe_delay_secs: parse_range("SAFE_DELAY_RANGE_SECS", (2, 5)),

            parallel_workers: parse_number("PARALLEL_WORKERS", 10),

            send_timeout_ms: parse_number("SEND_TIMEOUT_MS", 30_000),

            connect_timeout_ms: parse_number("CONNECT_TIMEOUT_MS", 15_000),

            max_consecutive_timeouts: parse_number("MAX_CONSECUTIVE_TIMEOUTS", 3),

            reconnect_attempts: parse_number("RECONNECT_ATTEMPTS", 2),

            cv_path: env::var("CV_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("cv.pdf")),

            cover_letter_path: env::var("COVER_LETTER_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("templates/cover_letter.txt")),

            default_mode: env::var("SEND_MODE").unwrap_or_else(|_| "safe".to_string()),

            dry_run: parse_bool("DRY_RUN", false),

            port: parse_number("PORT", 8000),
        }
    }

    /// Check that real sends are possible.
    ///
    /// Only credentials are checked; a missing CV file never makes the
    /// configuration invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sender_email.is_empty() {
            return Err(ConfigError::MissingSenderEmail);
        }
        if self.sender_password.is_empty() {
            return Err(ConfigError::MissingSenderPassword);
        }
        self.sender_identity()?;
        Ok(())
    }

    /// Relay connection settings, credentials included.
    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            host: self.smtp_host.clone(),
            port: self.smtp_port,
            encryption: self.smtp_encryption,
            username: self.sender_email.clone(),
            password: self.sender_password.clone(),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
        }
    }

    pub fn sender_identity(&self) -> Result<Identity, MessageError> {
        Identity::new(&self.sender_name, &self.sender_email)
    }

    /// Values substituted into subject and body templates.
    pub fn template_values(&self) -> TemplateValues {
        TemplateValues::new()
            .with("sender_name", &self.sender_name)
            .with("job_title", &self.job_title)
            .with("company_preference", &self.company_preference)
    }

    pub fn dispatch_policy(&self) -> DispatchPolicy {
        DispatchPolicy {
            send_timeout: Duration::from_millis(self.send_timeout_ms),
            max_consecutive_timeouts: self.max_consecutive_timeouts,
            reconnect_attempts: self.reconnect_attempts,
        }
    }

    /// Resolve a mode name ("safe", "fast", "instant") against configured defaults.
    pub fn send_mode(&self, name: &str) -> Option<SendMode> {
        match name.trim().to_ascii_lowercase().as_str() {
            "safe" => Some(SendMode::Safe(DelayRange::from_secs(
                self.safe_delay_secs.0,
                self.safe_delay_secs.1,
            ))),
            "fast" => Some(SendMode::Fast),
            "instant" => Some(SendMode::Instant {
                max_concurrency: self.parallel_workers,
            }),
            _ => None,
        }
    }

    /// Sender address safe for display, e.g. `j**n@example.com`.
    pub fn masked_sender_email(&self) -> String {
        mask_email(&self.sender_email)
    }

    /// Relay summary for status displays.
    pub fn smtp_info(&self) -> String {
        format!("{}:{}", self.smtp_host, self.smtp_port)
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("smtp_host", &self.smtp_host)
            .field("smtp_port", &self.smtp_port)
            .field("smtp_encryption", &self.smtp_encryption)
            .field("sender_email", &self.masked_sender_email())
            .field("sender_password", &"<redacted>")
            .field("sender_name", &self.sender_name)
            .field("safe_delay_secs", &self.safe_delay_secs)
            .field("parallel_workers", &self.parallel_workers)
            .field("dry_run", &self.dry_run)
            .finish_non_exhaustive()
    }
}

/// Mask the local part of an address, keeping its first and last character.
pub fn mask_email(email: &str) -> String {
    if email.is_empty() {
        return "Not configured".to_string();
    }

    let Some((local, domain)) = email.split_once('@') else {
        return "Invalid email".to_string();
    };
    if local.is_empty() || domain.contains('@') {
        return "Invalid email".to_string();
    }

    let chars: Vec<char> = local.chars().collect();
    let masked = if chars.len() <= 2 {
        format!("{}*", chars[0])
    } else {
        format!(
            "{}{}{}",
            chars[0],
            "*".repeat(chars.len() - 2),
            chars[chars.len() - 1]
        )
    };

    format!("{}@{}", masked, domain)
}

fn parse_number<T: std::str::FromStr>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                warn!(env_var = name, value = %raw, "Invalid number, using default");
                default
            }
        },
        Err(_) => default,
    }
}

fn parse_bool(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(raw) => matches!(
            raw.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => default,
    }
}

fn parse_encryption(name: &str, default: Encryption) -> Encryption {
    let raw = match env::var(name) {
        Ok(v) => v,
        Err(_) => return default,
    };

    match raw.trim().to_ascii_lowercase().as_str() {
        "starttls" => Encryption::StartTls,
        "opportunistic" => Encryption::Opportunistic,
        "tls" | "ssl" => Encryption::Implicit,
        "none" => Encryption::None,
        _ => {
            warn!(env_var = name, value = %raw, "Invalid encryption mode, using default");
            default
        }
    }
}

/// Parse a comma-separated range like "2,5" into a tuple.
fn parse_range(name: &str, default: (u64, u64)) -> (u64, u64) {
    let raw = match env::var(name) {
        Ok(v) => v,
        Err(_) => return default,
    };

    let parts: Vec<&str> = raw.split(',').collect();
    if parts.len() != 2 {
        warn!(env_var = name, value = %raw, "Invalid range format, using default");
        return default;
    }

    let min = parts[0].trim().parse::<u64>();
    let max = parts[1].trim().parse::<u64>();

    match (min, max) {
        (Ok(min), Ok(max)) if min <= max => (min, max),
        _ => {
            warn!(env_var = name, value = %raw, "Invalid range values, using default");
            default
        }
    }
}
