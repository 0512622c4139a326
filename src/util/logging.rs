use regex::Regex;
use std::sync::LazyLock;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LogFormat;

const MASK: &str = "[REDACTED]";

static BEARER_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(bearer\s+)[A-Za-z0-9._~+/=-]+").expect("bearer pattern is valid")
});

static SECRET_PARAM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b((?:api[_-]?key|access[_-]?token|token|key)=)[^&\s]+")
        .expect("secret parameter pattern is valid")
});

/// Initializes tracing/logging based on environment variables.
pub fn init_tracing(format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(false);

    match format {
        LogFormat::Json => subscriber.json().init(),
        LogFormat::Pretty => subscriber.init(),
    }
}

/// Masks known secrets, bearer tokens and credential query parameters.
pub fn redact(text: &str, secrets: &[String]) -> String {
    let mut out = text.to_string();
    for secret in secrets.iter().filter(|s| !s.is_empty()) {
        out = out.replace(secret.as_str(), MASK);
    }
    let out = BEARER_TOKEN.replace_all(&out, format!("${{1}}{}", MASK));
    SECRET_PARAM
        .replace_all(&out, format!("${{1}}{}", MASK))
        .into_owned()
}
