//! Structured logging and token-sanitizing trace utilities.
//!
//! Configures the `tracing` ecosystem with either human-readable or JSON
//! output, and provides a sanitizer that keeps credential material out of
//! log sinks.

use crate::config::LoggingConfig;
use crate::error::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the global tracing subscriber.
///
/// Log levels come from `RUST_LOG` when set, otherwise from the config.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match config.format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}

/// Replace recognizable credential material in a string before it reaches
/// a log sink or an API response.
pub fn sanitize(input: &str) -> String {
    let mut result = input.to_string();

    // Bearer token prefixes seen across the supported providers.
    for (prefix, replacement) in [
        ("ya29.", "[REDACTED_ACCESS_TOKEN]"),
        ("1//0", "[REDACTED_REFRESH_TOKEN]"),
        ("sk-ant-", "[REDACTED_API_KEY]"),
        ("sk-proj-", "[REDACTED_API_KEY]"),
    ] {
        while let Some(pos) = result.find(prefix) {
            let end = result[pos..]
                .find(|c: char| c.is_whitespace() || c == '"' || c == '\'')
                .map(|i| pos + i)
                .unwrap_or(result.len());
            result.replace_range(pos..end, replacement);
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_google_access_token() {
        let input = "Authorization: Bearer ya29.a0AfH6SMC...";
        let output = sanitize(input);
        assert!(output.contains("[REDACTED_ACCESS_TOKEN]"));
        assert!(!output.contains("ya29.a0AfH6SMC"));
    }

    #[test]
    fn sanitizes_refresh_token() {
        let input = "refresh_token: 1//01S6LICZta2ee...";
        let output = sanitize(input);
        assert!(output.contains("[REDACTED_REFRESH_TOKEN]"));
        assert!(!output.contains("1//01S6LICZta2ee"));
    }

    #[test]
    fn sanitizes_multiple_api_keys() {
        let input = r#"{"a":"sk-ant-abc123","b":"sk-proj-def456"}"#;
        let output = sanitize(input);
        assert!(!output.contains("abc123"));
        assert!(!output.contains("def456"));
        assert_eq!(output.matches("[REDACTED_API_KEY]").count(), 2);
    }

    #[test]
    fn leaves_clean_text_untouched() {
        assert_eq!(sanitize("nothing secret here"), "nothing secret here");
    }
}
