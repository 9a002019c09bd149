//! # Structured Logging
//!
//! Installs the `tracing` subscriber for the CLI. Output goes to stderr so
//! stdout carries only command results, which are JSON and meant to be piped.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    /// One flattened JSON object per event.
    Json,
}

impl LogFormat {
    /// Accepts "json" in any case. Anything else is `Pretty`.
    pub fn from_str_lossy(s: &str) -> Self {
        if s.eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        }
    }
}

/// Filter directives used when `RUST_LOG` is unset.
pub fn default_directives(verbose: bool) -> &'static str {
    if verbose {
        "renegade_cli=debug,renegade_sdk=debug"
    } else {
        "renegade_cli=info,renegade_sdk=info"
    }
}

/// Install the global subscriber. `RUST_LOG` takes precedence over
/// `default_level`, e.g. `RUST_LOG=renegade_sdk::ws=trace`.
///
/// A second call leaves the first subscriber in place.
pub fn init_logging(default_level: &str, format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let (pretty, json) = match format {
        LogFormat::Pretty => (
            Some(fmt::layer().with_writer(std::io::stderr).with_target(true)),
            None,
        ),
        LogFormat::Json => (
            None,
            Some(
                fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_writer(std::io::stderr),
            ),
        ),
    };

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(pretty)
        .with(json)
        .try_init()
        .is_ok();
    if installed {
        tracing::debug!(?format, "logging initialized");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_formats_leniently() {
        assert_eq!(LogFormat::from_str_lossy("JSON"), LogFormat::Json);
        assert_eq!(LogFormat::from_str_lossy("pretty"), LogFormat::Pretty);
        assert_eq!(LogFormat::from_str_lossy("xml"), LogFormat::Pretty);
    }

    #[test]
    fn verbose_raises_sdk_level() {
        assert!(default_directives(true).contains("renegade_sdk=debug"));
        assert!(default_directives(false).contains("renegade_sdk=info"));
    }
}
