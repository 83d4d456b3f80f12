//! Tracing subscriber initialization.
//!
//! Filtering comes from `RUST_LOG` (default `info`). Output is JSON unless
//! `LOG_FORMAT=pretty`.

use tracing_subscriber::fmt::time::SystemTime;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

impl LogFormat {
    pub fn from_env() -> Self {
        Self::parse(std::env::var("LOG_FORMAT").ok().as_deref())
    }

    fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            Some(v) if v.eq_ignore_ascii_case("pretty") || v.eq_ignore_ascii_case("text") => {
                LogFormat::Pretty
            }
            _ => LogFormat::Json,
        }
    }
}

/// Initialize tracing from the environment.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init() {
    init_with(LogFormat::from_env(), "info");
}

/// Install the global subscriber. Returns `false` when one is already set.
pub fn init_with(format: LogFormat, default_directive: &str) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let installed = match format {
        LogFormat::Json => builder.json().with_timer(SystemTime).try_init(),
        LogFormat::Pretty => builder.with_timer(SystemTime).try_init(),
    };
    installed.is_ok()
}
