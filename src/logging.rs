//! Structured logging setup.
//!
//! Every stage logs through `tracing` with structured fields. The binary
//! installs a subscriber once, before anything else runs; the library never
//! installs one itself.
//!
//! Level precedence, highest first: an explicit level from the command line,
//! `IMAGE_ASSEMBLER_LOG_LEVEL`, then `info`. `RUST_LOG` directives are
//! honored on top of that.

use std::env;
use std::sync::Once;

use tracing::Level;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const LEVEL_ENV: &str = "IMAGE_ASSEMBLER_LOG_LEVEL";
pub const JSON_ENV: &str = "IMAGE_ASSEMBLER_LOG_JSON";

static INIT: Once = Once::new();

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: Level,
    /// One JSON object per line instead of human-readable output.
    pub use_json: bool,
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            use_json: false,
            include_target: false,
        }
    }
}

impl LoggingConfig {
    /// Read level and format from the environment, then apply overrides.
    pub fn from_env(level: Option<Level>, json: bool) -> Self {
        let env_level = env::var(LEVEL_ENV).ok().and_then(|v| parse_level(&v));
        let env_json = env::var(JSON_ENV)
            .ok()
            .and_then(|v| v.parse::<bool>().ok())
            .unwrap_or(false);
        Self {
            level: level.or(env_level).unwrap_or(Level::INFO),
            use_json: json || env_json,
            include_target: false,
        }
    }
}

/// Parse a level name, case-insensitively.
pub fn parse_level(raw: &str) -> Option<Level> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" | "warning" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        _ => None,
    }
}

/// Level after applying `-v` / `-q` counts to `base`.
pub fn adjust_level(base: Level, verbose: u8, quiet: u8) -> Level {
    const LADDER: [Level; 5] = [
        Level::ERROR,
        Level::WARN,
        Level::INFO,
        Level::DEBUG,
        Level::TRACE,
    ];
    let pos = LADDER.iter().position(|l| *l == base).unwrap_or(2) as i32;
    let pos = (pos + i32::from(verbose) - i32::from(quiet)).clamp(0, 4);
    LADDER[pos as usize]
}

/// Install the global subscriber. Later calls are ignored.
pub fn init_logging(config: LoggingConfig) {
    INIT.call_once(|| {
        let filter = EnvFilter::builder()
            .with_default_directive(LevelFilter::from_level(config.level).into())
            .from_env_lossy();

        if config.use_json {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .json()
                        .with_target(config.include_target)
                        .with_writer(std::io::stderr),
                )
                .init();
        } else {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .with_target(config.include_target)
                        .with_writer(std::io::stderr),
                )
                .init();
        }
    });
}
