// ============================================================================
// SECTION 9: LOGGING
// ============================================================================

use tracing::info;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::{VitalsError, VitalsResult};

/// Install the global subscriber. `RUST_LOG` directives take precedence
/// over the configured level.
pub fn init_logging(config: &LoggingConfig) -> VitalsResult<()> {
    let level_filter = match config.level.to_lowercase().as_str() {
        "trace" => LevelFilter::TRACE,
        "debug" => LevelFilter::DEBUG,
        "info" => LevelFilter::INFO,
        "warn" => LevelFilter::WARN,
        "error" => LevelFilter::ERROR,
        _ => LevelFilter::INFO,
    };

    let env_filter = EnvFilter::builder()
        .with_default_directive(level_filter.into())
        .from_env_lossy();

    let installed = match config.format.as_str() {
        "json" => {
            let subscriber = tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_target(true).with_current_span(true));
            tracing::subscriber::set_global_default(subscriber)
        }
        "pretty" => {
            let subscriber = tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().pretty().with_ansi(config.colors).with_target(true));
            tracing::subscriber::set_global_default(subscriber)
        }
        _ => {
            let subscriber = tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().compact().with_ansi(config.colors).with_target(true));
            tracing::subscriber::set_global_default(subscriber)
        }
    };
    installed.map_err(|e| VitalsError::Internal(format!("Failed to set logger: {}", e)))?;

    info!(
        target: "vitals::init",
        level = %config.level,
        format = %config.format,
        "Logging initialized"
    );

    Ok(())
}
