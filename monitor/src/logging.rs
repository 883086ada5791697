//! Tracing subscriber setup

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

use crate::config::LoggingConfig;
use crate::error::{ConfigError, ConfigResult};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// Build the filter: `RUST_LOG` wins, otherwise the configured level for
/// this crate with noisy dependencies held at `warn`.
pub fn build_filter(level: &str) -> ConfigResult<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }

    let invalid = |value: String| ConfigError::InvalidValue {
        field: "logging.level".to_string(),
        value,
    };

    let level = level.to_lowercase();
    if !matches!(level.as_str(), "trace" | "debug" | "info" | "warn" | "error") {
        return Err(invalid(level));
    }

    let mut filter = EnvFilter::new("warn");
    for directive in [
        format!("dao_monitor={}", level),
        "hyper=warn".to_string(),
        "reqwest=warn".to_string(),
        "tokio=warn".to_string(),
    ] {
        filter = filter.add_directive(directive.parse().map_err(|_| invalid(directive.clone()))?);
    }
    Ok(filter)
}

/// Install the global subscriber.
///
/// The returned guard flushes the file writer on drop and must be held for
/// the life of the process.
pub fn init_logging(config: &LoggingConfig) -> ConfigResult<Option<WorkerGuard>> {
    let json = config.format.eq_ignore_ascii_case("json");
    let mut layers: Vec<BoxedLayer> = Vec::new();
    let mut guard = None;

    if config.console {
        if json {
            layers.push(fmt::layer().json().boxed());
        } else {
            layers.push(fmt::layer().with_target(false).boxed());
        }
    }

    if let Some(path) = &config.file_path {
        let directory = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(std::path::Path::new("."));
        let file_name = path.file_name().ok_or_else(|| ConfigError::InvalidValue {
            field: "logging.file_path".to_string(),
            value: path.display().to_string(),
        })?;

        let appender = tracing_appender::rolling::daily(directory, file_name);
        let (writer, worker_guard) = tracing_appender::non_blocking(appender);
        guard = Some(worker_guard);

        if json {
            layers.push(fmt::layer().json().with_writer(writer).boxed());
        } else {
            layers.push(fmt::layer().with_ansi(false).with_writer(writer).boxed());
        }
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(build_filter(&config.level)?)
        .try_init()
        .map_err(|e| ConfigError::ValidationFailed {
            reason: format!("failed to install log subscriber: {}", e),
        })?;

    Ok(guard)
}
