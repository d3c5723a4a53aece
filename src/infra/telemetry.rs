use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

pub const TASKS_TOTAL: &str = "courseviz_tasks_total";
pub const TASK_DURATION_MS: &str = "courseviz_task_duration_ms";
pub const TASKS_IN_FLIGHT: &str = "courseviz_tasks_in_flight";
pub const ENGINE_LAUNCH_TOTAL: &str = "courseviz_engine_launch_total";

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            TASKS_TOTAL,
            Unit::Count,
            "Total number of generation tasks that reached a terminal state."
        );
        describe_histogram!(
            TASK_DURATION_MS,
            Unit::Milliseconds,
            "Wall-clock time of one strategy invocation in milliseconds."
        );
        describe_gauge!(
            TASKS_IN_FLIGHT,
            Unit::Count,
            "Number of strategy invocations currently holding an admission slot."
        );
        describe_counter!(
            ENGINE_LAUNCH_TOTAL,
            Unit::Count,
            "Total number of rendering engine launch attempts."
        );
    });
}
