use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

use crate::model::TechnicalId;

/// Initialize the global tracing subscriber
///
/// `RUST_LOG` wins over `level` when set. Logs go to stderr so command
/// output on stdout stays machine readable. JSON output carries the current span
/// so transition fields appear on every line logged inside it.
pub fn init_telemetry(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()?;
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()?;
    }

    tracing::debug!(level = %level, json, "Telemetry initialized");
    Ok(())
}

/// Generate a correlation ID for linking the steps of one chain
pub fn generate_correlation_id() -> String {
    Uuid::new_v4().to_string()
}

/// Span wrapping one transition attempt
pub fn create_transition_span(
    entity_type: &str,
    technical_id: TechnicalId,
    transition: &str,
    correlation_id: &str,
) -> tracing::Span {
    tracing::info_span!(
        "transition",
        entity_type = entity_type,
        technical_id = %technical_id,
        transition = transition,
        correlation.id = correlation_id,
    )
}

/// Span wrapping one dispatcher tick
pub fn create_dispatch_span(trigger: &str, entity_type: &str) -> tracing::Span {
    tracing::info_span!("dispatch", trigger = trigger, entity_type = entity_type)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_correlation_ids_are_unique_uuids() {
        let a = generate_correlation_id();
        let b = generate_correlation_id();
        assert_ne!(a, b);
        assert!(Uuid::parse_str(&a).is_ok());
    }
}
