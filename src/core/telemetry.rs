use tracing_subscriber::{fmt, EnvFilter};

use crate::core::config::TelemetrySettings;

pub(crate) fn init_tracing(telemetry: &TelemetrySettings) -> anyhow::Result<()> {
    // sqlx logs every statement at info; the claim loop would drown everything else.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},sqlx=warn", telemetry.log_level)));

    let builder = fmt().with_env_filter(filter).with_target(false);

    if telemetry.json {
        builder
            .json()
            .with_current_span(false)
            .try_init()
            .map_err(|err| anyhow::anyhow!(err.to_string()))?;
    } else {
        builder.try_init().map_err(|err| anyhow::anyhow!(err.to_string()))?;
    }

    Ok(())
}
