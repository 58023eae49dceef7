mod parsing;
mod settings;
mod types;

pub(crate) use types::{
    AiSettings, ConfigError, DatabaseSettings, Settings, TelemetrySettings, WorkerSettings,
};
