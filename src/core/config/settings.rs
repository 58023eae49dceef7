use super::parsing::{
    env_optional, env_or_default, parse_bool, parse_cors_origins, parse_environment, parse_f64,
    parse_millis, parse_seconds, parse_u16, parse_u32, parse_usize,
};
use super::types::{
    AiSettings, ApiSettings, ConfigError, CorsSettings, DatabaseSettings, RuntimeSettings,
    ServerHost, ServerPort, ServerSettings, Settings, TelemetrySettings, WorkerSettings,
};

impl Settings {
    pub(crate) fn load() -> Result<Self, ConfigError> {
        let host = env_or_default("EVALQ_HOST", "0.0.0.0");
        let port = env_or_default("EVALQ_PORT", "8000");

        let environment =
            parse_environment(env_optional("EVALQ_ENV").or_else(|| env_optional("ENVIRONMENT")));
        let strict_config =
            env_optional("EVALQ_STRICT_CONFIG").map(|value| parse_bool(&value)).unwrap_or(false)
                || environment.is_production();

        let project_name = env_or_default("PROJECT_NAME", "Evaluation Queue");
        let api_v1_str = env_or_default("API_V1_STR", "/api/v1");

        let cors_origins = parse_cors_origins(env_optional("BACKEND_CORS_ORIGINS"))?;

        let postgres_server = env_or_default("POSTGRES_SERVER", "localhost");
        let postgres_port = parse_u16("POSTGRES_PORT", env_or_default("POSTGRES_PORT", "5432"))?;
        let postgres_user = env_or_default("POSTGRES_USER", "evalq");
        let postgres_password = env_or_default("POSTGRES_PASSWORD", "");
        let postgres_db = env_or_default("POSTGRES_DB", "evalq");
        let database_url = env_optional("DATABASE_URL");
        let max_connections = parse_u32(
            "DATABASE_MAX_CONNECTIONS",
            env_or_default("DATABASE_MAX_CONNECTIONS", "10"),
        )?;

        let api_key = env_optional("OPENAI_API_KEY")
            .or_else(|| env_optional("PERPLEXITY_API_KEY"))
            .unwrap_or_default();
        let base_url = env_or_default("OPENAI_BASE_URL", "https://api.perplexity.ai");
        let model = env_or_default("AI_MODEL", "sonar-pro");
        let max_tokens = parse_u32("AI_MAX_TOKENS", env_or_default("AI_MAX_TOKENS", "300"))?;
        let temperature = parse_f64("AI_TEMPERATURE", env_or_default("AI_TEMPERATURE", "0.1"))?;
        let max_question_chars =
            parse_usize("MAX_QUESTION_CHARS", env_or_default("MAX_QUESTION_CHARS", "800"))?;
        let max_answer_chars =
            parse_usize("MAX_ANSWER_CHARS", env_or_default("MAX_ANSWER_CHARS", "1500"))?;

        let concurrency =
            parse_usize("WORKER_CONCURRENCY", env_or_default("WORKER_CONCURRENCY", "1"))?;
        let max_retries = parse_u32("MAX_RETRIES", env_or_default("MAX_RETRIES", "3"))?;
        let batch_size = parse_u32("BATCH_SIZE", env_or_default("BATCH_SIZE", "5"))?;
        let idle_poll_interval = parse_millis(
            "IDLE_POLL_INTERVAL_MS",
            env_or_default("IDLE_POLL_INTERVAL_MS", "5000"),
        )?;
        let job_timeout =
            parse_seconds("JOB_TIMEOUT_SECONDS", env_or_default("JOB_TIMEOUT_SECONDS", "60"))?;
        let lease_duration = parse_seconds(
            "LEASE_DURATION_SECONDS",
            env_or_default("LEASE_DURATION_SECONDS", "300"),
        )?;
        let eval_pause = parse_millis("EVAL_PAUSE_MS", env_or_default("EVAL_PAUSE_MS", "1500"))?;
        let store_backoff =
            parse_millis("STORE_BACKOFF_MS", env_or_default("STORE_BACKOFF_MS", "1000"))?;
        let lease_sweep_interval = parse_seconds(
            "LEASE_SWEEP_INTERVAL_SECONDS",
            env_or_default("LEASE_SWEEP_INTERVAL_SECONDS", "60"),
        )?;

        let log_level = env_or_default("EVALQ_LOG_LEVEL", "info");
        let json = env_optional("EVALQ_LOG_JSON").map(|value| parse_bool(&value)).unwrap_or(false);
        let prometheus_enabled =
            env_optional("PROMETHEUS_ENABLED").map(|value| parse_bool(&value)).unwrap_or(false);

        let settings = Self {
            server: ServerSettings {
                host: ServerHost::parse(host)?,
                port: ServerPort::parse(port)?,
            },
            runtime: RuntimeSettings { environment, strict_config },
            api: ApiSettings { project_name, api_v1_str },
            cors: CorsSettings { origins: cors_origins },
            database: DatabaseSettings {
                postgres_server,
                postgres_port,
                postgres_user,
                postgres_password,
                postgres_db,
                database_url,
                max_connections,
            },
            ai: AiSettings {
                api_key,
                base_url,
                model,
                max_tokens,
                temperature,
                max_question_chars,
                max_answer_chars,
            },
            worker: WorkerSettings {
                concurrency,
                max_retries,
                batch_size,
                idle_poll_interval,
                job_timeout,
                lease_duration,
                eval_pause,
                store_backoff,
                lease_sweep_interval,
            },
            telemetry: TelemetrySettings { log_level, json, prometheus_enabled },
        };

        settings.validate()?;
        Ok(settings)
    }

    pub(crate) fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host.0, self.server.port.0)
    }

    pub(crate) fn server_host(&self) -> &str {
        &self.server.host.0
    }

    pub(crate) fn server_port(&self) -> u16 {
        self.server.port.0
    }

    pub(crate) fn api(&self) -> &ApiSettings {
        &self.api
    }

    pub(crate) fn cors(&self) -> &CorsSettings {
        &self.cors
    }

    pub(crate) fn database(&self) -> &DatabaseSettings {
        &self.database
    }

    pub(crate) fn ai(&self) -> &AiSettings {
        &self.ai
    }

    pub(crate) fn worker(&self) -> &WorkerSettings {
        &self.worker
    }

    pub(crate) fn telemetry(&self) -> &TelemetrySettings {
        &self.telemetry
    }

    pub(crate) fn runtime(&self) -> &RuntimeSettings {
        &self.runtime
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.worker.max_retries == 0 {
            return Err(ConfigError::InvalidValue { field: "MAX_RETRIES", value: "0".to_string() });
        }

        if self.worker.batch_size == 0 {
            return Err(ConfigError::InvalidValue { field: "BATCH_SIZE", value: "0".to_string() });
        }

        if self.worker.concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                field: "WORKER_CONCURRENCY",
                value: "0".to_string(),
            });
        }

        if self.worker.job_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "JOB_TIMEOUT_SECONDS",
                value: "0".to_string(),
            });
        }

        // Leases are renewed before each job of a batch, so one lease must outlast a
        // full evaluation plus the pause that precedes it.
        if self.worker.lease_duration <= self.worker.job_timeout + self.worker.eval_pause {
            return Err(ConfigError::InvalidValue {
                field: "LEASE_DURATION_SECONDS",
                value: self.worker.lease_duration.as_secs().to_string(),
            });
        }

        if self.worker.lease_sweep_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "LEASE_SWEEP_INTERVAL_SECONDS",
                value: "0".to_string(),
            });
        }

        if self.ai.max_question_chars == 0 || self.ai.max_answer_chars == 0 {
            return Err(ConfigError::InvalidValue {
                field: "MAX_QUESTION_CHARS/MAX_ANSWER_CHARS",
                value: "0".to_string(),
            });
        }

        if !(self.runtime.strict_config || self.runtime.environment.is_production()) {
            return Ok(());
        }

        if self.database.database_url.is_none() && self.database.postgres_password.is_empty() {
            return Err(ConfigError::MissingSecret("POSTGRES_PASSWORD"));
        }
        if self.ai.api_key.is_empty() {
            return Err(ConfigError::MissingSecret("OPENAI_API_KEY"));
        }
        if self.ai.base_url.is_empty() {
            return Err(ConfigError::MissingSecret("OPENAI_BASE_URL"));
        }

        Ok(())
    }
}
