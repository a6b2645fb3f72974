use super::parsing::{
    env_optional, env_or_default, parse_bool, parse_environment, parse_u16, parse_u32, parse_u64,
};
use super::types::{
    ConfigError, DatabaseSettings, ExpirySettings, PlatformSettings, RuntimeSettings, Settings,
    SmtpSettings, TelemetrySettings,
};

impl Settings {
    pub(crate) fn load() -> Result<Self, ConfigError> {
        let environment =
            parse_environment(env_optional("IDVERIFY_ENV").or_else(|| env_optional("ENVIRONMENT")));
        let strict_config =
            env_optional("IDVERIFY_STRICT_CONFIG").map(|value| parse_bool(&value)).unwrap_or(false)
                || environment.is_production();

        let postgres_server = env_or_default("POSTGRES_SERVER", "localhost");
        let postgres_port = parse_u16("POSTGRES_PORT", env_or_default("POSTGRES_PORT", "5432"))?;
        let postgres_user = env_or_default("POSTGRES_USER", "idverify");
        let postgres_password = env_or_default("POSTGRES_PASSWORD", "");
        let postgres_db = env_or_default("POSTGRES_DB", "idverify_db");
        let database_url = env_optional("DATABASE_URL");

        let smtp_host = env_or_default("SMTP_HOST", "localhost");
        let smtp_port = parse_u16("SMTP_PORT", env_or_default("SMTP_PORT", "25"))?;
        let smtp_username = env_or_default("SMTP_USERNAME", "");
        let smtp_password = env_or_default("SMTP_PASSWORD", "");
        let smtp_use_tls =
            env_optional("SMTP_USE_TLS").map(|value| parse_bool(&value)).unwrap_or(false);
        let from_address = env_or_default("EMAIL_FROM_ADDRESS", "no-reply@localhost");

        let platform_name = env_or_default("PLATFORM_NAME", "Open LMS");
        let lms_root_url = env_or_default("LMS_ROOT_URL", "http://localhost:8000");
        let reverification_path =
            env_or_default("REVERIFICATION_PATH", "/verify_student/reverify");
        let support_link =
            env_or_default("ID_VERIFICATION_SUPPORT_LINK", "http://localhost:8000/support");

        let resend_days = parse_u32(
            "VERIFICATION_RESEND_DAYS",
            env_or_default("VERIFICATION_RESEND_DAYS", "15"),
        )?;
        let batch_size = parse_u32(
            "VERIFICATION_BATCH_SIZE",
            env_or_default("VERIFICATION_BATCH_SIZE", "1000"),
        )?;
        let sleep_seconds = parse_u64(
            "VERIFICATION_SLEEP_SECONDS",
            env_or_default("VERIFICATION_SLEEP_SECONDS", "10"),
        )?;
        let days_good_for = parse_u32(
            "VERIFICATION_DAYS_GOOD_FOR",
            env_or_default("VERIFICATION_DAYS_GOOD_FOR", "365"),
        )?;

        let log_level = env_or_default("IDVERIFY_LOG_LEVEL", "info");
        let json =
            env_optional("IDVERIFY_LOG_JSON").map(|value| parse_bool(&value)).unwrap_or(false);
        let prometheus_enabled =
            env_optional("PROMETHEUS_ENABLED").map(|value| parse_bool(&value)).unwrap_or(false);

        let settings = Self {
            runtime: RuntimeSettings { environment, strict_config },
            database: DatabaseSettings {
                postgres_server,
                postgres_port,
                postgres_user,
                postgres_password,
                postgres_db,
                database_url,
            },
            smtp: SmtpSettings {
                host: smtp_host,
                port: smtp_port,
                username: smtp_username,
                password: smtp_password,
                use_tls: smtp_use_tls,
                from_address,
            },
            platform: PlatformSettings {
                platform_name,
                lms_root_url,
                reverification_path,
                support_link,
            },
            expiry: ExpirySettings { resend_days, batch_size, sleep_seconds, days_good_for },
            telemetry: TelemetrySettings { log_level, json, prometheus_enabled },
        };

        settings.validate()?;
        Ok(settings)
    }

    pub(crate) fn database(&self) -> &DatabaseSettings {
        &self.database
    }

    pub(crate) fn smtp(&self) -> &SmtpSettings {
        &self.smtp
    }

    pub(crate) fn platform(&self) -> &PlatformSettings {
        &self.platform
    }

    pub(crate) fn expiry(&self) -> &ExpirySettings {
        &self.expiry
    }

    pub(crate) fn telemetry(&self) -> &TelemetrySettings {
        &self.telemetry
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.expiry.batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "VERIFICATION_BATCH_SIZE",
                value: "0".to_string(),
            });
        }

        if self.expiry.days_good_for == 0 {
            return Err(ConfigError::InvalidValue {
                field: "VERIFICATION_DAYS_GOOD_FOR",
                value: "0".to_string(),
            });
        }

        if !(self.runtime.strict_config || self.runtime.environment.is_production()) {
            return Ok(());
        }

        if self.database.database_url.is_none() && self.database.postgres_password.is_empty() {
            return Err(ConfigError::MissingSecret("POSTGRES_PASSWORD"));
        }
        if self.smtp.host.is_empty() {
            return Err(ConfigError::MissingSecret("SMTP_HOST"));
        }
        if self.smtp.from_address.is_empty() {
            return Err(ConfigError::MissingSecret("EMAIL_FROM_ADDRESS"));
        }
        if self.platform.support_link.is_empty() {
            return Err(ConfigError::MissingSecret("ID_VERIFICATION_SUPPORT_LINK"));
        }

        Ok(())
    }
}
