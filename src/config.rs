use std::time::Duration;

/// Broker connection and queue settings.
#[derive(Debug, Clone)]
pub struct MessageSettings {
    pub hostname: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Full AMQP URL; overrides host, port and credentials when set.
    pub url: Option<String>,
    pub queue: String,
    /// Exchange used by `publish`; empty means the default exchange.
    pub exchange: String,
    pub routing_key: String,
}

impl MessageSettings {
    /// AMQP connection URI for these settings.
    pub fn connection_uri(&self) -> String {
        if let Some(ref url) = self.url {
            return url.clone();
        }
        format!(
            "amqp://{}:{}@{}:{}/%2f",
            self.username, self.password, self.hostname, self.port
        )
    }

    /// Connection URI with the password replaced, for logs.
    pub fn redacted_uri(&self) -> String {
        let uri = self.connection_uri();
        match url::Url::parse(&uri) {
            Ok(mut parsed) => {
                if parsed.password().is_some() {
                    let _ = parsed.set_password(Some("REDACTED"));
                }
                parsed.to_string()
            }
            Err(_) => "[unparseable AMQP URL]".to_string(),
        }
    }
}

/// Gateway REST API settings.
#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub base_url: String,
    pub timeout: Duration,
}

/// Timers that drive the consumer's health loop.
#[derive(Debug, Clone, Copy)]
pub struct ConsumerTiming {
    /// Wait before the first connection attempt.
    pub startup_delay: Duration,
    /// Interval between liveness checks.
    pub health_check_interval: Duration,
    /// Wait between stopping a dead consumer and restarting it.
    pub reconnect_backoff: Duration,
    /// How long `stop` waits for the in-flight delivery to settle.
    pub shutdown_grace: Duration,
}

impl Default for ConsumerTiming {
    fn default() -> Self {
        Self {
            startup_delay: Duration::from_secs(2),
            health_check_interval: Duration::from_secs(10),
            reconnect_backoff: Duration::from_secs(5),
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub message: MessageSettings,
    pub api: ApiSettings,
    pub timing: ConsumerTiming,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let message = MessageSettings {
            hostname: var("RABBITMQ_HOST").unwrap_or_else(|| "localhost".to_string()),
            port: var("RABBITMQ_PORT")
                .unwrap_or_else(|| "5672".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("RABBITMQ_PORT must be a valid number between 1-65535"))?,
            username: var("RABBITMQ_USERNAME").unwrap_or_else(|| "guest".to_string()),
            password: var("RABBITMQ_PASSWORD").unwrap_or_else(|| "guest".to_string()),
            url: var("RABBITMQ_URL")
                .map(|url| {
                    if !url.starts_with("amqp://") && !url.starts_with("amqps://") {
                        anyhow::bail!("RABBITMQ_URL must start with amqp:// or amqps://");
                    }
                    Ok(url)
                })
                .transpose()?,
            queue: var("RABBITMQ_QUEUE")
                .ok_or_else(|| anyhow::anyhow!("RABBITMQ_QUEUE environment variable required"))?,
            exchange: var("RABBITMQ_EXCHANGE").unwrap_or_default(),
            routing_key: var("RABBITMQ_ROUTING_KEY").unwrap_or_default(),
        };

        let api = ApiSettings {
            base_url: var("API_BASE_URL")
                .ok_or_else(|| anyhow::anyhow!("API_BASE_URL environment variable required"))
                .and_then(|url| {
                    if !url.starts_with("http://") && !url.starts_with("https://") {
                        anyhow::bail!("API_BASE_URL must start with http:// or https://");
                    }
                    Ok(url)
                })?,
            timeout: secs(&var, "API_TIMEOUT_SECS", 30)?,
        };

        let defaults = ConsumerTiming::default();
        let timing = ConsumerTiming {
            startup_delay: secs(&var, "STARTUP_DELAY_SECS", defaults.startup_delay.as_secs())?,
            health_check_interval: secs(
                &var,
                "HEALTH_CHECK_INTERVAL_SECS",
                defaults.health_check_interval.as_secs(),
            )?,
            reconnect_backoff: secs(
                &var,
                "RECONNECT_BACKOFF_SECS",
                defaults.reconnect_backoff.as_secs(),
            )?,
            shutdown_grace: secs(
                &var,
                "SHUTDOWN_GRACE_SECS",
                defaults.shutdown_grace.as_secs(),
            )?,
        };

        let config = Self {
            message,
            api,
            timing,
        };

        // Log successful configuration load (without sensitive values)
        tracing::info!("Configuration loaded successfully");
        tracing::debug!("Broker: {}", config.message.redacted_uri());
        tracing::debug!("Queue: {}", config.message.queue);
        tracing::debug!("API Base URL: {}", config.api.base_url);

        Ok(config)
    }
}

fn secs<F>(var: &F, key: &str, default: u64) -> anyhow::Result<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| anyhow::anyhow!("{} must be a whole number of seconds", key)),
        None => Ok(Duration::from_secs(default)),
    }
}
