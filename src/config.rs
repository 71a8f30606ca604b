use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub mail: MailConfig,
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub attachments_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MailConfig {
    pub imap_port: u16,
    /// Replaces the provider's host for every account (local test servers)
    pub host_override: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Minimum spacing between two message fetches on one session
    pub fetch_interval_ms: u64,
    pub run_timeout_secs: u64,
    pub workers: usize,
    pub queue_capacity: usize,
    pub topic: String,
    pub topic_per_account: bool,
    pub greeting: String,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            server: ServerConfig {
                host: std::env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: std::env::var("SERVER_PORT")
                    .unwrap_or_else(|_| "3000".to_string())
                    .parse()?,
            },
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL")?,
            },
            storage: StorageConfig {
                attachments_dir: PathBuf::from(
                    std::env::var("ATTACHMENTS_DIR")
                        .unwrap_or_else(|_| "./attachments".to_string()),
                ),
            },
            mail: MailConfig {
                imap_port: std::env::var("MAIL_IMAP_PORT")
                    .unwrap_or_else(|_| "993".to_string())
                    .parse()?,
                host_override: std::env::var("MAIL_HOST_OVERRIDE")
                    .ok()
                    .filter(|host| !host.is_empty()),
            },
            sync: SyncConfig {
                fetch_interval_ms: std::env::var("SYNC_FETCH_INTERVAL_MS")
                    .unwrap_or_else(|_| "2000".to_string())
                    .parse()?,
                run_timeout_secs: std::env::var("SYNC_RUN_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "600".to_string())
                    .parse()?,
                workers: std::env::var("SYNC_WORKERS")
                    .unwrap_or_else(|_| "2".to_string())
                    .parse()?,
                queue_capacity: std::env::var("SYNC_QUEUE_CAPACITY")
                    .unwrap_or_else(|_| "64".to_string())
                    .parse()?,
                topic: std::env::var("SYNC_TOPIC")
                    .unwrap_or_else(|_| "new_mail_group".to_string()),
                topic_per_account: std::env::var("SYNC_TOPIC_PER_ACCOUNT")
                    .map(|v| v == "true" || v == "1")
                    .unwrap_or(false),
                greeting: std::env::var("SYNC_GREETING")
                    .unwrap_or_else(|_| "Connection established!".to_string()),
            },
        })
    }
}

impl SyncConfig {
    pub fn fetch_interval(&self) -> Duration {
        Duration::from_millis(self.fetch_interval_ms)
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }

    /// Topic that events of one account's runs are published on
    pub fn topic_for(&self, account_id: Uuid) -> String {
        if self.topic_per_account {
            format!("{}.{}", self.topic, account_id)
        } else {
            self.topic.clone()
        }
    }
}

#[cfg(test)]
impl SyncConfig {
    pub fn for_tests() -> Self {
        Self {
            fetch_interval_ms: 0,
            run_timeout_secs: 30,
            workers: 1,
            queue_capacity: 8,
            topic: "new_mail_group".to_string(),
            topic_per_account: false,
            greeting: "Connection established!".to_string(),
        }
    }
}
