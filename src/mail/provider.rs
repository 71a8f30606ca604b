use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::config::MailConfig;
use crate::error::ConnectError;

/// Mail providers the service knows an IMAP endpoint for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Provider {
    Yandex,
    Gmail,
    MailRu,
}

const IMAP_HOSTS: &[(Provider, &str)] = &[
    (Provider::Yandex, "imap.yandex.ru"),
    (Provider::Gmail, "imap.gmail.com"),
    (Provider::MailRu, "imap.mail.ru"),
];

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Yandex => "YANDEX",
            Provider::Gmail => "GMAIL",
            Provider::MailRu => "MAILRU",
        }
    }

    pub fn imap_host(&self) -> Option<&'static str> {
        IMAP_HOSTS
            .iter()
            .find(|(provider, _)| provider == self)
            .map(|(_, host)| *host)
    }
}

impl FromStr for Provider {
    type Err = ConnectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "YANDEX" => Ok(Provider::Yandex),
            "GMAIL" => Ok(Provider::Gmail),
            "MAILRU" => Ok(Provider::MailRu),
            _ => Err(ConnectError::UnsupportedProvider(s.to_string())),
        }
    }
}

/// Where to open an IMAP session for an account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

impl Endpoint {
    /// Resolve a stored provider name to an endpoint without touching the network.
    pub fn resolve(provider: &str, config: &MailConfig) -> Result<Self, ConnectError> {
        let provider: Provider = provider.parse()?;
        let host = match &config.host_override {
            Some(host) => host.clone(),
            None => provider
                .imap_host()
                .ok_or_else(|| ConnectError::UnsupportedProvider(provider.as_str().to_string()))?
                .to_string(),
        };

        Ok(Self {
            host,
            port: config.imap_port,
            tls: config.imap_port == 993 || config.imap_port == 3993,
        })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
