use async_imap::Session;
use async_native_tls::TlsStream;
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};

use crate::accounts::{CredentialVault, MailAccount};
use crate::config::MailConfig;
use crate::error::{ConnectError, FetchError, ListError};
use crate::mail::provider::Endpoint;

use futures::io::{AsyncRead, AsyncWrite};
use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};

const INBOX: &str = "INBOX";

/// An authenticated session with the inbox selected.
///
/// Owned by exactly one sync run; never shared.
#[async_trait]
pub trait MailboxSession: Send {
    /// UIDs of unseen messages in protocol-native (ascending) order.
    async fn search_unseen(&mut self) -> Result<Vec<String>, ListError>;

    /// Complete raw RFC 5322 message for one UID.
    async fn fetch_raw(&mut self, uid: &str) -> Result<Vec<u8>, FetchError>;

    async fn logout(&mut self) -> Result<(), ConnectError>;
}

#[async_trait]
pub trait MailboxConnector: Send + Sync {
    async fn open(&self, account: &MailAccount) -> Result<Box<dyn MailboxSession>, ConnectError>;
}

/// Best-effort session teardown. Failures are logged, never returned.
pub async fn close(mut session: Box<dyn MailboxSession>) {
    if let Err(err) = session.logout().await {
        tracing::warn!("Closing mailbox session failed: {}", err);
    }
}

/// Wrapper for either TLS or Plain IMAP stream
enum StreamWrapper {
    Tls(TlsStream<Compat<TcpStream>>),
    Plain(Compat<TcpStream>),
}

impl AsyncRead for StreamWrapper {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &mut [u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            StreamWrapper::Tls(s) => Pin::new(s).poll_read(cx, buf),
            StreamWrapper::Plain(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for StreamWrapper {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            StreamWrapper::Tls(s) => Pin::new(s).poll_write(cx, buf),
            StreamWrapper::Plain(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            StreamWrapper::Tls(s) => Pin::new(s).poll_flush(cx),
            StreamWrapper::Plain(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            StreamWrapper::Tls(s) => Pin::new(s).poll_close(cx),
            StreamWrapper::Plain(s) => Pin::new(s).poll_close(cx),
        }
    }
}

impl std::fmt::Debug for StreamWrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamWrapper::Tls(_) => write!(f, "StreamWrapper::Tls"),
            StreamWrapper::Plain(_) => write!(f, "StreamWrapper::Plain"),
        }
    }
}

/// Opens IMAP sessions against the provider's fixed endpoint.
pub struct ImapConnector {
    config: MailConfig,
    vault: Arc<dyn CredentialVault>,
}

impl ImapConnector {
    pub fn new(config: MailConfig, vault: Arc<dyn CredentialVault>) -> Self {
        Self { config, vault }
    }

    async fn transport(&self, endpoint: &Endpoint) -> Result<StreamWrapper, ConnectError> {
        let connection_err = |reason: String| ConnectError::Connection {
            endpoint: endpoint.to_string(),
            reason,
        };

        let tcp = TcpStream::connect((endpoint.host.as_str(), endpoint.port))
            .await
            .map_err(|e| connection_err(e.to_string()))?;

        if endpoint.tls {
            let tls = async_native_tls::TlsConnector::new();
            let tls_stream = tls
                .connect(endpoint.host.as_str(), tcp.compat())
                .await
                .map_err(|e| connection_err(format!("TLS handshake failed: {}", e)))?;
            Ok(StreamWrapper::Tls(tls_stream))
        } else {
            tracing::info!("Using plain IMAP for {}", endpoint);
            Ok(StreamWrapper::Plain(tcp.compat()))
        }
    }
}

#[async_trait]
impl MailboxConnector for ImapConnector {
    async fn open(&self, account: &MailAccount) -> Result<Box<dyn MailboxSession>, ConnectError> {
        // Resolved first so an unknown provider never reaches the network
        let endpoint = Endpoint::resolve(&account.provider, &self.config)?;
        let password = self.vault.reveal(account)?;

        tracing::info!("Connecting to IMAP {} for {}", endpoint, account.address);
        let stream = self.transport(&endpoint).await?;
        let client = async_imap::Client::new(stream);

        let mut session = client
            .login(&account.address, &password)
            .await
            .map_err(|(err, _)| ConnectError::Auth(err.to_string()))?;

        session
            .select(INBOX)
            .await
            .map_err(|e| ConnectError::Select {
                mailbox: INBOX.to_string(),
                reason: e.to_string(),
            })?;

        tracing::info!("IMAP login successful for {}", account.address);
        Ok(Box::new(ImapSession { inner: session }))
    }
}

struct ImapSession {
    inner: Session<StreamWrapper>,
}

#[async_trait]
impl MailboxSession for ImapSession {
    async fn search_unseen(&mut self) -> Result<Vec<String>, ListError> {
        let uids = self
            .inner
            .uid_search("UNSEEN")
            .await
            .map_err(|e| ListError(e.to_string()))?;

        let mut uids: Vec<u32> = uids.into_iter().collect();
        uids.sort_unstable();
        Ok(uids.into_iter().map(|uid| uid.to_string()).collect())
    }

    async fn fetch_raw(&mut self, uid: &str) -> Result<Vec<u8>, FetchError> {
        let command_err = |reason: String| FetchError::Command {
            uid: uid.to_string(),
            reason,
        };

        // BODY[] sets \Seen on the server; no explicit STORE is issued
        let mut fetch_stream = self
            .inner
            .uid_fetch(uid, "BODY[]")
            .await
            .map_err(|e| command_err(e.to_string()))?;

        let mut raw_message: Option<Vec<u8>> = None;
        while let Some(result) = fetch_stream.next().await {
            let fetch = result.map_err(|e| command_err(e.to_string()))?;
            if let Some(body) = fetch.body() {
                raw_message = Some(body.to_vec());
            }
        }
        drop(fetch_stream);

        raw_message.ok_or_else(|| FetchError::EmptyBody(uid.to_string()))
    }

    async fn logout(&mut self) -> Result<(), ConnectError> {
        self.inner
            .logout()
            .await
            .map_err(|e| ConnectError::Logout(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::PassthroughVault;
    use crate::testing::account;

    #[tokio::test]
    async fn test_unsupported_provider_fails_before_network() {
        // Host points nowhere: reaching the network would surface a Connection error instead
        let connector = ImapConnector::new(
            MailConfig {
                imap_port: 1,
                host_override: None,
            },
            Arc::new(PassthroughVault),
        );

        let result = connector.open(&account("HOTMAIL")).await;
        assert!(matches!(result, Err(ConnectError::UnsupportedProvider(_))));
    }

    #[tokio::test]
    async fn test_connection_refused_is_connection_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let connector = ImapConnector::new(
            MailConfig {
                imap_port: port,
                host_override: Some("127.0.0.1".to_string()),
            },
            Arc::new(PassthroughVault),
        );

        let result = connector.open(&account("GMAIL")).await;
        assert!(matches!(result, Err(ConnectError::Connection { .. })));
    }
}
