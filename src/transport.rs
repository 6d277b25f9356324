//! Keyed pool of verified SMTP transport handles, shared across every
//! running campaign.
//!
//! Grounded on `mail_send::SmtpClientBuilder`'s connect/TLS-mode split in
//! `examples/remails-com-remails/src/handler/mod.rs` (`send_single_upstream`),
//! implemented with a `tokio::sync::Mutex<HashMap<..>>` guarding an
//! in-flight-or-ready cell per key — the same shape `tokio::sync::OnceCell`
//! would give per key, spelled out explicitly so a failed verification can be
//! retried by a later caller instead of poisoning the slot.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use mail_send::SmtpClientBuilder;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::Mutex as AsyncMutex;
use tokio_rustls::client::TlsStream;
use tracing::{debug, warn};

use crate::campaign::RelayDescriptor;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const GREETING_TIMEOUT: Duration = Duration::from_secs(15);
const SOCKET_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to connect to {host}:{port}: {source}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: mail_send::Error,
    },
}

/// TLS posture derived from the relay's port: 465 implies TLS, 587 requires
/// STARTTLS, anything else is plaintext with opportunistic upgrade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TlsMode {
    ImplicitTls,
    StartTls,
    Plaintext,
}

fn tls_mode_for_port(port: u16) -> TlsMode {
    match port {
        465 => TlsMode::ImplicitTls,
        587 => TlsMode::StartTls,
        _ => TlsMode::Plaintext,
    }
}

enum RawClient {
    Tls(mail_send::SmtpClient<TlsStream<TcpStream>>),
    Plain(mail_send::SmtpClient<TcpStream>),
}

/// A verified, ready-to-send transport. Sends are serialized through the
/// handle's own mutex: SMTP is single-threaded per connection, so two
/// campaigns sharing a cached handle must queue rather than interleave.
pub struct TransportHandle {
    client: AsyncMutex<Option<RawClient>>,
}

impl TransportHandle {
    fn builder(relay: &RelayDescriptor) -> SmtpClientBuilder<String> {
        SmtpClientBuilder::new(relay.host.clone(), relay.port)
            .credentials((relay.user.clone(), relay.secret.clone()))
            .timeout(SOCKET_TIMEOUT)
            // certificate verification is disabled: relays are operator-trusted
            .allow_invalid_certs()
    }

    async fn connect(relay: &RelayDescriptor) -> Result<Self, TransportError> {
        let mode = tls_mode_for_port(relay.port);

        let raw = match mode {
            TlsMode::ImplicitTls => RawClient::Tls(
                tokio::time::timeout(
                    CONNECT_TIMEOUT,
                    Self::builder(relay).implicit_tls(true).connect(),
                )
                    .await
                    .map_err(|_| TransportError::Connect {
                        host: relay.host.clone(),
                        port: relay.port,
                        source: mail_send::Error::Timeout,
                    })?
                    .map_err(|source| TransportError::Connect {
                        host: relay.host.clone(),
                        port: relay.port,
                        source,
                    })?,
            ),
            TlsMode::StartTls => RawClient::Tls(
                tokio::time::timeout(
                    GREETING_TIMEOUT,
                    Self::builder(relay).implicit_tls(false).connect(),
                )
                    .await
                    .map_err(|_| TransportError::Connect {
                        host: relay.host.clone(),
                        port: relay.port,
                        source: mail_send::Error::Timeout,
                    })?
                    .map_err(|source| TransportError::Connect {
                        host: relay.host.clone(),
                        port: relay.port,
                        source,
                    })?,
            ),
            TlsMode::Plaintext => RawClient::Plain(
                tokio::time::timeout(CONNECT_TIMEOUT, Self::builder(relay).connect_plain())
                    .await
                    .map_err(|_| TransportError::Connect {
                        host: relay.host.clone(),
                        port: relay.port,
                        source: mail_send::Error::Timeout,
                    })?
                    .map_err(|source| TransportError::Connect {
                        host: relay.host.clone(),
                        port: relay.port,
                        source,
                    })?,
            ),
        };

        Ok(Self {
            client: AsyncMutex::new(Some(raw)),
        })
    }

    pub async fn send<'m, M>(&self, message: M) -> Result<(), mail_send::Error>
    where
        M: mail_send::smtp::message::IntoMessage<'m> + Send,
    {
        let mut guard = self.client.lock().await;
        match guard.as_mut().expect("transport handle closed") {
            RawClient::Tls(client) => client.send(message).await.map(|_| ()),
            RawClient::Plain(client) => client.send(message).await.map(|_| ()),
        }
    }

    async fn close(&self) {
        let mut guard = self.client.lock().await;
        let Some(raw) = guard.take() else {
            return;
        };
        let result = match raw {
            RawClient::Tls(client) => client.quit().await,
            RawClient::Plain(client) => client.quit().await,
        };
        if let Err(err) = result {
            warn!("failed to close transport handle cleanly: {err}");
        }
    }
}

fn cache_key(relay: &RelayDescriptor) -> String {
    format!("{}:{}:{}", relay.host, relay.port, relay.user)
}

/// Keyed pool of verified transport handles, shared across all campaigns.
/// `acquire` verifies on first use and serves cached handles on subsequent
/// hits without re-verifying.
pub struct TransportCache {
    handles: AsyncMutex<HashMap<String, Arc<TransportHandle>>>,
    in_flight: AsyncMutex<HashMap<String, tokio::sync::broadcast::Sender<()>>>,
}

impl TransportCache {
    pub fn new() -> Self {
        Self {
            handles: AsyncMutex::new(HashMap::new()),
            in_flight: AsyncMutex::new(HashMap::new()),
        }
    }

    pub async fn acquire(
        &self,
        relay: &RelayDescriptor,
    ) -> Result<Arc<TransportHandle>, TransportError> {
        let key = cache_key(relay);

        loop {
            if let Some(handle) = self.handles.lock().await.get(&key) {
                return Ok(handle.clone());
            }

            let mut in_flight = self.in_flight.lock().await;
            if let Some(sender) = in_flight.get(&key) {
                let mut receiver = sender.subscribe();
                drop(in_flight);
                // Another caller is verifying this key; wait for it to finish
                // and then retry the cache lookup rather than dialing twice.
                let _ = receiver.recv().await;
                continue;
            }

            let (tx, _rx) = tokio::sync::broadcast::channel(1);
            in_flight.insert(key.clone(), tx.clone());
            drop(in_flight);

            debug!(key = %key, "opening new transport handle");
            let result = TransportHandle::connect(relay).await;

            self.in_flight.lock().await.remove(&key);
            let _ = tx.send(());

            let handle = Arc::new(result?);
            self.handles.lock().await.insert(key, handle.clone());
            return Ok(handle);
        }
    }

    /// Closes every cached handle (process shutdown).
    pub async fn shutdown(&self) {
        let handles = self.handles.lock().await;
        for handle in handles.values() {
            handle.close().await;
        }
    }
}

impl Default for TransportCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tracing_test::traced_test;

    fn unreachable_relay() -> RelayDescriptor {
        RelayDescriptor {
            id: "r1".to_string(),
            name: "test relay".to_string(),
            host: "127.0.0.1".to_string(),
            // nothing listens here; loopback refuses immediately instead of
            // hanging for the connect timeout.
            port: 1,
            user: "user@example.com".to_string(),
            secret: "secret".to_string(),
            reply_to: None,
            daily_limit: 500,
        }
    }

    #[tokio::test]
    #[traced_test]
    async fn acquire_logs_before_dialing_a_new_handle() {
        let cache = TransportCache::new();
        assert!(cache.acquire(&unreachable_relay()).await.is_err());
        assert!(logs_contain("opening new transport handle"));
    }
}
