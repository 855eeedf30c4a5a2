//! Auto-refreshing outbound credential
//!
//! ## Design
//!
//! - `start()` fetches once before returning so callers never observe an
//!   empty token
//! - A single background task refetches on a fixed interval until the
//!   shutdown channel fires (or its sender is dropped)
//! - A failed refresh is logged and the previous token stays in place
//! - Readers take a shared lock and never wait on the network

use crate::credentials::{AccessToken, AuthorizationValuer, CredentialSource};
use crate::error::CredentialError;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{error, info};

#[derive(Clone)]
pub struct AutoRefreshToken {
    source: Arc<dyn CredentialSource>,
    interval: Duration,
    token: Arc<RwLock<AccessToken>>,
}

impl AutoRefreshToken {
    /// ## Errors
    ///
    /// Fails if the credential source rejects its own configuration.
    pub fn new(
        source: Arc<dyn CredentialSource>,
        interval: Duration,
    ) -> Result<Self, CredentialError> {
        source.validate()?;

        Ok(Self {
            source,
            interval,
            token: Arc::new(RwLock::new(AccessToken::default())),
        })
    }

    /// Fetch the first token and spawn the refresh loop.
    ///
    /// If the first fetch fails the error is returned and no task is spawned.
    pub async fn start(
        &self,
        shutdown: watch::Receiver<()>,
    ) -> Result<JoinHandle<()>, CredentialError> {
        let token = self.source.fetch_token().await?;
        *self.token.write() = token;

        let source = self.source.clone();
        let slot = self.token.clone();
        let interval = self.interval;

        info!(interval_secs = interval.as_secs(), "Starting token refresh loop");
        Ok(tokio::spawn(refresh_loop(source, slot, interval, shutdown)))
    }

    /// Snapshot of the current token
    pub fn token(&self) -> AccessToken {
        self.token.read().clone()
    }

    pub fn authorization_value(&self) -> String {
        self.token.read().authorization_value()
    }
}

impl AuthorizationValuer for AutoRefreshToken {
    fn authorization_value(&self) -> String {
        AutoRefreshToken::authorization_value(self)
    }
}

async fn refresh_loop(
    source: Arc<dyn CredentialSource>,
    slot: Arc<RwLock<AccessToken>>,
    interval: Duration,
    mut shutdown: watch::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                info!("Token refresh loop shutting down");
                break;
            }
            _ = sleep(interval) => {
                match source.fetch_token().await {
                    Ok(token) => {
                        *slot.write() = token;
                        info!("Refreshed outbound token");
                    }
                    Err(err) => {
                        error!(error = %err, "Token refresh failed, keeping previous token");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const INTERVAL: Duration = Duration::from_secs(60);

    /// Returns queued results in order, then keeps failing
    struct ScriptedSource {
        results: Mutex<VecDeque<Result<AccessToken, CredentialError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedSource {
        fn new(results: Vec<Result<AccessToken, CredentialError>>) -> Arc<Self> {
            Arc::new(Self {
                results: Mutex::new(results.into()),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl CredentialSource for ScriptedSource {
        fn validate(&self) -> Result<(), CredentialError> {
            Ok(())
        }

        async fn fetch_token(&self) -> Result<AccessToken, CredentialError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.results
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(CredentialError::InvalidConfig("exhausted".into())))
        }
    }

    fn failure() -> Result<AccessToken, CredentialError> {
        Err(CredentialError::Status {
            status: 503,
            body: "unavailable".into(),
        })
    }

    #[test]
    fn test_value_before_start_keeps_bearer_type() {
        let source = ScriptedSource::new(vec![]);
        let token = AutoRefreshToken::new(source, INTERVAL).unwrap();

        assert_eq!(token.authorization_value(), "Bearer ");
        assert_eq!(token.token().token_type, "Bearer");
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_replaces_token() {
        let source = ScriptedSource::new(vec![
            Ok(AccessToken::bearer("A")),
            Ok(AccessToken::bearer("B")),
        ]);
        let token = AutoRefreshToken::new(source.clone(), INTERVAL).unwrap();
        let (_shutdown_tx, shutdown_rx) = watch::channel(());

        token.start(shutdown_rx).await.unwrap();
        assert_eq!(token.authorization_value(), "Bearer A");

        sleep(INTERVAL + Duration::from_secs(1)).await;
        assert_eq!(token.authorization_value(), "Bearer B");
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refresh_keeps_previous_token() {
        let source = ScriptedSource::new(vec![Ok(AccessToken::bearer("A")), failure()]);
        let token = AutoRefreshToken::new(source.clone(), INTERVAL).unwrap();
        let (_shutdown_tx, shutdown_rx) = watch::channel(());

        token.start(shutdown_rx).await.unwrap();
        sleep(INTERVAL + Duration::from_secs(1)).await;

        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
        assert_eq!(token.authorization_value(), "Bearer A");
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_failure_spawns_nothing() {
        let source = ScriptedSource::new(vec![failure()]);
        let token = AutoRefreshToken::new(source.clone(), INTERVAL).unwrap();
        let (_shutdown_tx, shutdown_rx) = watch::channel(());

        assert!(token.start(shutdown_rx).await.is_err());

        sleep(INTERVAL * 3).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_loop() {
        let source = ScriptedSource::new(vec![
            Ok(AccessToken::bearer("A")),
            Ok(AccessToken::bearer("B")),
        ]);
        let token = AutoRefreshToken::new(source.clone(), INTERVAL).unwrap();
        let (shutdown_tx, shutdown_rx) = watch::channel(());

        let handle = token.start(shutdown_rx).await.unwrap();
        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();

        sleep(INTERVAL * 2).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(token.authorization_value(), "Bearer A");
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_sender_stops_loop() {
        let source = ScriptedSource::new(vec![Ok(AccessToken::bearer("A"))]);
        let token = AutoRefreshToken::new(source.clone(), INTERVAL).unwrap();
        let (shutdown_tx, shutdown_rx) = watch::channel(());

        let handle = token.start(shutdown_rx).await.unwrap();
        drop(shutdown_tx);
        handle.await.unwrap();
    }

    #[test]
    fn test_new_rejects_invalid_source() {
        let source = Arc::new(crate::credentials::StaticCredential::new(""));
        assert!(AutoRefreshToken::new(source, INTERVAL).is_err());
    }
}
