//! Per-client background work: the event pump and credential persistence.

use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use {
    switchboard_channels::{ClientEvent, ClientHandle, CredentialStore},
    tokio::sync::mpsc,
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use switchboard_metrics::{counter, sessions as session_metrics};

use crate::registry::SessionRegistry;

const CLOSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Feed one client's events into the registry until the client goes away or
/// the registry stops caring about this generation.
pub(crate) async fn pump_events(
    registry: Weak<SessionRegistry>,
    session: String,
    generation: u64,
    mut events: mpsc::Receiver<ClientEvent>,
) {
    loop {
        let Some(event) = events.recv().await else {
            if let Some(registry) = registry.upgrade() {
                registry.client_stream_closed(&session, generation).await;
            }
            break;
        };
        let Some(registry) = registry.upgrade() else {
            break;
        };
        if !registry.handle_client_event(&session, generation, event).await {
            break;
        }
    }
    debug!(session = %session, generation, "client event pump stopped");
}

/// Export the client's token and store it, retrying while the client has not
/// produced one yet. Returns whether a token was stored.
pub(crate) async fn persist_credentials(
    credentials: Arc<dyn CredentialStore>,
    session: &str,
    handle: &ClientHandle,
    attempts: u32,
    delay: Duration,
    still_current: impl Fn() -> bool,
) -> bool {
    let Some(export) = handle.capabilities().export_token.clone() else {
        debug!(session, "client cannot export credentials, nothing to persist");
        return false;
    };

    let attempts = attempts.max(1);
    for attempt in 1..=attempts {
        if attempt > 1 {
            tokio::time::sleep(delay).await;
        }
        if !still_current() {
            debug!(session, "session changed, abandoning credential persistence");
            return false;
        }
        match export().await {
            Ok(Some(token)) => match credentials.set(session, token).await {
                Ok(()) => {
                    info!(session, attempt, "session credentials stored");
                    return true;
                },
                Err(e) => warn!(session, attempt, error = %e, "failed to store credentials"),
            },
            Ok(None) => debug!(session, attempt, "credentials not yet available"),
            Err(e) => warn!(session, attempt, error = %e, "failed to export credentials"),
        }
        #[cfg(feature = "metrics")]
        counter!(session_metrics::CREDENTIAL_SAVE_FAILURES_TOTAL).increment(1);
    }

    warn!(session, attempts, "giving up on credential persistence");
    false
}

/// Graceful close that never fails the caller.
pub(crate) async fn close_quietly(session: &str, handle: &ClientHandle) {
    match tokio::time::timeout(CLOSE_TIMEOUT, handle.close()).await {
        Ok(Ok(())) => debug!(session, "client closed"),
        Ok(Err(e)) => warn!(session, error = %e, "client close failed, continuing teardown"),
        Err(_) => warn!(session, "client close timed out, continuing teardown"),
    }
}

/// Revoke the login on the network side when the client supports it. Never
/// fails the caller.
pub(crate) async fn logout_quietly(session: &str, handle: &ClientHandle) {
    let Some(logout) = handle.capabilities().logout.clone() else {
        return;
    };
    match tokio::time::timeout(CLOSE_TIMEOUT, logout()).await {
        Ok(Ok(())) => info!(session, "client logged out"),
        Ok(Err(e)) => warn!(session, error = %e, "client logout failed"),
        Err(_) => warn!(session, "client logout timed out"),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::store_memory::InMemoryCredentialStore,
        futures::future::BoxFuture,
        secrecy::{ExposeSecret, SecretString},
        std::sync::atomic::{AtomicUsize, Ordering},
        switchboard_channels::ClientCapabilities,
    };

    fn handle_with_export(ready_after: usize, calls: Arc<AtomicUsize>) -> ClientHandle {
        let export = Arc::new(
            move || -> BoxFuture<'static, switchboard_channels::Result<Option<SecretString>>> {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                Box::pin(async move {
                    Ok((n >= ready_after).then(|| SecretString::new("creds".into())))
                })
            },
        );
        ClientHandle::new(
            Arc::new(|_, _| -> BoxFuture<'static, switchboard_channels::Result<()>> {
                Box::pin(async { Ok(()) })
            }),
            Arc::new(|| -> BoxFuture<'static, switchboard_channels::Result<()>> {
                Box::pin(async { Ok(()) })
            }),
        )
        .with_capabilities(ClientCapabilities {
            export_token: Some(export),
            ..Default::default()
        })
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_token_is_available() {
        let store = Arc::new(InMemoryCredentialStore::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let handle = handle_with_export(2, Arc::clone(&calls));

        let saved = persist_credentials(
            store.clone(),
            "s1",
            &handle,
            3,
            Duration::from_secs(2),
            || true,
        )
        .await;

        assert!(saved);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let token = store.get("s1").await.unwrap().unwrap();
        assert_eq!(token.expose_secret(), "creds");
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_bounded_attempts() {
        let store = Arc::new(InMemoryCredentialStore::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let handle = handle_with_export(10, Arc::clone(&calls));

        let saved =
            persist_credentials(store.clone(), "s1", &handle, 3, Duration::from_secs(2), || {
                true
            })
            .await;

        assert!(!saved);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(store.get("s1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stops_when_session_is_superseded() {
        let store = Arc::new(InMemoryCredentialStore::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let handle = handle_with_export(0, Arc::clone(&calls));

        let saved =
            persist_credentials(store, "s1", &handle, 3, Duration::from_millis(1), || false).await;

        assert!(!saved);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
