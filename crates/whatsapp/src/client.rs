//! Stdio client for one running sidecar.
//!
//! Three tasks hang off a client: the stdout reader (protocol lines), the
//! monitor (owns the child and reports its exit) and the stderr forwarder
//! started by [`crate::process`]. Requests that expect a reply carry a
//! `request_id` and wait on a oneshot until the reader routes the reply back.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use {
    futures::future::BoxFuture,
    secrecy::SecretString,
    switchboard_channels::{
        ClientCapabilities, ClientEvent, ClientHandle, Error, Result,
    },
    tokio::{
        io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
        process::{Child, ChildStdin, ChildStdout},
        sync::{Notify, mpsc, oneshot, watch},
        task::JoinHandle,
    },
    tracing::{debug, info, warn},
};

use crate::{
    process::{self, SidecarProcess, StderrTail},
    protocol::{SidecarCommand, SidecarMessage},
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
const READER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug)]
enum Reply {
    Token(Option<String>),
    Sent { ok: bool, error: Option<String> },
}

struct Inner {
    session: String,
    stdin: tokio::sync::Mutex<ChildStdin>,
    pending: Mutex<HashMap<String, oneshot::Sender<Reply>>>,
    shutdown_requested: AtomicBool,
    stop: Notify,
    exited: watch::Receiver<bool>,
}

impl Inner {
    async fn write(&self, command: &SidecarCommand) -> Result<()> {
        let line = command.to_line()?;
        let mut stdin = self.stdin.lock().await;
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| Error::unavailable(format!("sidecar stdin closed: {e}")))?;
        stdin.flush().await?;
        Ok(())
    }

    async fn request(&self, build: impl FnOnce(String) -> SidecarCommand) -> Result<Reply> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.lock_pending().insert(request_id.clone(), tx);

        if let Err(e) = self.write(&build(request_id.clone())).await {
            self.lock_pending().remove(&request_id);
            return Err(e);
        }

        match tokio::time::timeout(REQUEST_TIMEOUT, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(Error::unavailable("sidecar exited before replying")),
            Err(_) => {
                self.lock_pending().remove(&request_id);
                Err(Error::unavailable(format!(
                    "sidecar did not reply within {}s",
                    REQUEST_TIMEOUT.as_secs()
                )))
            },
        }
    }

    fn resolve(&self, request_id: &str, reply: Reply) {
        match self.lock_pending().remove(request_id) {
            Some(tx) => {
                let _ = tx.send(reply);
            },
            None => debug!(session = %self.session, request_id, "reply for unknown request"),
        }
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, HashMap<String, oneshot::Sender<Reply>>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn send_text(&self, to: String, text: String) -> Result<()> {
        match self
            .request(|request_id| SidecarCommand::Send {
                request_id,
                to,
                text,
            })
            .await?
        {
            Reply::Sent { ok: true, .. } => Ok(()),
            Reply::Sent { error, .. } => Err(Error::unavailable(
                error.unwrap_or_else(|| "sidecar rejected the message".into()),
            )),
            Reply::Token(_) => Err(Error::invalid_input("unexpected reply to send")),
        }
    }

    async fn export_token(&self) -> Result<Option<SecretString>> {
        match self
            .request(|request_id| SidecarCommand::ExportToken { request_id })
            .await?
        {
            Reply::Token(token) => Ok(token.filter(|t| !t.is_empty()).map(SecretString::new)),
            Reply::Sent { .. } => Err(Error::invalid_input("unexpected reply to export_token")),
        }
    }

    /// Ask the sidecar to exit, escalating to a signal after a grace period.
    async fn close(&self) -> Result<()> {
        self.shutdown_requested.store(true, Ordering::SeqCst);
        let mut exited = self.exited.clone();
        if *exited.borrow() {
            return Ok(());
        }
        if let Err(e) = self.write(&SidecarCommand::Shutdown).await {
            debug!(session = %self.session, error = %e, "shutdown command not delivered");
        }
        if tokio::time::timeout(SHUTDOWN_GRACE, exited.wait_for(|done| *done))
            .await
            .is_err()
        {
            debug!(session = %self.session, "sidecar ignored shutdown, signalling");
            self.stop.notify_one();
            let _ = exited.wait_for(|done| *done).await;
        }
        Ok(())
    }
}

/// Wire a started sidecar into a [`ClientHandle`].
pub fn attach(
    session: &str,
    sidecar: SidecarProcess,
    events: mpsc::Sender<ClientEvent>,
) -> ClientHandle {
    let SidecarProcess {
        child,
        stdin,
        stdout,
        stderr_tail,
        stderr_task,
    } = sidecar;
    let pid = child.id();
    let (exited_tx, exited_rx) = watch::channel(false);

    let inner = Arc::new(Inner {
        session: session.to_string(),
        stdin: tokio::sync::Mutex::new(stdin),
        pending: Mutex::new(HashMap::new()),
        shutdown_requested: AtomicBool::new(false),
        stop: Notify::new(),
        exited: exited_rx,
    });

    let reader = tokio::spawn(read_stdout(Arc::clone(&inner), stdout, events.clone()));
    tokio::spawn(monitor(
        Arc::clone(&inner),
        child,
        [reader, stderr_task],
        stderr_tail,
        events,
        exited_tx,
    ));

    build_handle(inner).with_pid(pid)
}

fn build_handle(inner: Arc<Inner>) -> ClientHandle {
    let send = {
        let inner = Arc::clone(&inner);
        Arc::new(move |to: String, text: String| -> BoxFuture<'static, Result<()>> {
            let inner = Arc::clone(&inner);
            Box::pin(async move { inner.send_text(to, text).await })
        })
    };
    let close = {
        let inner = Arc::clone(&inner);
        Arc::new(move || -> BoxFuture<'static, Result<()>> {
            let inner = Arc::clone(&inner);
            Box::pin(async move { inner.close().await })
        })
    };
    let export_token = {
        let inner = Arc::clone(&inner);
        Arc::new(move || -> BoxFuture<'static, Result<Option<SecretString>>> {
            let inner = Arc::clone(&inner);
            Box::pin(async move { inner.export_token().await })
        })
    };
    let logout = {
        let inner = Arc::clone(&inner);
        Arc::new(move || -> BoxFuture<'static, Result<()>> {
            let inner = Arc::clone(&inner);
            Box::pin(async move { inner.write(&SidecarCommand::Logout).await })
        })
    };
    let mark_read = {
        let inner = Arc::clone(&inner);
        Arc::new(
            move |to: String, message_id: String| -> BoxFuture<'static, Result<()>> {
                let inner = Arc::clone(&inner);
                Box::pin(async move {
                    inner
                        .write(&SidecarCommand::MarkRead { to, message_id })
                        .await
                })
            },
        )
    };

    ClientHandle::new(send, close).with_capabilities(ClientCapabilities {
        export_token: Some(export_token),
        logout: Some(logout),
        mark_read: Some(mark_read),
    })
}

async fn read_stdout(inner: Arc<Inner>, stdout: ChildStdout, events: mpsc::Sender<ClientEvent>) {
    let session = inner.session.clone();
    let mut lines = BufReader::new(stdout).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(session = %session, error = %e, "failed to read sidecar stdout");
                break;
            },
        };
        if line.trim().is_empty() {
            continue;
        }
        let message = match serde_json::from_str::<SidecarMessage>(&line) {
            Ok(message) => message,
            Err(e) => {
                debug!(session = %session, error = %e, "ignoring non-protocol sidecar output");
                continue;
            },
        };
        match message {
            SidecarMessage::Token { request_id, token } => {
                inner.resolve(&request_id, Reply::Token(token));
            },
            SidecarMessage::SendResult {
                request_id,
                ok,
                error,
            } => inner.resolve(&request_id, Reply::Sent { ok, error }),
            other => {
                if let Some(event) = other.into_client_event()
                    && events.send(event).await.is_err()
                {
                    // Nobody listens any more; keep draining so the sidecar
                    // never blocks on a full pipe.
                    debug!(session = %session, "client event receiver dropped");
                }
            },
        }
    }
    // Pending requests fail once their senders are dropped.
    inner.lock_pending().clear();
    debug!(session = %session, "sidecar stdout closed");
}

async fn monitor(
    inner: Arc<Inner>,
    mut child: Child,
    readers: [JoinHandle<()>; 2],
    stderr_tail: StderrTail,
    events: mpsc::Sender<ClientEvent>,
    exited: watch::Sender<bool>,
) {
    let session = inner.session.clone();
    let status = tokio::select! {
        status = child.wait() => status.ok(),
        () = inner.stop.notified() => {
            process::stop_child(&mut child).await;
            child.try_wait().ok().flatten()
        },
    };

    // Deliver whatever the sidecar printed before it went away.
    let _ = tokio::time::timeout(READER_DRAIN_TIMEOUT, futures::future::join_all(readers)).await;

    let crashed = !inner.shutdown_requested.load(Ordering::SeqCst);
    let code = status.and_then(|s| s.code());
    let reason = if crashed {
        let tail = stderr_tail.joined();
        warn!(session = %session, ?code, "sidecar exited unexpectedly");
        Some(match tail.lines().last() {
            Some(last) => format!("sidecar exited unexpectedly: {last}"),
            None => "sidecar exited unexpectedly".to_string(),
        })
    } else {
        info!(session = %session, ?code, "sidecar stopped");
        None
    };

    let _ = events
        .send(ClientEvent::Exited {
            code,
            reason,
            crashed,
        })
        .await;
    let _ = exited.send(true);
}
