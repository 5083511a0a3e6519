//! Sidecar process management: locating, building, spawning and stopping the
//! per-session Baileys sidecar.

use std::{
    collections::VecDeque,
    path::{Path, PathBuf},
    process::Stdio,
    sync::{Arc, Mutex},
    time::Duration,
};

use {
    secrecy::{ExposeSecret, SecretString},
    switchboard_channels::{Error, Result},
    tokio::{
        io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
        process::{Child, ChildStderr, ChildStdin, ChildStdout, Command},
        task::JoinHandle,
    },
    tracing::{debug, error, info, warn},
};

use crate::{config::WhatsAppDriverConfig, janitor, protocol::SidecarCommand};

const SIDECAR_DIR_ENV: &str = "SWITCHBOARD_WHATSAPP_SIDECAR_DIR";
const SIDECAR_REL_PATH: &str = "sidecar/whatsapp-baileys";
const STDERR_TAIL_LINES: usize = 40;
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Last lines a sidecar wrote to stderr, kept for startup diagnostics.
#[derive(Debug, Clone, Default)]
pub struct StderrTail(Arc<Mutex<VecDeque<String>>>);

impl StderrTail {
    fn push(&self, line: String) {
        let mut lines = self.0.lock().unwrap_or_else(|e| e.into_inner());
        if lines.len() == STDERR_TAIL_LINES {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    pub fn joined(&self) -> String {
        let lines = self.0.lock().unwrap_or_else(|e| e.into_inner());
        lines.iter().map(String::as_str).collect::<Vec<_>>().join("\n")
    }
}

/// A sidecar that survived its startup window.
pub struct SidecarProcess {
    pub child: Child,
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
    pub stderr_tail: StderrTail,
    /// Finishes when stderr reaches EOF.
    pub stderr_task: JoinHandle<()>,
}

/// Find the sidecar directory.
///
/// Searches in order:
/// 1. Explicit path if provided
/// 2. `SWITCHBOARD_WHATSAPP_SIDECAR_DIR` environment variable
/// 3. Relative to the executable: `../sidecar/whatsapp-baileys`
/// 4. Common development paths
pub fn find_sidecar_dir(explicit_path: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit_path {
        if path.join("package.json").exists() {
            return Ok(path.to_path_buf());
        }
        return Err(Error::unavailable(format!(
            "sidecar directory does not exist or missing package.json: {}",
            path.display()
        )));
    }

    if let Ok(dir) = std::env::var(SIDECAR_DIR_ENV) {
        let path = PathBuf::from(&dir);
        if path.join("package.json").exists() {
            return Ok(path);
        }
        warn!(path = %dir, "{SIDECAR_DIR_ENV} set but package.json not found");
    }

    if let Ok(exe_path) = std::env::current_exe()
        && let Some(exe_dir) = exe_path.parent()
    {
        for prefix in ["..", "../.."] {
            let candidate = exe_dir.join(prefix).join(SIDECAR_REL_PATH);
            if candidate.join("package.json").exists() {
                return Ok(candidate);
            }
        }
    }

    for prefix in [".", "..", "../.."] {
        let path = PathBuf::from(prefix).join(SIDECAR_REL_PATH);
        if path.join("package.json").exists() {
            return Ok(path.canonicalize().unwrap_or(path));
        }
    }

    Err(Error::unavailable(format!(
        "WhatsApp sidecar not found. Set {SIDECAR_DIR_ENV} or ensure \
         {SIDECAR_REL_PATH} exists with package.json"
    )))
}

/// Check if the sidecar has been built (dist/index.js exists).
pub fn is_sidecar_built(sidecar_dir: &Path) -> bool {
    sidecar_dir.join("dist/index.js").exists()
}

pub fn has_node_modules(sidecar_dir: &Path) -> bool {
    sidecar_dir.join("node_modules").exists()
}

/// Install and build the sidecar when `dist/` is missing.
pub async fn ensure_built(sidecar_dir: &Path) -> Result<()> {
    if is_sidecar_built(sidecar_dir) {
        return Ok(());
    }
    info!(path = %sidecar_dir.display(), "building WhatsApp sidecar");
    if !has_node_modules(sidecar_dir) {
        run_npm(sidecar_dir, &["install"]).await?;
    }
    run_npm(sidecar_dir, &["run", "build"]).await
}

async fn run_npm(sidecar_dir: &Path, args: &[&str]) -> Result<()> {
    let what = format!("npm {}", args.join(" "));
    info!(path = %sidecar_dir.display(), "running {what} for sidecar");

    let output = Command::new("npm")
        .args(args)
        .current_dir(sidecar_dir)
        .output()
        .await
        .map_err(|e| Error::external(format!("failed to run {what}"), e))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::unavailable(format!("{what} failed: {stderr}")));
    }
    Ok(())
}

/// Spawn a sidecar bound to `work_dir` and wait out the startup window.
///
/// A stored token is written to stdin before anything else, so the sidecar
/// can restore its auth state before it first dials out.
///
/// A process that exits inside the window fails the launch. When its stderr
/// mentions a held lock or a running instance the failure is
/// [`Error::ResourceBusy`], so the caller can clean up and retry.
pub async fn spawn_sidecar(
    config: &WhatsAppDriverConfig,
    sidecar_dir: &Path,
    session: &str,
    work_dir: &Path,
    token: Option<&SecretString>,
) -> Result<SidecarProcess> {
    info!(
        session,
        path = %sidecar_dir.display(),
        work_dir = %work_dir.display(),
        "starting WhatsApp sidecar process"
    );

    let mut child = Command::new(&config.program)
        .args(&config.args)
        .arg("--session-dir")
        .arg(work_dir)
        .current_dir(sidecar_dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| Error::external("failed to spawn sidecar process", e))?;

    let stderr_tail = StderrTail::default();
    let (Some(mut stdin), Some(stdout), Some(stderr)) =
        (child.stdin.take(), child.stdout.take(), child.stderr.take())
    else {
        return Err(Error::unavailable("sidecar stdio was not captured"));
    };
    let mut stderr_task = forward_stderr(session.to_string(), stderr, stderr_tail.clone());

    if let Some(token) = token {
        let line = SidecarCommand::Restore {
            token: token.expose_secret().clone(),
        }
        .to_line()?;
        // A sidecar that dies right away surfaces through try_wait below.
        if let Err(e) = stdin.write_all(line.as_bytes()).await {
            debug!(session, error = %e, "failed to hand stored token to sidecar");
        }
    }

    tokio::time::sleep(config.startup_timeout).await;

    match child.try_wait() {
        Ok(None) => {},
        Ok(Some(status)) => {
            // stderr reaches EOF once the process is gone.
            let _ = tokio::time::timeout(Duration::from_secs(1), &mut stderr_task).await;
            let output = stderr_tail.joined();
            let message = format!("sidecar process exited immediately with status: {status}");
            if janitor::looks_busy(&output) {
                return Err(Error::resource_busy(format!("{message}: {output}")));
            }
            return Err(Error::unavailable(if output.is_empty() {
                message
            } else {
                format!("{message}: {output}")
            }));
        },
        Err(e) => return Err(Error::external("failed to check sidecar process status", e)),
    }

    info!(session, pid = ?child.id(), "WhatsApp sidecar process started");
    Ok(SidecarProcess {
        child,
        stdin,
        stdout,
        stderr_tail,
        stderr_task,
    })
}

/// Forward pino JSON logs to tracing and keep a tail for diagnostics.
fn forward_stderr(session: String, stderr: ChildStderr, tail: StderrTail) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line.starts_with('{')
                && let Ok(log) = serde_json::from_str::<serde_json::Value>(&line)
            {
                let level = log.get("level").and_then(|v| v.as_u64()).unwrap_or(30);
                let msg = log
                    .get("msg")
                    .and_then(|v| v.as_str())
                    .unwrap_or(&line)
                    .to_string();
                match level {
                    10 | 20 => debug!(target: "whatsapp_sidecar", session = %session, "{msg}"),
                    30 => info!(target: "whatsapp_sidecar", session = %session, "{msg}"),
                    40 => warn!(target: "whatsapp_sidecar", session = %session, "{msg}"),
                    _ => error!(target: "whatsapp_sidecar", session = %session, "{msg}"),
                }
                tail.push(msg);
                continue;
            }
            warn!(target: "whatsapp_sidecar", session = %session, "{line}");
            tail.push(line);
        }
    })
}

/// SIGTERM, then kill if the process is still around after a grace period.
pub async fn stop_child(child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::{
            sys::signal::{Signal, kill},
            unistd::Pid,
        };

        if let Some(pid) = child.id() {
            let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
        }
    }

    #[cfg(not(unix))]
    {
        let _ = child.start_kill();
    }

    match tokio::time::timeout(STOP_TIMEOUT, child.wait()).await {
        Ok(Ok(status)) => debug!(?status, "sidecar process exited"),
        Ok(Err(e)) => warn!(error = %e, "error waiting for sidecar process"),
        Err(_) => {
            warn!("sidecar process did not exit gracefully, killing");
            let _ = child.kill().await;
        },
    }
}
