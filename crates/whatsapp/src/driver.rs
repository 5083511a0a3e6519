use std::path::{Path, PathBuf};

use {
    async_trait::async_trait,
    switchboard_channels::{
        AutomationDriver, ClientHandle, ConnectionKind, Error, LaunchRequest, Result,
    },
    tokio::sync::OnceCell,
    tracing::debug,
};

use crate::{client, config::WhatsAppDriverConfig, janitor, process};

/// [`AutomationDriver`] backed by one Baileys sidecar process per session.
pub struct WhatsAppDriver {
    config: WhatsAppDriverConfig,
    sidecar_dir: OnceCell<PathBuf>,
}

impl WhatsAppDriver {
    pub fn new(config: WhatsAppDriverConfig) -> Self {
        Self {
            config,
            sidecar_dir: OnceCell::new(),
        }
    }

    /// Locate the sidecar once, building it first when configured to.
    async fn sidecar_dir(&self) -> Result<&Path> {
        let dir = self
            .sidecar_dir
            .get_or_try_init(|| async {
                let dir = process::find_sidecar_dir(self.config.sidecar_dir.as_deref())?;
                if self.config.auto_build {
                    process::ensure_built(&dir).await?;
                } else if !process::is_sidecar_built(&dir) {
                    return Err(Error::unavailable(format!(
                        "WhatsApp sidecar at {} is not built. \
                         Run `npm install && npm run build` there first.",
                        dir.display()
                    )));
                }
                Ok::<_, Error>(dir)
            })
            .await?;
        Ok(dir.as_path())
    }
}

#[async_trait]
impl AutomationDriver for WhatsAppDriver {
    fn kind(&self) -> ConnectionKind {
        ConnectionKind::NativeAutomation
    }

    async fn launch(&self, request: LaunchRequest) -> Result<ClientHandle> {
        let sidecar_dir = self.sidecar_dir().await?;
        let sidecar = process::spawn_sidecar(
            &self.config,
            sidecar_dir,
            &request.session,
            &request.work_dir,
            request.token.as_ref(),
        )
        .await?;
        Ok(client::attach(&request.session, sidecar, request.events))
    }

    async fn release_locks(&self, session: &str, work_dir: &Path) -> Result<()> {
        let work_dir = work_dir.to_path_buf();
        let removed = tokio::task::spawn_blocking(move || janitor::release_locks(&work_dir))
            .await
            .map_err(|e| Error::external("lock cleanup task failed", e))??;
        if removed > 0 {
            debug!(session, removed, "released stale session locks");
        }
        Ok(())
    }

    async fn kill_orphans(&self, _session: &str, work_dir: &Path) -> Result<usize> {
        let work_dir = work_dir.to_path_buf();
        tokio::task::spawn_blocking(move || janitor::kill_orphans(&work_dir))
            .await
            .map_err(|e| Error::external("orphan cleanup task failed", e))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, std::time::Duration, tokio::sync::mpsc};

    fn driver_for(dir: &Path, script: &str) -> WhatsAppDriver {
        WhatsAppDriver::new(WhatsAppDriverConfig {
            sidecar_dir: Some(dir.to_path_buf()),
            program: "sh".into(),
            args: vec!["-c".into(), script.into(), "sidecar".into()],
            startup_timeout: Duration::from_millis(200),
            auto_build: false,
        })
    }

    #[tokio::test]
    async fn unbuilt_sidecar_is_unavailable_without_auto_build() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("package.json"), "{}").unwrap();
        let work = tempfile::tempdir().unwrap();
        let driver = driver_for(dir.path(), "sleep 5");
        let (tx, _rx) = mpsc::channel(4);

        let err = driver
            .launch(LaunchRequest {
                session: "s1".into(),
                work_dir: work.path().to_path_buf(),
                token: None,
                events: tx,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unavailable { .. }));
    }

    #[tokio::test]
    async fn release_locks_runs_against_work_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("SingletonLock"), "").unwrap();
        let driver = WhatsAppDriver::new(WhatsAppDriverConfig::default());

        driver.release_locks("s1", dir.path()).await.unwrap();
        assert!(!dir.path().join("SingletonLock").exists());
        assert_eq!(driver.kind(), ConnectionKind::NativeAutomation);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn launches_and_closes_a_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("package.json"), "{}").unwrap();
        std::fs::create_dir_all(dir.path().join("dist")).unwrap();
        std::fs::write(dir.path().join("dist/index.js"), "").unwrap();
        let work = tempfile::tempdir().unwrap();
        let driver = driver_for(
            dir.path(),
            r#"echo '{"type":"qr","qr":"2@x"}'; read -r _line; exit 0"#,
        );
        let (tx, mut rx) = mpsc::channel(4);

        let handle = driver
            .launch(LaunchRequest {
                session: "s1".into(),
                work_dir: work.path().to_path_buf(),
                token: None,
                events: tx,
            })
            .await
            .unwrap();
        assert!(handle.pid().is_some());
        assert!(matches!(
            rx.recv().await.unwrap(),
            switchboard_channels::ClientEvent::LoginChallenge { .. }
        ));
        handle.close().await.unwrap();
    }
}
