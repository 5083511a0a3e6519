use std::{path::PathBuf, time::Duration};

/// How the driver starts sidecar processes.
#[derive(Debug, Clone)]
pub struct WhatsAppDriverConfig {
    /// Directory containing the sidecar's `package.json`. Resolved with
    /// [`crate::find_sidecar_dir`] when unset.
    pub sidecar_dir: Option<PathBuf>,
    /// Program used to run the sidecar.
    pub program: String,
    /// Arguments placed before `--session-dir <dir>`, relative to the sidecar
    /// directory.
    pub args: Vec<String>,
    /// How long a fresh process must survive to count as started.
    pub startup_timeout: Duration,
    /// Run `npm install` / `npm run build` when `dist/` is missing.
    pub auto_build: bool,
}

impl Default for WhatsAppDriverConfig {
    fn default() -> Self {
        Self {
            sidecar_dir: None,
            program: "node".into(),
            args: vec!["dist/index.js".into()],
            startup_timeout: Duration::from_millis(1_500),
            auto_build: true,
        }
    }
}
