//! Cleanup of what a crashed sidecar leaves behind: lock files in the
//! session directory and processes still bound to it.

use std::path::Path;

use {
    sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind},
    tracing::{debug, warn},
    walkdir::WalkDir,
};

/// File names that make a new instance refuse to start.
const LOCK_FILE_NAMES: &[&str] = &["SingletonLock", "SingletonSocket", "SingletonCookie"];

/// Stderr fragments that identify a lock/orphan startup failure.
const BUSY_MARKERS: &[&str] = &[
    "SingletonLock",
    "EBUSY",
    "EADDRINUSE",
    "ELOCKED",
    "already running",
    "lock file",
    "Lock file",
];

fn is_lock_file(name: &str) -> bool {
    LOCK_FILE_NAMES.contains(&name) || name.ends_with(".lock") || name == "LOCK"
}

/// Whether sidecar output points at stale locks or a leftover process.
pub fn looks_busy(output: &str) -> bool {
    BUSY_MARKERS.iter().any(|m| output.contains(m))
}

/// Remove lock files under `work_dir`. Returns how many were removed.
///
/// A missing directory is not an error. Files that vanish between listing and
/// removal are ignored, so concurrent callers are fine.
pub fn release_locks(work_dir: &Path) -> std::io::Result<usize> {
    if !work_dir.exists() {
        return Ok(0);
    }
    let mut removed = 0;
    for entry in WalkDir::new(work_dir)
        .max_depth(4)
        .follow_links(false)
        .into_iter()
        .flatten()
    {
        let name = entry.file_name().to_string_lossy();
        if !is_lock_file(&name) {
            continue;
        }
        // SingletonLock is usually a dangling symlink, so don't stat it.
        match std::fs::remove_file(entry.path()) {
            Ok(()) => {
                debug!(path = %entry.path().display(), "removed stale lock");
                removed += 1;
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
            Err(e) => return Err(e),
        }
    }
    Ok(removed)
}

/// Kill processes whose command line references `work_dir`, except this one.
/// Returns how many were signalled.
pub fn kill_orphans(work_dir: &Path) -> usize {
    let needle = work_dir.to_string_lossy().into_owned();
    if needle.is_empty() {
        return 0;
    }
    let own_pid = sysinfo::get_current_pid().ok();

    let mut sys = System::new();
    sys.refresh_processes_specifics(
        ProcessesToUpdate::All,
        true,
        ProcessRefreshKind::nothing().with_cmd(UpdateKind::Always),
    );

    let mut killed = 0;
    for (pid, process) in sys.processes() {
        if Some(*pid) == own_pid {
            continue;
        }
        let references_dir = process
            .cmd()
            .iter()
            .any(|arg| arg.to_string_lossy().contains(&needle));
        if !references_dir {
            continue;
        }
        if signal(*pid, process) {
            killed += 1;
        } else {
            warn!(pid = pid.as_u32(), "failed to kill orphaned sidecar");
        }
    }
    killed
}

fn signal(pid: Pid, process: &sysinfo::Process) -> bool {
    debug!(pid = pid.as_u32(), "killing orphaned sidecar");
    process.kill_with(sysinfo::Signal::Kill).unwrap_or_else(|| process.kill())
}
