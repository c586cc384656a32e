//! Renderer process lifecycle.
//!
//! A [`RendererHandle`] owns the spawned child. `terminate` is idempotent and
//! dropping an unterminated handle kills the child, so teardown holds on
//! every exit path including cancellation.

use std::{
    ffi::OsStr,
    io::ErrorKind,
    path::{Path, PathBuf},
    process::{ExitStatus, Stdio},
    time::{Duration, Instant},
};

use tokio::{
    process::{Child, Command},
    time,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::{RenderError, Stage};

/// A running headless renderer bound to a control port.
#[derive(Debug)]
pub struct RendererHandle {
    pid: Option<u32>,
    host: String,
    port: u16,
    binary: PathBuf,
    child: Option<Child>,
}

impl RendererHandle {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    pub fn is_running(&self) -> bool {
        self.child.is_some()
    }

    /// Ask the renderer to stop, escalating to a kill after `grace`.
    ///
    /// Calling this more than once, or on a handle whose child already
    /// exited, does nothing.
    pub async fn terminate(&mut self, grace: Duration) {
        let Some(mut child) = self.child.take() else {
            return;
        };

        if let Ok(Some(status)) = child.try_wait() {
            debug!(
                target = "pressroom::infra::process",
                pid = ?self.pid,
                status = %status,
                "Renderer already exited"
            );
            return;
        }

        send_graceful_stop(&mut child);
        match time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => {
                info!(
                    target = "pressroom::infra::process",
                    pid = ?self.pid,
                    port = self.port,
                    status = %status,
                    "Renderer stopped"
                );
            }
            Ok(Err(err)) => {
                warn!(
                    target = "pressroom::infra::process",
                    pid = ?self.pid,
                    error = %err,
                    "Failed to reap renderer"
                );
            }
            Err(_) => {
                warn!(
                    target = "pressroom::infra::process",
                    pid = ?self.pid,
                    grace_ms = grace.as_millis() as u64,
                    "Renderer ignored stop signal; killing"
                );
                if let Err(err) = child.kill().await {
                    warn!(
                        target = "pressroom::infra::process",
                        pid = ?self.pid,
                        error = %err,
                        "Failed to kill renderer"
                    );
                }
            }
        }
    }
}

impl Drop for RendererHandle {
    fn drop(&mut self) {
        if let Some(child) = self.child.as_mut() {
            warn!(
                target = "pressroom::infra::process",
                pid = ?self.pid,
                "Renderer handle dropped while running; killing"
            );
            let _ = child.start_kill();
        }
    }
}

#[cfg(unix)]
fn send_graceful_stop(child: &mut Child) {
    match child.id().and_then(|pid| libc::pid_t::try_from(pid).ok()) {
        // SAFETY: kill(2) has no memory-safety preconditions; the pid belongs
        // to a child we have not reaped yet.
        Some(pid) => unsafe {
            libc::kill(pid, libc::SIGTERM);
        },
        None => {
            let _ = child.start_kill();
        }
    }
}

#[cfg(not(unix))]
fn send_graceful_stop(child: &mut Child) {
    let _ = child.start_kill();
}

/// Start `binary` headless with remote debugging on `port`, then wait
/// `settle` for it to open its socket.
pub async fn launch(
    binary: &Path,
    host: &str,
    port: u16,
    settle: Duration,
    cancel: &CancellationToken,
) -> Result<RendererHandle, RenderError> {
    let args = headless_args(port);
    debug!(
        target = "pressroom::infra::process",
        binary = %binary.display(),
        args = ?args,
        "Launching renderer"
    );

    let child = Command::new(binary)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|err| spawn_error(binary, Stage::Launch, err))?;

    let pid = child.id();
    info!(
        target = "pressroom::infra::process",
        pid = ?pid,
        port,
        binary = %binary.display(),
        "Renderer running"
    );

    let handle = RendererHandle {
        pid,
        host: host.to_string(),
        port,
        binary: binary.to_path_buf(),
        child: Some(child),
    };

    tokio::select! {
        _ = time::sleep(settle) => Ok(handle),
        _ = cancel.cancelled() => Err(RenderError::Cancelled { stage: Stage::Launch }),
    }
}

/// Command-line arguments for a headless Chrome-family launch.
pub fn headless_args(port: u16) -> Vec<String> {
    vec![
        "--headless".to_string(),
        "--disable-gpu".to_string(),
        format!("--remote-debugging-port={port}"),
        "about:blank".to_string(),
    ]
}

/// Output of a process run to completion.
#[derive(Debug)]
pub struct CompletedRun {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: String,
    pub elapsed: Duration,
}

/// Run `binary` with `args`, killing it if `deadline` passes or `cancel` fires.
pub async fn run_to_completion<I, S>(
    binary: &Path,
    args: I,
    deadline: Duration,
    stage: Stage,
    cancel: &CancellationToken,
) -> Result<CompletedRun, RenderError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let started_at = Instant::now();
    let child = Command::new(binary)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|err| spawn_error(binary, stage, err))?;

    let output = tokio::select! {
        output = child.wait_with_output() => output.map_err(RenderError::io(stage))?,
        _ = time::sleep(deadline) => return Err(RenderError::Timeout { stage }),
        _ = cancel.cancelled() => return Err(RenderError::Cancelled { stage }),
    };

    Ok(CompletedRun {
        status: output.status,
        stdout: output.stdout,
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        elapsed: started_at.elapsed(),
    })
}

fn spawn_error(binary: &Path, stage: Stage, err: std::io::Error) -> RenderError {
    warn!(
        target = "pressroom::infra::process",
        binary = %binary.display(),
        error_code = "spawn",
        error = %err,
        "Failed to spawn renderer"
    );
    match err.kind() {
        ErrorKind::NotFound => RenderError::BinaryNotFound {
            searched: binary.display().to_string(),
        },
        ErrorKind::PermissionDenied => RenderError::BinaryNotExecutable {
            path: binary.to_path_buf(),
        },
        _ => RenderError::process(stage, err.to_string()),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::{fs, os::unix::fs::PermissionsExt};

    use tempfile::TempDir;

    use super::*;

    fn script(dir: &TempDir, name: &str, body: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, body).expect("write script");
        let mut perms = fs::metadata(&path).expect("metadata").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).expect("set perms");
        path
    }

    fn process_alive(pid: u32) -> bool {
        // SAFETY: signal 0 only checks for existence.
        unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
    }

    #[tokio::test]
    async fn launch_passes_headless_flags() {
        let dir = TempDir::new().expect("temp dir");
        let args_path = dir.path().join("args.log");
        let binary = script(
            &dir,
            "fake-chrome",
            &format!(
                "#!/bin/sh\necho \"$@\" > \"{}\"\nexec sleep 30\n",
                args_path.display()
            ),
        );

        let cancel = CancellationToken::new();
        let mut handle = launch(&binary, "127.0.0.1", 9333, Duration::from_millis(200), &cancel)
            .await
            .expect("launch");
        assert!(handle.is_running());
        assert_eq!(handle.port(), 9333);

        let args = fs::read_to_string(&args_path).expect("args");
        assert_eq!(
            args.trim(),
            "--headless --disable-gpu --remote-debugging-port=9333 about:blank"
        );

        handle.terminate(Duration::from_secs(2)).await;
        assert!(!handle.is_running());
    }

    #[tokio::test]
    async fn terminate_is_idempotent_and_stops_the_process() {
        let dir = TempDir::new().expect("temp dir");
        let binary = script(&dir, "fake-chrome", "#!/bin/sh\nexec sleep 30\n");

        let cancel = CancellationToken::new();
        let mut handle = launch(&binary, "127.0.0.1", 9334, Duration::ZERO, &cancel)
            .await
            .expect("launch");
        let pid = handle.pid().expect("pid");
        assert!(process_alive(pid));

        handle.terminate(Duration::from_secs(2)).await;
        handle.terminate(Duration::from_secs(2)).await;
        assert!(!process_alive(pid));
    }

    #[tokio::test]
    async fn stubborn_process_is_killed_after_grace() {
        let dir = TempDir::new().expect("temp dir");
        let binary = script(
            &dir,
            "stubborn",
            "#!/bin/sh\ntrap '' TERM\nwhile true; do sleep 1; done\n",
        );

        let cancel = CancellationToken::new();
        let mut handle = launch(&binary, "127.0.0.1", 9335, Duration::from_millis(100), &cancel)
            .await
            .expect("launch");
        let started = Instant::now();
        handle.terminate(Duration::from_millis(300)).await;
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!handle.is_running());
    }

    #[tokio::test]
    async fn missing_binary_maps_to_not_found() {
        let cancel = CancellationToken::new();
        let err = launch(
            Path::new("/nonexistent/pressroom-chrome"),
            "127.0.0.1",
            9336,
            Duration::ZERO,
            &cancel,
        )
        .await
        .expect_err("missing binary");
        assert!(matches!(err, RenderError::BinaryNotFound { .. }));
    }

    #[tokio::test]
    async fn run_to_completion_enforces_deadline() {
        let dir = TempDir::new().expect("temp dir");
        let binary = script(&dir, "slow", "#!/bin/sh\nexec sleep 30\n");
        let cancel = CancellationToken::new();
        let err = run_to_completion(
            &binary,
            Vec::<String>::new(),
            Duration::from_millis(200),
            Stage::LegacyRun,
            &cancel,
        )
        .await
        .expect_err("deadline");
        assert!(matches!(
            err,
            RenderError::Timeout {
                stage: Stage::LegacyRun
            }
        ));
    }

    #[tokio::test]
    async fn run_to_completion_captures_output() {
        let dir = TempDir::new().expect("temp dir");
        let binary = script(&dir, "echoer", "#!/bin/sh\necho out\necho err >&2\nexit 3\n");
        let cancel = CancellationToken::new();
        let run = run_to_completion(
            &binary,
            ["--flag"],
            Duration::from_secs(5),
            Stage::LegacyRun,
            &cancel,
        )
        .await
        .expect("run");
        assert_eq!(run.status.code(), Some(3));
        assert_eq!(run.stdout, b"out\n");
        assert_eq!(run.stderr.trim(), "err");
    }
}
