//! Self-restart: pull merged changes and replace the process image.
//!
//! The deployment wrapper must run the engine under a proper init process
//! (PID 1) so the replaced process is reaped; this module only performs the
//! pull-and-exec sequence.

use cabinet_core::{EngineConfig, Result};
use cabinet_tracker::GhExecutor;
use tracing::{info, warn};

/// Commit and push the output journals so they survive the restart.
/// Best-effort: a dirty remote or missing auth never blocks the loop.
pub async fn commit_output_data<E: GhExecutor>(executor: &E, config: &EngineConfig) -> Result<()> {
    let data_dir = config.data_dir();
    if !data_dir.exists() {
        return Ok(());
    }
    let data_arg = data_dir.to_string_lossy().to_string();

    let diff = executor
        .exec(&["git", "status", "--porcelain", &data_arg])
        .await?;
    if diff.stdout.trim().is_empty() {
        return Ok(());
    }

    executor.exec(&["git", "add", &data_arg]).await?;
    let commit = executor
        .exec(&["git", "commit", "-m", "chore: update output data"])
        .await?;
    if !commit.success {
        warn!("Journal commit failed: {}", commit.stderr.trim());
        return Ok(());
    }
    let push = executor.exec(&["git", "push"]).await?;
    if !push.success {
        warn!("Journal push failed: {}", push.stderr.trim());
    }
    Ok(())
}

/// Fast-forward to the latest main. Returns false (and skips the restart)
/// when the pull is not fast-forwardable.
pub async fn pull_latest<E: GhExecutor>(executor: &E) -> Result<bool> {
    executor.exec(&["git", "checkout", "main"]).await?;
    let pull = executor.exec(&["git", "pull", "--ff-only"]).await?;
    if !pull.success {
        warn!(
            "Pull is not fast-forwardable; skipping re-exec: {}",
            pull.stderr.trim()
        );
        return Ok(false);
    }
    Ok(true)
}

/// Replace the current process with a fresh invocation of the same binary,
/// preserving argv plus updated cycle offsets. Only returns on error.
///
/// The dependency-install step (`cargo fetch`) runs first so a merged PR
/// that changed the manifest does not break the next start.
#[cfg(unix)]
pub fn reexec(config: &EngineConfig, argv: &[String]) -> std::io::Error {
    use std::os::unix::process::CommandExt;

    let fetch = std::process::Command::new("cargo")
        .arg("fetch")
        .current_dir(&config.workspace_root)
        .output();
    if let Err(err) = fetch {
        warn!("cargo fetch before re-exec failed: {}", err);
    }

    let exe = match std::env::current_exe() {
        Ok(exe) => exe,
        Err(err) => return err,
    };
    info!("Re-execing {} with {} arg(s)", exe.display(), argv.len());
    std::process::Command::new(exe).args(argv).exec()
}

#[cfg(not(unix))]
pub fn reexec(_config: &EngineConfig, _argv: &[String]) -> std::io::Error {
    std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "re-exec requires a unix platform",
    )
}
