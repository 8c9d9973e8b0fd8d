//! Idempotent creation of the engine's label vocabulary.

use cabinet_core::{Result, ALL_LABELS};
use tracing::debug;

use crate::command::GhExecutor;

/// Create every label in the closed vocabulary. `--force` makes this
/// idempotent; individual failures are ignored (the tracker may race with a
/// concurrent human edit).
pub async fn ensure_labels<E: GhExecutor>(executor: &E) -> Result<()> {
    for (name, color) in ALL_LABELS {
        let output = executor
            .exec(&["gh", "label", "create", name, "--color", color, "--force"])
            .await?;
        if !output.success {
            debug!("label create {} failed: {}", name, output.stderr.trim());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{GhOutput, MockGhExecutor};

    #[tokio::test]
    async fn test_ensure_labels_creates_whole_vocabulary() {
        let executor =
            MockGhExecutor::new().with_prefix_response("gh label create", GhOutput::ok(""));
        ensure_labels(&executor).await.unwrap();
        assert_eq!(executor.calls().len(), ALL_LABELS.len());
        assert!(executor.saw_call("gh label create self-improve:backlog"));
    }
}
