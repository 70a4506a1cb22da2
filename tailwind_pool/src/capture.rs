//! Synchronizes on a compiled CSS file appearing or changing on disk (§4.D).
//!
//! The Tailwind CLI communicates a finished build only by writing its output file; there is no
//! completion event on the Worker's stdout we can trust to line up with *this* request's content.
//! So capture polls the output file's mtime, the same "poll until the filesystem says so" pattern
//! the teacher's `local.rs` uses when waiting for a sandboxed process's output files to settle.

use std::path::Path;
use std::time::{Duration, SystemTime};

use tokio::time::Instant;

use crate::error::{DegradedReason, Error};

/// How often the output file's mtime is polled while waiting for a compile to land.
const POLL_INTERVAL: Duration = Duration::from_millis(75);

/// The result of one capture attempt.
#[derive(Debug)]
pub enum CaptureOutcome {
    /// The output file changed within the timeout; its contents are included.
    Ready(String),
    /// The timeout elapsed before the output file changed, or it never existed to begin with.
    Degraded(DegradedReason),
}

/// Writes `content` to `content_path`, then polls `output_path`'s mtime until it changes from
/// `baseline_mtime` (the mtime observed before this request was issued) or `timeout` elapses.
///
/// A worker's very first compile has no prior mtime to compare against: pass `None` and any mtime
/// observed at all is treated as a fresh build. `timeout` is the pool's `compile_timeout`.
pub async fn capture(
    content_path: &Path,
    content: &str,
    output_path: &Path,
    baseline_mtime: Option<SystemTime>,
    timeout: Duration,
) -> Result<CaptureOutcome, Error> {
    tokio::fs::write(content_path, content).await?;

    let deadline = Instant::now() + timeout;
    loop {
        if let Ok(metadata) = tokio::fs::metadata(output_path).await {
            if let Ok(mtime) = metadata.modified() {
                let changed = match baseline_mtime {
                    Some(baseline) => mtime > baseline,
                    None => true,
                };
                if changed {
                    let body = tokio::fs::read_to_string(output_path).await?;
                    return Ok(CaptureOutcome::Ready(body));
                }
            }
        }
        if Instant::now() >= deadline {
            // Present or absent, a deadline-driven degrade is always `reason=timeout`;
            // `missing_output_path` is reserved for an unconfigured output path, not this loop.
            return Ok(CaptureOutcome::Degraded(DegradedReason::Timeout));
        }
        tokio::time::sleep(POLL_INTERVAL.min(deadline.saturating_duration_since(Instant::now())))
            .await;
    }
}

/// Reads `output_path`'s current mtime, if it exists. Callers capture this before issuing a
/// compile so [`capture`] has a baseline to detect a *new* write rather than a stale one.
pub async fn current_mtime(output_path: &Path) -> Option<SystemTime> {
    tokio::fs::metadata(output_path).await.ok()?.modified().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    #[tokio::test]
    async fn captures_output_written_after_baseline() {
        let dir = tempfile::tempdir().unwrap();
        let content_path = dir.path().join("content.html");
        let output_path = dir.path().join("output.css");
        tokio::fs::write(&output_path, "stale").await.unwrap();
        let baseline = current_mtime(&output_path).await;

        let output_path_clone = output_path.clone();
        tokio::spawn(async move {
            tokio::time::sleep(StdDuration::from_millis(50)).await;
            tokio::fs::write(&output_path_clone, ".a{color:red}").await.unwrap();
        });

        let outcome = capture(&content_path, "<div class=a>", &output_path, baseline, StdDuration::from_secs(2))
            .await
            .unwrap();
        match outcome {
            CaptureOutcome::Ready(body) => assert_eq!(body, ".a{color:red}"),
            CaptureOutcome::Degraded(reason) => panic!("expected ready, got degraded: {reason:?}"),
        }
        assert_eq!(
            tokio::fs::read_to_string(&content_path).await.unwrap(),
            "<div class=a>"
        );
    }

    #[tokio::test]
    async fn degrades_on_timeout_when_output_never_changes() {
        let dir = tempfile::tempdir().unwrap();
        let content_path = dir.path().join("content.html");
        let output_path = dir.path().join("output.css");
        tokio::fs::write(&output_path, "stale").await.unwrap();
        let baseline = current_mtime(&output_path).await;

        let outcome = capture(
            &content_path,
            "<div>",
            &output_path,
            baseline,
            StdDuration::from_millis(150),
        )
        .await
        .unwrap();
        assert!(matches!(
            outcome,
            CaptureOutcome::Degraded(DegradedReason::Timeout)
        ));
    }

    #[tokio::test]
    async fn degrades_on_timeout_when_output_never_existed() {
        let dir = tempfile::tempdir().unwrap();
        let content_path = dir.path().join("content.html");
        let output_path = dir.path().join("does_not_exist.css");

        let outcome = capture(
            &content_path,
            "<div>",
            &output_path,
            None,
            StdDuration::from_millis(150),
        )
        .await
        .unwrap();
        assert!(matches!(
            outcome,
            CaptureOutcome::Degraded(DegradedReason::Timeout)
        ));
    }

    #[tokio::test]
    async fn first_compile_with_no_baseline_accepts_any_existing_output() {
        let dir = tempfile::tempdir().unwrap();
        let content_path = dir.path().join("content.html");
        let output_path = dir.path().join("output.css");
        tokio::fs::write(&output_path, ".b{color:blue}").await.unwrap();

        let outcome = capture(&content_path, "<div class=b>", &output_path, None, StdDuration::from_secs(2))
            .await
            .unwrap();
        match outcome {
            CaptureOutcome::Ready(body) => assert_eq!(body, ".b{color:blue}"),
            CaptureOutcome::Degraded(reason) => panic!("expected ready, got degraded: {reason:?}"),
        }
    }
}
