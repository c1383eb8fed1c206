use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;

use scan_session_core::models::error::ScanError;

/// Why a `scanimage` run did not produce output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Failure {
    Busy(String),
    NotFound(String),
    OutOfDocuments,
    Failed(String),
}

impl Failure {
    /// Map to the error reported for `context` (a device id or action).
    pub(crate) fn into_error(self, context: &str) -> ScanError {
        match self {
            Self::Busy(message) => ScanError::Busy(format!("{context}: {message}")),
            Self::NotFound(_) => ScanError::NotFound(context.to_string()),
            Self::OutOfDocuments => {
                ScanError::DeviceError(format!("{context}: document feeder is empty"))
            }
            Self::Failed(message) => ScanError::DeviceError(format!("{context}: {message}")),
        }
    }
}

/// Run `scanimage` with `args` and return its stdout.
///
/// The child is killed if it outlives `limit` or if the returned future is
/// dropped.
pub(crate) async fn run_scanimage(program: &Path, args: &[String], limit: Duration) -> Result<Vec<u8>, Failure> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    log::debug!("running {} {}", program.display(), args.join(" "));
    let output = timeout(limit, cmd.output())
        .await
        .map_err(|_| Failure::Failed(format!("scanimage timed out after {} ms", limit.as_millis())))?
        .map_err(|e| Failure::Failed(format!("could not run {}: {}", program.display(), e)))?;

    if output.status.success() {
        return Ok(output.stdout);
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    Err(classify(&stderr))
}

/// Sort a `scanimage` error message into the cases callers react to.
pub(crate) fn classify(stderr: &str) -> Failure {
    let message = stderr
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .last()
        .unwrap_or("scanimage failed without a message")
        .to_string();
    let lower = stderr.to_ascii_lowercase();

    if lower.contains("out of documents") || lower.contains("no more documents") {
        Failure::OutOfDocuments
    } else if lower.contains("device busy") {
        Failure::Busy(message)
    } else if lower.contains("invalid argument") || lower.contains("no such device") {
        Failure::NotFound(message)
    } else {
        Failure::Failed(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_common_failures() {
        assert_eq!(
            classify("scanimage: open of device pixma:xyz failed: Device busy\n"),
            Failure::Busy("scanimage: open of device pixma:xyz failed: Device busy".into())
        );
        assert!(matches!(
            classify("scanimage: open of device nope failed: Invalid argument"),
            Failure::NotFound(_)
        ));
        assert_eq!(
            classify("scanimage: sane_start: Document feeder out of documents"),
            Failure::OutOfDocuments
        );
        assert!(matches!(classify("scanimage: sane_read: Error during device I/O"), Failure::Failed(_)));
        assert_eq!(classify(""), Failure::Failed("scanimage failed without a message".into()));
    }

    #[test]
    fn errors_carry_context() {
        let err = Failure::Busy("held".into()).into_error("pixma:xyz");
        assert_eq!(err, ScanError::Busy("pixma:xyz: held".into()));
        assert!(err.is_retryable());
        assert_eq!(
            Failure::NotFound("Invalid argument".into()).into_error("pixma:xyz"),
            ScanError::NotFound("pixma:xyz".into())
        );
    }

    #[tokio::test]
    async fn missing_program_is_a_failure() {
        let result = run_scanimage(
            Path::new("/nonexistent/scanimage"),
            &["-L".to_string()],
            Duration::from_secs(5),
        )
        .await;
        assert!(matches!(result, Err(Failure::Failed(_))));
    }
}
