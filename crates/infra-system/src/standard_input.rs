// Standard input byte sink
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::ChildStdin;
use tokio::sync::Mutex;
use tracing::debug;

use procline_core::{ProcessError, Result};

/// Writable handle to a child's standard input
///
/// Clones share the same pipe. Writes are serialized, so two concurrent
/// `write_line` calls never interleave their bytes. Backpressure comes from the
/// OS pipe: a write waits while the child is not reading.
#[derive(Clone)]
pub struct StandardInput {
    pipe: Arc<Mutex<Option<ChildStdin>>>,
}

impl StandardInput {
    pub(crate) fn new(pipe: Option<ChildStdin>) -> Self {
        Self {
            pipe: Arc::new(Mutex::new(pipe)),
        }
    }

    /// Write all bytes to the pipe
    ///
    /// # Errors
    /// - ProcessError::InputClosed after `close`
    /// - ProcessError::Io if the child closed its end (broken pipe)
    pub async fn write_all(&self, bytes: &[u8]) -> Result<()> {
        let mut guard = self.pipe.lock().await;
        let pipe = guard.as_mut().ok_or(ProcessError::InputClosed)?;
        pipe.write_all(bytes).await?;
        Ok(())
    }

    /// Write `line` followed by a newline and flush
    pub async fn write_line(&self, line: &str) -> Result<()> {
        let mut guard = self.pipe.lock().await;
        let pipe = guard.as_mut().ok_or(ProcessError::InputClosed)?;
        pipe.write_all(line.as_bytes()).await?;
        pipe.write_all(b"\n").await?;
        pipe.flush().await?;
        Ok(())
    }

    pub async fn flush(&self) -> Result<()> {
        let mut guard = self.pipe.lock().await;
        let pipe = guard.as_mut().ok_or(ProcessError::InputClosed)?;
        pipe.flush().await?;
        Ok(())
    }

    /// Close the pipe so the child sees end-of-file. Idempotent.
    pub async fn close(&self) -> Result<()> {
        if let Some(mut pipe) = self.pipe.lock().await.take() {
            pipe.shutdown().await?;
            debug!("Standard input closed");
        }
        Ok(())
    }

    pub async fn is_closed(&self) -> bool {
        self.pipe.lock().await.is_none()
    }
}

impl std::fmt::Debug for StandardInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StandardInput").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_pipe_reports_closed() {
        let input = StandardInput::new(None);
        assert!(input.is_closed().await);
        assert!(matches!(
            input.write_all(b"x").await,
            Err(ProcessError::InputClosed)
        ));
        assert!(matches!(
            input.write_line("x").await,
            Err(ProcessError::InputClosed)
        ));
        assert!(matches!(input.flush().await, Err(ProcessError::InputClosed)));
        // close stays idempotent
        tokio_test::assert_ok!(input.close().await);
    }
}
