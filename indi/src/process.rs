//! Output collection for child processes

use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// Grace period for output readers once the process has exited or been killed
pub const READER_GRACE: Duration = Duration::from_millis(500);

/// Read a child pipe to the end on its own task
pub fn spawn_output_reader<R>(pipe: Option<R>) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf).await;
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

/// Whatever the reader collected, giving up after [`READER_GRACE`]
///
/// A grandchild holding the pipe open would otherwise keep the reader alive.
pub async fn drain_output(mut reader: JoinHandle<String>) -> String {
    match timeout(READER_GRACE, &mut reader).await {
        Ok(Ok(text)) => text,
        Ok(Err(_)) => String::new(),
        Err(_) => {
            reader.abort();
            String::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reads_pipe_to_end() {
        let reader = spawn_output_reader(Some(&b"Mount.CONNECTION.CONNECT=On\n"[..]));
        assert_eq!(drain_output(reader).await, "Mount.CONNECTION.CONNECT=On\n");
    }

    #[tokio::test]
    async fn test_missing_pipe_is_empty() {
        let reader = spawn_output_reader(None::<&'static [u8]>);
        assert_eq!(drain_output(reader).await, "");
    }

    #[tokio::test]
    async fn test_stuck_reader_is_abandoned() {
        let (_writer, pipe) = tokio::io::duplex(64);
        let started = std::time::Instant::now();
        assert_eq!(drain_output(spawn_output_reader(Some(pipe))).await, "");
        assert!(started.elapsed() < READER_GRACE * 4);
    }
}
