//! Line framing shared by the IPC client and server
//!
//! One JSON document per line. Frames are bounded so a client that never
//! sends a newline cannot grow the read buffer without limit.

use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{DaemonError, Result};

/// Largest accepted frame, newline included
pub const MAX_FRAME_BYTES: u64 = 64 * 1024;

/// Read one frame into `line`, replacing its contents.
///
/// Returns false on a clean end of stream.
pub async fn read_frame<R>(reader: &mut R, line: &mut String) -> Result<bool>
where
    R: AsyncBufRead + Unpin,
{
    line.clear();
    let read = (&mut *reader).take(MAX_FRAME_BYTES).read_line(line).await?;
    if read == 0 {
        return Ok(false);
    }
    if !line.ends_with('\n') && read as u64 >= MAX_FRAME_BYTES {
        return Err(DaemonError::Ipc(format!(
            "Frame exceeds {} bytes",
            MAX_FRAME_BYTES
        )));
    }
    Ok(true)
}

/// Serialize `value` as one frame and flush it
pub async fn write_frame<W, T>(writer: &mut W, value: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize + ?Sized,
{
    let mut json = serde_json::to_vec(value)?;
    json.push(b'\n');
    writer.write_all(&json).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn test_frames_split_on_newlines() {
        let input: &[u8] = b"{\"type\":\"Ping\"}\n{\"type\":\"Status\"}";
        let mut reader = BufReader::new(input);
        let mut line = String::new();

        assert!(read_frame(&mut reader, &mut line).await.unwrap());
        assert_eq!(line, "{\"type\":\"Ping\"}\n");
        assert!(read_frame(&mut reader, &mut line).await.unwrap());
        assert_eq!(line, "{\"type\":\"Status\"}");
        assert!(!read_frame(&mut reader, &mut line).await.unwrap());
    }

    #[tokio::test]
    async fn test_oversized_frame_is_rejected() {
        let input = vec![b'x'; MAX_FRAME_BYTES as usize + 10];
        let mut reader = BufReader::new(input.as_slice());
        let mut line = String::new();
        assert!(matches!(
            read_frame(&mut reader, &mut line).await,
            Err(DaemonError::Ipc(_))
        ));
    }

    #[tokio::test]
    async fn test_write_frame_appends_newline() {
        let mut out = Vec::new();
        write_frame(&mut out, &serde_json::json!({"type": "Ok"})).await.unwrap();
        assert_eq!(out, b"{\"type\":\"Ok\"}\n");
    }
}
