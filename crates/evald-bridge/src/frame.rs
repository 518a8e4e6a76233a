//! Async reads and writes of tagged worker frames.

use evald_protocol::worker::FRAME_HEADER_LEN;
use evald_protocol::{FrameHeader, FramingError};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Read one frame. `Ok(None)` means the peer closed between frames.
pub async fn read_frame<R>(reader: &mut R, max_frame_bytes: usize) -> Result<Option<(FrameHeader, Vec<u8>)>, FramingError>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; FRAME_HEADER_LEN];
    let mut filled = 0;
    while filled < FRAME_HEADER_LEN {
        let n = reader.read(&mut prefix[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(FramingError::Truncated {
                expected: FRAME_HEADER_LEN,
                actual: filled,
            });
        }
        filled += n;
    }

    let header = FrameHeader::parse(&prefix)?;
    header.check_limit(max_frame_bytes)?;

    let mut payload = vec![0u8; header.len];
    let mut filled = 0;
    while filled < payload.len() {
        let n = reader.read(&mut payload[filled..]).await?;
        if n == 0 {
            return Err(FramingError::Truncated {
                expected: header.len,
                actual: filled,
            });
        }
        filled += n;
    }
    Ok(Some((header, payload)))
}

/// Write an already-encoded frame and flush.
pub async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(frame).await?;
    writer.flush().await
}
