//! Serial link plumbing: feeds raw bytes into the reassembly buffer and
//! writes responses back, enforcing the inter-frame silence timeout.

use super::{ReassemblyBuffer, RtuServer};
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

/// Serve requests from a byte-stream transport until it is closed.
///
/// `silence` is the inter-frame gap after which a partial frame is
/// discarded, usually obtained from [`silence_timeout`](super::silence_timeout).
/// A clean end of stream returns `Ok(())`; buffered fragment bytes are
/// dropped with it.
pub async fn serve<T>(
    mut transport: T,
    mut server: RtuServer,
    silence: Duration,
) -> io::Result<()>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let mut buffer = ReassemblyBuffer::new();
    let mut chunk = [0u8; 256];
    loop {
        let read = if buffer.is_empty() {
            transport.read(&mut chunk).await?
        } else {
            // A frame is in flight. If the line stays silent the
            // fragment cannot be completed and is discarded.
            match timeout(silence, transport.read(&mut chunk)).await {
                Ok(read) => read?,
                Err(_) => {
                    buffer.clear();
                    continue;
                }
            }
        };
        if read == 0 {
            log::debug!("Transport closed");
            return Ok(());
        }
        buffer.push(&chunk[..read]);
        while let Some(frame) = buffer.try_extract() {
            if let Some(response) = server.process_frame(frame.slave, &frame.pdu) {
                transport.write_all(&response).await?;
                transport.flush().await?;
            }
        }
    }
}
