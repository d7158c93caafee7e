//! Byte relay between debugger and backend
//!
//! Each direction is a pump: read one chunk, write all of it, repeat. A pump
//! never holds more than one chunk, so a slow sink stalls its source and the
//! pressure travels back through TCP or pipe flow control instead of
//! growing a buffer.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

/// RSP detach packet; the only packet the relay looks at
pub const DETACH_PACKET: &[u8] = b"$D#44";

/// Whether a chunk read from the debugger is exactly the detach packet
///
/// Only a whole chunk counts. A detach packet coalesced with other bytes is
/// relayed like any other data.
pub fn is_detach(chunk: &[u8]) -> bool {
    chunk == DETACH_PACKET
}

/// Direction of a pump, for logging and detach handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Direction {
    ClientToBackend,
    BackendToClient,
}

impl Direction {
    fn label(self) -> &'static str {
        match self {
            Self::ClientToBackend => "gdb -> backend",
            Self::BackendToClient => "backend -> gdb",
        }
    }
}

/// How a pump stopped
#[derive(Debug)]
pub(crate) enum PumpEnd {
    /// The source reached end of stream
    SourceClosed,
    /// The debugger sent the detach packet (client to backend only)
    Detached,
    /// Reading from the source failed
    ReadFailed(io::Error),
    /// Writing to the sink failed
    WriteFailed(io::Error),
}

/// Copy chunks from `source` to `sink` until one side ends
pub(crate) async fn pump<R, W>(
    source: &mut R,
    sink: &mut W,
    buffer_size: usize,
    direction: Direction,
    relayed: &mut u64,
) -> PumpEnd
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = vec![0u8; buffer_size.max(1)];

    loop {
        let n = match source.read(&mut buf).await {
            Ok(0) => return PumpEnd::SourceClosed,
            Ok(n) => n,
            Err(e) => return PumpEnd::ReadFailed(e),
        };
        let chunk = &buf[..n];

        if direction == Direction::ClientToBackend && is_detach(chunk) {
            debug!("{}: detach packet received", direction.label());
            return PumpEnd::Detached;
        }

        if let Err(e) = sink.write_all(chunk).await {
            return PumpEnd::WriteFailed(e);
        }
        if let Err(e) = sink.flush().await {
            return PumpEnd::WriteFailed(e);
        }

        *relayed += n as u64;
        trace!(
            "{}: {} bytes {:?}",
            direction.label(),
            n,
            String::from_utf8_lossy(chunk)
        );
    }
}
