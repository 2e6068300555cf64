//! Deadline-bounded stream I/O used by workers serving a connection.

use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Result of a single bounded read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// At least one byte arrived.
    Data(Vec<u8>),
    /// Nothing arrived before the deadline.
    Timeout,
    /// The peer closed its sending side.
    Eof,
}

/// Read up to `max` bytes, waiting at most `deadline` for the first byte.
pub async fn read_with_deadline<R>(
    reader: &mut R,
    max: usize,
    deadline: Duration,
) -> io::Result<ReadOutcome>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; max.max(1)];
    match tokio::time::timeout(deadline, reader.read(&mut buf)).await {
        Err(_) => Ok(ReadOutcome::Timeout),
        Ok(Ok(0)) => Ok(ReadOutcome::Eof),
        Ok(Ok(n)) => {
            buf.truncate(n);
            Ok(ReadOutcome::Data(buf))
        }
        Ok(Err(e)) => Err(e),
    }
}

/// Write every byte of `bytes`, retrying partial writes. Returns the count.
pub async fn write_all<W>(writer: &mut W, bytes: &[u8]) -> io::Result<usize>
where
    W: AsyncWrite + Unpin,
{
    let mut written = 0;
    while written < bytes.len() {
        match writer.write(&bytes[written..]).await {
            Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero)),
            Ok(n) => written += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    writer.flush().await?;
    Ok(written)
}
