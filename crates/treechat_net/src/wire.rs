//! Line framing over byte streams.

use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Longest line accepted from a remote, terminator included.
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Read one `\n`-terminated line with the line terminator removed.
///
/// Returns `Ok(None)` at end of stream. A trailing fragment with no newline
/// before EOF is discarded. Invalid UTF-8 is replaced rather than rejected.
/// A line longer than [`MAX_LINE_LEN`] is an `InvalidData` error.
pub async fn read_line<R>(reader: &mut R) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    Ok(read_raw_line(reader).await?.map(|mut line| {
        if line.ends_with('\r') {
            line.pop();
        }
        line
    }))
}

/// Like [`read_line`], but only the final `\n` is removed; a preceding `\r`
/// stays part of the line. Forwarding uses this so the bytes written on
/// match the bytes received.
pub async fn read_raw_line<R>(reader: &mut R) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let mut limited = (&mut *reader).take(MAX_LINE_LEN as u64);
    let n = limited.read_until(b'\n', &mut buf).await?;

    if n == 0 {
        return Ok(None);
    }
    if buf.pop() != Some(b'\n') {
        if n >= MAX_LINE_LEN {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "line too long"));
        }
        return Ok(None);
    }

    Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
}

/// Write `line` followed by `\n` and flush.
pub async fn write_line<W>(writer: &mut W, line: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut framed = Vec::with_capacity(line.len() + 1);
    framed.extend_from_slice(line.as_bytes());
    framed.push(b'\n');
    writer.write_all(&framed).await?;
    writer.flush().await
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
