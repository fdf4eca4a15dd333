//! Content transport — one file per TCP connection.
//!
//! The downloader sends a single Download ControlRecord. The publisher
//! answers with `CHUNK_SIZE` content frames followed by a zero-length frame,
//! then closes. A publisher that does not like the request closes the
//! connection without writing anything; the downloader sees that as a
//! truncated stream.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use zerocopy::AsBytes;

use cairn_core::wire::{
    ControlRecord, FrameHeader, Kind, WireError, CHUNK_SIZE, CONTROL_RECORD_LEN, FRAME_HEADER_LEN,
};

#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Wire(#[from] WireError),

    #[error("expected a download request, got {0:?}")]
    UnexpectedRequest(Kind),

    #[error("requested {requested:?} from the listener for {served:?}")]
    WrongContent { requested: String, served: String },

    #[error("{0:?} is not a plain file name")]
    InvalidName(String),

    #[error("cannot open {0}: {1}")]
    Unavailable(PathBuf, std::io::Error),

    #[error("stream ended before the end-of-stream frame")]
    Truncated,
}

/// Resolve a content name inside `content_dir`, refusing anything that is
/// not a single plain path component.
pub fn content_path(content_dir: &Path, name: &str) -> Result<PathBuf, TransferError> {
    let plain = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0']);
    if !plain {
        return Err(TransferError::InvalidName(name.to_string()));
    }
    Ok(content_dir.join(name))
}

/// Publisher side: answer one Download request for `content`.
///
/// Any error means the connection is closed with nothing (or a partial
/// stream) written. Returns the number of payload bytes sent.
pub async fn serve_download<S>(
    mut stream: S,
    content: &str,
    content_dir: &Path,
) -> Result<u64, TransferError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = [0u8; CONTROL_RECORD_LEN];
    stream.read_exact(&mut buf).await?;
    let request = ControlRecord::decode(&buf)?;

    if request.kind != Kind::Download {
        return Err(TransferError::UnexpectedRequest(request.kind));
    }
    if request.content_name != content {
        return Err(TransferError::WrongContent {
            requested: request.content_name,
            served: content.to_string(),
        });
    }

    let path = content_path(content_dir, content)?;
    let mut file = File::open(&path)
        .await
        .map_err(|e| TransferError::Unavailable(path.clone(), e))?;

    let mut chunk = vec![0u8; CHUNK_SIZE];
    let mut sent: u64 = 0;
    loop {
        let n = file.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        stream
            .write_all(FrameHeader::new(n as u32).as_bytes())
            .await?;
        stream.write_all(&chunk[..n]).await?;
        sent += n as u64;
    }
    stream
        .write_all(FrameHeader::end_of_stream().as_bytes())
        .await?;
    stream.flush().await?;
    stream.shutdown().await?;

    tracing::debug!(content, bytes = sent, "content served");
    Ok(sent)
}

/// Downloader side: request `content` over an open stream and write it to
/// `<content_dir>/<content>`.
///
/// The destination file is created (truncated) before the first frame
/// arrives and is left in place if the transfer fails.
pub async fn fetch<S>(mut stream: S, content: &str, content_dir: &Path) -> Result<u64, TransferError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let path = content_path(content_dir, content)?;

    let request = ControlRecord::new(Kind::Download, "", content);
    stream.write_all(&request.encode()).await?;
    stream.flush().await?;

    let mut file = File::create(&path)
        .await
        .map_err(|e| TransferError::Unavailable(path.clone(), e))?;

    let mut header = [0u8; FRAME_HEADER_LEN];
    let mut chunk = vec![0u8; CHUNK_SIZE];
    let mut received: u64 = 0;
    loop {
        read_frame_part(&mut stream, &mut header).await?;
        let len = FrameHeader::decode(&header)? as usize;
        if len == 0 {
            break;
        }

        let mut remaining = len;
        while remaining > 0 {
            let part = remaining.min(CHUNK_SIZE);
            read_frame_part(&mut stream, &mut chunk[..part]).await?;
            file.write_all(&chunk[..part]).await?;
            remaining -= part;
        }
        received += len as u64;
    }
    file.flush().await?;

    tracing::debug!(content, bytes = received, path = %path.display(), "content fetched");
    Ok(received)
}

/// Connect to a publisher and fetch `content` from it.
pub async fn download(
    addr: SocketAddr,
    content: &str,
    content_dir: &Path,
) -> Result<u64, TransferError> {
    let stream = TcpStream::connect(addr).await?;
    fetch(stream, content, content_dir).await
}

/// `read_exact` that reports a closed connection as a truncated stream.
async fn read_frame_part<S>(stream: &mut S, buf: &mut [u8]) -> Result<(), TransferError>
where
    S: AsyncRead + Unpin,
{
    match stream.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(TransferError::Truncated),
        Err(e) => Err(e.into()),
    }
}
