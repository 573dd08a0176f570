//! Peer file-transfer framing
//!
//! One session moves one file, sender to receiver:
//! 1. file name: big-endian `u16` byte length followed by UTF-8 bytes
//! 2. file size: big-endian `u64`
//! 3. exactly `size` bytes of content

use crate::error::{OverlayError, Result};
use log::{info, warn};
use std::fs::{self, File};
use std::io::{self, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

const CHUNK_SIZE: usize = 8192;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferHeader {
    pub name: String,
    pub size: u64,
}

/// Outcome of a completed receive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFile {
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
}

impl TransferHeader {
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        let name = self.name.as_bytes();
        let name_len = u16::try_from(name.len()).map_err(|_| {
            OverlayError::Io(format!("file name is {} bytes, limit is 65535", name.len()))
        })?;

        let mut frame = Vec::with_capacity(2 + name.len() + 8);
        frame.extend_from_slice(&name_len.to_be_bytes());
        frame.extend_from_slice(name);
        frame.extend_from_slice(&self.size.to_be_bytes());

        writer
            .write_all(&frame)
            .map_err(|e| broken("failed to send transfer header", e))
    }

    pub fn read_from<R: Read>(reader: &mut R) -> Result<TransferHeader> {
        let mut len_buf = [0u8; 2];
        reader
            .read_exact(&mut len_buf)
            .map_err(|e| broken("failed to read file name length", e))?;

        let mut name_buf = vec![0u8; u16::from_be_bytes(len_buf) as usize];
        reader
            .read_exact(&mut name_buf)
            .map_err(|e| broken("failed to read file name", e))?;
        let name = String::from_utf8(name_buf).map_err(|e| {
            OverlayError::MalformedProtocol(format!("file name is not UTF-8: {e}"))
        })?;

        let mut size_buf = [0u8; 8];
        reader
            .read_exact(&mut size_buf)
            .map_err(|e| broken("failed to read file size", e))?;

        Ok(TransferHeader {
            name,
            size: u64::from_be_bytes(size_buf),
        })
    }
}

fn broken(context: &str, err: io::Error) -> OverlayError {
    OverlayError::BrokenLink(format!("{context}: {err}"))
}

/// Send the file at `path` over `writer`, announcing it under its base name.
/// Returns the number of content bytes sent.
///
/// Anything that keeps the file from being opened, including a path that is
/// not a regular file, is `FileNotFound` and nothing is written. After the
/// header only a failed write is `BrokenLink`; a local read failure is `Io`
/// and a file that shrank is `Integrity`.
pub fn send_file<W: Write>(writer: &mut W, path: &Path) -> Result<u64> {
    let not_found = || OverlayError::FileNotFound(path.display().to_string());

    let mut file = File::open(path).map_err(|e| {
        warn!("Cannot open {}: {e}", path.display());
        not_found()
    })?;
    let metadata = file.metadata().map_err(|e| {
        warn!("Cannot stat {}: {e}", path.display());
        not_found()
    })?;
    if !metadata.is_file() {
        warn!("{} is not a regular file", path.display());
        return Err(not_found());
    }
    let size = metadata.len();
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(not_found)?;

    let header = TransferHeader { name, size };
    header.write_to(writer)?;
    let sent = send_payload(&mut file, writer, &header)?;

    info!("Sent {} ({size} bytes) to the peer", header.name);
    Ok(sent)
}

/// Copy the announced `header.size` bytes of `source` to `writer`
fn send_payload<R: Read, W: Write>(source: &mut R, writer: &mut W, header: &TransferHeader) -> Result<u64> {
    let size = header.size;
    let mut buf = [0u8; CHUNK_SIZE];
    let mut sent: u64 = 0;
    while sent < size {
        let want = (size - sent).min(CHUNK_SIZE as u64) as usize;
        let n = match source.read(&mut buf[..want]) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                return Err(OverlayError::Io(format!(
                    "failed to read {}: {e}",
                    header.name
                )))
            }
        };
        writer
            .write_all(&buf[..n])
            .map_err(|e| broken("failed to send file content", e))?;
        sent += n as u64;
    }
    writer
        .flush()
        .map_err(|e| broken("failed to flush file content", e))?;

    if sent != size {
        warn!(
            "{} shrank while sending: {sent} of {size} bytes",
            header.name
        );
        return Err(OverlayError::Integrity {
            expected: size,
            written: sent,
        });
    }
    Ok(sent)
}

/// Receive one file from `reader` into `download_dir`.
///
/// Any directory components in the announced name are dropped. A link that
/// closes before `size` bytes arrive yields `BrokenLink`; a file whose length
/// on disk differs from the announced size yields `Integrity`.
pub fn receive_file<R: Read>(reader: &mut R, download_dir: &Path) -> Result<ReceivedFile> {
    let header = TransferHeader::read_from(reader)?;
    let local_name = Path::new(&header.name)
        .file_name()
        .map(|n| n.to_owned())
        .ok_or_else(|| {
            OverlayError::MalformedProtocol(format!("unusable file name: {:?}", header.name))
        })?;
    let path = download_dir.join(local_name);

    info!(
        "Receiving {} ({} bytes) into {}",
        header.name,
        header.size,
        path.display()
    );

    let copied = File::create(&path)
        .map_err(OverlayError::from)
        .and_then(|file| copy_payload(reader, BufWriter::new(file), &header));
    if let Err(e) = copied {
        // An unfinished session leaves nothing behind
        if let Err(remove_err) = fs::remove_file(&path) {
            if remove_err.kind() != ErrorKind::NotFound {
                warn!("Failed to remove partial {}: {remove_err}", path.display());
            }
        }
        return Err(e);
    }

    let written = fs::metadata(&path)?.len();
    if written != header.size {
        return Err(OverlayError::Integrity {
            expected: header.size,
            written,
        });
    }

    info!("Saved {} ({written} bytes) from a peer", header.name);
    Ok(ReceivedFile {
        name: header.name,
        path,
        size: written,
    })
}

/// Copy exactly `header.size` bytes from `reader` into `out`
fn copy_payload<R: Read, W: Write>(reader: &mut R, mut out: W, header: &TransferHeader) -> Result<()> {
    let mut buf = [0u8; CHUNK_SIZE];
    let mut count: u64 = 0;

    while count < header.size {
        let want = (header.size - count).min(CHUNK_SIZE as u64) as usize;
        let n = match reader.read(&mut buf[..want]) {
            Ok(0) => {
                warn!(
                    "Peer closed the link after {count} of {} bytes of {}",
                    header.size, header.name
                );
                return Err(OverlayError::BrokenLink(format!(
                    "link closed after {count} of {} bytes",
                    header.size
                )));
            }
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(broken("failed to read file content", e)),
        };
        out.write_all(&buf[..n])?;
        count += n as u64;
    }
    out.flush()?;
    Ok(())
}
