//! The job home: a zip archive holding the worker executable.

use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::Result;

/// Name of the single archive entry. Jobs point their `worker` key at `./job`.
pub const ENTRY_NAME: &str = "job";

/// Where the worker executable for a job comes from.
#[derive(Debug, Clone)]
pub enum WorkerPayload {
    /// An already built executable, archived on encode.
    Executable(PathBuf),

    /// A ready made archive, passed through verbatim.
    Archive(Bytes),
}

impl WorkerPayload {
    /// Produce the home archive bytes.
    pub fn archive(&self) -> Result<Bytes> {
        match self {
            WorkerPayload::Executable(path) => archive_executable(path),
            WorkerPayload::Archive(bytes) => Ok(bytes.clone()),
        }
    }
}

/// Zip `path` into a single executable entry named [`ENTRY_NAME`].
pub fn archive_executable(path: &Path) -> Result<Bytes> {
    let exe = std::fs::read(path)?;
    debug!("archiving worker {} ({} bytes)", path.display(), exe.len());

    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o755);

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    zip.start_file(ENTRY_NAME, options)?;
    zip.write_all(&exe)?;
    let cursor = zip.finish()?;

    Ok(Bytes::from(cursor.into_inner()))
}
