//! Filesystem access for the WebDAV handler.
//!
//! Everything here is async and streaming: reads are served in chunks from
//! an open file, writes consume the request body frame by frame.

use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use http_body_util::BodyExt;
use hyper::body::Body;
use log::{debug, trace};
use sdav_core::Result;
use std::error::Error as StdError;
use std::fs::Metadata;
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::pin::pin;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, Take};
use tokio_util::io::ReaderStream;

/// Chunk size for streamed reads.
const READ_CHUNK: usize = 64 * 1024;

/// Stat result for one resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceMeta {
    pub is_dir: bool,
    pub size: u64,
    pub modified: SystemTime,
    /// Falls back to `modified` where the filesystem has no birth time.
    pub created: SystemTime,
}

impl ResourceMeta {
    fn from_metadata(meta: &Metadata) -> Self {
        let modified = meta.modified().unwrap_or(UNIX_EPOCH);
        Self {
            is_dir: meta.is_dir(),
            size: if meta.is_dir() { 0 } else { meta.len() },
            modified,
            created: meta.created().unwrap_or(modified),
        }
    }

    /// Quoted modification time in milliseconds.
    pub fn etag(&self) -> String {
        let millis = self
            .modified
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        format!("\"{millis}\"")
    }

    /// RFC 7231 date, e.g. `Tue, 15 Nov 1994 08:12:31 GMT`.
    pub fn last_modified(&self) -> String {
        http_date(self.modified)
    }

    /// ISO-8601 with milliseconds.
    pub fn creation_date(&self) -> String {
        DateTime::<Utc>::from(self.created).to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}

pub fn http_date(time: SystemTime) -> String {
    DateTime::<Utc>::from(time)
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}

/// One child of a listed directory.
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
    pub meta: ResourceMeta,
}

pub async fn stat(path: &Path) -> Result<ResourceMeta> {
    let meta = fs::metadata(path).await?;
    Ok(ResourceMeta::from_metadata(&meta))
}

/// Like [`stat`], but a missing resource is `None`.
pub async fn try_stat(path: &Path) -> Result<Option<ResourceMeta>> {
    match fs::metadata(path).await {
        Ok(meta) => Ok(Some(ResourceMeta::from_metadata(&meta))),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Immediate children of `dir`, sorted by name. Entries that disappear
/// while listing are skipped.
pub async fn list(dir: &Path) -> Result<Vec<DirEntry>> {
    let mut reader = fs::read_dir(dir).await?;
    let mut entries = Vec::new();
    while let Some(entry) = reader.next_entry().await? {
        let meta = match fs::metadata(entry.path()).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                trace!("{} vanished during listing", entry.path().display());
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        entries.push(DirEntry {
            name: entry.file_name().to_string_lossy().into_owned(),
            meta: ResourceMeta::from_metadata(&meta),
        });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

/// Stream `len` bytes starting at `start`.
pub async fn open_range(path: &Path, start: u64, len: u64) -> Result<ReaderStream<Take<File>>> {
    let mut file = File::open(path).await?;
    if start > 0 {
        file.seek(SeekFrom::Start(start)).await?;
    }
    Ok(ReaderStream::with_capacity(file.take(len), READ_CHUNK))
}

/// Write a request body to `path`, creating parent directories and
/// replacing any existing file.
///
/// Returns once the data has been flushed and synced to disk.
pub async fn write_body<B>(path: &Path, body: B) -> Result<u64>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn StdError + Send + Sync>>,
{
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let mut file = File::create(path).await?;
    let mut body = pin!(body);
    let mut written = 0u64;
    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(io::Error::other)?;
        if let Ok(data) = frame.into_data() {
            file.write_all(&data).await?;
            written += data.len() as u64;
        }
    }
    file.flush().await?;
    file.sync_all().await?;

    debug!("Wrote {} bytes to {}", written, path.display());
    Ok(written)
}

/// Outermost path that creating `path` (with its parents) brings into
/// existence: `path` itself when its parent exists, otherwise the highest
/// missing ancestor.
pub async fn creation_root(path: &Path) -> PathBuf {
    let mut top = path.to_path_buf();
    while let Some(parent) = top.parent() {
        if fs::try_exists(parent).await.unwrap_or(true) {
            break;
        }
        top = parent.to_path_buf();
    }
    top
}

/// Create a directory and any missing parents.
pub async fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).await?;
    Ok(())
}

/// Remove a file, or a directory with everything in it.
pub async fn remove(path: &Path, is_dir: bool) -> Result<()> {
    if is_dir {
        fs::remove_dir_all(path).await?;
    } else {
        fs::remove_file(path).await?;
    }
    Ok(())
}
