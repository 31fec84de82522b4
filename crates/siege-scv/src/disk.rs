//! On-disk stream store.
//!
//! ```text
//! <root>/<stream_id>/
//!   files/                       seed files
//!   buffer_files/                frames received since the last checkpoint
//!     checkpoint_files/          written by a checkpoint just before commit
//!   <N>/                         committed frameset ending at frame N
//!     checkpoint_files/
//!   error_log.txt
//! ```
//!
//! A checkpoint commits by renaming `buffer_files/` to `<N>/`, a single
//! directory rename.

use std::collections::BTreeMap;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use flate2::read::GzDecoder;
use serde::Serialize;
use siege_core::StreamId;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::error::{Result, ScvError};

const SEED_DIR: &str = "files";
const BUFFER_DIR: &str = "buffer_files";
const CHECKPOINT_DIR: &str = "checkpoint_files";
const ERROR_LOG: &str = "error_log.txt";

/// Decoded file payloads keyed by file name.
pub type FileMap = BTreeMap<String, Vec<u8>>;

/// What `GET /streams/sync/:id` reports.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncListing {
    /// Committed framesets, ascending.
    pub partitions: Vec<i64>,
    /// Frame file names found in any frameset.
    pub frame_files: Vec<String>,
    /// Checkpoint file names of the latest frameset.
    pub checkpoint_files: Vec<String>,
    /// Seed file names.
    pub seed_files: Vec<String>,
}

/// Root of the per-SCV stream directories.
#[derive(Debug, Clone)]
pub struct StreamFiles {
    root: PathBuf,
}

impl StreamFiles {
    /// Use `root` as the stream store, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    /// Directory of one stream.
    #[must_use]
    pub fn stream_dir(&self, id: &StreamId) -> PathBuf {
        self.root.join(id.to_string())
    }

    fn seed_dir(&self, id: &StreamId) -> PathBuf {
        self.stream_dir(id).join(SEED_DIR)
    }

    fn buffer_dir(&self, id: &StreamId) -> PathBuf {
        self.stream_dir(id).join(BUFFER_DIR)
    }

    fn frameset_dir(&self, id: &StreamId, frames: i64) -> PathBuf {
        self.stream_dir(id).join(frames.to_string())
    }

    // =========================================================================
    // Seed files
    // =========================================================================

    /// Create the stream directory with its seed files.
    ///
    /// # Errors
    ///
    /// Returns an error on a bad file name or filesystem failure.
    pub async fn create(&self, id: &StreamId, seeds: &FileMap) -> Result<()> {
        let dir = self.seed_dir(id);
        fs::create_dir_all(&dir).await?;
        write_all(&dir, seeds).await
    }

    /// Overwrite (or add) seed files.
    ///
    /// # Errors
    ///
    /// Returns an error on a bad file name or filesystem failure.
    pub async fn write_seeds(&self, id: &StreamId, seeds: &FileMap) -> Result<()> {
        let dir = self.seed_dir(id);
        if !is_dir(&dir).await {
            return Err(ScvError::stream_not_found(id));
        }
        write_all(&dir, seeds).await
    }

    // =========================================================================
    // Frames and checkpoints
    // =========================================================================

    /// Append frame data to the buffer.
    ///
    /// # Errors
    ///
    /// Returns an error on a bad file name or filesystem failure.
    pub async fn append_frame(&self, id: &StreamId, files: &FileMap) -> Result<()> {
        let dir = self.buffer_dir(id);
        fs::create_dir_all(&dir).await?;
        for (name, data) in files {
            let path = dir.join(checked_name(name)?);
            let mut file = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await?;
            file.write_all(data).await?;
            file.flush().await?;
        }
        Ok(())
    }

    /// Store checkpoint files in the buffer and promote it to the frameset
    /// `<frames_after>/`.
    ///
    /// # Errors
    ///
    /// Returns an error on a bad file name, an existing frameset of the same
    /// number, or filesystem failure.
    pub async fn commit(&self, id: &StreamId, checkpoint: &FileMap, frames_after: i64) -> Result<()> {
        let buffer = self.buffer_dir(id);
        let staging = buffer.join(CHECKPOINT_DIR);
        fs::create_dir_all(&staging).await?;
        write_all(&staging, checkpoint).await?;

        let target = self.frameset_dir(id, frames_after);
        if is_dir(&target).await {
            return Err(ScvError::Internal(format!(
                "frameset {frames_after} of {id} already exists"
            )));
        }
        fs::rename(&buffer, &target).await?;
        Ok(())
    }

    /// Remove the buffer, if any.
    ///
    /// # Errors
    ///
    /// Returns an error on filesystem failure.
    pub async fn discard_buffer(&self, id: &StreamId) -> Result<()> {
        remove_dir_if_present(&self.buffer_dir(id)).await
    }

    /// Whether a buffer directory exists.
    pub async fn has_buffer(&self, id: &StreamId) -> bool {
        is_dir(&self.buffer_dir(id)).await
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Files a core needs to resume: seeds overlaid with the checkpoint of
    /// frameset `frames` (when `frames > 0`).
    ///
    /// # Errors
    ///
    /// Returns an error on filesystem failure.
    pub async fn resume_files(&self, id: &StreamId, frames: i64) -> Result<FileMap> {
        let mut out = read_all(&self.seed_dir(id)).await?;
        if frames > 0 {
            let checkpoint = self.frameset_dir(id, frames).join(CHECKPOINT_DIR);
            out.extend(read_all(&checkpoint).await?);
        }
        Ok(out)
    }

    /// Contents of a stream file: the seed file of that name if present,
    /// else the concatenation of that file across framesets in ascending
    /// order. `None` if neither exists.
    ///
    /// # Errors
    ///
    /// Returns `ScvError::BadRequest` for names that would leave the stream
    /// directory.
    pub async fn download(&self, id: &StreamId, name: &str) -> Result<Option<Vec<u8>>> {
        let name = checked_name(name)?;
        if let Some(data) = read_optional(&self.seed_dir(id).join(name)).await? {
            return Ok(Some(data));
        }
        let mut found = false;
        let mut out = Vec::new();
        for n in self.framesets(id).await? {
            if let Some(data) = read_optional(&self.frameset_dir(id, n).join(name)).await? {
                found = true;
                out.extend_from_slice(&data);
            }
        }
        Ok(found.then_some(out))
    }

    /// Committed frameset numbers, ascending.
    ///
    /// # Errors
    ///
    /// Returns an error on filesystem failure.
    pub async fn framesets(&self, id: &StreamId) -> Result<Vec<i64>> {
        let mut out: Vec<i64> = list_dir(&self.stream_dir(id))
            .await?
            .into_iter()
            .filter(|(_, is_dir)| *is_dir)
            .filter_map(|(name, _)| name.parse::<i64>().ok())
            .filter(|n| *n > 0)
            .collect();
        out.sort_unstable();
        Ok(out)
    }

    /// The largest committed frameset, 0 if there is none.
    ///
    /// # Errors
    ///
    /// Returns an error on filesystem failure.
    pub async fn largest_frameset(&self, id: &StreamId) -> Result<i64> {
        Ok(self.framesets(id).await?.last().copied().unwrap_or(0))
    }

    /// Layout summary for mirroring a stream.
    ///
    /// # Errors
    ///
    /// Returns an error on filesystem failure.
    pub async fn sync_listing(&self, id: &StreamId) -> Result<SyncListing> {
        let partitions = self.framesets(id).await?;
        let mut frame_files = std::collections::BTreeSet::new();
        for n in &partitions {
            for (name, is_dir) in list_dir(&self.frameset_dir(id, *n)).await? {
                if !is_dir {
                    frame_files.insert(name);
                }
            }
        }
        let checkpoint_files = match partitions.last() {
            Some(n) => file_names(&self.frameset_dir(id, *n).join(CHECKPOINT_DIR)).await?,
            None => Vec::new(),
        };
        Ok(SyncListing {
            partitions,
            frame_files: frame_files.into_iter().collect(),
            checkpoint_files,
            seed_files: file_names(&self.seed_dir(id)).await?,
        })
    }

    /// Names of every stream directory under the root.
    ///
    /// # Errors
    ///
    /// Returns an error on filesystem failure.
    pub async fn stream_dirs(&self) -> Result<Vec<String>> {
        Ok(list_dir(&self.root)
            .await?
            .into_iter()
            .filter(|(_, is_dir)| *is_dir)
            .map(|(name, _)| name)
            .collect())
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Append a timestamped message to the stream's error log.
    ///
    /// # Errors
    ///
    /// Returns an error on filesystem failure.
    pub async fn append_error(&self, id: &StreamId, message: &str) -> Result<()> {
        let path = self.stream_dir(id).join(ERROR_LOG);
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        let stamp = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
        let entry = format!("{stamp}\n{}\n", message.trim_end());
        file.write_all(entry.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Remove the stream directory entirely.
    ///
    /// # Errors
    ///
    /// Returns an error on filesystem failure.
    pub async fn remove(&self, id: &StreamId) -> Result<()> {
        remove_dir_if_present(&self.stream_dir(id)).await
    }
}

// =============================================================================
// Names and payload decoding
// =============================================================================

/// Reject names that are empty, special or contain a path separator.
///
/// # Errors
///
/// Returns `ScvError::BadRequest` for an unsafe name.
pub fn checked_name(name: &str) -> Result<&str> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0'])
        || name == CHECKPOINT_DIR;
    if bad {
        return Err(ScvError::BadRequest(format!("invalid file name {name:?}")));
    }
    Ok(name)
}

/// Decode a seed file: the content is base64 and a trailing `.b64` is
/// dropped from the name.
///
/// # Errors
///
/// Returns `ScvError::BadRequest` on a bad name or bad base64.
pub fn decode_seed(name: &str, content: &str) -> Result<(String, Vec<u8>)> {
    let stored = name.strip_suffix(".b64").unwrap_or(name);
    checked_name(stored)?;
    let data = STANDARD
        .decode(content.trim())
        .map_err(|e| ScvError::BadRequest(format!("{name}: {e}")))?;
    Ok((stored.to_string(), data))
}

/// Decode a frame or checkpoint payload. `.b64` means base64, then `.gz`
/// means gzip, each stripped from the name in that order. Without `.b64`
/// the content is taken literally.
///
/// # Errors
///
/// Returns `ScvError::BadRequest` on a bad name, bad base64 or bad gzip.
pub fn decode_payload(name: &str, content: &str) -> Result<(String, Vec<u8>)> {
    let (mut stored, mut data) = match name.strip_suffix(".b64") {
        Some(rest) => (
            rest,
            STANDARD
                .decode(content.trim())
                .map_err(|e| ScvError::BadRequest(format!("{name}: {e}")))?,
        ),
        None => (name, content.as_bytes().to_vec()),
    };
    if let Some(rest) = stored.strip_suffix(".gz") {
        let mut inflated = Vec::new();
        GzDecoder::new(data.as_slice())
            .read_to_end(&mut inflated)
            .map_err(|e| ScvError::BadRequest(format!("{name}: {e}")))?;
        stored = rest;
        data = inflated;
    }
    checked_name(stored)?;
    Ok((stored.to_string(), data))
}

/// Decode every entry of a payload map with [`decode_payload`].
///
/// # Errors
///
/// Returns the first decoding error.
pub fn decode_payloads(files: &BTreeMap<String, String>) -> Result<FileMap> {
    files
        .iter()
        .map(|(name, content)| decode_payload(name, content))
        .collect()
}

/// Decode every entry of a seed map with [`decode_seed`].
///
/// # Errors
///
/// Returns the first decoding error.
pub fn decode_seeds(files: &BTreeMap<String, String>) -> Result<FileMap> {
    files
        .iter()
        .map(|(name, content)| decode_seed(name, content))
        .collect()
}

/// Base64-encode every entry of a file map.
#[must_use]
pub fn encode_files(files: FileMap) -> BTreeMap<String, String> {
    files
        .into_iter()
        .map(|(name, data)| (name, STANDARD.encode(data)))
        .collect()
}

// =============================================================================
// Filesystem helpers
// =============================================================================

async fn write_all(dir: &Path, files: &FileMap) -> Result<()> {
    for (name, data) in files {
        fs::write(dir.join(checked_name(name)?), data).await?;
    }
    Ok(())
}

async fn read_all(dir: &Path) -> Result<FileMap> {
    let mut out = FileMap::new();
    for (name, is_dir) in list_dir(dir).await? {
        if !is_dir {
            let data = fs::read(dir.join(&name)).await?;
            out.insert(name, data);
        }
    }
    Ok(out)
}

async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path).await {
        Ok(data) => Ok(Some(data)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn file_names(dir: &Path) -> Result<Vec<String>> {
    let mut names: Vec<String> = list_dir(dir)
        .await?
        .into_iter()
        .filter(|(_, is_dir)| !*is_dir)
        .map(|(name, _)| name)
        .collect();
    names.sort();
    Ok(names)
}

/// Entries of `dir` as `(name, is_dir)`. A missing directory is empty.
async fn list_dir(dir: &Path) -> Result<Vec<(String, bool)>> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut out = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        let is_dir = entry.file_type().await?.is_dir();
        out.push((name, is_dir));
    }
    Ok(out)
}

async fn is_dir(path: &Path) -> bool {
    fs::metadata(path).await.is_ok_and(|m| m.is_dir())
}

async fn remove_dir_if_present(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
