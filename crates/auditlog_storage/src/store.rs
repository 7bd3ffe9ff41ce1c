//! Segment store management.
//!
//! A [`SegmentStore`] persists opaque blobs into append-only segment files
//! grouped by destination. It handles:
//! - Framing (`len: u32 LE || payload`) so readers can re-chunk the file
//! - Size-triggered rotation (`<dest>_0.log`, `<dest>_1.log`, ...)
//! - A bounded LRU cache of open file handles
//! - Retry with exponential backoff on I/O failures, keeping frames atomic
//!
//! Each destination is guarded by its own mutex held in a shared map; that
//! mutex is the serialization point for writes, rotation, and eviction of the
//! destination's state. A separate short-lived lock guards only the LRU
//! recency table.

use crate::error::{StorageError, StorageResult};
use parking_lot::{Mutex, RwLock};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Size of the frame header (payload length, little-endian).
pub const FRAME_HEADER_SIZE: usize = 4;

/// Tuning knobs for a segment store.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Maximum segment size before rotation.
    pub max_segment_size: u64,
    /// Write buffer capacity per open segment.
    pub buffer_size: usize,
    /// Maximum number of concurrently open segment files.
    pub max_open_files: usize,
    /// Maximum write/flush attempts before an error surfaces.
    pub max_attempts: u32,
    /// Base delay for exponential retry backoff.
    pub base_retry_delay: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            max_segment_size: 100 * 1024 * 1024,
            buffer_size: 64 * 1024,
            max_open_files: 128,
            max_attempts: 5,
            base_retry_delay: Duration::from_millis(1),
        }
    }
}

/// Metadata recorded for a segment sealed by rotation.
#[derive(Debug, Clone)]
pub struct SegmentMetadata {
    /// Path of the sealed segment file.
    pub path: PathBuf,
    /// Final size in bytes.
    pub size: u64,
    /// Hex-encoded SHA-256 of the segment contents.
    pub sha256: String,
    /// Wall-clock time the segment was sealed.
    pub sealed_at: SystemTime,
}

/// Per-destination segment state.
///
/// `size` is the logical segment length including bytes still sitting in the
/// write buffer; `flushed` is the length known to have reached the OS. The
/// entry outlives handle eviction, so `index`/`size` survive a close and the
/// next write resumes at the correct offset.
struct Destination {
    name: String,
    scanned: bool,
    index: u64,
    size: u64,
    flushed: u64,
    writer: Option<BufWriter<File>>,
    digest: Sha256,
}

impl Destination {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            scanned: false,
            index: 0,
            size: 0,
            flushed: 0,
            writer: None,
            digest: Sha256::new(),
        }
    }
}

/// Recency bookkeeping for open handles.
struct LruState {
    tick: u64,
    open: HashMap<String, u64>,
}

/// Persists encoded blobs into size-bounded segment files grouped by
/// destination.
///
/// Writes are frame-atomic: either the whole `len || blob` frame lands in the
/// current segment (possibly after rotation) or the file is left at its
/// previous frame boundary.
pub struct SegmentStore {
    base_path: PathBuf,
    base_filename: String,
    opts: StoreOptions,
    destinations: RwLock<HashMap<String, Arc<Mutex<Destination>>>>,
    lru: Mutex<LruState>,
    completed: Mutex<Vec<SegmentMetadata>>,
    closed: AtomicBool,
}

impl SegmentStore {
    /// Creates a store rooted at `base_path`, creating the directory if
    /// needed.
    ///
    /// `base_filename` names the segment family used when a write carries no
    /// explicit destination.
    ///
    /// # Errors
    ///
    /// Returns an error if the options are unusable, `base_filename` is not a
    /// safe relative stem, or the directory cannot be created.
    pub fn new(
        base_path: impl Into<PathBuf>,
        base_filename: impl Into<String>,
        opts: StoreOptions,
    ) -> StorageResult<Self> {
        if opts.max_open_files == 0 {
            return Err(StorageError::invalid_options("max_open_files must be > 0"));
        }
        if opts.max_attempts == 0 {
            return Err(StorageError::invalid_options("max_attempts must be > 0"));
        }
        let base_path = base_path.into();
        let base_filename = base_filename.into();
        sanitize(&base_filename)?;
        fs::create_dir_all(&base_path)?;

        Ok(Self {
            base_path,
            base_filename,
            opts,
            destinations: RwLock::new(HashMap::new()),
            lru: Mutex::new(LruState {
                tick: 0,
                open: HashMap::new(),
            }),
            completed: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        })
    }

    /// Returns the directory segments are written under.
    #[must_use]
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Appends `blob` as one frame to the destination's current segment.
    ///
    /// A missing destination routes to the default family (`base_filename`).
    /// Returns the offset the frame starts at within its segment.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is closed, the destination is invalid,
    /// the blob exceeds the frame limit, or I/O fails after all retries. On a
    /// surfaced I/O error the destination's handle is dropped from the cache
    /// so the next write re-opens the file.
    pub fn write(&self, destination: Option<&str>, blob: &[u8]) -> StorageResult<u64> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StorageError::Closed);
        }
        let name = self.resolve_destination(destination)?;
        let entry = self.destination_entry(&name);
        let mut dest = entry.lock();

        self.ensure_open(&mut dest)?;

        let frame_len = FRAME_HEADER_SIZE as u64 + blob.len() as u64;
        if dest.size > 0 && dest.size + frame_len > self.opts.max_segment_size {
            self.rotate(&mut dest)?;
        }

        let offset = dest.size;
        self.append_frame(&mut dest, blob)?;
        self.touch(&name);
        Ok(offset)
    }

    /// Flushes buffered writes to the OS.
    ///
    /// With a destination, flushes that segment only; otherwise flushes every
    /// open segment.
    ///
    /// # Errors
    ///
    /// Returns the first flush error encountered; remaining destinations are
    /// still flushed.
    pub fn flush(&self, destination: Option<&str>) -> StorageResult<()> {
        match destination {
            Some(dest) => {
                let name = self.resolve_destination(Some(dest))?;
                let entry = self.destinations.read().get(&name).cloned();
                if let Some(entry) = entry {
                    self.flush_destination(&mut entry.lock())?;
                }
                Ok(())
            }
            None => self.flush_all(),
        }
    }

    /// Flushes every open segment.
    ///
    /// # Errors
    ///
    /// Returns the first flush error encountered; remaining destinations are
    /// still flushed.
    pub fn flush_all(&self) -> StorageResult<()> {
        let mut first_err = None;
        for entry in self.all_destinations() {
            let mut dest = entry.lock();
            if let Err(e) = self.flush_destination(&mut dest) {
                tracing::warn!(destination = %dest.name, error = %e, "segment flush failed");
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Flushes and fsyncs every open segment.
    ///
    /// # Errors
    ///
    /// Returns the first error encountered.
    pub fn sync_all(&self) -> StorageResult<()> {
        let mut first_err = None;
        for entry in self.all_destinations() {
            let mut dest = entry.lock();
            if let Err(e) = self.sync_destination(&mut dest) {
                tracing::warn!(destination = %dest.name, error = %e, "segment sync failed");
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Flushes, fsyncs, and closes every open segment, then rejects further
    /// writes. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns the first error encountered; every handle is closed regardless.
    pub fn close_all(&self) -> StorageResult<()> {
        self.closed.store(true, Ordering::Release);
        let mut first_err = None;
        for entry in self.all_destinations() {
            let mut dest = entry.lock();
            if let Err(e) = self.sync_destination(&mut dest) {
                tracing::warn!(destination = %dest.name, error = %e, "segment close failed");
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
            if dest.writer.take().is_some() {
                self.release_open_slot(&dest.name);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Returns metadata for every segment sealed by rotation so far.
    #[must_use]
    pub fn completed_segments(&self) -> Vec<SegmentMetadata> {
        self.completed.lock().clone()
    }

    /// Returns the number of currently open segment files.
    #[must_use]
    pub fn open_file_count(&self) -> usize {
        self.lru.lock().open.len()
    }

    fn all_destinations(&self) -> Vec<Arc<Mutex<Destination>>> {
        self.destinations.read().values().cloned().collect()
    }

    fn destination_entry(&self, name: &str) -> Arc<Mutex<Destination>> {
        if let Some(entry) = self.destinations.read().get(name) {
            return Arc::clone(entry);
        }
        let mut map = self.destinations.write();
        Arc::clone(
            map.entry(name.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(Destination::new(name)))),
        )
    }

    fn resolve_destination(&self, destination: Option<&str>) -> StorageResult<String> {
        match destination {
            Some(dest) => {
                sanitize(dest)?;
                Ok(dest.to_string())
            }
            None => Ok(self.base_filename.clone()),
        }
    }

    fn segment_path(&self, name: &str, index: u64) -> PathBuf {
        self.base_path.join(format!("{name}_{index}.log"))
    }

    fn retry_delay(&self, attempt: u32) -> Duration {
        self.opts
            .base_retry_delay
            .saturating_mul(1u32 << attempt.min(16))
    }

    /// Opens the destination's current segment if it is cold, evicting the
    /// least recently used handle when the cache is at capacity.
    fn ensure_open(&self, dest: &mut Destination) -> StorageResult<()> {
        if dest.writer.is_some() {
            return Ok(());
        }
        self.reserve_open_slot(&dest.name);
        if let Err(e) = self.open_current_segment(dest) {
            self.release_open_slot(&dest.name);
            return Err(e);
        }
        Ok(())
    }

    fn open_current_segment(&self, dest: &mut Destination) -> StorageResult<()> {
        if !dest.scanned {
            let (index, size) = self.discover(&dest.name)?;
            dest.index = index;
            dest.size = size;
            dest.flushed = size;
            if size > 0 {
                dest.digest = hash_file(&self.segment_path(&dest.name, index))?;
            }
            dest.scanned = true;
        }

        let path = self.segment_path(&dest.name, dest.index);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        dest.writer = Some(BufWriter::with_capacity(self.opts.buffer_size, file));
        Ok(())
    }

    /// Scans the destination's directory for the highest existing segment
    /// index. Runs once per destination; the result is memoized in the entry.
    fn discover(&self, name: &str) -> StorageResult<(u64, u64)> {
        let stem_path = self.base_path.join(name);
        let dir = stem_path
            .parent()
            .map_or_else(|| self.base_path.clone(), Path::to_path_buf);
        let stem = stem_path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or(name)
            .to_string();
        let prefix = format!("{stem}_");

        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((0, 0)),
            Err(e) => return Err(e.into()),
        };

        let mut best: Option<(u64, PathBuf)> = None;
        for entry in entries {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            let Some(rest) = file_name.strip_prefix(&prefix) else {
                continue;
            };
            let Some(digits) = rest.strip_suffix(".log") else {
                continue;
            };
            let Ok(index) = digits.parse::<u64>() else {
                continue;
            };
            if best.as_ref().map_or(true, |&(b, _)| index > b) {
                best = Some((index, entry.path()));
            }
        }

        match best {
            Some((index, path)) => Ok((index, fs::metadata(&path)?.len())),
            None => Ok((0, 0)),
        }
    }

    /// Registers `name` as open, evicting LRU victims until a slot is free.
    ///
    /// Victims are taken with `try_lock`; a destination another writer holds
    /// is simply skipped, so no nested blocking lock is ever taken.
    fn reserve_open_slot(&self, name: &str) {
        loop {
            let victims: Vec<String> = {
                let mut lru = self.lru.lock();
                if lru.open.contains_key(name) {
                    return;
                }
                if lru.open.len() < self.opts.max_open_files {
                    lru.tick += 1;
                    let tick = lru.tick;
                    lru.open.insert(name.to_string(), tick);
                    return;
                }
                let mut candidates: Vec<(String, u64)> = lru
                    .open
                    .iter()
                    .map(|(dest, &tick)| (dest.clone(), tick))
                    .collect();
                candidates.sort_by_key(|&(_, tick)| tick);
                candidates.into_iter().map(|(dest, _)| dest).collect()
            };

            let mut evicted = false;
            for victim in victims {
                let entry = self.destinations.read().get(&victim).cloned();
                let Some(entry) = entry else {
                    // recency entry with no destination state; drop it
                    self.lru.lock().open.remove(&victim);
                    evicted = true;
                    break;
                };
                let did_evict = {
                    if let Some(mut dest) = entry.try_lock() {
                        if let Err(e) = self.evict(&mut dest) {
                            tracing::warn!(
                                destination = %dest.name,
                                error = %e,
                                "flush failed while evicting segment handle"
                            );
                        }
                        true
                    } else {
                        false
                    }
                };
                if did_evict {
                    evicted = true;
                    break;
                }
            }

            if !evicted {
                // every open handle is mid-write; wait for one to finish
                std::thread::yield_now();
            }
        }
    }

    fn release_open_slot(&self, name: &str) {
        self.lru.lock().open.remove(name);
    }

    fn touch(&self, name: &str) {
        let mut lru = self.lru.lock();
        lru.tick += 1;
        let tick = lru.tick;
        if let Some(entry) = lru.open.get_mut(name) {
            *entry = tick;
        }
    }

    /// Closes a destination's handle, preserving its index/size for reopening.
    fn evict(&self, dest: &mut Destination) -> StorageResult<()> {
        let result = self.flush_destination(dest);
        dest.writer = None;
        self.release_open_slot(&dest.name);
        result
    }

    /// Flushes the destination's write buffer with retries.
    ///
    /// On persistent failure the handle is dropped and the file truncated back
    /// to the last fully flushed frame boundary, so no torn frame survives.
    fn flush_destination(&self, dest: &mut Destination) -> StorageResult<()> {
        if dest.writer.is_none() {
            return Ok(());
        }
        let mut attempt = 0u32;
        loop {
            let writer = match dest.writer.as_mut() {
                Some(writer) => writer,
                None => return Ok(()),
            };
            match writer.flush() {
                Ok(()) => {
                    dest.flushed = dest.size;
                    return Ok(());
                }
                Err(e) => {
                    attempt += 1;
                    if attempt >= self.opts.max_attempts {
                        self.drop_handle_truncated(dest);
                        return Err(e.into());
                    }
                    std::thread::sleep(self.retry_delay(attempt - 1));
                }
            }
        }
    }

    fn sync_destination(&self, dest: &mut Destination) -> StorageResult<()> {
        self.flush_destination(dest)?;
        if let Some(writer) = dest.writer.as_ref() {
            if let Err(e) = writer.get_ref().sync_all() {
                self.drop_handle_truncated(dest);
                return Err(e.into());
            }
        }
        Ok(())
    }

    /// Drops the handle without flushing, truncating the file to the last
    /// known-good frame boundary. Buffered frames past that boundary are lost;
    /// the caller surfaces or logs the originating error.
    fn drop_handle_truncated(&self, dest: &mut Destination) {
        if let Some(writer) = dest.writer.take() {
            let (file, _lost) = writer.into_parts();
            if let Err(e) = file.set_len(dest.flushed) {
                tracing::warn!(
                    destination = %dest.name,
                    error = %e,
                    "failed to truncate segment after write error"
                );
            }
            dest.size = dest.flushed;
            // the running digest no longer matches the truncated file
            if let Ok(digest) = hash_file(&self.segment_path(&dest.name, dest.index)) {
                dest.digest = digest;
            }
        }
        self.release_open_slot(&dest.name);
    }

    /// Seals the current segment and opens the next one in the family.
    fn rotate(&self, dest: &mut Destination) -> StorageResult<()> {
        self.sync_destination(dest)?;
        dest.writer = None;

        let digest = std::mem::replace(&mut dest.digest, Sha256::new());
        let metadata = SegmentMetadata {
            path: self.segment_path(&dest.name, dest.index),
            size: dest.size,
            sha256: to_hex(&digest.finalize()),
            sealed_at: SystemTime::now(),
        };
        self.completed.lock().push(metadata);

        dest.index += 1;
        dest.size = 0;
        dest.flushed = 0;

        // the open slot stays reserved for the new segment
        if let Err(e) = self.open_current_segment(dest) {
            self.release_open_slot(&dest.name);
            return Err(e);
        }
        Ok(())
    }

    /// Appends one `len || blob` frame, retrying transient failures.
    ///
    /// Frames never straddle an error: small frames are staged entirely in
    /// the write buffer after making room, oversized frames bypass the buffer
    /// and truncate back to the frame start before each retry.
    fn append_frame(&self, dest: &mut Destination, blob: &[u8]) -> StorageResult<()> {
        let len = u32::try_from(blob.len())
            .map_err(|_| StorageError::BlobTooLarge { len: blob.len() })?;
        let header = len.to_le_bytes();
        let frame_len = FRAME_HEADER_SIZE + blob.len();

        let capacity = match dest.writer.as_ref() {
            Some(writer) => writer.capacity(),
            None => return Err(not_open()),
        };

        if frame_len <= capacity {
            let buffered = dest
                .writer
                .as_ref()
                .map_or(0, |writer| writer.buffer().len());
            if capacity - buffered < frame_len {
                self.flush_destination(dest)?;
            }
            let writer = dest.writer.as_mut().ok_or_else(not_open)?;
            let result = (|| {
                writer.write_all(&header)?;
                writer.write_all(blob)
            })();
            if let Err(e) = result {
                // cannot happen with room in the buffer, but stay frame-atomic
                self.drop_handle_truncated(dest);
                return Err(e.into());
            }
        } else {
            // oversized frame: drain the buffer, then write straight through
            self.flush_destination(dest)?;
            let mut attempt = 0u32;
            loop {
                let writer = dest.writer.as_mut().ok_or_else(not_open)?;
                let file = writer.get_mut();
                let result = (|| {
                    file.write_all(&header)?;
                    file.write_all(blob)
                })();
                match result {
                    Ok(()) => break,
                    Err(e) => {
                        attempt += 1;
                        let file = dest.writer.as_mut().ok_or_else(not_open)?.get_mut();
                        if let Err(trunc_err) = file.set_len(dest.flushed) {
                            tracing::warn!(
                                destination = %dest.name,
                                error = %trunc_err,
                                "failed to truncate partial frame"
                            );
                            self.drop_handle_truncated(dest);
                            return Err(e.into());
                        }
                        if attempt >= self.opts.max_attempts {
                            self.drop_handle_truncated(dest);
                            return Err(e.into());
                        }
                        std::thread::sleep(self.retry_delay(attempt - 1));
                    }
                }
            }
            dest.flushed = dest.size + frame_len as u64;
        }

        dest.size += frame_len as u64;
        dest.digest.update(header);
        dest.digest.update(blob);
        Ok(())
    }
}

impl std::fmt::Debug for SegmentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentStore")
            .field("base_path", &self.base_path)
            .field("base_filename", &self.base_filename)
            .field("max_segment_size", &self.opts.max_segment_size)
            .field("open_files", &self.open_file_count())
            .finish_non_exhaustive()
    }
}

fn not_open() -> StorageError {
    StorageError::Io(io::Error::new(
        io::ErrorKind::NotConnected,
        "segment file is not open",
    ))
}

/// Rejects destination stems that could escape the base directory.
fn sanitize(name: &str) -> StorageResult<()> {
    if name.is_empty() {
        return Err(StorageError::invalid_destination(name, "empty name"));
    }
    if name.contains('\\') {
        return Err(StorageError::invalid_destination(
            name,
            "backslash separators are not allowed",
        ));
    }
    if name.starts_with('/') {
        return Err(StorageError::invalid_destination(
            name,
            "absolute paths are not allowed",
        ));
    }
    for segment in name.split('/') {
        if segment.is_empty() {
            return Err(StorageError::invalid_destination(
                name,
                "empty path segment",
            ));
        }
        if segment == "." || segment == ".." {
            return Err(StorageError::invalid_destination(
                name,
                "path traversal segments are not allowed",
            ));
        }
    }
    Ok(())
}

fn hash_file(path: &Path) -> io::Result<Sha256> {
    let mut digest = Sha256::new();
    let mut file = File::open(path)?;
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        digest.update(&buf[..n]);
    }
    Ok(digest)
}

fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn small_options() -> StoreOptions {
        StoreOptions {
            max_segment_size: 256,
            buffer_size: 64,
            max_open_files: 4,
            ..StoreOptions::default()
        }
    }

    fn read_frames(path: &Path) -> Vec<Vec<u8>> {
        let data = fs::read(path).unwrap();
        let mut frames = Vec::new();
        let mut offset = 0;
        while offset + FRAME_HEADER_SIZE <= data.len() {
            let len = u32::from_le_bytes([
                data[offset],
                data[offset + 1],
                data[offset + 2],
                data[offset + 3],
            ]) as usize;
            offset += FRAME_HEADER_SIZE;
            frames.push(data[offset..offset + len].to_vec());
            offset += len;
        }
        assert_eq!(offset, data.len(), "trailing garbage in segment");
        frames
    }

    #[test]
    fn write_and_read_single_frame() {
        let dir = tempdir().unwrap();
        let store = SegmentStore::new(dir.path(), "default", StoreOptions::default()).unwrap();

        let offset = store.write(None, b"hello frames").unwrap();
        assert_eq!(offset, 0);
        store.close_all().unwrap();

        let frames = read_frames(&dir.path().join("default_0.log"));
        assert_eq!(frames, vec![b"hello frames".to_vec()]);
    }

    #[test]
    fn explicit_destination_routes_to_own_family() {
        let dir = tempdir().unwrap();
        let store = SegmentStore::new(dir.path(), "default", StoreOptions::default()).unwrap();

        store.write(Some("alpha"), b"a").unwrap();
        store.write(Some("beta"), b"b").unwrap();
        store.write(None, b"d").unwrap();
        store.close_all().unwrap();

        assert_eq!(read_frames(&dir.path().join("alpha_0.log")), vec![b"a".to_vec()]);
        assert_eq!(read_frames(&dir.path().join("beta_0.log")), vec![b"b".to_vec()]);
        assert_eq!(
            read_frames(&dir.path().join("default_0.log")),
            vec![b"d".to_vec()]
        );
    }

    #[test]
    fn subdirectory_destinations_are_created() {
        let dir = tempdir().unwrap();
        let store = SegmentStore::new(dir.path(), "default", StoreOptions::default()).unwrap();

        store.write(Some("tenant/eu/audit"), b"x").unwrap();
        store.close_all().unwrap();

        assert!(dir.path().join("tenant/eu/audit_0.log").exists());
    }

    #[test]
    fn rotation_on_size_limit() {
        let dir = tempdir().unwrap();
        let store = SegmentStore::new(dir.path(), "default", small_options()).unwrap();

        // 100-byte blobs: two fit under 256 with headers, the third rotates
        for _ in 0..3 {
            store.write(None, &[0xAAu8; 100]).unwrap();
        }
        store.close_all().unwrap();

        let first = fs::metadata(dir.path().join("default_0.log")).unwrap().len();
        let second = fs::metadata(dir.path().join("default_1.log")).unwrap().len();
        assert_eq!(first, 208);
        assert_eq!(second, 104);
    }

    #[test]
    fn segments_never_exceed_limit_except_oversized_frame() {
        let dir = tempdir().unwrap();
        let store = SegmentStore::new(dir.path(), "default", small_options()).unwrap();

        store.write(None, &[1u8; 100]).unwrap();
        // larger than max_segment_size: accepted as a lone frame after rotation
        store.write(None, &[2u8; 1000]).unwrap();
        store.write(None, &[3u8; 10]).unwrap();
        store.close_all().unwrap();

        let frames0 = read_frames(&dir.path().join("default_0.log"));
        let frames1 = read_frames(&dir.path().join("default_1.log"));
        let frames2 = read_frames(&dir.path().join("default_2.log"));
        assert_eq!(frames0.len(), 1);
        assert_eq!(frames1.len(), 1);
        assert_eq!(frames1[0].len(), 1000);
        assert_eq!(frames2, vec![vec![3u8; 10]]);
    }

    #[test]
    fn oversized_blob_on_empty_segment_is_single_frame() {
        let dir = tempdir().unwrap();
        let store = SegmentStore::new(dir.path(), "default", small_options()).unwrap();

        store.write(None, &[7u8; 5000]).unwrap();
        store.close_all().unwrap();

        let frames = read_frames(&dir.path().join("default_0.log"));
        assert_eq!(frames, vec![vec![7u8; 5000]]);
        assert!(!dir.path().join("default_1.log").exists());
    }

    #[test]
    fn open_file_cap_is_respected() {
        let dir = tempdir().unwrap();
        let store = SegmentStore::new(dir.path(), "default", small_options()).unwrap();

        for i in 0..20 {
            let dest = format!("dest{i}");
            store.write(Some(dest.as_str()), b"payload").unwrap();
            assert!(store.open_file_count() <= 4);
        }
        store.close_all().unwrap();
        assert_eq!(store.open_file_count(), 0);

        // every destination's data survived eviction
        for i in 0..20 {
            let frames = read_frames(&dir.path().join(format!("dest{i}_0.log")));
            assert_eq!(frames, vec![b"payload".to_vec()]);
        }
    }

    #[test]
    fn evicted_destination_resumes_correctly() {
        let dir = tempdir().unwrap();
        let mut opts = small_options();
        opts.max_open_files = 1;
        let store = SegmentStore::new(dir.path(), "default", opts).unwrap();

        store.write(Some("a"), b"first").unwrap();
        store.write(Some("b"), b"other").unwrap(); // evicts "a"
        store.write(Some("a"), b"second").unwrap(); // reopens "a"
        store.close_all().unwrap();

        let frames = read_frames(&dir.path().join("a_0.log"));
        assert_eq!(frames, vec![b"first".to_vec(), b"second".to_vec()]);
    }

    #[test]
    fn index_discovery_across_reopen() {
        let dir = tempdir().unwrap();
        {
            let store = SegmentStore::new(dir.path(), "default", small_options()).unwrap();
            for _ in 0..3 {
                store.write(None, &[0u8; 100]).unwrap();
            }
            store.close_all().unwrap();
        }

        // a fresh store must continue in the highest existing segment
        let store = SegmentStore::new(dir.path(), "default", small_options()).unwrap();
        store.write(None, &[9u8; 10]).unwrap();
        store.close_all().unwrap();

        let frames = read_frames(&dir.path().join("default_1.log"));
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1], vec![9u8; 10]);
        assert!(!dir.path().join("default_2.log").exists());
    }

    #[test]
    fn traversal_destinations_rejected() {
        let dir = tempdir().unwrap();
        let store = SegmentStore::new(dir.path(), "default", StoreOptions::default()).unwrap();

        for bad in ["../escape", "a/../b", "/absolute", "a//b", "", "win\\path"] {
            assert!(
                matches!(
                    store.write(Some(bad), b"x"),
                    Err(StorageError::InvalidDestination { .. })
                ),
                "destination {bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn close_all_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = SegmentStore::new(dir.path(), "default", StoreOptions::default()).unwrap();
        store.write(None, b"x").unwrap();

        store.close_all().unwrap();
        store.close_all().unwrap();
        assert!(matches!(store.write(None, b"y"), Err(StorageError::Closed)));
    }

    #[test]
    fn completed_segments_record_hashes() {
        let dir = tempdir().unwrap();
        let store = SegmentStore::new(dir.path(), "default", small_options()).unwrap();

        for _ in 0..3 {
            store.write(None, &[5u8; 100]).unwrap();
        }
        store.close_all().unwrap();

        let completed = store.completed_segments();
        assert_eq!(completed.len(), 1);
        let sealed = &completed[0];
        assert_eq!(sealed.path, dir.path().join("default_0.log"));
        assert_eq!(sealed.size, 208);

        let mut digest = Sha256::new();
        digest.update(fs::read(&sealed.path).unwrap());
        assert_eq!(sealed.sha256, to_hex(&digest.finalize()));
    }

    #[test]
    fn zero_open_files_rejected() {
        let dir = tempdir().unwrap();
        let opts = StoreOptions {
            max_open_files: 0,
            ..StoreOptions::default()
        };
        assert!(matches!(
            SegmentStore::new(dir.path(), "default", opts),
            Err(StorageError::InvalidOptions { .. })
        ));
    }
}
