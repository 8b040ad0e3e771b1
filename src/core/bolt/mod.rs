//! Purpose: Read-only access to bbolt database files (the format etcd persists to).
//! Exports: `Db`, `OpenOptions`, `Bucket`, `Cursor`, page layout types, `SnapshotBuilder`.
//! Role: Ordered-iteration seam consumed by the store walker; no write path into live files.
//! Invariants: A shared advisory lock is held for the life of a `Db` and released on drop.
//! Invariants: Every page and element access is bounds-checked against the mapped file.
//! Invariants: Lock contention fails fast unless a bounded lock timeout is configured.
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use fs2::FileExt;
use libc::{EACCES, EPERM};
use memmap2::Mmap;

use crate::core::error::{Error, ErrorKind};

mod builder;
mod cursor;
pub mod page;

pub use builder::SnapshotBuilder;
pub use cursor::Cursor;
pub use page::{BranchElement, BucketHeader, LeafElement, Meta, Page};

use page::{BUCKET_HEADER_SIZE, META_SIZE, PAGE_HEADER_SIZE};

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(50);
const MIN_PAGE_SIZE: u32 = 512;
const MAX_PAGE_SIZE: u32 = 1 << 20;
// Where meta page 1 may live when meta page 0 is unreadable.
const FALLBACK_PAGE_SIZES: [usize; 5] = [4096, 8192, 16384, 32768, 65536];

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct OpenOptions {
    /// How long to wait for a conflicting writer to release the file.
    /// `None` fails immediately.
    pub lock_timeout: Option<Duration>,
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }
}

pub struct Db {
    path: PathBuf,
    file: File,
    mmap: Mmap,
    meta: Meta,
}

impl std::fmt::Debug for Db {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Db")
            .field("path", &self.path)
            .field("meta", &self.meta)
            .finish()
    }
}

impl Db {
    pub fn open(path: impl AsRef<Path>, options: &OpenOptions) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|err| open_error(err, &path))?;
        acquire_shared_lock(&file, &path, options.lock_timeout)?;

        let len = file
            .metadata()
            .map(|meta| meta.len())
            .map_err(|err| open_error(err, &path))?;
        if len < (PAGE_HEADER_SIZE + META_SIZE) as u64 {
            return Err(not_bolt(&path, "file too small"));
        }

        let mmap = unsafe { Mmap::map(&file).map_err(|err| open_error(err, &path))? };
        let meta = select_meta(&mmap).map_err(|err| err.or_path(&path))?;
        tracing::debug!(
            path = %path.display(),
            page_size = meta.page_size,
            txid = meta.txid,
            "opened bbolt file"
        );

        Ok(Self {
            path,
            file,
            mmap,
            meta,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn meta(&self) -> Meta {
        self.meta
    }

    pub fn page_size(&self) -> usize {
        self.meta.page_size as usize
    }

    pub fn page(&self, id: u64) -> Result<Page<'_>, Error> {
        let page_size = self.page_size();
        let corrupt = |message: &str| {
            Error::new(ErrorKind::Corrupt)
                .with_message(message)
                .with_page(id)
                .with_path(&self.path)
        };
        if id >= self.meta.pgid && self.meta.pgid != 0 {
            return Err(corrupt("page id beyond high water mark"));
        }
        let start = usize::try_from(id)
            .ok()
            .and_then(|id| id.checked_mul(page_size))
            .ok_or_else(|| corrupt("page offset overflow"))?;
        if start + PAGE_HEADER_SIZE > self.mmap.len() {
            return Err(corrupt("page outside file"));
        }

        let header = Page::parse(&self.mmap[start..start + PAGE_HEADER_SIZE])?;
        let span = (header.overflow as usize + 1)
            .checked_mul(page_size)
            .ok_or_else(|| corrupt("page overflow count too large"))?;
        let end = start
            .checked_add(span)
            .filter(|end| *end <= self.mmap.len())
            .ok_or_else(|| corrupt("page span outside file"))?;

        let page = Page::parse(&self.mmap[start..end])?;
        if page.id != id {
            return Err(corrupt("page id mismatch"));
        }
        Ok(page)
    }

    /// The top-level bucket holding all named buckets.
    pub fn root(&self) -> Bucket<'_> {
        Bucket {
            db: self,
            root: BucketRoot::Page(self.meta.root.root),
        }
    }

    pub fn bucket(&self, name: &[u8]) -> Result<Option<Bucket<'_>>, Error> {
        self.root().bucket(name)
    }
}

impl Drop for Db {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

#[derive(Clone, Copy, Debug)]
enum BucketRoot<'a> {
    Page(u64),
    Inline(Page<'a>),
}

#[derive(Clone, Copy, Debug)]
pub struct Bucket<'a> {
    db: &'a Db,
    root: BucketRoot<'a>,
}

impl<'a> Bucket<'a> {
    pub fn cursor(&self) -> Result<Cursor<'a>, Error> {
        let root = match self.root {
            BucketRoot::Page(id) => self.db.page(id)?,
            BucketRoot::Inline(page) => page,
        };
        Ok(Cursor::new(self.db, root))
    }

    pub fn bucket(&self, name: &[u8]) -> Result<Option<Bucket<'a>>, Error> {
        for element in self.cursor()? {
            let element = element?;
            if element.key != name {
                continue;
            }
            if !element.is_bucket() {
                return Ok(None);
            }
            let header = BucketHeader::decode(element.value).map_err(|err| err.with_key(name))?;
            let root = if header.is_inline() {
                BucketRoot::Inline(Page::parse(&element.value[BUCKET_HEADER_SIZE..])?)
            } else {
                BucketRoot::Page(header.root)
            };
            return Ok(Some(Bucket { db: self.db, root }));
        }
        Ok(None)
    }
}

fn select_meta(buf: &[u8]) -> Result<Meta, Error> {
    let page_size = detect_page_size(buf)?;
    let meta0 = read_meta(buf, 0);
    let meta1 = read_meta(buf, page_size);
    match (meta0, meta1) {
        (Ok(a), Ok(b)) => Ok(if b.txid > a.txid { b } else { a }),
        (Ok(meta), Err(_)) | (Err(_), Ok(meta)) => Ok(meta),
        (Err(err), Err(_)) => Err(err),
    }
}

fn detect_page_size(buf: &[u8]) -> Result<usize, Error> {
    let meta = match read_meta(buf, 0) {
        Ok(meta) => Ok(meta),
        Err(err) => FALLBACK_PAGE_SIZES
            .iter()
            .find_map(|offset| read_meta(buf, *offset).ok())
            .ok_or(err),
    }?;
    if !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&meta.page_size) {
        return Err(Error::new(ErrorKind::Open).with_message("implausible page size in meta"));
    }
    Ok(meta.page_size as usize)
}

fn read_meta(buf: &[u8], page_offset: usize) -> Result<Meta, Error> {
    let start = page_offset + PAGE_HEADER_SIZE;
    let Some(body) = buf.get(start..start + META_SIZE) else {
        return Err(Error::new(ErrorKind::Open).with_message("meta page outside file"));
    };
    Meta::decode(body).map_err(|err| {
        err.with_hint("The file is not a bbolt database, or both meta pages are damaged.")
    })
}

fn acquire_shared_lock(file: &File, path: &Path, timeout: Option<Duration>) -> Result<(), Error> {
    let deadline = timeout.map(|timeout| Instant::now() + timeout);
    loop {
        match FileExt::try_lock_shared(file) {
            Ok(()) => return Ok(()),
            Err(err) => {
                let busy = lock_error_kind(&err) == LockFailure::Busy;
                let retry = busy && deadline.is_some_and(|deadline| Instant::now() < deadline);
                if retry {
                    tracing::debug!(path = %path.display(), "waiting for store lock");
                    thread::sleep(LOCK_POLL_INTERVAL);
                    continue;
                }
                return Err(lock_error(err, path, busy));
            }
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum LockFailure {
    Busy,
    Permission,
    Io,
}

fn lock_error_kind(err: &io::Error) -> LockFailure {
    let errno = err.raw_os_error().unwrap_or_default();
    if errno == EACCES || errno == EPERM {
        return LockFailure::Permission;
    }
    match err.kind() {
        io::ErrorKind::WouldBlock => LockFailure::Busy,
        io::ErrorKind::PermissionDenied => LockFailure::Permission,
        _ => LockFailure::Io,
    }
}

fn lock_error(err: io::Error, path: &Path, busy: bool) -> Error {
    let error = Error::new(ErrorKind::Open).with_path(path);
    let error = if busy {
        error
            .with_message("store file is locked by another process")
            .with_hint(
                "Stop etcd (or extract from a copy of the .db file), or pass --lock-timeout to wait.",
            )
    } else {
        error.with_message("failed to lock store file")
    };
    error.with_source(err)
}

fn open_error(err: io::Error, path: &Path) -> Error {
    let message = match err.kind() {
        io::ErrorKind::NotFound => "store file not found",
        io::ErrorKind::PermissionDenied => "store file is not readable",
        _ => "failed to open store file",
    };
    Error::new(ErrorKind::Open)
        .with_message(message)
        .with_path(path)
        .with_source(err)
}

fn not_bolt(path: &Path, reason: &str) -> Error {
    Error::new(ErrorKind::Open)
        .with_message(format!("not a bbolt file: {reason}"))
        .with_path(path)
}

#[cfg(test)]
mod tests {
    use super::{Db, LockFailure, OpenOptions, SnapshotBuilder, lock_error_kind};
    use crate::core::error::ErrorKind;
    use fs2::FileExt;
    use std::fs::File;
    use std::time::{Duration, Instant};

    fn build(path: &std::path::Path) {
        SnapshotBuilder::new()
            .put(b"key", b"rev-1", b"one")
            .put(b"key", b"rev-2", b"two")
            .put(b"meta", b"consistent_index", b"\x00\x00\x00\x00\x00\x00\x00\x07")
            .write_to(path)
            .expect("write snapshot");
    }

    #[test]
    fn open_reads_buckets_in_key_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("db");
        build(&path);

        let db = Db::open(&path, &OpenOptions::new()).expect("open");
        assert_eq!(db.page_size(), 4096);
        let bucket = db.bucket(b"key").expect("lookup").expect("bucket");
        let keys = bucket
            .cursor()
            .expect("cursor")
            .map(|element| element.map(|e| e.key.to_vec()))
            .collect::<Result<Vec<_>, _>>()
            .expect("iterate");
        assert_eq!(keys, vec![b"rev-1".to_vec(), b"rev-2".to_vec()]);
        assert!(db.bucket(b"lease").expect("lookup").is_none());
    }

    #[test]
    fn newest_valid_meta_wins() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("db");
        build(&path);

        let db = Db::open(&path, &OpenOptions::new()).expect("open");
        assert_eq!(db.meta().txid, 2);
    }

    #[test]
    fn damaged_meta_falls_back_to_other_copy() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("db");
        let mut bytes = SnapshotBuilder::new().put(b"key", b"k", b"v").to_bytes();
        // Break the checksum of meta page 0.
        bytes[16 + 50] ^= 0xFF;
        std::fs::write(&path, &bytes).expect("write");

        let db = Db::open(&path, &OpenOptions::new()).expect("open");
        assert_eq!(db.meta().txid, 2);
        assert!(db.bucket(b"key").expect("lookup").is_some());
    }

    #[test]
    fn missing_file_is_open_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = Db::open(dir.path().join("absent.db"), &OpenOptions::new()).expect_err("open");
        assert_eq!(err.kind(), ErrorKind::Open);
        assert!(err.message().unwrap().contains("not found"));
    }

    #[test]
    fn garbage_file_is_open_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("junk.db");
        std::fs::write(&path, vec![0xAB; 8192]).expect("write");
        let err = Db::open(&path, &OpenOptions::new()).expect_err("open");
        assert_eq!(err.kind(), ErrorKind::Open);
    }

    #[test]
    fn exclusive_holder_fails_fast() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("db");
        build(&path);

        let holder = File::open(&path).expect("holder");
        FileExt::lock_exclusive(&holder).expect("lock");

        let started = Instant::now();
        let err = Db::open(&path, &OpenOptions::new()).expect_err("locked");
        assert_eq!(err.kind(), ErrorKind::Open);
        assert!(err.hint().unwrap().contains("--lock-timeout"));
        assert!(started.elapsed() < Duration::from_secs(2));

        let options = OpenOptions::new().with_lock_timeout(Duration::from_millis(120));
        let started = Instant::now();
        assert!(Db::open(&path, &options).is_err());
        assert!(started.elapsed() >= Duration::from_millis(100));

        FileExt::unlock(&holder).expect("unlock");
        Db::open(&path, &options).expect("open after release");
    }

    #[test]
    fn lock_errors_map_to_expected_kinds() {
        let err = std::io::Error::from_raw_os_error(libc::EWOULDBLOCK);
        assert_eq!(lock_error_kind(&err), LockFailure::Busy);

        let err = std::io::Error::from_raw_os_error(libc::EACCES);
        assert_eq!(lock_error_kind(&err), LockFailure::Permission);

        let err = std::io::Error::from_raw_os_error(libc::EBADF);
        assert_eq!(lock_error_kind(&err), LockFailure::Io);
    }
}
