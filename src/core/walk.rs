//! Purpose: Walk every versioned record of an etcd bbolt file in physical order.
//! Exports: `Snapshot`, `Flow`, `KEY_BUCKET`.
//! Role: Shared iteration primitive for version resolution and key aggregation.
//! Invariants: Each walk opens, iterates and releases the store; nothing is held between walks.
//! Invariants: Physical order is revision order, not logical key order.
//! Invariants: The first decode failure aborts the walk with the physical key attached.
use std::path::{Path, PathBuf};

use crate::core::bolt::{Db, OpenOptions};
use crate::core::error::{Error, ErrorKind};
use crate::core::record::{self, VersionedRecord};

/// Bucket etcd's mvcc backend keeps revisions in.
pub const KEY_BUCKET: &[u8] = b"key";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Flow {
    Continue,
    Stop,
}

/// A store file plus the options used every time it is opened.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Snapshot {
    path: PathBuf,
    options: OpenOptions,
}

impl Snapshot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            options: OpenOptions::default(),
        }
    }

    pub fn with_options(mut self, options: OpenOptions) -> Self {
        self.options = options;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Visits records until the visitor returns `Flow::Stop` or an error.
    pub fn walk<F>(&self, mut visit: F) -> Result<(), Error>
    where
        F: FnMut(&VersionedRecord) -> Result<Flow, Error>,
    {
        let db = Db::open(&self.path, &self.options)?;
        let bucket = db.bucket(KEY_BUCKET)?.ok_or_else(|| {
            Error::new(ErrorKind::Open)
                .with_message("store has no `key` bucket")
                .with_hint("Is this an etcd v3 data file (member/snap/db)?")
                .with_path(&self.path)
        })?;

        let mut visited = 0u64;
        for element in bucket.cursor()? {
            let element = element.map_err(|err| err.or_path(&self.path))?;
            if element.is_bucket() {
                tracing::debug!(key = ?bstr::BStr::new(element.key), "skipping nested bucket");
                continue;
            }

            let record = record::decode(element.value).map_err(|err| {
                err.with_key(hex(element.key))
                    .with_hint("The revision entry does not decode as mvccpb.KeyValue.")
                    .with_path(&self.path)
            })?;
            visited += 1;

            match visit(&record) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Stop) => break,
                Err(err) if err.key().is_some() => return Err(err),
                Err(err) => return Err(err.with_key(&record.key)),
            }
        }

        tracing::debug!(path = %self.path.display(), visited, "walk finished");
        Ok(())
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{byte:02x}")).collect()
}
