// Version listing and exact key/version lookup over full store walks.
use crate::core::error::{Error, ErrorKind};
use crate::core::walk::{Flow, Snapshot};

/// All versions of `key`, in the order the walk met them.
pub fn list_versions(snapshot: &Snapshot, key: &str) -> Result<Vec<i64>, Error> {
    let key = key.as_bytes();
    let mut versions = Vec::new();
    snapshot.walk(|record| {
        if record.key == key {
            versions.push(record.version);
        }
        Ok(Flow::Continue)
    })?;
    Ok(versions)
}

pub fn latest_version(snapshot: &Snapshot, key: &str) -> Result<i64, Error> {
    list_versions(snapshot, key)?
        .into_iter()
        .max()
        .ok_or_else(|| {
            Error::new(ErrorKind::NotFound)
                .with_message("no versions found for key")
                .with_key(key)
                .with_path(snapshot.path())
        })
}

/// Value of `key` at exactly `version`; the first matching record wins.
pub fn get_value(snapshot: &Snapshot, key: &str, version: i64) -> Result<Vec<u8>, Error> {
    let wanted = key.as_bytes();
    let mut found = None;
    snapshot.walk(|record| {
        if record.key == wanted && record.version == version {
            found = Some(record.value.clone());
            return Ok(Flow::Stop);
        }
        Ok(Flow::Continue)
    })?;
    found.ok_or_else(|| {
        Error::new(ErrorKind::NotFound)
            .with_message(format!("key not found at version {version}"))
            .with_key(key)
            .with_path(snapshot.path())
    })
}

/// Value of `key` at `version`, or at its latest version when none is given.
///
/// Without an explicit version this costs two walks: one to find the
/// highest version, one to fetch it. The store is not indexed by key.
pub fn resolve_value(
    snapshot: &Snapshot,
    key: &str,
    version: Option<i64>,
) -> Result<(i64, Vec<u8>), Error> {
    let version = match version {
        Some(version) => version,
        None => latest_version(snapshot, key)?,
    };
    let value = get_value(snapshot, key, version)?;
    Ok((version, value))
}
