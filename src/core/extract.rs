//! Purpose: Execute one planned extraction and write its result to a sink.
//! Exports: `Operation`, `InputSource`, `LeafView`, `run`.
//! Role: The single entry point the CLI calls after planning; tests call it with a `Vec<u8>`.
//! Invariants: An `Operation` is immutable and fully validated before `run` starts.
//! Invariants: Lookup failures are raised before anything reaches the sink.
//! Invariants: Listings stream line by line; output already written is not rolled back.
use std::fs;
use std::io::{self, Read, Write};
use std::path::PathBuf;

use crate::core::encoding::{self, Format};
use crate::core::error::{Error, ErrorKind};
use crate::core::fields::{self, SummaryField};
use crate::core::record::{self, VersionedRecord};
use crate::core::resolve;
use crate::core::summary;
use crate::core::template::Template;
use crate::core::walk::Snapshot;

/// Where a leaf item's raw bytes come from.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum InputSource {
    Stdin,
    File(PathBuf),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LeafView {
    Key,
    Meta,
    Value(Format),
}

#[derive(Debug)]
pub enum Operation {
    LeafItem {
        source: InputSource,
        view: LeafView,
    },
    ListVersions {
        snapshot: Snapshot,
        key: String,
    },
    Value {
        snapshot: Snapshot,
        key: String,
        version: Option<i64>,
        raw: bool,
        format: Format,
    },
    Fields {
        snapshot: Snapshot,
        prefix: String,
        fields: Vec<SummaryField>,
    },
    Template {
        snapshot: Snapshot,
        prefix: String,
        template: Template,
    },
}

pub fn run<W: Write>(operation: &Operation, out: &mut W) -> Result<(), Error> {
    match operation {
        Operation::LeafItem { source, view } => {
            let record = read_leaf_item(source)?;
            print_leaf_item(&record, *view, out)
        }
        Operation::ListVersions { snapshot, key } => {
            let versions = resolve::list_versions(snapshot, key)?;
            for version in versions {
                writeln!(out, "{version}").map_err(write_error)?;
            }
            Ok(())
        }
        Operation::Value {
            snapshot,
            key,
            version,
            raw,
            format,
        } => {
            let (version, value) = resolve::resolve_value(snapshot, key, *version)?;
            tracing::debug!(key = %key, version, bytes = value.len(), "resolved value");
            print_value(&value, *raw, *format, out).map_err(|err| err.with_key(key))
        }
        Operation::Fields {
            snapshot,
            prefix,
            fields,
        } => {
            for summary in summary::list_key_summaries(snapshot, prefix)? {
                write_line(out, &fields::project(&summary, fields))?;
            }
            Ok(())
        }
        Operation::Template {
            snapshot,
            prefix,
            template,
        } => {
            for summary in summary::list_key_summaries(snapshot, prefix)? {
                let rendered = template.render(&summary)?;
                writeln!(out, "{rendered}").map_err(write_error)?;
            }
            Ok(())
        }
    }
}

fn print_value<W: Write>(value: &[u8], raw: bool, format: Format, out: &mut W) -> Result<(), Error> {
    if value.is_empty() {
        return Err(Error::new(ErrorKind::Conversion)
            .with_message("value is empty")
            .with_hint("The key exists at this version but holds zero bytes."));
    }
    if raw {
        out.write_all(value).map_err(write_error)?;
        return out.write_all(b"\n").map_err(write_error);
    }
    encoding::convert(value, format, out)?;
    Ok(())
}

fn read_leaf_item(source: &InputSource) -> Result<VersionedRecord, Error> {
    let raw = match source {
        InputSource::File(path) => fs::read(path).map_err(|err| {
            let kind = match err.kind() {
                io::ErrorKind::NotFound => ErrorKind::NotFound,
                _ => ErrorKind::Io,
            };
            Error::new(kind)
                .with_message("failed to read leaf item")
                .with_path(path)
                .with_source(err)
        })?,
        InputSource::Stdin => {
            let mut raw = Vec::new();
            io::stdin().lock().read_to_end(&mut raw).map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_message("failed to read leaf item from stdin")
                    .with_source(err)
            })?;
            raw
        }
    };
    record::decode(&raw).map_err(|err| match source {
        InputSource::File(path) => err.with_path(path),
        InputSource::Stdin => err,
    })
}

fn print_leaf_item<W: Write>(record: &VersionedRecord, view: LeafView, out: &mut W) -> Result<(), Error> {
    match view {
        LeafView::Key => write_line(out, &record.key),
        LeafView::Meta => {
            let mut summary = b"Key: ".to_vec();
            summary.extend_from_slice(&record.key);
            summary.extend_from_slice(
                format!(
                    "\nVersion: {}\nCreateRevision: {}\nModRevision: {}\nLease: {}\n",
                    record.version, record.create_revision, record.mod_revision, record.lease
                )
                .as_bytes(),
            );
            out.write_all(&summary).map_err(write_error)
        }
        LeafView::Value(format) => {
            encoding::convert(&record.value, format, out).map_err(|err| err.with_key(&record.key))?;
            Ok(())
        }
    }
}

fn write_line<W: Write>(out: &mut W, line: &[u8]) -> Result<(), Error> {
    out.write_all(line).map_err(write_error)?;
    out.write_all(b"\n").map_err(write_error)
}

fn write_error(err: io::Error) -> Error {
    Error::new(ErrorKind::Io)
        .with_message("failed to write output")
        .with_source(err)
}
