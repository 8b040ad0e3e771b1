//! Purpose: Turn parsed `extract` flags into one validated `Operation`.
//! Exports: `plan_extract`.
//! Role: Every option-combination rule lives here, ahead of any file access.
//! Invariants: Violations are Usage errors; bad field lists and templates fail with their own kinds.
//! Invariants: Planning never touches the filesystem.
use std::time::Duration;

use etcdbolt::core::bolt::OpenOptions;
use etcdbolt::core::error::{Error, ErrorKind};
use etcdbolt::core::extract::{InputSource, LeafView, Operation};
use etcdbolt::core::fields::parse_field_list;
use etcdbolt::core::template::Template;
use etcdbolt::core::walk::Snapshot;

use crate::ExtractArgs;

pub(crate) fn plan_extract(args: ExtractArgs) -> Result<Operation, Error> {
    if args.leaf_item {
        return plan_leaf_item(args);
    }
    if args.print_key || args.meta_summary {
        return Err(usage("--print-key and --meta-summary require --leaf-item")
            .with_hint("Example: etcdbolt extract --leaf-item --meta-summary -f item.bin"));
    }

    // An empty key or prefix means it was not given.
    let key = args.key.filter(|key| !key.is_empty());
    let prefix = args.keys_by_prefix.filter(|prefix| !prefix.is_empty());

    if key.is_some() && prefix.is_some() {
        return Err(usage("--key cannot be combined with --keys-by-prefix")
            .with_hint("Use --key for one value or --keys-by-prefix for a listing."));
    }
    if args.key_version.is_some() && key.is_none() {
        return Err(usage("--version requires --key"));
    }
    if args.raw && key.is_none() {
        return Err(usage("--raw requires --key"));
    }
    if args.list_versions {
        if key.is_none() {
            return Err(usage("--list-versions requires --key"));
        }
        if args.key_version.is_some() || args.raw {
            return Err(usage("--list-versions cannot be combined with --version or --raw")
                .with_hint("List versions first, then fetch one with -k KEY -v VERSION."));
        }
    }
    if args.fields.is_some() && args.template.is_some() {
        return Err(usage("--fields and --template are mutually exclusive"));
    }
    if key.is_some() && (args.fields.is_some() || args.template.is_some()) {
        return Err(usage("--fields and --template apply to key listings, not --key")
            .with_hint("Add --keys-by-prefix PREFIX (an empty prefix lists every key)."));
    }

    let Some(path) = args.file else {
        return Err(usage("--file is required")
            .with_hint("Point -f at an etcd data file, e.g. member/snap/db."));
    };
    let mut options = OpenOptions::new();
    if let Some(timeout) = args.lock_timeout.as_deref() {
        options = options.with_lock_timeout(parse_lock_timeout(timeout)?);
    }
    let snapshot = Snapshot::new(path).with_options(options);

    if let Some(key) = key {
        if args.list_versions {
            return Ok(Operation::ListVersions { snapshot, key });
        }
        return Ok(Operation::Value {
            snapshot,
            key,
            version: args.key_version,
            raw: args.raw,
            format: args.output.into(),
        });
    }

    let prefix = prefix.unwrap_or_default();
    if let Some(template) = args.template {
        if template.is_empty() {
            return Err(usage("--template is empty"));
        }
        return Ok(Operation::Template {
            snapshot,
            prefix,
            template: Template::parse(&template)?,
        });
    }
    let fields = parse_field_list(args.fields.as_deref().unwrap_or("key"))?;
    Ok(Operation::Fields {
        snapshot,
        prefix,
        fields,
    })
}

fn plan_leaf_item(args: ExtractArgs) -> Result<Operation, Error> {
    let store_only = [
        (args.key.is_some(), "--key"),
        (args.keys_by_prefix.is_some(), "--keys-by-prefix"),
        (args.list_versions, "--list-versions"),
        (args.key_version.is_some(), "--version"),
        (args.fields.is_some(), "--fields"),
        (args.template.is_some(), "--template"),
        (args.raw, "--raw"),
        (args.lock_timeout.is_some(), "--lock-timeout"),
    ];
    if let Some((_, flag)) = store_only.iter().find(|(set, _)| *set) {
        return Err(usage(format!("{flag} cannot be combined with --leaf-item"))
            .with_hint("--leaf-item decodes a single record; it has no store to query."));
    }

    let source = match args.file {
        Some(path) => InputSource::File(path),
        None => InputSource::Stdin,
    };
    let view = if args.meta_summary {
        LeafView::Meta
    } else if args.print_key {
        LeafView::Key
    } else {
        LeafView::Value(args.output.into())
    };
    Ok(Operation::LeafItem { source, view })
}

/// Accepts bare seconds (`5`) or a number with ms|s|m.
fn parse_lock_timeout(input: &str) -> Result<Duration, Error> {
    let invalid = || {
        usage(format!("invalid --lock-timeout `{input}`"))
            .with_hint("Use seconds or a number plus ms|s|m (e.g. 5, 500ms, 2s).")
    };
    let trimmed = input.trim();
    let split = trimmed
        .find(|ch: char| !ch.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (num_str, unit) = trimmed.split_at(split);
    let value: u64 = num_str.parse().map_err(|_| invalid())?;
    let millis = match unit {
        "" | "s" => value.saturating_mul(1_000),
        "ms" => value,
        "m" => value.saturating_mul(60_000),
        _ => return Err(invalid()),
    };
    Ok(Duration::from_millis(millis))
}

fn usage(message: impl Into<String>) -> Error {
    Error::new(ErrorKind::Usage).with_message(message)
}
