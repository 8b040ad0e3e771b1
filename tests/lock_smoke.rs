// Cross-process lock behavior: a writer's exclusive lock fails fast or is waited out.
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::thread;
use std::time::{Duration, Instant};

use etcdbolt::core::bolt::SnapshotBuilder;
use etcdbolt::core::record::VersionedRecord;
use etcdbolt::core::walk::KEY_BUCKET;
use fs2::FileExt;

fn cmd() -> Command {
    let exe = env!("CARGO_BIN_EXE_etcdbolt");
    Command::new(exe)
}

fn write_store(dir: &Path) -> PathBuf {
    let path = dir.join("db");
    let record = VersionedRecord {
        key: b"/registry/namespaces/default".to_vec(),
        create_revision: 1,
        mod_revision: 1,
        version: 1,
        value: br#"{"kind":"Namespace"}"#.to_vec(),
        lease: 0,
    };
    SnapshotBuilder::new()
        .bucket(KEY_BUCKET)
        .put(KEY_BUCKET, &1u64.to_be_bytes(), &record.encode())
        .write_to(&path)
        .expect("write store");
    path
}

#[test]
fn locked_store_fails_fast() {
    let temp = tempfile::tempdir().expect("tempdir");
    let db = write_store(temp.path());
    let holder = File::open(&db).expect("open holder");
    FileExt::lock_exclusive(&holder).expect("exclusive lock");

    let started = Instant::now();
    let output = cmd()
        .args(["extract", "--keys-by-prefix", "", "-f"])
        .arg(&db)
        .output()
        .expect("run");
    assert_eq!(output.status.code(), Some(4));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(output.stdout.is_empty());
    let err: serde_json::Value = serde_json::from_slice(&output.stderr).expect("json error");
    assert_eq!(err["error"]["kind"], "Open");
    assert!(err["error"]["hint"].as_str().unwrap().contains("--lock-timeout"));

    FileExt::unlock(&holder).expect("unlock");
}

#[test]
fn lock_timeout_waits_for_release() {
    let temp = tempfile::tempdir().expect("tempdir");
    let db = write_store(temp.path());
    let holder = File::open(&db).expect("open holder");
    FileExt::lock_exclusive(&holder).expect("exclusive lock");

    let release = thread::spawn(move || {
        thread::sleep(Duration::from_millis(300));
        FileExt::unlock(&holder).expect("unlock");
    });

    let output = cmd()
        .args(["extract", "--keys-by-prefix", "", "--lock-timeout", "10s", "-f"])
        .arg(&db)
        .output()
        .expect("run");
    release.join().expect("join");
    assert!(output.status.success(), "{output:?}");
    assert_eq!(output.stdout, b"/registry/namespaces/default\n");
}
