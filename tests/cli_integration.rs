// CLI integration tests for extract flows against generated store files.
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use etcdbolt::core::bolt::SnapshotBuilder;
use etcdbolt::core::record::VersionedRecord;
use etcdbolt::core::walk::KEY_BUCKET;
use serde_json::Value;

fn cmd() -> Command {
    let exe = env!("CARGO_BIN_EXE_etcdbolt");
    Command::new(exe)
}

fn parse_json(value: &[u8]) -> Value {
    serde_json::from_slice(value).expect("valid json")
}

fn record(key: &str, version: i64, value: &[u8]) -> VersionedRecord {
    VersionedRecord {
        key: key.as_bytes().to_vec(),
        create_revision: 1,
        mod_revision: version,
        version,
        value: value.to_vec(),
        lease: 0,
    }
}

fn write_store(dir: &Path, records: &[VersionedRecord]) -> PathBuf {
    let path = dir.join("db");
    let mut builder = SnapshotBuilder::new().with_leaf_capacity(4).bucket(KEY_BUCKET);
    for (rev, record) in records.iter().enumerate() {
        builder = builder.put(KEY_BUCKET, &(rev as u64 + 1).to_be_bytes(), &record.encode());
    }
    builder.write_to(&path).expect("write store");
    path
}

fn storage_binary_pod() -> Vec<u8> {
    // k8s\0 + runtime.Unknown{typeMeta{apiVersion: "v1", kind: "Pod"}, raw: "..."}
    let mut value = b"k8s\x00".to_vec();
    value.extend_from_slice(&[0x0a, 0x09, 0x0a, 0x02, b'v', b'1', 0x12, 0x03, b'P', b'o', b'd']);
    value.extend_from_slice(&[0x12, 0x02, 0x08, 0x01]);
    value
}

fn fixture(dir: &Path) -> PathBuf {
    write_store(
        dir,
        &[
            record(
                "/registry/configmaps/default/app",
                1,
                br#"{"apiVersion":"v1","kind":"ConfigMap","data":{"mode":"old"}}"#,
            ),
            record("/registry/pods/default/web", 1, &storage_binary_pod()),
            record(
                "/registry/configmaps/default/app",
                2,
                br#"{"apiVersion":"v1","kind":"ConfigMap","data":{"mode":"new"}}"#,
            ),
            record("/registry/leases/kube-node", 1, b"holder: node-1\n"),
            record("/registry/configmaps/default/app", 3, b""),
            record("/compact_rev_key", 1, b"\x00\x01\x02"),
        ],
    )
}

fn extract(db: &Path, args: &[&str]) -> Output {
    cmd()
        .arg("extract")
        .arg("-f")
        .arg(db)
        .args(args)
        .output()
        .expect("run extract")
}

fn stdout(output: &Output) -> &str {
    std::str::from_utf8(&output.stdout).expect("utf8")
}

#[test]
fn lists_every_key_in_sorted_order() {
    let temp = tempfile::tempdir().expect("tempdir");
    let db = fixture(temp.path());

    let output = extract(&db, &["--keys-by-prefix", "", "--fields", "key,version-count"]);
    assert!(output.status.success(), "{output:?}");
    assert_eq!(
        stdout(&output),
        "/compact_rev_key 1\n\
         /registry/configmaps/default/app 3\n\
         /registry/leases/kube-node 1\n\
         /registry/pods/default/web 1\n"
    );
}

#[test]
fn prefix_listing_is_a_filtered_subset() {
    let temp = tempfile::tempdir().expect("tempdir");
    let db = fixture(temp.path());
    let fields = "key,value-size,all-versions-value-size,version-count";

    let all = extract(&db, &["--keys-by-prefix", "", "--fields", fields]);
    let pods = extract(&db, &["--keys-by-prefix", "/registry/pods/", "--fields", fields]);
    assert!(all.status.success() && pods.status.success());

    let expected = stdout(&all)
        .lines()
        .filter(|line| line.starts_with("/registry/pods/"))
        .map(|line| format!("{line}\n"))
        .collect::<String>();
    assert_eq!(stdout(&pods), expected);
}

#[test]
fn template_renders_value_paths_and_type_meta() {
    let temp = tempfile::tempdir().expect("tempdir");
    let db = fixture(temp.path());

    let output = extract(
        &db,
        &[
            "--keys-by-prefix",
            "/registry/",
            "--template",
            "{{.Key}} {{.TypeMeta.kind}} {{.Value.data.mode}}",
        ],
    );
    assert!(output.status.success(), "{output:?}");
    assert_eq!(
        stdout(&output),
        "/registry/configmaps/default/app <no value> <no value>\n\
         /registry/leases/kube-node <no value> <no value>\n\
         /registry/pods/default/web Pod <no value>\n"
    );
}

#[test]
fn list_versions_and_fetch_each() {
    let temp = tempfile::tempdir().expect("tempdir");
    let db = fixture(temp.path());
    let key = "/registry/configmaps/default/app";

    let output = extract(&db, &["-k", key, "--list-versions"]);
    assert!(output.status.success(), "{output:?}");
    assert_eq!(stdout(&output), "1\n2\n3\n");

    let second = extract(&db, &["-k", key, "-v", "2", "-o", "json"]);
    assert!(second.status.success(), "{second:?}");
    let value = parse_json(&second.stdout);
    assert_eq!(value["data"]["mode"], "new");
    assert!(stdout(&second).ends_with("}\n"));

    let first = extract(&db, &["-k", key, "-v", "1", "--raw"]);
    assert!(first.status.success());
    assert_eq!(
        stdout(&first),
        "{\"apiVersion\":\"v1\",\"kind\":\"ConfigMap\",\"data\":{\"mode\":\"old\"}}\n"
    );
}

#[test]
fn latest_empty_value_is_conversion_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let db = fixture(temp.path());

    let output = extract(&db, &["-k", "/registry/configmaps/default/app"]);
    assert_eq!(output.status.code(), Some(7));
    assert!(output.stdout.is_empty());
    let err = parse_json(&output.stderr);
    assert_eq!(err["error"]["kind"], "Conversion");
    assert_eq!(err["error"]["key"], "/registry/configmaps/default/app");
}

#[test]
fn yaml_is_the_default_output() {
    let temp = tempfile::tempdir().expect("tempdir");
    let db = fixture(temp.path());

    let output = extract(&db, &["-k", "/registry/leases/kube-node"]);
    assert!(output.status.success(), "{output:?}");
    assert_eq!(stdout(&output), "holder: node-1\n");

    let json = extract(&db, &["-k", "/registry/leases/kube-node", "-o", "json"]);
    assert_eq!(stdout(&json), "{\n  \"holder\": \"node-1\"\n}\n");
}

#[test]
fn storage_binary_only_converts_to_proto() {
    let temp = tempfile::tempdir().expect("tempdir");
    let db = fixture(temp.path());
    let key = "/registry/pods/default/web";

    let proto = extract(&db, &["-k", key, "-o", "proto"]);
    assert!(proto.status.success(), "{proto:?}");
    assert_eq!(proto.stdout, storage_binary_pod());

    let json = extract(&db, &["-k", key, "-o", "json"]);
    assert_eq!(json.status.code(), Some(7));
    assert!(json.stdout.is_empty());
}

#[test]
fn missing_key_is_not_found_without_output() {
    let temp = tempfile::tempdir().expect("tempdir");
    let db = fixture(temp.path());

    let output = extract(&db, &["-k", "/missing"]);
    assert_eq!(output.status.code(), Some(3));
    assert!(output.stdout.is_empty());
    let err = parse_json(&output.stderr);
    assert_eq!(err["error"]["kind"], "NotFound");
    assert_eq!(err["error"]["key"], "/missing");
    assert_eq!(err["error"]["path"], db.display().to_string());
}

#[test]
fn usage_errors_exit_two_before_touching_the_store() {
    let temp = tempfile::tempdir().expect("tempdir");
    // The store path does not exist; usage checks must fail first.
    let db = temp.path().join("absent");

    let output = extract(&db, &["-k", "/a", "--list-versions", "-v", "1"]);
    assert_eq!(output.status.code(), Some(2));
    assert_eq!(parse_json(&output.stderr)["error"]["kind"], "Usage");

    let output = extract(&db, &["--keys-by-prefix", "/", "--fields", "key,bogus"]);
    assert_eq!(output.status.code(), Some(8));
    assert_eq!(parse_json(&output.stderr)["error"]["kind"], "UnknownField");

    let output = extract(&db, &["--keys-by-prefix", "/", "--template", "{{ .Key"]);
    assert_eq!(output.status.code(), Some(9));

    let output = cmd().args(["extract", "--no-such-flag"]).output().expect("run");
    assert_eq!(output.status.code(), Some(2));
    let err = parse_json(&output.stderr);
    assert_eq!(err["error"]["kind"], "Usage");
    assert!(err["error"]["hint"].as_str().unwrap().contains("etcdbolt extract --help"));
}

#[test]
fn missing_and_foreign_files_are_open_errors() {
    let temp = tempfile::tempdir().expect("tempdir");

    let output = extract(&temp.path().join("absent"), &["--keys-by-prefix", ""]);
    assert_eq!(output.status.code(), Some(4));

    let garbage = temp.path().join("garbage");
    std::fs::write(&garbage, vec![0x5a; 8192]).expect("write");
    let output = extract(&garbage, &["--keys-by-prefix", ""]);
    assert_eq!(output.status.code(), Some(4));
    assert_eq!(parse_json(&output.stderr)["error"]["kind"], "Open");
}

#[test]
fn leaf_item_from_stdin_and_file() {
    let temp = tempfile::tempdir().expect("tempdir");
    let item = VersionedRecord {
        key: b"/registry/secrets/default/token".to_vec(),
        create_revision: 10,
        mod_revision: 12,
        version: 2,
        value: br#"{"kind":"Secret"}"#.to_vec(),
        lease: 0,
    };

    let mut child = cmd()
        .args(["extract", "--leaf-item", "--meta-summary"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()
        .expect("spawn");
    child
        .stdin
        .take()
        .expect("stdin")
        .write_all(&item.encode())
        .expect("write stdin");
    let output = child.wait_with_output().expect("wait");
    assert!(output.status.success(), "{output:?}");
    assert_eq!(
        stdout(&output),
        "Key: /registry/secrets/default/token\nVersion: 2\nCreateRevision: 10\nModRevision: 12\nLease: 0\n"
    );

    let path = temp.path().join("item.bin");
    std::fs::write(&path, item.encode()).expect("write item");
    let output = cmd()
        .args(["extract", "--leaf-item", "--print-key", "-f"])
        .arg(&path)
        .output()
        .expect("run");
    assert_eq!(stdout(&output), "/registry/secrets/default/token\n");

    let output = cmd()
        .args(["extract", "--leaf-item", "-o", "json", "-f"])
        .arg(&path)
        .output()
        .expect("run");
    assert_eq!(stdout(&output), "{\n  \"kind\": \"Secret\"\n}\n");
}

#[test]
fn repeated_runs_are_byte_identical() {
    let temp = tempfile::tempdir().expect("tempdir");
    let db = fixture(temp.path());
    let args = ["--keys-by-prefix", "", "--fields", "key,value"];

    let first = extract(&db, &args);
    let second = extract(&db, &args);
    assert!(first.status.success());
    assert_eq!(first.stdout, second.stdout);
}

#[test]
fn non_utf8_keys_are_listed_once_each() {
    let temp = tempfile::tempdir().expect("tempdir");
    fn binary(key: &[u8], version: i64) -> VersionedRecord {
        VersionedRecord {
            key: key.to_vec(),
            ..record("", version, b"{}")
        }
    }
    let db = write_store(
        temp.path(),
        &[
            binary(b"/k\xff", 1),
            binary(b"/k\xfe", 1),
            binary(b"/k\xff", 2),
        ],
    );

    let output = extract(&db, &["--keys-by-prefix", "/k", "--fields", "key,version-count"]);
    assert!(output.status.success(), "{output:?}");
    assert_eq!(output.stdout, b"/k\xfe 1\n/k\xff 2\n");
}

#[test]
fn misspelled_template_field_is_template_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let db = fixture(temp.path());

    let output = extract(&db, &["--keys-by-prefix", "", "--template", "{{.Kye}}"]);
    assert_eq!(output.status.code(), Some(9));
    assert!(output.stdout.is_empty());
    let err = parse_json(&output.stderr);
    assert_eq!(err["error"]["kind"], "Template");
    assert!(err["error"]["message"].as_str().unwrap().contains("Kye"));
}

#[test]
fn completion_generates_script() {
    let output = cmd().args(["completion", "bash"]).output().expect("run");
    assert!(output.status.success());
    assert!(stdout(&output).contains("etcdbolt"));
}
