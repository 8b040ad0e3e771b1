//! Purpose: Library crate behind the `etcdbolt` CLI and its tests.
//! Exports: `core` (bbolt reader, record decoding, walks, aggregation, presentation, errors).
//! Role: Read-only access to etcd's bbolt data files; the binary only plans and prints.
//! Invariants: Store files are only ever read; `bolt::SnapshotBuilder` writes fresh fixture files.
//! Invariants: Core modules prefer explicit inputs/outputs over hidden state.
pub mod core;
