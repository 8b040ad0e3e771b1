//! Purpose: Write small, valid bbolt files for fixtures and tests.
//! Exports: `SnapshotBuilder`.
//! Role: Produces fresh files only; never opens or modifies an existing store.
//! Invariants: Output uses the same page/element layout the reader accepts (meta txids 1 and 2).
//! Invariants: Entries within a bucket are laid out in ascending key order.
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::core::bolt::page::{
    BRANCH_PAGE_FLAG, BUCKET_LEAF_FLAG, BucketHeader, ELEMENT_SIZE, FREELIST_PAGE_FLAG,
    LEAF_PAGE_FLAG, META_PAGE_FLAG, Meta, PAGE_HEADER_SIZE, write_u16, write_u32, write_u64,
};
use crate::core::error::{Error, ErrorKind};

const DEFAULT_PAGE_SIZE: usize = 4096;
const DEFAULT_LEAF_CAPACITY: usize = 64;

#[derive(Clone, Debug)]
pub struct SnapshotBuilder {
    page_size: usize,
    leaf_capacity: usize,
    inline_buckets: bool,
    buckets: BTreeMap<Vec<u8>, BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl Default for SnapshotBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotBuilder {
    pub fn new() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            leaf_capacity: DEFAULT_LEAF_CAPACITY,
            inline_buckets: false,
            buckets: BTreeMap::new(),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Maximum entries per leaf page; small values force branch pages.
    pub fn with_leaf_capacity(mut self, capacity: usize) -> Self {
        self.leaf_capacity = capacity.max(1);
        self
    }

    /// Store every bucket inline in its parent's leaf, as bbolt does for tiny buckets.
    pub fn with_inline_buckets(mut self, inline: bool) -> Self {
        self.inline_buckets = inline;
        self
    }

    pub fn bucket(mut self, name: &[u8]) -> Self {
        self.buckets.entry(name.to_vec()).or_default();
        self
    }

    pub fn put(mut self, bucket: &[u8], key: &[u8], value: &[u8]) -> Self {
        self.buckets
            .entry(bucket.to_vec())
            .or_default()
            .insert(key.to_vec(), value.to_vec());
        self
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut pages = PageWriter::new(self.page_size);
        // Pages 0 and 1 hold the metas, page 2 an empty freelist.
        pages.reserve(3);
        let freelist = pages.blank(2, FREELIST_PAGE_FLAG);
        pages.place(2, freelist);

        let mut root_entries = Vec::with_capacity(self.buckets.len());
        for (name, entries) in &self.buckets {
            let value = if self.inline_buckets {
                let mut value = BucketHeader::default().encode().to_vec();
                value.extend(encode_leaf(0, entries.iter().map(leaf_entry)));
                value
            } else {
                let root = self.write_tree(&mut pages, entries);
                BucketHeader { root, sequence: 0 }.encode().to_vec()
            };
            root_entries.push((BUCKET_LEAF_FLAG, name.clone(), value));
        }

        let root_id = pages.next_id();
        let root = encode_leaf(
            root_id,
            root_entries
                .iter()
                .map(|(flags, key, value)| (*flags, key.as_slice(), value.as_slice())),
        );
        pages.push(root);

        let high_water = pages.next_id();
        for (id, txid) in [(0u64, 1u64), (1, 2)] {
            let meta = Meta {
                page_size: self.page_size as u32,
                flags: 0,
                root: BucketHeader {
                    root: root_id,
                    sequence: 0,
                },
                freelist: 2,
                pgid: high_water,
                txid,
            };
            let mut page = pages.blank(id, META_PAGE_FLAG);
            page[PAGE_HEADER_SIZE..PAGE_HEADER_SIZE + meta.encode().len()]
                .copy_from_slice(&meta.encode());
            pages.place(id, page);
        }

        pages.finish()
    }

    pub fn write_to(&self, path: impl AsRef<Path>) -> Result<(), Error> {
        let path = path.as_ref();
        fs::write(path, self.to_bytes()).map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to write snapshot")
                .with_path(path)
                .with_source(err)
        })
    }

    fn write_tree(&self, pages: &mut PageWriter, entries: &BTreeMap<Vec<u8>, Vec<u8>>) -> u64 {
        let items = entries.iter().collect::<Vec<_>>();
        if items.is_empty() {
            let id = pages.next_id();
            pages.push(encode_leaf(id, std::iter::empty()));
            return id;
        }

        let mut children = Vec::new();
        for chunk in items.chunks(self.leaf_capacity) {
            let id = pages.next_id();
            pages.push(encode_leaf(id, chunk.iter().map(|(k, v)| leaf_entry((*k, *v)))));
            children.push((chunk[0].0.as_slice(), id));
        }
        if children.len() == 1 {
            return children[0].1;
        }

        let id = pages.next_id();
        pages.push(encode_branch(id, &children));
        id
    }
}

fn leaf_entry<'a>((key, value): (&'a Vec<u8>, &'a Vec<u8>)) -> (u32, &'a [u8], &'a [u8]) {
    (0, key.as_slice(), value.as_slice())
}

/// Accumulates page images, tracking ids across overflow spans.
struct PageWriter {
    page_size: usize,
    buf: Vec<u8>,
}

impl PageWriter {
    fn new(page_size: usize) -> Self {
        Self {
            page_size,
            buf: Vec::new(),
        }
    }

    fn next_id(&self) -> u64 {
        (self.buf.len() / self.page_size) as u64
    }

    fn reserve(&mut self, count: usize) {
        self.buf.resize(self.buf.len() + count * self.page_size, 0);
    }

    fn blank(&self, id: u64, flags: u16) -> Vec<u8> {
        let mut page = vec![0u8; self.page_size];
        write_u64(&mut page, 0, id);
        write_u16(&mut page, 8, flags);
        page
    }

    fn place(&mut self, id: u64, page: Vec<u8>) {
        let start = id as usize * self.page_size;
        self.buf[start..start + page.len()].copy_from_slice(&page);
    }

    /// Appends an unpadded page image, padding it to whole pages and setting overflow.
    fn push(&mut self, mut image: Vec<u8>) {
        let pages = image.len().div_ceil(self.page_size).max(1);
        write_u32(&mut image, 12, (pages - 1) as u32);
        image.resize(pages * self.page_size, 0);
        self.buf.extend(image);
    }

    fn finish(self) -> Vec<u8> {
        self.buf
    }
}

fn encode_leaf<'a>(id: u64, entries: impl Iterator<Item = (u32, &'a [u8], &'a [u8])>) -> Vec<u8> {
    let entries = entries.collect::<Vec<_>>();
    let mut image = page_header(id, LEAF_PAGE_FLAG, entries.len());
    let mut data = Vec::new();
    let table_end = PAGE_HEADER_SIZE + entries.len() * ELEMENT_SIZE;
    image.resize(table_end, 0);
    for (index, (flags, key, value)) in entries.iter().enumerate() {
        let base = PAGE_HEADER_SIZE + index * ELEMENT_SIZE;
        let pos = table_end + data.len() - base;
        write_u32(&mut image, base, *flags);
        write_u32(&mut image, base + 4, pos as u32);
        write_u32(&mut image, base + 8, key.len() as u32);
        write_u32(&mut image, base + 12, value.len() as u32);
        data.extend_from_slice(key);
        data.extend_from_slice(value);
    }
    image.extend(data);
    image
}

fn encode_branch(id: u64, children: &[(&[u8], u64)]) -> Vec<u8> {
    let mut image = page_header(id, BRANCH_PAGE_FLAG, children.len());
    let mut data = Vec::new();
    let table_end = PAGE_HEADER_SIZE + children.len() * ELEMENT_SIZE;
    image.resize(table_end, 0);
    for (index, (key, child)) in children.iter().enumerate() {
        let base = PAGE_HEADER_SIZE + index * ELEMENT_SIZE;
        let pos = table_end + data.len() - base;
        write_u32(&mut image, base, pos as u32);
        write_u32(&mut image, base + 4, key.len() as u32);
        write_u64(&mut image, base + 8, *child);
        data.extend_from_slice(key);
    }
    image.extend(data);
    image
}

fn page_header(id: u64, flags: u16, count: usize) -> Vec<u8> {
    let mut header = vec![0u8; PAGE_HEADER_SIZE];
    write_u64(&mut header, 0, id);
    write_u16(&mut header, 8, flags);
    write_u16(&mut header, 10, count as u16);
    header
}
