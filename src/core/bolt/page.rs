// bbolt page, element, meta and bucket-header layouts (little endian, read side).
use crate::core::error::{Error, ErrorKind};

pub const PAGE_HEADER_SIZE: usize = 16;
pub const ELEMENT_SIZE: usize = 16;
pub const BUCKET_HEADER_SIZE: usize = 16;

pub const BRANCH_PAGE_FLAG: u16 = 0x01;
pub const LEAF_PAGE_FLAG: u16 = 0x02;
pub const META_PAGE_FLAG: u16 = 0x04;
pub const FREELIST_PAGE_FLAG: u16 = 0x10;

pub const BUCKET_LEAF_FLAG: u32 = 0x01;

pub const MAGIC: u32 = 0xED0C_DAED;
pub const VERSION: u32 = 2;
pub const META_SIZE: usize = 64;
const META_CHECKSUM_OFFSET: usize = 56;

/// A page image borrowed from the map (or from an inline bucket value).
#[derive(Clone, Copy, Debug)]
pub struct Page<'a> {
    pub id: u64,
    pub flags: u16,
    pub count: u16,
    pub overflow: u32,
    buf: &'a [u8],
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LeafElement<'a> {
    pub flags: u32,
    pub key: &'a [u8],
    pub value: &'a [u8],
}

impl LeafElement<'_> {
    pub fn is_bucket(&self) -> bool {
        self.flags & BUCKET_LEAF_FLAG != 0
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BranchElement<'a> {
    pub key: &'a [u8],
    pub child: u64,
}

impl<'a> Page<'a> {
    pub fn parse(buf: &'a [u8]) -> Result<Self, Error> {
        if buf.len() < PAGE_HEADER_SIZE {
            return Err(Error::new(ErrorKind::Corrupt).with_message("page header truncated"));
        }
        Ok(Self {
            id: read_u64(buf, 0),
            flags: read_u16(buf, 8),
            count: read_u16(buf, 10),
            overflow: read_u32(buf, 12),
            buf,
        })
    }

    pub fn is_branch(&self) -> bool {
        self.flags & BRANCH_PAGE_FLAG != 0
    }

    pub fn is_leaf(&self) -> bool {
        self.flags & LEAF_PAGE_FLAG != 0
    }

    pub fn body(&self) -> &'a [u8] {
        &self.buf[PAGE_HEADER_SIZE..]
    }

    pub fn leaf_element(&self, index: usize) -> Result<LeafElement<'a>, Error> {
        let base = self.element_offset(index)?;
        let flags = read_u32(self.buf, base);
        let pos = read_u32(self.buf, base + 4) as usize;
        let ksize = read_u32(self.buf, base + 8) as usize;
        let vsize = read_u32(self.buf, base + 12) as usize;

        let key_start = base
            .checked_add(pos)
            .ok_or_else(|| self.corrupt("leaf element offset overflow"))?;
        let key = self.slice(key_start, ksize)?;
        let value = self.slice(key_start + ksize, vsize)?;
        Ok(LeafElement { flags, key, value })
    }

    pub fn branch_element(&self, index: usize) -> Result<BranchElement<'a>, Error> {
        let base = self.element_offset(index)?;
        let pos = read_u32(self.buf, base) as usize;
        let ksize = read_u32(self.buf, base + 4) as usize;
        let child = read_u64(self.buf, base + 8);

        let key_start = base
            .checked_add(pos)
            .ok_or_else(|| self.corrupt("branch element offset overflow"))?;
        let key = self.slice(key_start, ksize)?;
        Ok(BranchElement { key, child })
    }

    fn element_offset(&self, index: usize) -> Result<usize, Error> {
        if index >= self.count as usize {
            return Err(self.corrupt("element index past page count"));
        }
        let base = PAGE_HEADER_SIZE + index * ELEMENT_SIZE;
        if base + ELEMENT_SIZE > self.buf.len() {
            return Err(self.corrupt("element table exceeds page"));
        }
        Ok(base)
    }

    fn slice(&self, start: usize, len: usize) -> Result<&'a [u8], Error> {
        let end = start
            .checked_add(len)
            .ok_or_else(|| self.corrupt("element length overflow"))?;
        if end > self.buf.len() {
            return Err(self.corrupt("element data exceeds page"));
        }
        Ok(&self.buf[start..end])
    }

    fn corrupt(&self, message: &str) -> Error {
        Error::new(ErrorKind::Corrupt)
            .with_message(message)
            .with_page(self.id)
    }
}

/// Root pointer stored in a bucket value (and in the meta page for the root bucket).
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct BucketHeader {
    pub root: u64,
    pub sequence: u64,
}

impl BucketHeader {
    pub fn decode(buf: &[u8]) -> Result<Self, Error> {
        if buf.len() < BUCKET_HEADER_SIZE {
            return Err(Error::new(ErrorKind::Corrupt).with_message("bucket header truncated"));
        }
        Ok(Self {
            root: read_u64(buf, 0),
            sequence: read_u64(buf, 8),
        })
    }

    pub fn encode(&self) -> [u8; BUCKET_HEADER_SIZE] {
        let mut buf = [0u8; BUCKET_HEADER_SIZE];
        write_u64(&mut buf, 0, self.root);
        write_u64(&mut buf, 8, self.sequence);
        buf
    }

    /// Inline buckets carry their single leaf page inside the bucket value.
    pub fn is_inline(&self) -> bool {
        self.root == 0
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Meta {
    pub page_size: u32,
    pub flags: u32,
    pub root: BucketHeader,
    pub freelist: u64,
    pub pgid: u64,
    pub txid: u64,
}

impl Meta {
    pub fn decode(buf: &[u8]) -> Result<Self, Error> {
        if buf.len() < META_SIZE {
            return Err(Error::new(ErrorKind::Open).with_message("meta page truncated"));
        }
        if read_u32(buf, 0) != MAGIC {
            return Err(Error::new(ErrorKind::Open).with_message("bad meta magic"));
        }
        if read_u32(buf, 4) != VERSION {
            return Err(Error::new(ErrorKind::Open).with_message("unsupported bbolt version"));
        }
        let checksum = read_u64(buf, META_CHECKSUM_OFFSET);
        if checksum != fnv1a64(&buf[..META_CHECKSUM_OFFSET]) {
            return Err(Error::new(ErrorKind::Open).with_message("meta checksum mismatch"));
        }

        Ok(Self {
            page_size: read_u32(buf, 8),
            flags: read_u32(buf, 12),
            root: BucketHeader::decode(&buf[16..32])?,
            freelist: read_u64(buf, 32),
            pgid: read_u64(buf, 40),
            txid: read_u64(buf, 48),
        })
    }

    pub fn encode(&self) -> [u8; META_SIZE] {
        let mut buf = [0u8; META_SIZE];
        write_u32(&mut buf, 0, MAGIC);
        write_u32(&mut buf, 4, VERSION);
        write_u32(&mut buf, 8, self.page_size);
        write_u32(&mut buf, 12, self.flags);
        buf[16..32].copy_from_slice(&self.root.encode());
        write_u64(&mut buf, 32, self.freelist);
        write_u64(&mut buf, 40, self.pgid);
        write_u64(&mut buf, 48, self.txid);
        let checksum = fnv1a64(&buf[..META_CHECKSUM_OFFSET]);
        write_u64(&mut buf, META_CHECKSUM_OFFSET, checksum);
        buf
    }
}

fn fnv1a64(bytes: &[u8]) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    bytes.iter().fold(OFFSET_BASIS, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(PRIME)
    })
}

pub(crate) fn read_u16(buf: &[u8], offset: usize) -> u16 {
    let mut out = [0u8; 2];
    out.copy_from_slice(&buf[offset..offset + 2]);
    u16::from_le_bytes(out)
}

pub(crate) fn read_u32(buf: &[u8], offset: usize) -> u32 {
    let mut out = [0u8; 4];
    out.copy_from_slice(&buf[offset..offset + 4]);
    u32::from_le_bytes(out)
}

pub(crate) fn read_u64(buf: &[u8], offset: usize) -> u64 {
    let mut out = [0u8; 8];
    out.copy_from_slice(&buf[offset..offset + 8]);
    u64::from_le_bytes(out)
}

pub(crate) fn write_u16(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn write_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn write_u64(buf: &mut [u8], offset: usize, value: u64) {
    buf[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::{BucketHeader, LEAF_PAGE_FLAG, Meta, Page, fnv1a64, write_u16, write_u32, write_u64};
    use crate::core::error::ErrorKind;

    #[test]
    fn fnv1a64_matches_reference_vectors() {
        assert_eq!(fnv1a64(b""), 0xcbf2_9ce4_8422_2325);
        assert_eq!(fnv1a64(b"a"), 0xaf63_dc4c_8601_ec8c);
    }

    #[test]
    fn meta_checksum_is_verified() {
        let meta = Meta {
            page_size: 4096,
            flags: 0,
            root: BucketHeader {
                root: 3,
                sequence: 0,
            },
            freelist: 2,
            pgid: 4,
            txid: 7,
        };
        let mut buf = meta.encode();
        assert_eq!(Meta::decode(&buf).expect("decode"), meta);

        buf[48] ^= 0xFF;
        let err = Meta::decode(&buf).expect_err("checksum");
        assert_eq!(err.kind(), ErrorKind::Open);
    }

    #[test]
    fn leaf_element_past_page_end_is_corrupt() {
        let mut buf = vec![0u8; 64];
        write_u64(&mut buf, 0, 9);
        write_u16(&mut buf, 8, LEAF_PAGE_FLAG);
        write_u16(&mut buf, 10, 1);
        // One element claiming a 100-byte value.
        write_u32(&mut buf, 16, 0);
        write_u32(&mut buf, 20, 16);
        write_u32(&mut buf, 24, 1);
        write_u32(&mut buf, 28, 100);

        let page = Page::parse(&buf).expect("page");
        assert!(page.is_leaf());
        let err = page.leaf_element(0).expect_err("corrupt");
        assert_eq!(err.kind(), ErrorKind::Corrupt);
        assert_eq!(err.page(), Some(9));
    }

    #[test]
    fn element_index_is_bounded_by_count() {
        let mut buf = vec![0u8; 64];
        write_u16(&mut buf, 8, LEAF_PAGE_FLAG);
        let page = Page::parse(&buf).expect("page");
        assert!(page.leaf_element(0).is_err());
    }
}
