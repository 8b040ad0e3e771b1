// etcd `mvccpb.KeyValue` envelope: one versioned record as stored in the `key` bucket.
use crate::core::error::{Error, ErrorKind};

/// One physical entry of the store. Field tags follow `mvccpb.KeyValue`.
#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct VersionedRecord {
    #[prost(bytes = "vec", tag = "1")]
    pub key: Vec<u8>,
    #[prost(int64, tag = "2")]
    pub create_revision: i64,
    #[prost(int64, tag = "3")]
    pub mod_revision: i64,
    #[prost(int64, tag = "4")]
    pub version: i64,
    #[prost(bytes = "vec", tag = "5")]
    pub value: Vec<u8>,
    #[prost(int64, tag = "6")]
    pub lease: i64,
}

impl VersionedRecord {
    pub fn key_str(&self) -> String {
        String::from_utf8_lossy(&self.key).into_owned()
    }

    pub fn encode(&self) -> Vec<u8> {
        ::prost::Message::encode_to_vec(self)
    }
}

pub fn decode(raw: &[u8]) -> Result<VersionedRecord, Error> {
    <VersionedRecord as ::prost::Message>::decode(raw).map_err(|err| {
        Error::new(ErrorKind::Decode)
            .with_message("invalid etcd key-value envelope")
            .with_source(err)
    })
}
