//! Protobuf messages exchanged with the master
//!
//! Field numbers match the master's `master.proto`, so these encode to the
//! same bytes as the generated code the rest of the cluster uses.

use serde::Serialize;
use std::collections::HashMap;

/// Optional extension stored after the fixed super block header.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SuperBlockExtra {
    #[prost(message, optional, tag = "1")]
    pub erasure_coding: Option<super_block_extra::ErasureCoding>,
}

pub mod super_block_extra {
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct ErasureCoding {
        #[prost(uint32, tag = "1")]
        pub data: u32,
        #[prost(uint32, tag = "2")]
        pub parity: u32,
        #[prost(uint32, repeated, tag = "3")]
        pub volume_ids: Vec<u32>,
    }
}

/// One backend definition, as pushed by the master to keep volume servers in sync.
#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct StorageBackend {
    #[prost(string, tag = "1")]
    pub r#type: String,
    #[prost(string, tag = "2")]
    pub id: String,
    #[prost(map = "string, string", tag = "3")]
    pub properties: HashMap<String, String>,
}

/// Point-in-time report of one volume.
#[derive(Clone, PartialEq, Serialize, ::prost::Message)]
pub struct VolumeInformationMessage {
    #[prost(uint32, tag = "1")]
    pub id: u32,
    #[prost(uint64, tag = "2")]
    pub size: u64,
    #[prost(string, tag = "3")]
    pub collection: String,
    #[prost(uint64, tag = "4")]
    pub file_count: u64,
    #[prost(uint64, tag = "5")]
    pub delete_count: u64,
    #[prost(uint64, tag = "6")]
    pub deleted_byte_count: u64,
    #[prost(bool, tag = "7")]
    pub read_only: bool,
    #[prost(uint32, tag = "8")]
    pub replica_placement: u32,
    #[prost(uint32, tag = "9")]
    pub version: u32,
    #[prost(uint32, tag = "10")]
    pub ttl: u32,
    #[prost(uint32, tag = "11")]
    pub compact_revision: u32,
    #[prost(int64, tag = "12")]
    pub modified_at_second: i64,
    #[prost(string, tag = "13")]
    pub remote_storage_name: String,
    #[prost(string, tag = "14")]
    pub remote_storage_key: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn test_storage_backend_wire_roundtrip() {
        let mut properties = HashMap::new();
        properties.insert("bucket".to_string(), "pictures".to_string());
        let backend = StorageBackend {
            r#type: "s3".into(),
            id: "default".into(),
            properties,
        };

        let decoded = StorageBackend::decode(backend.encode_to_vec().as_slice()).unwrap();
        assert_eq!(decoded, backend);
    }

    #[test]
    fn test_empty_extra_encodes_to_nothing() {
        assert!(SuperBlockExtra::default().encode_to_vec().is_empty());
    }
}
