//! Volume super block
//!
//! The first bytes of every `.dat` file:
//!
//! ```text
//! byte 0     version (1, 2 or 3)
//! byte 1     replica placement, e.g. 000, 001, 010
//! byte 2..4  time to live, see `Ttl`
//! byte 4..6  compaction revision, big-endian
//! byte 6..8  extra size, big-endian
//! then       `extra size` bytes of protobuf `SuperBlockExtra`
//! ```

use crate::backend::BackendStorageFile;
use crate::common::{Error, Result};
use crate::proto::SuperBlockExtra;
use crate::volume::{ReplicaPlacement, Ttl};
use prost::Message;

pub const SUPER_BLOCK_SIZE: usize = 8;

/// Two bytes of length, with the top values held back for future use.
pub const MAX_SUPER_BLOCK_EXTRA_SIZE: usize = 256 * 256 - 2;

pub type Version = u8;

pub const VERSION1: Version = 1;
pub const VERSION2: Version = 2;
pub const VERSION3: Version = 3;
pub const CURRENT_VERSION: Version = VERSION3;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SuperBlock {
    pub version: Version,
    pub replica_placement: Option<ReplicaPlacement>,
    pub ttl: Option<Ttl>,
    pub compaction_revision: u16,
    pub extra: Option<SuperBlockExtra>,
    extra_size: u16,
}

impl SuperBlock {
    /// A super block still to be written; `None` fields are loaded from disk.
    pub fn new(replica_placement: Option<ReplicaPlacement>, ttl: Option<Ttl>) -> Self {
        Self {
            replica_placement,
            ttl,
            ..Default::default()
        }
    }

    pub fn initialized(&self) -> bool {
        self.replica_placement.is_some() && self.ttl.is_some()
    }

    pub fn extra_size(&self) -> u16 {
        self.extra_size
    }

    /// Bytes the super block occupies at the head of the data file.
    pub fn block_size(&self) -> usize {
        match self.version {
            VERSION2 | VERSION3 => SUPER_BLOCK_SIZE + self.extra_size as usize,
            _ => SUPER_BLOCK_SIZE,
        }
    }

    pub fn replica_placement(&self) -> ReplicaPlacement {
        self.replica_placement.unwrap_or_default()
    }

    pub fn ttl(&self) -> Ttl {
        self.ttl.unwrap_or_default()
    }

    /// Encode header and extension; records the extension length.
    pub fn to_bytes(&mut self) -> Result<Vec<u8>> {
        let (Some(replica_placement), Some(ttl)) = (self.replica_placement, self.ttl) else {
            return Err(Error::SuperBlock(
                "refusing to encode an uninitialized super block".into(),
            ));
        };

        let extra_data = match &self.extra {
            Some(extra) => {
                let data = extra.encode_to_vec();
                if data.len() > MAX_SUPER_BLOCK_EXTRA_SIZE {
                    return Err(Error::SuperBlockExtraTooLarge {
                        size: data.len(),
                        max: MAX_SUPER_BLOCK_EXTRA_SIZE,
                    });
                }
                Some(data)
            }
            None => None,
        };

        let mut header = Vec::with_capacity(SUPER_BLOCK_SIZE);
        header.push(self.version);
        header.push(replica_placement.byte());
        header.extend_from_slice(&ttl.to_bytes());
        header.extend_from_slice(&self.compaction_revision.to_be_bytes());

        match extra_data {
            Some(data) => {
                self.extra_size = data.len() as u16;
                header.extend_from_slice(&self.extra_size.to_be_bytes());
                header.extend_from_slice(&data);
            }
            None => header.extend_from_slice(&[0, 0]),
        }

        Ok(header)
    }

    /// Decode the fixed 8-byte header; the extension, if any, is not touched.
    pub fn decode_header(header: &[u8; SUPER_BLOCK_SIZE]) -> Result<Self> {
        let replica_placement = ReplicaPlacement::from_byte(header[1])?;
        Ok(Self {
            version: header[0],
            replica_placement: Some(replica_placement),
            ttl: Some(Ttl::from_bytes([header[2], header[3]])),
            compaction_revision: u16::from_be_bytes([header[4], header[5]]),
            extra: None,
            extra_size: u16::from_be_bytes([header[6], header[7]]),
        })
    }
}

/// Read a super block from the head of a data file.
pub async fn read_super_block(file: &dyn BackendStorageFile) -> Result<SuperBlock> {
    let mut header = [0u8; SUPER_BLOCK_SIZE];
    let n = file
        .read_at(&mut header, 0)
        .await
        .map_err(|e| Error::SuperBlock(format!("cannot read volume {} super block: {}", file, e)))?;
    if n < SUPER_BLOCK_SIZE {
        return Err(Error::SuperBlock(format!(
            "cannot read volume {} super block: only {} of {} bytes present",
            file, n, SUPER_BLOCK_SIZE
        )));
    }

    let mut super_block = SuperBlock::decode_header(&header)?;

    if super_block.extra_size > 0 {
        let mut extra_data = vec![0u8; super_block.extra_size as usize];
        let n = file
            .read_at(&mut extra_data, SUPER_BLOCK_SIZE as u64)
            .await
            .map_err(|e| {
                Error::SuperBlock(format!("cannot read volume {} super block extra: {}", file, e))
            })?;
        if n < extra_data.len() {
            return Err(Error::SuperBlock(format!(
                "cannot read volume {} super block extra: only {} of {} bytes present",
                file,
                n,
                extra_data.len()
            )));
        }
        let extra = SuperBlockExtra::decode(extra_data.as_slice()).map_err(|e| {
            Error::SuperBlock(format!("cannot read volume {} super block extra: {}", file, e))
        })?;
        super_block.extra = Some(extra);
    }

    Ok(super_block)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendStorage, MemoryBackendStorage};
    use crate::proto::super_block_extra::ErasureCoding;
    use crate::volume::TtlUnit;

    fn initialized() -> SuperBlock {
        let mut sb = SuperBlock::new(
            Some("001".parse().unwrap()),
            Some(Ttl::new(3, TtlUnit::Day)),
        );
        sb.version = CURRENT_VERSION;
        sb
    }

    #[test]
    fn test_header_layout() {
        let mut sb = initialized();
        sb.compaction_revision = 0x0102;
        let bytes = sb.to_bytes().unwrap();
        assert_eq!(bytes, vec![3, 1, 3, 3, 0x01, 0x02, 0, 0]);
        assert_eq!(sb.block_size(), SUPER_BLOCK_SIZE);
    }

    #[test]
    fn test_header_decode_matches_encode() {
        for (version, rp, ttl, revision) in [
            (VERSION1, "000", Ttl::EMPTY, 0u16),
            (VERSION2, "010", Ttl::new(5, TtlUnit::Hour), 7),
            (VERSION3, "222", Ttl::new(255, TtlUnit::Year), u16::MAX),
        ] {
            let mut sb = SuperBlock::new(Some(rp.parse().unwrap()), Some(ttl));
            sb.version = version;
            sb.compaction_revision = revision;

            let bytes = sb.to_bytes().unwrap();
            let header: [u8; SUPER_BLOCK_SIZE] = bytes[..SUPER_BLOCK_SIZE].try_into().unwrap();
            assert_eq!(SuperBlock::decode_header(&header).unwrap(), sb);
        }
    }

    #[test]
    fn test_uninitialized_is_not_encoded() {
        let mut sb = SuperBlock::new(Some(ReplicaPlacement::default()), None);
        assert!(!sb.initialized());
        assert!(matches!(sb.to_bytes(), Err(Error::SuperBlock(_))));
    }

    #[test]
    fn test_extra_too_large() {
        let mut sb = initialized();
        sb.extra = Some(SuperBlockExtra {
            erasure_coding: Some(ErasureCoding {
                data: 10,
                parity: 4,
                volume_ids: (1u32 << 28..(1u32 << 28) + 20_000).collect(),
            }),
        });
        let err = sb.to_bytes().unwrap_err();
        assert!(matches!(err, Error::SuperBlockExtraTooLarge { max: MAX_SUPER_BLOCK_EXTRA_SIZE, .. }));
        assert!(err.is_fatal());
        assert_eq!(sb.extra_size(), 0);
    }

    #[test]
    fn test_invalid_replica_byte() {
        let header = [3u8, 3, 0, 0, 0, 0, 0, 0];
        assert!(matches!(
            SuperBlock::decode_header(&header),
            Err(Error::InvalidReplicaPlacement(ref s)) if s == "003"
        ));
    }

    #[tokio::test]
    async fn test_read_with_extra() {
        let storage = MemoryBackendStorage::new("default");
        let file = storage.new_storage_file("1.dat");

        let mut sb = initialized();
        sb.extra = Some(SuperBlockExtra {
            erasure_coding: Some(ErasureCoding {
                data: 10,
                parity: 4,
                volume_ids: vec![1, 2, 3],
            }),
        });
        let bytes = sb.to_bytes().unwrap();
        file.as_writable().unwrap().write_at(&bytes, 0).await.unwrap();

        let read = read_super_block(file.as_ref()).await.unwrap();
        assert_eq!(read, sb);
        assert_eq!(read.block_size(), bytes.len());
        assert_eq!(
            read.extra.unwrap().erasure_coding.unwrap().volume_ids,
            vec![1, 2, 3]
        );
    }

    #[tokio::test]
    async fn test_short_file() {
        let storage = MemoryBackendStorage::new("default");
        let file = storage.new_storage_file("1.dat");
        file.as_writable().unwrap().write_at(&[3, 0, 0], 0).await.unwrap();

        assert!(matches!(
            read_super_block(file.as_ref()).await,
            Err(Error::SuperBlock(_))
        ));
    }

    #[tokio::test]
    async fn test_truncated_extra() {
        let storage = MemoryBackendStorage::new("default");
        let file = storage.new_storage_file("1.dat");
        file.as_writable()
            .unwrap()
            .write_at(&[3, 0, 0, 0, 0, 0, 0, 16, 8], 0)
            .await
            .unwrap();

        assert!(matches!(
            read_super_block(file.as_ref()).await,
            Err(Error::SuperBlock(_))
        ));
    }
}
