//! Catalog
//!
//! Records which index is built over the record log and with which
//! parameters, so a reopen attaches to the same files.
//!
//! ## File Format
//! ```text
//! ┌───────────┬─────────────┬──────────┬──────────┬──────────────────┐
//! │ Magic (4) │ Version (2) │ Len (4)  │ CRC (4)  │ bincode body     │
//! └───────────┴─────────────┴──────────┴──────────┴──────────────────┘
//! ```
//!
//! The CRC covers the body only. The file is written to a temporary sibling
//! and renamed over the old one.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::{validate_load_factor, validate_tree_order, Config, IndexKind};
use crate::error::{DexError, Result};

/// Magic bytes at the start of every catalog file
pub const MAGIC: &[u8; 4] = b"DXCT";

/// Catalog format version
pub const VERSION: u16 = 1;

/// Magic (4) + Version (2) + Len (4) + CRC (4)
const FRAME_SIZE: usize = 14;

/// Active index description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    pub index_kind: IndexKind,
    pub tree_order: u64,
    pub hash_load_factor: u64,
}

impl Catalog {
    pub fn from_config(config: &Config) -> Self {
        Self {
            index_kind: config.index_kind,
            tree_order: config.tree_order,
            hash_load_factor: config.hash_load_factor,
        }
    }

    /// Same catalog with a different index kind
    pub fn with_kind(self, index_kind: IndexKind) -> Self {
        Self { index_kind, ..self }
    }

    /// Load the catalog at `path`, `None` if there is none yet
    pub fn load(path: &Path) -> Result<Option<Self>> {
        let raw = match fs::read(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Self::decode(&raw).map(Some)
    }

    /// Replace the catalog at `path`
    pub fn store(&self, path: &Path) -> Result<()> {
        let frame = self.encode()?;
        let tmp = path.with_extension("tmp");
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&frame)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, path)?;

        tracing::debug!(path = %path.display(), kind = %self.index_kind, "Stored catalog");
        Ok(())
    }

    fn encode(&self) -> Result<Vec<u8>> {
        let body = bincode::serialize(self).map_err(|e| DexError::Serialization(e.to_string()))?;

        let mut frame = Vec::with_capacity(FRAME_SIZE + body.len());
        frame.extend_from_slice(MAGIC);
        frame.extend_from_slice(&VERSION.to_le_bytes());
        frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
        frame.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());
        frame.extend_from_slice(&body);
        Ok(frame)
    }

    fn decode(raw: &[u8]) -> Result<Self> {
        if raw.len() < FRAME_SIZE || &raw[..4] != MAGIC {
            return Err(DexError::corruption("catalog has no valid header"));
        }

        let version = u16::from_le_bytes([raw[4], raw[5]]);
        if version != VERSION {
            return Err(DexError::corruption(format!("unsupported catalog version {}", version)));
        }

        let len = u32::from_le_bytes([raw[6], raw[7], raw[8], raw[9]]) as usize;
        let crc = u32::from_le_bytes([raw[10], raw[11], raw[12], raw[13]]);
        let body = &raw[FRAME_SIZE..];
        if body.len() != len {
            return Err(DexError::corruption(format!(
                "catalog body is {} bytes, header says {}",
                body.len(),
                len
            )));
        }
        if crc32fast::hash(body) != crc {
            return Err(DexError::corruption("catalog checksum mismatch"));
        }

        let catalog: Catalog =
            bincode::deserialize(body).map_err(|e| DexError::Serialization(e.to_string()))?;
        catalog.validate()?;
        Ok(catalog)
    }

    fn validate(&self) -> Result<()> {
        validate_tree_order(self.tree_order)
            .and_then(|_| validate_load_factor(self.hash_load_factor))
            .map_err(|e| DexError::corruption(format!("catalog: {}", e)))
    }
}
