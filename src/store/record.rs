//! Record and slot definitions

use crate::arena::Address;
use crate::error::{DexError, Result};

/// Size of the id tag at the front of every record payload
pub const ID_SIZE: usize = 4;

/// Liveness flag stored in front of every slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tombstone {
    /// Slot holds the current version of its record
    Alive,

    /// Slot was deleted or superseded
    Dead,
}

impl Tombstone {
    pub(crate) fn to_disk(self) -> u32 {
        match self {
            Tombstone::Alive => 0,
            Tombstone::Dead => 1,
        }
    }

    pub(crate) fn from_disk(raw: u32) -> Result<Self> {
        match raw {
            0 => Ok(Tombstone::Alive),
            1 => Ok(Tombstone::Dead),
            other => Err(DexError::corruption(format!("invalid tombstone value {}", other))),
        }
    }

    pub fn is_alive(self) -> bool {
        self == Tombstone::Alive
    }
}

/// One slot as read back from the log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    pub address: Address,
    pub tombstone: Tombstone,
    pub payload: Vec<u8>,
}

impl Slot {
    pub fn is_alive(&self) -> bool {
        self.tombstone.is_alive()
    }

    /// Id tag of the record held in this slot
    pub fn record_id(&self) -> Result<u32> {
        Record::id_of(&self.payload)
    }
}

/// A record: caller-chosen id plus opaque body
///
/// Encoded payload: `[id: u32 LE][body]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub id: u32,
    pub body: Vec<u8>,
}

impl Record {
    pub fn new(id: u32, body: impl Into<Vec<u8>>) -> Self {
        Self {
            id,
            body: body.into(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(ID_SIZE + self.body.len());
        payload.extend_from_slice(&self.id.to_le_bytes());
        payload.extend_from_slice(&self.body);
        payload
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        let id = Self::id_of(payload)?;
        Ok(Self {
            id,
            body: payload[ID_SIZE..].to_vec(),
        })
    }

    /// Read only the id tag of an encoded payload
    pub fn id_of(payload: &[u8]) -> Result<u32> {
        let tag: [u8; ID_SIZE] = payload
            .get(..ID_SIZE)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| {
                DexError::corruption(format!(
                    "payload of {} bytes is too short for a record id",
                    payload.len()
                ))
            })?;
        Ok(u32::from_le_bytes(tag))
    }
}
