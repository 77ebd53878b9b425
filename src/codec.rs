//! Checked little-endian field readers
//!
//! `bytes::Buf` getters panic on short input; on-disk structures must report
//! corruption instead, so every field read goes through these helpers.

use bytes::Buf;

use crate::arena::Address;
use crate::error::{DexError, Result};

pub(crate) fn get_i64(buf: &mut &[u8], field: &str) -> Result<i64> {
    if buf.remaining() < 8 {
        return Err(DexError::corruption(format!("truncated field '{}'", field)));
    }
    Ok(buf.get_i64_le())
}

pub(crate) fn get_u32(buf: &mut &[u8], field: &str) -> Result<u32> {
    if buf.remaining() < 4 {
        return Err(DexError::corruption(format!("truncated field '{}'", field)));
    }
    Ok(buf.get_u32_le())
}

/// Non-negative 64-bit count or size
pub(crate) fn get_len(buf: &mut &[u8], field: &str) -> Result<u64> {
    let raw = get_i64(buf, field)?;
    u64::try_from(raw)
        .map_err(|_| DexError::corruption(format!("negative value {} in field '{}'", raw, field)))
}

pub(crate) fn get_address(buf: &mut &[u8], field: &str) -> Result<Address> {
    Address::from_disk(get_i64(buf, field)?)
}

pub(crate) fn get_bytes(buf: &mut &[u8], len: usize, field: &str) -> Result<Vec<u8>> {
    if buf.remaining() < len {
        return Err(DexError::corruption(format!("truncated field '{}'", field)));
    }
    let out = buf[..len].to_vec();
    buf.advance(len);
    Ok(out)
}
