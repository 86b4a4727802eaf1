//! Wire width of the "flavour" mechanism (spec §6.1).
//!
//! All PCI integer fields (address, sequence number, PDU length, CEP-id,
//! QoS-id) share one width per build, selected by cargo feature. Peers in
//! the same DIF must be built with the same flavour; this crate does not
//! negotiate it.
use byteorder::{ByteOrder, LittleEndian};

use crate::PduError;

#[cfg(feature = "width8")]
pub const FIELD_WIDTH: usize = 1;
#[cfg(feature = "width16")]
pub const FIELD_WIDTH: usize = 2;
#[cfg(all(
    feature = "width32",
    not(feature = "width8"),
    not(feature = "width16"),
    not(feature = "width64")
))]
pub const FIELD_WIDTH: usize = 4;
#[cfg(feature = "width64")]
pub const FIELD_WIDTH: usize = 8;

/// Writes `value` into `buf[..FIELD_WIDTH]`, little-endian.
///
/// Fails if `value` does not fit in the configured flavour width.
pub fn write_uint(buf: &mut [u8], value: u64) -> Result<(), PduError> {
    debug_assert!(buf.len() >= FIELD_WIDTH);
    if FIELD_WIDTH < 8 && value >= (1u64 << (FIELD_WIDTH * 8)) {
        return Err(PduError::FieldOverflow { value, width: FIELD_WIDTH });
    }
    match FIELD_WIDTH {
        1 => buf[0] = value as u8,
        2 => LittleEndian::write_u16(buf, value as u16),
        4 => LittleEndian::write_u32(buf, value as u32),
        8 => LittleEndian::write_u64(buf, value),
        _ => unreachable!("FIELD_WIDTH is one of {1, 2, 4, 8}"),
    }
    Ok(())
}

/// Reads a little-endian integer of `FIELD_WIDTH` bytes from `buf`.
pub fn read_uint(buf: &[u8]) -> u64 {
    debug_assert!(buf.len() >= FIELD_WIDTH);
    match FIELD_WIDTH {
        1 => buf[0] as u64,
        2 => LittleEndian::read_u16(buf) as u64,
        4 => LittleEndian::read_u32(buf) as u64,
        8 => LittleEndian::read_u64(buf),
        _ => unreachable!("FIELD_WIDTH is one of {1, 2, 4, 8}"),
    }
}
