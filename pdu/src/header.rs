//! PCI ("Protocol Control Information") header, adapted from the teacher's
//! `src/packet.rs` single-byte-flags layout and extended to the full field
//! set of spec.md §3/§6.1.
use byteorder::{ByteOrder, LittleEndian};

use crate::width::{self, FIELD_WIDTH};
use crate::PduError;

/// Logical types. Internally every field is a plain `u64`/`u32` regardless of
/// the wire flavour in use; `width` narrows on encode and widens on decode.
pub type Address = u64;
pub type CepId = u64;
pub type QosId = u64;
pub type SeqNum = u64;
pub type PduLen = u32;

/// Data transfer PDU.
pub const PDU_TYPE_DT: u8 = 0x80;
/// Management PDU.
pub const PDU_TYPE_MGMT: u8 = 0x40;
/// Both high bits set marks the control family.
pub const PDU_TYPE_CTRL_MASK: u8 = 0xC0;
/// Control PDU carries flow-control window edges.
pub const FLAG_FC_BIT: u8 = 0x04;
/// Control PDU carries an ack/nack subtype.
pub const FLAG_ACK_BIT: u8 = 0x01;
/// Two-bit ack/nack subtype, shifted into bits 3-4 of the type byte so it
/// aliases neither `FLAG_ACK_BIT` nor `FLAG_FC_BIT` (spec leaves exact bit
/// positions implementation-defined as long as they are disjoint and
/// stable; a combined ACK+FC control PDU, e.g. `sv_update` with both flow
/// and rtx control on, must decode the same ack subtype as an ACK without
/// FC).
const ACK_SUBTYPE_SHIFT: u8 = 3;
const ACK_SUBTYPE_MASK: u8 = 0b0001_1000;

/// Data Run Flag, bit 0 of the `flags` byte.
pub const FLAG_DRF: u8 = 0x01;

/// Ack/nack subtype carried by a control PDU with `FLAG_ACK_BIT` set.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AckSubtype {
    Ack,
    Nack,
    Sack,
    Snack,
}

impl AckSubtype {
    fn from_bits(bits: u8) -> Self {
        match bits {
            0 => AckSubtype::Ack,
            1 => AckSubtype::Nack,
            2 => AckSubtype::Sack,
            _ => AckSubtype::Snack,
        }
    }

    fn to_bits(self) -> u8 {
        match self {
            AckSubtype::Ack => 0,
            AckSubtype::Nack => 1,
            AckSubtype::Sack => 2,
            AckSubtype::Snack => 3,
        }
    }
}

/// `true` iff `pdu_type` marks a control PDU (spec §6.1 `CTRL_MASK`).
pub fn is_ctrl(pdu_type: u8) -> bool {
    pdu_type & PDU_TYPE_CTRL_MASK == PDU_TYPE_CTRL_MASK
}

/// Common header, present on every PDU.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Pci {
    pub dst_addr: Address,
    pub src_addr: Address,
    pub qos_id: QosId,
    pub dst_cep: CepId,
    pub src_cep: CepId,
    pub pdu_type: u8,
    pub flags: u8,
    pub length: PduLen,
    pub seq_num: SeqNum,
    /// Present iff `is_ctrl(pdu_type)`.
    pub ctrl: Option<CtrlPci>,
}

/// Control-PDU extension fields (spec §3).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Default)]
pub struct CtrlPci {
    pub last_ctrl_seq_rcvd: SeqNum,
    pub ack_nack_seq_num: SeqNum,
    pub new_lwe: SeqNum,
    pub new_rwe: SeqNum,
    pub my_lwe: SeqNum,
    pub my_rwe: SeqNum,
}

impl Pci {
    /// `true` if this is a control PDU.
    pub fn is_ctrl(&self) -> bool {
        is_ctrl(self.pdu_type)
    }

    /// `true` if `FLAG_DRF` is set.
    pub fn drf(&self) -> bool {
        self.flags & FLAG_DRF != 0
    }

    /// `true` if the control PDU carries flow-control window edges.
    pub fn fc_bit(&self) -> bool {
        self.pdu_type & FLAG_FC_BIT != 0
    }

    /// `true` if the control PDU carries an ack/nack subtype.
    pub fn ack_bit(&self) -> bool {
        self.pdu_type & FLAG_ACK_BIT != 0
    }

    /// The ack/nack subtype, meaningful only when [`Pci::ack_bit`] is set.
    pub fn ack_subtype(&self) -> AckSubtype {
        AckSubtype::from_bits((self.pdu_type & ACK_SUBTYPE_MASK) >> ACK_SUBTYPE_SHIFT)
    }

    /// Builds the `pdu_type` byte for a control PDU.
    pub fn ctrl_type(fc: bool, ack: Option<AckSubtype>) -> u8 {
        let mut ty = PDU_TYPE_CTRL_MASK;
        if fc {
            ty |= FLAG_FC_BIT;
        }
        if let Some(subtype) = ack {
            ty |= FLAG_ACK_BIT;
            ty |= subtype.to_bits() << ACK_SUBTYPE_SHIFT;
        }
        ty
    }

    /// Number of bytes [`Pci::encode`] will write for this header.
    pub fn encoded_len(&self) -> usize {
        let common = 2 * FIELD_WIDTH // dst/src addr
            + FIELD_WIDTH // qos id
            + 2 * FIELD_WIDTH // dst/src cep
            + 1 // pdu type
            + 1 // flags
            + 4 // length is always a u32 on the wire regardless of flavour
            + FIELD_WIDTH; // seq num
        if self.ctrl.is_some() {
            common + 6 * FIELD_WIDTH
        } else {
            common
        }
    }

    /// Encodes the header into `buf`, little-endian, returning the number of
    /// bytes written.
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize, PduError> {
        let needed = self.encoded_len();
        if buf.len() < needed {
            return Err(PduError::OutOfHeaderSpace);
        }
        let mut off = 0;
        width::write_uint(&mut buf[off..], self.dst_addr)?;
        off += FIELD_WIDTH;
        width::write_uint(&mut buf[off..], self.src_addr)?;
        off += FIELD_WIDTH;
        width::write_uint(&mut buf[off..], self.qos_id)?;
        off += FIELD_WIDTH;
        width::write_uint(&mut buf[off..], self.dst_cep)?;
        off += FIELD_WIDTH;
        width::write_uint(&mut buf[off..], self.src_cep)?;
        off += FIELD_WIDTH;
        buf[off] = self.pdu_type;
        off += 1;
        buf[off] = self.flags;
        off += 1;
        LittleEndian::write_u32(&mut buf[off..off + 4], self.length);
        off += 4;
        width::write_uint(&mut buf[off..], self.seq_num)?;
        off += FIELD_WIDTH;
        if let Some(ctrl) = &self.ctrl {
            for field in [
                ctrl.last_ctrl_seq_rcvd,
                ctrl.ack_nack_seq_num,
                ctrl.new_lwe,
                ctrl.new_rwe,
                ctrl.my_lwe,
                ctrl.my_rwe,
            ] {
                width::write_uint(&mut buf[off..], field)?;
                off += FIELD_WIDTH;
            }
        }
        debug_assert_eq!(off, needed);
        Ok(off)
    }

    /// Decodes a header from `buf`, returning the header and its length.
    pub fn decode(buf: &[u8]) -> Result<(Pci, usize), PduError> {
        let common_len = 5 * FIELD_WIDTH + 2 + 4 + FIELD_WIDTH;
        if buf.len() < common_len {
            return Err(PduError::Truncated);
        }
        let mut off = 0;
        let dst_addr = width::read_uint(&buf[off..]);
        off += FIELD_WIDTH;
        let src_addr = width::read_uint(&buf[off..]);
        off += FIELD_WIDTH;
        let qos_id = width::read_uint(&buf[off..]);
        off += FIELD_WIDTH;
        let dst_cep = width::read_uint(&buf[off..]);
        off += FIELD_WIDTH;
        let src_cep = width::read_uint(&buf[off..]);
        off += FIELD_WIDTH;
        let pdu_type = buf[off];
        off += 1;
        let flags = buf[off];
        off += 1;
        let length = LittleEndian::read_u32(&buf[off..off + 4]);
        off += 4;
        let seq_num = width::read_uint(&buf[off..]);
        off += FIELD_WIDTH;

        let ctrl = if is_ctrl(pdu_type) {
            let ctrl_len = 6 * FIELD_WIDTH;
            if buf.len() < off + ctrl_len {
                return Err(PduError::Truncated);
            }
            let mut read = || {
                let v = width::read_uint(&buf[off..]);
                off += FIELD_WIDTH;
                v
            };
            Some(CtrlPci {
                last_ctrl_seq_rcvd: read(),
                ack_nack_seq_num: read(),
                new_lwe: read(),
                new_rwe: read(),
                my_lwe: read(),
                my_rwe: read(),
            })
        } else {
            None
        };

        Ok((
            Pci {
                dst_addr,
                src_addr,
                qos_id,
                dst_cep,
                src_cep,
                pdu_type,
                flags,
                length,
                seq_num,
                ctrl,
            },
            off,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_data_pdu() {
        let pci = Pci {
            dst_addr: 42,
            src_addr: 7,
            qos_id: 1,
            dst_cep: 3,
            src_cep: 4,
            pdu_type: PDU_TYPE_DT,
            flags: FLAG_DRF,
            length: 128,
            seq_num: 99,
            ctrl: None,
        };
        let mut buf = vec![0u8; pci.encoded_len()];
        let written = pci.encode(&mut buf).unwrap();
        assert_eq!(written, buf.len());
        let (decoded, len) = Pci::decode(&buf).unwrap();
        assert_eq!(len, written);
        assert_eq!(decoded, pci);
        assert!(decoded.drf());
        assert!(!decoded.is_ctrl());
    }

    #[test]
    fn round_trip_ctrl_pdu() {
        let pci = Pci {
            dst_addr: 1,
            src_addr: 2,
            qos_id: 0,
            dst_cep: 5,
            src_cep: 6,
            pdu_type: Pci::ctrl_type(true, Some(AckSubtype::Ack)),
            flags: 0,
            length: 0,
            seq_num: 10,
            ctrl: Some(CtrlPci {
                last_ctrl_seq_rcvd: 9,
                ack_nack_seq_num: 3,
                new_lwe: 4,
                new_rwe: 8,
                my_lwe: 0,
                my_rwe: 4,
            }),
        };
        let mut buf = vec![0u8; pci.encoded_len()];
        pci.encode(&mut buf).unwrap();
        let (decoded, _) = Pci::decode(&buf).unwrap();
        assert_eq!(decoded, pci);
        assert!(decoded.is_ctrl());
        assert!(decoded.fc_bit());
        assert!(decoded.ack_bit());
        assert_eq!(decoded.ack_subtype(), AckSubtype::Ack);
    }

    #[test]
    fn encode_fails_on_short_buffer() {
        let pci = Pci {
            dst_addr: 1,
            src_addr: 1,
            qos_id: 0,
            dst_cep: 0,
            src_cep: 0,
            pdu_type: PDU_TYPE_DT,
            flags: 0,
            length: 0,
            seq_num: 0,
            ctrl: None,
        };
        let mut buf = vec![0u8; pci.encoded_len() - 1];
        assert!(matches!(pci.encode(&mut buf), Err(PduError::OutOfHeaderSpace)));
    }
}
