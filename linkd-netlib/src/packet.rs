//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use bytes::{Buf, BufMut, Bytes, BytesMut};

// Type aliases.
pub type DecodeResult<T> = Result<T, DecodeError>;

pub const ETHERTYPE_LLDP: u16 = 0x88cc;

// LLDP nearest-bridge multicast address.
const LLDP_MULTICAST: [u8; 6] = [0x01, 0x80, 0xc2, 0x00, 0x00, 0x0e];
// Locally administered source address used for controller-emitted frames.
const CONTROLLER_MAC: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0x01];

const ETHERNET_HDR_LEN: usize = 14;

const TLV_END: u8 = 0;
const TLV_CHASSIS_ID: u8 = 1;
const TLV_PORT_ID: u8 = 2;
const TLV_TTL: u8 = 3;

const CHASSIS_ID_SUBTYPE_LOCAL: u8 = 7;
const PORT_ID_SUBTYPE_LOCAL: u8 = 7;

// Advertised TTL. Receivers age entries by their own freshness policy, so
// the value is informational only.
const DFLT_TTL: u16 = 120;

//
// LLDP frame as used for link discovery: the Chassis ID TLV carries the
// emitting agent's ID and the Port ID TLV the decimal egress port number.
//
//  0                   1                   2
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |    TLV type |     TLV length    |   value...  |
// |   (7 bits)  |      (9 bits)     |             |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LldpFrame {
    pub chassis_id: String,
    pub port_id: String,
    pub ttl: u16,
}

// LLDP decode errors.
#[derive(Debug, Eq, PartialEq)]
pub enum DecodeError {
    IncompleteFrame,
    NotLldp(u16),
    IncompleteTlv,
    MissingChassisId,
    MissingPortId,
}

// ===== impl LldpFrame =====

impl LldpFrame {
    pub fn new(chassis_id: &str, port_id: &str) -> LldpFrame {
        LldpFrame {
            chassis_id: chassis_id.to_owned(),
            port_id: port_id.to_owned(),
            ttl: DFLT_TTL,
        }
    }

    // Encodes the frame, Ethernet header included.
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(128);

        buf.put_slice(&LLDP_MULTICAST);
        buf.put_slice(&CONTROLLER_MAC);
        buf.put_u16(ETHERTYPE_LLDP);

        put_tlv_header(
            &mut buf,
            TLV_CHASSIS_ID,
            1 + self.chassis_id.len() as u16,
        );
        buf.put_u8(CHASSIS_ID_SUBTYPE_LOCAL);
        buf.put_slice(self.chassis_id.as_bytes());

        put_tlv_header(&mut buf, TLV_PORT_ID, 1 + self.port_id.len() as u16);
        buf.put_u8(PORT_ID_SUBTYPE_LOCAL);
        buf.put_slice(self.port_id.as_bytes());

        put_tlv_header(&mut buf, TLV_TTL, 2);
        buf.put_u16(self.ttl);

        put_tlv_header(&mut buf, TLV_END, 0);

        buf
    }

    // Decodes a frame, Ethernet header included. TLVs other than Chassis
    // ID, Port ID and TTL are skipped.
    pub fn decode(data: &[u8]) -> DecodeResult<LldpFrame> {
        let mut buf = Bytes::copy_from_slice(data);

        if buf.remaining() < ETHERNET_HDR_LEN {
            return Err(DecodeError::IncompleteFrame);
        }
        buf.advance(12);
        let ethertype = buf.get_u16();
        if ethertype != ETHERTYPE_LLDP {
            return Err(DecodeError::NotLldp(ethertype));
        }

        let mut chassis_id = None;
        let mut port_id = None;
        let mut ttl = DFLT_TTL;

        while buf.remaining() >= 2 {
            let header = buf.get_u16();
            let tlv_type = (header >> 9) as u8;
            let tlv_len = (header & 0x01ff) as usize;
            if tlv_type == TLV_END {
                break;
            }
            if buf.remaining() < tlv_len {
                return Err(DecodeError::IncompleteTlv);
            }
            let mut value = buf.split_to(tlv_len);

            match tlv_type {
                TLV_CHASSIS_ID if tlv_len > 1 => {
                    value.advance(1);
                    chassis_id =
                        Some(String::from_utf8_lossy(&value).into_owned());
                }
                TLV_PORT_ID if tlv_len > 1 => {
                    value.advance(1);
                    port_id =
                        Some(String::from_utf8_lossy(&value).into_owned());
                }
                TLV_TTL if tlv_len >= 2 => {
                    ttl = value.get_u16();
                }
                _ => (),
            }
        }

        let chassis_id = chassis_id.ok_or(DecodeError::MissingChassisId)?;
        let port_id = port_id.ok_or(DecodeError::MissingPortId)?;

        Ok(LldpFrame {
            chassis_id,
            port_id,
            ttl,
        })
    }
}

// ===== impl DecodeError =====

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::IncompleteFrame => {
                write!(f, "incomplete ethernet frame")
            }
            DecodeError::NotLldp(ethertype) => {
                write!(f, "unexpected ethertype 0x{:04x}", ethertype)
            }
            DecodeError::IncompleteTlv => {
                write!(f, "TLV length exceeds frame")
            }
            DecodeError::MissingChassisId => {
                write!(f, "missing Chassis ID TLV")
            }
            DecodeError::MissingPortId => {
                write!(f, "missing Port ID TLV")
            }
        }
    }
}

impl std::error::Error for DecodeError {}

// ===== helper functions =====

fn put_tlv_header(buf: &mut BytesMut, tlv_type: u8, tlv_len: u16) {
    buf.put_u16(((tlv_type as u16) << 9) | (tlv_len & 0x01ff));
}
