//! AgentX PDU header and message codec (RFC 2741 §6).
//!
//! # Header Wire Format (RFC 2741 §6.1)
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |   h.version   |    h.type     |    h.flags    |  <reserved>   |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                          h.sessionID                          |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        h.transactionID                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                          h.packetID                           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        h.payload_length                       |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Multi-byte fields of the header and of the payload follow the byte order
//! announced by the NETWORK_BYTE_ORDER flag of that same PDU.

mod payload;

pub use payload::{
    AddAgentCapsPdu, ClosePdu, CloseReason, GetBulkPdu, OpenPdu, Payload, RegisterPdu,
    RemoveAgentCapsPdu, ResponsePdu, SearchRange, SearchRangeList, UnregisterPdu, VarBindList,
};

use crate::{
    error::ParseError,
    wire::{ByteOrder, WireReader, WireWriter},
};

/// AgentX protocol version.
pub const AGENTX_VERSION: u8 = 1;

/// PDU header size in bytes.
pub const PDU_HEADER_SIZE: usize = 20;

// --- Header flag bits (RFC 2741 §6.1) ---

pub const FLAG_INSTANCE_REGISTRATION: u8 = 0x01;
pub const FLAG_NEW_INDEX: u8 = 0x02;
pub const FLAG_ANY_INDEX: u8 = 0x04;
pub const FLAG_NON_DEFAULT_CONTEXT: u8 = 0x08;
pub const FLAG_NETWORK_BYTE_ORDER: u8 = 0x10;

/// PDU type tags (RFC 2741 §6.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PduType {
    Open = 1,
    Close = 2,
    Register = 3,
    Unregister = 4,
    Get = 5,
    GetNext = 6,
    GetBulk = 7,
    TestSet = 8,
    CommitSet = 9,
    UndoSet = 10,
    CleanupSet = 11,
    Notify = 12,
    Ping = 13,
    IndexAllocate = 14,
    IndexDeallocate = 15,
    AddAgentCaps = 16,
    RemoveAgentCaps = 17,
    Response = 18,
}

impl PduType {
    pub fn from_u8(tag: u8) -> Result<Self, ParseError> {
        Ok(match tag {
            1 => PduType::Open,
            2 => PduType::Close,
            3 => PduType::Register,
            4 => PduType::Unregister,
            5 => PduType::Get,
            6 => PduType::GetNext,
            7 => PduType::GetBulk,
            8 => PduType::TestSet,
            9 => PduType::CommitSet,
            10 => PduType::UndoSet,
            11 => PduType::CleanupSet,
            12 => PduType::Notify,
            13 => PduType::Ping,
            14 => PduType::IndexAllocate,
            15 => PduType::IndexDeallocate,
            16 => PduType::AddAgentCaps,
            17 => PduType::RemoveAgentCaps,
            18 => PduType::Response,
            other => return Err(ParseError::UnknownPduType(other)),
        })
    }

    /// Whether a non-default context may precede the payload.
    pub fn allows_context(self) -> bool {
        !matches!(
            self,
            PduType::Open
                | PduType::Close
                | PduType::CommitSet
                | PduType::UndoSet
                | PduType::CleanupSet
                | PduType::Response
        )
    }
}

/// Header flags that carry request semantics. Byte order and context
/// presence are derived from [`Pdu::byte_order`] and [`Pdu::context`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PduFlags {
    pub instance_registration: bool,
    pub new_index: bool,
    pub any_index: bool,
}

impl PduFlags {
    fn from_bits(bits: u8) -> Self {
        PduFlags {
            instance_registration: bits & FLAG_INSTANCE_REGISTRATION != 0,
            new_index: bits & FLAG_NEW_INDEX != 0,
            any_index: bits & FLAG_ANY_INDEX != 0,
        }
    }

    fn bits(&self) -> u8 {
        let mut bits = 0;
        if self.instance_registration {
            bits |= FLAG_INSTANCE_REGISTRATION;
        }
        if self.new_index {
            bits |= FLAG_NEW_INDEX;
        }
        if self.any_index {
            bits |= FLAG_ANY_INDEX;
        }
        bits
    }
}

/// Decoded AgentX PDU header (20 bytes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PduHeader {
    pub version: u8,
    /// Raw type tag; validated when the payload is decoded.
    pub pdu_type: u8,
    pub flags: u8,
    pub session_id: u32,
    pub transaction_id: u32,
    pub packet_id: u32,
    pub payload_length: u32,
}

impl PduHeader {
    /// Decodes a header, reading the integers in the byte order the flags
    /// announce. Leaves the reader in that byte order.
    pub fn decode(r: &mut WireReader<'_>) -> Result<PduHeader, ParseError> {
        let version = r.read_u8()?;
        if version != AGENTX_VERSION {
            return Err(ParseError::UnsupportedVersion(version));
        }
        let pdu_type = r.read_u8()?;
        let flags = r.read_u8()?;
        r.skip(1)?;
        r.set_order(byte_order_of(flags));
        Ok(PduHeader {
            version,
            pdu_type,
            flags,
            session_id: r.read_u32()?,
            transaction_id: r.read_u32()?,
            packet_id: r.read_u32()?,
            payload_length: r.read_u32()?,
        })
    }

    /// Decodes a header from the first [`PDU_HEADER_SIZE`] bytes of `buf`.
    pub fn from_bytes(buf: &[u8]) -> Result<PduHeader, ParseError> {
        let mut r = WireReader::new(buf, ByteOrder::BigEndian);
        PduHeader::decode(&mut r)
    }

    pub fn byte_order(&self) -> ByteOrder {
        byte_order_of(self.flags)
    }
}

fn byte_order_of(flags: u8) -> ByteOrder {
    if flags & FLAG_NETWORK_BYTE_ORDER != 0 {
        ByteOrder::BigEndian
    } else {
        ByteOrder::LittleEndian
    }
}

/// A complete AgentX PDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pdu {
    pub byte_order: ByteOrder,
    pub flags: PduFlags,
    pub session_id: u32,
    pub transaction_id: u32,
    pub packet_id: u32,
    /// Non-default context, only meaningful for types that allow one.
    pub context: Option<Vec<u8>>,
    pub payload: Payload,
}

impl Pdu {
    /// Creates a PDU in network byte order with zeroed identifiers.
    pub fn new(payload: Payload) -> Self {
        Pdu {
            byte_order: ByteOrder::BigEndian,
            flags: PduFlags::default(),
            session_id: 0,
            transaction_id: 0,
            packet_id: 0,
            context: None,
            payload,
        }
    }

    /// Builds the Response to `request`: same identifiers and byte order,
    /// no flags, no context.
    pub fn response_to(request: &Pdu, response: ResponsePdu) -> Self {
        Pdu {
            byte_order: request.byte_order,
            flags: PduFlags::default(),
            session_id: request.session_id,
            transaction_id: request.transaction_id,
            packet_id: request.packet_id,
            context: None,
            payload: Payload::Response(response),
        }
    }

    pub fn pdu_type(&self) -> PduType {
        self.payload.pdu_type()
    }

    fn header_flags(&self) -> u8 {
        let mut bits = self.flags.bits();
        if self.context.is_some() && self.pdu_type().allows_context() {
            bits |= FLAG_NON_DEFAULT_CONTEXT;
        }
        if self.byte_order == ByteOrder::BigEndian {
            bits |= FLAG_NETWORK_BYTE_ORDER;
        }
        bits
    }

    /// Serializes header and payload; the payload length is computed from
    /// the encoded payload.
    pub fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::with_capacity(self.byte_order, PDU_HEADER_SIZE + 64);
        w.write_u8(AGENTX_VERSION);
        w.write_u8(self.pdu_type() as u8);
        w.write_u8(self.header_flags());
        w.write_reserved(1);
        w.write_u32(self.session_id);
        w.write_u32(self.transaction_id);
        w.write_u32(self.packet_id);
        let length_offset = w.len();
        w.write_u32(0);

        if let Some(ref context) = self.context {
            if self.pdu_type().allows_context() {
                w.write_octet_string(context);
            }
        }
        self.payload.encode(&mut w);

        let payload_length = (w.len() - PDU_HEADER_SIZE) as u32;
        w.patch_u32(length_offset, payload_length);
        w.into_bytes()
    }

    /// Decodes one PDU from the reader, consuming exactly its bytes.
    ///
    /// Fails on truncation, a payload length larger than the remaining
    /// buffer, a payload that does not fill its declared length, an unknown
    /// type tag or an unsupported version.
    pub fn decode(r: &mut WireReader<'_>) -> Result<Pdu, ParseError> {
        let header = PduHeader::decode(r)?;
        let payload_length = header.payload_length as usize;
        if payload_length > r.remaining() {
            return Err(ParseError::PayloadLength {
                declared: payload_length,
                available: r.remaining(),
            });
        }
        let pdu_type = PduType::from_u8(header.pdu_type)?;

        let mut body = r.sub_reader(payload_length)?;
        let context = if header.flags & FLAG_NON_DEFAULT_CONTEXT != 0 && pdu_type.allows_context()
        {
            Some(body.read_octet_string()?)
        } else {
            None
        };
        let payload = Payload::decode(pdu_type, &mut body)?;
        if !body.is_empty() {
            return Err(ParseError::PayloadMismatch {
                declared: payload_length,
                consumed: body.position(),
            });
        }

        Ok(Pdu {
            byte_order: header.byte_order(),
            flags: PduFlags::from_bits(header.flags),
            session_id: header.session_id,
            transaction_id: header.transaction_id,
            packet_id: header.packet_id,
            context,
            payload,
        })
    }

    /// Decodes a PDU occupying the whole of `buf`.
    pub fn from_bytes(buf: &[u8]) -> Result<Pdu, ParseError> {
        let mut r = WireReader::new(buf, ByteOrder::BigEndian);
        let pdu = Pdu::decode(&mut r)?;
        if !r.is_empty() {
            return Err(ParseError::PayloadMismatch {
                declared: buf.len() - r.remaining() - PDU_HEADER_SIZE,
                consumed: buf.len() - PDU_HEADER_SIZE,
            });
        }
        Ok(pdu)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorStatus;
    use crate::oid;
    use crate::oid::Oid;
    use crate::value::Value;
    use crate::varbind::VarBind;

    fn roundtrip(pdu: &Pdu) {
        let bytes = pdu.encode();
        let decoded = Pdu::from_bytes(&bytes).unwrap();
        assert_eq!(&decoded, pdu);
        assert_eq!(decoded.encode(), bytes);
    }

    fn sample_payloads() -> Vec<Payload> {
        let vbs = vec![
            VarBind::new(oid!(1, 3, 6, 1, 4, 1, 9999, 1, 0), Value::Integer(-7)),
            VarBind::new(oid!(1, 3, 6, 1, 4, 1, 9999, 2, 0), Value::from("agentx")),
            VarBind::new(oid!(1, 3, 6, 1, 4, 1, 9999, 3, 0), Value::Counter64(u64::MAX)),
        ];
        let ranges = vec![
            SearchRange::new(oid!(1, 3, 6, 1, 4, 1, 9999).with_include(true), Oid::null()),
            SearchRange::new(oid!(1, 3, 6, 1, 2, 1), oid!(1, 3, 6, 1, 2, 2)),
        ];
        vec![
            Payload::Open(OpenPdu {
                timeout: 5,
                id: oid!(1, 3, 6, 1, 4, 1, 9999),
                description: b"test sub-agent".to_vec(),
            }),
            Payload::Close(ClosePdu {
                reason: CloseReason::Shutdown,
            }),
            Payload::Register(RegisterPdu {
                timeout: 5,
                priority: 127,
                range_subid: 0,
                subtree: oid!(1, 3, 6, 1, 4, 1, 9999),
                upper_bound: 0,
            }),
            Payload::Register(RegisterPdu {
                timeout: 0,
                priority: 1,
                range_subid: 9,
                subtree: oid!(1, 3, 6, 1, 2, 1, 2, 2, 1, 1, 1),
                upper_bound: 24,
            }),
            Payload::Unregister(UnregisterPdu {
                priority: 127,
                range_subid: 0,
                subtree: oid!(1, 3, 6, 1, 4, 1, 9999),
                upper_bound: 0,
            }),
            Payload::Get(SearchRangeList {
                ranges: ranges.clone(),
            }),
            Payload::GetNext(SearchRangeList {
                ranges: ranges.clone(),
            }),
            Payload::GetBulk(GetBulkPdu {
                non_repeaters: 1,
                max_repetitions: 10,
                ranges,
            }),
            Payload::TestSet(VarBindList {
                varbinds: vbs.clone(),
            }),
            Payload::CommitSet,
            Payload::UndoSet,
            Payload::CleanupSet,
            Payload::Notify(VarBindList {
                varbinds: vbs.clone(),
            }),
            Payload::Ping,
            Payload::IndexAllocate(VarBindList {
                varbinds: vec![VarBind::new(oid!(1, 3, 6, 1, 4, 1, 9999, 5), Value::Integer(3))],
            }),
            Payload::IndexDeallocate(VarBindList {
                varbinds: vec![VarBind::new(oid!(1, 3, 6, 1, 4, 1, 9999, 5), Value::Integer(3))],
            }),
            Payload::AddAgentCaps(AddAgentCapsPdu {
                id: oid!(1, 3, 6, 1, 4, 1, 9999, 10),
                description: b"caps".to_vec(),
            }),
            Payload::RemoveAgentCaps(RemoveAgentCapsPdu {
                id: oid!(1, 3, 6, 1, 4, 1, 9999, 10),
            }),
            Payload::Response(ResponsePdu {
                sys_uptime: 12345,
                error: ErrorStatus::NotWritable,
                index: 2,
                varbinds: vbs,
            }),
        ]
    }

    #[test]
    fn test_roundtrip_every_pdu_type_both_byte_orders() {
        for payload in sample_payloads() {
            for order in [ByteOrder::BigEndian, ByteOrder::LittleEndian] {
                let mut pdu = Pdu::new(payload.clone());
                pdu.byte_order = order;
                pdu.session_id = 42;
                pdu.transaction_id = 7;
                pdu.packet_id = u32::MAX;
                roundtrip(&pdu);
            }
        }
    }

    #[test]
    fn test_roundtrip_with_context() {
        for payload in sample_payloads() {
            let mut pdu = Pdu::new(payload);
            if !pdu.pdu_type().allows_context() {
                continue;
            }
            pdu.context = Some(b"ctx1".to_vec());
            roundtrip(&pdu);
        }
    }

    #[test]
    fn test_flags_roundtrip() {
        let mut pdu = Pdu::new(Payload::IndexAllocate(VarBindList {
            varbinds: vec![VarBind::null(oid!(1, 3, 6, 1, 4, 1, 9999, 7))],
        }));
        pdu.flags.new_index = true;
        pdu.flags.any_index = true;
        roundtrip(&pdu);

        let bytes = pdu.encode();
        assert_eq!(bytes[2], FLAG_NEW_INDEX | FLAG_ANY_INDEX | FLAG_NETWORK_BYTE_ORDER);
    }

    #[test]
    fn test_pdu_header_encode_decode() {
        let mut pdu = Pdu::new(Payload::Ping);
        pdu.session_id = 42;
        pdu.transaction_id = 7;
        pdu.packet_id = 99;
        let bytes = pdu.encode();
        assert_eq!(bytes.len(), PDU_HEADER_SIZE);

        let header = PduHeader::from_bytes(&bytes).unwrap();
        assert_eq!(header.version, AGENTX_VERSION);
        assert_eq!(header.pdu_type, PduType::Ping as u8);
        assert_eq!(header.session_id, 42);
        assert_eq!(header.transaction_id, 7);
        assert_eq!(header.packet_id, 99);
        assert_eq!(header.payload_length, 0);
    }

    #[test]
    fn test_little_endian_header_layout() {
        let mut pdu = Pdu::new(Payload::Ping);
        pdu.byte_order = ByteOrder::LittleEndian;
        pdu.session_id = 1;
        let bytes = pdu.encode();
        assert_eq!(bytes[2] & FLAG_NETWORK_BYTE_ORDER, 0);
        assert_eq!(&bytes[4..8], &[1, 0, 0, 0]);
        assert_eq!(PduHeader::from_bytes(&bytes).unwrap().session_id, 1);
    }

    #[test]
    fn test_register_layout() {
        let mut pdu = Pdu::new(Payload::Register(RegisterPdu {
            timeout: 5,
            priority: 127,
            range_subid: 0,
            subtree: oid!(1, 3, 6, 1, 4, 1, 9999),
            upper_bound: 0,
        }));
        pdu.session_id = 3;
        let bytes = pdu.encode();
        let payload = &bytes[PDU_HEADER_SIZE..];
        assert_eq!(&payload[..4], &[5, 127, 0, 0]);
        // subtree: n_subid=2, prefix=4, include=0, reserved
        assert_eq!(&payload[4..8], &[2, 4, 0, 0]);
        assert_eq!(payload.len(), 4 + 4 + 8);
    }

    #[test]
    fn test_decode_truncated_header() {
        let bytes = Pdu::new(Payload::Ping).encode();
        assert!(matches!(
            Pdu::from_bytes(&bytes[..10]),
            Err(ParseError::Truncated { .. })
        ));
    }

    #[test]
    fn test_decode_payload_length_exceeds_buffer() {
        let mut bytes = Pdu::new(Payload::Close(ClosePdu {
            reason: CloseReason::Other,
        }))
        .encode();
        bytes.truncate(bytes.len() - 2);
        assert_eq!(
            Pdu::from_bytes(&bytes),
            Err(ParseError::PayloadLength {
                declared: 4,
                available: 2
            })
        );
    }

    #[test]
    fn test_decode_unknown_type() {
        let mut bytes = Pdu::new(Payload::Ping).encode();
        bytes[1] = 42;
        assert_eq!(Pdu::from_bytes(&bytes), Err(ParseError::UnknownPduType(42)));
    }

    #[test]
    fn test_decode_unsupported_version() {
        let mut bytes = Pdu::new(Payload::Ping).encode();
        bytes[0] = 2;
        assert_eq!(
            Pdu::from_bytes(&bytes),
            Err(ParseError::UnsupportedVersion(2))
        );
    }

    #[test]
    fn test_decode_payload_longer_than_fields() {
        // A Close payload padded to 8 bytes does not match its grammar
        let mut bytes = Pdu::new(Payload::Close(ClosePdu {
            reason: CloseReason::Other,
        }))
        .encode();
        bytes.extend_from_slice(&[0, 0, 0, 0]);
        bytes[19] = 8;
        assert_eq!(
            Pdu::from_bytes(&bytes),
            Err(ParseError::PayloadMismatch {
                declared: 8,
                consumed: 4
            })
        );
    }

    #[test]
    fn test_decode_stream_of_pdus() {
        let mut first = Pdu::new(Payload::Ping);
        first.packet_id = 1;
        let mut second = Pdu::new(Payload::CommitSet);
        second.packet_id = 2;
        second.byte_order = ByteOrder::LittleEndian;
        let mut bytes = first.encode();
        bytes.extend(second.encode());

        let mut r = WireReader::new(&bytes, ByteOrder::BigEndian);
        assert_eq!(Pdu::decode(&mut r).unwrap(), first);
        assert_eq!(Pdu::decode(&mut r).unwrap(), second);
        assert!(r.is_empty());
    }

    #[test]
    fn test_response_to_mirrors_request() {
        let mut request = Pdu::new(Payload::Get(SearchRangeList::default()));
        request.byte_order = ByteOrder::LittleEndian;
        request.session_id = 9;
        request.transaction_id = 8;
        request.packet_id = 7;
        request.context = Some(b"c".to_vec());

        let response = Pdu::response_to(&request, ResponsePdu::success(vec![]));
        assert_eq!(response.byte_order, ByteOrder::LittleEndian);
        assert_eq!(response.session_id, 9);
        assert_eq!(response.transaction_id, 8);
        assert_eq!(response.packet_id, 7);
        assert_eq!(response.context, None);
    }
}
