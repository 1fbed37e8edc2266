//! Type-specific payloads of the AgentX PDUs (RFC 2741 §6.2).

use crate::{
    error::{ErrorStatus, ParseError},
    oid::Oid,
    varbind::{decode_varbind_list, encode_varbind_list, VarBind},
    wire::{WireReader, WireWriter},
};

/// agentx-Open-PDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenPdu {
    /// Default timeout in seconds for this session (0 = master default).
    pub timeout: u8,
    /// Identifier of the sub-agent, may be null.
    pub id: Oid,
    pub description: Vec<u8>,
}

impl OpenPdu {
    fn encode(&self, w: &mut WireWriter) {
        w.write_u8(self.timeout);
        w.write_reserved(3);
        self.id.encode(w);
        w.write_octet_string(&self.description);
    }

    fn decode(r: &mut WireReader<'_>) -> Result<Self, ParseError> {
        let timeout = r.read_u8()?;
        r.skip(3)?;
        let id = Oid::decode(r)?;
        let description = r.read_octet_string()?;
        Ok(OpenPdu {
            timeout,
            id,
            description,
        })
    }
}

/// Reason carried by an agentx-Close-PDU (RFC 2741 §6.2.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Other,
    ParseError,
    ProtocolError,
    Timeouts,
    Shutdown,
    ByManager,
    Unknown(u8),
}

impl CloseReason {
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => CloseReason::Other,
            2 => CloseReason::ParseError,
            3 => CloseReason::ProtocolError,
            4 => CloseReason::Timeouts,
            5 => CloseReason::Shutdown,
            6 => CloseReason::ByManager,
            other => CloseReason::Unknown(other),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            CloseReason::Other => 1,
            CloseReason::ParseError => 2,
            CloseReason::ProtocolError => 3,
            CloseReason::Timeouts => 4,
            CloseReason::Shutdown => 5,
            CloseReason::ByManager => 6,
            CloseReason::Unknown(v) => v,
        }
    }
}

/// agentx-Close-PDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClosePdu {
    pub reason: CloseReason,
}

impl ClosePdu {
    fn encode(&self, w: &mut WireWriter) {
        w.write_u8(self.reason.as_u8());
        w.write_reserved(3);
    }

    fn decode(r: &mut WireReader<'_>) -> Result<Self, ParseError> {
        let reason = CloseReason::from_u8(r.read_u8()?);
        r.skip(3)?;
        Ok(ClosePdu { reason })
    }
}

/// agentx-Register-PDU.
///
/// When `range_subid` is non-zero, the sub-identifier at that 1-based
/// position of `subtree` is the lower bound of a range ending at
/// `upper_bound`; otherwise `upper_bound` is not transmitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterPdu {
    pub timeout: u8,
    pub priority: u8,
    pub range_subid: u8,
    pub subtree: Oid,
    pub upper_bound: u32,
}

impl RegisterPdu {
    fn encode(&self, w: &mut WireWriter) {
        w.write_u8(self.timeout);
        w.write_u8(self.priority);
        w.write_u8(self.range_subid);
        w.write_reserved(1);
        self.subtree.encode(w);
        if self.range_subid != 0 {
            w.write_u32(self.upper_bound);
        }
    }

    fn decode(r: &mut WireReader<'_>) -> Result<Self, ParseError> {
        let timeout = r.read_u8()?;
        let priority = r.read_u8()?;
        let range_subid = r.read_u8()?;
        r.skip(1)?;
        let subtree = Oid::decode(r)?;
        let upper_bound = if range_subid != 0 { r.read_u32()? } else { 0 };
        Ok(RegisterPdu {
            timeout,
            priority,
            range_subid,
            subtree,
            upper_bound,
        })
    }
}

/// agentx-Unregister-PDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnregisterPdu {
    pub priority: u8,
    pub range_subid: u8,
    pub subtree: Oid,
    pub upper_bound: u32,
}

impl UnregisterPdu {
    fn encode(&self, w: &mut WireWriter) {
        w.write_reserved(1);
        w.write_u8(self.priority);
        w.write_u8(self.range_subid);
        w.write_reserved(1);
        self.subtree.encode(w);
        if self.range_subid != 0 {
            w.write_u32(self.upper_bound);
        }
    }

    fn decode(r: &mut WireReader<'_>) -> Result<Self, ParseError> {
        r.skip(1)?;
        let priority = r.read_u8()?;
        let range_subid = r.read_u8()?;
        r.skip(1)?;
        let subtree = Oid::decode(r)?;
        let upper_bound = if range_subid != 0 { r.read_u32()? } else { 0 };
        Ok(UnregisterPdu {
            priority,
            range_subid,
            subtree,
            upper_bound,
        })
    }
}

/// A SearchRange (RFC 2741 §5.2): start (with `include`) and an exclusive
/// end, the null OID meaning unbounded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRange {
    pub start: Oid,
    pub end: Oid,
}

impl SearchRange {
    pub fn new(start: Oid, end: Oid) -> Self {
        SearchRange { start, end }
    }

    /// True if `oid` lies before the end bound.
    pub fn before_end(&self, oid: &Oid) -> bool {
        self.end.is_empty() || oid.compare(&self.end).is_lt()
    }

    fn encode(&self, w: &mut WireWriter) {
        self.start.encode(w);
        self.end.encode(w);
    }

    fn decode(r: &mut WireReader<'_>) -> Result<Self, ParseError> {
        let start = Oid::decode(r)?;
        let end = Oid::decode(r)?;
        Ok(SearchRange { start, end })
    }
}

fn encode_ranges(ranges: &[SearchRange], w: &mut WireWriter) {
    for range in ranges {
        range.encode(w);
    }
}

fn decode_ranges(r: &mut WireReader<'_>) -> Result<Vec<SearchRange>, ParseError> {
    let mut ranges = Vec::new();
    while !r.is_empty() {
        ranges.push(SearchRange::decode(r)?);
    }
    Ok(ranges)
}

/// agentx-Get-PDU and agentx-GetNext-PDU share this payload.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SearchRangeList {
    pub ranges: Vec<SearchRange>,
}

/// agentx-GetBulk-PDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetBulkPdu {
    pub non_repeaters: u16,
    pub max_repetitions: u16,
    pub ranges: Vec<SearchRange>,
}

impl GetBulkPdu {
    fn encode(&self, w: &mut WireWriter) {
        w.write_u16(self.non_repeaters);
        w.write_u16(self.max_repetitions);
        encode_ranges(&self.ranges, w);
    }

    fn decode(r: &mut WireReader<'_>) -> Result<Self, ParseError> {
        let non_repeaters = r.read_u16()?;
        let max_repetitions = r.read_u16()?;
        let ranges = decode_ranges(r)?;
        Ok(GetBulkPdu {
            non_repeaters,
            max_repetitions,
            ranges,
        })
    }
}

/// Payload made of a VarBindList only: TestSet, Notify, IndexAllocate and
/// IndexDeallocate.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VarBindList {
    pub varbinds: Vec<VarBind>,
}

/// agentx-AddAgentCaps-PDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddAgentCapsPdu {
    pub id: Oid,
    pub description: Vec<u8>,
}

/// agentx-RemoveAgentCaps-PDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoveAgentCapsPdu {
    pub id: Oid,
}

/// agentx-Response-PDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponsePdu {
    pub sys_uptime: u32,
    pub error: ErrorStatus,
    /// 1-based index of the failing varbind, 0 when not applicable.
    pub index: u16,
    pub varbinds: Vec<VarBind>,
}

impl ResponsePdu {
    /// A successful response carrying `varbinds`.
    pub fn success(varbinds: Vec<VarBind>) -> Self {
        ResponsePdu {
            sys_uptime: 0,
            error: ErrorStatus::NoError,
            index: 0,
            varbinds,
        }
    }

    /// An error response without varbinds.
    pub fn error(error: ErrorStatus, index: u16) -> Self {
        ResponsePdu {
            sys_uptime: 0,
            error,
            index,
            varbinds: Vec::new(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_error()
    }

    fn encode(&self, w: &mut WireWriter) {
        w.write_u32(self.sys_uptime);
        w.write_u16(self.error.as_u16());
        w.write_u16(self.index);
        encode_varbind_list(&self.varbinds, w);
    }

    fn decode(r: &mut WireReader<'_>) -> Result<Self, ParseError> {
        let sys_uptime = r.read_u32()?;
        let error = ErrorStatus::from_u16(r.read_u16()?);
        let index = r.read_u16()?;
        let varbinds = decode_varbind_list(r)?;
        Ok(ResponsePdu {
            sys_uptime,
            error,
            index,
            varbinds,
        })
    }
}

/// The type-specific part of a PDU, one variant per AgentX PDU type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Open(OpenPdu),
    Close(ClosePdu),
    Register(RegisterPdu),
    Unregister(UnregisterPdu),
    Get(SearchRangeList),
    GetNext(SearchRangeList),
    GetBulk(GetBulkPdu),
    TestSet(VarBindList),
    CommitSet,
    UndoSet,
    CleanupSet,
    Notify(VarBindList),
    Ping,
    IndexAllocate(VarBindList),
    IndexDeallocate(VarBindList),
    AddAgentCaps(AddAgentCapsPdu),
    RemoveAgentCaps(RemoveAgentCapsPdu),
    Response(ResponsePdu),
}

impl Payload {
    pub fn pdu_type(&self) -> super::PduType {
        use super::PduType;
        match self {
            Payload::Open(_) => PduType::Open,
            Payload::Close(_) => PduType::Close,
            Payload::Register(_) => PduType::Register,
            Payload::Unregister(_) => PduType::Unregister,
            Payload::Get(_) => PduType::Get,
            Payload::GetNext(_) => PduType::GetNext,
            Payload::GetBulk(_) => PduType::GetBulk,
            Payload::TestSet(_) => PduType::TestSet,
            Payload::CommitSet => PduType::CommitSet,
            Payload::UndoSet => PduType::UndoSet,
            Payload::CleanupSet => PduType::CleanupSet,
            Payload::Notify(_) => PduType::Notify,
            Payload::Ping => PduType::Ping,
            Payload::IndexAllocate(_) => PduType::IndexAllocate,
            Payload::IndexDeallocate(_) => PduType::IndexDeallocate,
            Payload::AddAgentCaps(_) => PduType::AddAgentCaps,
            Payload::RemoveAgentCaps(_) => PduType::RemoveAgentCaps,
            Payload::Response(_) => PduType::Response,
        }
    }

    pub(crate) fn encode(&self, w: &mut WireWriter) {
        match self {
            Payload::Open(p) => p.encode(w),
            Payload::Close(p) => p.encode(w),
            Payload::Register(p) => p.encode(w),
            Payload::Unregister(p) => p.encode(w),
            Payload::Get(p) | Payload::GetNext(p) => encode_ranges(&p.ranges, w),
            Payload::GetBulk(p) => p.encode(w),
            Payload::TestSet(p)
            | Payload::Notify(p)
            | Payload::IndexAllocate(p)
            | Payload::IndexDeallocate(p) => encode_varbind_list(&p.varbinds, w),
            Payload::CommitSet | Payload::UndoSet | Payload::CleanupSet | Payload::Ping => {}
            Payload::AddAgentCaps(p) => {
                p.id.encode(w);
                w.write_octet_string(&p.description);
            }
            Payload::RemoveAgentCaps(p) => p.id.encode(w),
            Payload::Response(p) => p.encode(w),
        }
    }

    pub(crate) fn decode(
        pdu_type: super::PduType,
        r: &mut WireReader<'_>,
    ) -> Result<Self, ParseError> {
        use super::PduType;
        Ok(match pdu_type {
            PduType::Open => Payload::Open(OpenPdu::decode(r)?),
            PduType::Close => Payload::Close(ClosePdu::decode(r)?),
            PduType::Register => Payload::Register(RegisterPdu::decode(r)?),
            PduType::Unregister => Payload::Unregister(UnregisterPdu::decode(r)?),
            PduType::Get => Payload::Get(SearchRangeList {
                ranges: decode_ranges(r)?,
            }),
            PduType::GetNext => Payload::GetNext(SearchRangeList {
                ranges: decode_ranges(r)?,
            }),
            PduType::GetBulk => Payload::GetBulk(GetBulkPdu::decode(r)?),
            PduType::TestSet => Payload::TestSet(VarBindList {
                varbinds: decode_varbind_list(r)?,
            }),
            PduType::CommitSet => Payload::CommitSet,
            PduType::UndoSet => Payload::UndoSet,
            PduType::CleanupSet => Payload::CleanupSet,
            PduType::Notify => Payload::Notify(VarBindList {
                varbinds: decode_varbind_list(r)?,
            }),
            PduType::Ping => Payload::Ping,
            PduType::IndexAllocate => Payload::IndexAllocate(VarBindList {
                varbinds: decode_varbind_list(r)?,
            }),
            PduType::IndexDeallocate => Payload::IndexDeallocate(VarBindList {
                varbinds: decode_varbind_list(r)?,
            }),
            PduType::AddAgentCaps => {
                let id = Oid::decode(r)?;
                let description = r.read_octet_string()?;
                Payload::AddAgentCaps(AddAgentCapsPdu { id, description })
            }
            PduType::RemoveAgentCaps => Payload::RemoveAgentCaps(RemoveAgentCapsPdu {
                id: Oid::decode(r)?,
            }),
            PduType::Response => Payload::Response(ResponsePdu::decode(r)?),
        })
    }
}
