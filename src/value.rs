//! SNMP values and their AgentX data encodings (RFC 2741 §5.4).

use std::{fmt, net::Ipv4Addr};

use chrono::{DateTime, Datelike, Offset, TimeZone, Timelike};

use crate::{
    error::ParseError,
    oid::Oid,
    wire::{WireReader, WireWriter},
};

/// Varbind type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ValueType {
    Integer = 2,
    OctetString = 4,
    Null = 5,
    ObjectIdentifier = 6,
    IpAddress = 64,
    Counter32 = 65,
    Gauge32 = 66,
    TimeTicks = 67,
    Opaque = 68,
    Counter64 = 70,
    NoSuchObject = 128,
    NoSuchInstance = 129,
    EndOfMibView = 130,
}

impl ValueType {
    pub fn from_u16(tag: u16) -> Result<Self, ParseError> {
        Ok(match tag {
            2 => ValueType::Integer,
            4 => ValueType::OctetString,
            5 => ValueType::Null,
            6 => ValueType::ObjectIdentifier,
            64 => ValueType::IpAddress,
            65 => ValueType::Counter32,
            66 => ValueType::Gauge32,
            67 => ValueType::TimeTicks,
            68 => ValueType::Opaque,
            70 => ValueType::Counter64,
            128 => ValueType::NoSuchObject,
            129 => ValueType::NoSuchInstance,
            130 => ValueType::EndOfMibView,
            other => return Err(ParseError::UnknownValueType(other)),
        })
    }

    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

/// An SNMP variable binding value.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Value {
    Integer(i32),
    OctetString(Vec<u8>),
    Null,
    ObjectIdentifier(Oid),
    IpAddress([u8; 4]),
    Counter32(u32),
    Gauge32(u32),
    TimeTicks(u32),
    Opaque(Vec<u8>),
    Counter64(u64),
    NoSuchObject,
    NoSuchInstance,
    EndOfMibView,
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Integer(_) => ValueType::Integer,
            Value::OctetString(_) => ValueType::OctetString,
            Value::Null => ValueType::Null,
            Value::ObjectIdentifier(_) => ValueType::ObjectIdentifier,
            Value::IpAddress(_) => ValueType::IpAddress,
            Value::Counter32(_) => ValueType::Counter32,
            Value::Gauge32(_) => ValueType::Gauge32,
            Value::TimeTicks(_) => ValueType::TimeTicks,
            Value::Opaque(_) => ValueType::Opaque,
            Value::Counter64(_) => ValueType::Counter64,
            Value::NoSuchObject => ValueType::NoSuchObject,
            Value::NoSuchInstance => ValueType::NoSuchInstance,
            Value::EndOfMibView => ValueType::EndOfMibView,
        }
    }

    /// True for the noSuchObject/noSuchInstance/endOfMibView markers.
    pub fn is_exception(&self) -> bool {
        matches!(
            self,
            Value::NoSuchObject | Value::NoSuchInstance | Value::EndOfMibView
        )
    }

    /// Encodes the data part of a varbind (everything after the name).
    pub fn encode(&self, w: &mut WireWriter) {
        match self {
            Value::Integer(v) => w.write_u32(*v as u32),
            Value::Counter32(v) | Value::Gauge32(v) | Value::TimeTicks(v) => w.write_u32(*v),
            Value::Counter64(v) => w.write_u64(*v),
            Value::OctetString(v) | Value::Opaque(v) => w.write_octet_string(v),
            Value::IpAddress(v) => w.write_octet_string(v),
            Value::ObjectIdentifier(oid) => oid.encode(w),
            Value::Null | Value::NoSuchObject | Value::NoSuchInstance | Value::EndOfMibView => {}
        }
    }

    /// Decodes the data part for a value of type `ty`.
    pub fn decode(ty: ValueType, r: &mut WireReader<'_>) -> Result<Value, ParseError> {
        Ok(match ty {
            ValueType::Integer => Value::Integer(r.read_u32()? as i32),
            ValueType::Counter32 => Value::Counter32(r.read_u32()?),
            ValueType::Gauge32 => Value::Gauge32(r.read_u32()?),
            ValueType::TimeTicks => Value::TimeTicks(r.read_u32()?),
            ValueType::Counter64 => Value::Counter64(r.read_u64()?),
            ValueType::OctetString => Value::OctetString(r.read_octet_string()?),
            ValueType::Opaque => Value::Opaque(r.read_octet_string()?),
            ValueType::IpAddress => {
                let octets = r.read_octet_string()?;
                let addr: [u8; 4] = octets
                    .as_slice()
                    .try_into()
                    .map_err(|_| ParseError::InvalidIpAddress(octets.len()))?;
                Value::IpAddress(addr)
            }
            ValueType::ObjectIdentifier => Value::ObjectIdentifier(Oid::decode(r)?),
            ValueType::Null => Value::Null,
            ValueType::NoSuchObject => Value::NoSuchObject,
            ValueType::NoSuchInstance => Value::NoSuchInstance,
            ValueType::EndOfMibView => Value::EndOfMibView,
        })
    }

    /// Builds a DateAndTime (RFC 2579) octet string from a timestamp.
    ///
    /// Always emits the 11-octet form carrying the UTC offset.
    pub fn date_and_time<Tz: TimeZone>(ts: &DateTime<Tz>) -> Value {
        let offset_secs = ts.offset().fix().local_minus_utc();
        let direction = if offset_secs < 0 { b'-' } else { b'+' };
        let offset_abs = offset_secs.unsigned_abs();
        let year = ts.year() as u16;
        let deci = (ts.nanosecond() % 1_000_000_000) / 100_000_000;

        let mut octets = Vec::with_capacity(11);
        octets.extend_from_slice(&year.to_be_bytes());
        octets.push(ts.month() as u8);
        octets.push(ts.day() as u8);
        octets.push(ts.hour() as u8);
        octets.push(ts.minute() as u8);
        octets.push(ts.second().min(60) as u8);
        octets.push(deci as u8);
        octets.push(direction);
        octets.push((offset_abs / 3600) as u8);
        octets.push(((offset_abs % 3600) / 60) as u8);
        Value::OctetString(octets)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::OctetString(v.as_bytes().to_vec())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::OctetString(v.into_bytes())
    }
}

impl From<Oid> for Value {
    fn from(v: Oid) -> Self {
        Value::ObjectIdentifier(v)
    }
}

impl From<Ipv4Addr> for Value {
    fn from(v: Ipv4Addr) -> Self {
        Value::IpAddress(v.octets())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(v) => write!(f, "INTEGER: {}", v),
            Value::OctetString(v) => match std::str::from_utf8(v) {
                Ok(s) if s.chars().all(|c| !c.is_control()) => write!(f, "STRING: \"{}\"", s),
                _ => {
                    let hex: Vec<String> = v.iter().map(|b| format!("{:02X}", b)).collect();
                    write!(f, "Hex-STRING: {}", hex.join(" "))
                }
            },
            Value::Null => write!(f, "NULL"),
            Value::ObjectIdentifier(oid) => write!(f, "OID: {}", oid),
            Value::IpAddress(v) => write!(f, "IpAddress: {}", Ipv4Addr::from(*v)),
            Value::Counter32(v) => write!(f, "Counter32: {}", v),
            Value::Gauge32(v) => write!(f, "Gauge32: {}", v),
            Value::TimeTicks(v) => write!(f, "Timeticks: ({})", v),
            Value::Opaque(v) => write!(f, "Opaque: {} bytes", v.len()),
            Value::Counter64(v) => write!(f, "Counter64: {}", v),
            Value::NoSuchObject => write!(f, "No Such Object"),
            Value::NoSuchInstance => write!(f, "No Such Instance"),
            Value::EndOfMibView => write!(f, "End of MIB View"),
        }
    }
}
