//! Variable bindings (RFC 2741 §5.4).

use std::fmt;

use crate::{
    error::ParseError,
    oid::Oid,
    value::{Value, ValueType},
    wire::{WireReader, WireWriter},
};

/// A variable binding (OID + value).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct VarBind {
    pub oid: Oid,
    pub value: Value,
}

impl VarBind {
    pub fn new(oid: Oid, value: Value) -> Self {
        VarBind { oid, value }
    }

    /// Varbind carrying the Null value, used for requests such as
    /// IndexAllocate where only the name matters.
    pub fn null(oid: Oid) -> Self {
        VarBind {
            oid,
            value: Value::Null,
        }
    }

    /// True if both the name and an OID value fit the wire limit.
    pub fn is_encodable(&self) -> bool {
        match &self.value {
            Value::ObjectIdentifier(oid) => self.oid.is_encodable() && oid.is_encodable(),
            _ => self.oid.is_encodable(),
        }
    }

    /// Encodes type(2) + reserved(2) + name + data.
    pub fn encode(&self, w: &mut WireWriter) {
        w.write_u16(self.value.value_type().as_u16());
        w.write_reserved(2);
        self.oid.encode(w);
        self.value.encode(w);
    }

    pub fn decode(r: &mut WireReader<'_>) -> Result<VarBind, ParseError> {
        let ty = ValueType::from_u16(r.read_u16()?)?;
        r.skip(2)?;
        let oid = Oid::decode(r)?;
        let value = Value::decode(ty, r)?;
        Ok(VarBind { oid, value })
    }
}

impl fmt::Display for VarBind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {}", self.oid, self.value)
    }
}

/// Encodes a VarBindList (varbinds back to back, no count).
pub fn encode_varbind_list(varbinds: &[VarBind], w: &mut WireWriter) {
    for vb in varbinds {
        vb.encode(w);
    }
}

/// Decodes varbinds until the reader is exhausted.
pub fn decode_varbind_list(r: &mut WireReader<'_>) -> Result<Vec<VarBind>, ParseError> {
    let mut varbinds = Vec::new();
    while !r.is_empty() {
        varbinds.push(VarBind::decode(r)?);
    }
    Ok(varbinds)
}
