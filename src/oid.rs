//! SNMP Object Identifiers and their AgentX encoding (RFC 2741 §5.1).

use std::{cmp::Ordering, fmt, str::FromStr};

use crate::{
    error::ParseError,
    wire::{WireReader, WireWriter},
};

/// Maximum number of sub-identifiers in an OID.
pub const MAX_SUBIDS: usize = 128;

/// The `1.3.6.1` (internet) prefix that the wire format can compress.
const INTERNET_PREFIX: [u32; 4] = [1, 3, 6, 1];

/// An SNMP Object Identifier.
///
/// Ordering is lexicographic over the sub-identifiers, a proper prefix
/// sorting before any of its extensions. The `include` flag only carries
/// meaning as the start of a search range; it takes part in equality and
/// breaks ties in ordering so that `Eq` and `Ord` stay consistent.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Oid {
    subids: Vec<u32>,
    include: bool,
}

/// Builds an [`Oid`] from literal sub-identifiers.
///
/// ```
/// use agentx_subagent::oid;
/// let sys_descr = oid!(1, 3, 6, 1, 2, 1, 1, 1, 0);
/// assert_eq!(sys_descr.to_string(), "1.3.6.1.2.1.1.1.0");
/// ```
#[macro_export]
macro_rules! oid {
    ($($sub:expr),* $(,)?) => {
        $crate::oid::Oid::from_slice(&[$($sub),*])
    };
}

impl Oid {
    /// Creates a new OID from a slice of sub-identifiers.
    pub fn from_slice(subs: &[u32]) -> Self {
        Oid {
            subids: subs.to_vec(),
            include: false,
        }
    }

    /// The null OID (no sub-identifiers). Used as an unbounded range end.
    pub fn null() -> Self {
        Oid::default()
    }

    pub fn as_slice(&self) -> &[u32] {
        &self.subids
    }

    /// Returns the number of sub-identifiers.
    pub fn len(&self) -> usize {
        self.subids.len()
    }

    /// Returns true if the OID has no sub-identifiers.
    pub fn is_empty(&self) -> bool {
        self.subids.is_empty()
    }

    pub fn include(&self) -> bool {
        self.include
    }

    pub fn set_include(&mut self, include: bool) {
        self.include = include;
    }

    /// Returns a copy with the `include` flag set to `include`.
    pub fn with_include(mut self, include: bool) -> Self {
        self.include = include;
        self
    }

    /// Returns true if this OID starts with `prefix`.
    pub fn starts_with(&self, prefix: &Oid) -> bool {
        self.subids.len() >= prefix.subids.len()
            && self.subids[..prefix.subids.len()] == prefix.subids[..]
    }

    /// Subtree containment: `candidate` lies in the subtree rooted at `self`.
    pub fn contains(&self, candidate: &Oid) -> bool {
        candidate.starts_with(self)
    }

    /// Lexicographic comparison of the sub-identifiers alone.
    pub fn compare(&self, other: &Oid) -> Ordering {
        self.subids.cmp(&other.subids)
    }

    /// Returns a new OID with `sub` appended.
    pub fn child(&self, sub: u32) -> Oid {
        let mut subids = self.subids.clone();
        subids.push(sub);
        Oid {
            subids,
            include: false,
        }
    }

    /// Returns a new OID with all of `suffix` appended.
    pub fn join(&self, suffix: &[u32]) -> Oid {
        let mut subids = self.subids.clone();
        subids.extend_from_slice(suffix);
        Oid {
            subids,
            include: false,
        }
    }

    /// Returns the OID without its last sub-identifier.
    pub fn parent(&self) -> Option<Oid> {
        if self.subids.is_empty() {
            return None;
        }
        Some(Oid::from_slice(&self.subids[..self.subids.len() - 1]))
    }

    /// Smallest OID that sorts after every OID in this subtree, `None` when
    /// no such OID exists.
    pub fn successor(&self) -> Option<Oid> {
        let mut subids = self.subids.clone();
        while let Some(last) = subids.pop() {
            if let Some(next) = last.checked_add(1) {
                subids.push(next);
                return Some(Oid {
                    subids,
                    include: false,
                });
            }
        }
        None
    }

    /// True if the OID fits the wire limit of [`MAX_SUBIDS`].
    pub fn is_encodable(&self) -> bool {
        self.subids.len() <= MAX_SUBIDS
    }

    /// Number of bytes this OID occupies on the wire.
    pub fn encoded_len(&self) -> usize {
        let (_, skip) = self.compression();
        4 + (self.subids.len() - skip) * 4
    }

    /// Prefix byte and the number of leading sub-identifiers it replaces.
    fn compression(&self) -> (u8, usize) {
        let s = &self.subids;
        if s.len() >= 5 && s[..4] == INTERNET_PREFIX && (1..=255).contains(&s[4]) {
            (s[4] as u8, 5)
        } else {
            (0, 0)
        }
    }

    /// Encodes the OID: n_subid(1) + prefix(1) + include(1) + reserved(1)
    /// followed by 4-byte sub-identifiers. `1.3.6.1.x` OIDs use the prefix
    /// compression. Callers reject OIDs failing [`Oid::is_encodable`]
    /// before building a PDU.
    pub fn encode(&self, w: &mut WireWriter) {
        debug_assert!(self.is_encodable(), "OID {} too long to encode", self);
        let (prefix, skip) = self.compression();
        let rest = &self.subids[skip..];
        w.write_u8(rest.len() as u8);
        w.write_u8(prefix);
        w.write_u8(u8::from(self.include));
        w.write_u8(0); // reserved
        for &sub in rest {
            w.write_u32(sub);
        }
    }

    /// Decodes an OID, consuming exactly its encoded bytes.
    pub fn decode(r: &mut WireReader<'_>) -> Result<Oid, ParseError> {
        let n_subid = r.read_u8()? as usize;
        let prefix = r.read_u8()?;
        let include = r.read_u8()? != 0;
        r.skip(1)?;

        if r.remaining() < n_subid * 4 {
            return Err(ParseError::Truncated {
                needed: n_subid * 4,
                available: r.remaining(),
            });
        }

        let total = if prefix > 0 { n_subid + 5 } else { n_subid };
        if total > MAX_SUBIDS {
            return Err(ParseError::OidTooLong(total));
        }

        let mut subids = Vec::with_capacity(total);
        if prefix > 0 {
            subids.extend_from_slice(&INTERNET_PREFIX);
            subids.push(prefix as u32);
        }
        for _ in 0..n_subid {
            subids.push(r.read_u32()?);
        }

        Ok(Oid { subids, include })
    }
}

impl From<Vec<u32>> for Oid {
    fn from(subids: Vec<u32>) -> Self {
        Oid {
            subids,
            include: false,
        }
    }
}

impl From<&[u32]> for Oid {
    fn from(subids: &[u32]) -> Self {
        Oid::from_slice(subids)
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.subids.iter().map(|s| s.to_string()).collect();
        write!(f, "{}", parts.join("."))
    }
}

impl FromStr for Oid {
    type Err = ParseError;

    /// Parses dotted decimal notation. A leading dot is accepted and the
    /// empty string yields the null OID.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_start_matches('.');
        if trimmed.is_empty() {
            return Ok(Oid::null());
        }
        let subids = trimmed
            .split('.')
            .map(|part| {
                part.parse::<u32>()
                    .map_err(|_| ParseError::InvalidOidText(s.to_string()))
            })
            .collect::<Result<Vec<u32>, ParseError>>()?;
        if subids.len() > MAX_SUBIDS {
            return Err(ParseError::OidTooLong(subids.len()));
        }
        Ok(Oid::from(subids))
    }
}
