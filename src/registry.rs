//! Registrations held by a session and coverage resolution.

use std::{cmp::Ordering, fmt, sync::Arc, time::Duration};

use crate::{
    error::{AgentXError, ParseError, Result},
    object::ManagedObject,
    oid::Oid,
    pdu::{RegisterPdu, UnregisterPdu},
};

/// Priority assigned when the application does not pick one.
pub const DEFAULT_PRIORITY: u8 = 127;

/// A subtree (or sub-range of sibling subtrees) registered with the master.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub subtree: Oid,
    /// Lower wins. `None` takes the session's configured default when
    /// registered.
    pub priority: Option<u8>,
    /// Seconds the master waits for this region, 0 for the session default.
    pub timeout: u8,
    /// 1-based position of the ranged sub-identifier, 0 for no range.
    pub range_subid: u8,
    pub upper_bound: u32,
    pub context: Option<Vec<u8>>,
    /// Registers a single object instance rather than a subtree.
    pub instance: bool,
}

impl Registration {
    pub fn new(subtree: Oid) -> Self {
        Registration {
            subtree,
            priority: None,
            timeout: 0,
            range_subid: 0,
            upper_bound: 0,
            context: None,
            instance: false,
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Effective priority, [`DEFAULT_PRIORITY`] when none was chosen.
    pub fn priority(&self) -> u8 {
        self.priority.unwrap_or(DEFAULT_PRIORITY)
    }

    pub fn with_timeout(mut self, timeout: u8) -> Self {
        self.timeout = timeout;
        self
    }

    /// Extends the registration over `subtree[range_subid - 1] ..= upper_bound`.
    pub fn with_range(mut self, range_subid: u8, upper_bound: u32) -> Self {
        self.range_subid = range_subid;
        self.upper_bound = upper_bound;
        self
    }

    pub fn with_context(mut self, context: impl Into<Vec<u8>>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_instance(mut self, instance: bool) -> Self {
        self.instance = instance;
        self
    }

    /// Checks the range fields against the subtree.
    pub fn validate(&self) -> Result<()> {
        if self.subtree.is_empty() {
            return Err(AgentXError::ProtocolViolation(
                "cannot register the null OID".to_string(),
            ));
        }
        if !self.subtree.is_encodable() {
            return Err(AgentXError::Parse(ParseError::OidTooLong(self.subtree.len())));
        }
        if self.range_subid == 0 {
            return Ok(());
        }
        let pos = usize::from(self.range_subid);
        match self.subtree.as_slice().get(pos - 1) {
            Some(&lower) if lower <= self.upper_bound => Ok(()),
            Some(&lower) => Err(AgentXError::ProtocolViolation(format!(
                "range upper bound {} below lower bound {} of {}",
                self.upper_bound, lower, self.subtree
            ))),
            None => Err(AgentXError::ProtocolViolation(format!(
                "range sub-identifier {} outside {}",
                pos, self.subtree
            ))),
        }
    }

    /// True if `oid` falls inside the registered region.
    pub fn covers(&self, oid: &Oid) -> bool {
        if self.range_subid == 0 {
            return self.subtree.contains(oid);
        }
        let tree = self.subtree.as_slice();
        let candidate = oid.as_slice();
        if candidate.len() < tree.len() {
            return false;
        }
        let ranged = usize::from(self.range_subid) - 1;
        tree.iter().zip(candidate).enumerate().all(|(i, (&t, &c))| {
            if i == ranged {
                t <= c && c <= self.upper_bound
            } else {
                t == c
            }
        })
    }

    /// First OID after everything the region covers.
    pub fn region_end(&self) -> Option<Oid> {
        let mut last = self.subtree.as_slice().to_vec();
        if self.range_subid != 0 {
            *last.get_mut(usize::from(self.range_subid) - 1)? = self.upper_bound;
        }
        Oid::from(last).successor()
    }

    /// First OID after the block of this region that holds `oid`, which
    /// must be covered. A range on the last sub-identifier is one block;
    /// otherwise each value of the ranged sub-identifier is its own block.
    pub fn region_past(&self, oid: &Oid) -> Option<Oid> {
        let ranged = usize::from(self.range_subid);
        if ranged == 0 || ranged == self.subtree.len() {
            return self.region_end();
        }
        let mut block = self.subtree.as_slice().to_vec();
        block[ranged - 1] = oid.as_slice().get(ranged - 1).copied()?;
        Oid::from(block).successor()
    }

    /// Seconds bound for hooks of this registration.
    pub fn hook_timeout(&self, session_default: Duration) -> Duration {
        if self.timeout == 0 {
            session_default
        } else {
            Duration::from_secs(u64::from(self.timeout))
        }
    }

    fn same_region(&self, other: &Registration) -> bool {
        self.subtree == other.subtree
            && self.range_subid == other.range_subid
            && (self.range_subid == 0 || self.upper_bound == other.upper_bound)
            && self.priority() == other.priority()
            && self.context == other.context
    }

    pub fn to_register_pdu(&self) -> RegisterPdu {
        RegisterPdu {
            timeout: self.timeout,
            priority: self.priority(),
            range_subid: self.range_subid,
            subtree: self.subtree.clone(),
            upper_bound: self.upper_bound,
        }
    }

    pub fn to_unregister_pdu(&self) -> UnregisterPdu {
        UnregisterPdu {
            priority: self.priority(),
            range_subid: self.range_subid,
            subtree: self.subtree.clone(),
            upper_bound: self.upper_bound,
        }
    }
}

impl fmt::Display for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.subtree)?;
        if self.range_subid != 0 {
            write!(f, " [{}..={}]", self.range_subid, self.upper_bound)?;
        }
        write!(f, " priority {}", self.priority())?;
        if let Some(ctx) = &self.context {
            write!(f, " context {:?}", String::from_utf8_lossy(ctx))?;
        }
        Ok(())
    }
}

/// Handle returned by a successful registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegistrationId(u64);

/// A registration and the object serving it.
#[derive(Clone)]
pub struct RegisteredObject {
    pub id: RegistrationId,
    pub registration: Registration,
    pub object: Arc<dyn ManagedObject>,
}

impl fmt::Debug for RegisteredObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredObject")
            .field("id", &self.id)
            .field("registration", &self.registration)
            .finish_non_exhaustive()
    }
}

/// Registrations of the open session, in registration order.
#[derive(Debug, Default)]
pub struct RegistrationTable {
    entries: Vec<RegisteredObject>,
    next_id: u64,
}

impl RegistrationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegisteredObject> {
        self.entries.iter()
    }

    /// Fails with `DuplicateRegistration` if an identical region is held.
    pub fn check_duplicate(&self, registration: &Registration) -> Result<()> {
        if self
            .entries
            .iter()
            .any(|e| e.registration.same_region(registration))
        {
            return Err(AgentXError::DuplicateRegistration(registration.to_string()));
        }
        Ok(())
    }

    pub fn insert(
        &mut self,
        registration: Registration,
        object: Arc<dyn ManagedObject>,
    ) -> Result<RegistrationId> {
        self.check_duplicate(&registration)?;
        self.next_id += 1;
        let id = RegistrationId(self.next_id);
        self.entries.push(RegisteredObject {
            id,
            registration,
            object,
        });
        Ok(id)
    }

    pub fn get(&self, id: RegistrationId) -> Option<&RegisteredObject> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn remove(&mut self, id: RegistrationId) -> Option<RegisteredObject> {
        let pos = self.entries.iter().position(|e| e.id == id)?;
        Some(self.entries.remove(pos))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// True if any registration lives in `context`.
    pub fn has_context(&self, context: Option<&[u8]>) -> bool {
        self.entries
            .iter()
            .any(|e| e.registration.context.as_deref() == context)
    }

    /// Registrations living in `context`.
    pub fn in_context<'a, 'c>(
        &'a self,
        context: Option<&'c [u8]>,
    ) -> impl Iterator<Item = &'a RegisteredObject> + 'c
    where
        'a: 'c,
    {
        self.entries
            .iter()
            .filter(move |e| e.registration.context.as_deref() == context)
    }

    /// The registration serving `oid`: longest covering subtree, then lower
    /// priority value, then earliest registration.
    pub fn resolve(&self, oid: &Oid, context: Option<&[u8]>) -> Option<&RegisteredObject> {
        self.entries
            .iter()
            .filter(|e| e.registration.context.as_deref() == context)
            .filter(|e| e.registration.covers(oid))
            .min_by(|a, b| precedence(a, b))
    }
}

fn precedence(a: &RegisteredObject, b: &RegisteredObject) -> Ordering {
    b.registration
        .subtree
        .len()
        .cmp(&a.registration.subtree.len())
        .then(a.registration.priority().cmp(&b.registration.priority()))
        .then(a.id.cmp(&b.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        object::{BoxFuture, GetNextResult, GetResult},
        oid,
        value::Value,
    };

    struct Fixed(i32);

    impl ManagedObject for Fixed {
        fn get<'a>(&'a self, _oid: &'a Oid) -> BoxFuture<'a, GetResult> {
            Box::pin(async move { GetResult::Value(Value::Integer(self.0)) })
        }

        fn get_next<'a>(&'a self, _oid: &'a Oid, _include: bool) -> BoxFuture<'a, GetNextResult> {
            Box::pin(async { GetNextResult::EndOfMibView })
        }
    }

    fn object(n: i32) -> Arc<dyn ManagedObject> {
        Arc::new(Fixed(n))
    }

    #[test]
    fn test_covers_subtree() {
        let reg = Registration::new(oid!(1, 3, 6, 1, 4, 1, 9999));
        assert!(reg.covers(&oid!(1, 3, 6, 1, 4, 1, 9999)));
        assert!(reg.covers(&oid!(1, 3, 6, 1, 4, 1, 9999, 1, 0)));
        assert!(!reg.covers(&oid!(1, 3, 6, 1, 4, 1, 99990)));
        assert!(!reg.covers(&oid!(1, 3, 6, 1, 4, 1)));
    }

    #[test]
    fn test_covers_range() {
        // ifDescr.1 .. ifDescr.24 style: range on the last sub-identifier
        let reg = Registration::new(oid!(1, 3, 6, 1, 2, 1, 2, 2, 1, 2, 1)).with_range(11, 24);
        assert!(reg.covers(&oid!(1, 3, 6, 1, 2, 1, 2, 2, 1, 2, 1)));
        assert!(reg.covers(&oid!(1, 3, 6, 1, 2, 1, 2, 2, 1, 2, 24)));
        assert!(reg.covers(&oid!(1, 3, 6, 1, 2, 1, 2, 2, 1, 2, 7, 3)));
        assert!(!reg.covers(&oid!(1, 3, 6, 1, 2, 1, 2, 2, 1, 2, 25)));
        assert!(!reg.covers(&oid!(1, 3, 6, 1, 2, 1, 2, 2, 1, 3, 5)));
    }

    #[test]
    fn test_covers_range_in_middle() {
        let reg = Registration::new(oid!(1, 2, 3, 7)).with_range(3, 5);
        assert!(reg.covers(&oid!(1, 2, 4, 7, 1)));
        assert!(!reg.covers(&oid!(1, 2, 4, 8)));
        assert!(!reg.covers(&oid!(1, 2, 2, 7)));
    }

    #[test]
    fn test_region_past() {
        let plain = Registration::new(oid!(1, 3, 6, 1, 4, 1, 9999, 2));
        assert_eq!(
            plain.region_past(&oid!(1, 3, 6, 1, 4, 1, 9999, 2, 4000)),
            Some(oid!(1, 3, 6, 1, 4, 1, 9999, 3))
        );

        let last = Registration::new(oid!(1, 3, 6, 1, 2, 1, 2, 2, 1, 2, 1)).with_range(11, 24);
        assert_eq!(
            last.region_past(&oid!(1, 3, 6, 1, 2, 1, 2, 2, 1, 2, 3, 0)),
            Some(oid!(1, 3, 6, 1, 2, 1, 2, 2, 1, 2, 25))
        );

        // range in the middle: only the block at the hit value is skipped
        let middle = Registration::new(oid!(1, 2, 3, 7)).with_range(3, 5);
        assert_eq!(middle.region_past(&oid!(1, 2, 4, 7, 9)), Some(oid!(1, 2, 4, 8)));

        assert_eq!(middle.region_end(), Some(oid!(1, 2, 5, 8)));

        let top = Registration::new(oid!(1, u32::MAX));
        assert_eq!(top.region_past(&oid!(1, u32::MAX, 1)), Some(oid!(2)));
    }

    #[test]
    fn test_validate() {
        assert!(Registration::new(oid!(1, 2, 3)).validate().is_ok());
        assert!(Registration::new(oid!(1, 2, 3)).with_range(3, 9).validate().is_ok());
        assert!(Registration::new(oid!(1, 2, 3)).with_range(3, 2).validate().is_err());
        assert!(Registration::new(oid!(1, 2, 3)).with_range(4, 9).validate().is_err());
        assert!(Registration::new(Oid::null()).validate().is_err());
        assert!(Registration::new(Oid::from(vec![1; 129])).validate().is_err());
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut table = RegistrationTable::new();
        let reg = Registration::new(oid!(1, 3, 6, 1, 4, 1, 9999));
        table.insert(reg.clone(), object(1)).unwrap();
        assert!(matches!(
            table.insert(reg.clone(), object(2)),
            Err(AgentXError::DuplicateRegistration(_))
        ));
        // a different priority over the same subtree is a distinct registration
        table.insert(reg.with_priority(1), object(3)).unwrap();
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_resolve_longest_subtree_wins() {
        let mut table = RegistrationTable::new();
        let outer = table
            .insert(Registration::new(oid!(1, 3, 6, 1, 4, 1, 9999)).with_priority(1), object(1))
            .unwrap();
        let inner = table
            .insert(Registration::new(oid!(1, 3, 6, 1, 4, 1, 9999, 2)), object(2))
            .unwrap();

        let hit = table.resolve(&oid!(1, 3, 6, 1, 4, 1, 9999, 2, 0), None).unwrap();
        assert_eq!(hit.id, inner);
        let hit = table.resolve(&oid!(1, 3, 6, 1, 4, 1, 9999, 1, 0), None).unwrap();
        assert_eq!(hit.id, outer);
        assert!(table.resolve(&oid!(1, 3, 6, 1, 4, 1, 8888), None).is_none());
    }

    #[test]
    fn test_resolve_priority_then_order() {
        let mut table = RegistrationTable::new();
        let subtree = oid!(1, 3, 6, 1, 4, 1, 9999);
        let first = table
            .insert(Registration::new(subtree.clone()).with_priority(50), object(1))
            .unwrap();
        let best = table
            .insert(Registration::new(subtree.clone()).with_priority(10), object(2))
            .unwrap();
        let hit = table.resolve(&subtree.child(1), None).unwrap();
        assert_eq!(hit.id, best);

        table.remove(best);
        let later = table
            .insert(
                Registration::new(subtree.clone()).with_priority(50).with_timeout(3),
                object(3),
            )
            .unwrap_err();
        assert!(matches!(later, AgentXError::DuplicateRegistration(_)));
        assert_eq!(table.resolve(&subtree.child(1), None).unwrap().id, first);
    }

    #[test]
    fn test_resolve_context() {
        let mut table = RegistrationTable::new();
        let subtree = oid!(1, 3, 6, 1, 4, 1, 9999);
        let plain = table.insert(Registration::new(subtree.clone()), object(1)).unwrap();
        let ctx = table
            .insert(Registration::new(subtree.clone()).with_context("blue"), object(2))
            .unwrap();

        assert_eq!(table.resolve(&subtree.child(1), None).unwrap().id, plain);
        assert_eq!(
            table.resolve(&subtree.child(1), Some(b"blue")).unwrap().id,
            ctx
        );
        assert!(table.resolve(&subtree.child(1), Some(b"red")).is_none());
        assert!(table.has_context(Some(b"blue")));
        assert!(!table.has_context(Some(b"red")));
    }

    #[test]
    fn test_hook_timeout() {
        let default = Duration::from_secs(5);
        let reg = Registration::new(oid!(1, 2));
        assert_eq!(reg.hook_timeout(default), default);
        assert_eq!(
            reg.with_timeout(2).hook_timeout(default),
            Duration::from_secs(2)
        );
    }

    #[test]
    fn test_register_pdu_fields() {
        let reg = Registration::new(oid!(1, 3, 6, 1, 4, 1, 9999))
            .with_priority(127)
            .with_timeout(5);
        assert_eq!(Registration::new(oid!(1, 2)).priority, None);
        assert_eq!(Registration::new(oid!(1, 2)).priority(), DEFAULT_PRIORITY);
        let pdu = reg.to_register_pdu();
        assert_eq!(pdu.priority, 127);
        assert_eq!(pdu.timeout, 5);
        assert_eq!(pdu.range_subid, 0);
        assert_eq!(reg.to_unregister_pdu().subtree, reg.subtree);
    }
}
