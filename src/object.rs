//! Capability interface the engine invokes on application objects.
//!
//! A [`ManagedObject`] is attached to a registration and answers every
//! request that resolves to it. Read hooks serve Get, GetNext and GetBulk;
//! the Set hooks follow the four phases of an AgentX write (RFC 2741
//! §7.2.4): `test_set` validates and reserves, `commit_set` applies,
//! `undo_set` reverts and `cleanup_set` releases whatever the earlier
//! phases kept.
//!
//! Hooks return boxed futures so an object may wait on something of its
//! own; the engine bounds every call by the registration timeout and
//! reports `genErr` for that varbind when it expires.
//!
//! ```
//! use agentx_subagent::object::{BoxFuture, GetNextResult, GetResult, ManagedObject};
//! use agentx_subagent::{oid, Oid, Value, VarBind};
//!
//! struct Uptime;
//!
//! impl ManagedObject for Uptime {
//!     fn get<'a>(&'a self, oid: &'a Oid) -> BoxFuture<'a, GetResult> {
//!         Box::pin(async move {
//!             if *oid == oid!(1, 3, 6, 1, 4, 1, 9999, 1, 0) {
//!                 GetResult::Value(Value::TimeTicks(4200))
//!             } else {
//!                 GetResult::NoSuchObject
//!             }
//!         })
//!     }
//!
//!     fn get_next<'a>(&'a self, oid: &'a Oid, include: bool) -> BoxFuture<'a, GetNextResult> {
//!         Box::pin(async move {
//!             let instance = oid!(1, 3, 6, 1, 4, 1, 9999, 1, 0);
//!             let order = oid.compare(&instance);
//!             if order.is_lt() || (include && order.is_eq()) {
//!                 GetNextResult::Value(VarBind::new(instance, Value::TimeTicks(4200)))
//!             } else {
//!                 GetNextResult::EndOfMibView
//!             }
//!         })
//!     }
//! }
//! ```

use std::{future::Future, pin::Pin, time::Duration};

use crate::{error::ErrorStatus, oid::Oid, value::Value, varbind::VarBind};

/// Boxed future returned by the hooks.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Outcome of a Get hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GetResult {
    Value(Value),
    NoSuchObject,
    NoSuchInstance,
    EndOfMibView,
}

impl GetResult {
    pub fn into_value(self) -> Value {
        match self {
            GetResult::Value(v) => v,
            GetResult::NoSuchObject => Value::NoSuchObject,
            GetResult::NoSuchInstance => Value::NoSuchInstance,
            GetResult::EndOfMibView => Value::EndOfMibView,
        }
    }
}

/// Outcome of a GetNext hook: the next instance served by the object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GetNextResult {
    Value(VarBind),
    EndOfMibView,
}

/// Outcome of a Set-phase hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SetOutcome {
    NoError,
    WrongType,
    WrongLength,
    WrongValue,
    NotWritable,
    ResourceUnavailable,
    GenErr,
    CommitFailed,
    UndoFailed,
    NoCreation,
    InconsistentValue,
}

impl SetOutcome {
    pub fn is_ok(self) -> bool {
        self == SetOutcome::NoError
    }

    /// The Response `res.error` value reporting this outcome.
    pub fn error_status(self) -> ErrorStatus {
        match self {
            SetOutcome::NoError => ErrorStatus::NoError,
            SetOutcome::WrongType => ErrorStatus::WrongType,
            SetOutcome::WrongLength => ErrorStatus::WrongLength,
            SetOutcome::WrongValue => ErrorStatus::WrongValue,
            SetOutcome::NotWritable => ErrorStatus::NotWritable,
            SetOutcome::ResourceUnavailable => ErrorStatus::ResourceUnavailable,
            SetOutcome::GenErr => ErrorStatus::GenErr,
            SetOutcome::CommitFailed => ErrorStatus::CommitFailed,
            SetOutcome::UndoFailed => ErrorStatus::UndoFailed,
            SetOutcome::NoCreation => ErrorStatus::NoCreation,
            SetOutcome::InconsistentValue => ErrorStatus::InconsistentValue,
        }
    }
}

/// Hooks of an object exposed through the sub-agent.
pub trait ManagedObject: Send + Sync {
    /// Value of the exact instance `oid`.
    fn get<'a>(&'a self, oid: &'a Oid) -> BoxFuture<'a, GetResult>;

    /// First instance after `oid` (or at `oid` when `include` is set), in
    /// lexicographic order.
    fn get_next<'a>(&'a self, oid: &'a Oid, include: bool) -> BoxFuture<'a, GetNextResult>;

    /// Validates a new value for `varbind.oid`. Read-only objects keep the
    /// default.
    fn test_set<'a>(&'a self, varbind: &'a VarBind) -> BoxFuture<'a, SetOutcome> {
        let _ = varbind;
        Box::pin(async { SetOutcome::NotWritable })
    }

    /// Applies the value validated by `test_set`.
    fn commit_set<'a>(&'a self, oid: &'a Oid) -> BoxFuture<'a, SetOutcome> {
        let _ = oid;
        Box::pin(async { SetOutcome::NoError })
    }

    /// Reverts a committed or tested value.
    fn undo_set<'a>(&'a self, oid: &'a Oid) -> BoxFuture<'a, SetOutcome> {
        let _ = oid;
        Box::pin(async { SetOutcome::NoError })
    }

    /// Releases resources held since `test_set`.
    fn cleanup_set<'a>(&'a self, oid: &'a Oid) -> BoxFuture<'a, ()> {
        let _ = oid;
        Box::pin(async {})
    }
}

/// Runs a hook future, mapping expiry of `limit` to `None`.
pub(crate) async fn bounded<F, T>(limit: Duration, hook: F) -> Option<T>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(limit, hook).await.ok()
}
