//! AgentX sub-agent - extend an SNMP master agent over RFC 2741.
//!
//! This crate implements the sub-agent side of the Agent Extensibility
//! protocol: the binary PDU codec, subtree registration, dispatch of Get,
//! GetNext and GetBulk requests to application objects, and the four-phase
//! Set transaction.
//!
//! # Usage
//!
//! Run the demo sub-agent against a local net-snmp master:
//! ```bash
//! agentx-subagent --master unix:/var/agentx/master
//! ```
//!
//! Or over TCP:
//! ```bash
//! agentx-subagent --master tcp:localhost:705
//! ```

/// Sub-agent configuration.
pub mod configuration;
/// Inbound request dispatch.
pub mod engine;
/// Error types and Response error codes.
pub mod error;
/// Hooks implemented by managed objects.
pub mod object;
/// Object identifiers.
pub mod oid;
/// AgentX PDU types and codec.
pub mod pdu;
/// Registrations and coverage resolution.
pub mod registry;
/// Session lifecycle and requests to the master agent.
pub mod subagent;
/// Set transaction state machine.
pub mod transaction;
/// Frame transport to the master agent.
pub mod transport;
/// SNMP value types.
pub mod value;
/// Variable bindings.
pub mod varbind;
/// Byte-order aware wire reader and writer.
pub mod wire;

pub use error::{AgentXError, ErrorStatus, ParseError};
pub use object::{GetNextResult, GetResult, ManagedObject, SetOutcome};
pub use oid::Oid;
pub use pdu::{CloseReason, Pdu};
pub use registry::{Registration, RegistrationId};
pub use subagent::{IndexMode, Subagent};
pub use value::Value;
pub use varbind::VarBind;
