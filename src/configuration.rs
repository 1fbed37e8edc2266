//! Sub-agent configuration.
//!
//! [`AgentConfig`] is both a clap argument group (flattened into a binary's
//! parser) and a serde structure for applications that keep their settings
//! in a file.

use std::time::Duration;

use clap::{Args, ValueEnum};
use serde::{Deserialize, Serialize};

use crate::{
    error::{AgentXError, Result},
    oid::Oid,
    registry::DEFAULT_PRIORITY,
    transport::MasterAddress,
    wire::ByteOrder,
};

/// Byte order of the PDUs the sub-agent originates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireOrder {
    #[default]
    Network,
    Little,
}

impl From<WireOrder> for ByteOrder {
    fn from(order: WireOrder) -> Self {
        match order {
            WireOrder::Network => ByteOrder::BigEndian,
            WireOrder::Little => ByteOrder::LittleEndian,
        }
    }
}

#[derive(Args, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Master agent address: unix:/path, tcp:host:port or a socket path
    #[arg(short, long, default_value = "unix:/var/agentx/master")]
    pub master: MasterAddress,
    /// Description sent in the Open PDU
    #[arg(short, long, default_value = "AgentX sub-agent")]
    pub description: String,
    /// Object identifier of the sub-agent, empty for none
    #[arg(long, default_value = "")]
    pub agent_id: String,
    /// Session timeout in seconds proposed at Open, 0 for the master's default
    #[arg(short, long, default_value_t = 5)]
    pub timeout: u8,
    /// Seconds to wait for the master's Response to our requests
    #[arg(long, default_value_t = 10)]
    pub request_timeout: u64,
    /// Byte order of the PDUs we originate
    #[arg(long, value_enum, default_value_t = WireOrder::Network)]
    pub byte_order: WireOrder,
    /// Registration priority used when none is given
    #[arg(long, default_value_t = DEFAULT_PRIORITY)]
    pub priority: u8,
}

impl Default for AgentConfig {
    fn default() -> Self {
        AgentConfig {
            master: MasterAddress::default(),
            description: "AgentX sub-agent".to_string(),
            agent_id: String::new(),
            timeout: 5,
            request_timeout: 10,
            byte_order: WireOrder::Network,
            priority: DEFAULT_PRIORITY,
        }
    }
}

impl AgentConfig {
    pub fn validate(&self) -> Result<()> {
        if self.description.len() > 255 {
            return Err(AgentXError::Config(format!(
                "description is {} octets, at most 255 allowed",
                self.description.len()
            )));
        }
        if self.request_timeout == 0 {
            return Err(AgentXError::Config(
                "request timeout must be at least one second".to_string(),
            ));
        }
        self.agent_oid()?;
        Ok(())
    }

    /// The sub-agent identifier as an OID (null when unset).
    pub fn agent_oid(&self) -> Result<Oid> {
        self.agent_id
            .parse::<Oid>()
            .map_err(|e| AgentXError::Config(format!("agent id: {e}")))
    }

    /// Bound for hooks of registrations without their own timeout.
    pub fn hook_timeout(&self) -> Duration {
        match self.timeout {
            0 => Duration::from_secs(5),
            secs => Duration::from_secs(u64::from(secs)),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }
}
