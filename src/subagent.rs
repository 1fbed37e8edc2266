//! The sub-agent session: connection lifecycle and requests to the master.
//!
//! [`Subagent`] owns the transport and a [`SessionEngine`]. Requests it
//! originates (Open, Register, Notify, ...) are correlated with their
//! Response by packet ID; requests from the master that arrive while it
//! waits are dispatched and answered in arrival order.
//!
//! ```no_run
//! use std::sync::Arc;
//! use agentx_subagent::{configuration::AgentConfig, oid, registry::Registration, Subagent};
//! # use agentx_subagent::object::{BoxFuture, GetNextResult, GetResult, ManagedObject};
//! # use agentx_subagent::Oid;
//! # struct Demo;
//! # impl ManagedObject for Demo {
//! #     fn get<'a>(&'a self, _: &'a Oid) -> BoxFuture<'a, GetResult> { Box::pin(async { GetResult::NoSuchObject }) }
//! #     fn get_next<'a>(&'a self, _: &'a Oid, _: bool) -> BoxFuture<'a, GetNextResult> { Box::pin(async { GetNextResult::EndOfMibView }) }
//! # }
//!
//! # async fn demo() -> agentx_subagent::error::Result<()> {
//! let mut agent = Subagent::connect(AgentConfig::default()).await?;
//! agent.open().await?;
//! agent
//!     .register(Registration::new(oid!(1, 3, 6, 1, 4, 1, 9999)), Arc::new(Demo))
//!     .await?;
//! agent.run().await?;
//! # Ok(())
//! # }
//! ```

use std::{
    collections::{HashMap, HashSet},
    future::Future,
    sync::Arc,
    time::Instant,
};

use crate::{
    configuration::AgentConfig,
    engine::{Dispatch, SessionEngine},
    error::{AgentXError, ParseError, Result},
    object::ManagedObject,
    oid,
    oid::Oid,
    pdu::{
        AddAgentCapsPdu, ClosePdu, CloseReason, OpenPdu, Payload, Pdu, PduFlags,
        RemoveAgentCapsPdu, ResponsePdu, VarBindList,
    },
    registry::{Registration, RegistrationId},
    transport::{connect, Transport},
    value::Value,
    varbind::VarBind,
    wire::ByteOrder,
};

/// How IndexAllocate picks index values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexMode {
    /// Reserve exactly the values given.
    #[default]
    Exact,
    /// Any value never allocated before (NEW_INDEX).
    New,
    /// Any value not currently allocated (ANY_INDEX).
    Any,
}

/// sysUpTime.0
pub fn sys_uptime_oid() -> Oid {
    oid!(1, 3, 6, 1, 2, 1, 1, 3, 0)
}

/// snmpTrapOID.0
pub fn snmp_trap_oid() -> Oid {
    oid!(1, 3, 6, 1, 6, 3, 1, 1, 4, 1, 0)
}

/// An AgentX sub-agent connected to one master agent.
pub struct Subagent {
    config: AgentConfig,
    byte_order: ByteOrder,
    transport: Option<Box<dyn Transport>>,
    engine: SessionEngine,
    next_packet_id: u32,
    started: Instant,
    /// Index varbinds reserved in the open session.
    allocated: Vec<VarBind>,
    /// Agent capabilities advertised in the open session.
    capabilities: Vec<Oid>,
    /// Unconfirmed notifications by packet ID, with their send time.
    /// Entries older than the request timeout are dropped.
    unconfirmed: HashMap<u32, tokio::time::Instant>,
    /// Session IDs of previous sessions.
    retired: HashSet<u32>,
}

impl Subagent {
    /// Creates a sub-agent over an established transport. No session is
    /// open until [`Subagent::open`].
    pub fn new(config: AgentConfig, transport: Box<dyn Transport>) -> Self {
        let engine = SessionEngine::new(config.hook_timeout());
        Subagent {
            byte_order: config.byte_order.into(),
            config,
            transport: Some(transport),
            engine,
            next_packet_id: 0,
            started: Instant::now(),
            allocated: Vec::new(),
            capabilities: Vec::new(),
            unconfirmed: HashMap::new(),
            retired: HashSet::new(),
        }
    }

    /// Connects to the master agent named in `config`.
    pub async fn connect(config: AgentConfig) -> Result<Self> {
        config.validate()?;
        let transport = connect(&config.master).await?;
        Ok(Subagent::new(config, transport))
    }

    /// Replaces the transport after a disconnect. A new Open is required.
    pub async fn reconnect(&mut self, transport: Box<dyn Transport>) {
        self.teardown().await;
        self.transport = Some(transport);
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn session_id(&self) -> Option<u32> {
        self.engine.session_id()
    }

    pub fn is_open(&self) -> bool {
        self.engine.is_open()
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    pub fn engine(&self) -> &SessionEngine {
        &self.engine
    }

    /// Index varbinds reserved in the open session.
    pub fn allocated_indexes(&self) -> &[VarBind] {
        &self.allocated
    }

    /// Agent capabilities advertised in the open session.
    pub fn capabilities(&self) -> &[Oid] {
        &self.capabilities
    }

    /// Hundredths of a second since the sub-agent was created.
    pub fn uptime_ticks(&self) -> u32 {
        let centis = self.started.elapsed().as_millis() / 10;
        u32::try_from(centis % (u128::from(u32::MAX) + 1)).unwrap_or(0)
    }

    fn packet_id(&mut self) -> u32 {
        self.next_packet_id = self.next_packet_id.wrapping_add(1);
        if self.next_packet_id == 0 {
            self.next_packet_id = 1;
        }
        self.next_packet_id
    }

    fn build(&mut self, payload: Payload) -> Pdu {
        let mut pdu = Pdu::new(payload);
        pdu.byte_order = self.byte_order;
        pdu.session_id = self.engine.session_id().unwrap_or(0);
        pdu.packet_id = self.packet_id();
        pdu
    }

    async fn send(&mut self, pdu: &Pdu) -> Result<()> {
        let frame = pdu.encode();
        let transport = self.transport.as_mut().ok_or(AgentXError::Disconnected)?;
        let sent = transport.send(&frame).await;
        if let Err(e) = sent {
            log::error!("Send of {:?} failed: {}", pdu.pdu_type(), e);
            self.teardown().await;
            return Err(e.into());
        }
        Ok(())
    }

    /// Next inbound PDU; tears the session down on disconnect or garbage.
    async fn receive(&mut self) -> Result<Pdu> {
        let transport = self.transport.as_mut().ok_or(AgentXError::Disconnected)?;
        let received = transport.recv().await;
        let frame = match received {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                log::warn!("Master agent disconnected");
                self.teardown().await;
                return Err(AgentXError::Disconnected);
            }
            Err(e) => {
                log::error!("Receive failed: {}", e);
                self.teardown().await;
                return Err(e.into());
            }
        };
        match Pdu::from_bytes(&frame) {
            Ok(pdu) => Ok(pdu),
            Err(e) => {
                log::error!("Malformed PDU from master agent: {}", e);
                self.close_with(CloseReason::ParseError).await;
                Err(e.into())
            }
        }
    }

    /// Sends `payload` and waits for its Response, serving the master's own
    /// requests in the meantime.
    async fn request(&mut self, payload: Payload, flags: PduFlags, context: Option<Vec<u8>>) -> Result<ResponsePdu> {
        let mut pdu = self.build(payload);
        pdu.flags = flags;
        pdu.context = context;
        let packet_id = pdu.packet_id;
        let kind = pdu.pdu_type();
        self.send(&pdu).await?;

        let deadline = tokio::time::Instant::now() + self.config.request_timeout();
        loop {
            let inbound = match tokio::time::timeout_at(deadline, self.receive()).await {
                Ok(inbound) => inbound?,
                Err(_) => {
                    log::warn!("No response to {:?} packet {}", kind, packet_id);
                    return Err(AgentXError::Timeout(packet_id));
                }
            };
            if let Payload::Response(response) = &inbound.payload {
                if inbound.packet_id == packet_id {
                    return Ok(response.clone());
                }
                self.stray_response(&inbound, response);
                continue;
            }
            if let Some(reason) = self.serve(&inbound).await? {
                return Err(AgentXError::Closed(reason));
            }
        }
    }

    /// Like [`Subagent::request`] but turns an error Response into `Err`.
    async fn request_ok(&mut self, payload: Payload, flags: PduFlags, context: Option<Vec<u8>>) -> Result<ResponsePdu> {
        let response = self.request(payload, flags, context).await?;
        if response.is_error() {
            return Err(AgentXError::Response {
                error: response.error,
                index: response.index,
            });
        }
        Ok(response)
    }

    fn stray_response(&mut self, pdu: &Pdu, response: &ResponsePdu) {
        if self.unconfirmed.remove(&pdu.packet_id).is_some() {
            if response.is_error() {
                log::warn!("Notification {} rejected: {}", pdu.packet_id, response.error);
            }
        } else {
            log::warn!("Dropping Response for unknown packet {}", pdu.packet_id);
        }
    }

    /// Dispatches one request from the master and answers it. Returns the
    /// close reason when the master ended the session.
    async fn serve(&mut self, pdu: &Pdu) -> Result<Option<CloseReason>> {
        let session = self.engine.session_id();
        match self.engine.dispatch(pdu).await {
            Dispatch::Reply(response) => {
                self.send(&response).await?;
                Ok(None)
            }
            Dispatch::Closed(reason) => {
                self.retired.extend(session);
                self.teardown().await;
                Ok(Some(reason))
            }
            Dispatch::Ignored => Ok(None),
        }
    }

    fn require_open(&self) -> Result<()> {
        if self.engine.is_open() {
            Ok(())
        } else {
            Err(AgentXError::NotOpen)
        }
    }

    /// Opens a session and returns the session ID assigned by the master.
    pub async fn open(&mut self) -> Result<u32> {
        if let Some(id) = self.engine.session_id() {
            return Err(AgentXError::ProtocolViolation(format!(
                "session {id} is already open"
            )));
        }
        let open = OpenPdu {
            timeout: self.config.timeout,
            id: self.config.agent_oid()?,
            description: self.config.description.clone().into_bytes(),
        };
        let mut pdu = self.build(Payload::Open(open));
        pdu.session_id = 0;
        let packet_id = pdu.packet_id;
        self.send(&pdu).await?;

        let deadline = tokio::time::Instant::now() + self.config.request_timeout();
        let (session_id, response) = loop {
            let inbound = match tokio::time::timeout_at(deadline, self.receive()).await {
                Ok(inbound) => inbound?,
                Err(_) => return Err(AgentXError::Timeout(packet_id)),
            };
            match &inbound.payload {
                Payload::Response(response) if inbound.packet_id == packet_id => {
                    break (inbound.session_id, response.clone());
                }
                Payload::Response(_) => {
                    log::warn!("Dropping Response for unknown packet {}", inbound.packet_id)
                }
                other => {
                    log::error!("{:?} received before session is open", other.pdu_type());
                    return Err(AgentXError::UnexpectedPdu(other.pdu_type()));
                }
            }
        };

        if response.is_error() {
            log::error!("Open refused: {}", response.error);
            return Err(AgentXError::Response {
                error: response.error,
                index: response.index,
            });
        }
        if self.retired.contains(&session_id) {
            log::warn!("Master agent reassigned previous session ID {}", session_id);
        }
        self.engine.open(session_id);
        log::info!("Opened session {} with master agent", session_id);
        Ok(session_id)
    }

    /// Closes the session and disconnects.
    pub async fn close(&mut self, reason: CloseReason) -> Result<()> {
        self.require_open()?;
        let result = self
            .request(Payload::Close(ClosePdu { reason }), PduFlags::default(), None)
            .await;
        log::info!("Closed session {:?}: {:?}", self.engine.session_id(), reason);
        self.teardown().await;
        match result {
            Ok(_)
            | Err(AgentXError::Timeout(_))
            | Err(AgentXError::Disconnected)
            | Err(AgentXError::Closed(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Best-effort Close then teardown.
    async fn close_with(&mut self, reason: CloseReason) {
        if self.engine.is_open() {
            let pdu = self.build(Payload::Close(ClosePdu { reason }));
            if let Some(transport) = self.transport.as_mut() {
                if let Err(e) = transport.send(&pdu.encode()).await {
                    log::debug!("Close not delivered: {}", e);
                }
            }
        }
        self.teardown().await;
    }

    /// Drops the connection and every piece of session state.
    async fn teardown(&mut self) {
        if let Some(id) = self.engine.session_id() {
            self.retired.insert(id);
        }
        self.engine.abort().await;
        self.allocated.clear();
        self.capabilities.clear();
        self.unconfirmed.clear();
        if let Some(mut transport) = self.transport.take() {
            if let Err(e) = transport.disconnect().await {
                log::debug!("Disconnect: {}", e);
            }
        }
    }

    /// Registers `registration` with the master and serves it with `object`.
    pub async fn register(
        &mut self,
        mut registration: Registration,
        object: Arc<dyn ManagedObject>,
    ) -> Result<RegistrationId> {
        self.require_open()?;
        registration.validate()?;
        registration.priority.get_or_insert(self.config.priority);
        self.engine.registrations().check_duplicate(&registration)?;

        let flags = PduFlags {
            instance_registration: registration.instance,
            ..Default::default()
        };
        self.request_ok(
            Payload::Register(registration.to_register_pdu()),
            flags,
            registration.context.clone(),
        )
        .await
        .map_err(|e| {
            log::warn!("Register of {} failed: {}", registration, e);
            e
        })?;

        log::info!("Registered {}", registration);
        self.engine.registrations_mut().insert(registration, object)
    }

    /// Withdraws a registration from the master.
    pub async fn unregister(&mut self, id: RegistrationId) -> Result<()> {
        self.require_open()?;
        let registration = match self.engine.registrations().get(id) {
            Some(entry) => entry.registration.clone(),
            None => return Err(AgentXError::UnknownRegistration(format!("{id:?}"))),
        };
        self.request_ok(
            Payload::Unregister(registration.to_unregister_pdu()),
            PduFlags::default(),
            registration.context.clone(),
        )
        .await?;
        self.engine.registrations_mut().remove(id);
        log::info!("Unregistered {}", registration);
        Ok(())
    }

    /// Reserves index values; returns the varbinds the master allocated.
    pub async fn allocate_index(
        &mut self,
        varbinds: Vec<VarBind>,
        mode: IndexMode,
        context: Option<Vec<u8>>,
    ) -> Result<Vec<VarBind>> {
        self.require_open()?;
        check_encodable(&varbinds)?;
        let flags = PduFlags {
            new_index: mode == IndexMode::New,
            any_index: mode == IndexMode::Any,
            ..Default::default()
        };
        let response = self
            .request_ok(Payload::IndexAllocate(VarBindList { varbinds }), flags, context)
            .await?;
        self.allocated.extend(response.varbinds.iter().cloned());
        Ok(response.varbinds)
    }

    /// Releases index values reserved by [`Subagent::allocate_index`].
    pub async fn deallocate_index(&mut self, varbinds: Vec<VarBind>, context: Option<Vec<u8>>) -> Result<()> {
        self.require_open()?;
        if let Some(missing) = varbinds.iter().find(|vb| !self.allocated.contains(vb)) {
            return Err(AgentXError::IndexNotAllocated(missing.to_string()));
        }
        self.request_ok(
            Payload::IndexDeallocate(VarBindList {
                varbinds: varbinds.clone(),
            }),
            PduFlags::default(),
            context,
        )
        .await?;
        self.allocated.retain(|vb| !varbinds.contains(vb));
        Ok(())
    }

    fn notification(&self, trap: Oid, varbinds: Vec<VarBind>) -> Vec<VarBind> {
        let mut all = Vec::with_capacity(varbinds.len() + 2);
        all.push(VarBind::new(sys_uptime_oid(), Value::TimeTicks(self.uptime_ticks())));
        all.push(VarBind::new(snmp_trap_oid(), Value::ObjectIdentifier(trap)));
        all.extend(varbinds);
        all
    }

    /// Sends a notification without waiting for the master's Response.
    pub async fn notify(&mut self, trap: Oid, varbinds: Vec<VarBind>) -> Result<()> {
        self.require_open()?;
        let varbinds = self.notification(trap, varbinds);
        check_encodable(&varbinds)?;
        let pdu = self.build(Payload::Notify(VarBindList { varbinds }));
        let now = tokio::time::Instant::now();
        let expiry = self.config.request_timeout();
        self.unconfirmed.retain(|_, sent| now.duration_since(*sent) < expiry);
        self.unconfirmed.insert(pdu.packet_id, now);
        self.send(&pdu).await
    }

    /// Sends a notification and waits until the master accepted it.
    pub async fn notify_confirmed(&mut self, trap: Oid, varbinds: Vec<VarBind>) -> Result<()> {
        self.require_open()?;
        let varbinds = self.notification(trap, varbinds);
        check_encodable(&varbinds)?;
        self.request_ok(Payload::Notify(VarBindList { varbinds }), PduFlags::default(), None)
            .await
            .map(|_| ())
    }

    /// Checks that the master agent still knows the session.
    pub async fn ping(&mut self) -> Result<()> {
        self.require_open()?;
        self.request_ok(Payload::Ping, PduFlags::default(), None)
            .await
            .map(|_| ())
    }

    /// Advertises an agent capabilities statement (sysORTable entry).
    pub async fn add_agent_caps(&mut self, id: Oid, description: &str) -> Result<()> {
        self.require_open()?;
        if !id.is_encodable() {
            return Err(ParseError::OidTooLong(id.len()).into());
        }
        let caps = AddAgentCapsPdu {
            id: id.clone(),
            description: description.as_bytes().to_vec(),
        };
        self.request_ok(Payload::AddAgentCaps(caps), PduFlags::default(), None)
            .await?;
        self.capabilities.push(id);
        Ok(())
    }

    pub async fn remove_agent_caps(&mut self, id: Oid) -> Result<()> {
        self.require_open()?;
        self.request_ok(
            Payload::RemoveAgentCaps(RemoveAgentCapsPdu { id: id.clone() }),
            PduFlags::default(),
            None,
        )
        .await?;
        self.capabilities.retain(|c| *c != id);
        Ok(())
    }

    /// Serves the master's requests until it closes the session or the
    /// connection drops.
    pub async fn run(&mut self) -> Result<CloseReason> {
        self.run_until(std::future::pending()).await
    }

    /// Like [`Subagent::run`], closing the session with `shutdown` once
    /// `signal` completes.
    pub async fn run_until<F>(&mut self, signal: F) -> Result<CloseReason>
    where
        F: Future<Output = ()>,
    {
        self.require_open()?;
        tokio::pin!(signal);
        loop {
            tokio::select! {
                inbound = self.receive() => {
                    let pdu = inbound?;
                    if let Payload::Response(response) = &pdu.payload {
                        self.stray_response(&pdu, response);
                        continue;
                    }
                    if let Some(reason) = self.serve(&pdu).await? {
                        return Ok(reason);
                    }
                }
                _ = &mut signal => {
                    self.close(CloseReason::Shutdown).await?;
                    return Ok(CloseReason::Shutdown);
                }
            }
        }
    }
}

fn check_encodable(varbinds: &[VarBind]) -> Result<()> {
    match varbinds.iter().find(|vb| !vb.is_encodable()) {
        Some(vb) => {
            let len = match &vb.value {
                Value::ObjectIdentifier(oid) => vb.oid.len().max(oid.len()),
                _ => vb.oid.len(),
            };
            Err(ParseError::OidTooLong(len).into())
        }
        None => Ok(()),
    }
}
