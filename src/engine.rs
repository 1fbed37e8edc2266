//! Dispatch of PDUs sent by the master agent.
//!
//! [`SessionEngine`] holds the per-session state (session ID, registrations,
//! the Set transaction) and turns each inbound request into its Response.
//! It does no I/O; [`crate::subagent::Subagent`] feeds it decoded PDUs and
//! writes back what it returns.

use std::time::Duration;

use crate::{
    error::ErrorStatus,
    object::{bounded, GetNextResult},
    oid::Oid,
    pdu::{CloseReason, GetBulkPdu, Payload, Pdu, ResponsePdu, SearchRange},
    registry::{RegisteredObject, RegistrationTable},
    transaction::{Phase, SetTarget, Transaction},
    value::Value,
    varbind::VarBind,
};

/// What the caller must do with an inbound PDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Send this Response.
    Reply(Pdu),
    /// The master closed the session.
    Closed(CloseReason),
    /// Nothing to send.
    Ignored,
}

enum Next {
    Found(VarBind),
    End,
    /// The hook timed out or returned an instance that cannot be encoded.
    Failed,
}

#[derive(Debug, Clone, Copy)]
enum Control {
    Commit,
    Undo,
    Cleanup,
}

/// Session state and request dispatch.
#[derive(Debug)]
pub struct SessionEngine {
    session_id: Option<u32>,
    default_timeout: Duration,
    registrations: RegistrationTable,
    transaction: Option<Transaction>,
}

impl SessionEngine {
    /// `default_timeout` bounds hooks of registrations without their own.
    pub fn new(default_timeout: Duration) -> Self {
        SessionEngine {
            session_id: None,
            default_timeout,
            registrations: RegistrationTable::new(),
            transaction: None,
        }
    }

    pub fn session_id(&self) -> Option<u32> {
        self.session_id
    }

    pub fn is_open(&self) -> bool {
        self.session_id.is_some()
    }

    /// Starts serving the session assigned by the master.
    pub fn open(&mut self, session_id: u32) {
        self.session_id = Some(session_id);
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    pub fn registrations(&self) -> &RegistrationTable {
        &self.registrations
    }

    pub fn registrations_mut(&mut self) -> &mut RegistrationTable {
        &mut self.registrations
    }

    /// Phase of the Set transaction in flight, if any.
    pub fn transaction_phase(&self) -> Option<Phase> {
        self.transaction.as_ref().map(|t| t.phase())
    }

    /// Ends the session: releases the transaction in flight and forgets
    /// every registration.
    pub async fn abort(&mut self) {
        if let Some(mut tx) = self.transaction.take() {
            tx.abort().await;
        }
        self.registrations.clear();
        self.session_id = None;
    }

    /// Handles one PDU from the master agent.
    pub async fn dispatch(&mut self, pdu: &Pdu) -> Dispatch {
        match &pdu.payload {
            Payload::Response(_) => return Dispatch::Ignored,
            Payload::Close(close) => {
                if self.session_id != Some(pdu.session_id) {
                    log::warn!("Close for unknown session {}", pdu.session_id);
                    return Dispatch::Ignored;
                }
                log::info!("Master closed session {}: {:?}", pdu.session_id, close.reason);
                self.abort().await;
                return Dispatch::Closed(close.reason);
            }
            _ => {}
        }

        if self.session_id != Some(pdu.session_id) {
            log::warn!(
                "{:?} for session {} while session is {:?}",
                pdu.pdu_type(),
                pdu.session_id,
                self.session_id
            );
            return reply(pdu, ResponsePdu::error(ErrorStatus::NotOpen, 0));
        }

        log::debug!(
            "Dispatching {:?} packet {} transaction {}",
            pdu.pdu_type(),
            pdu.packet_id,
            pdu.transaction_id
        );

        let context = pdu.context.as_deref();
        let needs_context = matches!(
            pdu.payload,
            Payload::Get(_) | Payload::GetNext(_) | Payload::GetBulk(_) | Payload::TestSet(_)
        );
        if needs_context && context.is_some() && !self.registrations.has_context(context) {
            return reply(pdu, ResponsePdu::error(ErrorStatus::UnsupportedContext, 0));
        }

        let response = match &pdu.payload {
            Payload::Get(list) => self.get(&list.ranges, context).await,
            Payload::GetNext(list) => self.get_next(&list.ranges, context).await,
            Payload::GetBulk(bulk) => self.get_bulk(bulk, context).await,
            Payload::TestSet(list) => {
                self.test_set(pdu.transaction_id, &list.varbinds, context)
                    .await
            }
            Payload::CommitSet => self.control(pdu.transaction_id, Control::Commit).await,
            Payload::UndoSet => self.control(pdu.transaction_id, Control::Undo).await,
            Payload::CleanupSet => self.control(pdu.transaction_id, Control::Cleanup).await,
            Payload::Ping => ResponsePdu::success(Vec::new()),
            _ => {
                log::warn!("Unexpected {:?} from master agent", pdu.pdu_type());
                ResponsePdu::error(ErrorStatus::ProcessingError, 0)
            }
        };
        reply(pdu, response)
    }

    async fn get(&self, ranges: &[SearchRange], context: Option<&[u8]>) -> ResponsePdu {
        let mut varbinds = Vec::with_capacity(ranges.len());
        let mut failed = None;
        for (pos, range) in ranges.iter().enumerate() {
            let oid = range.start.clone().with_include(false);
            let value = match self.registrations.resolve(&oid, context) {
                None => Value::NoSuchObject,
                Some(entry) => {
                    let limit = entry.registration.hook_timeout(self.default_timeout);
                    match bounded(limit, entry.object.get(&oid)).await {
                        Some(result) => match result.into_value() {
                            Value::ObjectIdentifier(v) if !v.is_encodable() => {
                                log::warn!("get on {} returned an OID of {} sub-identifiers", oid, v.len());
                                failed.get_or_insert(pos);
                                Value::Null
                            }
                            value => value,
                        },
                        None => {
                            log::warn!("get on {} timed out", oid);
                            failed.get_or_insert(pos);
                            Value::Null
                        }
                    }
                }
            };
            varbinds.push(VarBind::new(oid, value));
        }
        finish(varbinds, failed)
    }

    async fn get_next(&self, ranges: &[SearchRange], context: Option<&[u8]>) -> ResponsePdu {
        let mut varbinds = Vec::with_capacity(ranges.len());
        let mut failed = None;
        for (pos, range) in ranges.iter().enumerate() {
            let vb = match self.next_in_range(range, context).await {
                Next::Found(vb) => vb,
                Next::End => end_of_view(&range.start),
                Next::Failed => {
                    failed.get_or_insert(pos);
                    VarBind::null(range.start.clone().with_include(false))
                }
            };
            varbinds.push(vb);
        }
        finish(varbinds, failed)
    }

    async fn get_bulk(&self, bulk: &GetBulkPdu, context: Option<&[u8]>) -> ResponsePdu {
        let fixed = usize::from(bulk.non_repeaters).min(bulk.ranges.len());
        let (non_repeaters, repeaters) = bulk.ranges.split_at(fixed);
        let mut varbinds = Vec::new();
        let mut failed = None;

        for range in non_repeaters {
            let vb = match self.next_in_range(range, context).await {
                Next::Found(vb) => vb,
                Next::End => end_of_view(&range.start),
                Next::Failed => {
                    failed.get_or_insert(varbinds.len());
                    VarBind::null(range.start.clone().with_include(false))
                }
            };
            varbinds.push(vb);
        }

        let mut cursors = repeaters.to_vec();
        let mut exhausted = vec![false; cursors.len()];
        for _ in 0..bulk.max_repetitions {
            if cursors.is_empty() {
                break;
            }
            let mut progressed = false;
            for (cursor, done) in cursors.iter_mut().zip(exhausted.iter_mut()) {
                if *done {
                    varbinds.push(end_of_view(&cursor.start));
                    continue;
                }
                match self.next_in_range(cursor, context).await {
                    Next::Found(vb) => {
                        progressed = true;
                        cursor.start = vb.oid.clone();
                        varbinds.push(vb);
                    }
                    Next::End => {
                        *done = true;
                        varbinds.push(end_of_view(&cursor.start));
                    }
                    Next::Failed => {
                        *done = true;
                        failed.get_or_insert(varbinds.len());
                        varbinds.push(VarBind::null(cursor.start.clone().with_include(false)));
                    }
                }
            }
            if !progressed {
                break;
            }
        }
        finish(varbinds, failed)
    }

    /// Smallest instance inside `range` served by the registration that
    /// covers it.
    async fn next_in_range(&self, range: &SearchRange, context: Option<&[u8]>) -> Next {
        let mut best: Option<VarBind> = None;
        for entry in self.registrations.in_context(context) {
            match self.next_from(entry, range, context).await {
                Next::Found(vb) => {
                    if best.as_ref().map_or(true, |b| vb.oid.compare(&b.oid).is_lt()) {
                        best = Some(vb);
                    }
                }
                Next::End => {}
                Next::Failed => return Next::Failed,
            }
        }
        best.map_or(Next::End, Next::Found)
    }

    async fn next_from(
        &self,
        entry: &RegisteredObject,
        range: &SearchRange,
        context: Option<&[u8]>,
    ) -> Next {
        let reg = &entry.registration;
        let limit = reg.hook_timeout(self.default_timeout);
        let (mut cursor, mut include) = if range.start.compare(&reg.subtree).is_lt() {
            (reg.subtree.clone(), true)
        } else {
            (range.start.clone(), range.start.include())
        };

        loop {
            let result = match bounded(limit, entry.object.get_next(&cursor, include)).await {
                Some(result) => result,
                None => {
                    log::warn!("get_next on {} timed out", cursor);
                    return Next::Failed;
                }
            };
            let GetNextResult::Value(vb) = result else {
                return Next::End;
            };
            let advanced = match vb.oid.compare(&cursor) {
                std::cmp::Ordering::Greater => true,
                std::cmp::Ordering::Equal => include,
                std::cmp::Ordering::Less => false,
            };
            if !advanced || !range.before_end(&vb.oid) {
                return Next::End;
            }
            if !reg.covers(&vb.oid) {
                // a gap between the blocks of a ranged registration
                if reg.region_end().is_some_and(|end| vb.oid.compare(&end).is_lt()) {
                    cursor = vb.oid;
                    include = false;
                    continue;
                }
                return Next::End;
            }
            let Some(owner) = self.registrations.resolve(&vb.oid, context) else {
                return Next::End;
            };
            if owner.id == entry.id {
                if !vb.is_encodable() {
                    log::warn!("get_next on {} returned an unencodable {}", cursor, vb.oid);
                    return Next::Failed;
                }
                return Next::Found(VarBind::new(vb.oid.with_include(false), vb.value));
            }
            // shadowed by a more specific registration: resume after its block
            match owner.registration.region_past(&vb.oid) {
                Some(past) => {
                    cursor = past;
                    include = true;
                }
                None => return Next::End,
            }
        }
    }

    async fn test_set(
        &mut self,
        transaction_id: u32,
        varbinds: &[VarBind],
        context: Option<&[u8]>,
    ) -> ResponsePdu {
        if let Some(current) = &self.transaction {
            if !current.is_finished() {
                log::warn!(
                    "TestSet for transaction {} while {} is {:?}",
                    transaction_id,
                    current.id(),
                    current.phase()
                );
                return ResponsePdu::error(ErrorStatus::ProcessingError, 0);
            }
        }

        let targeted = varbinds
            .iter()
            .map(|vb| {
                let target = self
                    .registrations
                    .resolve(&vb.oid, context)
                    .map(|entry| SetTarget {
                        registration: entry.id,
                        object: entry.object.clone(),
                        timeout: entry.registration.hook_timeout(self.default_timeout),
                    });
                (vb.clone(), target)
            })
            .collect();

        let mut tx = Transaction::new(transaction_id, targeted);
        let response = tx.test().await;
        self.transaction = Some(tx);
        response
    }

    async fn control(&mut self, transaction_id: u32, control: Control) -> ResponsePdu {
        let Some(tx) = self
            .transaction
            .as_mut()
            .filter(|t| t.id() == transaction_id)
        else {
            log::warn!("{:?} for unknown transaction {}", control, transaction_id);
            return ResponsePdu::error(ErrorStatus::ProcessingError, 0);
        };
        let response = match control {
            Control::Commit => tx.commit().await,
            Control::Undo => tx.undo().await,
            Control::Cleanup => tx.cleanup().await,
        };
        if tx.is_finished() {
            self.transaction = None;
        }
        response
    }
}

fn reply(request: &Pdu, response: ResponsePdu) -> Dispatch {
    Dispatch::Reply(Pdu::response_to(request, response))
}

fn end_of_view(start: &Oid) -> VarBind {
    VarBind::new(start.clone().with_include(false), Value::EndOfMibView)
}

fn finish(varbinds: Vec<VarBind>, failed: Option<usize>) -> ResponsePdu {
    let mut response = ResponsePdu::success(varbinds);
    if let Some(pos) = failed {
        response.error = ErrorStatus::GenErr;
        response.index = u16::try_from(pos + 1).unwrap_or(u16::MAX);
    }
    response
}
