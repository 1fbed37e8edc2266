//! Four-phase Set transaction (RFC 2741 §7.2.4).
//!
//! ```text
//! TestSet ──ok──> AllPassed ──CommitSet──> Committed ──CleanupSet──> Done
//!    │                │                        │
//!    │                └─Cleanup/UndoSet─> Done └──UndoSet──> DoneWithError
//!    └──fail──> AnyFailed ──undo tested──> DoneWithError
//! ```
//!
//! Every control PDU yields exactly one [`ResponsePdu`]. Hooks are invoked
//! in varbind order for test and commit, and in reverse for release.

use std::{fmt, sync::Arc, time::Duration};

use crate::{
    error::ErrorStatus,
    object::{bounded, ManagedObject, SetOutcome},
    pdu::ResponsePdu,
    registry::RegistrationId,
    varbind::VarBind,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    TestPending,
    AllPassed,
    AnyFailed,
    CommitPending,
    Committed,
    CleanupPending,
    UndoPending,
    Done,
    DoneWithError,
}

/// The object a varbind of the transaction is routed to.
#[derive(Clone)]
pub struct SetTarget {
    pub registration: RegistrationId,
    pub object: Arc<dyn ManagedObject>,
    /// Bound applied to each hook call.
    pub timeout: Duration,
}

struct SetEntry {
    varbind: VarBind,
    target: Option<SetTarget>,
    tested: Option<SetOutcome>,
    committed: bool,
}

impl SetEntry {
    fn passed(&self) -> bool {
        self.tested == Some(SetOutcome::NoError)
    }
}

/// A Set transaction owned by the session until it is finalized.
pub struct Transaction {
    id: u32,
    phase: Phase,
    entries: Vec<SetEntry>,
    commit_order: Vec<usize>,
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}

fn error_index(pos: usize) -> u16 {
    u16::try_from(pos + 1).unwrap_or(u16::MAX)
}

impl Transaction {
    /// Creates a transaction for the varbinds of a TestSet, each paired with
    /// the object covering it (`None` when nothing does).
    pub fn new(id: u32, varbinds: Vec<(VarBind, Option<SetTarget>)>) -> Self {
        let entries = varbinds
            .into_iter()
            .map(|(varbind, target)| SetEntry {
                varbind,
                target,
                tested: None,
                committed: false,
            })
            .collect();
        Transaction {
            id,
            phase: Phase::TestPending,
            entries,
            commit_order: Vec::new(),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.phase, Phase::Done | Phase::DoneWithError)
    }

    /// Per-varbind TestSet outcomes, `None` before the test phase ran.
    pub fn outcomes(&self) -> Vec<Option<SetOutcome>> {
        self.entries.iter().map(|e| e.tested).collect()
    }

    /// Varbind positions grouped by owning registration, groups in order of
    /// first appearance. Unrouted varbinds come last.
    fn groups(&self) -> Vec<Vec<usize>> {
        let mut groups: Vec<(Option<RegistrationId>, Vec<usize>)> = Vec::new();
        for (pos, entry) in self.entries.iter().enumerate() {
            let key = entry.target.as_ref().map(|t| t.registration);
            match groups.iter_mut().find(|(k, _)| *k == key) {
                Some((_, members)) => members.push(pos),
                None => groups.push((key, vec![pos])),
            }
        }
        groups.sort_by_key(|(key, _)| key.is_none());
        groups.into_iter().map(|(_, members)| members).collect()
    }

    async fn run_test(entry: &SetEntry) -> SetOutcome {
        let Some(target) = &entry.target else {
            return SetOutcome::NotWritable;
        };
        bounded(target.timeout, target.object.test_set(&entry.varbind))
            .await
            .unwrap_or_else(|| {
                log::warn!("test_set on {} timed out", entry.varbind.oid);
                SetOutcome::GenErr
            })
    }

    async fn run_commit(entry: &SetEntry) -> SetOutcome {
        let Some(target) = &entry.target else {
            return SetOutcome::CommitFailed;
        };
        bounded(target.timeout, target.object.commit_set(&entry.varbind.oid))
            .await
            .unwrap_or_else(|| {
                log::warn!("commit_set on {} timed out", entry.varbind.oid);
                SetOutcome::GenErr
            })
    }

    async fn run_undo(entry: &SetEntry) -> SetOutcome {
        let Some(target) = &entry.target else {
            return SetOutcome::UndoFailed;
        };
        bounded(target.timeout, target.object.undo_set(&entry.varbind.oid))
            .await
            .unwrap_or_else(|| {
                log::warn!("undo_set on {} timed out", entry.varbind.oid);
                SetOutcome::UndoFailed
            })
    }

    async fn run_cleanup(entry: &SetEntry) {
        let Some(target) = &entry.target else {
            return;
        };
        if bounded(target.timeout, target.object.cleanup_set(&entry.varbind.oid))
            .await
            .is_none()
        {
            log::warn!("cleanup_set on {} timed out", entry.varbind.oid);
        }
    }

    /// TestSet: every varbind is tested, the first failing position is
    /// reported. On failure the varbinds that passed are undone at once and
    /// the transaction is finalized.
    pub async fn test(&mut self) -> ResponsePdu {
        if self.phase != Phase::TestPending {
            return ResponsePdu::error(ErrorStatus::ProcessingError, 0);
        }
        for group in self.groups() {
            for pos in group {
                let outcome = Self::run_test(&self.entries[pos]).await;
                self.entries[pos].tested = Some(outcome);
            }
        }

        let failure = self
            .entries
            .iter()
            .enumerate()
            .find_map(|(pos, e)| match e.tested {
                Some(outcome) if !outcome.is_ok() => Some((pos, outcome)),
                _ => None,
            });

        match failure {
            None => {
                self.phase = Phase::AllPassed;
                ResponsePdu::success(Vec::new())
            }
            Some((pos, outcome)) => {
                log::debug!(
                    "transaction {}: test failed at {} with {:?}",
                    self.id,
                    pos + 1,
                    outcome
                );
                self.phase = Phase::AnyFailed;
                for entry in self.entries.iter().rev().filter(|e| e.passed()) {
                    let undo = Self::run_undo(entry).await;
                    if !undo.is_ok() {
                        log::warn!(
                            "transaction {}: undo of {} after failed test returned {:?}",
                            self.id,
                            entry.varbind.oid,
                            undo
                        );
                    }
                }
                self.phase = Phase::DoneWithError;
                ResponsePdu::error(outcome.error_status(), error_index(pos))
            }
        }
    }

    /// CommitSet: commits in varbind order, stopping at the first failure.
    pub async fn commit(&mut self) -> ResponsePdu {
        if self.phase != Phase::AllPassed {
            return ResponsePdu::error(ErrorStatus::ProcessingError, 0);
        }
        self.phase = Phase::CommitPending;
        for pos in 0..self.entries.len() {
            if !self.entries[pos].passed() {
                continue;
            }
            let outcome = Self::run_commit(&self.entries[pos]).await;
            if !outcome.is_ok() {
                self.phase = Phase::Committed;
                let status = match outcome {
                    SetOutcome::GenErr => ErrorStatus::CommitFailed,
                    other => other.error_status(),
                };
                return ResponsePdu::error(status, error_index(pos));
            }
            self.entries[pos].committed = true;
            self.commit_order.push(pos);
        }
        self.phase = Phase::Committed;
        ResponsePdu::success(Vec::new())
    }

    /// CleanupSet: releases every varbind that passed the test, in reverse.
    pub async fn cleanup(&mut self) -> ResponsePdu {
        match self.phase {
            Phase::AllPassed | Phase::Committed => {
                self.phase = Phase::CleanupPending;
                self.release().await;
                self.phase = Phase::Done;
                ResponsePdu::success(Vec::new())
            }
            Phase::Done | Phase::DoneWithError => ResponsePdu::success(Vec::new()),
            _ => ResponsePdu::error(ErrorStatus::ProcessingError, 0),
        }
    }

    /// UndoSet: reverts committed varbinds in reverse commit order, then
    /// releases those that passed without being committed. All hooks run;
    /// the lowest failing position is reported as `undoFailed`.
    pub async fn undo(&mut self) -> ResponsePdu {
        match self.phase {
            Phase::AllPassed => {
                self.phase = Phase::UndoPending;
                let mut failed: Option<usize> = None;
                for pos in (0..self.entries.len()).rev() {
                    if !self.entries[pos].passed() {
                        continue;
                    }
                    if !Self::run_undo(&self.entries[pos]).await.is_ok() {
                        failed = Some(failed.map_or(pos, |f| f.min(pos)));
                    }
                }
                self.phase = Phase::DoneWithError;
                undo_response(failed)
            }
            Phase::Committed => {
                self.phase = Phase::UndoPending;
                let mut failed: Option<usize> = None;
                for &pos in self.commit_order.iter().rev() {
                    if !Self::run_undo(&self.entries[pos]).await.is_ok() {
                        failed = Some(failed.map_or(pos, |f| f.min(pos)));
                    }
                }
                for entry in self
                    .entries
                    .iter()
                    .rev()
                    .filter(|e| e.passed() && !e.committed)
                {
                    Self::run_cleanup(entry).await;
                }
                self.phase = Phase::DoneWithError;
                undo_response(failed)
            }
            Phase::Done | Phase::DoneWithError => ResponsePdu::success(Vec::new()),
            _ => ResponsePdu::error(ErrorStatus::ProcessingError, 0),
        }
    }

    /// Best-effort release when the session goes away mid-transaction.
    pub async fn abort(&mut self) {
        if matches!(
            self.phase,
            Phase::AllPassed | Phase::CommitPending | Phase::Committed
        ) {
            log::warn!("aborting transaction {} in {:?}", self.id, self.phase);
            self.release().await;
        }
        self.phase = Phase::DoneWithError;
    }

    async fn release(&self) {
        for entry in self.entries.iter().rev().filter(|e| e.passed()) {
            Self::run_cleanup(entry).await;
        }
    }
}

fn undo_response(failed: Option<usize>) -> ResponsePdu {
    match failed {
        Some(pos) => ResponsePdu::error(ErrorStatus::UndoFailed, error_index(pos)),
        None => ResponsePdu::success(Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        object::{BoxFuture, GetNextResult, GetResult},
        oid,
        oid::Oid,
        registry::{Registration, RegistrationTable},
        value::Value,
    };
    use std::sync::Mutex;

    /// Records every Set hook call as "<hook> <last sub-id>".
    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
        fail_test: Option<u32>,
        fail_commit: Option<u32>,
        fail_undo: Option<u32>,
        stall_test: Option<u32>,
    }

    impl Recorder {
        fn record(&self, hook: &str, oid: &Oid) -> u32 {
            let last = oid.as_slice().last().copied().unwrap_or(0);
            self.calls.lock().unwrap().push(format!("{hook} {last}"));
            last
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl ManagedObject for Recorder {
        fn get<'a>(&'a self, _oid: &'a Oid) -> BoxFuture<'a, GetResult> {
            Box::pin(async { GetResult::NoSuchInstance })
        }

        fn get_next<'a>(&'a self, _oid: &'a Oid, _include: bool) -> BoxFuture<'a, GetNextResult> {
            Box::pin(async { GetNextResult::EndOfMibView })
        }

        fn test_set<'a>(&'a self, varbind: &'a VarBind) -> BoxFuture<'a, SetOutcome> {
            Box::pin(async move {
                let last = self.record("test", &varbind.oid);
                if self.stall_test == Some(last) {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                }
                if self.fail_test == Some(last) {
                    SetOutcome::WrongValue
                } else {
                    SetOutcome::NoError
                }
            })
        }

        fn commit_set<'a>(&'a self, oid: &'a Oid) -> BoxFuture<'a, SetOutcome> {
            Box::pin(async move {
                if self.fail_commit == Some(self.record("commit", oid)) {
                    SetOutcome::CommitFailed
                } else {
                    SetOutcome::NoError
                }
            })
        }

        fn undo_set<'a>(&'a self, oid: &'a Oid) -> BoxFuture<'a, SetOutcome> {
            Box::pin(async move {
                if self.fail_undo == Some(self.record("undo", oid)) {
                    SetOutcome::UndoFailed
                } else {
                    SetOutcome::NoError
                }
            })
        }

        fn cleanup_set<'a>(&'a self, oid: &'a Oid) -> BoxFuture<'a, ()> {
            Box::pin(async move {
                self.record("cleanup", oid);
            })
        }
    }

    fn transaction(recorder: Arc<Recorder>, subids: &[u32]) -> Transaction {
        let mut table = RegistrationTable::new();
        let id = table
            .insert(Registration::new(oid!(1, 3, 6, 1, 4, 1, 9999)), recorder.clone())
            .unwrap();
        let varbinds = subids
            .iter()
            .map(|&s| {
                let vb = VarBind::new(oid!(1, 3, 6, 1, 4, 1, 9999, s), Value::Integer(1));
                let target = SetTarget {
                    registration: id,
                    object: recorder.clone(),
                    timeout: Duration::from_secs(5),
                };
                (vb, Some(target))
            })
            .collect();
        Transaction::new(7, varbinds)
    }

    #[tokio::test]
    async fn test_all_pass_commit_cleanup() {
        let rec = Arc::new(Recorder::default());
        let mut tx = transaction(rec.clone(), &[1, 2]);

        let resp = tx.test().await;
        assert_eq!(resp.error, ErrorStatus::NoError);
        assert_eq!(resp.index, 0);
        assert_eq!(tx.phase(), Phase::AllPassed);

        let resp = tx.commit().await;
        assert!(!resp.is_error());
        assert_eq!(tx.phase(), Phase::Committed);

        let resp = tx.cleanup().await;
        assert!(!resp.is_error());
        assert!(tx.is_finished());
        assert_eq!(
            rec.calls(),
            vec!["test 1", "test 2", "commit 1", "commit 2", "cleanup 2", "cleanup 1"]
        );
    }

    #[tokio::test]
    async fn test_failure_reports_first_index_and_never_commits() {
        let rec = Arc::new(Recorder {
            fail_test: Some(2),
            ..Default::default()
        });
        let mut tx = transaction(rec.clone(), &[1, 2, 3]);

        let resp = tx.test().await;
        assert_eq!(resp.error, ErrorStatus::WrongValue);
        assert_eq!(resp.index, 2);
        assert_eq!(tx.phase(), Phase::DoneWithError);
        assert_eq!(
            tx.outcomes(),
            vec![
                Some(SetOutcome::NoError),
                Some(SetOutcome::WrongValue),
                Some(SetOutcome::NoError)
            ]
        );

        // a trailing CleanupSet is acknowledged without hooks
        assert!(!tx.cleanup().await.is_error());
        let calls = rec.calls();
        assert_eq!(calls, vec!["test 1", "test 2", "test 3", "undo 3", "undo 1"]);
        assert!(!calls.iter().any(|c| c.starts_with("commit")));
    }

    #[tokio::test]
    async fn test_unrouted_varbind_is_not_writable() {
        let rec = Arc::new(Recorder::default());
        let mut tx = transaction(rec.clone(), &[1]);
        tx.entries.push(SetEntry {
            varbind: VarBind::new(oid!(1, 3, 6, 1, 4, 1, 1), Value::Integer(0)),
            target: None,
            tested: None,
            committed: false,
        });
        let resp = tx.test().await;
        assert_eq!(resp.error, ErrorStatus::NotWritable);
        assert_eq!(resp.index, 2);
        assert_eq!(rec.calls(), vec!["test 1", "undo 1"]);
    }

    #[tokio::test]
    async fn test_commit_failure_then_undo_reverses_commit_order() {
        let rec = Arc::new(Recorder {
            fail_commit: Some(3),
            ..Default::default()
        });
        let mut tx = transaction(rec.clone(), &[1, 2, 3, 4]);
        assert!(!tx.test().await.is_error());

        let resp = tx.commit().await;
        assert_eq!(resp.error, ErrorStatus::CommitFailed);
        assert_eq!(resp.index, 3);

        let resp = tx.undo().await;
        assert!(!resp.is_error());
        assert!(tx.is_finished());
        assert_eq!(
            rec.calls()[4..],
            [
                "commit 1", "commit 2", "commit 3", "undo 2", "undo 1", "cleanup 4", "cleanup 3"
            ]
        );
    }

    #[tokio::test]
    async fn test_undo_runs_all_hooks_and_reports_failure() {
        let rec = Arc::new(Recorder {
            fail_undo: Some(2),
            ..Default::default()
        });
        let mut tx = transaction(rec.clone(), &[1, 2, 3]);
        tx.test().await;
        tx.commit().await;
        let resp = tx.undo().await;
        assert_eq!(resp.error, ErrorStatus::UndoFailed);
        assert_eq!(resp.index, 2);
        assert_eq!(rec.calls()[6..], ["undo 3", "undo 2", "undo 1"]);
    }

    #[tokio::test]
    async fn test_cleanup_while_all_passed() {
        let rec = Arc::new(Recorder::default());
        let mut tx = transaction(rec.clone(), &[1, 2]);
        tx.test().await;
        assert!(!tx.cleanup().await.is_error());
        assert_eq!(rec.calls()[2..], ["cleanup 2", "cleanup 1"]);
        assert_eq!(tx.phase(), Phase::Done);
    }

    #[tokio::test]
    async fn test_undo_while_all_passed() {
        let rec = Arc::new(Recorder::default());
        let mut tx = transaction(rec.clone(), &[1, 2]);
        tx.test().await;
        assert!(!tx.undo().await.is_error());
        assert_eq!(rec.calls()[2..], ["undo 2", "undo 1"]);
    }

    #[tokio::test]
    async fn test_commit_before_test_is_processing_error() {
        let rec = Arc::new(Recorder::default());
        let mut tx = transaction(rec.clone(), &[1]);
        let resp = tx.commit().await;
        assert_eq!(resp.error, ErrorStatus::ProcessingError);
        assert!(rec.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_hook_is_gen_err() {
        let rec = Arc::new(Recorder {
            stall_test: Some(2),
            ..Default::default()
        });
        let mut tx = transaction(rec.clone(), &[1, 2]);
        let resp = tx.test().await;
        assert_eq!(resp.error, ErrorStatus::GenErr);
        assert_eq!(resp.index, 2);
    }

    #[tokio::test]
    async fn test_abort_after_commit_releases() {
        let rec = Arc::new(Recorder::default());
        let mut tx = transaction(rec.clone(), &[1, 2]);
        tx.test().await;
        tx.commit().await;
        tx.abort().await;
        assert!(tx.is_finished());
        assert_eq!(rec.calls()[4..], ["cleanup 2", "cleanup 1"]);
    }

    #[test]
    fn test_groups_keep_first_appearance_order() {
        let rec_a: Arc<dyn ManagedObject> = Arc::new(Recorder::default());
        let rec_b: Arc<dyn ManagedObject> = Arc::new(Recorder::default());
        let mut table = RegistrationTable::new();
        let a = table.insert(Registration::new(oid!(1, 1)), rec_a.clone()).unwrap();
        let b = table.insert(Registration::new(oid!(1, 2)), rec_b.clone()).unwrap();
        let target = |registration, object: &Arc<dyn ManagedObject>| {
            Some(SetTarget {
                registration,
                object: object.clone(),
                timeout: Duration::from_secs(1),
            })
        };
        let tx = Transaction::new(
            1,
            vec![
                (VarBind::null(oid!(1, 2, 1)), target(b, &rec_b)),
                (VarBind::null(oid!(9)), None),
                (VarBind::null(oid!(1, 1, 1)), target(a, &rec_a)),
                (VarBind::null(oid!(1, 2, 2)), target(b, &rec_b)),
            ],
        );
        assert_eq!(tx.groups(), vec![vec![0, 3], vec![2], vec![1]]);
    }
}
