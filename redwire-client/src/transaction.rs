//! # Transactions
//!
//! Purpose: Track WATCH/MULTI/EXEC/DISCARD ordering on the client so invalid
//! sequences fail before anything is sent.
//!
//! ## State Machine
//!
//! ```text
//!            watch                multi
//!   Idle ───────────► Watching ───────────► Queuing(handlers)
//!    ▲  ◄───────────     │                     │
//!    │     unwatch       │                     │ exec / discard
//!    │                   └─────── multi ───────┤
//!    └─────────────────────────────────────────┘
//! ```
//!
//! Inside MULTI every queued command expects `QUEUED` from the server and
//! its real handler is recorded; EXEC decodes the aggregate reply with the
//! recorded list. A session that entered MULTI never returns its connection
//! to the pool.

use redwire_common::{IntoArg, Request};

use crate::error::TransactionStateError;
use crate::handler::Handler;
use crate::session::Session;

/// Client-side transaction state of a session.
#[derive(Debug, Default)]
pub enum TransactionState {
    #[default]
    Idle,
    Watching,
    /// Inside MULTI, with the handlers of the commands queued so far.
    Queuing(Vec<Handler>),
}

/// Handler-free view of `TransactionState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionPhase {
    Idle,
    Watching,
    Queuing,
}

impl TransactionState {
    pub fn phase(&self) -> TransactionPhase {
        match self {
            TransactionState::Idle => TransactionPhase::Idle,
            TransactionState::Watching => TransactionPhase::Watching,
            TransactionState::Queuing(_) => TransactionPhase::Queuing,
        }
    }

    fn in_multi(&self) -> bool {
        matches!(self, TransactionState::Queuing(_))
    }
}

impl Session {
    /// Current transaction phase.
    pub fn transaction_phase(&self) -> TransactionPhase {
        self.transaction.phase()
    }

    /// Marks keys for optimistic-concurrency checking by a later EXEC.
    pub fn watch<I, A>(&mut self, keys: I) -> Result<&mut Self, TransactionStateError>
    where
        I: IntoIterator<Item = A>,
        A: IntoArg,
    {
        if self.transaction.in_multi() {
            return Err(TransactionStateError::WatchInsideMulti);
        }
        self.transaction = TransactionState::Watching;
        self.queue_direct(Request::cmd("WATCH").args(keys), Handler::Expect("OK"));
        Ok(self)
    }

    /// Forgets all watched keys.
    pub fn unwatch(&mut self) -> Result<&mut Self, TransactionStateError> {
        if self.transaction.in_multi() {
            return Err(TransactionStateError::UnwatchInsideMulti);
        }
        self.transaction = TransactionState::Idle;
        self.queue_direct(Request::cmd("UNWATCH"), Handler::Expect("OK"));
        Ok(self)
    }

    /// Starts queuing commands for atomic execution by EXEC.
    pub fn multi(&mut self) -> Result<&mut Self, TransactionStateError> {
        if self.transaction.in_multi() {
            return Err(TransactionStateError::NestedMulti);
        }
        self.queue_direct(Request::cmd("MULTI"), Handler::Expect("OK"));
        self.transaction = TransactionState::Queuing(Vec::new());
        self.mark_unpoolable();
        Ok(self)
    }

    /// Drops the commands queued since MULTI; also unwatches all keys.
    pub fn discard(&mut self) -> Result<&mut Self, TransactionStateError> {
        if !self.transaction.in_multi() {
            return Err(TransactionStateError::DiscardWithoutMulti);
        }
        self.transaction = TransactionState::Idle;
        self.queue_direct(Request::cmd("DISCARD"), Handler::Expect("OK"));
        Ok(self)
    }

    /// Executes the commands queued since MULTI.
    ///
    /// Yields the list of their results, or `Value::Nil` when a watched key
    /// changed and the server aborted the transaction.
    pub fn exec(&mut self) -> Result<&mut Self, TransactionStateError> {
        let recorded = match std::mem::take(&mut self.transaction) {
            TransactionState::Queuing(recorded) => recorded,
            other => {
                self.transaction = other;
                return Err(TransactionStateError::ExecWithoutMulti);
            }
        };
        self.queue_direct(Request::cmd("EXEC"), Handler::Transaction(recorded));
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::ClientConfig;
    use crate::pool::ConnectionPool;
    use crate::transport::testing::DuplexConnector;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Op {
        Watch,
        Unwatch,
        Multi,
        Discard,
        Exec,
    }

    const OPS: [Op; 5] = [Op::Watch, Op::Unwatch, Op::Multi, Op::Discard, Op::Exec];

    fn session() -> (Session, Arc<DuplexConnector>) {
        let (connector, _servers) = DuplexConnector::with_peers(0);
        let pool = ConnectionPool::new(Arc::new(ClientConfig::with_connector(connector.clone())));
        (Session::new(pool), connector)
    }

    fn apply(session: &mut Session, op: Op) -> Result<(), TransactionStateError> {
        match op {
            Op::Watch => session.watch(["k"]).map(|_| ()),
            Op::Unwatch => session.unwatch().map(|_| ()),
            Op::Multi => session.multi().map(|_| ()),
            Op::Discard => session.discard().map(|_| ()),
            Op::Exec => session.exec().map(|_| ()),
        }
    }

    fn enter(session: &mut Session, phase: TransactionPhase) {
        match phase {
            TransactionPhase::Idle => {}
            TransactionPhase::Watching => apply(session, Op::Watch).unwrap(),
            TransactionPhase::Queuing => apply(session, Op::Multi).unwrap(),
        }
        assert_eq!(session.transaction_phase(), phase);
    }

    /// Expected phase after `op`, or `None` when the transition is refused.
    fn transition(phase: TransactionPhase, op: Op) -> Option<TransactionPhase> {
        use TransactionPhase::*;
        match (phase, op) {
            (Idle | Watching, Op::Watch) => Some(Watching),
            (Idle | Watching, Op::Unwatch) => Some(Idle),
            (Idle | Watching, Op::Multi) => Some(Queuing),
            (Idle | Watching, Op::Discard | Op::Exec) => None,
            (Queuing, Op::Watch | Op::Unwatch | Op::Multi) => None,
            (Queuing, Op::Discard | Op::Exec) => Some(Idle),
        }
    }

    #[test]
    fn guard_matrix_for_consecutive_pairs() {
        let phases = [
            TransactionPhase::Idle,
            TransactionPhase::Watching,
            TransactionPhase::Queuing,
        ];
        let mut cases = 0;
        for start in phases {
            for first in OPS {
                for second in OPS {
                    let (mut session, connector) = session();
                    enter(&mut session, start);

                    let mut phase = start;
                    for op in [first, second] {
                        let before = session.pending();
                        match (transition(phase, op), apply(&mut session, op)) {
                            (Some(next), Ok(())) => {
                                phase = next;
                                assert_eq!(session.pending(), before + 1);
                            }
                            (None, Err(_)) => assert_eq!(session.pending(), before),
                            (expected, got) => panic!(
                                "{start:?} then {first:?},{second:?}: {op:?} from {phase:?} expected {expected:?}, got {got:?}"
                            ),
                        }
                        assert_eq!(session.transaction_phase(), phase);
                    }
                    // Guards are client-side only.
                    assert_eq!(*connector.connects.lock(), 0);
                    cases += 1;
                }
            }
        }
        assert_eq!(cases, 75);
    }

    #[test]
    fn refusals_name_the_violation() {
        let (mut session, _connector) = session();
        assert_eq!(session.exec().unwrap_err(), TransactionStateError::ExecWithoutMulti);
        assert_eq!(session.discard().unwrap_err(), TransactionStateError::DiscardWithoutMulti);
        session.multi().unwrap();
        assert_eq!(session.multi().unwrap_err(), TransactionStateError::NestedMulti);
        assert_eq!(session.watch(["k"]).unwrap_err(), TransactionStateError::WatchInsideMulti);
        assert_eq!(session.unwatch().unwrap_err(), TransactionStateError::UnwatchInsideMulti);
    }

    #[test]
    fn commands_inside_multi_expect_queued_and_are_recorded() {
        let (mut session, _connector) = session();
        session.multi().unwrap().incr("a").get("b");
        match &session.transaction {
            TransactionState::Queuing(recorded) => assert_eq!(recorded.len(), 2),
            other => panic!("not queuing: {other:?}"),
        }
        assert_eq!(session.pending(), 3);
        session.exec().unwrap();
        assert_eq!(session.transaction_phase(), TransactionPhase::Idle);
        assert_eq!(session.pending(), 4);
    }

    #[test]
    fn multi_marks_session_unpoolable() {
        let (mut session, _connector) = session();
        assert!(session.is_poolable());
        session.multi().unwrap();
        assert!(!session.is_poolable());
    }
}
