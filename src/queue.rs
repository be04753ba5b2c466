//! The FIFO query queue and result slots.
use std::collections::{HashMap, VecDeque};

use crate::{Error, Result, query::Query, row::QueryResult};

/// Handle to a queued query, valid for the session that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueryId(u64);

#[derive(Debug)]
pub(crate) struct Pending {
    pub id: QueryId,
    pub query: Query,
}

/// Strict FIFO of caller requests plus the parking lot for finished
/// results.
///
/// Only the session pops from it, and only while `Ready`; that is what
/// serializes concurrent callers onto the single connection.
#[derive(Debug, Default)]
pub(crate) struct QueryQueue {
    next: u64,
    pending: VecDeque<Pending>,
    results: HashMap<QueryId, Result<QueryResult>>,
}

impl QueryQueue {
    pub fn push(&mut self, query: Query) -> QueryId {
        let id = QueryId(self.next);
        self.next += 1;
        self.pending.push_back(Pending { id, query });
        id
    }

    pub fn pop(&mut self) -> Option<Pending> {
        self.pending.pop_front()
    }

    /// Remove a not yet submitted query. Returns false once it left the
    /// queue, i.e. it already reached the wire.
    pub fn remove(&mut self, id: QueryId) -> bool {
        let Some(at) = self.pending.iter().position(|p| p.id == id) else {
            return false;
        };
        self.pending.remove(at);
        true
    }

    pub fn store(&mut self, id: QueryId, result: Result<QueryResult>) {
        self.results.insert(id, result);
    }

    pub fn take(&mut self, id: QueryId) -> Option<Result<QueryResult>> {
        self.results.remove(&id)
    }

    pub fn is_queued(&self, id: QueryId) -> bool {
        self.pending.iter().any(|p| p.id == id)
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Fail every still queued query, front to back.
    pub fn fail_all(&mut self, err: impl Fn() -> Error) {
        while let Some(pending) = self.pending.pop_front() {
            self.results.insert(pending.id, Err(err()));
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::{Cancelled, ErrorKind};

    #[test]
    fn fifo_order() {
        let mut queue = QueryQueue::default();
        let a = queue.push(Query::new("SELECT 1"));
        let b = queue.push(Query::new("SELECT 2"));
        assert_eq!(queue.pop().unwrap().id, a);
        assert_eq!(queue.pop().unwrap().id, b);
        assert!(queue.pop().is_none());
    }

    #[test]
    fn remove_only_touches_pending() {
        let mut queue = QueryQueue::default();
        let a = queue.push(Query::new("SELECT 1"));
        let popped = queue.pop().unwrap();
        assert!(!queue.remove(a), "active query is no longer removable");

        let b = queue.push(Query::new("SELECT 2"));
        assert!(queue.remove(b));
        assert!(queue.is_empty());
        drop(popped);
    }

    #[test]
    fn results_park_until_taken() {
        let mut queue = QueryQueue::default();
        let id = queue.push(Query::new("SELECT 1"));
        queue.pop().unwrap();
        queue.store(id, Err(Cancelled.into()));
        let res = queue.take(id).unwrap();
        assert!(matches!(res.unwrap_err().kind(), ErrorKind::Cancelled(_)));
        assert!(queue.take(id).is_none(), "a result is handed out once");
    }
}
