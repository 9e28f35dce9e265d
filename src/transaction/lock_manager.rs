use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::info;
use parking_lot::{Condvar, Mutex};

use crate::common::types::{Rid, TxnId};
use crate::transaction::transaction::{
    AbortReason, IsolationLevel, TransactionError, TransactionRef, TransactionRegistry,
    TransactionState,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockMode {
    Shared,
    Exclusive,
}

#[derive(Debug, Clone, Copy)]
struct LockRequest {
    txn_id: TxnId,
    mode: LockMode,
    granted: bool,
}

impl LockRequest {
    fn new(txn_id: TxnId, mode: LockMode) -> Self {
        Self {
            txn_id,
            mode,
            granted: false,
        }
    }
}

/// FIFO queue of lock requests on one rid, plus the single slot naming a
/// transaction currently upgrading its shared lock.
struct QueueState {
    requests: Vec<LockRequest>,
    upgrading: Option<TxnId>,
}

struct LockRequestQueue {
    state: Mutex<QueueState>,
    cv: Condvar,
}

impl LockRequestQueue {
    fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                requests: Vec::new(),
                upgrading: None,
            }),
            cv: Condvar::new(),
        }
    }
}

type LockTable = HashMap<Rid, Arc<LockRequestQueue>>;

/// Row-level lock manager: shared/exclusive locks on rids with strict
/// FIFO grants, lock upgrade, isolation-aware acquire/release, and
/// cycle-based deadlock detection over a wait-for graph.
pub struct LockManager {
    lock_table: Arc<Mutex<LockTable>>,
    enable_cycle_detection: Arc<AtomicBool>,
    detector: Mutex<Option<JoinHandle<()>>>,
}

impl LockManager {
    /// Create the lock manager and start its background deadlock
    /// detector, which wakes every `cycle_detection_interval`.
    pub fn new(registry: Arc<TransactionRegistry>, cycle_detection_interval: Duration) -> Self {
        let lock_table: Arc<Mutex<LockTable>> = Arc::new(Mutex::new(HashMap::new()));
        let enable_cycle_detection = Arc::new(AtomicBool::new(true));

        let detector = {
            let lock_table = Arc::clone(&lock_table);
            let registry = Arc::clone(&registry);
            let enabled = Arc::clone(&enable_cycle_detection);
            thread::Builder::new()
                .name("cycle-detection".into())
                .spawn(move || {
                    Self::run_cycle_detection(lock_table, registry, enabled, cycle_detection_interval)
                })
                .expect("spawn cycle detection thread")
        };

        Self {
            lock_table,
            enable_cycle_detection,
            detector: Mutex::new(Some(detector)),
        }
    }

    /// Acquire a shared lock on `rid`, blocking until granted or the
    /// transaction is aborted.
    pub fn lock_shared(&self, txn: &TransactionRef, rid: Rid) -> Result<(), TransactionError> {
        // Read-uncommitted reads the latest version directly and never
        // takes shared locks.
        if txn.isolation_level() == IsolationLevel::ReadUncommitted {
            return Err(Self::abort_implicitly(
                txn,
                AbortReason::LockSharedOnReadUncommitted,
            ));
        }
        if txn.isolation_level() == IsolationLevel::RepeatableRead
            && txn.state() == TransactionState::Shrinking
        {
            return Err(Self::abort_implicitly(txn, AbortReason::LockOnShrinking));
        }
        if txn.is_shared_locked(rid) || txn.is_exclusive_locked(rid) {
            return Ok(());
        }

        let queue = self.queue_for(rid);
        let mut state = queue.state.lock();
        state.requests.push(LockRequest::new(txn.id(), LockMode::Shared));

        loop {
            if txn.state() == TransactionState::Aborted {
                Self::remove_request(&mut state, txn.id());
                queue.cv.notify_all();
                return Err(Self::abort_implicitly(txn, AbortReason::Deadlock));
            }
            if Self::is_lock_compatible(&state, txn.id()) {
                break;
            }
            queue.cv.wait(&mut state);
        }

        Self::grant(&mut state, txn.id());
        txn.add_shared_lock(rid);
        Ok(())
    }

    /// Acquire an exclusive lock on `rid`. Permitted under every
    /// isolation level; blocked until this request heads the queue.
    pub fn lock_exclusive(&self, txn: &TransactionRef, rid: Rid) -> Result<(), TransactionError> {
        if txn.state() == TransactionState::Shrinking {
            return Err(Self::abort_implicitly(txn, AbortReason::LockOnShrinking));
        }
        if txn.is_exclusive_locked(rid) {
            return Ok(());
        }

        let queue = self.queue_for(rid);
        let mut state = queue.state.lock();
        state
            .requests
            .push(LockRequest::new(txn.id(), LockMode::Exclusive));

        loop {
            if txn.state() == TransactionState::Aborted {
                Self::remove_request(&mut state, txn.id());
                queue.cv.notify_all();
                return Err(Self::abort_implicitly(txn, AbortReason::Deadlock));
            }
            if Self::is_lock_compatible(&state, txn.id()) {
                break;
            }
            queue.cv.wait(&mut state);
        }

        Self::grant(&mut state, txn.id());
        txn.add_exclusive_lock(rid);
        Ok(())
    }

    /// Upgrade a held shared lock to exclusive. At most one transaction
    /// may be upgrading per rid; a second upgrader aborts immediately,
    /// which breaks the S+S upgrade deadlock on a single rid.
    pub fn lock_upgrade(&self, txn: &TransactionRef, rid: Rid) -> Result<(), TransactionError> {
        if txn.state() == TransactionState::Shrinking {
            return Err(Self::abort_implicitly(txn, AbortReason::LockOnShrinking));
        }
        if txn.is_exclusive_locked(rid) {
            return Ok(());
        }

        let queue = self.queue_for(rid);
        let mut state = queue.state.lock();

        if state.upgrading.is_some() {
            return Err(Self::abort_implicitly(txn, AbortReason::UpgradeConflict));
        }
        state.upgrading = Some(txn.id());

        {
            let request = state
                .requests
                .iter_mut()
                .find(|r| r.txn_id == txn.id())
                .expect("upgrade requires a granted shared lock");
            request.mode = LockMode::Exclusive;
            request.granted = false;
        }

        loop {
            if txn.state() == TransactionState::Aborted {
                state.upgrading = None;
                Self::remove_request(&mut state, txn.id());
                queue.cv.notify_all();
                return Err(Self::abort_implicitly(txn, AbortReason::Deadlock));
            }
            if Self::is_lock_compatible(&state, txn.id()) {
                break;
            }
            queue.cv.wait(&mut state);
        }

        Self::grant(&mut state, txn.id());
        txn.remove_shared_lock(rid);
        txn.add_exclusive_lock(rid);
        state.upgrading = None;
        Ok(())
    }

    /// Release the lock held on `rid`. The first release flips a growing
    /// transaction to shrinking, except under read-committed where shared
    /// locks come and go freely. Returns false when no lock was held.
    pub fn unlock(&self, txn: &TransactionRef, rid: Rid) -> bool {
        let Some(queue) = self.existing_queue_for(rid) else {
            return false;
        };
        let mut state = queue.state.lock();
        let Some(position) = state.requests.iter().position(|r| r.txn_id == txn.id()) else {
            return false;
        };

        if txn.isolation_level() != IsolationLevel::ReadCommitted
            && txn.state() == TransactionState::Growing
        {
            txn.set_state(TransactionState::Shrinking);
        }

        state.requests.remove(position);
        txn.remove_shared_lock(rid);
        txn.remove_exclusive_lock(rid);

        // Wake the queue when the release unblocked some waiter.
        let wake = state
            .requests
            .iter()
            .any(|r| !r.granted && Self::is_lock_compatible(&state, r.txn_id));
        if wake {
            queue.cv.notify_all();
        }
        true
    }

    /// Grant rule. An exclusive request is compatible only at the head of
    /// the queue with no other grant outstanding; the second clause
    /// matters for upgrades, where a later shared holder is still granted
    /// behind the flipped request. A shared request is compatible when
    /// everything ahead of it is a granted shared lock.
    fn is_lock_compatible(state: &QueueState, txn_id: TxnId) -> bool {
        let request = state
            .requests
            .iter()
            .find(|r| r.txn_id == txn_id)
            .expect("request is queued");

        if request.mode == LockMode::Exclusive {
            return state.requests.first().map(|r| r.txn_id) == Some(txn_id)
                && state
                    .requests
                    .iter()
                    .all(|r| r.txn_id == txn_id || !r.granted);
        }
        for preceding in &state.requests {
            if preceding.txn_id == txn_id {
                return true;
            }
            if !(preceding.granted && preceding.mode == LockMode::Shared) {
                return false;
            }
        }
        true
    }

    fn grant(state: &mut QueueState, txn_id: TxnId) {
        let request = state
            .requests
            .iter_mut()
            .find(|r| r.txn_id == txn_id)
            .expect("request is queued");
        request.granted = true;
    }

    fn remove_request(state: &mut QueueState, txn_id: TxnId) {
        if let Some(position) = state.requests.iter().position(|r| r.txn_id == txn_id) {
            state.requests.remove(position);
        }
    }

    fn abort_implicitly(txn: &TransactionRef, reason: AbortReason) -> TransactionError {
        txn.set_state(TransactionState::Aborted);
        TransactionError::Abort(txn.id(), reason)
    }

    fn queue_for(&self, rid: Rid) -> Arc<LockRequestQueue> {
        let mut table = self.lock_table.lock();
        Arc::clone(
            table
                .entry(rid)
                .or_insert_with(|| Arc::new(LockRequestQueue::new())),
        )
    }

    fn existing_queue_for(&self, rid: Rid) -> Option<Arc<LockRequestQueue>> {
        self.lock_table.lock().get(&rid).cloned()
    }

    fn run_cycle_detection(
        lock_table: Arc<Mutex<LockTable>>,
        registry: Arc<TransactionRegistry>,
        enabled: Arc<AtomicBool>,
        interval: Duration,
    ) {
        while enabled.load(Ordering::SeqCst) {
            thread::sleep(interval);
            if !enabled.load(Ordering::SeqCst) {
                break;
            }

            let table = lock_table.lock();
            let mut graph = Self::build_waits_for(&table, &registry);
            while let Some(victim_id) = graph.find_cycle_victim() {
                info!("deadlock detected, aborting youngest transaction {}", victim_id);
                if let Some(victim) = registry.get(victim_id) {
                    victim.set_state(TransactionState::Aborted);
                    // Wake every queue the victim may be parked on: the
                    // rids held by the transactions it was waiting for.
                    // Passing through each queue mutex first orders the
                    // notify after a waiter's predicate check, so the
                    // wakeup cannot be lost.
                    for &blocker_id in graph.neighbors(victim_id) {
                        if let Some(blocker) = registry.get(blocker_id) {
                            for rid in blocker.locked_rids() {
                                if let Some(queue) = table.get(&rid) {
                                    drop(queue.state.lock());
                                    queue.cv.notify_all();
                                }
                            }
                        }
                    }
                }
                // More than one cycle may exist; rebuild and rescan.
                graph = Self::build_waits_for(&table, &registry);
            }
        }
    }

    /// Rebuild the wait-for graph from scratch: one edge from each
    /// waiting transaction to each granted holder in the same queue,
    /// skipping aborted transactions.
    fn build_waits_for(table: &LockTable, registry: &TransactionRegistry) -> WaitsForGraph {
        let mut graph = WaitsForGraph::new();
        for queue in table.values() {
            let state = queue.state.lock();
            let mut holdings = Vec::new();
            let mut waitings = Vec::new();
            for request in &state.requests {
                let Some(txn) = registry.get(request.txn_id) else {
                    continue;
                };
                if txn.state() == TransactionState::Aborted {
                    continue;
                }
                if request.granted {
                    holdings.push(request.txn_id);
                } else {
                    waitings.push(request.txn_id);
                }
            }
            for &waiting in &waitings {
                for &holding in &holdings {
                    graph.add_edge(waiting, holding);
                }
            }
        }
        graph
    }
}

impl Drop for LockManager {
    fn drop(&mut self) {
        self.enable_cycle_detection.store(false, Ordering::SeqCst);
        if let Some(handle) = self.detector.lock().take() {
            let _ = handle.join();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visit {
    InStack,
    Visited,
}

/// Wait-for graph with deterministic traversal: vertices iterate in
/// ascending id order and neighbor lists stay sorted on insert.
struct WaitsForGraph {
    edges: BTreeMap<TxnId, Vec<TxnId>>,
}

impl WaitsForGraph {
    fn new() -> Self {
        Self {
            edges: BTreeMap::new(),
        }
    }

    fn add_edge(&mut self, from: TxnId, to: TxnId) {
        let neighbors = self.edges.entry(from).or_default();
        if let Err(position) = neighbors.binary_search(&to) {
            neighbors.insert(position, to);
        }
    }

    fn neighbors(&self, txn_id: TxnId) -> &[TxnId] {
        self.edges
            .get(&txn_id)
            .map(|neighbors| neighbors.as_slice())
            .unwrap_or(&[])
    }

    /// Depth-first search with a three-state marker; a back edge into the
    /// stack is a cycle. Returns the youngest (largest id) transaction in
    /// the first cycle found.
    fn find_cycle_victim(&self) -> Option<TxnId> {
        let mut visited: HashMap<TxnId, Visit> = HashMap::new();
        for &vertex in self.edges.keys() {
            if visited.contains_key(&vertex) {
                continue;
            }
            let mut stack = vec![vertex];
            visited.insert(vertex, Visit::InStack);
            if let Some(victim) = self.dfs(&mut stack, &mut visited) {
                return Some(victim);
            }
        }
        None
    }

    fn dfs(&self, stack: &mut Vec<TxnId>, visited: &mut HashMap<TxnId, Visit>) -> Option<TxnId> {
        let top = *stack.last().expect("dfs stack is non-empty");
        for &next in self.neighbors(top) {
            match visited.get(&next) {
                Some(Visit::InStack) => {
                    // Cycle: every vertex from `next` to the stack top.
                    let start = stack
                        .iter()
                        .position(|&v| v == next)
                        .expect("in-stack vertex is on the stack");
                    return stack[start..].iter().copied().max();
                }
                None => {
                    stack.push(next);
                    visited.insert(next, Visit::InStack);
                    if let Some(victim) = self.dfs(stack, visited) {
                        return Some(victim);
                    }
                }
                Some(Visit::Visited) => {}
            }
        }
        visited.insert(top, Visit::Visited);
        stack.pop();
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_cycle_in_a_chain() {
        let mut graph = WaitsForGraph::new();
        graph.add_edge(1, 2);
        graph.add_edge(2, 3);
        assert_eq!(graph.find_cycle_victim(), None);
    }

    #[test]
    fn two_cycle_aborts_the_youngest() {
        let mut graph = WaitsForGraph::new();
        graph.add_edge(1, 2);
        graph.add_edge(2, 1);
        assert_eq!(graph.find_cycle_victim(), Some(2));
    }

    #[test]
    fn victim_comes_from_the_cycle_not_the_tail() {
        // 5 waits into a 1 <-> 2 cycle but is not part of it.
        let mut graph = WaitsForGraph::new();
        graph.add_edge(5, 1);
        graph.add_edge(1, 2);
        graph.add_edge(2, 1);
        assert_eq!(graph.find_cycle_victim(), Some(2));
    }

    #[test]
    fn long_cycle_victim() {
        let mut graph = WaitsForGraph::new();
        graph.add_edge(1, 4);
        graph.add_edge(4, 2);
        graph.add_edge(2, 1);
        assert_eq!(graph.find_cycle_victim(), Some(4));
    }

    #[test]
    fn edges_are_deduplicated_and_sorted() {
        let mut graph = WaitsForGraph::new();
        graph.add_edge(1, 3);
        graph.add_edge(1, 2);
        graph.add_edge(1, 3);
        assert_eq!(graph.neighbors(1), &[2, 3]);
    }
}
