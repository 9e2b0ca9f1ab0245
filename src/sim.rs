//! `SimFabric`: a software-simulated fabric sufficient to drive and test the event-loop
//! contract without hardware.
//!
//! One `VecDeque` per ordered `(src_thread, dst_thread)` pair preserves the per-link FIFO
//! guarantee; a two-phase idle barrier (`Barrier`) mirrors the fabric's global quiescence/
//! termination handshake; a host-message `Vec` collects everything sent to `HostPin`. Every
//! simulated thread runs on the same host OS thread under ordinary cooperative round-robin
//! scheduling (deliberately not `async`, since a real tinsel thread never yields inside a
//! handler either).

use alloc::collections::{BTreeMap, VecDeque};
use alloc::vec;
use alloc::vec::Vec;

use crate::addr::{MachineConfig, ThreadId};
use crate::device::{Device, PState};
use crate::routing::{PInEdge, ProgRouterMesh, RouterKey};
use crate::runtime::{IdleLevel, Mailbox, RawMessage, ThreadRuntime, WaitFor};

/// The two-phase global idle barrier every simulated thread votes into.
///
/// A round closes once every thread has cast a vote; the resolution (`Quiescent` unless every
/// thread voted inactive *twice in a row*, in which case `Terminated`) is handed back to the
/// thread that closed the round immediately, and cached for every other thread to collect the
/// next time it calls `idle_vote` (this keeps the resolution independent of scheduling order).
struct Barrier {
    votes: Vec<Option<bool>>,
    pending: Vec<Option<IdleLevel>>,
    consecutive_idle_rounds: u32,
}

impl Barrier {
    fn new(thread_count: usize) -> Self {
        Self {
            votes: vec![None; thread_count],
            pending: vec![None; thread_count],
            consecutive_idle_rounds: 0,
        }
    }

    fn idle_vote(&mut self, thread_idx: usize, active: bool) -> IdleLevel {
        if let Some(level) = self.pending[thread_idx].take() {
            return level;
        }
        self.votes[thread_idx] = Some(active);
        if !self.votes.iter().all(Option::is_some) {
            return IdleLevel::Spurious;
        }

        let any_active = self.votes.iter().any(|v| *v == Some(true));
        let resolution = if any_active {
            self.consecutive_idle_rounds = 0;
            IdleLevel::Quiescent
        } else {
            self.consecutive_idle_rounds += 1;
            if self.consecutive_idle_rounds >= 2 {
                IdleLevel::Terminated
            } else {
                IdleLevel::Quiescent
            }
        };

        for v in self.votes.iter_mut() {
            *v = None;
        }
        for (i, slot) in self.pending.iter_mut().enumerate() {
            if i != thread_idx {
                *slot = Some(resolution);
            }
        }
        resolution
    }
}

/// One thread's mailbox as seen through the simulated fabric, borrowed fresh for each
/// [`ThreadRuntime::step`] call.
struct SimMailboxHandle<'a, M> {
    src: usize,
    thread_index: &'a BTreeMap<u32, usize>,
    queues: &'a mut BTreeMap<(usize, usize), VecDeque<RawMessage<M>>>,
    host: &'a mut Vec<M>,
    mesh: &'a ProgRouterMesh,
    cfg: &'a MachineConfig,
    barrier: &'a mut Barrier,
}

#[sealed::sealed]
impl<M: Copy> Mailbox<M> for SimMailboxHandle<'_, M> {
    fn can_send(&self) -> bool {
        // The simulated fabric has no send-side capacity limit; a real mailbox would report
        // backpressure here.
        true
    }

    fn can_recv(&self) -> bool {
        self.queues
            .iter()
            .any(|(&(_, dst), q)| dst == self.src && !q.is_empty())
    }

    fn send(&mut self, key: RouterKey, message: M) {
        for &(mailbox, thread_in_mailbox, routing_key) in self.mesh.resolve(key) {
            let dest_thread = self.cfg.thread_id_from_mailbox(mailbox, thread_in_mailbox);
            let Some(&dst_idx) = self.thread_index.get(&dest_thread.0) else {
                continue;
            };
            self.queues.entry((self.src, dst_idx)).or_default().push_back(RawMessage {
                dev_id: routing_key.local_id(),
                edge_id: routing_key.edge_index(),
                payload: message,
            });
        }
    }

    fn send_to_host(&mut self, message: M) {
        self.host.push(message);
    }

    fn recv(&mut self) -> Option<RawMessage<M>> {
        for (&(_, dst), q) in self.queues.iter_mut() {
            if dst == self.src {
                if let Some(msg) = q.pop_front() {
                    return Some(msg);
                }
            }
        }
        None
    }

    fn wait(&mut self, _wait_for: WaitFor) {
        // The cooperative scheduler revisits every live thread unconditionally; there is nothing
        // to actually block on here.
    }

    fn idle_vote(&mut self, active: bool) -> IdleLevel {
        self.barrier.idle_vote(self.src, active)
    }
}

/// One simulated fabric: every thread's runtime, the per-link message queues between them, and
/// the host-message sink.
pub struct SimFabric<D: Device<PINS>, const PINS: usize> {
    runtimes: Vec<ThreadRuntime<D, PINS>>,
    thread_index: BTreeMap<u32, usize>,
    queues: BTreeMap<(usize, usize), VecDeque<RawMessage<D::Message>>>,
    host: Vec<D::Message>,
    mesh: ProgRouterMesh,
    cfg: MachineConfig,
    barrier: Barrier,
}

impl<D: Device<PINS>, const PINS: usize> SimFabric<D, PINS> {
    /// Build a fabric over `threads`: each entry is the thread id `map` assigned, its devices'
    /// initial `PState`s (index == thread-local device id), and its in-edge table.
    pub fn new(
        cfg: MachineConfig,
        mesh: ProgRouterMesh,
        threads: Vec<(ThreadId, Vec<PState<D::State>>, Vec<PInEdge<D::Edge>>)>,
    ) -> Self {
        let thread_count = threads.len();
        let mut thread_index = BTreeMap::new();
        let mut runtimes = Vec::with_capacity(thread_count);
        for (idx, (thread_id, states, in_edges)) in threads.into_iter().enumerate() {
            thread_index.insert(thread_id.0, idx);
            runtimes.push(ThreadRuntime::new(states, in_edges));
        }
        Self {
            runtimes,
            thread_index,
            queues: BTreeMap::new(),
            host: Vec::new(),
            mesh,
            cfg,
            barrier: Barrier::new(thread_count),
        }
    }

    /// Drive every thread's event loop to completion and return everything sent to the host, in
    /// the order `HostPin` sends arrived.
    pub fn run(&mut self) -> &[D::Message] {
        let n = self.runtimes.len();
        let mut done = vec![false; n];
        let mut remaining = n;
        while remaining > 0 {
            for idx in 0..n {
                if done[idx] {
                    continue;
                }
                let SimFabric {
                    runtimes,
                    thread_index,
                    queues,
                    host,
                    mesh,
                    cfg,
                    barrier,
                } = self;
                let mut handle = SimMailboxHandle {
                    src: idx,
                    thread_index,
                    queues,
                    host,
                    mesh,
                    cfg,
                    barrier,
                };
                if !runtimes[idx].step(&mut handle) {
                    done[idx] = true;
                    remaining -= 1;
                }
            }
        }
        &self.host
    }

    /// The final device states of thread `idx`, for assertions after [`SimFabric::run`].
    pub fn thread_states(&self, idx: usize) -> &[PState<D::State>] {
        self.runtimes[idx].states()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Pin;

    struct Ring;
    impl Device<1> for Ring {
        type State = u32;
        type Edge = ();
        type Message = u32;

        fn init(state: &mut PState<u32>) {
            if state.app == 1 {
                state.ready_to_send = Pin::Pin(0);
            }
        }
        fn send(state: &mut PState<u32>) -> u32 {
            state.ready_to_send = Pin::No;
            state.app
        }
        fn recv(state: &mut PState<u32>, _edge: &(), message: &u32) {
            state.app += message;
            if state.app < 5 {
                state.ready_to_send = Pin::Pin(0);
            }
        }
        fn step(_state: &mut PState<u32>) -> bool {
            false
        }
        fn finish(state: &PState<u32>) -> Option<u32> {
            Some(state.app)
        }
    }

    #[test]
    fn two_node_ring_passes_a_token_until_quiescent() {
        let cfg = MachineConfig::default();
        let board = crate::addr::BoardCoord { x: 0, y: 0 };
        let mailbox = crate::addr::MailboxCoord { x: 0, y: 0 };
        let t0 = cfg.thread_id(board, mailbox, 0);
        let t1 = cfg.thread_id(board, mailbox, 1);

        let mut mesh = ProgRouterMesh::new();
        let key_0_to_1 = mesh
            .add_dests_from_board(
                board,
                alloc::vec![(cfg.mailbox_coord(t1), cfg.core_and_thread(t1), crate::addr::RoutingKey::pack(0, 0))],
            )
            .unwrap();
        let key_1_to_0 = mesh
            .add_dests_from_board(
                board,
                alloc::vec![(cfg.mailbox_coord(t0), cfg.core_and_thread(t0), crate::addr::RoutingKey::pack(0, 0))],
            )
            .unwrap();

        let mut state0 = PState::new(1u32, 1);
        state0.router_keys[0] = Some(key_0_to_1);
        let mut state1 = PState::new(0u32, 1);
        state1.router_keys[0] = Some(key_1_to_0);

        let mut fabric: SimFabric<Ring, 1> = SimFabric::new(
            cfg,
            mesh,
            alloc::vec![
                (t0, alloc::vec![state0], alloc::vec![PInEdge { label: () }]),
                (t1, alloc::vec![state1], alloc::vec![PInEdge { label: () }]),
            ],
        );
        fabric.run();

        let final0 = fabric.thread_states(0)[0].app;
        let final1 = fabric.thread_states(1)[0].app;
        assert!(final0 >= 5 || final1 >= 5);
    }
}
