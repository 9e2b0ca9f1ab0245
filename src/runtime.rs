//! The per-thread event loop contract (C5): the transition-rule state machine every hardware
//! thread executes, generic over the fabric it runs on.
//!
//! Deliberately *not* modelled as a coroutine or an `async` state machine: a tinsel thread
//! never yields inside a handler, so the whole thing is a plain, synchronous `step()` that a
//! driver (physical boot code, or [`crate::sim::SimFabric`] in tests) calls in a loop.

use alloc::vec::Vec;
use bitflags::bitflags;
use sealed::sealed;

use crate::device::{Device, PState, Pin};
use crate::routing::{PInEdge, RouterKey};

bitflags! {
    /// What condition a blocked thread is waiting on (rule 4, blocked-send starvation avoidance).
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct WaitFor: u8 {
        const CAN_SEND = 0b01;
        const CAN_RECV = 0b10;
    }
}

/// Outcome of one round of the fabric's idle-detection handshake.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum IdleLevel {
    /// Spurious wake; re-enter the loop.
    Spurious,
    /// Global quiescence reached; run one `step()` pass.
    Quiescent,
    /// Global termination agreed; exit the loop.
    Terminated,
}

/// One message as delivered to a thread: which local device it targets, which in-edge-table
/// entry describes the edge it arrived on, and the payload itself.
#[derive(Debug, Clone, Copy)]
pub struct RawMessage<M> {
    pub dev_id: u16,
    pub edge_id: u16,
    pub payload: M,
}

/// The mailbox primitives a thread's event loop needs: `can_send`/`can_recv`/`send`/`recv` plus
/// the two suspension points (`wait`, `idle_vote`).
///
/// Sealed: this crate owns the only meaningful implementations (the physical fabric boundary and
/// [`crate::sim::SimFabric`]); it is not a general-purpose extension point for user code.
#[sealed]
pub trait Mailbox<M> {
    fn can_send(&self) -> bool;
    fn can_recv(&self) -> bool;
    /// Send `message` to every destination named by `key`'s router-table row.
    fn send(&mut self, key: RouterKey, message: M);
    /// Send `message` to the host, over `HostLink`.
    fn send_to_host(&mut self, message: M);
    fn recv(&mut self) -> Option<RawMessage<M>>;
    /// Suspend until any condition in `wait_for` holds. Never busy-polls.
    fn wait(&mut self, wait_for: WaitFor);
    /// Cast an idle vote (`true` = "I have nothing left to do") and block for the fabric's
    /// answer.
    fn idle_vote(&mut self, active: bool) -> IdleLevel;
}

/// The state one thread's event loop carries between `step()` calls: every device mapped to this
/// thread, the in-edge table those devices' incoming messages are framed against, and the
/// sender stack (a device id appears on it at most once at a time).
pub struct ThreadRuntime<D: Device<PINS>, const PINS: usize> {
    states: Vec<PState<D::State>>,
    in_edges: Vec<PInEdge<D::Edge>>,
    senders: Vec<usize>,
    active: bool,
    time: u16,
    #[cfg(feature = "stats")]
    msgs_sent: u32,
    #[cfg(feature = "stats")]
    msgs_received: u32,
    #[cfg(feature = "stats")]
    blocked_sends: u32,
}

impl<D: Device<PINS>, const PINS: usize> ThreadRuntime<D, PINS> {
    /// Build a thread's runtime over `states` (index == thread-local device id) and `in_edges`,
    /// running every device's `init` handler and seeding the sender stack from whichever devices
    /// come out ready to send.
    pub fn new(mut states: Vec<PState<D::State>>, in_edges: Vec<PInEdge<D::Edge>>) -> Self {
        let mut senders = Vec::new();
        for (i, state) in states.iter_mut().enumerate() {
            D::init(state);
            if state.ready_to_send != Pin::No && !state.in_stack {
                state.in_stack = true;
                senders.push(i);
            }
        }
        Self {
            states,
            in_edges,
            senders,
            active: true,
            time: 0,
            #[cfg(feature = "stats")]
            msgs_sent: 0,
            #[cfg(feature = "stats")]
            msgs_received: 0,
            #[cfg(feature = "stats")]
            blocked_sends: 0,
        }
    }

    /// Current value of this thread's step counter, incremented once per quiescent idle round.
    pub fn time(&self) -> u16 {
        self.time
    }

    /// Total messages sent by devices on this thread, including `HostPin` sends.
    ///
    /// Only available with the `stats` feature (mirrors the original's `POLITE_COUNT_MSGS`
    /// counters): off by default, never affecting control flow.
    #[cfg(feature = "stats")]
    pub fn msgs_sent(&self) -> u32 {
        self.msgs_sent
    }

    /// Total messages received and dispatched to a `recv` handler on this thread.
    #[cfg(feature = "stats")]
    pub fn msgs_received(&self) -> u32 {
        self.msgs_received
    }

    /// Number of `step()` calls that had to wait because a send was pending but the mailbox
    /// wasn't send-ready (rule 4, blocked-send starvation avoidance).
    #[cfg(feature = "stats")]
    pub fn blocked_sends(&self) -> u32 {
        self.blocked_sends
    }

    /// Device states, for inspection after the loop has terminated (e.g. by tests asserting on
    /// final application state).
    pub fn states(&self) -> &[PState<D::State>] {
        &self.states
    }

    fn push_if_ready(&mut self, id: usize) {
        let state = &mut self.states[id];
        if state.ready_to_send != Pin::No && !state.in_stack {
            state.in_stack = true;
            self.senders.push(id);
        }
    }

    /// Run one iteration of the transition rules, in priority order, against `mailbox`.
    ///
    /// Returns `true` if the thread should keep running, `false` once it has reached global
    /// termination (rule 3, `idle_level == 2`) and run every device's `finish` handler.
    pub fn step(&mut self, mailbox: &mut impl Mailbox<D::Message>) -> bool {
        // 1. Send rule.
        if let Some(&id) = self.senders.last() {
            if mailbox.can_send() {
                self.senders.pop();
                let pin = self.states[id].ready_to_send;
                self.states[id].in_stack = false;
                let payload = D::send(&mut self.states[id]);
                match pin {
                    Pin::No => {}
                    Pin::HostPin => mailbox.send_to_host(payload),
                    Pin::Pin(p) => {
                        if let Some(key) = self.states[id].router_keys.get(p).copied().flatten() {
                            mailbox.send(key, payload);
                        }
                    }
                }
                #[cfg(feature = "stats")]
                {
                    self.msgs_sent += 1;
                }
                self.push_if_ready(id);
                self.active = true;
                return true;
            }
        }

        // 2. Receive rule: drain every receivable message before considering idle.
        let mut received_any = false;
        while mailbox.can_recv() {
            let Some(msg) = mailbox.recv() else { break };
            received_any = true;
            let dev_id = msg.dev_id as usize;
            let was_ready = self.states[dev_id].ready_to_send != Pin::No;
            {
                let edge = &self.in_edges[msg.edge_id as usize].label;
                D::recv(&mut self.states[dev_id], edge, &msg.payload);
            }
            let now_ready = self.states[dev_id].ready_to_send != Pin::No;
            if now_ready && !was_ready {
                self.push_if_ready(dev_id);
            }
            #[cfg(feature = "stats")]
            {
                self.msgs_received += 1;
            }
        }
        if received_any {
            self.active = true;
            return true;
        }

        // 4. Blocked-send starvation avoidance: never busy-poll while a send is pending.
        if !self.senders.is_empty() {
            #[cfg(feature = "stats")]
            {
                self.blocked_sends += 1;
            }
            mailbox.wait(WaitFor::CAN_SEND | WaitFor::CAN_RECV);
            return true;
        }

        // 3. Idle rule.
        match mailbox.idle_vote(self.active) {
            IdleLevel::Spurious => true,
            IdleLevel::Quiescent => {
                self.active = false;
                for id in 0..self.states.len() {
                    if D::step(&mut self.states[id]) {
                        self.active = true;
                    }
                    self.push_if_ready(id);
                }
                self.time = self.time.wrapping_add(1);
                true
            }
            IdleLevel::Terminated => {
                for state in &self.states {
                    if let Some(payload) = D::finish(state) {
                        mailbox.send_to_host(payload);
                    }
                }
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    struct Counter;
    impl Device<1> for Counter {
        type State = u32;
        type Edge = ();
        type Message = u32;

        fn init(state: &mut PState<u32>) {
            state.ready_to_send = Pin::HostPin;
        }
        fn send(state: &mut PState<u32>) -> u32 {
            state.app += 1;
            state.ready_to_send = if state.app < 3 { Pin::HostPin } else { Pin::No };
            state.app
        }
        fn recv(_state: &mut PState<u32>, _edge: &(), _message: &u32) {}
        fn step(_state: &mut PState<u32>) -> bool {
            false
        }
        fn finish(_state: &PState<u32>) -> Option<u32> {
            None
        }
    }

    struct RecordingMailbox {
        can_send: bool,
        sent_to_host: Vec<u32>,
        idle_calls: usize,
    }

    #[sealed::sealed]
    impl Mailbox<u32> for RecordingMailbox {
        fn can_send(&self) -> bool {
            self.can_send
        }
        fn can_recv(&self) -> bool {
            false
        }
        fn send(&mut self, _key: RouterKey, _message: u32) {
            unreachable!("this device never sends on a routed pin")
        }
        fn send_to_host(&mut self, message: u32) {
            self.sent_to_host.push(message);
        }
        fn recv(&mut self) -> Option<RawMessage<u32>> {
            None
        }
        fn wait(&mut self, _wait_for: WaitFor) {}
        fn idle_vote(&mut self, _active: bool) -> IdleLevel {
            self.idle_calls += 1;
            IdleLevel::Terminated
        }
    }

    #[test]
    fn sender_stack_never_holds_a_duplicate() {
        let state = PState::new(0u32, 1);
        let mut rt: ThreadRuntime<Counter, 1> = ThreadRuntime::new(vec![state], Vec::new());
        let mut mailbox = RecordingMailbox {
            can_send: true,
            sent_to_host: Vec::new(),
            idle_calls: 0,
        };
        for _ in 0..3 {
            rt.step(&mut mailbox);
            assert!(rt.senders.len() <= 1);
        }
        assert_eq!(mailbox.sent_to_host, vec![1, 2, 3]);
    }

    #[cfg(feature = "stats")]
    #[test]
    fn stats_count_sends_receives_and_blocked_sends() {
        let state = PState::new(0u32, 1);
        let mut rt: ThreadRuntime<Counter, 1> = ThreadRuntime::new(vec![state], Vec::new());
        let mut mailbox = RecordingMailbox {
            can_send: false,
            sent_to_host: Vec::new(),
            idle_calls: 0,
        };
        // The device is ready to send but the mailbox refuses: rule 4 counts a blocked send.
        rt.step(&mut mailbox);
        assert_eq!(rt.blocked_sends(), 1);
        assert_eq!(rt.msgs_sent(), 0);

        mailbox.can_send = true;
        for _ in 0..3 {
            rt.step(&mut mailbox);
        }
        assert_eq!(rt.msgs_sent(), 3);
        assert_eq!(rt.msgs_received(), 0);
    }

    #[test]
    fn termination_runs_finish_and_stops_the_loop() {
        let state = PState::new(10u32, 1);
        let mut rt: ThreadRuntime<Counter, 1> = ThreadRuntime::new(vec![state], Vec::new());
        rt.states[0].ready_to_send = Pin::No;
        let mut mailbox = RecordingMailbox {
            can_send: false,
            sent_to_host: Vec::new(),
            idle_calls: 0,
        };
        let keep_going = rt.step(&mut mailbox);
        assert!(!keep_going);
        assert_eq!(mailbox.idle_calls, 1);
    }
}
