//! The `Device` trait (C5): the per-vertex handler contract the event loop (`runtime`/`sim`)
//! drives.
//!
//! Monomorphised per graph: there is no `dyn Device` or boxed closure anywhere on the
//! send/receive path, matching the inner loop's zero-dynamic-dispatch requirement.

use crate::routing::RouterKey;

/// What a device wants to do the next time it is given a send slot.
///
/// Mirrors the fabric's raw pin-number encoding (`0` = not ready, `1` = send to the host,
/// `n >= 2` = send on pin `n - 2`) as a proper enum rather than a bare integer.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Pin {
    /// Not ready to send.
    #[default]
    No,
    /// Ready to send to the host, over `HostLink`.
    HostPin,
    /// Ready to send on the given pin index.
    Pin(usize),
}

impl Pin {
    /// The raw wire encoding, for anything that needs to log or compare it numerically.
    pub fn raw(self) -> u32 {
        match self {
            Pin::No => 0,
            Pin::HostPin => 1,
            Pin::Pin(n) => n as u32 + 2,
        }
    }
}

/// A device's runtime state, as the event loop sees it: the user's own state plus the two fields
/// every device needs regardless of what it computes (`ready_to_send`, and an internal
/// sender-stack membership flag co-located here so checking and updating it never requires a
/// separate scan, per the sender-stack linearity invariant P5).
#[derive(Debug, Clone)]
pub struct PState<S> {
    /// The user-defined application state.
    pub app: S,
    /// What this device wants to send next, if anything.
    pub ready_to_send: Pin,
    /// `true` while this device's local id is present on its thread's sender stack.
    pub(crate) in_stack: bool,
    /// Router keys this device writes to when sending on pin `p`, populated once by `map`.
    pub(crate) router_keys: alloc::vec::Vec<Option<RouterKey>>,
}

impl<S> PState<S> {
    /// Wrap user state `app`, with no router keys assigned yet and pins not ready.
    pub fn new(app: S, pins: usize) -> Self {
        Self {
            app,
            ready_to_send: Pin::No,
            in_stack: false,
            router_keys: alloc::vec![None; pins],
        }
    }
}

/// One fixed-size message payload, as carried on the wire.
///
/// Implemented by user message types; `Copy` because messages are always passed by value through
/// the event loop (there is never a reason to hold a borrow across a send/receive boundary).
pub trait Message: Copy {}

impl<T: Copy> Message for T {}

/// The byte-exact wire image of a device's application state, or of an edge label carried in a
/// thread's in-edge table.
///
/// A user's `State`/`Edge` type implements this so [`crate::compiler::Compiler::write`] can
/// serialise it into the fabric's per-thread memory image.
pub trait DeviceImage: Sized {
    /// Size, in bytes, of this type's wire image. [`crate::compiler::Compiler::map`] budgets
    /// exactly this many bytes per device-state (or in-edge) entry when computing partition
    /// layouts.
    const IMAGE_SIZE: usize;

    /// Write this value's wire image into `out`, which is exactly `Self::IMAGE_SIZE` bytes long.
    fn write_image(&self, out: &mut [u8]);
}

macro_rules! impl_device_image_for_le_bytes {
    ($($t:ty),* $(,)?) => {
        $(
            impl DeviceImage for $t {
                const IMAGE_SIZE: usize = core::mem::size_of::<$t>();

                fn write_image(&self, out: &mut [u8]) {
                    out.copy_from_slice(&self.to_le_bytes());
                }
            }
        )*
    };
}

impl_device_image_for_le_bytes!(u8, u16, u32, u64, i8, i16, i32, i64, f32, f64);

impl DeviceImage for () {
    const IMAGE_SIZE: usize = 0;

    fn write_image(&self, _out: &mut [u8]) {}
}

/// The per-vertex handler contract.
///
/// `PINS` is the device type's compile-time pin bound (the Rust analogue of the
/// `POLITE_NUM_PINS` macro); the compiler and runtime are generic over `D: Device<PINS>`,
/// monomorphised once per graph.
pub trait Device<const PINS: usize> {
    /// User-defined per-device application state.
    type State;
    /// User-defined edge label carried by incoming messages.
    type Edge;
    /// User-defined fixed-size message payload.
    type Message: Message;

    /// Runs once, before the event loop starts. May set `state.ready_to_send`.
    fn init(state: &mut PState<Self::State>);

    /// Runs when this device is popped off the sender stack and the mailbox can accept a send.
    /// Returns the outgoing payload. May leave `state.ready_to_send` non-`No` to be pushed back.
    fn send(state: &mut PState<Self::State>) -> Self::Message;

    /// Runs once per delivered message addressed to this device. May set
    /// `state.ready_to_send`.
    fn recv(state: &mut PState<Self::State>, edge: &Self::Edge, message: &Self::Message);

    /// Runs once per global idle barrier that reaches quiescence. Returns whether this device is
    /// still "active" (keeps the graph from reaching termination); may set
    /// `state.ready_to_send`.
    fn step(state: &mut PState<Self::State>) -> bool;

    /// Runs once, after the event loop exits. Returning `Some` sends that payload to the host.
    fn finish(state: &PState<Self::State>) -> Option<Self::Message>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pin_raw_encoding_matches_original() {
        assert_eq!(Pin::No.raw(), 0);
        assert_eq!(Pin::HostPin.raw(), 1);
        assert_eq!(Pin::Pin(0).raw(), 2);
        assert_eq!(Pin::Pin(3).raw(), 5);
    }
}
