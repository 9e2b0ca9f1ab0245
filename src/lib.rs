//! `polite`: a vertex-centric compute runtime for a massively parallel, message-passing machine
//! organised as a two-dimensional mesh of FPGA boards, each holding a mesh of mailboxes, each
//! mailbox hosting a fixed number of hardware threads. User programs are directed graphs of
//! *devices* exchanging typed messages along *pins*.
//!
//! The crate compiles a graph (partition across boards/mailboxes/threads, build routing, lay out
//! per-thread memory) and defines the per-thread event-loop contract that drives device handlers
//! once booted. It is split into the same components the design carries them in:
//!
//! - [`addr`]: thread ids, device addresses, routing keys, and the machine's bit-field shape.
//! - [`graph`]: the device/edge store built up before [`compiler::Compiler::map`] runs.
//! - [`placer`]: partitions a weighted graph across a rectangular mesh.
//! - [`routing`]: builds receiver in-edge tables, sender routing keys, and the router mesh.
//! - [`layout`]: computes per-thread SRAM/DRAM partition layouts.
//! - [`runtime`] / [`sim`]: the per-thread event loop contract and a software-simulated fabric
//!   that drives it without hardware.
//! - [`hostlink`]: the `HostLink` trait boundary and its byte-stream decoder.
//! - [`compiler`]: wires the above into the host-facing `new_device`/`add_edge`/`map`/`write` API.
//! - [`config`]: environment-derived runtime configuration, read once at construction.
//! - [`error`]: the crate's error taxonomy.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

// This mod MUST go first, so that the others see its macros.
mod fmt;

pub mod addr;
pub mod compiler;
pub mod config;
pub mod device;
pub mod error;
pub mod graph;
pub mod hostlink;
pub mod layout;
pub mod placer;
pub mod routing;
pub mod runtime;
pub mod sim;

pub use compiler::{Compiler, Mapping};
pub use config::RuntimeConfig;
pub use device::{Device, DeviceImage, Message, PState, Pin};
pub use error::Error;
pub use graph::{DeviceId, Graph};
