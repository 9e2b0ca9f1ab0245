//! The crate's error taxonomy.
//!
//! Every kind here is fatal at the point it is produced: a caller bug (bad pin index, graph too
//! big for the mesh) or a hardware-level contract violation reported back over the host link.
//! There is no recovery policy beyond "the caller decides whether to abort".

use alloc::string::String;

use crate::addr::ThreadId;

/// Which of a thread's two memory regions overflowed.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum PartitionKind {
    /// The fast, small, on-chip partition.
    Sram,
    /// The larger, slower, off-chip partition.
    Dram,
}

impl core::fmt::Display for PartitionKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Sram => f.write_str("SRAM"),
            Self::Dram => f.write_str("DRAM"),
        }
    }
}

/// An error produced while compiling or running a graph.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Error {
    /// A pin index at or beyond the device's compile-time pin bound was used.
    PinOutOfRange {
        /// The pin index the caller supplied.
        pin: usize,
        /// The number of pins the device type allows (`P_MAX`).
        max_pins: usize,
    },

    /// Laying out a thread's devices, in-edge table and sender stack would exceed that thread's
    /// SRAM or DRAM partition budget.
    PartitionOverflow {
        /// The thread whose partition overflowed.
        thread: ThreadId,
        /// Which partition (SRAM or DRAM) overflowed.
        partition: PartitionKind,
        /// Bytes the layout actually needs.
        requested: u32,
        /// Bytes available in that partition.
        budget: u32,
    },

    /// More distinct destination mailboxes exist from one board than the programmable router can
    /// encode.
    KeySpaceExhausted {
        /// The board whose router ran out of routing keys.
        board: crate::addr::BoardCoord,
    },

    /// A fabric-side assertion was received on the host protocol stream.
    TransportAssertion {
        /// The thread that raised the assertion.
        thread: ThreadId,
        /// Source file, if the fabric sent a rich assertion.
        file: Option<String>,
        /// Source line, if the fabric sent a rich assertion.
        line: Option<u32>,
    },

    /// A byte was received on the host protocol stream that does not match any known tag.
    UnknownProtocolTag {
        /// The thread the malformed byte came from.
        thread: ThreadId,
        /// The tag byte itself.
        tag: u8,
    },

    /// The application terminated in an orderly fashion; this is not a failure, but it still
    /// propagates to the host process's exit code.
    FabricExit(i32),
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::PinOutOfRange { pin, max_pins } => {
                write!(f, "pin {pin} is out of range (device allows {max_pins})")
            }
            Error::PartitionOverflow {
                thread,
                partition,
                requested,
                budget,
            } => write!(
                f,
                "thread {thread}: {partition} partition overflow ({requested} bytes requested, {budget} available)",
            ),
            Error::KeySpaceExhausted { board } => {
                write!(f, "board {board}: router key space exhausted")
            }
            Error::TransportAssertion { thread, file, line } => match (file, line) {
                (Some(file), Some(line)) => {
                    write!(f, "thread {thread}: assertion failed at {file}:{line}")
                }
                _ => write!(f, "thread {thread}: assertion failed"),
            },
            Error::UnknownProtocolTag { thread, tag } => write!(
                f,
                "thread {thread}: unknown host protocol tag {tag:#04x}"
            ),
            Error::FabricExit(code) => write!(f, "fabric exited with code {code}"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_offending_thread() {
        let e = Error::UnknownProtocolTag {
            thread: ThreadId(7),
            tag: 0x99,
        };
        let msg = alloc::format!("{e}");
        assert!(msg.contains('7'));
        assert!(msg.contains("99"));
    }
}
