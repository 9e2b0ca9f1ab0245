//! Address algebra: thread ids, device addresses, routing keys, and the bit-field machine
//! parameters (`MachineConfig`) that size them.
//!
//! Every packing function here mirrors a C bit-shift macro from the hardware's address model.
//! Field overflow is a caller bug, not a runtime condition: we `debug_assert!` it away in debug
//! builds and mask it away (rather than panicking) in release builds, exactly like the macros
//! this is grounded on.

use core::fmt;

/// A thread's position in the two-dimensional board mesh.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BoardCoord {
    pub x: u32,
    pub y: u32,
}

impl fmt::Display for BoardCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// A mailbox's position in the *global* mailbox mesh, i.e. already folded through its board's
/// position (contiguous across the whole machine, not just within one board).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MailboxCoord {
    pub x: u32,
    pub y: u32,
}

impl fmt::Display for MailboxCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// The global id of a hardware thread: a hierarchical concatenation of board and mailbox
/// coordinates plus a core-and-thread index, packed MSB-to-LSB as
/// `board_y ‖ board_x ‖ mailbox_y ‖ mailbox_x ‖ core_and_thread`.
///
/// Field widths are not fixed by this type; they live in [`MachineConfig`] and are supplied to
/// every packing/unpacking method here.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ThreadId(pub u32);

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Bit-field widths and heap-partition sizes for one physical machine.
///
/// Distinct from [`crate::config::RuntimeConfig`]: this describes the fixed *shape* of the
/// hardware (how many bits identify a board, a mailbox, a core-and-thread slot) and is supplied
/// by the caller as a constant describing their deployment, not read from the environment.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MachineConfig {
    /// Bits of board x-coordinate.
    pub mesh_x_bits: u32,
    /// Bits of board y-coordinate.
    pub mesh_y_bits: u32,
    /// Bits of in-board mailbox x-coordinate.
    pub mailbox_mesh_x_bits: u32,
    /// Bits of in-board mailbox y-coordinate.
    pub mailbox_mesh_y_bits: u32,
    /// log2 of the number of cores per mailbox.
    pub log_cores_per_mailbox: u32,
    /// log2 of the number of hardware threads per core.
    pub log_threads_per_core: u32,
    /// log2 of the SRAM partition size, in bytes, before the stack reserve is subtracted.
    pub log_bytes_per_sram_partition: u32,
    /// log2 of the DRAM partition size, in bytes, before the stack reserve is subtracted.
    pub log_bytes_per_dram_partition: u32,
    /// Bytes reserved at the top of the SRAM partition for the thread's own call stack.
    pub stack_reserve_sram: u32,
    /// Bytes reserved at the top of the DRAM partition for the thread's own call stack.
    pub stack_reserve_dram: u32,
}

impl Default for MachineConfig {
    /// A modest 2x2 board, 2x2 mailbox-per-board, 4 cores/mailbox, 2 threads/core shape, with
    /// partition sizes generous enough for the test suite's graphs.
    fn default() -> Self {
        Self {
            mesh_x_bits: 1,
            mesh_y_bits: 1,
            mailbox_mesh_x_bits: 1,
            mailbox_mesh_y_bits: 1,
            log_cores_per_mailbox: 2,
            log_threads_per_core: 1,
            log_bytes_per_sram_partition: 16,
            log_bytes_per_dram_partition: 20,
            stack_reserve_sram: 2048,
            stack_reserve_dram: 65536,
        }
    }
}

impl MachineConfig {
    /// Bits of the core-and-thread field.
    pub const fn core_thread_bits(&self) -> u32 {
        self.log_cores_per_mailbox + self.log_threads_per_core
    }

    /// Total width, in bits, of a fully-packed [`ThreadId`].
    pub const fn thread_id_bits(&self) -> u32 {
        self.mesh_y_bits
            + self.mesh_x_bits
            + self.mailbox_mesh_y_bits
            + self.mailbox_mesh_x_bits
            + self.core_thread_bits()
    }

    /// The thread's board, decoded from the high-order bits of `t`.
    pub fn board_coord(&self, t: ThreadId) -> BoardCoord {
        let shift = self.mailbox_mesh_y_bits + self.mailbox_mesh_x_bits + self.core_thread_bits();
        let board_x = (t.0 >> shift) & mask(self.mesh_x_bits);
        let board_y = (t.0 >> (shift + self.mesh_x_bits)) & mask(self.mesh_y_bits);
        BoardCoord { x: board_x, y: board_y }
    }

    /// The thread's mailbox coordinate *within its board*.
    pub fn mailbox_in_board_coord(&self, t: ThreadId) -> MailboxCoord {
        let shift = self.core_thread_bits();
        let mx = (t.0 >> shift) & mask(self.mailbox_mesh_x_bits);
        let my = (t.0 >> (shift + self.mailbox_mesh_x_bits)) & mask(self.mailbox_mesh_y_bits);
        MailboxCoord { x: mx, y: my }
    }

    /// The thread's mailbox coordinate in the *global*, contiguous mailbox mesh: the board's
    /// offset folded into the in-board mailbox coordinate.
    pub fn mailbox_coord(&self, t: ThreadId) -> MailboxCoord {
        let board = self.board_coord(t);
        let local = self.mailbox_in_board_coord(t);
        let mailboxes_per_board_x = 1u32 << self.mailbox_mesh_x_bits;
        let mailboxes_per_board_y = 1u32 << self.mailbox_mesh_y_bits;
        MailboxCoord {
            x: board.x * mailboxes_per_board_x + local.x,
            y: board.y * mailboxes_per_board_y + local.y,
        }
    }

    /// The thread's core-and-thread index, decoded from the low-order bits of `t`.
    pub fn core_and_thread(&self, t: ThreadId) -> u32 {
        t.0 & mask(self.core_thread_bits())
    }

    /// Pack a board coordinate, an in-board mailbox coordinate, and a core-and-thread index into
    /// a global [`ThreadId`].
    ///
    /// In debug builds, overflowing any field is an assertion failure (a programmer error);
    /// in release builds the offending field is silently masked, matching the C original's
    /// unchecked shifts.
    pub fn thread_id(&self, board: BoardCoord, mailbox_in_board: MailboxCoord, core_and_thread: u32) -> ThreadId {
        debug_assert!(board.x < 1 << self.mesh_x_bits, "board x out of range");
        debug_assert!(board.y < 1 << self.mesh_y_bits, "board y out of range");
        debug_assert!(
            mailbox_in_board.x < 1 << self.mailbox_mesh_x_bits,
            "mailbox x out of range"
        );
        debug_assert!(
            mailbox_in_board.y < 1 << self.mailbox_mesh_y_bits,
            "mailbox y out of range"
        );
        debug_assert!(
            core_and_thread < 1 << self.core_thread_bits(),
            "core/thread index out of range"
        );

        let mut id = board.y & mask(self.mesh_y_bits);
        id = (id << self.mesh_x_bits) | (board.x & mask(self.mesh_x_bits));
        id = (id << self.mailbox_mesh_y_bits) | (mailbox_in_board.y & mask(self.mailbox_mesh_y_bits));
        id = (id << self.mailbox_mesh_x_bits) | (mailbox_in_board.x & mask(self.mailbox_mesh_x_bits));
        id = (id << self.core_thread_bits()) | (core_and_thread & mask(self.core_thread_bits()));
        ThreadId(id)
    }

    /// Reconstruct the thread id that owns the core-and-thread slot `core_and_thread` inside the
    /// mailbox at the *global* coordinate `mailbox` (the inverse of folding a board's offset into
    /// [`MachineConfig::mailbox_coord`]).
    pub fn thread_id_from_mailbox(&self, mailbox: MailboxCoord, core_and_thread: u32) -> ThreadId {
        let mailboxes_per_board_x = 1u32 << self.mailbox_mesh_x_bits;
        let mailboxes_per_board_y = 1u32 << self.mailbox_mesh_y_bits;
        let board = BoardCoord {
            x: mailbox.x / mailboxes_per_board_x,
            y: mailbox.y / mailboxes_per_board_y,
        };
        let local = MailboxCoord {
            x: mailbox.x % mailboxes_per_board_x,
            y: mailbox.y % mailboxes_per_board_y,
        };
        self.thread_id(board, local, core_and_thread)
    }

    /// Maximum bytes available for a thread's SRAM partition, after the stack reserve.
    pub const fn max_sram_bytes(&self) -> u32 {
        (1u32 << self.log_bytes_per_sram_partition) - self.stack_reserve_sram
    }

    /// Maximum bytes available for a thread's DRAM partition, after the stack reserve.
    pub const fn max_dram_bytes(&self) -> u32 {
        (1u32 << self.log_bytes_per_dram_partition) - self.stack_reserve_dram
    }
}

const fn mask(bits: u32) -> u32 {
    if bits >= 32 {
        u32::MAX
    } else {
        (1u32 << bits) - 1
    }
}

const LOCAL_ID_BITS: u32 = 13;
const THREAD_ID_BITS: u32 = 18;
const INVALID_BIT: u32 = THREAD_ID_BITS;

/// Upper bound on the number of devices one thread may host: `local_id` is packed into
/// [`LOCAL_ID_BITS`] bits of a [`DeviceAddress`]. Exceeding this is [`crate::error::Error::PartitionOverflow`],
/// checked by [`crate::compiler::Compiler::map`] before any address is packed.
pub const MAX_LOCAL_DEVICES_PER_THREAD: u32 = 1 << LOCAL_ID_BITS;

/// A packed, thread-relative device address: low 18 bits are the global thread id, bit 18 is
/// the invalid flag, and the upper 13 bits are the thread-local device id.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceAddress(u32);

impl DeviceAddress {
    /// Pack a thread id and thread-local device id into a valid address.
    pub fn pack(thread: ThreadId, local_id: u16) -> Self {
        debug_assert!(thread.0 < (1 << THREAD_ID_BITS), "thread id out of range");
        debug_assert!((local_id as u32) < (1 << LOCAL_ID_BITS), "local device id out of range");
        let thread_bits = thread.0 & mask(THREAD_ID_BITS);
        let local_bits = (local_id as u32 & mask(LOCAL_ID_BITS)) << (INVALID_BIT + 1);
        Self(thread_bits | local_bits)
    }

    /// The constant invalid address: bit 18 set, all else zero.
    pub const fn invalid() -> Self {
        Self(1 << INVALID_BIT)
    }

    /// `false` iff this is [`DeviceAddress::invalid`].
    pub fn is_valid(&self) -> bool {
        self.0 & (1 << INVALID_BIT) == 0
    }

    /// The global thread id this address targets.
    pub fn thread_id(&self) -> ThreadId {
        ThreadId(self.0 & mask(THREAD_ID_BITS))
    }

    /// The thread-local device id this address targets.
    pub fn local_device_id(&self) -> u16 {
        ((self.0 >> (INVALID_BIT + 1)) & mask(LOCAL_ID_BITS)) as u16
    }
}

/// A 32-bit value a sender embeds in an outgoing message, interpreted by the per-board
/// programmable router: the low 16 bits are the receiver's thread-local device id, the high 16
/// bits are the index into that receiver's in-edge table.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RoutingKey(u32);

impl RoutingKey {
    /// Pack a receiver-local device id and edge index into a routing key.
    pub fn pack(local_id: u16, edge_index: u16) -> Self {
        Self((local_id as u32) | ((edge_index as u32) << 16))
    }

    /// The raw 32-bit value, as transmitted on the wire.
    pub fn raw(&self) -> u32 {
        self.0
    }

    /// The receiver-local device id.
    pub fn local_id(&self) -> u16 {
        (self.0 & 0xFFFF) as u16
    }

    /// The index into the receiver's in-edge table.
    pub fn edge_index(&self) -> u16 {
        (self.0 >> 16) as u16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_address_round_trips() {
        let t = ThreadId(0x2_5A3);
        let addr = DeviceAddress::pack(t, 4021);
        assert!(addr.is_valid());
        assert_eq!(addr.thread_id(), t);
        assert_eq!(addr.local_device_id(), 4021);
    }

    #[test]
    fn invalid_address_is_invalid() {
        assert!(!DeviceAddress::invalid().is_valid());
    }

    #[test]
    fn routing_key_round_trips() {
        let k = RoutingKey::pack(1234, 56);
        assert_eq!(k.local_id(), 1234);
        assert_eq!(k.edge_index(), 56);
    }

    #[test]
    fn thread_id_hierarchy_round_trips() {
        let cfg = MachineConfig {
            mesh_x_bits: 2,
            mesh_y_bits: 2,
            mailbox_mesh_x_bits: 2,
            mailbox_mesh_y_bits: 1,
            log_cores_per_mailbox: 2,
            log_threads_per_core: 1,
            ..MachineConfig::default()
        };
        let board = BoardCoord { x: 3, y: 1 };
        let mailbox = MailboxCoord { x: 2, y: 0 };
        let t = cfg.thread_id(board, mailbox, 5);
        assert_eq!(cfg.board_coord(t), board);
        assert_eq!(cfg.mailbox_in_board_coord(t), mailbox);
        assert_eq!(cfg.core_and_thread(t), 5);
    }

    #[test]
    fn global_mailbox_coord_folds_board_offset() {
        let cfg = MachineConfig {
            mesh_x_bits: 1,
            mesh_y_bits: 1,
            mailbox_mesh_x_bits: 2,
            mailbox_mesh_y_bits: 2,
            ..MachineConfig::default()
        };
        let board = BoardCoord { x: 1, y: 0 };
        let mailbox = MailboxCoord { x: 1, y: 2 };
        let t = cfg.thread_id(board, mailbox, 0);
        let global = cfg.mailbox_coord(t);
        assert_eq!(global, MailboxCoord { x: 4 + 1, y: 0 + 2 });
    }
}
