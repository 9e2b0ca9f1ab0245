//! Partition layout (C5, heap sizing half): computes per-thread SRAM/DRAM region sizes and
//! offsets for the thread control block, device-state array, in-edge table, and sender stack.

use crate::addr::{MachineConfig, ThreadId};
use crate::error::{Error, PartitionKind};

fn align4(size: u32) -> u32 {
    (size + 3) & !3
}

/// Where a thread's device-state array and in-edge table live.
///
/// Defaults place vertices in SRAM, in-edges in DRAM.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct LayoutPolicy {
    pub vertices_in_dram: bool,
    pub in_edges_in_dram: bool,
}

impl Default for LayoutPolicy {
    fn default() -> Self {
        Self {
            vertices_in_dram: false,
            in_edges_in_dram: true,
        }
    }
}

/// A contiguous byte range within one of a thread's two partitions.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Region {
    pub partition: PartitionKind,
    pub offset: u32,
    pub size: u32,
}

/// The computed layout for one thread's private memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadLayout {
    /// Always in SRAM: `num_devices`, `num_vertices`, `time`, and the three base pointers.
    pub control_block: Region,
    pub device_state: Region,
    pub sender_stack: Region,
    pub in_edge_table: Region,
}

/// Fixed size of the thread control block: two `u32` counters, a `u16` time counter (padded),
/// and three `u32` base pointers.
const CONTROL_BLOCK_SIZE: u32 = 4 + 4 + 4 + 4 + 4 + 4;

/// Bytes one sender-stack slot occupies (a thread-local device id, stored word-aligned).
const SENDER_STACK_SLOT_SIZE: u32 = 4;

/// Compute the layout for one thread, given the byte size of its device state type, its
/// in-edge-table entry type, and how many devices/in-edges it has.
///
/// Fails with [`Error::PartitionOverflow`] if either partition's budget (from `cfg`) is
/// exceeded.
pub fn layout_thread(
    cfg: &MachineConfig,
    policy: &LayoutPolicy,
    thread: ThreadId,
    num_devices: usize,
    device_state_size: usize,
    num_in_edges: usize,
    in_edge_entry_size: usize,
) -> Result<ThreadLayout, Error> {
    let device_state_bytes = align4((num_devices * device_state_size) as u32);
    let sender_stack_bytes = align4((num_devices as u32) * SENDER_STACK_SLOT_SIZE);
    let in_edge_bytes = align4((num_in_edges * in_edge_entry_size) as u32);

    let mut sram_used = CONTROL_BLOCK_SIZE;
    let mut dram_used = 0u32;

    let control_block = Region {
        partition: PartitionKind::Sram,
        offset: 0,
        size: CONTROL_BLOCK_SIZE,
    };

    let (device_state, sender_stack) = if policy.vertices_in_dram {
        let device_state = Region {
            partition: PartitionKind::Dram,
            offset: dram_used,
            size: device_state_bytes,
        };
        dram_used += device_state_bytes;
        let sender_stack = Region {
            partition: PartitionKind::Dram,
            offset: dram_used,
            size: sender_stack_bytes,
        };
        dram_used += sender_stack_bytes;
        (device_state, sender_stack)
    } else {
        let device_state = Region {
            partition: PartitionKind::Sram,
            offset: sram_used,
            size: device_state_bytes,
        };
        sram_used += device_state_bytes;
        let sender_stack = Region {
            partition: PartitionKind::Sram,
            offset: sram_used,
            size: sender_stack_bytes,
        };
        sram_used += sender_stack_bytes;
        (device_state, sender_stack)
    };

    let in_edge_table = if policy.in_edges_in_dram {
        let region = Region {
            partition: PartitionKind::Dram,
            offset: dram_used,
            size: in_edge_bytes,
        };
        dram_used += in_edge_bytes;
        region
    } else {
        let region = Region {
            partition: PartitionKind::Sram,
            offset: sram_used,
            size: in_edge_bytes,
        };
        sram_used += in_edge_bytes;
        region
    };

    let sram_budget = cfg.max_sram_bytes();
    let dram_budget = cfg.max_dram_bytes();

    if sram_used > sram_budget {
        return Err(Error::PartitionOverflow {
            thread,
            partition: PartitionKind::Sram,
            requested: sram_used,
            budget: sram_budget,
        });
    }
    if dram_used > dram_budget {
        return Err(Error::PartitionOverflow {
            thread,
            partition: PartitionKind::Dram,
            requested: dram_used,
            budget: dram_budget,
        });
    }

    Ok(ThreadLayout {
        control_block,
        device_state,
        sender_stack,
        in_edge_table,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_places_vertices_in_sram_and_edges_in_dram() {
        let cfg = MachineConfig::default();
        let layout = layout_thread(&cfg, &LayoutPolicy::default(), ThreadId(0), 4, 16, 8, 8).unwrap();
        assert_eq!(layout.device_state.partition, PartitionKind::Sram);
        assert_eq!(layout.sender_stack.partition, PartitionKind::Sram);
        assert_eq!(layout.in_edge_table.partition, PartitionKind::Dram);
    }

    #[test]
    fn oversized_vertex_array_overflows_sram() {
        let cfg = MachineConfig::default();
        let huge_devices = (cfg.max_sram_bytes() as usize) + 1;
        let err = layout_thread(&cfg, &LayoutPolicy::default(), ThreadId(3), huge_devices, 1, 0, 0).unwrap_err();
        assert_eq!(
            err,
            Error::PartitionOverflow {
                thread: ThreadId(3),
                partition: PartitionKind::Sram,
                requested: err_requested(&err),
                budget: cfg.max_sram_bytes(),
            }
        );
    }

    fn err_requested(err: &Error) -> u32 {
        match err {
            Error::PartitionOverflow { requested, .. } => *requested,
            _ => panic!("expected PartitionOverflow"),
        }
    }

    #[test]
    fn sender_stack_follows_device_state_contiguously() {
        let cfg = MachineConfig::default();
        let layout = layout_thread(&cfg, &LayoutPolicy::default(), ThreadId(0), 10, 4, 0, 0).unwrap();
        assert_eq!(layout.sender_stack.offset, layout.device_state.offset + layout.device_state.size);
    }
}
