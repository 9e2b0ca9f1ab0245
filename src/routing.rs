//! The router builder (C4): turns a completed placement into receiver in-edge tables,
//! sender-side routing keys, and the per-board programmable-router contents.

use alloc::collections::BTreeMap;
use alloc::vec;
use alloc::vec::Vec;

use crate::addr::{BoardCoord, DeviceAddress, MachineConfig, MailboxCoord, RoutingKey, ThreadId};
use crate::error::Error;
use crate::graph::{DeviceId, Graph};

/// An entry in a thread's receiver in-edge table: the label carried by one incoming edge,
/// indexed by the `edge_id` field of the message that delivers it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PInEdge<E> {
    pub label: E,
}

/// A key identifying one row of a board's programmable-router table: the single value a device
/// writes into its `pin[]` array to have the router replicate a message to every destination in
/// that row.
///
/// Distinct from [`RoutingKey`], which is the per-destination header embedded in each replicated
/// copy so the *receiver* can find its in-edge entry; `RouterKey` only ever means something to
/// the router doing the replication.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RouterKey {
    pub board: BoardCoord,
    pub index: u32,
}

/// One row of a board's router table: every destination a single router key fans out to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterEntry {
    pub dests: Vec<(MailboxCoord, u32, RoutingKey)>,
}

/// Maximum distinct router-table rows per board; exceeding this is [`Error::KeySpaceExhausted`].
const MAX_ENTRIES_PER_BOARD: usize = 1 << 16;

/// The aggregate of every board's programmable-router table.
///
/// Backs the cyclic `SystemNode -> FPGANode -> MailboxNode` topology model from the routing
/// design this is grounded on via arena allocation instead of owned/borrowed node pointers: each
/// board's table lives in one `Vec` and is addressed by a plain index, so there is nothing here
/// that needs a borrowed lifetime threaded through it.
#[derive(Debug, Default)]
pub struct ProgRouterMesh {
    boards: Vec<Vec<RouterEntry>>,
    board_index: BTreeMap<(u32, u32), usize>,
}

impl ProgRouterMesh {
    pub fn new() -> Self {
        Self::default()
    }

    fn board_slot(&mut self, board: BoardCoord) -> usize {
        *self.board_index.entry((board.x, board.y)).or_insert_with(|| {
            self.boards.push(Vec::new());
            self.boards.len() - 1
        })
    }

    /// Compact `dests` into one row of `board`'s router table, returning the key the source
    /// device should write to its pin to trigger that row's replication.
    ///
    /// Identical destination sets (as produced by two different devices or pins on the same
    /// board) are deduplicated onto the same row.
    pub fn add_dests_from_board(
        &mut self,
        board: BoardCoord,
        dests: Vec<(MailboxCoord, u32, RoutingKey)>,
    ) -> Result<RouterKey, Error> {
        let slot = self.board_slot(board);
        let table = &mut self.boards[slot];
        if let Some(index) = table.iter().position(|e| e.dests == dests) {
            return Ok(RouterKey {
                board,
                index: index as u32,
            });
        }
        if table.len() >= MAX_ENTRIES_PER_BOARD {
            return Err(Error::KeySpaceExhausted { board });
        }
        table.push(RouterEntry { dests });
        Ok(RouterKey {
            board,
            index: (table.len() - 1) as u32,
        })
    }

    /// The destinations a given router key fans out to.
    ///
    /// A key naming a board or row this mesh never allocated is an implementation bug, not a
    /// caller-facing error: `ProgRouterMesh` only ever hands out keys it can resolve.
    pub fn resolve(&self, key: RouterKey) -> &[(MailboxCoord, u32, RoutingKey)] {
        let slot = *self
            .board_index
            .get(&(key.board.x, key.board.y))
            .expect("RouterKey referenced a board this mesh never allocated");
        &self.boards[slot][key.index as usize].dests
    }
}

/// The output of [`build`]: per-thread receiver in-edge tables and per-(device, pin) router keys.
pub struct RoutingTables<E> {
    /// `in_edges[thread_index]` is that thread's in-edge table, ordered by `edge_id`.
    pub in_edges: Vec<Vec<PInEdge<E>>>,
    /// `key_table[device][pin]` is the router key that device writes when sending on that pin, or
    /// `None` if the pin has no outgoing edges.
    pub key_table: Vec<Vec<Option<RouterKey>>>,
}

/// Build the receiver in-edge tables, sender-side router keys, and router mesh contents for a
/// completed placement.
///
/// `to_device_addr[d.index()]` must give the packed address `map` assigned to device `d`;
/// `thread_index` must give a dense, stable index for every thread id that appears in
/// `to_device_addr` (the compiler assigns these once, up front, for the whole machine).
pub fn build<E: Clone, const PINS: usize>(
    graph: &Graph<E, PINS>,
    cfg: &MachineConfig,
    to_device_addr: &[DeviceAddress],
    thread_index: impl Fn(ThreadId) -> usize,
    thread_count: usize,
    mesh: &mut ProgRouterMesh,
) -> Result<RoutingTables<E>, Error> {
    let mut in_edges: Vec<Vec<PInEdge<E>>> = vec![Vec::new(); thread_count];
    let mut key_table: Vec<Vec<Option<RouterKey>>> = graph.devices().map(|_| vec![None; PINS]).collect();

    for d in graph.devices() {
        let src_thread = to_device_addr[d.index()].thread_id();
        let src_board = cfg.board_coord(src_thread);

        for pin in 0..PINS {
            let mut dests: Vec<(MailboxCoord, u32, RoutingKey)> = Vec::new();
            for (label, to) in graph.out_edges(d, pin) {
                let dest_addr = to_device_addr[to.index()];
                let dest_thread = dest_addr.thread_id();
                let dest_idx = thread_index(dest_thread);

                let edge_index = in_edges[dest_idx].len();
                debug_assert!(edge_index < u16::MAX as usize, "in-edge table overflowed 16 bits");
                in_edges[dest_idx].push(PInEdge { label: label.clone() });

                let key = RoutingKey::pack(dest_addr.local_device_id(), edge_index as u16);
                dests.push((cfg.mailbox_coord(dest_thread), cfg.core_and_thread(dest_thread), key));
            }
            if !dests.is_empty() {
                key_table[d.index()][pin] = Some(mesh.add_dests_from_board(src_board, dests)?);
            }
        }
    }

    Ok(RoutingTables { in_edges, key_table })
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::collections::BTreeMap as Map;

    fn dense_thread_index(cfg: &MachineConfig, threads: &[ThreadId]) -> Map<u32, usize> {
        let _ = cfg;
        threads.iter().enumerate().map(|(i, t)| (t.0, i)).collect()
    }

    #[test]
    fn duplicate_destination_sets_share_a_router_key() {
        let mut mesh = ProgRouterMesh::new();
        let board = BoardCoord { x: 0, y: 0 };
        let dests = vec![(MailboxCoord { x: 1, y: 0 }, 2, RoutingKey::pack(3, 0))];
        let k1 = mesh.add_dests_from_board(board, dests.clone()).unwrap();
        let k2 = mesh.add_dests_from_board(board, dests).unwrap();
        assert_eq!(k1, k2);
    }

    #[test]
    fn build_assigns_matching_edge_indices() {
        let mut g: Graph<u32, 1> = Graph::new();
        let a = g.new_device();
        let b = g.new_device();
        g.add_labelled_edge(42, a, 0, b).unwrap();

        let cfg = MachineConfig::default();
        let ta = ThreadId(0);
        let tb = ThreadId(1);
        let addrs = vec![DeviceAddress::pack(ta, 0), DeviceAddress::pack(tb, 0)];
        let index = dense_thread_index(&cfg, &[ta, tb]);

        let mut mesh = ProgRouterMesh::new();
        let tables = build(&g, &cfg, &addrs, |t| index[&t.0], 2, &mut mesh).unwrap();

        assert_eq!(tables.in_edges[1].len(), 1);
        assert_eq!(tables.in_edges[1][0].label, 42);
        assert!(tables.key_table[a.index()][0].is_some());
        let key = tables.key_table[a.index()][0].unwrap();
        let resolved = mesh.resolve(key);
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].2.edge_index(), 0);
        assert_eq!(resolved[0].2.local_id(), 0);
    }
}
