//! The compiler: wires the graph store (C2), placer (C3), router builder (C4) and partition
//! layout (C5) together behind the host-facing surface this crate exposes: `new_device`,
//! `add_edge`, `set_num_boards`, `map`, `write`, `fan_in`/`fan_out`.
//!
//! `map` runs the placer three times (boards, then mailboxes within each board, then threads
//! within each mailbox), builds the routing tables over the resulting placement, and computes a
//! partition layout for every thread that ended up with at least one device. `write` serialises
//! the result through a [`HostLink`].

use alloc::collections::BTreeMap;
use alloc::vec;
use alloc::vec::Vec;

use crate::addr::{BoardCoord, DeviceAddress, MachineConfig, MailboxCoord, ThreadId, MAX_LOCAL_DEVICES_PER_THREAD};
use crate::config::RuntimeConfig;
use crate::device::{Device, DeviceImage, PState};
use crate::error::{Error, PartitionKind};
use crate::graph::{DeviceId, Graph};
use crate::hostlink::HostLink;
use crate::layout::{self, LayoutPolicy, ThreadLayout};
use crate::placer::{self, PlacerGraph};
use crate::routing::{self, ProgRouterMesh, RoutingTables};

/// Default simulated-annealing effort for the placer: eight refinement passes.
pub const DEFAULT_EFFORT: u32 = 8;

/// One thread that ended up hosting at least one device after [`Compiler::map`].
#[derive(Debug, Clone)]
pub struct MappedThread {
    pub thread: ThreadId,
    /// `from_device_addr[thread]`: devices assigned to this thread, in local-id order.
    pub devices: Vec<DeviceId>,
    pub layout: ThreadLayout,
}

/// Everything [`Compiler::map`] produces: the placement's two inverses, the routing tables, the
/// router mesh, and every occupied thread's partition layout.
pub struct Mapping<E> {
    /// `to_device_addr[d.index()]`, one entry per device.
    pub to_device_addr: Vec<DeviceAddress>,
    /// One entry per thread that hosts at least one device, in the dense order
    /// [`routing::RoutingTables::in_edges`] is indexed by.
    pub threads: Vec<MappedThread>,
    pub routing: RoutingTables<E>,
    pub router_mesh: ProgRouterMesh,
}

impl<E> Mapping<E> {
    /// The dense index `threads`/`routing.in_edges` use for `thread`, if it hosts a device.
    pub fn thread_index(&self, thread: ThreadId) -> Option<usize> {
        self.threads.iter().position(|t| t.thread == thread)
    }
}

/// The compile-time surface over a graph of `D: Device<PINS>` devices: construction
/// (`new_device`/`add_edge`), compilation (`map`), and upload (`write`).
pub struct Compiler<D: Device<PINS>, const PINS: usize> {
    graph: Graph<D::Edge, PINS>,
    machine: MachineConfig,
    policy: LayoutPolicy,
    boards_x: u32,
    boards_y: u32,
    effort: u32,
    mapping: Option<Mapping<D::Edge>>,
}

impl<D: Device<PINS>, const PINS: usize> Compiler<D, PINS> {
    /// A compiler over an empty graph, with board counts defaulting to the machine's full mesh
    /// (`1 << mesh_x_bits` by `1 << mesh_y_bits`).
    pub fn new(machine: MachineConfig) -> Self {
        Self::with_config(machine, RuntimeConfig::default())
    }

    /// As [`Compiler::new`], but taking board-count overrides from `runtime` (`POLITE_BOARDS_X`/
    /// `POLITE_BOARDS_Y`) rather than the machine's full mesh.
    pub fn with_config(machine: MachineConfig, runtime: RuntimeConfig) -> Self {
        let boards_x = runtime.boards_x.unwrap_or(1 << machine.mesh_x_bits);
        let boards_y = runtime.boards_y.unwrap_or(1 << machine.mesh_y_bits);
        Self {
            graph: Graph::new(),
            machine,
            policy: LayoutPolicy::default(),
            boards_x,
            boards_y,
            effort: DEFAULT_EFFORT,
            mapping: None,
        }
    }

    /// Restrict the mapper to an `x` by `y` sub-rectangle of boards.
    pub fn set_num_boards(&mut self, x: u32, y: u32) {
        self.boards_x = x;
        self.boards_y = y;
    }

    /// Override the placer's simulated-annealing effort (default [`DEFAULT_EFFORT`]).
    pub fn set_effort(&mut self, effort: u32) {
        self.effort = effort;
    }

    /// Override where the device-state array and in-edge table are placed (default: vertices in
    /// SRAM, in-edges in DRAM).
    pub fn set_layout_policy(&mut self, policy: LayoutPolicy) {
        self.policy = policy;
    }

    pub fn new_device(&mut self) -> DeviceId {
        self.graph.new_device()
    }

    pub fn add_edge(&mut self, from: DeviceId, pin: usize, to: DeviceId) -> Result<(), Error>
    where
        D::Edge: Default,
    {
        self.graph.add_edge(from, pin, to)
    }

    pub fn add_labelled_edge(&mut self, label: D::Edge, from: DeviceId, pin: usize, to: DeviceId) -> Result<(), Error> {
        self.graph.add_labelled_edge(label, from, pin, to)
    }

    pub fn fan_in(&self, device: DeviceId) -> usize {
        self.graph.fan_in(device)
    }

    pub fn fan_out(&self, device: DeviceId) -> usize {
        self.graph.fan_out(device)
    }

    pub fn device_count(&self) -> usize {
        self.graph.device_count()
    }

    /// The result of the last successful [`Compiler::map`] call, if any.
    pub fn mapping(&self) -> Option<&Mapping<D::Edge>> {
        self.mapping.as_ref()
    }

    /// Partition the graph across boards, mailboxes and threads; build the routing tables and
    /// router mesh; compute every occupied thread's partition layout.
    ///
    /// `D::State`'s wire image size (plus a fixed per-device header: the `ready_to_send` tag and
    /// one routing-key word per pin) and `D::Edge`'s wire image size are what partition budgets
    /// are computed against, not this process's own `size_of::<PState<D::State>>()`, which
    /// additionally carries host-side bookkeeping (`Vec<Option<RouterKey>>`) with no counterpart
    /// in the fabric's fixed memory layout.
    pub fn map(&mut self) -> Result<&Mapping<D::Edge>, Error>
    where
        D::Edge: Clone + DeviceImage,
        D::State: DeviceImage,
    {
        let all_devices: Vec<DeviceId> = self.graph.devices().collect();
        let board_placements = place_devices(&self.graph, &all_devices, self.boards_x, self.boards_y, self.effort);

        let mailbox_w = 1u32 << self.machine.mailbox_mesh_x_bits;
        let mailbox_h = 1u32 << self.machine.mailbox_mesh_y_bits;
        let thread_w = 1u32 << self.machine.core_thread_bits();

        let mut to_device_addr = vec![DeviceAddress::invalid(); self.graph.device_count()];
        let mut thread_devices: Vec<(ThreadId, Vec<DeviceId>)> = Vec::new();

        for (board_xy, board_devices) in board_placements {
            let board = BoardCoord { x: board_xy.0, y: board_xy.1 };
            let mailbox_placements = place_devices(&self.graph, &board_devices, mailbox_w, mailbox_h, self.effort);

            for (mbox_xy, mbox_devices) in mailbox_placements {
                let mailbox_in_board = MailboxCoord { x: mbox_xy.0, y: mbox_xy.1 };
                let thread_placements = place_devices(&self.graph, &mbox_devices, thread_w, 1, self.effort);

                for ((core_and_thread, _), devices) in thread_placements {
                    let thread = self.machine.thread_id(board, mailbox_in_board, core_and_thread);

                    if devices.len() as u32 > MAX_LOCAL_DEVICES_PER_THREAD {
                        return Err(Error::PartitionOverflow {
                            thread,
                            partition: PartitionKind::Sram,
                            requested: devices.len() as u32,
                            budget: MAX_LOCAL_DEVICES_PER_THREAD,
                        });
                    }

                    for (local_id, &dev) in devices.iter().enumerate() {
                        to_device_addr[dev.index()] = DeviceAddress::pack(thread, local_id as u16);
                    }
                    thread_devices.push((thread, devices));
                }
            }
        }

        let thread_index: BTreeMap<u32, usize> =
            thread_devices.iter().enumerate().map(|(i, (t, _))| (t.0, i)).collect();
        let thread_count = thread_devices.len();

        let mut router_mesh = ProgRouterMesh::new();
        let routing_tables = routing::build(
            &self.graph,
            &self.machine,
            &to_device_addr,
            |t| thread_index[&t.0],
            thread_count,
            &mut router_mesh,
        )?;

        let device_entry_size = D::State::IMAGE_SIZE + READY_TO_SEND_HEADER_BYTES + PINS * ROUTER_KEY_BYTES;
        let edge_entry_size = D::Edge::IMAGE_SIZE;

        let mut threads = Vec::with_capacity(thread_count);
        for (idx, (thread, devices)) in thread_devices.into_iter().enumerate() {
            let num_in_edges = routing_tables.in_edges[idx].len();
            let layout = layout::layout_thread(
                &self.machine,
                &self.policy,
                thread,
                devices.len(),
                device_entry_size,
                num_in_edges,
                edge_entry_size,
            )?;
            threads.push(MappedThread { thread, devices, layout });
        }

        self.mapping = Some(Mapping {
            to_device_addr,
            threads,
            routing: routing_tables,
            router_mesh,
        });
        Ok(self.mapping.as_ref().expect("just assigned"))
    }

    /// Serialise the mapped graph's per-thread heap images through `host_link`: the thread
    /// control block, the device-state array (in local-id order, each device's wire image
    /// followed by its `ready_to_send` header and per-pin routing-key words), and the in-edge
    /// table (in `edge_id` order).
    ///
    /// `states` holds every device's initial application state, indexed by [`DeviceId::index`].
    /// Must be called after a successful [`Compiler::map`].
    pub fn write(&self, host_link: &mut impl HostLink, states: &[D::State]) -> Result<(), Error>
    where
        D::State: DeviceImage,
        D::Edge: DeviceImage,
    {
        let mapping = self.mapping.as_ref().expect("Compiler::write called before a successful map()");

        for mt in &mapping.threads {
            let board = self.machine.board_coord(mt.thread);
            let core = self.machine.core_and_thread(mt.thread);

            let mut words = Vec::new();
            words.push(mt.devices.len() as u32);
            words.push(self.graph.device_count() as u32);
            words.push(0); // time, zeroed at boot
            words.push(mt.layout.device_state.offset);
            words.push(mt.layout.in_edge_table.offset);
            words.push(mt.layout.sender_stack.offset);

            for &dev in &mt.devices {
                let mut image = vec![0u8; D::State::IMAGE_SIZE];
                states[dev.index()].write_image(&mut image);
                words.extend(bytes_to_words(&image));
                words.push(0); // ready_to_send = No, in_stack = false
                for pin in 0..PINS {
                    let key = mapping.routing.key_table[dev.index()][pin]
                        .map(|k| k.index)
                        .unwrap_or(u32::MAX);
                    words.push(key);
                }
            }

            let thread_idx = mapping.thread_index(mt.thread).expect("thread present in its own mapping");
            for entry in &mapping.routing.in_edges[thread_idx] {
                let mut image = vec![0u8; D::Edge::IMAGE_SIZE];
                entry.label.write_image(&mut image);
                words.extend(bytes_to_words(&image));
            }

            host_link.set_addr(board, core, 0);
            host_link.store(board, core, &words);
        }
        host_link.flush();
        Ok(())
    }
}

/// Bytes a `ready_to_send`/`in_stack` header plus the `PINS` router-key words occupy: one word
/// for the header, one `u32` per pin.
const READY_TO_SEND_HEADER_BYTES: usize = 4;
const ROUTER_KEY_BYTES: usize = 4;

fn bytes_to_words(bytes: &[u8]) -> Vec<u32> {
    let mut words = Vec::with_capacity(bytes.len().div_ceil(4));
    for chunk in bytes.chunks(4) {
        let mut b = [0u8; 4];
        b[..chunk.len()].copy_from_slice(chunk);
        words.push(u32::from_le_bytes(b));
    }
    words
}

/// Build the induced subgraph of `devices` (edges between two devices both in `devices`),
/// partition it across a `width x height` mesh, and map each non-empty part's local node indices
/// back to the global [`DeviceId`]s they stand for.
fn place_devices<E, const PINS: usize>(
    graph: &Graph<E, PINS>,
    devices: &[DeviceId],
    width: u32,
    height: u32,
    effort: u32,
) -> Vec<((u32, u32), Vec<DeviceId>)> {
    if devices.is_empty() || width == 0 || height == 0 {
        return Vec::new();
    }

    let mut index_of: BTreeMap<u32, usize> = BTreeMap::new();
    for (i, &d) in devices.iter().enumerate() {
        index_of.insert(d.0, i);
    }

    let mut pg = PlacerGraph::new(devices.len());
    for (i, &d) in devices.iter().enumerate() {
        for pin in 0..PINS {
            for (_label, to) in graph.out_edges(d, pin) {
                if let Some(&j) = index_of.get(&to.0) {
                    pg.add_edge(i, j);
                }
            }
        }
    }

    let placement = placer::place(&pg, width, height, effort);
    let coord_of_part = placement.coord_of_part.clone();

    placement
        .parts
        .into_iter()
        .enumerate()
        .filter_map(move |(pid, local_idxs)| {
            if local_idxs.is_empty() {
                None
            } else {
                let coord = coord_of_part[pid];
                let global = local_idxs.into_iter().map(|i| devices[i]).collect();
                Some((coord, global))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Pin;
    use alloc::vec;

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
        }
        fn step(_state: &mut PState<u32>) -> bool {
            false
        }
        fn finish(state: &PState<u32>) -> Option<u32> {
            Some(state.app)
        }
    }

    fn small_machine() -> MachineConfig {
        MachineConfig {
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

    #[test]
    fn map_assigns_every_device_to_exactly_one_thread() {
        let mut compiler: Compiler<Ring, 1> = Compiler::new(small_machine());
        let devices: Vec<DeviceId> = (0..16).map(|_| compiler.new_device()).collect();
        for i in 0..devices.len() {
            compiler
                .add_edge(devices[i], 0, devices[(i + 1) % devices.len()])
                .unwrap();
        }

        let mapping = compiler.map().unwrap();
        assert_eq!(mapping.to_device_addr.len(), devices.len());
        assert!(mapping.to_device_addr.iter().all(DeviceAddress::is_valid));

        let total_assigned: usize = mapping.threads.iter().map(|t| t.devices.len()).sum();
        assert_eq!(total_assigned, devices.len());

        let mut seen = vec![false; devices.len()];
        for mt in &mapping.threads {
            for &d in &mt.devices {
                assert!(!seen[d.index()], "device assigned to more than one thread");
                seen[d.index()] = true;
            }
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn map_address_round_trips_to_the_assigning_thread() {
        let mut compiler: Compiler<Ring, 1> = Compiler::new(small_machine());
        let devices: Vec<DeviceId> = (0..8).map(|_| compiler.new_device()).collect();
        let mapping = compiler.map().unwrap();

        for mt in &mapping.threads {
            for (local_id, &dev) in mt.devices.iter().enumerate() {
                let addr = mapping.to_device_addr[dev.index()];
                assert_eq!(addr.thread_id(), mt.thread);
                assert_eq!(addr.local_device_id() as usize, local_id);
            }
        }
    }

    #[test]
    fn isolated_device_is_still_placed() {
        let mut compiler: Compiler<Ring, 1> = Compiler::new(small_machine());
        let _lonely = compiler.new_device();
        let mapping = compiler.map().unwrap();
        let total: usize = mapping.threads.iter().map(|t| t.devices.len()).sum();
        assert_eq!(total, 1);
    }

    #[test]
    fn exceeding_the_local_device_bound_overflows() {
        let mut machine = small_machine();
        // One board, one mailbox, one thread: every device lands on the same thread.
        machine.mesh_x_bits = 0;
        machine.mesh_y_bits = 0;
        machine.mailbox_mesh_x_bits = 0;
        machine.mailbox_mesh_y_bits = 0;
        machine.log_cores_per_mailbox = 0;
        machine.log_threads_per_core = 0;
        machine.log_bytes_per_sram_partition = 31;
        machine.log_bytes_per_dram_partition = 31;
        machine.stack_reserve_sram = 0;
        machine.stack_reserve_dram = 0;

        let mut compiler: Compiler<Ring, 1> = Compiler::new(machine);
        for _ in 0..(MAX_LOCAL_DEVICES_PER_THREAD + 1) {
            compiler.new_device();
        }

        let err = compiler.map().unwrap_err();
        assert!(matches!(err, Error::PartitionOverflow { .. }));
    }
}
