//! The graph store (C2): devices, outgoing edges, and per-edge labels as they are built up by the
//! caller before [`crate::compiler::Compiler::map`] runs.

use alloc::vec;
use alloc::vec::Vec;

use crate::error::Error;

/// A dense, zero-based identifier assigned to a device on creation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceId(pub u32);

impl DeviceId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

struct OutEdge<E> {
    to: DeviceId,
    label: E,
}

struct InEdge {
    from: DeviceId,
    pin: usize,
}

/// Holds devices, their outgoing edges (grouped per pin), and the reverse incoming adjacency,
/// during graph construction.
///
/// Generic over `PINS`, the compile-time pin bound (the Rust analogue of the `POLITE_NUM_PINS`
/// macro) and over the edge label type `E`.
pub struct Graph<E, const PINS: usize> {
    out_edges: Vec<[Vec<OutEdge<E>>; PINS]>,
    in_edges: Vec<Vec<InEdge>>,
}

impl<E, const PINS: usize> Default for Graph<E, PINS> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E, const PINS: usize> Graph<E, PINS> {
    /// An empty graph.
    pub fn new() -> Self {
        Self {
            out_edges: Vec::new(),
            in_edges: Vec::new(),
        }
    }

    /// Number of devices created so far.
    pub fn device_count(&self) -> usize {
        self.out_edges.len()
    }

    /// Iterate every device id in creation order.
    pub fn devices(&self) -> impl Iterator<Item = DeviceId> + '_ {
        (0..self.device_count()).map(|i| DeviceId(i as u32))
    }

    /// Create a new device and return its id.
    pub fn new_device(&mut self) -> DeviceId {
        let id = DeviceId(self.out_edges.len() as u32);
        self.out_edges.push(core::array::from_fn(|_| Vec::new()));
        self.in_edges.push(Vec::new());
        id
    }

    /// Add an edge with a default-valued label.
    pub fn add_edge(&mut self, from: DeviceId, pin: usize, to: DeviceId) -> Result<(), Error>
    where
        E: Default,
    {
        self.add_labelled_edge(E::default(), from, pin, to)
    }

    /// Add an edge carrying `label`.
    ///
    /// Duplicate `(from, pin, to)` triples are allowed and preserve insertion order; this is
    /// a multigraph.
    pub fn add_labelled_edge(&mut self, label: E, from: DeviceId, pin: usize, to: DeviceId) -> Result<(), Error> {
        if pin >= PINS {
            return Err(Error::PinOutOfRange { pin, max_pins: PINS });
        }
        self.out_edges[from.index()][pin].push(OutEdge { to, label });
        self.in_edges[to.index()].push(InEdge { from, pin });
        Ok(())
    }

    /// The ordered sequence of outgoing edge labels on `(device, pin)`.
    pub fn out_edges(&self, device: DeviceId, pin: usize) -> impl Iterator<Item = (&E, DeviceId)> {
        self.out_edges[device.index()][pin]
            .iter()
            .map(|e| (&e.label, e.to))
    }

    /// The label of the `index`-th outgoing edge on `(device, pin)`.
    pub fn edge_label(&self, device: DeviceId, pin: usize, index: usize) -> &E {
        &self.out_edges[device.index()][pin][index].label
    }

    /// Number of outgoing edges across every pin of `device`.
    pub fn fan_out(&self, device: DeviceId) -> usize {
        self.out_edges[device.index()].iter().map(Vec::len).sum()
    }

    /// Number of incoming edges of `device`, across every sender.
    pub fn fan_in(&self, device: DeviceId) -> usize {
        self.in_edges[device.index()].len()
    }

    /// The set of devices with at least one edge, in either direction, to or from `device`.
    ///
    /// Used by the placer's edge-cut objective; duplicate edges count once per distinct
    /// neighbour, matching the bisection refinement's gain computation.
    pub(crate) fn neighbours(&self, device: DeviceId) -> Vec<DeviceId> {
        let mut seen = vec![false; self.device_count()];
        let mut out = Vec::new();
        for pin in 0..PINS {
            for e in &self.out_edges[device.index()][pin] {
                if !seen[e.to.index()] {
                    seen[e.to.index()] = true;
                    out.push(e.to);
                }
            }
        }
        for e in &self.in_edges[device.index()] {
            if !seen[e.from.index()] {
                seen[e.from.index()] = true;
                out.push(e.from);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pin_out_of_range_is_rejected() {
        let mut g: Graph<u32, 2> = Graph::new();
        let a = g.new_device();
        let b = g.new_device();
        assert_eq!(
            g.add_edge(a, 2, b),
            Err(Error::PinOutOfRange { pin: 2, max_pins: 2 })
        );
    }

    #[test]
    fn isolated_device_has_no_fan() {
        let mut g: Graph<u32, 4> = Graph::new();
        let a = g.new_device();
        assert_eq!(g.fan_in(a), 0);
        assert_eq!(g.fan_out(a), 0);
    }

    #[test]
    fn duplicate_edges_are_preserved() {
        let mut g: Graph<u32, 1> = Graph::new();
        let a = g.new_device();
        let b = g.new_device();
        g.add_edge(a, 0, b).unwrap();
        g.add_edge(a, 0, b).unwrap();
        assert_eq!(g.fan_out(a), 2);
        assert_eq!(g.fan_in(b), 2);
        assert_eq!(g.out_edges(a, 0).count(), 2);
    }
}
