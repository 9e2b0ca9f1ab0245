//! The placer (C3): partitions a weighted graph across a rectangular mesh and assigns each part a
//! grid coordinate.
//!
//! Operates on a level-agnostic [`PlacerGraph`] of dense node indices rather than on
//! [`crate::graph::Graph`] directly, so the same routine serves all three levels of the
//! board/mailbox/thread hierarchy: the compiler builds one `PlacerGraph` per level, from whatever
//! edge set is relevant at that level (device edges for boards, the board-internal induced
//! subgraph for mailboxes, and so on).

use alloc::vec;
use alloc::vec::Vec;

/// A splittable, seeded xorshift64 generator.
///
/// Used only to order candidate moves during partitioning and placement; the acceptance
/// criterion itself is always "does this strictly reduce the objective", so the search is
/// reproducible from `(effort, node_count)` alone without depending on wall-clock time,
/// thread scheduling, or hashmap iteration order.
struct XorShift64(u64);

impl XorShift64 {
    fn new(seed: u64) -> Self {
        Self(seed | 1)
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    fn next_below(&mut self, bound: usize) -> usize {
        if bound == 0 {
            0
        } else {
            (self.next_u64() % bound as u64) as usize
        }
    }
}

fn shuffle(order: &mut [usize], rng: &mut XorShift64) {
    for i in (1..order.len()).rev() {
        let j = rng.next_below(i + 1);
        order.swap(i, j);
    }
}

/// A weighted undirected adjacency list over dense node indices `0..node_count`.
pub struct PlacerGraph {
    adj: Vec<Vec<(usize, u32)>>,
}

impl PlacerGraph {
    /// An edgeless graph over `node_count` nodes.
    pub fn new(node_count: usize) -> Self {
        Self {
            adj: vec![Vec::new(); node_count],
        }
    }

    /// Number of nodes.
    pub fn node_count(&self) -> usize {
        self.adj.len()
    }

    /// Record one edge between `a` and `b` (a no-op for self-loops); repeated edges between the
    /// same pair accumulate weight rather than duplicating entries.
    pub fn add_edge(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        add_weighted(&mut self.adj[a], b);
        add_weighted(&mut self.adj[b], a);
    }

    /// `(neighbour, weight)` pairs incident to `node`.
    pub fn neighbours(&self, node: usize) -> &[(usize, u32)] {
        &self.adj[node]
    }
}

fn add_weighted(list: &mut Vec<(usize, u32)>, node: usize) {
    match list.iter_mut().find(|(n, _)| *n == node) {
        Some(entry) => entry.1 += 1,
        None => list.push((node, 1)),
    }
}

/// The result of [`place`]: a partition of the graph's nodes into `width * height` parts, each
/// assigned a grid coordinate.
pub struct Placement {
    /// `parts[part_id]` is the (local) node indices assigned to that part, in no particular
    /// order.
    pub parts: Vec<Vec<usize>>,
    /// `coord_of_part[part_id]` is that part's `(x, y)` grid coordinate.
    pub coord_of_part: Vec<(u32, u32)>,
    /// `mapping[y][x]` is the part id occupying that grid cell.
    pub mapping: Vec<Vec<usize>>,
}

/// Partition `graph` into a `width x height` grid of parts, minimising edge cut, then assign
/// parts to grid coordinates minimising `Σ edge_weight(a, b) · manhattan(pos(a), pos(b))`.
///
/// `effort` controls the number of placement-refinement passes (default 8 per the caller);
/// `width * height == 0` yields no parts.
pub fn place(graph: &PlacerGraph, width: u32, height: u32, effort: u32) -> Placement {
    if width == 0 || height == 0 {
        return Placement {
            parts: Vec::new(),
            coord_of_part: Vec::new(),
            mapping: Vec::new(),
        };
    }

    let num_parts = (width as usize) * (height as usize);
    let seed = seed_for(effort, graph.node_count(), num_parts);
    let mut rng = XorShift64::new(seed);

    let all_nodes: Vec<usize> = (0..graph.node_count()).collect();
    let parts = partition_into(graph, &all_nodes, num_parts, &mut rng);

    let (coord_of_part, mapping) = anneal_placement(graph, &parts, width, height, effort, &mut rng);

    Placement {
        parts,
        coord_of_part,
        mapping,
    }
}

fn seed_for(effort: u32, node_count: usize, num_parts: usize) -> u64 {
    const GOLDEN: u64 = 0x9E37_79B9_7F4A_7C15;
    (effort as u64)
        .wrapping_mul(GOLDEN)
        .wrapping_add(node_count as u64)
        .wrapping_add((num_parts as u64) << 1)
        .wrapping_add(1)
}

/// Recursively bisect `nodes` into `num_parts` roughly-equal groups.
fn partition_into(graph: &PlacerGraph, nodes: &[usize], num_parts: usize, rng: &mut XorShift64) -> Vec<Vec<usize>> {
    if num_parts <= 1 {
        return vec![nodes.to_vec()];
    }
    let half_a = num_parts / 2;
    let half_b = num_parts - half_a;
    let target_a = nodes.len() * half_a / num_parts;
    let (a, b) = bisect(graph, nodes, target_a, rng);
    let mut parts = partition_into(graph, &a, half_a, rng);
    parts.extend(partition_into(graph, &b, half_b, rng));
    parts
}

/// Fiduccia-Mattheyses-style bisection of `nodes` into a group of size `target_a` and its
/// complement, minimising the induced edge cut.
fn bisect(graph: &PlacerGraph, nodes: &[usize], target_a: usize, rng: &mut XorShift64) -> (Vec<usize>, Vec<usize>) {
    let n = nodes.len();
    if n == 0 {
        return (Vec::new(), Vec::new());
    }

    let mut pos = vec![usize::MAX; graph.node_count()];
    for (i, &node) in nodes.iter().enumerate() {
        pos[node] = i;
    }
    let adj: Vec<Vec<usize>> = nodes
        .iter()
        .map(|&node| {
            graph
                .neighbours(node)
                .iter()
                .filter_map(|&(nbr, _w)| {
                    let p = pos[nbr];
                    (p != usize::MAX).then_some(p)
                })
                .collect()
        })
        .collect();

    let target_a = target_a.min(n);
    let mut side = vec![false; n];
    side[..target_a].fill(true);
    let tolerance = (n / 20).max(1);

    for _ in 0..n.min(32) {
        let mut locked = vec![false; n];
        let mut count_a = target_a as i64;
        let mut cumulative: i64 = 0;
        let mut best_cumulative = 0i64;
        let mut best_step = 0usize;
        let mut moves = Vec::with_capacity(n);

        let mut order: Vec<usize> = (0..n).collect();
        shuffle(&mut order, rng);

        for _ in 0..n {
            let Some(v) = order
                .iter()
                .copied()
                .filter(|&v| !locked[v])
                .max_by_key(|&v| gain_of(v, &side, &adj))
            else {
                break;
            };
            let gain = gain_of(v, &side, &adj);
            locked[v] = true;
            let moving_to_a = !side[v];
            side[v] = moving_to_a;
            count_a += if moving_to_a { 1 } else { -1 };
            cumulative += gain;
            moves.push(v);

            if cumulative > best_cumulative && (count_a - target_a as i64).unsigned_abs() as usize <= tolerance {
                best_cumulative = cumulative;
                best_step = moves.len();
            }
        }

        for &v in &moves[best_step..] {
            side[v] = !side[v];
        }
        if best_cumulative <= 0 {
            break;
        }
    }

    let mut a = Vec::new();
    let mut b = Vec::new();
    for (i, &node) in nodes.iter().enumerate() {
        if side[i] {
            a.push(node);
        } else {
            b.push(node);
        }
    }
    (a, b)
}

fn gain_of(v: usize, side: &[bool], adj: &[Vec<usize>]) -> i64 {
    let mut external = 0i64;
    let mut internal = 0i64;
    for &u in &adj[v] {
        if side[u] == side[v] {
            internal += 1;
        } else {
            external += 1;
        }
    }
    external - internal
}

fn manhattan(a: (u32, u32), b: (u32, u32)) -> u64 {
    let dx = (a.0 as i64 - b.0 as i64).unsigned_abs();
    let dy = (a.1 as i64 - b.1 as i64).unsigned_abs();
    dx + dy
}

fn anneal_placement(
    graph: &PlacerGraph,
    parts: &[Vec<usize>],
    width: u32,
    height: u32,
    effort: u32,
    rng: &mut XorShift64,
) -> (Vec<(u32, u32)>, Vec<Vec<usize>>) {
    let num_parts = parts.len();

    let mut part_of = vec![0usize; graph.node_count()];
    for (pid, nodes) in parts.iter().enumerate() {
        for &n in nodes {
            part_of[n] = pid;
        }
    }

    let mut weight = vec![vec![0u32; num_parts]; num_parts];
    for node in 0..graph.node_count() {
        for &(nbr, w) in graph.neighbours(node) {
            if nbr > node {
                let (pa, pb) = (part_of[node], part_of[nbr]);
                if pa != pb {
                    weight[pa][pb] += w;
                    weight[pb][pa] += w;
                }
            }
        }
    }

    // position i (row-major) <-> part_at_position[i]; coord(i) is fixed by the grid shape.
    let coord_at = |i: usize| -> (u32, u32) { (i as u32 % width, i as u32 / width) };
    let mut part_at_position: Vec<usize> = (0..num_parts).collect();
    let mut position_of_part: Vec<usize> = (0..num_parts).collect();

    let swap_delta = |part_at_position: &[usize], i: usize, j: usize| -> i64 {
        let pi = part_at_position[i];
        let pj = part_at_position[j];
        let (ci, cj) = (coord_at(i), coord_at(j));
        let mut delta = 0i64;
        for k in 0..num_parts {
            if k == i || k == j {
                continue;
            }
            let pk = part_at_position[k];
            let ck = coord_at(k);
            let before = (weight[pi][pk] as u64 * manhattan(ci, ck)) as i64
                + (weight[pj][pk] as u64 * manhattan(cj, ck)) as i64;
            let after = (weight[pi][pk] as u64 * manhattan(cj, ck)) as i64
                + (weight[pj][pk] as u64 * manhattan(ci, ck)) as i64;
            delta += after - before;
        }
        delta
    };

    for _ in 0..effort {
        let mut pairs: Vec<(usize, usize)> = Vec::with_capacity(num_parts * num_parts / 2);
        for i in 0..num_parts {
            for j in (i + 1)..num_parts {
                pairs.push((i, j));
            }
        }
        let mut order: Vec<usize> = (0..pairs.len()).collect();
        shuffle(&mut order, rng);

        let mut improved = false;
        for idx in order {
            let (i, j) = pairs[idx];
            if swap_delta(&part_at_position, i, j) < 0 {
                let (pi, pj) = (part_at_position[i], part_at_position[j]);
                part_at_position.swap(i, j);
                position_of_part[pi] = j;
                position_of_part[pj] = i;
                improved = true;
            }
        }
        if !improved {
            break;
        }
    }

    let coord_of_part: Vec<(u32, u32)> = (0..num_parts).map(|pid| coord_at(position_of_part[pid])).collect();
    let mut mapping = vec![vec![0usize; width as usize]; height as usize];
    for (position, &pid) in part_at_position.iter().enumerate() {
        let (x, y) = coord_at(position);
        mapping[y as usize][x as usize] = pid;
    }

    (coord_of_part, mapping)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_part_keeps_every_node() {
        let mut g = PlacerGraph::new(5);
        g.add_edge(0, 1);
        g.add_edge(1, 2);
        let placement = place(&g, 1, 1, 4);
        assert_eq!(placement.parts.len(), 1);
        assert_eq!(placement.parts[0].len(), 5);
    }

    #[test]
    fn more_parts_than_nodes_yields_empty_parts() {
        let g = PlacerGraph::new(2);
        let placement = place(&g, 2, 2, 2);
        assert_eq!(placement.parts.len(), 4);
        let total: usize = placement.parts.iter().map(Vec::len).sum();
        assert_eq!(total, 2);
    }

    #[test]
    fn partition_is_balanced_within_five_percent() {
        let mut g = PlacerGraph::new(100);
        for i in 0..99 {
            g.add_edge(i, i + 1);
        }
        let placement = place(&g, 2, 1, 8);
        let sizes: Vec<usize> = placement.parts.iter().map(Vec::len).collect();
        assert_eq!(sizes.iter().sum::<usize>(), 100);
        for &s in &sizes {
            assert!((s as i64 - 50).abs() <= 5, "unbalanced part of size {s}");
        }
    }

    #[test]
    fn placement_is_deterministic_given_fixed_effort() {
        let mut g = PlacerGraph::new(16);
        for i in 0..15 {
            g.add_edge(i, i + 1);
        }
        let a = place(&g, 4, 4, 8);
        let b = place(&g, 4, 4, 8);
        assert_eq!(a.coord_of_part, b.coord_of_part);
        assert_eq!(a.mapping, b.mapping);
        for (pa, pb) in a.parts.iter().zip(b.parts.iter()) {
            assert_eq!(pa, pb);
        }
    }

    #[test]
    fn zero_area_mesh_yields_no_parts() {
        let g = PlacerGraph::new(3);
        let placement = place(&g, 0, 5, 8);
        assert!(placement.parts.is_empty());
    }
}
