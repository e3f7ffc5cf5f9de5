//! Chainweb adjacency graphs and chain distance.

use crate::error::{ChainwebError, ChainwebResult};
use crate::types::ChainId;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::{BTreeMap, HashSet, VecDeque};

/// Adjacent chain ids of one chain, in declaration order.
///
/// Canonical graphs have degree <= 3, so neighbors stay inline.
pub type Adjacents = SmallVec<[ChainId; 3]>;

/// Static adjacency map over chain ids.
///
/// Symmetry is expected but not enforced; callers must supply a valid graph.
/// Read-only once built and freely shared.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Graph {
    adjacency: BTreeMap<ChainId, Adjacents>,
}

const TWO: &[(u32, &[u32])] = &[(0, &[1]), (1, &[0])];

const THREE: &[(u32, &[u32])] = &[(0, &[1, 2]), (1, &[0, 2]), (2, &[0, 1])];

// Petersen graph.
const TEN: &[(u32, &[u32])] = &[
    (0, &[2, 3, 5]),
    (1, &[3, 4, 6]),
    (2, &[0, 4, 7]),
    (3, &[0, 1, 8]),
    (4, &[1, 2, 9]),
    (5, &[0, 6, 9]),
    (6, &[1, 5, 7]),
    (7, &[2, 6, 8]),
    (8, &[3, 7, 9]),
    (9, &[4, 5, 8]),
];

// Degree 3, diameter 3.
const TWENTY: &[(u32, &[u32])] = &[
    (0, &[5, 10, 15]),
    (1, &[6, 11, 16]),
    (2, &[7, 12, 17]),
    (3, &[8, 13, 18]),
    (4, &[9, 14, 19]),
    (5, &[0, 7, 8]),
    (6, &[1, 8, 9]),
    (7, &[2, 5, 9]),
    (8, &[3, 5, 6]),
    (9, &[4, 6, 7]),
    (10, &[0, 11, 19]),
    (11, &[1, 10, 12]),
    (12, &[2, 11, 13]),
    (13, &[3, 12, 14]),
    (14, &[4, 13, 15]),
    (15, &[0, 14, 16]),
    (16, &[1, 15, 17]),
    (17, &[2, 16, 18]),
    (18, &[3, 17, 19]),
    (19, &[4, 10, 18]),
];

impl Graph {
    pub fn new(adjacency: BTreeMap<ChainId, Adjacents>) -> Self {
        Self { adjacency }
    }

    /// Builds a graph from `(chain, neighbors)` pairs.
    pub fn from_pairs<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (u32, &'a [u32])>,
    {
        let adjacency = pairs
            .into_iter()
            .map(|(cid, adjs)| {
                (
                    ChainId(cid),
                    adjs.iter().copied().map(ChainId).collect::<Adjacents>(),
                )
            })
            .collect();
        Self { adjacency }
    }

    /// Returns the built-in graph for `chains` chains (2, 3, 10 or 20).
    pub fn canonical(chains: usize) -> ChainwebResult<Self> {
        let pairs = match chains {
            2 => TWO,
            3 => THREE,
            10 => TEN,
            20 => TWENTY,
            n => {
                return Err(ChainwebError::Config(format!(
                    "No built-in graph for {n} chains; provide an explicit graph"
                )))
            }
        };
        Ok(Self::from_pairs(pairs.iter().copied()))
    }

    /// Shifts every chain id by `offset`.
    pub fn offset(&self, offset: u32) -> Self {
        let adjacency = self
            .adjacency
            .iter()
            .map(|(cid, adjs)| {
                (
                    ChainId(cid.0 + offset),
                    adjs.iter().map(|a| ChainId(a.0 + offset)).collect(),
                )
            })
            .collect();
        Self { adjacency }
    }

    pub fn adjacents(&self, cid: ChainId) -> Option<&[ChainId]> {
        self.adjacency.get(&cid).map(|adjs| adjs.as_slice())
    }

    pub fn chain_ids(&self) -> impl Iterator<Item = ChainId> + '_ {
        self.adjacency.keys().copied()
    }

    pub fn contains(&self, cid: ChainId) -> bool {
        self.adjacency.contains_key(&cid)
    }

    pub fn len(&self) -> usize {
        self.adjacency.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adjacency.is_empty()
    }

    /// Fails if a neighbor id has no entry of its own.
    pub fn validate(&self) -> ChainwebResult<()> {
        for (cid, adjs) in &self.adjacency {
            if let Some(missing) = adjs.iter().find(|a| !self.adjacency.contains_key(a)) {
                return Err(ChainwebError::Config(format!(
                    "Chain {cid} lists unknown adjacent chain {missing}"
                )));
            }
        }
        Ok(())
    }

    pub fn is_symmetric(&self) -> bool {
        self.adjacency.iter().all(|(cid, adjs)| {
            adjs.iter()
                .all(|a| self.adjacents(*a).is_some_and(|back| back.contains(cid)))
        })
    }

    /// Shortest-path hop count from `src` to `trg` (breadth-first search).
    pub fn distance(&self, src: ChainId, trg: ChainId) -> ChainwebResult<u32> {
        distance(self, src, trg)
    }
}

/// Shortest-path hop count from `src` to `trg`.
///
/// Returns 0 when `src == trg`; fails with [`ChainwebError::Unreachable`]
/// when the search frontier is exhausted without meeting `trg`.
pub fn distance(graph: &Graph, src: ChainId, trg: ChainId) -> ChainwebResult<u32> {
    if src == trg {
        return Ok(0);
    }

    let mut visited = HashSet::from([src]);
    let mut queue = VecDeque::from([(src, 0u32)]);

    while let Some((cur, d)) = queue.pop_front() {
        for &adj in graph.adjacents(cur).unwrap_or_default() {
            if adj == trg {
                return Ok(d + 1);
            }
            if visited.insert(adj) {
                queue.push_back((adj, d + 1));
            }
        }
    }

    Err(ChainwebError::Unreachable { src, trg })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIZES: [usize; 4] = [2, 3, 10, 20];

    #[test]
    fn canonical_graphs_have_requested_size() {
        for n in SIZES {
            let g = Graph::canonical(n).unwrap();
            assert_eq!(g.len(), n);
            g.validate().unwrap();
        }
    }

    #[test]
    fn unsupported_size_is_config_error() {
        for n in [0, 1, 4, 5, 98] {
            assert!(matches!(
                Graph::canonical(n),
                Err(ChainwebError::Config(_))
            ));
        }
    }

    #[test]
    fn canonical_graphs_are_symmetric() {
        for n in SIZES {
            assert!(Graph::canonical(n).unwrap().is_symmetric(), "size {n}");
        }
    }

    #[test]
    fn distance_to_self_is_zero() {
        for n in SIZES {
            let g = Graph::canonical(n).unwrap();
            for cid in g.chain_ids() {
                assert_eq!(g.distance(cid, cid).unwrap(), 0);
            }
        }
    }

    #[test]
    fn distance_is_symmetric() {
        for n in SIZES {
            let g = Graph::canonical(n).unwrap();
            for a in g.chain_ids() {
                for b in g.chain_ids() {
                    assert_eq!(g.distance(a, b).unwrap(), g.distance(b, a).unwrap());
                }
            }
        }
    }

    #[test]
    fn known_diameters() {
        let diameter = |g: &Graph| {
            g.chain_ids()
                .flat_map(|a| g.chain_ids().map(move |b| (a, b)))
                .map(|(a, b)| g.distance(a, b).unwrap())
                .max()
                .unwrap()
        };
        assert_eq!(diameter(&Graph::canonical(2).unwrap()), 1);
        assert_eq!(diameter(&Graph::canonical(3).unwrap()), 1);
        assert_eq!(diameter(&Graph::canonical(10).unwrap()), 2);
        assert_eq!(diameter(&Graph::canonical(20).unwrap()), 3);
    }

    #[test]
    fn adjacent_chains_are_one_hop() {
        let g = Graph::canonical(20).unwrap();
        assert_eq!(g.distance(ChainId(0), ChainId(5)).unwrap(), 1);
        assert_eq!(g.distance(ChainId(0), ChainId(7)).unwrap(), 2);
    }

    #[test]
    fn unreachable_target_fails() {
        let g = Graph::canonical(2).unwrap();
        assert!(matches!(
            g.distance(ChainId(0), ChainId(9)),
            Err(ChainwebError::Unreachable { .. })
        ));

        let split = Graph::from_pairs([(0, &[1][..]), (1, &[0][..]), (2, &[][..])]);
        assert!(split.distance(ChainId(0), ChainId(2)).is_err());
    }

    #[test]
    fn validate_rejects_dangling_neighbor() {
        let g = Graph::from_pairs([(0, &[1][..]), (1, &[0, 4][..])]);
        assert!(matches!(g.validate(), Err(ChainwebError::Config(_))));
    }

    #[test]
    fn offset_shifts_keys_and_neighbors() {
        let g = Graph::canonical(2).unwrap().offset(10);
        assert_eq!(g.adjacents(ChainId(10)).unwrap(), &[ChainId(11)]);
        assert!(!g.contains(ChainId(0)));
    }

    #[test]
    fn graph_round_trips_through_json_map() {
        let g: Graph = serde_json::from_str(r#"{"0":[1],"1":[0]}"#).unwrap();
        assert_eq!(g, Graph::canonical(2).unwrap());
    }
}
