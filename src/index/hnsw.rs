//! Hierarchical navigable small-world graph over cosine similarity.
//!
//! Nodes are addressed by dense `u32` slots in insertion order, which doubles as the stable
//! tie-breaker. Vectors are normalized on insert so similarity is a dot product. Deletion is soft;
//! the owner rebuilds the graph once tombstones dominate.
//!
//! Graphs at or below the search beam width are scanned exhaustively, so small documents always
//! get exact results.

use serde::{Deserialize, Serialize};
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashSet};
use thiserror::Error;

const MAX_LEVEL: u8 = 16;
const LCG_SEED: u64 = 42;

/// Errors raised by graph mutation.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum HnswError {
    /// Vectors must not be empty.
    #[error("empty vector")]
    EmptyVector,
    /// Vector length differs from the graph's dimension.
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch {
        /// Dimension fixed by the first inserted vector.
        expected: usize,
        /// Dimension of the rejected vector.
        got: usize,
    },
}

#[derive(Debug, Clone, Copy)]
struct Scored {
    score: f32,
    slot: u32,
}

impl PartialEq for Scored {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Scored {}

impl PartialOrd for Scored {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scored {
    // Higher score first; on equal scores the earlier slot wins.
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.slot.cmp(&self.slot))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Node {
    vector: Vec<f32>,
    neighbors: Vec<Vec<u32>>,
    deleted: bool,
}

impl Node {
    fn level(&self) -> usize {
        self.neighbors.len() - 1
    }
}

/// Approximate nearest-neighbour graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HnswGraph {
    m: usize,
    m_max0: usize,
    ef_construction: usize,
    level_mult: f32,
    nodes: Vec<Node>,
    entry_point: Option<u32>,
    dimension: Option<usize>,
    deleted: usize,
    rng_state: u64,
}

impl Default for HnswGraph {
    fn default() -> Self {
        Self::new(16, 100)
    }
}

impl HnswGraph {
    /// Create a graph with `m` links per upper-layer node and the given construction beam.
    pub fn new(m: usize, ef_construction: usize) -> Self {
        let m = m.max(2);
        Self {
            m,
            m_max0: m * 2,
            ef_construction: ef_construction.max(m),
            level_mult: 1.0 / (m as f32).ln(),
            nodes: Vec::new(),
            entry_point: None,
            dimension: None,
            deleted: 0,
            rng_state: LCG_SEED,
        }
    }

    /// Total slots, including deleted ones.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no slots.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Slots that are not deleted.
    pub fn live_len(&self) -> usize {
        self.nodes.len() - self.deleted
    }

    /// Deleted slots still held in the graph.
    pub fn deleted_len(&self) -> usize {
        self.deleted
    }

    /// Dimension fixed by the first insert.
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    /// Insert a vector and return its slot.
    pub fn insert(&mut self, vector: &[f32]) -> Result<u32, HnswError> {
        if vector.is_empty() {
            return Err(HnswError::EmptyVector);
        }
        match self.dimension {
            Some(expected) if expected != vector.len() => {
                return Err(HnswError::DimensionMismatch {
                    expected,
                    got: vector.len(),
                });
            }
            Some(_) => {}
            None => self.dimension = Some(vector.len()),
        }

        let slot = self.nodes.len() as u32;
        let level = self.select_level();
        let normalized = normalize(vector);
        self.nodes.push(Node {
            vector: normalized.clone(),
            neighbors: vec![Vec::new(); level as usize + 1],
            deleted: false,
        });

        let Some(mut entry) = self.entry_point else {
            self.entry_point = Some(slot);
            return Ok(slot);
        };

        let top = self.nodes[entry as usize].level();
        for layer in (level as usize + 1..=top).rev() {
            entry = self.greedy_closest(entry, &normalized, layer);
        }

        for layer in (0..=(level as usize).min(top)).rev() {
            let found = self.search_layer(entry, &normalized, self.ef_construction, layer);
            let limit = if layer == 0 { self.m_max0 } else { self.m };
            let selected: Vec<u32> = found.iter().take(limit).map(|s| s.slot).collect();

            for &neighbor in &selected {
                self.link(slot, neighbor, layer);
                self.link(neighbor, slot, layer);
                self.prune(neighbor, layer, limit);
            }
            if let Some(best) = found.first() {
                entry = best.slot;
            }
        }

        if level as usize > top {
            self.entry_point = Some(slot);
        }
        Ok(slot)
    }

    /// Mark a slot as deleted. Returns `false` when the slot is unknown or already deleted.
    pub fn delete(&mut self, slot: u32) -> bool {
        match self.nodes.get_mut(slot as usize) {
            Some(node) if !node.deleted => {
                node.deleted = true;
                self.deleted += 1;
                true
            }
            _ => false,
        }
    }

    /// The `k` live slots most similar to `query`, by cosine similarity descending, ties by slot.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(u32, f32)> {
        if k == 0 || self.live_len() == 0 || Some(query.len()) != self.dimension {
            return Vec::new();
        }
        let query = normalize(query);
        let ef = k.max(self.ef_construction);

        let mut found = if self.nodes.len() <= ef {
            self.scan(&query)
        } else {
            let Some(mut entry) = self.entry_point else {
                return Vec::new();
            };
            for layer in (1..=self.nodes[entry as usize].level()).rev() {
                entry = self.greedy_closest(entry, &query, layer);
            }
            self.search_layer(entry, &query, ef, 0)
        };

        found.retain(|s| !self.nodes[s.slot as usize].deleted);
        found.truncate(k);
        found.into_iter().map(|s| (s.slot, s.score)).collect()
    }

    fn scan(&self, query: &[f32]) -> Vec<Scored> {
        let mut all: Vec<Scored> = (0..self.nodes.len() as u32)
            .map(|slot| Scored {
                score: self.similarity(slot, query),
                slot,
            })
            .collect();
        all.sort_by(|a, b| b.cmp(a));
        all
    }

    fn select_level(&mut self) -> u8 {
        self.rng_state = self
            .rng_state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1);
        let uniform = ((self.rng_state >> 33) as f32 / (u32::MAX >> 1) as f32).clamp(1e-7, 1.0);
        let level = (-uniform.ln() * self.level_mult).floor();
        (level as u8).min(MAX_LEVEL)
    }

    fn similarity(&self, slot: u32, query: &[f32]) -> f32 {
        dot(&self.nodes[slot as usize].vector, query)
    }

    fn greedy_closest(&self, entry: u32, query: &[f32], layer: usize) -> u32 {
        let mut current = entry;
        let mut best = self.similarity(current, query);
        loop {
            let mut moved = false;
            for &neighbor in self.neighbors(current, layer) {
                let score = self.similarity(neighbor, query);
                if score > best {
                    best = score;
                    current = neighbor;
                    moved = true;
                }
            }
            if !moved {
                return current;
            }
        }
    }

    /// Beam search on one layer. Deleted nodes are traversed but still reported; callers filter.
    fn search_layer(&self, entry: u32, query: &[f32], ef: usize, layer: usize) -> Vec<Scored> {
        let start = Scored {
            score: self.similarity(entry, query),
            slot: entry,
        };
        let mut visited = HashSet::from([entry]);
        let mut candidates = BinaryHeap::from([start]);
        let mut results = BinaryHeap::from([Reverse(start)]);

        while let Some(candidate) = candidates.pop() {
            let worst = results.peek().map(|r| r.0.score).unwrap_or(f32::NEG_INFINITY);
            if candidate.score < worst && results.len() >= ef {
                break;
            }
            for &neighbor in self.neighbors(candidate.slot, layer) {
                if !visited.insert(neighbor) {
                    continue;
                }
                let scored = Scored {
                    score: self.similarity(neighbor, query),
                    slot: neighbor,
                };
                let worst = results.peek().map(|r| r.0.score).unwrap_or(f32::NEG_INFINITY);
                if results.len() < ef || scored.score > worst {
                    candidates.push(scored);
                    results.push(Reverse(scored));
                    if results.len() > ef {
                        results.pop();
                    }
                }
            }
        }

        let mut ordered: Vec<Scored> = results.into_iter().map(|r| r.0).collect();
        ordered.sort_by(|a, b| b.cmp(a));
        ordered
    }

    fn neighbors(&self, slot: u32, layer: usize) -> &[u32] {
        self.nodes[slot as usize]
            .neighbors
            .get(layer)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn link(&mut self, from: u32, to: u32, layer: usize) {
        if let Some(list) = self.nodes[from as usize].neighbors.get_mut(layer) {
            if !list.contains(&to) {
                list.push(to);
            }
        }
    }

    fn prune(&mut self, slot: u32, layer: usize, limit: usize) {
        let neighbors = self.neighbors(slot, layer);
        if neighbors.len() <= limit {
            return;
        }
        let base = &self.nodes[slot as usize].vector;
        let mut scored: Vec<Scored> = neighbors
            .iter()
            .map(|&neighbor| Scored {
                score: dot(base, &self.nodes[neighbor as usize].vector),
                slot: neighbor,
            })
            .collect();
        scored.sort_by(|a, b| b.cmp(a));
        scored.truncate(limit);
        self.nodes[slot as usize].neighbors[layer] = scored.into_iter().map(|s| s.slot).collect();
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Scale `vector` to unit length. Zero vectors stay zero and score 0 against everything.
pub fn normalize(vector: &[f32]) -> Vec<f32> {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        vector.iter().map(|v| v / norm).collect()
    } else {
        vector.to_vec()
    }
}
