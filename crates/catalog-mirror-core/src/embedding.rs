//! Embedding trait and vector utilities.
//!
//! Concrete embedders (fastembed, Ollama) live in the `catalog-mirror` app
//! crate. Everything here is pure math over `f32` slices plus the BLOB
//! encoding used to persist vectors.

use anyhow::Result;
use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// A text embedding function.
///
/// Implementations must return one vector per input text, in input order.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier stored next to each vector (e.g. `"all-minilm-l6-v2"`).
    fn model_name(&self) -> &str;
    /// Output dimensionality.
    fn dims(&self) -> usize;
    /// Embed a batch of texts.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// ```rust
/// use catalog_mirror_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12);
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector. Trailing bytes that do not form
/// a whole `f32` are ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Scale `v` to unit length in place. Zero vectors are left unchanged and
/// reported as `false`.
pub fn l2_normalize(v: &mut [f32]) -> bool {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm < f32::EPSILON || !norm.is_finite() {
        return false;
    }
    for x in v.iter_mut() {
        *x /= norm;
    }
    true
}

/// Euclidean distance. Mismatched or empty inputs are infinitely far apart.
pub fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return f32::INFINITY;
    }
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

#[derive(Debug)]
struct Neighbor {
    distance: f32,
    id: String,
}

impl PartialEq for Neighbor {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Neighbor {}

impl PartialOrd for Neighbor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Neighbor {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// Bounded collection of the `k` closest ids seen so far.
///
/// Backed by a max-heap on distance, so each push is `O(log k)` and memory
/// stays at `k` entries no matter how many vectors are scanned. Ties on
/// distance keep the lexicographically smaller id.
#[derive(Debug)]
pub struct NearestK {
    k: usize,
    heap: BinaryHeap<Neighbor>,
}

impl NearestK {
    pub fn new(k: usize) -> Self {
        Self {
            k,
            heap: BinaryHeap::with_capacity(k + 1),
        }
    }

    /// Offer a candidate. Non-finite distances are ignored.
    pub fn push(&mut self, id: &str, distance: f32) {
        if self.k == 0 || !distance.is_finite() {
            return;
        }
        let candidate = Neighbor {
            distance,
            id: id.to_string(),
        };
        if self.heap.len() < self.k {
            self.heap.push(candidate);
        } else if let Some(worst) = self.heap.peek() {
            if candidate < *worst {
                self.heap.pop();
                self.heap.push(candidate);
            }
        }
    }

    /// The collected neighbours ordered by ascending distance.
    pub fn into_sorted(self) -> Vec<(String, f32)> {
        self.heap
            .into_sorted_vec()
            .into_iter()
            .map(|n| (n.id, n.distance))
            .collect()
    }
}
