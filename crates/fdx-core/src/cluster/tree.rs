//! Binary merge trees (dendrograms) over documents.
//!
//! Node ids `0..n_leaves` are documents. Merge `i` creates node
//! `n_leaves + i` from the two ids in `children[i]`, at height
//! `distances[i]`. A complete tree over `n` leaves has `n - 1` merges.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterTree {
    pub n_leaves: usize,
    pub children: Vec<[usize; 2]>,
    pub distances: Vec<f64>,
}

/// A node of the tree in a flattened, JSON-friendly view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeNode {
    pub id: usize,
    pub children: Vec<usize>,
    pub distance: f64,
    pub n_leaves: usize,
}

impl ClusterTree {
    /// Validate and wrap a merge list.
    pub fn new(
        n_leaves: usize,
        children: Vec<[usize; 2]>,
        distances: Vec<f64>,
    ) -> CoreResult<Self> {
        if children.len() != distances.len() {
            return Err(CoreError::invalid("one distance is required per merge"));
        }
        if n_leaves > 0 && children.len() >= n_leaves {
            return Err(CoreError::invalid(format!(
                "{} merges is too many for {} leaves",
                children.len(),
                n_leaves
            )));
        }
        let mut used = vec![false; n_leaves + children.len()];
        for (i, pair) in children.iter().enumerate() {
            let node = n_leaves + i;
            for &child in pair {
                if child >= node {
                    return Err(CoreError::invalid(format!(
                        "merge {} references node {} before it exists",
                        i, child
                    )));
                }
                if used[child] {
                    return Err(CoreError::invalid(format!("node {} merged twice", child)));
                }
                used[child] = true;
            }
            if pair[0] == pair[1] {
                return Err(CoreError::invalid(format!("merge {} joins a node with itself", i)));
            }
        }
        Ok(Self {
            n_leaves,
            children,
            distances,
        })
    }

    pub fn n_leaves(&self) -> usize {
        self.n_leaves
    }

    pub fn n_merges(&self) -> usize {
        self.children.len()
    }

    /// True when every leaf hangs under a single root.
    pub fn is_complete(&self) -> bool {
        self.n_leaves == 0 || self.children.len() + 1 == self.n_leaves
    }

    /// Flat labels obtained by undoing the last merges until at most
    /// `n_clusters` groups remain. Labels are numbered by first appearance
    /// in leaf order.
    pub fn cut(&self, n_clusters: usize) -> Vec<i64> {
        let mut parent: Vec<usize> = (0..self.n_leaves).collect();
        let keep = self
            .n_leaves
            .saturating_sub(n_clusters.max(1))
            .min(self.children.len());

        // representative leaf of every node, so merges map onto union-find
        let mut repr: Vec<usize> = (0..self.n_leaves).collect();
        for (i, [a, b]) in self.children.iter().enumerate() {
            let (ra, rb) = (repr[*a], repr[*b]);
            if i < keep {
                let (fa, fb) = (find(&mut parent, ra), find(&mut parent, rb));
                if fa != fb {
                    parent[fb.max(fa)] = fa.min(fb);
                }
            }
            repr.push(ra);
        }

        let mut ids: Vec<Option<i64>> = vec![None; self.n_leaves];
        let mut next = 0i64;
        (0..self.n_leaves)
            .map(|leaf| {
                let root = find(&mut parent, leaf);
                *ids[root].get_or_insert_with(|| {
                    next += 1;
                    next - 1
                })
            })
            .collect()
    }

    /// Leaves below `node`, in ascending order.
    pub fn leaves_under(&self, node: usize) -> Vec<usize> {
        let mut out = Vec::new();
        let mut stack = vec![node];
        while let Some(n) = stack.pop() {
            if n < self.n_leaves {
                out.push(n);
            } else if let Some(pair) = self.children.get(n - self.n_leaves) {
                stack.extend_from_slice(pair);
            }
        }
        out.sort_unstable();
        out
    }

    /// Every merge node with its subtree size, in merge order.
    pub fn nodes(&self) -> Vec<TreeNode> {
        let mut sizes: Vec<usize> = vec![1; self.n_leaves];
        self.children
            .iter()
            .zip(self.distances.iter())
            .enumerate()
            .map(|(i, (pair, distance))| {
                let size = sizes[pair[0]] + sizes[pair[1]];
                sizes.push(size);
                TreeNode {
                    id: self.n_leaves + i,
                    children: pair.to_vec(),
                    distance: *distance,
                    n_leaves: size,
                }
            })
            .collect()
    }
}

pub(crate) fn find(parent: &mut [usize], mut x: usize) -> usize {
    while parent[x] != x {
        parent[x] = parent[parent[x]];
        x = parent[x];
    }
    x
}
