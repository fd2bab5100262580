//! Pairwise Euclidean distances between all points of a run

use std::collections::HashMap;

use crate::core::error::{Error, Result};
use crate::core::points::PointSet;

/// Dense n×n distance table keyed by point id
///
/// Only unordered pairs are computed; each value is written into both
/// directions, so `(a, b)` and `(b, a)` are always identical.
#[derive(Debug, Clone)]
pub struct DistanceMatrix {
    ids: Vec<u32>,
    index: HashMap<u32, usize>,
    values: Vec<f64>,
}

impl DistanceMatrix {
    /// Compute all pairwise distances. Needs at least two points.
    pub fn build(points: &PointSet) -> Result<Self> {
        let n = points.len();
        if n < 2 {
            return Err(Error::InsufficientPoints { found: n });
        }

        let ids = points.ids();
        let index = ids.iter().enumerate().map(|(i, &id)| (id, i)).collect();
        let coords: Vec<_> = points.iter().map(|p| p.coordinate()).collect();

        let mut values = vec![0.0; n * n];
        for i in 0..n {
            for j in (i + 1)..n {
                let d = coords[i].distance(&coords[j]);
                values[i * n + j] = d;
                values[j * n + i] = d;
            }
        }

        log::debug!("Distance matrix built for {} points ({} pairs)", n, n * (n - 1) / 2);
        Ok(Self { ids, index, values })
    }

    /// Number of points in the matrix
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn contains(&self, id: u32) -> bool {
        self.index.contains_key(&id)
    }

    /// Point ids in ascending order
    pub fn ids(&self) -> &[u32] {
        &self.ids
    }

    /// Distance between two distinct known points
    pub fn distance(&self, source: u32, target: u32) -> Option<f64> {
        if source == target {
            return None;
        }
        let i = *self.index.get(&source)?;
        let j = *self.index.get(&target)?;
        Some(self.values[i * self.ids.len() + j])
    }

    /// All other points ordered by ascending distance, ties by ascending id
    pub fn ranked_from(&self, source: u32) -> Option<Vec<(u32, f64)>> {
        let i = *self.index.get(&source)?;
        let n = self.ids.len();

        // ids are ascending, so a stable sort on distance keeps id order for ties
        let mut ranked: Vec<(u32, f64)> = self
            .ids
            .iter()
            .enumerate()
            .filter(|&(j, _)| j != i)
            .map(|(j, &id)| (id, self.values[i * n + j]))
            .collect();
        ranked.sort_by(|a, b| a.1.total_cmp(&b.1));

        Some(ranked)
    }
}
