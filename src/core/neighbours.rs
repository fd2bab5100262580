//! Destination selection for a source point
//!
//! Every policy ranks candidates by ascending distance with ascending id as
//! the tie-break. An empty selection under a radius policy is reported as
//! `Error::NoCandidates`; it is the only "empty" signal.

use crate::core::distance::DistanceMatrix;
use crate::core::error::{Error, Result};

/// Which destinations a source point draws paths to
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SelectionPolicy {
    /// Every other point, ascending id
    All,
    /// Points at distance `<= r`
    WithinRadius(f64),
    /// The `k` nearest points
    KNearest(usize),
    /// At most `k` of the points within `radius`
    KNearestWithinRadius { k: usize, radius: f64 },
}

impl SelectionPolicy {
    /// Build a policy from the tool parameters, where 0 means unlimited
    pub fn from_limits(radius: f64, nearest: usize) -> Result<Self> {
        if !radius.is_finite() || radius < 0.0 {
            return Err(Error::InvalidInput(
                "Invalid radius value. Enter 0 for unlimited or positive number for search radius in map units"
                    .to_string(),
            ));
        }

        Ok(match (radius > 0.0, nearest > 0) {
            (true, true) => SelectionPolicy::KNearestWithinRadius { k: nearest, radius },
            (true, false) => SelectionPolicy::WithinRadius(radius),
            (false, true) => SelectionPolicy::KNearest(nearest),
            (false, false) => SelectionPolicy::All,
        })
    }

    /// Check the policy against the number of points before any work starts
    pub fn validate(&self, total: usize) -> Result<()> {
        match *self {
            SelectionPolicy::KNearest(k) | SelectionPolicy::KNearestWithinRadius { k, .. } => {
                if k == 0 || k >= total {
                    return Err(Error::InvalidK { k, total });
                }
            }
            SelectionPolicy::WithinRadius(r) => {
                if !r.is_finite() || r < 0.0 {
                    return Err(Error::InvalidInput(format!("Invalid radius {r}")));
                }
            }
            SelectionPolicy::All => {}
        }
        Ok(())
    }
}

/// Destination ids chosen for one source point, in selection order
#[derive(Debug, Clone, PartialEq)]
pub struct NeighbourSet {
    pub source: u32,
    pub ids: Vec<u32>,
}

impl NeighbourSet {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Selects destinations from a prebuilt distance matrix; no side effects
pub struct NeighbourSelector<'a> {
    matrix: &'a DistanceMatrix,
}

impl<'a> NeighbourSelector<'a> {
    pub fn new(matrix: &'a DistanceMatrix) -> Self {
        Self { matrix }
    }

    /// Select destinations for `source` under `policy`
    pub fn select(&self, source: u32, policy: &SelectionPolicy) -> Result<NeighbourSet> {
        policy.validate(self.matrix.len())?;

        let ranked = self.matrix.ranked_from(source).ok_or_else(|| {
            Error::InvalidInput(format!("Point {source} is not part of the point set"))
        })?;

        let ids: Vec<u32> = match *policy {
            SelectionPolicy::All => self
                .matrix
                .ids()
                .iter()
                .copied()
                .filter(|&id| id != source)
                .collect(),
            SelectionPolicy::WithinRadius(r) => within(&ranked, r).collect(),
            SelectionPolicy::KNearest(k) => ranked.iter().take(k).map(|&(id, _)| id).collect(),
            SelectionPolicy::KNearestWithinRadius { k, radius } => {
                within(&ranked, radius).take(k).collect()
            }
        };

        if ids.is_empty() {
            return Err(Error::NoCandidates { source_id: source });
        }

        Ok(NeighbourSet { source, ids })
    }
}

fn within(ranked: &[(u32, f64)], radius: f64) -> impl Iterator<Item = u32> + '_ {
    ranked
        .iter()
        .take_while(move |&&(_, d)| d <= radius)
        .map(|&(id, _)| id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::points::{Point, PointSet};

    fn square() -> DistanceMatrix {
        DistanceMatrix::build(
            &PointSet::from_points(vec![
                Point::new(1, 0.0, 0.0),
                Point::new(2, 10.0, 0.0),
                Point::new(3, 0.0, 10.0),
                Point::new(4, 10.0, 10.0),
            ])
            .unwrap(),
        )
        .unwrap()
    }

    fn line(n: u32) -> DistanceMatrix {
        DistanceMatrix::build(
            &PointSet::from_points((1..=n).map(|i| Point::new(i, i as f64 * 3.0, 0.0)).collect())
                .unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_from_limits() {
        assert_eq!(SelectionPolicy::from_limits(0.0, 0).unwrap(), SelectionPolicy::All);
        assert_eq!(SelectionPolicy::from_limits(5.0, 0).unwrap(), SelectionPolicy::WithinRadius(5.0));
        assert_eq!(SelectionPolicy::from_limits(0.0, 2).unwrap(), SelectionPolicy::KNearest(2));
        assert_eq!(
            SelectionPolicy::from_limits(5.0, 2).unwrap(),
            SelectionPolicy::KNearestWithinRadius { k: 2, radius: 5.0 }
        );
        assert!(matches!(SelectionPolicy::from_limits(-1.0, 0), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_all_excludes_source() {
        let matrix = square();
        let selector = NeighbourSelector::new(&matrix);
        let set = selector.select(3, &SelectionPolicy::All).unwrap();
        assert_eq!(set.ids, vec![1, 2, 4]);
    }

    #[test]
    fn test_k_nearest_tie_break() {
        let matrix = square();
        let selector = NeighbourSelector::new(&matrix);
        // 2 and 3 are both 10.0 away from 1
        let set = selector.select(1, &SelectionPolicy::KNearest(1)).unwrap();
        assert_eq!(set.ids, vec![2]);
    }

    #[test]
    fn test_k_nearest_properties() {
        let matrix = line(8);
        let selector = NeighbourSelector::new(&matrix);
        for &source in matrix.ids() {
            for k in 1..8 {
                let set = selector.select(source, &SelectionPolicy::KNearest(k)).unwrap();
                assert_eq!(set.len(), k);
                assert!(!set.ids.contains(&source));

                let mut unique = set.ids.clone();
                unique.sort_unstable();
                unique.dedup();
                assert_eq!(unique.len(), k);

                let keys: Vec<(f64, u32)> = set
                    .ids
                    .iter()
                    .map(|&id| (matrix.distance(source, id).unwrap(), id))
                    .collect();
                assert!(keys.windows(2).all(|w| w[0].0 < w[1].0 || (w[0].0 == w[1].0 && w[0].1 < w[1].1)));
            }
        }
    }

    #[test]
    fn test_invalid_k() {
        let matrix = square();
        let selector = NeighbourSelector::new(&matrix);
        assert!(matches!(
            selector.select(1, &SelectionPolicy::KNearest(4)),
            Err(Error::InvalidK { k: 4, total: 4 })
        ));
        assert!(matches!(
            selector.select(1, &SelectionPolicy::KNearest(0)),
            Err(Error::InvalidK { k: 0, .. })
        ));
        assert!(matches!(
            selector.select(1, &SelectionPolicy::KNearestWithinRadius { k: 9, radius: 50.0 }),
            Err(Error::InvalidK { .. })
        ));
    }

    #[test]
    fn test_within_radius() {
        let matrix = square();
        let selector = NeighbourSelector::new(&matrix);

        let set = selector.select(1, &SelectionPolicy::WithinRadius(10.0)).unwrap();
        assert_eq!(set.ids, vec![2, 3]);

        let set = selector.select(1, &SelectionPolicy::WithinRadius(15.0)).unwrap();
        assert_eq!(set.ids, vec![2, 3, 4]);
    }

    #[test]
    fn test_within_radius_empty_signals_no_candidates() {
        let matrix = square();
        let selector = NeighbourSelector::new(&matrix);
        assert!(matches!(
            selector.select(1, &SelectionPolicy::WithinRadius(5.0)),
            Err(Error::NoCandidates { source_id: 1 })
        ));
        for &id in matrix.ids() {
            assert!(matches!(
                selector.select(id, &SelectionPolicy::WithinRadius(0.0)),
                Err(Error::NoCandidates { .. })
            ));
        }
    }

    #[test]
    fn test_k_nearest_within_radius() {
        let matrix = line(6);
        let selector = NeighbourSelector::new(&matrix);

        // radius 6 around point 3 (x=9): points 1,2,4,5 -> ranked 2,4,1,5
        let set = selector
            .select(3, &SelectionPolicy::KNearestWithinRadius { k: 3, radius: 6.0 })
            .unwrap();
        assert_eq!(set.ids, vec![2, 4, 1]);

        // fewer points in radius than k
        let set = selector
            .select(1, &SelectionPolicy::KNearestWithinRadius { k: 4, radius: 6.0 })
            .unwrap();
        assert_eq!(set.ids, vec![2, 3]);

        assert!(matches!(
            selector.select(1, &SelectionPolicy::KNearestWithinRadius { k: 2, radius: 1.0 }),
            Err(Error::NoCandidates { source_id: 1 })
        ));
    }

    #[test]
    fn test_unknown_source() {
        let matrix = square();
        let selector = NeighbourSelector::new(&matrix);
        assert!(matches!(
            selector.select(42, &SelectionPolicy::All),
            Err(Error::InvalidInput(_))
        ));
    }
}
