//! Lane scheduler for point-pair path generation
//!
//! Items are processed in batches of `width` lanes. Inside a batch the lanes
//! run concurrently and only wait on their own external steps. The fold of a
//! batch runs while the next batch's lanes are already working: lane rasters
//! alternate between two parity sets, so a fold never reads names the
//! following batch writes. The next fold still waits for the previous one,
//! because its relabel moves the accumulator the previous fold wrote.

use std::fmt;
use std::sync::Arc;

use futures::future::{try_join, try_join_all, LocalBoxFuture};
use futures::FutureExt;

use crate::core::accumulator::{FoldStep, PathAccumulator};
use crate::core::error::Result;
use crate::core::gis::Gis;

/// Progress callback: `(completed iterations, total iterations)`
pub type ProgressCallback = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// Where a lane is in its pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaneState {
    Idle,
    NeighboursResolved,
    CostSurfaceRunning,
    CostSurfaceDone,
    DrainRunning,
    DrainDone,
}

impl LaneState {
    pub fn can_advance_to(self, next: LaneState) -> bool {
        use LaneState::*;
        matches!(
            (self, next),
            (Idle, NeighboursResolved)
                | (Idle, CostSurfaceRunning)
                | (NeighboursResolved, CostSurfaceRunning)
                | (CostSurfaceRunning, CostSurfaceDone)
                | (CostSurfaceDone, DrainRunning)
                | (CostSurfaceDone, Idle)
                | (DrainRunning, DrainDone)
                | (DrainDone, Idle)
        )
    }
}

impl fmt::Display for LaneState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One lane of one iteration
#[derive(Debug)]
pub struct Lane {
    index: usize,
    iteration: usize,
    state: LaneState,
}

impl Lane {
    pub fn new(index: usize, iteration: usize) -> Self {
        Self {
            index,
            iteration,
            state: LaneState::Idle,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn iteration(&self) -> usize {
        self.iteration
    }

    /// Which of the two name sets this lane writes to
    pub fn parity(&self) -> usize {
        self.iteration % 2
    }

    pub fn state(&self) -> LaneState {
        self.state
    }

    pub fn advance(&mut self, next: LaneState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "lane {} cannot go from {} to {}",
            self.index,
            self.state,
            next
        );
        log::trace!(
            "Iteration {} lane {}: {} -> {}",
            self.iteration,
            self.index,
            self.state,
            next
        );
        self.state = next;
    }
}

/// Names produced by a lane that contributed to an iteration
#[derive(Debug, Clone, PartialEq)]
pub struct LaneOutput {
    pub lane: usize,
    /// Raster folded into the accumulator
    pub raster: String,
    /// Optional vector handed to [`LaneWork::collect`]
    pub vector: Option<String>,
}

/// Per-item work driven by the [`Scheduler`]
#[allow(async_fn_in_trait)]
pub trait LaneWork<G: Gis> {
    type Item;

    /// Run one item's external steps.
    ///
    /// A non-fatal error (`NoCandidates`) skips this lane's contribution.
    async fn process(&self, gis: &G, lane: &mut Lane, item: &Self::Item) -> Result<Option<LaneOutput>>;

    /// Consume an iteration's outputs after its fold, in iteration order
    async fn collect(&self, _gis: &G, _iteration: usize, _outputs: &[LaneOutput]) -> Result<()> {
        Ok(())
    }
}

/// Counters for a finished run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub iterations: usize,
    pub lane_runs: usize,
    pub skipped_lanes: usize,
    pub folds: usize,
}

/// Drives [`LaneWork`] over items `width` at a time
#[derive(Debug, Clone, Copy)]
pub struct Scheduler {
    width: usize,
}

impl Scheduler {
    pub fn new(width: usize) -> Self {
        Self {
            width: width.max(1),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Number of iterations needed for `items` items
    pub fn iterations(&self, items: usize) -> usize {
        items.div_ceil(self.width)
    }

    pub async fn run<G, W>(
        &self,
        gis: &G,
        work: &W,
        items: &[W::Item],
        mut accumulator: Option<&mut PathAccumulator>,
        progress: Option<&ProgressCallback>,
    ) -> Result<RunSummary>
    where
        G: Gis,
        W: LaneWork<G>,
    {
        let total = self.iterations(items.len());
        let mut summary = RunSummary::default();
        let mut pending: Option<(usize, LocalBoxFuture<'_, Result<()>>)> = None;

        for (iteration, batch) in items.chunks(self.width).enumerate() {
            let lanes = try_join_all(batch.iter().enumerate().map(move |(index, item)| async move {
                let mut lane = Lane::new(index, iteration);
                match work.process(gis, &mut lane, item).await {
                    Ok(output) => {
                        if output.is_some() {
                            lane.advance(LaneState::Idle);
                        }
                        Ok(output)
                    }
                    Err(e) if !e.is_fatal() => {
                        log::warn!("Iteration {iteration} lane {index}: {e}, skipping");
                        Ok(None)
                    }
                    Err(e) => Err(e.at_iteration(iteration)),
                }
            }));

            let previous = async {
                match pending.take() {
                    Some((index, fold)) => fold.await.map_err(|e| e.at_iteration(index)),
                    None => Ok(()),
                }
            };

            let (results, ()) = try_join(lanes, previous).await?;

            let outputs: Vec<LaneOutput> = results.into_iter().flatten().collect();
            summary.iterations += 1;
            summary.lane_runs += batch.len();
            summary.skipped_lanes += batch.len() - outputs.len();

            log::info!(
                "Iteration {}/{}: {} of {} lanes produced output",
                iteration + 1,
                total,
                outputs.len(),
                batch.len()
            );
            if let Some(progress) = progress {
                progress(iteration as u64 + 1, total as u64);
            }

            // Planning is synchronous so the pending fold never borrows the accumulator
            let rasters: Vec<String> = outputs.iter().map(|o| o.raster.clone()).collect();
            let step: Option<FoldStep> = accumulator.as_deref_mut().and_then(|acc| acc.plan(&rasters));

            let fold = async move {
                if let Some(step) = step {
                    step.execute(gis).await?;
                }
                work.collect(gis, iteration, &outputs).await
            };
            pending = Some((iteration, fold.boxed_local()));
        }

        if let Some((index, fold)) = pending.take() {
            fold.await.map_err(|e| e.at_iteration(index))?;
        }

        if let Some(acc) = accumulator {
            acc.finish(gis).await?;
            summary.folds = acc.folds();
        }

        Ok(summary)
    }
}
