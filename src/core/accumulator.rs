//! Running path-count raster built from per-iteration lane outputs
//!
//! `r.mapcalc` cannot use its output as an input, so every fold after the
//! first relabels the accumulator to a second slot and recombines from there.

use crate::core::algebra::{Expression, Term};
use crate::core::error::Result;
use crate::core::gis::Gis;

/// The two raster names an accumulator alternates between
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DoubleBuffer {
    /// Name holding the up-to-date count, and the final output
    pub current: String,
    /// Slot the current count is moved to before the next fold reads it
    pub previous: String,
}

/// One planned fold, owned so it can run while the next lanes are working
#[derive(Debug, Clone, PartialEq)]
pub enum FoldStep {
    /// `current = Σ indicator(lane)`
    Initialize {
        output: String,
        contributions: Vec<String>,
    },
    /// Move `current` to `previous`, then `current = previous + Σ indicator(lane)`
    Accumulate {
        output: String,
        previous: String,
        contributions: Vec<String>,
    },
}

impl FoldStep {
    pub fn expression(&self) -> Expression {
        match self {
            FoldStep::Initialize {
                output,
                contributions,
            } => Expression::new(output.as_str()).indicators(contributions.iter().cloned()),
            FoldStep::Accumulate {
                output,
                previous,
                contributions,
            } => Expression::new(output.as_str())
                .term(Term::ValueOrZero(previous.clone()))
                .indicators(contributions.iter().cloned()),
        }
    }

    /// Run the fold. The relabel always completes before the new sum is written.
    pub async fn execute<G: Gis>(&self, gis: &G) -> Result<()> {
        if let FoldStep::Accumulate {
            output, previous, ..
        } = self
        {
            gis.rename_raster(output, previous).await?;
        }
        gis.map_calc(&self.expression()).await
    }
}

/// Integer count of how many lane outputs covered each cell
#[derive(Debug)]
pub struct PathAccumulator {
    buffer: DoubleBuffer,
    folds: usize,
    null_zero: bool,
}

impl PathAccumulator {
    /// `null_zero` reclassifies cells no path ever crossed to null on [`finish`](Self::finish)
    pub fn new(output: impl Into<String>, previous: impl Into<String>, null_zero: bool) -> Self {
        Self {
            buffer: DoubleBuffer {
                current: output.into(),
                previous: previous.into(),
            },
            folds: 0,
            null_zero,
        }
    }

    pub fn output(&self) -> &str {
        &self.buffer.current
    }

    pub fn buffer(&self) -> &DoubleBuffer {
        &self.buffer
    }

    /// Number of folds planned so far
    pub fn folds(&self) -> usize {
        self.folds
    }

    /// Plan the fold for one iteration's lane rasters.
    ///
    /// The first fold always initializes the output, even with no
    /// contributions, so the output exists for later folds. Later iterations
    /// without contributions need no fold.
    pub fn plan(&mut self, contributions: &[String]) -> Option<FoldStep> {
        let contributions = contributions.to_vec();
        let step = if self.folds == 0 {
            FoldStep::Initialize {
                output: self.buffer.current.clone(),
                contributions,
            }
        } else if contributions.is_empty() {
            return None;
        } else {
            FoldStep::Accumulate {
                output: self.buffer.current.clone(),
                previous: self.buffer.previous.clone(),
                contributions,
            }
        };
        self.folds += 1;
        Some(step)
    }

    /// Plan and run the fold for `iteration` in one go
    pub async fn fold_new_paths<G: Gis>(
        &mut self,
        gis: &G,
        iteration: usize,
        lane_outputs: &[String],
    ) -> Result<()> {
        match self.plan(lane_outputs) {
            Some(step) => {
                log::debug!("Fold {} of iteration {}: {}", self.folds, iteration, step.expression());
                step.execute(gis).await
            }
            None => Ok(()),
        }
    }

    /// Reclassify 0 to null once all folds are done
    pub async fn finish<G: Gis>(&self, gis: &G) -> Result<()> {
        if self.null_zero && self.folds > 0 {
            gis.set_null(&self.buffer.current, 0).await?;
        }
        Ok(())
    }
}
