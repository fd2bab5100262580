//! Cost-distance nearest neighbour statistics
//!
//! Compares the mean least-cost distance from each point to its nearest
//! neighbour with the same statistic over random point patterns of equal
//! size. An observed mean above the upper envelope suggests a dispersed
//! pattern, below the lower envelope a clustered one.

use serde::Serialize;

use crate::core::context::RunContext;
use crate::core::error::{Error, LayerKind, Result};
use crate::core::gis::{Gis, GisCommand};
use crate::tools::lcp::{self, LcpOptions};

#[derive(Debug, Clone)]
pub struct CostNnOptions {
    pub friction: String,
    pub points: String,
    /// Number of random patterns
    pub sims: usize,
    pub knight: bool,
    pub lanes: usize,
    pub memory_mb: Option<u32>,
}

impl Default for CostNnOptions {
    fn default() -> Self {
        Self {
            friction: String::new(),
            points: String::new(),
            sims: 1,
            knight: false,
            lanes: 2,
            memory_mb: None,
        }
    }
}

impl CostNnOptions {
    pub fn validate(&self) -> Result<()> {
        if self.sims == 0 {
            return Err(Error::InvalidInput("Number of simulations must be at least 1".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CostNnReport {
    /// Mean nearest-neighbour cost of the input points
    pub observed_mean: f64,
    pub points: usize,
    /// Mean of the per-pattern means of the random patterns
    pub simulated_mean: f64,
    pub stddev: f64,
    pub upper95: f64,
    pub lower95: f64,
    pub upper99: f64,
    pub lower99: f64,
    pub simulations: Vec<f64>,
}

impl CostNnReport {
    /// Summarize simulation means; the standard deviation is the sample one
    pub fn from_samples(observed_mean: f64, points: usize, simulations: Vec<f64>) -> Result<Self> {
        if simulations.is_empty() {
            return Err(Error::InvalidInput("At least one simulation is needed".to_string()));
        }
        let n = simulations.len() as f64;
        let simulated_mean = simulations.iter().sum::<f64>() / n;
        let stddev = if simulations.len() > 1 {
            let squares: f64 = simulations.iter().map(|m| (m - simulated_mean).powi(2)).sum();
            (squares / (n - 1.0)).sqrt()
        } else {
            0.0
        };

        Ok(Self {
            observed_mean,
            points,
            simulated_mean,
            stddev,
            upper95: simulated_mean + 1.96 * stddev,
            lower95: simulated_mean - 1.96 * stddev,
            upper99: simulated_mean + 2.58 * stddev,
            lower99: simulated_mean - 2.58 * stddev,
            simulations,
        })
    }
}

pub async fn run<G: Gis>(gis: &G, options: &CostNnOptions) -> Result<CostNnReport> {
    options.validate()?;
    gis.require(LayerKind::Raster, &options.friction).await?;
    gis.require(LayerKind::Vector, &options.points).await?;

    let ctx = RunContext::new("costnn");
    ctx.guard(gis, async {
        let (observed_mean, points) = mean_nearest_cost(gis, &ctx, options, &options.points, "observed").await?;
        log::info!("Observed mean nearest neighbour cost {observed_mean} over {points} points");

        let random = ctx.vector("random");
        let mut simulations = Vec::with_capacity(options.sims);
        for sim in 0..options.sims {
            gis.run(
                &GisCommand::new("v.random")
                    .overwrite()
                    .quiet()
                    .param("output", &random)
                    .param("npoints", points),
            )
            .await?;
            let (mean, _) = mean_nearest_cost(gis, &ctx, options, &random, "monte").await?;
            log::info!("Simulation {}/{}: mean {mean}", sim + 1, options.sims);
            simulations.push(mean);
        }

        CostNnReport::from_samples(observed_mean, points, simulations)
    })
    .await
}

/// Mean cost from each point to its nearest neighbour and the number of paths
async fn mean_nearest_cost<G: Gis>(
    gis: &G,
    ctx: &RunContext,
    options: &CostNnOptions,
    points: &str,
    stem: &str,
) -> Result<(f64, usize)> {
    let report = lcp::run(
        gis,
        &LcpOptions {
            friction: options.friction.clone(),
            points: points.to_string(),
            vector_output: Some(ctx.vector(stem)),
            nearest: 1,
            knight: options.knight,
            cost_attributes: true,
            lanes: options.lanes,
            memory_mb: options.memory_mb,
            overwrite: true,
            ..Default::default()
        },
    )
    .await?;

    if report.paths.is_empty() {
        return Err(Error::InsufficientPoints { found: report.points });
    }
    let n = report.paths.len();
    Ok((report.paths.iter().map(|p| p.cost).sum::<f64>() / n as f64, n))
}
