//! Total cost (accessibility) surface
//!
//! Every cell of the friction raster is used as a start point: a cost surface
//! capped at `max_cost` is computed from it and the reached cells are counted
//! into the output. The result tells, for each cell, from how many cells it
//! can be reached within the cost budget.

use crate::core::accumulator::PathAccumulator;
use crate::core::context::RunContext;
use crate::core::error::{Error, LayerKind, Result};
use crate::core::gis::{CostSurface, Gis, GisCommand};
use crate::core::points::Coordinate;
use crate::core::scheduler::{Lane, LaneOutput, LaneState, LaneWork, ProgressCallback, RunSummary, Scheduler};
use crate::tools::{prepare_output, validate_map_name};

#[derive(Clone)]
pub struct TotalCostOptions {
    /// Friction raster, cost per map unit
    pub friction: String,
    pub output: Option<String>,
    /// Cost budget in cost units
    pub max_cost: f64,
    pub knight: bool,
    /// Only report the edge effect distances
    pub edge_only: bool,
    pub memory_mb: Option<u32>,
    pub lanes: usize,
    pub overwrite: bool,
    pub progress: Option<ProgressCallback>,
}

impl Default for TotalCostOptions {
    fn default() -> Self {
        Self {
            friction: String::new(),
            output: None,
            max_cost: 0.0,
            knight: false,
            edge_only: false,
            memory_mb: None,
            lanes: 4,
            overwrite: false,
            progress: None,
        }
    }
}

impl TotalCostOptions {
    pub fn validate(&self) -> Result<()> {
        if !self.max_cost.is_finite() || self.max_cost <= 0.0 {
            return Err(Error::InvalidInput(format!(
                "Maximum cost must be a positive number, got {}",
                self.max_cost
            )));
        }
        match &self.output {
            Some(output) => validate_map_name(output),
            None if self.edge_only => Ok(()),
            None => Err(Error::InvalidInput("No output chosen".to_string())),
        }
    }
}

/// Distances (map units) a cost budget reaches through the most and least
/// expensive friction; closer to the region edge the counts are truncated
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdgeEffect {
    pub min: f64,
    pub max: f64,
}

impl EdgeEffect {
    pub fn from_range(max_cost: f64, friction_min: f64, friction_max: f64) -> Result<Self> {
        if friction_min <= 0.0 {
            return Err(Error::InvalidInput(format!(
                "Friction values must be positive, minimum is {friction_min}"
            )));
        }
        Ok(Self {
            min: max_cost / friction_max,
            max: max_cost / friction_min,
        })
    }
}

#[derive(Debug, Clone)]
pub struct TotalCostReport {
    pub edge_effect: EdgeEffect,
    /// Start cells processed; 0 when only the edge effect was requested
    pub cells: usize,
    pub summary: Option<RunSummary>,
}

pub async fn run<G: Gis>(gis: &G, options: &TotalCostOptions) -> Result<TotalCostReport> {
    options.validate()?;
    gis.require(LayerKind::Raster, &options.friction).await?;

    let (friction_min, friction_max) = gis.raster_range(&options.friction).await?;
    let edge_effect = EdgeEffect::from_range(options.max_cost, friction_min, friction_max)?;
    log::info!(
        "Edge effect distance between {} and {} map units",
        edge_effect.min,
        edge_effect.max
    );

    let output = match (&options.output, options.edge_only) {
        (Some(output), false) => output,
        _ => {
            return Ok(TotalCostReport {
                edge_effect,
                cells: 0,
                summary: None,
            })
        }
    };
    prepare_output(gis, LayerKind::Raster, output, options.overwrite).await?;

    let ctx = RunContext::new("totalcost");
    ctx.output_raster(output);
    ctx.guard(gis, async {
        let resolution = gis.region_resolution().await?;

        // r.cost sums cell values, so scale friction per map unit to per cell
        // and by the budget so that max_cost becomes 1
        let friction = ctx.raster("friction");
        gis.map_calc_raw(&format!(
            "{} = {} * {} / {}",
            friction, options.friction, resolution, options.max_cost
        ))
        .await?;

        let stats = gis
            .run(
                &GisCommand::new("r.stats")
                    .flag('1')
                    .flag('g')
                    .flag('n')
                    .param("input", &options.friction),
            )
            .await?;
        let cells = parse_cell_centres(&stats)?;
        log::info!("{} start cells", cells.len());

        let work = CostWork {
            ctx: &ctx,
            friction,
            knight: options.knight,
            memory_mb: options.memory_mb,
        };
        let mut accumulator = PathAccumulator::new(output.as_str(), ctx.raster("calctemp"), false);
        let summary = Scheduler::new(options.lanes)
            .run(gis, &work, &cells, Some(&mut accumulator), options.progress.as_ref())
            .await?;

        Ok(TotalCostReport {
            edge_effect,
            cells: cells.len(),
            summary: Some(summary),
        })
    })
    .await
}

/// Parse `r.stats -1gn` output, `x y value` per non-null cell
pub fn parse_cell_centres(text: &str) -> Result<Vec<Coordinate>> {
    let fields: Vec<&str> = text.split_whitespace().collect();
    if fields.len() % 3 != 0 {
        return Err(Error::Parse(format!(
            "r.stats: expected x y value triples, got {} fields",
            fields.len()
        )));
    }
    fields
        .chunks(3)
        .map(|triple| {
            let x = triple[0].parse::<f64>();
            let y = triple[1].parse::<f64>();
            match (x, y) {
                (Ok(x), Ok(y)) => Ok(Coordinate::new(x, y)),
                _ => Err(Error::Parse(format!(
                    "r.stats: bad coordinate '{} {}'",
                    triple[0], triple[1]
                ))),
            }
        })
        .collect()
}

struct CostWork<'a> {
    ctx: &'a RunContext,
    friction: String,
    knight: bool,
    memory_mb: Option<u32>,
}

impl<G: Gis> LaneWork<G> for CostWork<'_> {
    type Item = Coordinate;

    async fn process(&self, gis: &G, lane: &mut Lane, start: &Coordinate) -> Result<Option<LaneOutput>> {
        let cost = self.ctx.lane_raster("cost", lane.index(), lane.parity());

        lane.advance(LaneState::CostSurfaceRunning);
        let mut surface = CostSurface::new(self.friction.as_str(), cost.as_str(), vec![*start]);
        surface.knight = self.knight;
        surface.max_cost = Some(1.0);
        surface.memory_mb = self.memory_mb;
        gis.cost_surface(&surface).await?;
        lane.advance(LaneState::CostSurfaceDone);

        Ok(Some(LaneOutput {
            lane: lane.index(),
            raster: cost,
            vector: None,
        }))
    }
}
