//! Least-cost paths between the points of a vector layer
//!
//! For every point a cost surface is computed from the point and paths are
//! drained from the selected destinations back to it. Path rasters are
//! counted into the raster output; path vectors are patched into the vector
//! output, optionally with `length`, `from_point`, `to_point` and `cost`
//! attributes.

use std::cell::{Cell, RefCell};

use crate::core::accumulator::PathAccumulator;
use crate::core::context::RunContext;
use crate::core::distance::DistanceMatrix;
use crate::core::error::{Error, LayerKind, Result};
use crate::core::gis::{CostSurface, Drain, Gis, GisCommand};
use crate::core::neighbours::{NeighbourSelector, SelectionPolicy};
use crate::core::points::{Coordinate, PointSet};
use crate::core::scheduler::{Lane, LaneOutput, LaneState, LaneWork, ProgressCallback, RunSummary, Scheduler};
use crate::tools::{prepare_output, validate_map_name};

/// Parameters of a least-cost path run
#[derive(Clone)]
pub struct LcpOptions {
    /// Friction raster, cost per cell
    pub friction: String,
    /// Point layer; only points inside the current region are used
    pub points: String,
    /// Raster counting how many paths cross each cell
    pub raster_output: Option<String>,
    /// Vector layer with one line per path
    pub vector_output: Option<String>,
    /// Search radius in map units, 0 for unlimited
    pub radius: f64,
    /// Number of nearest points, 0 for all
    pub nearest: usize,
    /// Knight's move instead of queen's move
    pub knight: bool,
    /// Attach path cost attributes to the vector output
    pub cost_attributes: bool,
    /// Points processed concurrently
    pub lanes: usize,
    /// `r.cost` memory in MB
    pub memory_mb: Option<u32>,
    pub overwrite: bool,
    pub progress: Option<ProgressCallback>,
}

impl Default for LcpOptions {
    fn default() -> Self {
        Self {
            friction: String::new(),
            points: String::new(),
            raster_output: None,
            vector_output: None,
            radius: 0.0,
            nearest: 0,
            knight: false,
            cost_attributes: false,
            lanes: 2,
            memory_mb: None,
            overwrite: false,
            progress: None,
        }
    }
}

impl LcpOptions {
    /// Checks that need no GIS access; returns the destination selection policy
    pub fn validate(&self) -> Result<SelectionPolicy> {
        if self.raster_output.is_none() && self.vector_output.is_none() {
            return Err(Error::InvalidInput(
                "No output chosen, set a raster and/or a vector output".to_string(),
            ));
        }
        for name in self.raster_output.iter().chain(self.vector_output.iter()) {
            validate_map_name(name)?;
        }
        SelectionPolicy::from_limits(self.radius, self.nearest)
    }
}

/// Accumulated cost of one path
#[derive(Debug, Clone, PartialEq)]
pub struct PathCost {
    pub from: u32,
    pub to: u32,
    pub cost: f64,
}

#[derive(Debug, Clone)]
pub struct LcpReport {
    /// Points inside the region
    pub points: usize,
    pub summary: RunSummary,
    /// Per-path costs, filled when cost attributes were requested
    pub paths: Vec<PathCost>,
}

/// Compute least-cost paths
pub async fn run<G: Gis>(gis: &G, options: &LcpOptions) -> Result<LcpReport> {
    let policy = options.validate()?;

    gis.require(LayerKind::Raster, &options.friction).await?;
    gis.require(LayerKind::Vector, &options.points).await?;
    if let Some(raster) = &options.raster_output {
        prepare_output(gis, LayerKind::Raster, raster, options.overwrite).await?;
    }
    if let Some(vector) = &options.vector_output {
        prepare_output(gis, LayerKind::Vector, vector, options.overwrite).await?;
    }
    if options.cost_attributes && options.vector_output.is_none() {
        log::warn!("Cost attributes need a vector output, ignoring them");
    }

    let ctx = RunContext::new("lcp");
    if let Some(raster) = &options.raster_output {
        ctx.output_raster(raster);
    }
    if let Some(vector) = &options.vector_output {
        ctx.output_vector(vector);
    }
    ctx.guard(gis, execute(gis, &ctx, options, policy)).await
}

async fn execute<G: Gis>(
    gis: &G,
    ctx: &RunContext,
    options: &LcpOptions,
    policy: SelectionPolicy,
) -> Result<LcpReport> {
    // Only points inside the computational region can be reached
    let region = ctx.vector("region");
    let clipped = ctx.vector("points");
    gis.run(
        &GisCommand::new("v.in.region")
            .overwrite()
            .quiet()
            .param("output", &region),
    )
    .await?;
    gis.run(
        &GisCommand::new("v.select")
            .flag('t')
            .flag('c')
            .overwrite()
            .quiet()
            .param("ainput", &options.points)
            .param("atype", "point")
            .param("binput", &region)
            .param("btype", "area")
            .param("output", &clipped)
            .param("operator", "within"),
    )
    .await?;

    let points = PointSet::load(gis, &clipped).await?;
    let matrix = DistanceMatrix::build(&points)?;
    policy.validate(points.len())?;
    log::info!("{} points inside the region, selecting {:?}", points.len(), policy);

    let resolution = if options.cost_attributes && options.vector_output.is_some() {
        Some(gis.region_resolution().await?)
    } else {
        None
    };

    let work = LcpWork {
        ctx,
        options,
        points: &points,
        selector: NeighbourSelector::new(&matrix),
        policy,
        resolution,
        paths: RefCell::new(Vec::new()),
        patched: Cell::new(false),
    };

    let mut accumulator = options
        .raster_output
        .as_ref()
        .map(|output| PathAccumulator::new(output.as_str(), ctx.raster("lcptemp"), true));

    let summary = Scheduler::new(options.lanes)
        .run(gis, &work, &points.ids(), accumulator.as_mut(), options.progress.as_ref())
        .await?;

    if let Some(vector) = &options.vector_output {
        if !work.patched.get() {
            log::warn!("No paths were produced, vector output <{vector}> was not created");
        }
    }

    Ok(LcpReport {
        points: points.len(),
        summary,
        paths: work.paths.into_inner(),
    })
}

struct LcpWork<'a> {
    ctx: &'a RunContext,
    options: &'a LcpOptions,
    points: &'a PointSet,
    selector: NeighbourSelector<'a>,
    policy: SelectionPolicy,
    /// Mean region resolution, set when path costs are wanted
    resolution: Option<f64>,
    paths: RefCell<Vec<PathCost>>,
    patched: Cell<bool>,
}

impl LcpWork<'_> {
    fn coordinate(&self, id: u32) -> Result<Coordinate> {
        self.points
            .get(id)
            .map(|p| p.coordinate())
            .ok_or_else(|| Error::InvalidInput(format!("Point {id} is not part of the point set")))
    }

    async fn write_attributes<G: Gis>(&self, gis: &G, vector: &str, source: u32, costs: &[PathCost]) -> Result<()> {
        gis.run(&GisCommand::new("v.db.addtable").quiet().param("map", vector))
            .await?;
        gis.run(
            &GisCommand::new("v.db.addcolumn")
                .quiet()
                .param("map", vector)
                .param(
                    "columns",
                    "length double precision,from_point integer,to_point integer,cost double precision",
                ),
        )
        .await?;
        gis.run(
            &GisCommand::new("v.to.db")
                .quiet()
                .param("map", vector)
                .param("type", "line")
                .param("option", "length")
                .param("columns", "length"),
        )
        .await?;
        gis.run(
            &GisCommand::new("v.db.update")
                .quiet()
                .param("map", vector)
                .param("column", "from_point")
                .param("value", source),
        )
        .await?;

        // drain lines are numbered from 1 in destination order
        for (seq, path) in costs.iter().enumerate() {
            let condition = format!("cat = {}", seq + 1);
            gis.run(
                &GisCommand::new("v.db.update")
                    .quiet()
                    .param("map", vector)
                    .param("column", "to_point")
                    .param("value", path.to)
                    .param("where", &condition),
            )
            .await?;
            gis.run(
                &GisCommand::new("v.db.update")
                    .quiet()
                    .param("map", vector)
                    .param("column", "cost")
                    .param("value", path.cost)
                    .param("where", &condition),
            )
            .await?;
        }
        Ok(())
    }
}

impl<G: Gis> LaneWork<G> for LcpWork<'_> {
    type Item = u32;

    async fn process(&self, gis: &G, lane: &mut Lane, source: &u32) -> Result<Option<LaneOutput>> {
        let source = *source;
        let neighbours = self.selector.select(source, &self.policy)?;
        lane.advance(LaneState::NeighboursResolved);

        let origin = self.coordinate(source)?;
        let destinations = neighbours
            .ids
            .iter()
            .map(|&id| Ok((id, self.coordinate(id)?)))
            .collect::<Result<Vec<(u32, Coordinate)>>>()?;

        let (index, parity) = (lane.index(), lane.parity());
        let cost = self.ctx.lane_raster("cost", index, parity);
        let direction = self.ctx.lane_raster("costdir", index, parity);
        let path = self.ctx.lane_raster("lcp", index, parity);
        let vector = self
            .options
            .vector_output
            .as_ref()
            .map(|_| self.ctx.lane_vector("vectdrain", index, parity));

        lane.advance(LaneState::CostSurfaceRunning);
        let mut surface = CostSurface::new(&self.options.friction, &cost, vec![origin]);
        surface.direction = Some(direction.clone());
        surface.knight = self.options.knight;
        surface.memory_mb = self.options.memory_mb;
        gis.cost_surface(&surface).await?;
        lane.advance(LaneState::CostSurfaceDone);

        lane.advance(LaneState::DrainRunning);
        let mut costs = Vec::new();
        if let (Some(resolution), Some(_)) = (self.resolution, &vector) {
            // one accumulated drain per destination; its maximum is the path cost
            let single = self.ctx.lane_raster("lcpcost", index, parity);
            for &(to, coordinate) in &destinations {
                let mut drain = Drain::new(&cost, &single, vec![coordinate]);
                drain.direction = Some(direction.clone());
                drain.accumulate = true;
                gis.drain(&drain).await?;
                let (_, max) = gis.raster_range(&single).await?;
                costs.push(PathCost {
                    from: source,
                    to,
                    cost: max * resolution,
                });
            }
        }

        let mut drain = Drain::new(&cost, &path, destinations.iter().map(|&(_, c)| c).collect());
        drain.direction = Some(direction);
        drain.vector_output = vector.clone();
        gis.drain(&drain).await?;

        if let Some(vector) = &vector {
            if !costs.is_empty() {
                self.write_attributes(gis, vector, source, &costs).await?;
            }
        }
        self.paths.borrow_mut().extend(costs);
        lane.advance(LaneState::DrainDone);

        log::debug!("Point {} drained to {} destinations", source, destinations.len());
        Ok(Some(LaneOutput {
            lane: index,
            raster: path,
            vector,
        }))
    }

    async fn collect(&self, gis: &G, iteration: usize, outputs: &[LaneOutput]) -> Result<()> {
        let Some(output) = &self.options.vector_output else {
            return Ok(());
        };
        let inputs: Vec<&str> = outputs.iter().filter_map(|o| o.vector.as_deref()).collect();
        if inputs.is_empty() {
            return Ok(());
        }

        log::debug!("Patching {} path vectors of iteration {}", inputs.len(), iteration);
        gis.run(
            &GisCommand::new("v.patch")
                .flag_if('e', self.resolution.is_some())
                .flag_if('a', self.patched.get())
                .overwrite()
                .quiet()
                .param("input", inputs.join(","))
                .param("output", output),
        )
        .await?;
        self.patched.set(true);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::memory::MemoryGis;
    use crate::core::points::Point;
    use approx::assert_relative_eq;

    fn corners() -> MemoryGis {
        MemoryGis::with_layers(
            12,
            12,
            "friction",
            "sites",
            vec![
                Point::new(1, 0.5, 0.5),
                Point::new(2, 10.5, 0.5),
                Point::new(3, 0.5, 10.5),
                Point::new(4, 10.5, 10.5),
            ],
        )
    }

    fn options() -> LcpOptions {
        LcpOptions {
            friction: "friction".to_string(),
            points: "sites".to_string(),
            raster_output: Some("paths".to_string()),
            nearest: 1,
            ..Default::default()
        }
    }

    fn no_temporaries(gis: &MemoryGis) -> bool {
        gis.raster_names().iter().all(|n| !n.starts_with("tmp_"))
            && gis.vector_names().iter().all(|n| !n.starts_with("tmp_"))
    }

    #[tokio::test]
    async fn test_nearest_paths_raster() {
        let gis = corners();
        let report = run(&gis, &options()).await.unwrap();

        assert_eq!(report.points, 4);
        assert_eq!(report.summary.iterations, 2);
        assert_eq!(report.summary.folds, 2);

        // 1 -> 2, 2 -> 1, 3 -> 1 and 4 -> 2 after tie-breaking by id
        assert_eq!(gis.value_at("paths", 0.5, 0.5), Some(3.0));
        assert_eq!(gis.value_at("paths", 10.5, 0.5), Some(3.0));
        assert_eq!(gis.value_at("paths", 5.5, 0.5), Some(2.0));
        assert_eq!(gis.value_at("paths", 0.5, 5.5), Some(1.0));
        assert_eq!(gis.value_at("paths", 5.5, 5.5), None);

        assert_eq!(gis.count("r.cost"), 4);
        assert_eq!(gis.count("r.null"), 1);
        assert!(no_temporaries(&gis));
    }

    #[tokio::test]
    async fn test_vector_output_with_costs() {
        let gis = corners();
        let opts = LcpOptions {
            raster_output: None,
            vector_output: Some("links".to_string()),
            cost_attributes: true,
            ..options()
        };
        let report = run(&gis, &opts).await.unwrap();

        assert_eq!(report.paths.len(), 4);
        for path in &report.paths {
            assert_relative_eq!(path.cost, 10.0);
        }
        assert!(report.paths.contains(&PathCost { from: 3, to: 1, cost: 10.0 }));

        let patches: Vec<GisCommand> = gis
            .commands()
            .into_iter()
            .filter(|c| c.module() == "v.patch")
            .collect();
        assert_eq!(patches.len(), 2);
        assert!(!patches[0].has_flag('a'));
        assert!(patches[1].has_flag('a'));
        assert!(patches[1].has_flag('e'));

        assert!(gis.has_vector("links"));
        assert!(!gis.has_raster("paths"));
        assert!(no_temporaries(&gis));
    }

    #[tokio::test]
    async fn test_missing_input_suggests_name() {
        let gis = corners();
        let opts = LcpOptions {
            points: "site".to_string(),
            ..options()
        };
        match run(&gis, &opts).await {
            Err(Error::SourceUnavailable { kind, suggestion, .. }) => {
                assert_eq!(kind, LayerKind::Vector);
                assert_eq!(suggestion.as_deref(), Some("sites"));
            }
            other => panic!("Expected SourceUnavailable, got {other:?}"),
        }
        assert_eq!(gis.count("r.cost"), 0);
    }

    #[tokio::test]
    async fn test_existing_output() {
        let gis = corners();
        gis.put_raster("paths", vec![None; 144]);
        assert!(matches!(run(&gis, &options()).await, Err(Error::OutputExists(_))));

        let opts = LcpOptions {
            overwrite: true,
            ..options()
        };
        run(&gis, &opts).await.unwrap();
        assert_eq!(gis.value_at("paths", 0.5, 0.5), Some(3.0));
    }

    #[tokio::test]
    async fn test_parameter_validation() {
        let gis = corners();
        let opts = LcpOptions {
            raster_output: None,
            ..options()
        };
        assert!(matches!(run(&gis, &opts).await, Err(Error::InvalidInput(_))));

        let opts = LcpOptions {
            nearest: 4,
            ..options()
        };
        assert!(matches!(run(&gis, &opts).await, Err(Error::InvalidK { k: 4, total: 4 })));
        assert_eq!(gis.count("r.cost"), 0);
        assert!(no_temporaries(&gis));
    }

    #[tokio::test]
    async fn test_radius_without_candidates() {
        let gis = corners();
        let opts = LcpOptions {
            radius: 5.0,
            nearest: 0,
            ..options()
        };
        let report = run(&gis, &opts).await.unwrap();
        assert_eq!(report.summary.skipped_lanes, 4);
        assert_eq!(gis.count("r.cost"), 0);
        // output initialized with zeros, all reclassified to null
        assert!(gis.raster("paths").unwrap().iter().all(|v| v.is_none()));
    }

    #[tokio::test]
    async fn test_failure_cleans_up() {
        let gis = corners();
        gis.fail_on("r.cost", 2);
        match run(&gis, &options()).await {
            Err(Error::Iteration { index, .. }) => assert_eq!(index, 1),
            other => panic!("Expected iteration error, got {other:?}"),
        }
        assert!(no_temporaries(&gis));
    }

    #[tokio::test]
    async fn test_failure_after_folds_drops_outputs() {
        let gis = MemoryGis::with_layers(
            12,
            12,
            "friction",
            "sites",
            (1..=6).map(|id| Point::new(id, 2.0 * id as f64 - 1.5, 0.5)).collect(),
        );
        let opts = LcpOptions {
            vector_output: Some("links".to_string()),
            ..options()
        };
        // third iteration fails after the first two were folded
        gis.fail_on("r.cost", 5);
        match run(&gis, &opts).await {
            Err(Error::Iteration { index, .. }) => assert_eq!(index, 2),
            other => panic!("Expected iteration error, got {other:?}"),
        }
        assert!(gis.count("v.patch") >= 1);
        assert!(!gis.has_raster("paths"));
        assert!(!gis.has_vector("links"));
        assert!(gis.has_raster("friction"));
        assert!(no_temporaries(&gis));
    }
}
