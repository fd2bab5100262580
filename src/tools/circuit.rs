//! Circuitscape batch runs
//!
//! The friction raster and the focal points are exported as ASCII grids into
//! the mapset's `.tmp` directory, a batch ini file is written next to them
//! and the external solver is invoked on it. Current maps written by the
//! solver are imported back as rasters named `<prefix>_cumulative` and
//! `<prefix>_<pair>` (pairwise) or `<prefix>_<point>` (one-to-all,
//! all-to-one).

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::core::context::RunContext;
use crate::core::error::{Error, LayerKind, Result};
use crate::core::gis::{run_program, Gis, GisCommand};
use crate::core::points::PointSet;
use crate::tools::{prepare_output, validate_map_name};

/// Circuitscape modelling mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scenario {
    #[default]
    Pairwise,
    OneToAll,
    AllToOne,
}

impl FromStr for Scenario {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pairwise" => Ok(Scenario::Pairwise),
            "one-to-all" => Ok(Scenario::OneToAll),
            "all-to-one" => Ok(Scenario::AllToOne),
            other => Err(Error::InvalidInput(format!(
                "Unknown scenario '{other}', expected pairwise, one-to-all or all-to-one"
            ))),
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Scenario::Pairwise => "pairwise",
            Scenario::OneToAll => "one-to-all",
            Scenario::AllToOne => "all-to-one",
        })
    }
}

/// Every unordered pair of point ids as `i_j` with `i < j`
pub fn point_pairs(ids: &[u32]) -> Vec<String> {
    let mut ids = ids.to_vec();
    ids.sort_unstable();
    ids.dedup();

    let mut pairs = Vec::with_capacity(ids.len() * ids.len().saturating_sub(1) / 2);
    for (n, i) in ids.iter().enumerate() {
        for j in &ids[n + 1..] {
            pairs.push(format!("{i}_{j}"));
        }
    }
    pairs
}

/// Batch configuration handed to the solver
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitscapeIni {
    pub habitat_file: PathBuf,
    pub point_file: PathBuf,
    /// Base name of the solver outputs, `<base>_cum_curmap.asc` and so on
    pub output_file: PathBuf,
    pub scenario: Scenario,
    pub low_memory: bool,
    pub cumulative_only: bool,
    pub four_neighbours: bool,
}

fn py_bool(value: bool) -> &'static str {
    if value {
        "True"
    } else {
        "False"
    }
}

impl fmt::Display for CircuitscapeIni {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[Options for advanced mode]")?;
        writeln!(f, "ground_file_is_resistances = True")?;
        writeln!(f, "source_file = (Browse for a current source file)")?;
        writeln!(f, "remove_src_or_gnd = keepall")?;
        writeln!(f, "ground_file = (Browse for a ground point file)")?;
        writeln!(f, "use_unit_currents = False")?;
        writeln!(f, "use_direct_grounds = False")?;
        writeln!(f)?;
        writeln!(f, "[Calculation options]")?;
        writeln!(f, "low_memory_mode = {}", py_bool(self.low_memory))?;
        writeln!(f, "solver = cg+amg")?;
        writeln!(f, "print_timings = True")?;
        writeln!(f)?;
        writeln!(f, "[Options for pairwise and one-to-all and all-to-one modes]")?;
        writeln!(f, "included_pairs_file = None")?;
        writeln!(f, "point_file_contains_polygons = False")?;
        writeln!(f, "use_included_pairs = False")?;
        writeln!(f, "point_file = {}", self.point_file.display())?;
        writeln!(f)?;
        writeln!(f, "[Output options]")?;
        writeln!(f, "write_cum_cur_map_only = {}", py_bool(self.cumulative_only))?;
        writeln!(f, "log_transform_maps = False")?;
        writeln!(f, "set_focal_node_currents_to_zero = False")?;
        writeln!(f, "output_file = {}", self.output_file.display())?;
        writeln!(f, "write_max_cur_maps = False")?;
        writeln!(f, "write_volt_maps = False")?;
        writeln!(f, "set_null_currents_to_nodata = True")?;
        writeln!(f, "set_null_voltages_to_nodata = True")?;
        writeln!(f, "compress_grids = False")?;
        writeln!(f, "write_cur_maps = True")?;
        writeln!(f)?;
        writeln!(f, "[Short circuit regions (aka polygons)]")?;
        writeln!(f, "use_polygons = False")?;
        writeln!(f, "polygon_file = (Browse for a short-circuit region file)")?;
        writeln!(f)?;
        writeln!(f, "[Connection scheme for raster habitat data]")?;
        writeln!(f, "connect_four_neighbors_only = {}", py_bool(self.four_neighbours))?;
        writeln!(f, "connect_using_avg_resistances = True")?;
        writeln!(f)?;
        writeln!(f, "[Habitat raster or graph]")?;
        writeln!(f, "habitat_file = {}", self.habitat_file.display())?;
        writeln!(f, "habitat_map_is_resistances = True")?;
        writeln!(f)?;
        writeln!(f, "[Options for one-to-all and all-to-one modes]")?;
        writeln!(f, "use_variable_source_strengths = False")?;
        writeln!(f, "variable_source_file = None")?;
        writeln!(f)?;
        writeln!(f, "[Version]")?;
        writeln!(f, "version = 3.5.8")?;
        writeln!(f)?;
        writeln!(f, "[Mask file]")?;
        writeln!(f, "use_mask = False")?;
        writeln!(f, "mask_file = None")?;
        writeln!(f)?;
        writeln!(f, "[Circuitscape mode]")?;
        writeln!(f, "data_type = raster")?;
        writeln!(f, "scenario = {}", self.scenario)
    }
}

#[derive(Debug, Clone)]
pub struct CircuitOptions {
    /// Resistance raster
    pub friction: String,
    pub points: String,
    pub scenario: Scenario,
    pub low_memory: bool,
    /// Only write the cumulative current map
    pub cumulative_only: bool,
    pub four_neighbours: bool,
    pub prefix: String,
    /// Solver executable
    pub solver: String,
    pub overwrite: bool,
}

impl CircuitOptions {
    pub fn new(friction: impl Into<String>, points: impl Into<String>, solver: impl Into<String>) -> Self {
        Self {
            friction: friction.into(),
            points: points.into(),
            scenario: Scenario::default(),
            low_memory: false,
            cumulative_only: false,
            four_neighbours: false,
            prefix: "cs".to_string(),
            solver: solver.into(),
            overwrite: false,
        }
    }

    /// `(solver file suffix, output raster)` for each current map to import
    pub fn current_maps(&self, ids: &[u32]) -> Vec<(String, String)> {
        let mut maps = vec![("cum_curmap".to_string(), format!("{}_cumulative", self.prefix))];
        if self.cumulative_only {
            return maps;
        }
        let keys: Vec<String> = match self.scenario {
            Scenario::Pairwise => point_pairs(ids),
            Scenario::OneToAll | Scenario::AllToOne => ids.iter().map(u32::to_string).collect(),
        };
        maps.extend(
            keys.into_iter()
                .map(|key| (format!("curmap_{key}"), format!("{}_{key}", self.prefix))),
        );
        maps
    }
}

/// Solver output file for a map suffix, next to the `output_file` base
fn solver_output(base: &Path, suffix: &str) -> PathBuf {
    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    base.with_file_name(format!("{stem}_{suffix}.asc"))
}

/// Mapset `.tmp` directory from the GRASS session variables
async fn temp_dir<G: Gis>(gis: &G) -> Result<PathBuf> {
    let env = gis.gis_env().await?;
    let var = |key: &str| {
        env.get(key)
            .cloned()
            .ok_or_else(|| Error::Parse(format!("g.gisenv: {key} not set")))
    };
    let dir = PathBuf::from(var("GISDBASE")?)
        .join(var("LOCATION_NAME")?)
        .join(var("MAPSET")?)
        .join(".tmp");
    tokio::fs::create_dir_all(&dir).await?;
    Ok(dir)
}

/// Run the solver and import its current maps; returns the imported raster names
pub async fn run<G: Gis>(gis: &G, options: &CircuitOptions) -> Result<Vec<String>> {
    gis.require(LayerKind::Raster, &options.friction).await?;
    let points = PointSet::load(gis, &options.points).await?;
    if points.len() < 2 {
        return Err(Error::InsufficientPoints { found: points.len() });
    }

    let maps = options.current_maps(&points.ids());
    for (_, output) in &maps {
        validate_map_name(output)?;
        prepare_output(gis, LayerKind::Raster, output, options.overwrite).await?;
    }

    let ctx = RunContext::new("circuit");
    ctx.guard(gis, async {
        let dir = temp_dir(gis).await?;
        let ini = CircuitscapeIni {
            habitat_file: ctx.file(&dir, "friction", "asc"),
            point_file: ctx.file(&dir, "points", "asc"),
            output_file: ctx.file(&dir, "cs", "out"),
            scenario: options.scenario,
            low_memory: options.low_memory,
            cumulative_only: options.cumulative_only,
            four_neighbours: options.four_neighbours,
        };

        gis.run(
            &GisCommand::new("r.out.arc")
                .overwrite()
                .quiet()
                .param("input", &options.friction)
                .param("output", ini.habitat_file.display()),
        )
        .await?;

        let point_raster = ctx.raster("points");
        gis.run(
            &GisCommand::new("v.to.rast")
                .overwrite()
                .quiet()
                .param("input", &options.points)
                .param("type", "point")
                .param("output", &point_raster)
                .param("use", "cat"),
        )
        .await?;
        gis.run(
            &GisCommand::new("r.out.arc")
                .overwrite()
                .quiet()
                .param("input", &point_raster)
                .param("output", ini.point_file.display()),
        )
        .await?;

        let ini_path = ctx.file(&dir, "batch", "ini");
        tokio::fs::write(&ini_path, ini.to_string()).await?;

        let inputs: Vec<(PathBuf, &String)> = maps
            .iter()
            .map(|(suffix, output)| (ctx.track_file(solver_output(&ini.output_file, suffix)), output))
            .collect();

        log::info!("Running {} ({} scenario)", options.solver, options.scenario);
        run_program(
            &options.solver,
            &[ini_path.to_string_lossy().into_owned()],
            "circuitscape",
        )
        .await?;

        let mut imported = Vec::with_capacity(inputs.len());
        for (path, output) in inputs {
            gis.run(
                &GisCommand::new("r.in.gdal")
                    .flag('o')
                    .overwrite()
                    .quiet()
                    .param("input", path.display())
                    .param("output", output),
            )
            .await?;
            imported.push(output.clone());
        }
        Ok(imported)
    })
    .await
}
