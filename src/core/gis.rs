//! External GIS command layer
//!
//! Every raster and vector computation is delegated to GRASS modules run as
//! child processes. [`Gis::run`] is the only required primitive; the typed
//! operations are provided on top of it so alternative backends only need
//! to override what they can model.

use std::collections::HashMap;
use std::fmt;
use std::process::Stdio;

use tokio::process::Command;

use crate::core::algebra::Expression;
use crate::core::config::GisConfig;
use crate::core::error::{suggest_name, Error, LayerKind, Result};
use crate::core::points::{join_coordinates, parse_point_ascii, Coordinate, Point};

/// A single GRASS module invocation, `module -flags --overwrite key=value ...`
#[derive(Debug, Clone, PartialEq)]
pub struct GisCommand {
    module: String,
    flags: String,
    params: Vec<(String, String)>,
    overwrite: bool,
    quiet: bool,
}

impl GisCommand {
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            flags: String::new(),
            params: Vec::new(),
            overwrite: false,
            quiet: false,
        }
    }

    /// Add a one-letter flag
    pub fn flag(mut self, flag: char) -> Self {
        if !self.flags.contains(flag) {
            self.flags.push(flag);
        }
        self
    }

    /// Add a flag only when `enabled`
    pub fn flag_if(self, flag: char, enabled: bool) -> Self {
        if enabled {
            self.flag(flag)
        } else {
            self
        }
    }

    pub fn param(mut self, key: &str, value: impl ToString) -> Self {
        self.params.push((key.to_string(), value.to_string()));
        self
    }

    /// Add a parameter only when a value is present
    pub fn param_opt<T: ToString>(self, key: &str, value: Option<T>) -> Self {
        match value {
            Some(value) => self.param(key, value),
            None => self,
        }
    }

    pub fn overwrite(mut self) -> Self {
        self.overwrite = true;
        self
    }

    pub fn quiet(mut self) -> Self {
        self.quiet = true;
        self
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn has_flag(&self, flag: char) -> bool {
        self.flags.contains(flag)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Arguments following the module name
    pub fn args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(self.params.len() + 3);
        if !self.flags.is_empty() {
            args.push(format!("-{}", self.flags));
        }
        if self.overwrite {
            args.push("--overwrite".to_string());
        }
        if self.quiet {
            args.push("--quiet".to_string());
        }
        args.extend(self.params.iter().map(|(k, v)| format!("{k}={v}")));
        args
    }
}

impl fmt::Display for GisCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.module)?;
        for arg in self.args() {
            if arg.contains(' ') {
                write!(f, " \"{arg}\"")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

/// Cost-distance propagation request (`r.cost`)
#[derive(Debug, Clone, PartialEq)]
pub struct CostSurface {
    pub friction: String,
    pub output: String,
    /// Optional movement direction output, needed by directional drains
    pub direction: Option<String>,
    pub start: Vec<Coordinate>,
    /// Knight's move instead of queen's move
    pub knight: bool,
    pub max_cost: Option<f64>,
    pub memory_mb: Option<u32>,
}

impl CostSurface {
    pub fn new(friction: impl Into<String>, output: impl Into<String>, start: Vec<Coordinate>) -> Self {
        Self {
            friction: friction.into(),
            output: output.into(),
            direction: None,
            start,
            knight: false,
            max_cost: None,
            memory_mb: None,
        }
    }

    pub fn command(&self) -> GisCommand {
        GisCommand::new("r.cost")
            .flag_if('k', self.knight)
            .overwrite()
            .quiet()
            .param("input", &self.friction)
            .param("output", &self.output)
            .param_opt("outdir", self.direction.as_ref())
            .param("start_coordinates", join_coordinates(&self.start))
            .param_opt("max_cost", self.max_cost)
            .param_opt("memory", self.memory_mb)
    }
}

/// Least-cost path tracing request (`r.drain`)
#[derive(Debug, Clone, PartialEq)]
pub struct Drain {
    pub cost: String,
    pub direction: Option<String>,
    pub output: String,
    /// Optional vector output with one line per traced path
    pub vector_output: Option<String>,
    pub destinations: Vec<Coordinate>,
    /// Accumulate cost values along the path instead of marking presence
    pub accumulate: bool,
}

impl Drain {
    pub fn new(cost: impl Into<String>, output: impl Into<String>, destinations: Vec<Coordinate>) -> Self {
        Self {
            cost: cost.into(),
            direction: None,
            output: output.into(),
            vector_output: None,
            destinations,
            accumulate: false,
        }
    }

    pub fn command(&self) -> GisCommand {
        GisCommand::new("r.drain")
            .flag_if('a', self.accumulate)
            .flag_if('d', self.direction.is_some())
            .overwrite()
            .quiet()
            .param("input", &self.cost)
            .param_opt("direction", self.direction.as_ref())
            .param("output", &self.output)
            .param_opt("drain", self.vector_output.as_ref())
            .param("start_coordinates", join_coordinates(&self.destinations))
    }
}

/// Parse `key=value` lines as printed by `g.region -g`, `r.info -r`, `g.gisenv -n`
pub fn parse_key_val(text: &str) -> HashMap<String, String> {
    text.lines()
        .filter_map(|line| {
            let (key, value) = line.split_once('=')?;
            let value = value.trim().trim_end_matches(';').trim_matches('\'').trim_matches('"');
            Some((key.trim().to_string(), value.to_string()))
        })
        .collect()
}

fn parse_number(values: &HashMap<String, String>, key: &str, module: &str) -> Result<f64> {
    values
        .get(key)
        .and_then(|v| v.parse::<f64>().ok())
        .ok_or_else(|| Error::Parse(format!("{module}: missing or invalid '{key}'")))
}

/// Access to an external GIS
///
/// Futures returned by implementations are not required to be `Send`: a run
/// is driven from a single controlling task and only the child processes run
/// in parallel.
#[allow(async_fn_in_trait)]
pub trait Gis {
    /// Run a module to completion and return its stdout
    async fn run(&self, command: &GisCommand) -> Result<String>;

    /// Read `(id, x, y)` of every point feature in a vector layer
    async fn read_points(&self, layer: &str) -> Result<Vec<Point>> {
        let out = self
            .run(
                &GisCommand::new("v.out.ascii")
                    .quiet()
                    .param("input", layer)
                    .param("type", "point")
                    .param("format", "point")
                    .param("separator", "pipe"),
            )
            .await?;
        parse_point_ascii(&out)
    }

    /// Whether a layer exists in the search path
    async fn exists(&self, kind: LayerKind, name: &str) -> Result<bool> {
        let command = GisCommand::new("g.findfile")
            .flag('n')
            .param("element", kind.element())
            .param("file", name);
        match self.run(&command).await {
            Ok(out) => Ok(parse_key_val(&out)
                .get("name")
                .is_some_and(|n| !n.is_empty())),
            // g.findfile exits with status 1 when nothing was found
            Err(Error::ExternalProcessFailure { status: Some(1), .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Names of all layers of a kind in the search path
    async fn list_layers(&self, kind: LayerKind) -> Result<Vec<String>> {
        let out = self
            .run(&GisCommand::new("g.list").param("type", kind.type_name()))
            .await?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Fail with `SourceUnavailable` (with a spelling suggestion) when a layer is missing
    async fn require(&self, kind: LayerKind, name: &str) -> Result<()> {
        if self.exists(kind, name).await? {
            return Ok(());
        }
        let suggestion = match self.list_layers(kind).await {
            Ok(candidates) => suggest_name(name, &candidates),
            Err(e) => {
                log::debug!("Could not list {kind} layers for suggestions: {e}");
                None
            }
        };
        Err(Error::SourceUnavailable {
            kind,
            name: name.to_string(),
            suggestion,
        })
    }

    async fn cost_surface(&self, request: &CostSurface) -> Result<()> {
        self.run(&request.command()).await.map(|_| ())
    }

    async fn drain(&self, request: &Drain) -> Result<()> {
        self.run(&request.command()).await.map(|_| ())
    }

    /// Evaluate an accumulation expression
    async fn map_calc(&self, expression: &Expression) -> Result<()> {
        expression.validate()?;
        self.map_calc_raw(&expression.to_string()).await
    }

    /// Evaluate a free-form `r.mapcalc` expression
    async fn map_calc_raw(&self, expression: &str) -> Result<()> {
        self.run(
            &GisCommand::new("r.mapcalc")
                .overwrite()
                .quiet()
                .param("expression", expression),
        )
        .await
        .map(|_| ())
    }

    async fn rename_raster(&self, from: &str, to: &str) -> Result<()> {
        self.run(
            &GisCommand::new("g.rename")
                .overwrite()
                .quiet()
                .param("raster", format!("{from},{to}")),
        )
        .await
        .map(|_| ())
    }

    /// Remove layers; missing names are ignored by `g.remove`
    async fn remove_layers(&self, kind: LayerKind, names: &[String]) -> Result<()> {
        if names.is_empty() {
            return Ok(());
        }
        self.run(
            &GisCommand::new("g.remove")
                .flag('f')
                .quiet()
                .param("type", kind.type_name())
                .param("name", names.join(",")),
        )
        .await
        .map(|_| ())
    }

    /// Reclassify a literal value to null
    async fn set_null(&self, map: &str, value: i64) -> Result<()> {
        self.run(
            &GisCommand::new("r.null")
                .quiet()
                .param("map", map)
                .param("setnull", value),
        )
        .await
        .map(|_| ())
    }

    /// `(min, max)` of a raster
    async fn raster_range(&self, map: &str) -> Result<(f64, f64)> {
        let out = self
            .run(&GisCommand::new("r.info").flag('r').param("map", map))
            .await?;
        let values = parse_key_val(&out);
        Ok((
            parse_number(&values, "min", "r.info")?,
            parse_number(&values, "max", "r.info")?,
        ))
    }

    /// Mean of north-south and east-west resolution of the current region
    async fn region_resolution(&self) -> Result<f64> {
        let out = self.run(&GisCommand::new("g.region").flag('g')).await?;
        let values = parse_key_val(&out);
        let nsres = parse_number(&values, "nsres", "g.region")?;
        let ewres = parse_number(&values, "ewres", "g.region")?;
        Ok((nsres + ewres) / 2.0)
    }

    /// Numeric values of one attribute column, in category order
    async fn attribute_column(&self, map: &str, column: &str) -> Result<Vec<f64>> {
        let out = self
            .run(
                &GisCommand::new("v.db.select")
                    .flag('c')
                    .param("map", map)
                    .param("columns", column),
            )
            .await?;
        out.lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(|l| {
                l.parse::<f64>()
                    .map_err(|_| Error::Parse(format!("v.db.select: '{l}' in column {column}")))
            })
            .collect()
    }

    /// GRASS session variables (`GISDBASE`, `LOCATION_NAME`, `MAPSET`, ...)
    async fn gis_env(&self) -> Result<HashMap<String, String>> {
        let out = self.run(&GisCommand::new("g.gisenv").flag('n')).await?;
        Ok(parse_key_val(&out))
    }
}

/// Run a program and capture stdout, mapping any failure to `ExternalProcessFailure`
pub async fn run_program(program: &str, args: &[String], label: &str) -> Result<String> {
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = command
        .output()
        .await
        .map_err(|e| Error::ExternalProcessFailure {
            module: label.to_string(),
            status: None,
            stderr: format!("could not start {program}: {e}"),
        })?;

    if !output.status.success() {
        return Err(Error::ExternalProcessFailure {
            module: label.to_string(),
            status: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// GRASS modules run as child processes
pub struct GrassSession {
    config: GisConfig,
}

impl GrassSession {
    pub fn new(config: GisConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GisConfig {
        &self.config
    }

    /// Program and arguments for a module, honouring the launcher prefix
    fn argv(&self, command: &GisCommand) -> (String, Vec<String>) {
        let mut argv: Vec<String> = self.config.launcher.clone();
        argv.push(command.module().to_string());
        argv.extend(command.args());
        let program = argv.remove(0);
        (program, argv)
    }
}

impl Gis for GrassSession {
    async fn run(&self, command: &GisCommand) -> Result<String> {
        log::debug!("▶ {command}");
        let (program, args) = self.argv(command);
        run_program(&program, &args, command.module()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_rendering() {
        let cmd = GisCommand::new("r.cost")
            .flag('k')
            .overwrite()
            .param("input", "friction")
            .param("start_coordinates", "1,2");
        assert_eq!(
            cmd.args(),
            vec!["-k", "--overwrite", "input=friction", "start_coordinates=1,2"]
        );
        assert_eq!(cmd.to_string(), "r.cost -k --overwrite input=friction start_coordinates=1,2");
        assert_eq!(cmd.get("input"), Some("friction"));
        assert!(cmd.has_flag('k'));
    }

    #[test]
    fn test_flags_deduplicated() {
        let cmd = GisCommand::new("r.drain").flag('a').flag('d').flag('a').flag_if('c', false);
        assert_eq!(cmd.args(), vec!["-ad"]);
    }

    #[test]
    fn test_cost_surface_command() {
        let mut request = CostSurface::new(
            "friction",
            "tmp_cost",
            vec![Coordinate::new(10.0, 20.0)],
        );
        request.direction = Some("tmp_dir".to_string());
        request.knight = true;
        request.memory_mb = Some(300);

        let cmd = request.command();
        assert_eq!(cmd.module(), "r.cost");
        assert!(cmd.has_flag('k'));
        assert_eq!(cmd.get("outdir"), Some("tmp_dir"));
        assert_eq!(cmd.get("start_coordinates"), Some("10,20"));
        assert_eq!(cmd.get("memory"), Some("300"));
        assert_eq!(cmd.get("max_cost"), None);
    }

    #[test]
    fn test_drain_command() {
        let mut request = Drain::new(
            "tmp_cost",
            "tmp_lcp",
            vec![Coordinate::new(1.0, 2.0), Coordinate::new(3.0, 4.0)],
        );
        request.direction = Some("tmp_dir".to_string());
        request.vector_output = Some("tmp_vdrain".to_string());

        let cmd = request.command();
        assert!(cmd.has_flag('d'));
        assert!(!cmd.has_flag('a'));
        assert_eq!(cmd.get("drain"), Some("tmp_vdrain"));
        assert_eq!(cmd.get("start_coordinates"), Some("1,2,3,4"));
    }

    #[test]
    fn test_parse_key_val() {
        let values = parse_key_val("n=100\ns=0\nnsres=10\newres=20\nGISDBASE='/data/grass';\n");
        assert_eq!(values["nsres"], "10");
        assert_eq!(values["GISDBASE"], "/data/grass");
    }

    #[test]
    fn test_launcher_prefix() {
        let session = GrassSession::new(GisConfig {
            launcher: vec!["grass".into(), "/gd/loc/PERMANENT".into(), "--exec".into()],
            ..Default::default()
        });
        let (program, args) = session.argv(&GisCommand::new("g.region").flag('g'));
        assert_eq!(program, "grass");
        assert_eq!(args, vec!["/gd/loc/PERMANENT", "--exec", "g.region", "-g"]);

        let session = GrassSession::new(GisConfig::default());
        let (program, args) = session.argv(&GisCommand::new("g.region").flag('g'));
        assert_eq!(program, "g.region");
        assert_eq!(args, vec!["-g"]);
    }

    #[tokio::test]
    async fn test_run_program_failure() {
        let result = run_program("lcp-toolbox-no-such-program", &[], "r.cost").await;
        match result {
            Err(Error::ExternalProcessFailure { module, status, .. }) => {
                assert_eq!(module, "r.cost");
                assert_eq!(status, None);
            }
            other => panic!("Expected ExternalProcessFailure, got {other:?}"),
        }
    }
}
