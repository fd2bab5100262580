//! In-memory GIS backend for tests
//!
//! Rasters are small grids of optional values where cell `(col, row)` covers
//! `x in [col, col + 1)`, `y in [row, row + 1)`. Cost surfaces hold the grid
//! distance from the nearest start cell and drains trace an L-shaped path
//! (along x, then along y) from each destination back to the first start.
//! Every command is recorded together with the peak number of commands that
//! were in flight at the same time.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::core::algebra::{Expression, Term};
use crate::core::error::{Error, LayerKind, Result};
use crate::core::gis::{CostSurface, Drain, Gis, GisCommand};
use crate::core::points::{Coordinate, Point};

type Grid = Vec<Option<f64>>;

pub struct MemoryGis {
    width: usize,
    height: usize,
    gisdbase: PathBuf,
    rasters: RefCell<HashMap<String, Grid>>,
    vectors: RefCell<HashMap<String, Vec<Point>>>,
    attributes: RefCell<HashMap<(String, String), Vec<f64>>>,
    starts: RefCell<HashMap<String, Vec<usize>>>,
    log: RefCell<Vec<GisCommand>>,
    calls: RefCell<HashMap<String, usize>>,
    failure: RefCell<Option<(String, usize)>>,
    in_flight: Cell<usize>,
    peak: Cell<usize>,
}

impl MemoryGis {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            gisdbase: std::env::temp_dir(),
            rasters: RefCell::new(HashMap::new()),
            vectors: RefCell::new(HashMap::new()),
            attributes: RefCell::new(HashMap::new()),
            starts: RefCell::new(HashMap::new()),
            log: RefCell::new(Vec::new()),
            calls: RefCell::new(HashMap::new()),
            failure: RefCell::new(None),
            in_flight: Cell::new(0),
            peak: Cell::new(0),
        }
    }

    /// Grid with a uniform friction raster and a point layer
    pub fn with_layers(width: usize, height: usize, friction: &str, points_layer: &str, points: Vec<Point>) -> Self {
        let gis = Self::new(width, height);
        gis.put_raster(friction, vec![Some(1.0); width * height]);
        gis.put_vector(points_layer, points);
        gis
    }

    pub fn set_gisdbase(&mut self, path: PathBuf) {
        self.gisdbase = path;
    }

    pub fn put_raster(&self, name: &str, cells: Grid) {
        assert_eq!(cells.len(), self.width * self.height);
        self.rasters.borrow_mut().insert(name.to_string(), cells);
    }

    pub fn put_vector(&self, name: &str, points: Vec<Point>) {
        self.vectors.borrow_mut().insert(name.to_string(), points);
    }

    pub fn raster(&self, name: &str) -> Option<Grid> {
        self.rasters.borrow().get(name).cloned()
    }

    pub fn has_raster(&self, name: &str) -> bool {
        self.rasters.borrow().contains_key(name)
    }

    pub fn has_vector(&self, name: &str) -> bool {
        self.vectors.borrow().contains_key(name)
    }

    pub fn raster_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.rasters.borrow().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn vector_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.vectors.borrow().keys().cloned().collect();
        names.sort();
        names
    }

    /// Value of the cell containing `(x, y)`
    pub fn value_at(&self, name: &str, x: f64, y: f64) -> Option<f64> {
        let cell = self.cell_of(&Coordinate::new(x, y))?;
        self.rasters.borrow().get(name)?.get(cell).copied().flatten()
    }

    pub fn commands(&self) -> Vec<GisCommand> {
        self.log.borrow().clone()
    }

    pub fn count(&self, module: &str) -> usize {
        self.log.borrow().iter().filter(|c| c.module() == module).count()
    }

    /// Highest number of commands that were running at the same time
    pub fn peak_concurrency(&self) -> usize {
        self.peak.get()
    }

    /// Make the `nth` (0-based) invocation of `module` fail
    pub fn fail_on(&self, module: &str, nth: usize) {
        *self.failure.borrow_mut() = Some((module.to_string(), nth));
    }

    fn cell_of(&self, coordinate: &Coordinate) -> Option<usize> {
        if coordinate.x < 0.0 || coordinate.y < 0.0 {
            return None;
        }
        let col = coordinate.x.floor() as usize;
        let row = coordinate.y.floor() as usize;
        (col < self.width && row < self.height).then_some(row * self.width + col)
    }

    fn col_row(&self, cell: usize) -> (usize, usize) {
        (cell % self.width, cell / self.width)
    }

    fn missing(&self, kind: LayerKind, name: &str, module: &str) -> Error {
        Error::ExternalProcessFailure {
            module: module.to_string(),
            status: Some(1),
            stderr: format!("ERROR: {kind} map <{name}> not found"),
        }
    }

    fn should_fail(&self, module: &str) -> bool {
        let mut calls = self.calls.borrow_mut();
        let seen = calls.entry(module.to_string()).or_insert(0);
        let nth = *seen;
        *seen += 1;
        matches!(&*self.failure.borrow(), Some((m, n)) if m == module && *n == nth)
    }

    fn grid_from(&self, name: &str, module: &str) -> Result<Grid> {
        self.rasters
            .borrow()
            .get(name)
            .cloned()
            .ok_or_else(|| self.missing(LayerKind::Raster, name, module))
    }

    fn rename(&self, kind: LayerKind, spec: &str) -> Result<()> {
        let (from, to) = spec
            .split_once(',')
            .ok_or_else(|| Error::InvalidInput(format!("g.rename {spec}")))?;
        match kind {
            LayerKind::Raster => {
                let mut rasters = self.rasters.borrow_mut();
                let grid = rasters
                    .remove(from)
                    .ok_or_else(|| self.missing(kind, from, "g.rename"))?;
                rasters.insert(to.to_string(), grid);
            }
            LayerKind::Vector => {
                let mut vectors = self.vectors.borrow_mut();
                let points = vectors
                    .remove(from)
                    .ok_or_else(|| self.missing(kind, from, "g.rename"))?;
                vectors.insert(to.to_string(), points);
            }
        }
        Ok(())
    }

    /// Model the side effects of a module; returns its stdout
    fn apply(&self, command: &GisCommand) -> Result<String> {
        let module = command.module();
        let param = |key: &str| command.get(key).unwrap_or_default().to_string();

        match module {
            "g.findfile" => {
                let name = param("file");
                let found = match param("element").as_str() {
                    "cell" => self.has_raster(&name),
                    _ => self.has_vector(&name),
                };
                if found {
                    Ok(format!("name={name}\nmapset=PERMANENT\n"))
                } else {
                    Err(Error::ExternalProcessFailure {
                        module: module.to_string(),
                        status: Some(1),
                        stderr: String::new(),
                    })
                }
            }
            "g.list" => {
                let names = match param("type").as_str() {
                    "raster" => self.raster_names(),
                    _ => self.vector_names(),
                };
                Ok(names.join("\n"))
            }
            "g.remove" => {
                let kind = param("type");
                for name in param("name").split(',') {
                    if kind == "raster" {
                        self.rasters.borrow_mut().remove(name);
                        self.starts.borrow_mut().remove(name);
                    } else {
                        self.vectors.borrow_mut().remove(name);
                    }
                }
                Ok(String::new())
            }
            "g.rename" => {
                if let Some(spec) = command.get("raster") {
                    self.rename(LayerKind::Raster, spec)?;
                }
                if let Some(spec) = command.get("vector") {
                    self.rename(LayerKind::Vector, spec)?;
                }
                Ok(String::new())
            }
            "g.region" => Ok(format!(
                "n={}\ns=0\nw=0\ne={}\nnsres=1\newres=1\nrows={}\ncols={}\n",
                self.height, self.width, self.height, self.width
            )),
            "g.gisenv" => Ok(format!(
                "GISDBASE={}\nLOCATION_NAME=memory\nMAPSET=PERMANENT\n",
                self.gisdbase.display()
            )),
            "r.info" => {
                let grid = self.grid_from(&param("map"), module)?;
                let values = grid.iter().flatten();
                let min = values.clone().copied().fold(f64::INFINITY, f64::min);
                let max = values.copied().fold(f64::NEG_INFINITY, f64::max);
                if min.is_infinite() {
                    return Ok("min=NULL\nmax=NULL\n".to_string());
                }
                Ok(format!("min={min}\nmax={max}\n"))
            }
            "r.null" => {
                let map = param("map");
                let value: f64 = param("setnull").parse().unwrap_or(0.0);
                let mut rasters = self.rasters.borrow_mut();
                let grid = rasters
                    .get_mut(&map)
                    .ok_or_else(|| self.missing(LayerKind::Raster, &map, module))?;
                for cell in grid.iter_mut() {
                    if *cell == Some(value) {
                        *cell = None;
                    }
                }
                Ok(String::new())
            }
            "r.stats" => {
                let grid = self.grid_from(&param("input"), module)?;
                let mut out = String::new();
                for (cell, value) in grid.iter().enumerate() {
                    if let Some(value) = value {
                        let (col, row) = self.col_row(cell);
                        out.push_str(&format!("{}.5 {}.5 {}\n", col, row, value));
                    }
                }
                Ok(out)
            }
            "v.out.ascii" => {
                let name = param("input");
                let vectors = self.vectors.borrow();
                let points = vectors
                    .get(&name)
                    .ok_or_else(|| self.missing(LayerKind::Vector, &name, module))?;
                Ok(points
                    .iter()
                    .map(|p| format!("{}|{}|{}\n", p.x, p.y, p.id))
                    .collect())
            }
            "v.select" => {
                let input = param("ainput");
                let points = self
                    .vectors
                    .borrow()
                    .get(&input)
                    .cloned()
                    .ok_or_else(|| self.missing(LayerKind::Vector, &input, module))?;
                let inside = points
                    .into_iter()
                    .filter(|p| self.cell_of(&p.coordinate()).is_some())
                    .collect();
                self.put_vector(&param("output"), inside);
                Ok(String::new())
            }
            "v.random" => {
                let n: usize = param("npoints").parse().unwrap_or(0);
                let points = (0..n)
                    .map(|i| {
                        let cell = (i * 7 + 3) % (self.width * self.height);
                        let (col, row) = self.col_row(cell);
                        Point::new(i as u32 + 1, col as f64 + 0.5, row as f64 + 0.5)
                    })
                    .collect();
                self.put_vector(&param("output"), points);
                Ok(String::new())
            }
            "r.random" => {
                let grid = self.grid_from(&param("input"), module)?;
                let n: usize = param("npoints").parse().unwrap_or(0);
                let values: Vec<f64> = grid.iter().flatten().copied().take(n).collect();
                let output = param("vector");
                self.put_vector(&output, Vec::new());
                self.attributes
                    .borrow_mut()
                    .insert((output, "value".to_string()), values);
                Ok(String::new())
            }
            "v.db.select" => {
                let key = (param("map"), param("columns"));
                let attributes = self.attributes.borrow();
                let values = attributes.get(&key).ok_or_else(|| Error::ExternalProcessFailure {
                    module: module.to_string(),
                    status: Some(1),
                    stderr: format!("ERROR: column <{}> not found", key.1),
                })?;
                Ok(values.iter().map(|v| format!("{v}\n")).collect())
            }
            _ if module.starts_with("r.out.") => Ok(String::new()),
            _ => {
                // Generic module: materialise whatever it declares as output
                for key in ["output", "slope"] {
                    if let Some(name) = command.get(key) {
                        if module.starts_with("v.") && module != "v.to.rast" {
                            self.vectors.borrow_mut().entry(name.to_string()).or_default();
                        } else {
                            self.put_raster(name, vec![Some(1.0); self.width * self.height]);
                        }
                    }
                }
                Ok(String::new())
            }
        }
    }

    fn evaluate(&self, expression: &Expression) -> Result<Grid> {
        let n = self.width * self.height;
        let mut out = vec![Some(0.0); n];
        for term in &expression.terms {
            let contribution: Grid = match term {
                Term::Constant(value) => vec![Some(*value as f64); n],
                Term::Indicator(name) => self
                    .grid_from(name, "r.mapcalc")?
                    .iter()
                    .map(|v| Some(if v.is_some() { 1.0 } else { 0.0 }))
                    .collect(),
                Term::ValueOrZero(name) => self
                    .grid_from(name, "r.mapcalc")?
                    .iter()
                    .map(|v| Some(v.unwrap_or(0.0)))
                    .collect(),
            };
            for (cell, value) in out.iter_mut().zip(contribution) {
                *cell = match (*cell, value) {
                    (Some(a), Some(b)) => Some(a + b),
                    _ => None,
                };
            }
        }
        Ok(out)
    }

    /// Cells on the L-shaped path from `from` to `to`, starting at `from`
    fn trace(&self, from: usize, to: usize) -> Vec<usize> {
        let (mut col, mut row) = self.col_row(from);
        let (to_col, to_row) = self.col_row(to);
        let mut cells = vec![row * self.width + col];
        while col != to_col {
            col = if col < to_col { col + 1 } else { col - 1 };
            cells.push(row * self.width + col);
        }
        while row != to_row {
            row = if row < to_row { row + 1 } else { row - 1 };
            cells.push(row * self.width + col);
        }
        cells
    }
}

impl Gis for MemoryGis {
    async fn run(&self, command: &GisCommand) -> Result<String> {
        self.log.borrow_mut().push(command.clone());
        let fail = self.should_fail(command.module());

        self.in_flight.set(self.in_flight.get() + 1);
        self.peak.set(self.peak.get().max(self.in_flight.get()));
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        self.in_flight.set(self.in_flight.get() - 1);

        if fail {
            return Err(Error::ExternalProcessFailure {
                module: command.module().to_string(),
                status: Some(1),
                stderr: "injected failure".to_string(),
            });
        }
        self.apply(command)
    }

    async fn cost_surface(&self, request: &CostSurface) -> Result<()> {
        self.run(&request.command()).await?;

        let friction = self.grid_from(&request.friction, "r.cost")?;
        let starts: Vec<usize> = request
            .start
            .iter()
            .filter_map(|c| self.cell_of(c))
            .collect();
        if starts.is_empty() {
            return Err(Error::ExternalProcessFailure {
                module: "r.cost".to_string(),
                status: Some(1),
                stderr: "No start points".to_string(),
            });
        }

        let surface: Grid = (0..self.width * self.height)
            .map(|cell| {
                friction[cell]?;
                let (col, row) = self.col_row(cell);
                let cost = starts
                    .iter()
                    .map(|&s| {
                        let (sc, sr) = self.col_row(s);
                        (col.abs_diff(sc) + row.abs_diff(sr)) as f64
                    })
                    .fold(f64::INFINITY, f64::min);
                match request.max_cost {
                    Some(max) if cost > max => None,
                    _ => Some(cost),
                }
            })
            .collect();

        self.put_raster(&request.output, surface);
        self.starts.borrow_mut().insert(request.output.clone(), starts);
        if let Some(direction) = &request.direction {
            self.put_raster(direction, vec![Some(0.0); self.width * self.height]);
        }
        Ok(())
    }

    async fn drain(&self, request: &Drain) -> Result<()> {
        self.run(&request.command()).await?;

        self.grid_from(&request.cost, "r.drain")?;
        let start = self
            .starts
            .borrow()
            .get(&request.cost)
            .and_then(|s| s.first().copied())
            .ok_or_else(|| self.missing(LayerKind::Raster, &request.cost, "r.drain"))?;

        let mut out: Grid = vec![None; self.width * self.height];
        for destination in &request.destinations {
            let Some(cell) = self.cell_of(destination) else {
                continue;
            };
            let path = self.trace(cell, start);
            let steps = path.len();
            for (i, cell) in path.into_iter().enumerate() {
                let value = if request.accumulate {
                    // cost remaining to the start, largest at the destination
                    (steps - 1 - i) as f64
                } else {
                    1.0
                };
                out[cell] = Some(out[cell].map_or(value, |v: f64| v.max(value)));
            }
        }

        self.put_raster(&request.output, out);
        if let Some(vector) = &request.vector_output {
            self.put_vector(vector, Vec::new());
        }
        Ok(())
    }

    async fn map_calc(&self, expression: &Expression) -> Result<()> {
        expression.validate()?;
        self.run(&GisCommand::new("r.mapcalc").param("expression", expression))
            .await?;
        let grid = self.evaluate(expression)?;
        self.put_raster(&expression.output, grid);
        Ok(())
    }

    async fn map_calc_raw(&self, expression: &str) -> Result<()> {
        self.run(&GisCommand::new("r.mapcalc").param("expression", expression))
            .await?;
        if let Some((output, _)) = expression.split_once('=') {
            self.put_raster(output.trim(), vec![Some(1.0); self.width * self.height]);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_drain_marks_path_to_start() {
        let gis = MemoryGis::new(5, 5);
        gis.put_raster("friction", vec![Some(1.0); 25]);

        gis.cost_surface(&CostSurface::new("friction", "cost", vec![Coordinate::new(0.5, 0.5)]))
            .await
            .unwrap();
        gis.drain(&Drain::new("cost", "path", vec![Coordinate::new(2.5, 1.5)]))
            .await
            .unwrap();

        let path = gis.raster("path").unwrap();
        let marked: usize = path.iter().flatten().count();
        // (2,1) -> (1,1) -> (0,1) -> (0,0)
        assert_eq!(marked, 4);
        assert_eq!(gis.value_at("path", 0.5, 0.5), Some(1.0));
        assert_eq!(gis.value_at("path", 4.5, 4.5), None);
    }

    #[tokio::test]
    async fn test_findfile_missing_is_status_one() {
        let gis = MemoryGis::new(2, 2);
        assert!(!gis.exists(LayerKind::Raster, "nope").await.unwrap());
        gis.put_raster("yes", vec![None; 4]);
        assert!(gis.exists(LayerKind::Raster, "yes").await.unwrap());
    }

    #[tokio::test]
    async fn test_fail_on_nth_call() {
        let gis = MemoryGis::new(2, 2);
        gis.fail_on("g.region", 1);
        assert!(gis.region_resolution().await.is_ok());
        assert!(matches!(
            gis.region_resolution().await,
            Err(Error::ExternalProcessFailure { .. })
        ));
        assert!(gis.region_resolution().await.is_ok());
    }
}
