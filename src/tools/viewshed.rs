//! One viewshed raster per observer point

use futures::stream::{self, StreamExt, TryStreamExt};

use crate::core::error::{Error, LayerKind, Result};
use crate::core::gis::{Gis, GisCommand};
use crate::core::points::{Point, PointSet};
use crate::tools::{prepare_output, validate_map_name};

#[derive(Debug, Clone)]
pub struct ViewshedOptions {
    pub dem: String,
    pub points: String,
    /// Output names are `<prefix><point id>`
    pub prefix: String,
    pub observer_elevation: f64,
    pub target_elevation: f64,
    /// Maximum visibility radius in map units, -1 for unlimited
    pub max_distance: f64,
    /// Account for the curvature of the earth
    pub curvature: bool,
    pub lanes: usize,
    pub overwrite: bool,
}

impl Default for ViewshedOptions {
    fn default() -> Self {
        Self {
            dem: String::new(),
            points: String::new(),
            prefix: "viewshed_".to_string(),
            observer_elevation: 1.75,
            target_elevation: 0.0,
            max_distance: -1.0,
            curvature: false,
            lanes: 2,
            overwrite: false,
        }
    }
}

impl ViewshedOptions {
    pub fn validate(&self) -> Result<()> {
        let unlimited = self.max_distance == -1.0;
        if !unlimited && (self.max_distance.is_nan() || self.max_distance <= 0.0) {
            return Err(Error::InvalidInput(format!(
                "Maximum distance must be positive or -1, got {}",
                self.max_distance
            )));
        }
        validate_map_name(&format!("{}1", self.prefix))
    }

    pub fn output_name(&self, point: &Point) -> String {
        format!("{}{}", self.prefix, point.id)
    }

    fn command(&self, point: &Point) -> GisCommand {
        GisCommand::new("r.viewshed")
            .flag_if('c', self.curvature)
            .overwrite()
            .quiet()
            .param("input", &self.dem)
            .param("output", self.output_name(point))
            .param("coordinates", point.coordinate())
            .param("observer_elevation", self.observer_elevation)
            .param("target_elevation", self.target_elevation)
            .param("max_distance", self.max_distance)
    }
}

/// Compute all viewsheds, at most `lanes` at a time; returns the output names in point order
pub async fn run<G: Gis>(gis: &G, options: &ViewshedOptions) -> Result<Vec<String>> {
    options.validate()?;
    gis.require(LayerKind::Raster, &options.dem).await?;
    gis.require(LayerKind::Vector, &options.points).await?;

    let points = PointSet::load(gis, &options.points).await?;
    for point in points.iter() {
        prepare_output(gis, LayerKind::Raster, &options.output_name(point), options.overwrite).await?;
    }

    log::info!("Computing {} viewsheds, {} at a time", points.len(), options.lanes.max(1));
    stream::iter(points.iter())
        .map(|point| async move {
            gis.run(&options.command(point)).await?;
            log::debug!("Viewshed for point {} done", point.id);
            Ok::<_, Error>(options.output_name(point))
        })
        .buffered(options.lanes.max(1))
        .try_collect()
        .await
}
