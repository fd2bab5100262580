//! Deviation from mean elevation

use futures::future::try_join;

use crate::core::context::RunContext;
use crate::core::error::{Error, LayerKind, Result};
use crate::core::gis::{Gis, GisCommand};
use crate::tools::{prepare_output, validate_map_name};

#[derive(Debug, Clone)]
pub struct TerrainOptions {
    pub input: String,
    pub output: String,
    /// Neighbourhood size in cells, a positive odd number
    pub size: u32,
    pub circular: bool,
    pub overwrite: bool,
}

impl TerrainOptions {
    pub fn validate(&self) -> Result<()> {
        if self.size == 0 || self.size % 2 == 0 {
            return Err(Error::InvalidInput(format!(
                "Neighbourhood size must be a positive odd number, got {}",
                self.size
            )));
        }
        validate_map_name(&self.output)
    }
}

fn neighbours(options: &TerrainOptions, method: &str, output: &str) -> GisCommand {
    GisCommand::new("r.neighbors")
        .flag_if('c', options.circular)
        .overwrite()
        .quiet()
        .param("input", &options.input)
        .param("output", output)
        .param("method", method)
        .param("size", options.size)
}

/// `(input - mean) / stddev` over a moving window
pub async fn run<G: Gis>(gis: &G, options: &TerrainOptions) -> Result<()> {
    options.validate()?;
    gis.require(LayerKind::Raster, &options.input).await?;
    prepare_output(gis, LayerKind::Raster, &options.output, options.overwrite).await?;

    let ctx = RunContext::new("terrain");
    ctx.guard(gis, async {
        let avg = ctx.raster("avg");
        let stddev = ctx.raster("stddev");

        let average = neighbours(options, "average", &avg);
        let deviation = neighbours(options, "stddev", &stddev);
        try_join(gis.run(&average), gis.run(&deviation)).await?;

        gis.map_calc_raw(&format!(
            "{} = ({} - {}) / {}",
            options.output, options.input, avg, stddev
        ))
        .await?;
        log::info!("Deviation from mean written to <{}>", options.output);
        Ok(())
    })
    .await
}
