//! Repeated random sampling of raster values into a CSV table

use std::path::PathBuf;

use crate::core::context::RunContext;
use crate::core::error::{Error, LayerKind, Result};
use crate::core::gis::{Gis, GisCommand};

#[derive(Debug, Clone)]
pub struct SampleOptions {
    pub input: String,
    /// CSV file to write
    pub output: PathBuf,
    /// Cells drawn per simulation
    pub size: usize,
    pub sims: usize,
    pub overwrite: bool,
}

impl SampleOptions {
    pub fn validate(&self) -> Result<()> {
        if self.size == 0 {
            return Err(Error::InvalidInput("Sample size must be at least 1".to_string()));
        }
        if self.sims == 0 {
            return Err(Error::InvalidInput("Number of simulations must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// `p1,p2,...,pN`
fn header(size: usize) -> Vec<String> {
    (1..=size).map(|n| format!("p{n}")).collect()
}

/// Write one row of sampled values per simulation; returns the number of rows written
pub async fn run<G: Gis>(gis: &G, options: &SampleOptions) -> Result<usize> {
    options.validate()?;
    gis.require(LayerKind::Raster, &options.input).await?;
    if options.output.exists() && !options.overwrite {
        return Err(Error::OutputExists(options.output.display().to_string()));
    }

    let ctx = RunContext::new("sample");
    let dir = match options.output.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let partial = ctx.file(&dir, "samples", "csv");

    let rows = ctx
        .guard(gis, async {
            // Rows may be shorter than the header when the raster has fewer non-null cells
            let mut writer = csv::WriterBuilder::new().flexible(true).from_path(&partial)?;
            writer.write_record(header(options.size))?;

            let sample = ctx.vector("mc");
            for sim in 0..options.sims {
                gis.run(
                    &GisCommand::new("r.random")
                        .flag('b')
                        .overwrite()
                        .quiet()
                        .param("input", &options.input)
                        .param("npoints", options.size)
                        .param("vector", &sample),
                )
                .await?;

                let values = gis.attribute_column(&sample, "value").await?;
                log::debug!("Simulation {}: {} values", sim + 1, values.len());
                writer.write_record(values.iter().map(f64::to_string))?;
            }
            writer.flush()?;
            drop(writer);

            tokio::fs::rename(&partial, &options.output).await?;
            Ok(options.sims)
        })
        .await?;

    log::info!("Wrote {rows} samples to {}", options.output.display());
    Ok(rows)
}
