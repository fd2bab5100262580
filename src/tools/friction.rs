//! Slope-based friction surfaces

use std::fmt;
use std::str::FromStr;

use crate::core::context::RunContext;
use crate::core::error::{suggest_name, Error, LayerKind, Result};
use crate::core::gis::{Gis, GisCommand};
use crate::tools::{prepare_output, validate_map_name};

/// Cost of walking as a function of slope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrictionFormula {
    /// Tobler's hiking function, inverted to time per metre
    Tobler,
    /// Herzog's polynomial fit to Minetti's energy expenditure data
    Minetti,
}

impl FrictionFormula {
    pub const NAMES: [&'static str; 3] = ["Tobler", "Hiker", "Minetti"];

    /// `r.mapcalc` expression computing `output` from a percent slope raster
    pub fn expression(&self, output: &str, slope: &str) -> String {
        let s = format!("({slope} / 100)");
        match self {
            FrictionFormula::Tobler => {
                format!("{output} = 1.0 / (( 6.0 * exp(-3.5 * abs({s} + 0.05))) * 1000)")
            }
            FrictionFormula::Minetti => format!(
                "{output} = 1337.8 * {s}^6 + 278.19 * {s}^5 - 517.39 * {s}^4 - 78.199 * {s}^3 + 93.419 * {s}^2 + 19.825 * {s} + 1.64"
            ),
        }
    }
}

impl FromStr for FrictionFormula {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "tobler" | "hiker" => Ok(FrictionFormula::Tobler),
            "minetti" => Ok(FrictionFormula::Minetti),
            _ => {
                let names: Vec<String> = Self::NAMES.iter().map(|n| n.to_string()).collect();
                let mut msg = format!("Unknown friction formula '{s}'");
                if let Some(suggestion) = suggest_name(s, &names) {
                    msg.push_str(&format!(". Did you mean '{suggestion}'?"));
                } else {
                    msg.push_str(&format!(". Known formulas: {}", Self::NAMES.join(", ")));
                }
                Err(Error::InvalidInput(msg))
            }
        }
    }
}

impl fmt::Display for FrictionFormula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrictionFormula::Tobler => f.write_str("Tobler"),
            FrictionFormula::Minetti => f.write_str("Minetti"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FrictionOptions {
    /// Elevation raster
    pub dem: String,
    pub output: String,
    /// Keep the slope raster under this name
    pub slope: Option<String>,
    pub formula: FrictionFormula,
    pub overwrite: bool,
}

pub async fn run<G: Gis>(gis: &G, options: &FrictionOptions) -> Result<()> {
    validate_map_name(&options.output)?;
    if let Some(slope) = &options.slope {
        validate_map_name(slope)?;
    }

    gis.require(LayerKind::Raster, &options.dem).await?;
    prepare_output(gis, LayerKind::Raster, &options.output, options.overwrite).await?;
    if let Some(slope) = &options.slope {
        prepare_output(gis, LayerKind::Raster, slope, options.overwrite).await?;
    }

    let ctx = RunContext::new("friction");
    ctx.guard(gis, async {
        let slope = match &options.slope {
            Some(slope) => slope.clone(),
            None => ctx.raster("slope"),
        };

        gis.run(
            &GisCommand::new("r.slope.aspect")
                .overwrite()
                .quiet()
                .param("elevation", &options.dem)
                .param("slope", &slope)
                .param("format", "percent"),
        )
        .await?;
        gis.map_calc_raw(&options.formula.expression(&options.output, &slope))
            .await?;

        log::info!("Friction raster <{}> complete ({})", options.output, options.formula);
        Ok(())
    })
    .await
}
