//! Toolbox commands built on the core modules
//!
//! Each tool validates its parameters, checks inputs and outputs, and runs
//! its GRASS steps inside a [`RunContext`](crate::core::RunContext) so
//! temporary layers are removed on every exit path.

pub mod circuit;
pub mod costnn;
pub mod friction;
pub mod lcp;
pub mod sample;
pub mod terrain;
pub mod totalcost;
pub mod viewshed;

use crate::core::error::{Error, LayerKind, Result};
use crate::core::gis::Gis;

/// Refuse an existing output unless overwriting, in which case remove it first
pub async fn prepare_output<G: Gis>(gis: &G, kind: LayerKind, name: &str, overwrite: bool) -> Result<()> {
    if !gis.exists(kind, name).await? {
        return Ok(());
    }
    if !overwrite {
        return Err(Error::OutputExists(name.to_string()));
    }
    log::debug!("Removing existing {kind} <{name}>");
    gis.remove_layers(kind, &[name.to_string()]).await
}

/// Reject names GRASS would not accept as map names
pub fn validate_map_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic())
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!("<{name}> is not a legal map name")))
    }
}
