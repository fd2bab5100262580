//! # lcp-toolbox
//!
//! Least-cost path networks and related cost-distance analyses, computed by
//! orchestrating GRASS GIS modules.
//!
//! Cost propagation (`r.cost`), path tracing (`r.drain`) and map algebra run
//! as external GRASS processes. This crate decides which point pairs to
//! connect, runs several of them concurrently in lanes, and folds the traced
//! paths into one count raster without ever holding a grid in memory.
//!
//! ## Example
//!
//! ```rust,no_run
//! use lcp_toolbox::{GisConfig, GrassSession};
//! use lcp_toolbox::tools::lcp::{self, LcpOptions};
//!
//! # async fn example() -> lcp_toolbox::Result<()> {
//! let gis = GrassSession::new(GisConfig::default().with_env());
//! let report = lcp::run(&gis, &LcpOptions {
//!     friction: "friction".to_string(),
//!     points: "sites".to_string(),
//!     raster_output: Some("paths".to_string()),
//!     nearest: 3,
//!     ..Default::default()
//! }).await?;
//! println!("{} iterations", report.summary.iterations);
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod tools;

// Re-export main types for convenience
pub use core::config::{effective_lanes, GisConfig};
pub use core::error::{Error, LayerKind, Result};
pub use core::gis::{Gis, GisCommand, GrassSession};
pub use core::scheduler::{ProgressCallback, RunSummary};
