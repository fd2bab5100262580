//! Run-scoped temporary layer and file bookkeeping
//!
//! Every temporary name is namespaced by tool and process id so concurrent
//! invocations on the same mapset never collide. Names are recorded as they
//! are handed out and removed again by [`RunContext::cleanup`]. Final
//! outputs can be registered too; [`RunContext::guard`] removes those only
//! when the run fails, so an aborted run never leaves a partial result.

use std::cell::RefCell;
use std::future::Future;
use std::path::{Path, PathBuf};

use crate::core::error::{LayerKind, Result};
use crate::core::gis::Gis;

/// Owner of all temporary names allocated during one tool run
///
/// Registries use interior mutability so lanes running concurrently inside
/// one task can allocate names through a shared reference.
pub struct RunContext {
    tool: String,
    pid: u32,
    rasters: RefCell<Vec<String>>,
    vectors: RefCell<Vec<String>>,
    files: RefCell<Vec<PathBuf>>,
    output_rasters: RefCell<Vec<String>>,
    output_vectors: RefCell<Vec<String>>,
}

impl RunContext {
    pub fn new(tool: &str) -> Self {
        Self::with_pid(tool, std::process::id())
    }

    pub fn with_pid(tool: &str, pid: u32) -> Self {
        Self {
            tool: tool.replace('.', "_"),
            pid,
            rasters: RefCell::new(Vec::new()),
            vectors: RefCell::new(Vec::new()),
            files: RefCell::new(Vec::new()),
            output_rasters: RefCell::new(Vec::new()),
            output_vectors: RefCell::new(Vec::new()),
        }
    }

    pub fn tool(&self) -> &str {
        &self.tool
    }

    /// `tmp_<tool>_<stem>_<pid>`
    pub fn name(&self, stem: &str) -> String {
        format!("tmp_{}_{}_{}", self.tool, stem, self.pid)
    }

    /// Allocate (or re-use) a temporary raster name
    pub fn raster(&self, stem: &str) -> String {
        register(&self.rasters, self.name(stem))
    }

    pub fn vector(&self, stem: &str) -> String {
        register(&self.vectors, self.name(stem))
    }

    /// Raster name private to one lane and iteration parity
    pub fn lane_raster(&self, stem: &str, lane: usize, parity: usize) -> String {
        register(&self.rasters, format!("{}_{}_{}", self.name(stem), lane, parity))
    }

    pub fn lane_vector(&self, stem: &str, lane: usize, parity: usize) -> String {
        register(&self.vectors, format!("{}_{}_{}", self.name(stem), lane, parity))
    }

    /// Allocate a temporary file `<dir>/tmp_<tool>_<stem>_<pid>.<extension>`
    pub fn file(&self, dir: &Path, stem: &str, extension: &str) -> PathBuf {
        self.track_file(dir.join(format!("{}.{}", self.name(stem), extension)))
    }

    /// Record a file written by an external program so it is removed on cleanup
    pub fn track_file(&self, path: PathBuf) -> PathBuf {
        let mut files = self.files.borrow_mut();
        if !files.contains(&path) {
            files.push(path.clone());
        }
        path
    }

    /// Register a user-named raster output, removed if the run fails
    pub fn output_raster(&self, name: &str) -> String {
        register(&self.output_rasters, name.to_string())
    }

    /// Register a user-named vector output, removed if the run fails
    pub fn output_vector(&self, name: &str) -> String {
        register(&self.output_vectors, name.to_string())
    }

    pub fn rasters(&self) -> Vec<String> {
        self.rasters.borrow().clone()
    }

    pub fn vectors(&self) -> Vec<String> {
        self.vectors.borrow().clone()
    }

    pub fn files(&self) -> Vec<PathBuf> {
        self.files.borrow().clone()
    }

    fn is_clean(&self) -> bool {
        self.rasters.borrow().is_empty()
            && self.vectors.borrow().is_empty()
            && self.files.borrow().is_empty()
    }

    /// Remove every recorded raster, vector and file.
    ///
    /// Registries are emptied even when removal fails so the context is not
    /// reported as leaking on drop; the first failure is returned.
    pub async fn cleanup<G: Gis>(&self, gis: &G) -> Result<()> {
        let rasters = self.rasters.take();
        let vectors = self.vectors.take();
        let files = self.files.take();

        log::debug!(
            "Cleaning up {} rasters, {} vectors and {} files",
            rasters.len(),
            vectors.len(),
            files.len()
        );

        let raster_result = gis.remove_layers(LayerKind::Raster, &rasters).await;
        let vector_result = gis.remove_layers(LayerKind::Vector, &vectors).await;

        let mut file_result = Ok(());
        for path in files {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    log::warn!("Could not remove {}: {e}", path.display());
                    if file_result.is_ok() {
                        file_result = Err(e.into());
                    }
                }
            }
        }

        raster_result.and(vector_result).and(file_result)
    }

    /// Await `body`, then clean up regardless of its outcome.
    ///
    /// The body's error takes precedence over a cleanup error.
    pub async fn guard<G, T, F>(&self, gis: &G, body: F) -> Result<T>
    where
        G: Gis,
        F: Future<Output = Result<T>>,
    {
        let result = body.await;
        let cleanup = match &result {
            Ok(_) => {
                self.keep_outputs();
                self.cleanup(gis).await
            }
            Err(_) => {
                let discarded = self.discard_outputs(gis).await;
                self.cleanup(gis).await.and(discarded)
            }
        };

        match (result, cleanup) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(cleanup_error)) => {
                log::warn!("Cleanup after failure also failed: {cleanup_error}");
                Err(e)
            }
        }
    }

    fn keep_outputs(&self) {
        self.output_rasters.take();
        self.output_vectors.take();
    }

    /// Remove the registered outputs of a failed run
    async fn discard_outputs<G: Gis>(&self, gis: &G) -> Result<()> {
        let rasters = self.output_rasters.take();
        let vectors = self.output_vectors.take();
        if !rasters.is_empty() || !vectors.is_empty() {
            log::warn!("Run failed, removing partial outputs {rasters:?} {vectors:?}");
        }
        let raster_result = gis.remove_layers(LayerKind::Raster, &rasters).await;
        let vector_result = gis.remove_layers(LayerKind::Vector, &vectors).await;
        raster_result.and(vector_result)
    }
}

impl Drop for RunContext {
    fn drop(&mut self) {
        if !self.is_clean() {
            log::warn!(
                "Temporary data of {} left behind: rasters {:?}, vectors {:?}, files {:?}",
                self.tool,
                self.rasters.get_mut(),
                self.vectors.get_mut(),
                self.files.get_mut()
            );
        }
    }
}

fn register(registry: &RefCell<Vec<String>>, name: String) -> String {
    let mut names = registry.borrow_mut();
    if !names.contains(&name) {
        names.push(name.clone());
    }
    name
}
