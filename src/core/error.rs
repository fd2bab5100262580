//! Error types for lcp-toolbox
//!
//! Covers parameter validation, missing input layers and failures of the
//! external GRASS modules every tool delegates to.

use std::fmt;

use strsim::{jaro_winkler, normalized_levenshtein};

/// Kind of GIS layer an error refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    Raster,
    Vector,
}

impl LayerKind {
    /// Element name used by `g.findfile`
    pub fn element(self) -> &'static str {
        match self {
            LayerKind::Raster => "cell",
            LayerKind::Vector => "vector",
        }
    }

    /// Type name used by `g.list`, `g.remove` and `g.rename`
    pub fn type_name(self) -> &'static str {
        match self {
            LayerKind::Raster => "raster",
            LayerKind::Vector => "vector",
        }
    }
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

/// Main error type for lcp-toolbox operations
#[derive(Debug)]
pub enum Error {
    /// Input raster or vector layer does not exist
    SourceUnavailable {
        kind: LayerKind,
        name: String,
        suggestion: Option<String>,
    },

    /// Fewer than two points to build paths between
    InsufficientPoints { found: usize },

    /// Nearest point count outside `1..total`
    InvalidK { k: usize, total: usize },

    /// No destination satisfied the selection policy for a source point.
    ///
    /// Not fatal: the scheduler skips that lane's contribution.
    NoCandidates { source_id: u32 },

    /// An external GIS module exited unsuccessfully or could not be started
    ExternalProcessFailure {
        module: String,
        status: Option<i32>,
        stderr: String,
    },

    /// Failure while processing a lane batch, tagged with its iteration index
    Iteration { index: usize, source: Box<Error> },

    /// Output layer already exists and overwriting was not requested
    OutputExists(String),

    /// Invalid configuration or parameters
    InvalidInput(String),

    /// Unexpected output from an external module
    Parse(String),

    /// File I/O error
    IoError(std::io::Error),
}

impl Error {
    /// Wrap an error with the iteration it happened in.
    ///
    /// Already tagged errors are left alone so the innermost index wins.
    pub fn at_iteration(self, index: usize) -> Self {
        match self {
            tagged @ Error::Iteration { .. } => tagged,
            other => Error::Iteration {
                index,
                source: Box::new(other),
            },
        }
    }

    /// Whether the error must abort the whole run
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::NoCandidates { .. } => false,
            Error::Iteration { source, .. } => source.is_fatal(),
            _ => true,
        }
    }

    /// Innermost error, skipping iteration tags
    pub fn root(&self) -> &Error {
        match self {
            Error::Iteration { source, .. } => source.root(),
            other => other,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::SourceUnavailable { kind, name, suggestion } => {
                write!(f, "Input {kind} map <{name}> not found")?;
                if let Some(suggestion) = suggestion {
                    write!(f, ". Did you mean <{suggestion}>?")?;
                }
                Ok(())
            }
            Error::InsufficientPoints { found } => {
                write!(f, "At least 2 points are needed, found {found}")
            }
            Error::InvalidK { k, total } => {
                write!(
                    f,
                    "The nearest point value must be a positive number smaller than the feature count ({k} requested, {total} points)"
                )
            }
            Error::NoCandidates { source_id } => {
                write!(f, "No destination points selected for point {source_id}")
            }
            Error::ExternalProcessFailure { module, status, stderr } => {
                match status {
                    Some(code) => write!(f, "{module} failed with exit code {code}")?,
                    None => write!(f, "{module} failed")?,
                }
                if !stderr.is_empty() {
                    write!(f, ": {stderr}")?;
                }
                Ok(())
            }
            Error::Iteration { index, source } => {
                write!(f, "Iteration {index}: {source}")
            }
            Error::OutputExists(name) => {
                write!(f, "Output map <{name}> already exists (use --overwrite)")
            }
            Error::InvalidInput(msg) => {
                write!(f, "Invalid input: {msg}")
            }
            Error::Parse(msg) => {
                write!(f, "Unexpected module output: {msg}")
            }
            Error::IoError(err) => {
                write!(f, "I/O error: {err}")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(err) => Some(err),
            Error::Iteration { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IoError(err)
    }
}

impl From<csv::Error> for Error {
    fn from(err: csv::Error) -> Self {
        Error::IoError(std::io::Error::new(std::io::ErrorKind::Other, err))
    }
}

/// Suggest a known name (layer, formula) for a misspelled one
///
/// Scores candidates with 70% Jaro-Winkler and 30% normalized Levenshtein,
/// plus a small bonus for a shared prefix. Layer names often differ only by a
/// suffix (`dem_10m` vs `dem_25m`), so exact matches return `None` and the
/// threshold is kept at 0.65.
pub fn suggest_name(name: &str, candidates: &[String]) -> Option<String> {
    let name_lower = name.to_lowercase();
    let mut best_match = None;
    let mut best_score = 0.0f64;
    let min_threshold = 0.65;

    for candidate in candidates {
        // Listed names may be qualified with a mapset
        let bare = candidate.split('@').next().unwrap_or(candidate);
        let candidate_lower = bare.to_lowercase();
        if candidate_lower == name_lower {
            return None;
        }

        let jw_score = jaro_winkler(&name_lower, &candidate_lower);
        let lev_score = normalized_levenshtein(&name_lower, &candidate_lower);
        let mut score = (jw_score * 0.7) + (lev_score * 0.3);

        let prefix: String = name_lower.chars().take(5).collect();
        if prefix.chars().count() >= 3 && candidate_lower.starts_with(&prefix) {
            score += 0.05;
        }

        if score >= min_threshold && score > best_score {
            best_score = score;
            best_match = Some(bare.to_string());
        }
    }

    best_match
}

/// Convenience result type for lcp-toolbox operations
pub type Result<T> = std::result::Result<T, Error>;
