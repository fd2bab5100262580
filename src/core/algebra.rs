//! Structured map-algebra expressions for raster accumulation
//!
//! `r.mapcalc` cannot read the raster it is writing, so an expression keeps
//! its output separate from its inputs and refuses to render otherwise.

use std::fmt;

use crate::core::error::{Error, Result};

/// One summand of an accumulation expression
#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    /// 1 where the raster has a value, 0 where it is null
    Indicator(String),
    /// The raster's value, 0 where it is null
    ValueOrZero(String),
    /// A literal integer
    Constant(i64),
}

impl Term {
    /// Raster referenced by the term, if any
    pub fn input(&self) -> Option<&str> {
        match self {
            Term::Indicator(name) | Term::ValueOrZero(name) => Some(name),
            Term::Constant(_) => None,
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Indicator(name) => write!(f, "if(isnull({name}),0,1)"),
            Term::ValueOrZero(name) => write!(f, "if(isnull({name}),0,{name})"),
            Term::Constant(value) => write!(f, "{value}"),
        }
    }
}

/// `output = term + term + ...`
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    pub output: String,
    pub terms: Vec<Term>,
}

impl Expression {
    pub fn new(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            terms: Vec::new(),
        }
    }

    pub fn term(mut self, term: Term) -> Self {
        self.terms.push(term);
        self
    }

    /// Add an indicator term per raster
    pub fn indicators<I, S>(mut self, rasters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.terms
            .extend(rasters.into_iter().map(|r| Term::Indicator(r.into())));
        self
    }

    /// Raster names read by the expression
    pub fn inputs(&self) -> impl Iterator<Item = &str> {
        self.terms.iter().filter_map(Term::input)
    }

    /// Reject expressions that read their own output
    pub fn validate(&self) -> Result<()> {
        if self.inputs().any(|input| input == self.output) {
            return Err(Error::InvalidInput(format!(
                "map algebra output <{}> cannot also be an input",
                self.output
            )));
        }
        Ok(())
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = ", self.output)?;
        if self.terms.is_empty() {
            return f.write_str("0");
        }
        for (i, term) in self.terms.iter().enumerate() {
            if i > 0 {
                f.write_str(" + ")?;
            }
            write!(f, "{term}")?;
        }
        Ok(())
    }
}
