//! Sample arbitration.
//!
//! When two primitives write the same sample location, an arbitrator decides
//! whether the new candidate replaces the existing values. Without one, the
//! last write wins.

use crate::pipeline::error::{PipelineError, PipelineResult};
use std::fmt::Debug;

pub trait SampleArbitrator: Send + Sync + Debug {
    /// `existing` and `candidate` are the full variable tuples of one sample.
    fn should_replace(&self, existing: &[f64], candidate: &[f64]) -> bool;
}

/// Keep the sample whose reference variable is more extreme.
#[derive(Debug, Clone, PartialEq)]
pub struct RelativeValueArbitrator {
    /// Index of the reference variable within a sample tuple
    variable: usize,
    prefer_larger: bool,
}

impl RelativeValueArbitrator {
    pub fn new(variable: usize, prefer_larger: bool) -> Self {
        Self {
            variable,
            prefer_larger,
        }
    }

    /// Resolve `name` against the variable order of a cell list.
    pub fn for_variable(variables: &[String], name: &str, prefer_larger: bool) -> PipelineResult<Self> {
        let index = variables
            .iter()
            .position(|v| v == name)
            .ok_or_else(|| PipelineError::UnknownVariable(name.to_string()))?;
        Ok(Self::new(index, prefer_larger))
    }

    pub fn variable(&self) -> usize {
        self.variable
    }
}

impl SampleArbitrator for RelativeValueArbitrator {
    fn should_replace(&self, existing: &[f64], candidate: &[f64]) -> bool {
        let (Some(&old), Some(&new)) = (existing.get(self.variable), candidate.get(self.variable)) else {
            return false;
        };
        if old.is_nan() {
            return !new.is_nan();
        }
        if self.prefer_larger {
            new > old
        } else {
            new < old
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefers_extreme_reference_value() {
        let larger = RelativeValueArbitrator::new(1, true);
        assert!(larger.should_replace(&[0.0, 1.0], &[9.0, 2.0]));
        assert!(!larger.should_replace(&[0.0, 1.0], &[9.0, 0.5]));
        assert!(!larger.should_replace(&[0.0, 1.0], &[9.0, 1.0]));

        let smaller = RelativeValueArbitrator::new(0, false);
        assert!(smaller.should_replace(&[3.0], &[2.0]));
        assert!(smaller.should_replace(&[f64::NAN], &[2.0]));
    }

    #[test]
    fn test_resolve_by_name() {
        let vars = vec!["density".to_string(), "pressure".to_string()];
        let a = RelativeValueArbitrator::for_variable(&vars, "pressure", true).unwrap();
        assert_eq!(a.variable(), 1);
        assert!(RelativeValueArbitrator::for_variable(&vars, "speed", true).is_err());
    }
}
