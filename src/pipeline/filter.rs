//! Filter abstraction for the pipeline.
//!
//! One capability-based trait instead of a class hierarchy: every stage
//! implements `execute`, and optionally the two contract hooks
//! (`modify_contract`, `perform_restriction`), `release_data`, and
//! `on_config_change`. Sources are filters with no declared inputs.
//!
//! The executor owns the state machine; filters never see their own
//! `modified`/`in_execute` flags.

use crate::pipeline::context::ExecutionContext;
use crate::pipeline::contract::Contract;
use crate::pipeline::data_object::{DataAttributes, DataObjectRef, DataPayload};
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::render::sample_points::SamplePoints;
use crate::types::Dataset;

/// Observable execution state of a filter slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterState {
    /// Cached output is valid for the last contract
    Unmodified,
    /// Needs to execute on the next update
    Modified,
    /// Inside `execute`, or interrupted there and not yet released
    Executing,
}

/// Configuration values that can be sent to filters.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl ConfigValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConfigValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ConfigValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            ConfigValue::Float(v) => Some(*v),
            ConfigValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::String(v) => Some(v),
            _ => None,
        }
    }
}

/// What `execute` hands back; the executor wraps it into a `DataObject`.
#[derive(Debug)]
pub struct FilterOutput {
    pub payload: DataPayload,
    pub attributes: DataAttributes,
}

impl FilterOutput {
    pub fn new(payload: DataPayload, attributes: DataAttributes) -> Self {
        Self {
            payload,
            attributes,
        }
    }

    pub fn empty() -> Self {
        Self::new(DataPayload::Empty, DataAttributes::default())
    }
}

/// Materialized inputs of one execution, by input name.
#[derive(Debug, Default, Clone)]
pub struct FilterInputs {
    entries: Vec<(String, DataObjectRef)>,
}

impl FilterInputs {
    pub fn new(entries: Vec<(String, DataObjectRef)>) -> Self {
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, name: &str) -> Option<&DataObjectRef> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, o)| o)
    }

    /// First connected input
    pub fn primary(&self) -> PipelineResult<&DataObjectRef> {
        self.entries
            .first()
            .map(|(_, o)| o)
            .ok_or_else(|| PipelineError::InvalidInput("filter has no inputs".to_string()))
    }

    pub fn require(&self, name: &str) -> PipelineResult<&DataObjectRef> {
        self.get(name)
            .ok_or_else(|| PipelineError::InvalidInput(format!("input '{}' not connected", name)))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DataObjectRef)> {
        self.entries.iter().map(|(n, o)| (n.as_str(), o))
    }

    /// The primary input as a dataset
    pub fn dataset(&self) -> PipelineResult<&Dataset> {
        let input = self.primary()?;
        input.dataset().ok_or_else(|| {
            PipelineError::InvalidInput(format!(
                "expected a dataset, got {}",
                input.payload().kind()
            ))
        })
    }

    /// The primary input as sample points
    pub fn sample_points(&self) -> PipelineResult<&SamplePoints> {
        let input = self.primary()?;
        input.sample_points().ok_or_else(|| {
            PipelineError::InvalidInput(format!(
                "expected sample points, got {}",
                input.payload().kind()
            ))
        })
    }
}

/// A pipeline stage.
pub trait Filter: Send {
    /// Human-readable name of this filter.
    fn name(&self) -> &str;

    /// Names of the inputs this filter consumes. Sources declare none.
    fn input_names(&self) -> &[&'static str] {
        &["in"]
    }

    /// Narrow or annotate the contract before it goes upstream.
    fn modify_contract(&mut self, contract: Contract) -> PipelineResult<Contract> {
        Ok(contract)
    }

    /// Shrink the subset restriction before it reaches the database.
    fn perform_restriction(&mut self, contract: Contract) -> PipelineResult<Contract> {
        Ok(contract)
    }

    /// Compute the output from materialized inputs. Must give the same
    /// result for the same inputs and contract.
    fn execute(
        &mut self,
        inputs: &FilterInputs,
        contract: &Contract,
        ctx: &mut ExecutionContext,
    ) -> PipelineResult<FilterOutput>;

    /// Collective filters talk to every rank inside `execute`. The executor
    /// skips its local abort poll for them; they must agree on abort across
    /// ranks themselves.
    fn is_collective(&self) -> bool {
        false
    }

    /// Runs in place of `execute` on a collective filter whose upstream
    /// failed on this rank. Must make the same first abort agreement that
    /// `execute` makes, voting to abort, so peers leave with this rank.
    fn abandon_collective(&mut self, _ctx: &mut ExecutionContext) -> PipelineResult<()> {
        Ok(())
    }

    /// Drop problem-sized buffers the filter keeps between executions.
    fn release_data(&mut self) {}

    /// Apply a parameter change. Returns `true` when the change affects
    /// output, which marks the filter modified.
    fn on_config_change(&mut self, _key: &str, _value: &ConfigValue) -> bool {
        false
    }
}
