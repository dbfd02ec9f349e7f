//! ThresholdFilter: keeps cells whose nodal values all lie in a range.
//!
//! Zero surviving cells is a legal, empty result.

use super::{dataset_output, retain_cells};
use crate::pipeline::context::ExecutionContext;
use crate::pipeline::contract::Contract;
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::filter::{ConfigValue, Filter, FilterInputs, FilterOutput};
use crate::types::Dataset;

#[derive(Debug, Clone)]
pub struct ThresholdFilter {
    /// `None` thresholds the contract's primary variable
    variable: Option<String>,
    lower: f64,
    upper: f64,
}

impl ThresholdFilter {
    pub fn new(lower: f64, upper: f64) -> Self {
        Self {
            variable: None,
            lower,
            upper,
        }
    }

    /// Threshold on `variable`. It must be part of the request reaching this
    /// filter; the filter cannot add variables to a contract.
    pub fn on_variable(mut self, variable: impl Into<String>) -> Self {
        self.variable = Some(variable.into());
        self
    }

    pub fn range(&self) -> (f64, f64) {
        (self.lower, self.upper)
    }
}

impl Filter for ThresholdFilter {
    fn name(&self) -> &str {
        "Threshold"
    }

    fn execute(
        &mut self,
        inputs: &FilterInputs,
        contract: &Contract,
        ctx: &mut ExecutionContext,
    ) -> PipelineResult<FilterOutput> {
        let input = inputs.dataset()?;
        let variable = self
            .variable
            .as_deref()
            .unwrap_or_else(|| contract.request().variable());

        let mut domains = Vec::with_capacity(input.domains.len());
        for (i, d) in input.domains.iter().enumerate() {
            ctx.update_progress("threshold", i, input.domains.len())?;
            let values = d
                .var(variable)
                .ok_or_else(|| PipelineError::UnknownVariable(variable.to_string()))?;
            domains.push(retain_cells(d, |c| {
                c.nodes.iter().all(|&n| {
                    let v = values[n as usize];
                    v >= self.lower && v <= self.upper
                })
            }));
        }

        let dataset = Dataset::new(domains);
        if dataset.is_empty() && !input.is_empty() {
            tracing::info!(
                "Threshold [{}, {}] on '{}' removed every cell",
                self.lower,
                self.upper,
                variable
            );
        }
        Ok(dataset_output(dataset, contract))
    }

    fn on_config_change(&mut self, key: &str, value: &ConfigValue) -> bool {
        match key {
            "lower" => value.as_float().map(|v| self.lower = v).is_some(),
            "upper" => value.as_float().map(|v| self.upper = v).is_some(),
            "variable" => value
                .as_str()
                .map(|v| self.variable = Some(v.to_string()))
                .is_some(),
            _ => false,
        }
    }
}
