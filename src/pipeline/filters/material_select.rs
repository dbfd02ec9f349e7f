//! MaterialSelectFilter: keeps cells of the named materials.
//!
//! The names go into the subset restriction so the source reads only
//! domains holding one of them. Cells arriving with another tag, or with
//! none, are dropped here as well.

use super::dataset_output;
use crate::pipeline::context::ExecutionContext;
use crate::pipeline::contract::Contract;
use crate::pipeline::error::PipelineResult;
use crate::pipeline::filter::{ConfigValue, Filter, FilterInputs, FilterOutput};
use crate::types::Dataset;
use std::collections::BTreeSet;

#[derive(Debug)]
pub struct MaterialSelectFilter {
    materials: BTreeSet<String>,
}

impl MaterialSelectFilter {
    pub fn new<S: Into<String>>(materials: impl IntoIterator<Item = S>) -> Self {
        Self {
            materials: materials.into_iter().map(Into::into).collect(),
        }
    }

    pub fn materials(&self) -> &BTreeSet<String> {
        &self.materials
    }
}

impl Filter for MaterialSelectFilter {
    fn name(&self) -> &str {
        "MaterialSelect"
    }

    fn perform_restriction(&mut self, contract: Contract) -> PipelineResult<Contract> {
        let materials = self.materials.clone();
        Ok(contract.map_request(|r| r.map_subset(|s| s.restrict_materials(materials))))
    }

    fn execute(
        &mut self,
        inputs: &FilterInputs,
        contract: &Contract,
        ctx: &mut ExecutionContext,
    ) -> PipelineResult<FilterOutput> {
        let input = inputs.dataset()?;
        let subset = contract.request().subset();
        let mut domains = Vec::with_capacity(input.domains.len());
        for (i, d) in input.domains.iter().enumerate() {
            ctx.update_progress("select", i, input.domains.len())?;
            let tags = d.cell_materials.clone();
            let mut kept = d.clone();
            kept.retain_cells(|c, _| tags.get(c).map_or(false, |m| subset.includes_material(m)));
            if kept.mesh.num_cells() > 0 {
                domains.push(kept);
            }
        }
        let dataset = Dataset::new(domains);
        tracing::debug!(
            "MaterialSelect {:?} kept {} of {} cells",
            self.materials,
            dataset.num_cells(),
            input.num_cells()
        );
        Ok(dataset_output(dataset, contract))
    }

    fn on_config_change(&mut self, key: &str, value: &ConfigValue) -> bool {
        // Format: "steel,air"
        if key != "materials" {
            return false;
        }
        let Some(s) = value.as_str() else {
            return false;
        };
        let wanted: BTreeSet<String> = s
            .split(',')
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(String::from)
            .collect();
        if wanted == self.materials {
            return false;
        }
        self.materials = wanted;
        true
    }
}
