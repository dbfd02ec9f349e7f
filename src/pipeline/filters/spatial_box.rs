//! SpatialBoxFilter: keeps cells touching an axis-aligned box.
//!
//! The box is pushed into the subset restriction so the source can skip
//! whole domains; the filter then drops the remaining cells that miss it.

use super::{dataset_output, retain_cells};
use crate::pipeline::context::ExecutionContext;
use crate::pipeline::contract::Contract;
use crate::pipeline::error::PipelineResult;
use crate::pipeline::filter::{ConfigValue, Filter, FilterInputs, FilterOutput};
use crate::types::{Bounds, Dataset};

#[derive(Debug)]
pub struct SpatialBoxFilter {
    bounds: Bounds,
}

impl SpatialBoxFilter {
    pub fn new(bounds: Bounds) -> Self {
        Self { bounds }
    }

    pub fn bounds(&self) -> &Bounds {
        &self.bounds
    }
}

impl Filter for SpatialBoxFilter {
    fn name(&self) -> &str {
        "SpatialBox"
    }

    fn perform_restriction(&mut self, contract: Contract) -> PipelineResult<Contract> {
        let bounds = self.bounds;
        Ok(contract.map_request(|r| r.map_subset(|s| s.restrict_spatial(bounds))))
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
            ctx.update_progress("clip", i, input.domains.len())?;
            domains.push(retain_cells(d, |c| subset.overlaps(&d.mesh.cell_bounds(c))));
        }
        let dataset = Dataset::new(domains);
        tracing::debug!(
            "SpatialBox kept {} of {} cells",
            dataset.num_cells(),
            input.num_cells()
        );
        Ok(dataset_output(dataset, contract))
    }

    fn on_config_change(&mut self, key: &str, value: &ConfigValue) -> bool {
        // Format: "x0,y0,z0,x1,y1,z1"
        if key != "box" {
            return false;
        }
        let Some(s) = value.as_str() else {
            return false;
        };
        let v: Vec<f64> = s.split(',').filter_map(|p| p.trim().parse().ok()).collect();
        if v.len() != 6 {
            tracing::warn!("SpatialBox ignoring malformed box '{}'", s);
            return false;
        }
        self.bounds = Bounds::new([v[0], v[1], v[2]], [v[3], v[4], v[5]]);
        true
    }
}
