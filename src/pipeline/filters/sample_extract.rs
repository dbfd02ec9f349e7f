//! SamplePointExtractor: dataset → projected primitives.
//!
//! The output carries the populated cell list, the view it was projected
//! through, the per-vertex variable order (primary first) and the local
//! extents of every variable.

use crate::pipeline::context::ExecutionContext;
use crate::pipeline::contract::Contract;
use crate::pipeline::data_object::{DataAttributes, DataPayload};
use crate::pipeline::error::PipelineResult;
use crate::pipeline::filter::{ConfigValue, Filter, FilterInputs, FilterOutput};
use crate::render::cell_list::CellList;
use crate::render::extract::extract_dataset;
use crate::render::sample_points::SamplePoints;
use crate::render::view::View;

#[derive(Debug, Clone)]
pub struct SamplePointExtractor {
    view: View,
    jitter_seed: Option<u64>,
    capacity: usize,
}

impl SamplePointExtractor {
    pub fn new(view: View, capacity: usize) -> Self {
        Self {
            view,
            jitter_seed: None,
            capacity,
        }
    }

    pub fn with_jitter(mut self, seed: Option<u64>) -> Self {
        self.jitter_seed = seed;
        self
    }

    pub fn view(&self) -> &View {
        &self.view
    }

    pub fn set_view(&mut self, view: View) {
        self.view = view;
    }
}

impl Filter for SamplePointExtractor {
    fn name(&self) -> &str {
        "SamplePointExtractor"
    }

    fn execute(
        &mut self,
        inputs: &FilterInputs,
        contract: &Contract,
        ctx: &mut ExecutionContext,
    ) -> PipelineResult<FilterOutput> {
        let input = inputs.primary()?;
        let dataset = inputs.dataset()?;
        let request = contract.request();

        let variables: Vec<String> = std::iter::once(request.variable())
            .chain(request.secondary_variables())
            .map(str::to_string)
            .collect();

        let mut cells = CellList::with_capacity(variables.len(), self.capacity);
        let stats = extract_dataset(dataset, &variables, &self.view, self.jitter_seed, &mut cells, ctx)?;

        let primary = request.variable();
        let extents = input
            .attributes()
            .extents(primary)
            .copied()
            .unwrap_or_else(|| dataset.extents(primary));

        tracing::debug!(
            "Extracted {} of {} cells ({} arena bytes)",
            stats.stored,
            stats.stored + stats.dropped,
            cells.arena_bytes()
        );

        let mut attributes = DataAttributes::with_variables(variables.iter().cloned());
        attributes.extents.insert(primary.to_string(), extents);
        attributes.spatial_extents = input.attributes().spatial_extents;

        let secondary_extents = variables[1..]
            .iter()
            .map(|v| {
                input
                    .attributes()
                    .extents(v)
                    .copied()
                    .unwrap_or_else(|| dataset.extents(v))
            })
            .collect();
        let points = SamplePoints::new(cells, self.view, variables, extents)
            .with_secondary_extents(secondary_extents);
        Ok(FilterOutput::new(DataPayload::SamplePoints(points), attributes))
    }

    fn on_config_change(&mut self, key: &str, value: &ConfigValue) -> bool {
        match key {
            "jitter_seed" => match value.as_int() {
                Some(seed) => {
                    self.jitter_seed = Some(seed as u64);
                    true
                }
                None => false,
            },
            "jitter" => match value.as_bool() {
                Some(false) => self.jitter_seed.take().is_some(),
                _ => false,
            },
            "capacity" => value
                .as_int()
                .filter(|c| *c > 0)
                .map(|c| self.capacity = c as usize)
                .is_some(),
            _ => false,
        }
    }
}
