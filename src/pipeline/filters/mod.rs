//! Built-in filters.
//!
//! ```text
//! [DatabaseSource] ──► [DomainSelect] ──► [MaterialSelect] ──► [SpatialBox] ──► [Threshold]
//!                  ──► [VariableSelect] ──► [SamplePointExtractor] ──► [RayCompositor]
//! ```
//!
//! Dataset-to-dataset filters share the helpers below: cell retention that
//! keeps point arrays intact, and output attributes that honor the
//! contract's extents flags.

pub mod database_source;
pub mod domain_select;
pub mod material_select;
pub mod ray_compositor;
pub mod sample_extract;
pub mod spatial_box;
pub mod threshold;
pub mod variable_select;

pub use database_source::DatabaseSource;
pub use domain_select::DomainSelectFilter;
pub use material_select::MaterialSelectFilter;
pub use ray_compositor::{RayCompositorFilter, RenderStats};
pub use sample_extract::SamplePointExtractor;
pub use spatial_box::SpatialBoxFilter;
pub use threshold::ThresholdFilter;
pub use variable_select::VariableSelectFilter;

use crate::pipeline::contract::Contract;
use crate::pipeline::data_object::{DataAttributes, DataPayload};
use crate::pipeline::filter::FilterOutput;
use crate::types::{Cell, Dataset, DomainData};

/// Copy of `domain` keeping only cells `keep` accepts.
pub(crate) fn retain_cells(domain: &DomainData, keep: impl Fn(&Cell) -> bool) -> DomainData {
    let mut out = domain.clone();
    out.retain_cells(|_, c| keep(c));
    out
}

/// Attributes for a dataset produced under `contract`.
pub(crate) fn dataset_attributes(dataset: &Dataset, contract: &Contract) -> DataAttributes {
    let request = contract.request();
    let mut attributes = DataAttributes::with_variables(request.variables().iter().cloned());
    for var in request.variables() {
        if request.should_calculate_variable_extents(var) {
            attributes.extents.insert(var.clone(), dataset.extents(var));
        }
    }
    let bounds = dataset.bounds();
    if !bounds.is_empty() {
        attributes.spatial_extents = Some(bounds);
    }
    attributes
}

pub(crate) fn dataset_output(dataset: Dataset, contract: &Contract) -> FilterOutput {
    let attributes = dataset_attributes(&dataset, contract);
    FilterOutput::new(DataPayload::Dataset(dataset), attributes)
}
