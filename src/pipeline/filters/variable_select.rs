//! VariableSelectFilter: narrows which variables travel upstream.
//!
//! When the list is empty the filter is a passthrough. Otherwise only listed
//! variables are requested (or only unlisted ones, if inverted). The primary
//! variable is never dropped.

use super::dataset_output;
use crate::pipeline::context::ExecutionContext;
use crate::pipeline::contract::Contract;
use crate::pipeline::error::PipelineResult;
use crate::pipeline::filter::{ConfigValue, Filter, FilterInputs, FilterOutput};
use crate::types::Dataset;
use std::collections::HashSet;

#[derive(Debug, Default)]
pub struct VariableSelectFilter {
    /// Variables allowed through. Empty = passthrough all.
    listed: HashSet<String>,
    /// Invert mode: drop listed variables instead of keeping them.
    invert_mode: bool,
}

impl VariableSelectFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow<S: Into<String>>(variables: impl IntoIterator<Item = S>) -> Self {
        Self {
            listed: variables.into_iter().map(Into::into).collect(),
            invert_mode: false,
        }
    }

    pub fn deny<S: Into<String>>(variables: impl IntoIterator<Item = S>) -> Self {
        Self {
            listed: variables.into_iter().map(Into::into).collect(),
            invert_mode: true,
        }
    }

    pub fn is_passthrough(&self) -> bool {
        self.listed.is_empty()
    }

    fn keeps(&self, variable: &str) -> bool {
        // Pass if: (listed AND !invert) OR (!listed AND invert)
        self.is_passthrough() || self.listed.contains(variable) != self.invert_mode
    }
}

impl Filter for VariableSelectFilter {
    fn name(&self) -> &str {
        "VariableSelect"
    }

    fn modify_contract(&mut self, contract: Contract) -> PipelineResult<Contract> {
        if self.is_passthrough() {
            return Ok(contract);
        }
        Ok(contract.map_request(|r| r.restrict_variables(|v| self.keeps(v))))
    }

    fn execute(
        &mut self,
        inputs: &FilterInputs,
        contract: &Contract,
        _ctx: &mut ExecutionContext,
    ) -> PipelineResult<FilterOutput> {
        let input = inputs.dataset()?;
        let wanted = contract.request().variables();
        let domains = input
            .domains
            .iter()
            .map(|d| {
                let mut d = d.clone();
                d.point_vars.retain(|name, _| wanted.contains(name));
                d
            })
            .collect();
        Ok(dataset_output(Dataset::new(domains), contract))
    }

    fn on_config_change(&mut self, key: &str, value: &ConfigValue) -> bool {
        match key {
            "variables" => {
                // Format: comma-separated names, e.g. "density,pressure"
                if let Some(s) = value.as_str() {
                    self.listed = s
                        .split(',')
                        .map(str::trim)
                        .filter(|p| !p.is_empty())
                        .map(String::from)
                        .collect();
                    return true;
                }
                false
            }
            "invert_mode" => match value.as_bool() {
                Some(b) => {
                    self.invert_mode = b;
                    true
                }
                None => false,
            },
            "clear" => {
                self.listed.clear();
                self.invert_mode = false;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::contract::DataRequest;

    fn contract() -> Contract {
        Contract::new(
            DataRequest::new("mesh", "density", 0)
                .with_secondary_variable("pressure")
                .with_secondary_variable("velocity_mag"),
            0,
        )
    }

    fn names(c: &Contract) -> Vec<String> {
        c.request().variables().iter().cloned().collect()
    }

    #[test]
    fn test_passthrough() {
        let mut f = VariableSelectFilter::new();
        assert_eq!(f.modify_contract(contract()).unwrap(), contract());
    }

    #[test]
    fn test_allow_and_deny() {
        let mut allow = VariableSelectFilter::allow(["pressure"]);
        let narrowed = allow.modify_contract(contract()).unwrap();
        assert_eq!(names(&narrowed), vec!["density", "pressure"]);

        let mut deny = VariableSelectFilter::deny(["pressure", "density"]);
        let narrowed = deny.modify_contract(contract()).unwrap();
        // primary survives a deny list
        assert_eq!(names(&narrowed), vec!["density", "velocity_mag"]);
    }

    #[test]
    fn test_config_changes() {
        let mut f = VariableSelectFilter::new();
        assert!(f.on_config_change("variables", &ConfigValue::String("pressure, ".into())));
        assert!(!f.is_passthrough());
        assert!(f.on_config_change("invert_mode", &ConfigValue::Bool(true)));
        assert_eq!(
            names(&f.modify_contract(contract()).unwrap()),
            vec!["density", "velocity_mag"]
        );
        assert!(f.on_config_change("clear", &ConfigValue::Bool(true)));
        assert!(f.is_passthrough());
        assert!(!f.on_config_change("unknown", &ConfigValue::Int(1)));
    }

    #[test]
    fn test_execute_drops_unrequested_arrays() {
        use crate::pipeline::data_object::{DataAttributes, DataObject, DataPayload, OriginatingSource};
        use crate::pipeline::id::NodeId;
        use crate::types::{Cell, DomainData, UnstructuredMesh};
        use glam::DVec3;
        use std::sync::Arc;

        let mesh = UnstructuredMesh::new(
            vec![DVec3::ZERO, DVec3::X, DVec3::Y, DVec3::Z],
            vec![Cell::tet([0, 1, 2, 3])],
        );
        let domain = DomainData::new(4, mesh)
            .with_var("density", vec![1.0; 4])
            .with_var("pressure", vec![2.0; 4])
            .with_var("velocity_mag", vec![3.0; 4])
            .with_materials(["steel"]);
        let object = Arc::new(DataObject::new(
            DataPayload::Dataset(Dataset::new(vec![domain.clone()])),
            DataAttributes::default(),
            OriginatingSource {
                node: NodeId(0),
                contract: contract(),
            },
        ));

        let mut f = VariableSelectFilter::allow(["pressure"]);
        let narrowed = f.modify_contract(contract()).unwrap();
        let out = f
            .execute(
                &FilterInputs::new(vec![("in".into(), object)]),
                &narrowed,
                &mut ExecutionContext::new(),
            )
            .unwrap();
        let DataPayload::Dataset(ds) = out.payload else {
            panic!("expected dataset");
        };
        let d = &ds.domains[0];
        assert_eq!(d.point_vars.keys().collect::<Vec<_>>(), vec!["density", "pressure"]);
        assert_eq!(d.mesh, domain.mesh);
        assert_eq!(d.cell_materials, domain.cell_materials);
    }
}
