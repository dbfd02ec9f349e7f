//! Contracts: what a downstream consumer needs from upstream.
//!
//! A [`Contract`] wraps a [`DataRequest`] (variables, timestep, subset
//! restriction, extents flags) plus the pipeline index. Contracts are plain
//! values: a filter that wants a different request builds a new contract from
//! the one it was given, it never edits the issued one.
//!
//! Restrictions only narrow on the way upstream. [`Contract::check_narrowing_of`]
//! is what the executor uses to enforce that after every hook.

use crate::types::Bounds;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Spatial/material/domain restriction on what gets read.
///
/// `None` on any axis means "everything".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubsetInclusion {
    pub domains: Option<BTreeSet<u32>>,
    pub spatial: Option<Bounds>,
    pub materials: Option<BTreeSet<String>>,
}

impl SubsetInclusion {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn includes_domain(&self, domain: u32) -> bool {
        self.domains.as_ref().map_or(true, |d| d.contains(&domain))
    }

    pub fn includes_material(&self, material: &str) -> bool {
        self.materials.as_ref().map_or(true, |m| m.contains(material))
    }

    /// Does a region with these bounds survive the spatial restriction?
    pub fn overlaps(&self, bounds: &Bounds) -> bool {
        self.spatial.as_ref().map_or(true, |s| s.intersects(bounds))
    }

    /// Intersect the domain list with `domains`.
    pub fn restrict_domains(mut self, domains: impl IntoIterator<Item = u32>) -> Self {
        let wanted: BTreeSet<u32> = domains.into_iter().collect();
        self.domains = Some(match self.domains {
            Some(current) => current.intersection(&wanted).copied().collect(),
            None => wanted,
        });
        self
    }

    /// Intersect the spatial box with `bounds`.
    pub fn restrict_spatial(mut self, bounds: Bounds) -> Self {
        self.spatial = Some(match self.spatial {
            Some(current) => current.intersection(&bounds),
            None => bounds,
        });
        self
    }

    pub fn restrict_materials<S: Into<String>>(mut self, materials: impl IntoIterator<Item = S>) -> Self {
        let wanted: BTreeSet<String> = materials.into_iter().map(Into::into).collect();
        self.materials = Some(match self.materials {
            Some(current) => current.intersection(&wanted).cloned().collect(),
            None => wanted,
        });
        self
    }

    /// `Ok` when `self` selects no more than `original`.
    pub fn check_narrowing_of(&self, original: &SubsetInclusion) -> Result<(), String> {
        if let Some(orig) = &original.domains {
            match &self.domains {
                None => return Err("domain restriction dropped".to_string()),
                Some(d) if !d.is_subset(orig) => {
                    return Err(format!("domains {:?} exceed {:?}", d, orig))
                }
                _ => {}
            }
        }
        if let Some(orig) = &original.spatial {
            match &self.spatial {
                None => return Err("spatial restriction dropped".to_string()),
                Some(b) if !orig.contains(b) => {
                    return Err(format!("spatial box {:?} exceeds {:?}", b, orig))
                }
                _ => {}
            }
        }
        if let Some(orig) = &original.materials {
            match &self.materials {
                None => return Err("material restriction dropped".to_string()),
                Some(m) if !m.is_subset(orig) => {
                    return Err(format!("materials {:?} exceed {:?}", m, orig))
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// Description of the data a consumer needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataRequest {
    mesh: String,
    primary_variable: String,
    /// All requested variables, primary included
    variables: BTreeSet<String>,
    timestep: usize,
    subset: SubsetInclusion,
    calculate_extents: BTreeSet<String>,
}

impl DataRequest {
    pub fn new(mesh: impl Into<String>, variable: impl Into<String>, timestep: usize) -> Self {
        let primary_variable = variable.into();
        let mut variables = BTreeSet::new();
        variables.insert(primary_variable.clone());
        Self {
            mesh: mesh.into(),
            primary_variable,
            variables,
            timestep,
            subset: SubsetInclusion::all(),
            calculate_extents: BTreeSet::new(),
        }
    }

    pub fn with_secondary_variable(mut self, variable: impl Into<String>) -> Self {
        self.variables.insert(variable.into());
        self
    }

    pub fn with_subset(mut self, subset: SubsetInclusion) -> Self {
        self.subset = subset;
        self
    }

    pub fn with_extents_for(mut self, variable: impl Into<String>) -> Self {
        self.calculate_extents.insert(variable.into());
        self
    }

    pub fn mesh(&self) -> &str {
        &self.mesh
    }

    /// The primary variable
    pub fn variable(&self) -> &str {
        &self.primary_variable
    }

    pub fn variables(&self) -> &BTreeSet<String> {
        &self.variables
    }

    pub fn secondary_variables(&self) -> impl Iterator<Item = &str> {
        self.variables
            .iter()
            .filter(move |v| **v != self.primary_variable)
            .map(String::as_str)
    }

    pub fn timestep(&self) -> usize {
        self.timestep
    }

    pub fn subset(&self) -> &SubsetInclusion {
        &self.subset
    }

    pub fn should_calculate_variable_extents(&self, variable: &str) -> bool {
        self.calculate_extents.contains(variable)
    }

    /// Keep only variables `keep` accepts. The primary variable always stays.
    pub fn restrict_variables(mut self, keep: impl Fn(&str) -> bool) -> Self {
        let primary = self.primary_variable.clone();
        self.variables.retain(|v| *v == primary || keep(v));
        let variables = &self.variables;
        self.calculate_extents.retain(|v| variables.contains(v));
        self
    }

    /// Stop asking for extents of `variable`.
    pub fn without_extents_for(mut self, variable: &str) -> Self {
        self.calculate_extents.remove(variable);
        self
    }

    pub fn map_subset(mut self, f: impl FnOnce(SubsetInclusion) -> SubsetInclusion) -> Self {
        self.subset = f(self.subset);
        self
    }

    pub fn check_narrowing_of(&self, original: &DataRequest) -> Result<(), String> {
        if self.mesh != original.mesh {
            return Err(format!("mesh changed from {} to {}", original.mesh, self.mesh));
        }
        if self.timestep != original.timestep {
            return Err(format!(
                "timestep changed from {} to {}",
                original.timestep, self.timestep
            ));
        }
        if self.primary_variable != original.primary_variable {
            return Err(format!(
                "primary variable changed from {} to {}",
                original.primary_variable, self.primary_variable
            ));
        }
        if !self.variables.is_subset(&original.variables) {
            let extra: Vec<_> = self.variables.difference(&original.variables).collect();
            return Err(format!("added variables {:?}", extra));
        }
        if !self.calculate_extents.is_subset(&original.calculate_extents) {
            return Err("added extents calculations".to_string());
        }
        self.subset.check_narrowing_of(&original.subset)
    }
}

/// A data request plus pipeline bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    request: DataRequest,
    pipeline_index: usize,
}

impl Contract {
    pub fn new(request: DataRequest, pipeline_index: usize) -> Self {
        Self {
            request,
            pipeline_index,
        }
    }

    pub fn request(&self) -> &DataRequest {
        &self.request
    }

    pub fn pipeline_index(&self) -> usize {
        self.pipeline_index
    }

    /// Build a new contract whose request is `f(request)`.
    pub fn map_request(self, f: impl FnOnce(DataRequest) -> DataRequest) -> Self {
        Self {
            request: f(self.request),
            pipeline_index: self.pipeline_index,
        }
    }

    pub fn check_narrowing_of(&self, original: &Contract) -> Result<(), String> {
        if self.pipeline_index != original.pipeline_index {
            return Err(format!(
                "pipeline index changed from {} to {}",
                original.pipeline_index, self.pipeline_index
            ));
        }
        self.request.check_narrowing_of(&original.request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> DataRequest {
        DataRequest::new("mesh", "density", 0)
            .with_secondary_variable("pressure")
            .with_secondary_variable("temperature")
            .with_extents_for("pressure")
    }

    #[test]
    fn test_restrict_variables_keeps_primary() {
        let narrowed = request().restrict_variables(|v| v == "temperature");
        let vars: Vec<_> = narrowed.variables().iter().cloned().collect();
        assert_eq!(vars, vec!["density".to_string(), "temperature".to_string()]);
        assert!(!narrowed.should_calculate_variable_extents("pressure"));
        assert!(narrowed.check_narrowing_of(&request()).is_ok());
    }

    #[test]
    fn test_widening_is_detected() {
        let original = DataRequest::new("mesh", "density", 0);
        let widened = original.clone().with_secondary_variable("pressure");
        assert!(widened.check_narrowing_of(&original).is_err());

        let other_step = DataRequest::new("mesh", "density", 1);
        assert!(other_step.check_narrowing_of(&original).is_err());
    }

    #[test]
    fn test_subset_narrowing() {
        let original = SubsetInclusion::all().restrict_domains([0, 1, 2]);
        let narrower = original.clone().restrict_domains([1, 5]);
        assert_eq!(narrower.domains, Some([1].into_iter().collect()));
        assert!(narrower.check_narrowing_of(&original).is_ok());
        assert!(SubsetInclusion::all().check_narrowing_of(&original).is_err());

        let boxed = SubsetInclusion::all().restrict_spatial(Bounds::unit());
        let smaller = boxed
            .clone()
            .restrict_spatial(Bounds::new([0.5; 3], [2.0; 3]));
        assert_eq!(smaller.spatial, Some(Bounds::new([0.5; 3], [1.0; 3])));
        assert!(smaller.check_narrowing_of(&boxed).is_ok());
        assert!(boxed.overlaps(&Bounds::new([0.9; 3], [1.5; 3])));
        assert!(!smaller.overlaps(&Bounds::new([0.0; 3], [0.4; 3])));
    }

    #[test]
    fn test_contract_pipeline_index_is_fixed() {
        let a = Contract::new(request(), 0);
        let b = Contract::new(request(), 1);
        assert!(b.check_narrowing_of(&a).is_err());
        assert!(a
            .clone()
            .map_request(|r| r.without_extents_for("pressure"))
            .check_narrowing_of(&a)
            .is_ok());
    }
}
