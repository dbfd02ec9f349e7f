//! DatabaseSource: the pipeline's terminal source.
//!
//! Reads only what the contract it receives asks for: skips domains outside
//! the subset's domain list, skips domains whose auxiliary spatial extents
//! miss the subset's box, and reads only the requested variables.
//!
//! Under a material restriction only cells tagged with a requested material
//! are kept. Domains with no such cell, untagged ones included, are not read.

use super::dataset_output;
use crate::pipeline::context::ExecutionContext;
use crate::pipeline::contract::Contract;
use crate::pipeline::database::{AuxiliaryData, AuxiliaryRequest, Database};
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::filter::{Filter, FilterInputs, FilterOutput};
use crate::types::{Dataset, DomainData};
use std::sync::Arc;

pub struct DatabaseSource {
    database: Arc<dyn Database>,
}

impl DatabaseSource {
    pub fn new(database: Arc<dyn Database>) -> Self {
        Self { database }
    }

    pub fn database(&self) -> &Arc<dyn Database> {
        &self.database
    }

    fn read_domain(&self, contract: &Contract, domain: u32) -> PipelineResult<Option<DomainData>> {
        let request = contract.request();
        let timestep = request.timestep();

        if request.subset().spatial.is_some() {
            let aux = self
                .database
                .get_auxiliary_data(timestep, domain, &AuxiliaryRequest::SpatialExtents)?;
            if let AuxiliaryData::SpatialExtents(bounds) = aux {
                if !request.subset().overlaps(&bounds) {
                    tracing::trace!("Domain {} outside spatial restriction, not read", domain);
                    return Ok(None);
                }
            }
        }

        let materials = match &request.subset().materials {
            Some(_) => {
                let tags = match self.database.get_auxiliary_data(
                    timestep,
                    domain,
                    &AuxiliaryRequest::Materials,
                )? {
                    AuxiliaryData::Materials(tags) => tags,
                    _ => Vec::new(),
                };
                if !tags.iter().any(|m| request.subset().includes_material(m)) {
                    tracing::trace!("Domain {} has no requested material, not read", domain);
                    return Ok(None);
                }
                Some(tags)
            }
            None => None,
        };

        let mesh = self.database.get_mesh(timestep, domain, request.mesh())?;
        mesh.validate()?;
        let mut data = DomainData::new(domain, mesh);
        if let Some(tags) = materials {
            if tags.len() != data.mesh.num_cells() {
                return Err(PipelineError::InvalidInput(format!(
                    "{} material tags for {} cells in domain {}",
                    tags.len(),
                    data.mesh.num_cells(),
                    domain
                )));
            }
            let keep: Vec<bool> = tags.iter().map(|m| request.subset().includes_material(m)).collect();
            data = data.with_materials(tags);
            data.retain_cells(|i, _| keep[i]);
        }
        for var in request.variables() {
            let values = self.database.get_var(timestep, domain, var)?;
            if values.len() != data.mesh.num_points() {
                return Err(PipelineError::InvalidInput(format!(
                    "variable '{}' has {} values for {} points in domain {}",
                    var,
                    values.len(),
                    data.mesh.num_points(),
                    domain
                )));
            }
            data.point_vars.insert(var.clone(), values);
        }
        Ok(Some(data))
    }
}

impl Filter for DatabaseSource {
    fn name(&self) -> &str {
        "DatabaseSource"
    }

    fn input_names(&self) -> &[&'static str] {
        &[]
    }

    fn execute(
        &mut self,
        _inputs: &FilterInputs,
        contract: &Contract,
        ctx: &mut ExecutionContext,
    ) -> PipelineResult<FilterOutput> {
        let metadata = self.database.metadata();
        let request = contract.request();
        if request.timestep() >= metadata.num_timesteps {
            return Err(PipelineError::Database(format!(
                "timestep {} requested, database has {}",
                request.timestep(),
                metadata.num_timesteps
            )));
        }

        let wanted: Vec<u32> = metadata
            .domains
            .iter()
            .copied()
            .filter(|&d| request.subset().includes_domain(d))
            .collect();

        let mut domains = Vec::with_capacity(wanted.len());
        for (i, &domain) in wanted.iter().enumerate() {
            ctx.update_progress("read", i, wanted.len())?;
            if let Some(data) = self.read_domain(contract, domain)? {
                domains.push(data);
            }
        }

        tracing::debug!(
            "Read {} of {} domains ({} variables) at timestep {}",
            domains.len(),
            metadata.domains.len(),
            request.variables().len(),
            request.timestep()
        );
        Ok(dataset_output(Dataset::new(domains), contract))
    }
}
