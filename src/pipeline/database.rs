//! Database seam: where mesh and variable data come from.
//!
//! File-format readers live outside this crate. The pipeline only sees the
//! [`Database`] trait; [`MemoryDatabase`] is the in-process implementation
//! used by the binary and by tests. It records every request so callers can
//! see which domains and variables were actually read.

use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::types::{Bounds, Dataset, Extents, UnstructuredMesh};
use glam::DVec3;
use std::collections::BTreeMap;
use std::sync::Mutex;

/// What a database holds, without reading any of it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DatabaseMetadata {
    pub mesh_name: String,
    pub scalar_variables: Vec<String>,
    pub vector_variables: Vec<String>,
    pub domains: Vec<u32>,
    pub num_timesteps: usize,
}

impl DatabaseMetadata {
    pub fn has_variable(&self, name: &str) -> bool {
        self.scalar_variables.iter().any(|v| v == name)
    }
}

/// Auxiliary per-domain data used for read-side pruning.
#[derive(Debug, Clone, PartialEq)]
pub enum AuxiliaryRequest {
    SpatialExtents,
    DataExtents(String),
    /// Material name of every cell
    Materials,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AuxiliaryData {
    SpatialExtents(Bounds),
    DataExtents(Extents),
    /// Empty when the domain carries no material tags
    Materials(Vec<String>),
}

/// Mesh/variable accessors consumed by the pipeline's source.
#[cfg_attr(test, mockall::automock)]
pub trait Database: Send + Sync {
    fn metadata(&self) -> DatabaseMetadata;

    fn get_mesh(&self, timestep: usize, domain: u32, mesh: &str) -> PipelineResult<UnstructuredMesh>;

    /// Nodal scalar values, one per mesh point.
    fn get_var(&self, timestep: usize, domain: u32, variable: &str) -> PipelineResult<Vec<f64>>;

    fn get_vector_var(&self, timestep: usize, domain: u32, variable: &str) -> PipelineResult<Vec<DVec3>>;

    fn get_auxiliary_data(
        &self,
        timestep: usize,
        domain: u32,
        request: &AuxiliaryRequest,
    ) -> PipelineResult<AuxiliaryData>;
}

/// A logged database call.
#[derive(Debug, Clone, PartialEq)]
pub enum DatabaseCall {
    Mesh { timestep: usize, domain: u32 },
    Var { timestep: usize, domain: u32, variable: String },
    VectorVar { timestep: usize, domain: u32, variable: String },
    Auxiliary { timestep: usize, domain: u32 },
}

/// In-memory database: one [`Dataset`] per timestep.
#[derive(Debug, Default)]
pub struct MemoryDatabase {
    mesh_name: String,
    timesteps: Vec<Dataset>,
    vectors: BTreeMap<(usize, u32, String), Vec<DVec3>>,
    calls: Mutex<Vec<DatabaseCall>>,
}

impl MemoryDatabase {
    pub fn new(mesh_name: impl Into<String>) -> Self {
        Self {
            mesh_name: mesh_name.into(),
            ..Default::default()
        }
    }

    /// Single-timestep database
    pub fn from_dataset(mesh_name: impl Into<String>, dataset: Dataset) -> Self {
        Self::new(mesh_name).with_timestep(dataset)
    }

    pub fn with_timestep(mut self, dataset: Dataset) -> Self {
        self.timesteps.push(dataset);
        self
    }

    pub fn with_vector_var(
        mut self,
        timestep: usize,
        domain: u32,
        name: impl Into<String>,
        values: Vec<DVec3>,
    ) -> Self {
        self.vectors.insert((timestep, domain, name.into()), values);
        self
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<DatabaseCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Domains whose mesh has been read.
    pub fn domains_read(&self) -> Vec<u32> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                DatabaseCall::Mesh { domain, .. } => Some(domain),
                _ => None,
            })
            .collect()
    }

    pub fn variables_read(&self) -> Vec<String> {
        let mut vars: Vec<String> = self
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                DatabaseCall::Var { variable, .. } => Some(variable),
                _ => None,
            })
            .collect();
        vars.sort();
        vars.dedup();
        vars
    }

    pub fn clear_calls(&self) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.clear();
        }
    }

    fn record(&self, call: DatabaseCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }

    fn domain(&self, timestep: usize, domain: u32) -> PipelineResult<&crate::types::DomainData> {
        let dataset = self.timesteps.get(timestep).ok_or_else(|| {
            PipelineError::Database(format!(
                "timestep {} out of range ({} available)",
                timestep,
                self.timesteps.len()
            ))
        })?;
        dataset
            .domains
            .iter()
            .find(|d| d.domain == domain)
            .ok_or(PipelineError::NoSuchDomain(domain))
    }
}

impl Database for MemoryDatabase {
    fn metadata(&self) -> DatabaseMetadata {
        let first = self.timesteps.first();
        let mut scalar_variables: Vec<String> = first
            .into_iter()
            .flat_map(|d| d.domains.iter())
            .flat_map(|d| d.point_vars.keys().cloned())
            .collect();
        scalar_variables.sort();
        scalar_variables.dedup();

        let mut vector_variables: Vec<String> =
            self.vectors.keys().map(|(_, _, name)| name.clone()).collect();
        vector_variables.sort();
        vector_variables.dedup();

        DatabaseMetadata {
            mesh_name: self.mesh_name.clone(),
            scalar_variables,
            vector_variables,
            domains: first
                .map(|d| d.domains.iter().map(|d| d.domain).collect())
                .unwrap_or_default(),
            num_timesteps: self.timesteps.len(),
        }
    }

    fn get_mesh(&self, timestep: usize, domain: u32, mesh: &str) -> PipelineResult<UnstructuredMesh> {
        if mesh != self.mesh_name {
            return Err(PipelineError::Database(format!("no mesh named '{}'", mesh)));
        }
        self.record(DatabaseCall::Mesh { timestep, domain });
        Ok(self.domain(timestep, domain)?.mesh.clone())
    }

    fn get_var(&self, timestep: usize, domain: u32, variable: &str) -> PipelineResult<Vec<f64>> {
        self.record(DatabaseCall::Var {
            timestep,
            domain,
            variable: variable.to_string(),
        });
        self.domain(timestep, domain)?
            .var(variable)
            .map(<[f64]>::to_vec)
            .ok_or_else(|| PipelineError::UnknownVariable(variable.to_string()))
    }

    fn get_vector_var(&self, timestep: usize, domain: u32, variable: &str) -> PipelineResult<Vec<DVec3>> {
        self.record(DatabaseCall::VectorVar {
            timestep,
            domain,
            variable: variable.to_string(),
        });
        self.vectors
            .get(&(timestep, domain, variable.to_string()))
            .cloned()
            .ok_or_else(|| PipelineError::UnknownVariable(variable.to_string()))
    }

    fn get_auxiliary_data(
        &self,
        timestep: usize,
        domain: u32,
        request: &AuxiliaryRequest,
    ) -> PipelineResult<AuxiliaryData> {
        self.record(DatabaseCall::Auxiliary { timestep, domain });
        let data = self.domain(timestep, domain)?;
        match request {
            AuxiliaryRequest::SpatialExtents => Ok(AuxiliaryData::SpatialExtents(data.mesh.bounds())),
            AuxiliaryRequest::DataExtents(var) => data
                .var(var)
                .map(|v| AuxiliaryData::DataExtents(Extents::from_values(v)))
                .ok_or_else(|| PipelineError::UnknownVariable(var.clone())),
            AuxiliaryRequest::Materials => Ok(AuxiliaryData::Materials(data.cell_materials.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Cell, DomainData};

    fn db() -> MemoryDatabase {
        let mesh = UnstructuredMesh::new(
            vec![DVec3::ZERO, DVec3::X, DVec3::Y, DVec3::Z],
            vec![Cell::tet([0, 1, 2, 3])],
        );
        MemoryDatabase::from_dataset(
            "mesh",
            Dataset::new(vec![
                DomainData::new(0, mesh.clone()).with_var("density", vec![1.0, 2.0, 3.0, 4.0]),
                DomainData::new(7, mesh)
                    .with_var("density", vec![0.0; 4])
                    .with_materials(["steel"]),
            ]),
        )
        .with_vector_var(0, 0, "velocity", vec![DVec3::X; 4])
    }

    #[test]
    fn test_metadata() {
        let md = db().metadata();
        assert_eq!(md.mesh_name, "mesh");
        assert_eq!(md.domains, vec![0, 7]);
        assert_eq!(md.num_timesteps, 1);
        assert!(md.has_variable("density"));
        assert_eq!(md.vector_variables, vec!["velocity".to_string()]);
    }

    #[test]
    fn test_reads_are_recorded() {
        let db = db();
        assert_eq!(db.get_mesh(0, 7, "mesh").unwrap().num_cells(), 1);
        assert_eq!(db.get_var(0, 0, "density").unwrap()[3], 4.0);
        assert_eq!(db.get_vector_var(0, 0, "velocity").unwrap().len(), 4);
        assert_eq!(db.domains_read(), vec![7]);
        assert_eq!(db.variables_read(), vec!["density".to_string()]);
        db.clear_calls();
        assert!(db.calls().is_empty());
    }

    #[test]
    fn test_missing_things() {
        let db = db();
        assert_eq!(db.get_mesh(0, 3, "mesh"), Err(PipelineError::NoSuchDomain(3)));
        assert!(matches!(db.get_mesh(0, 0, "other"), Err(PipelineError::Database(_))));
        assert!(matches!(db.get_mesh(5, 0, "mesh"), Err(PipelineError::Database(_))));
        assert_eq!(
            db.get_var(0, 0, "pressure"),
            Err(PipelineError::UnknownVariable("pressure".into()))
        );
    }

    #[test]
    fn test_auxiliary_extents() {
        let db = db();
        match db.get_auxiliary_data(0, 0, &AuxiliaryRequest::SpatialExtents).unwrap() {
            AuxiliaryData::SpatialExtents(b) => assert_eq!(b, Bounds::unit()),
            other => panic!("unexpected {:?}", other),
        }
        match db
            .get_auxiliary_data(0, 0, &AuxiliaryRequest::DataExtents("density".into()))
            .unwrap()
        {
            AuxiliaryData::DataExtents(e) => assert_eq!((e.min, e.max), (1.0, 4.0)),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            db.get_auxiliary_data(0, 7, &AuxiliaryRequest::Materials).unwrap(),
            AuxiliaryData::Materials(vec!["steel".to_string()])
        );
        assert_eq!(
            db.get_auxiliary_data(0, 0, &AuxiliaryRequest::Materials).unwrap(),
            AuxiliaryData::Materials(Vec::new())
        );
    }
}
