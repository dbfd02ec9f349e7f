//! Demand-driven filter pipeline.
//!
//! Requests flow upstream as [`Contract`]s; data flows downstream as
//! [`DataObject`]s. Each filter may only narrow the contract it receives,
//! and only executes when it is modified, an upstream filter executed, or
//! the contract reaching it changed.
//!
//! # Architecture
//!
//! ```text
//!            contract ◄──────────────────────────────────────────
//! [DatabaseSource] ──► [DomainSelect] ──► [Threshold] ──► [SamplePointExtractor] ──► [RayCompositor]
//!            data ──────────────────────────────────────────────►
//! ```
//!
//! # Design
//!
//! - **Index-based graph**: filters live in an arena of slots addressed by
//!   [`NodeId`]; inputs are named edges to other slots.
//! - **Non-owning back references**: a data object names its producer by
//!   index, so the graph has no reference cycles.
//! - **Cooperative abort**: filters poll the [`ExecutionContext`] between
//!   phases; collective filters agree on abort across ranks.

pub mod context;
pub mod contract;
pub mod data_object;
pub mod database;
pub mod error;
pub mod executor;
pub mod filter;
pub mod filters;
pub mod id;

pub use context::{AbortHandle, ExecutionContext, ProgressEvent};
pub use contract::{Contract, DataRequest, SubsetInclusion};
pub use data_object::{DataAttributes, DataObject, DataObjectRef, DataPayload, OriginatingSource};
pub use database::{Database, DatabaseMetadata, MemoryDatabase};
pub use error::{PipelineError, PipelineResult};
pub use executor::Pipeline;
pub use filter::{ConfigValue, Filter, FilterInputs, FilterOutput, FilterState};
pub use id::{CellId, NodeId};
