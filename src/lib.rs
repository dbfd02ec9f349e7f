//! # VolVis-RS: demand-driven visualization pipeline and volume renderer
//!
//! A filter pipeline where consumers describe what they need through
//! contracts that travel upstream, and data objects travel back down. The
//! last stages render a volume: cells are projected to primitives, shipped
//! to the rank owning the image rows they touch, rasterized into per-pixel
//! sample stacks, shaded by a ray function and composited into one image.
//!
//! ## Architecture
//!
//! - **Pipeline**: filter graph, contracts, caching and abort
//! - **Render**: extraction, redistribution, rasterization, compositing
//! - **Communication**: a `Communicator` trait; in-process ranks exchange
//!   bytes over crossbeam channels
//!
//! ## Configuration
//!
//! A run is described by a [`VisConfig`] loaded from JSON or TOML.
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use volvis_rs::{
//!     config::VisConfig,
//!     pipeline::{ExecutionContext, MemoryDatabase},
//!     render::{LocalCluster, View, VolumeRenderer},
//! };
//!
//! let config = VisConfig::load_or_default("render.toml");
//! let images = LocalCluster::run(config.ranks, |comm| {
//!     let db = Arc::new(MemoryDatabase::from_dataset("mesh", my_domains(comm.rank())));
//!     let view = View::fit_bounds(&global_bounds, 256, 256, 128);
//!     let mut renderer = VolumeRenderer::new(config.render.clone(), db, Box::new(comm), view)?;
//!     renderer.render(&mut ExecutionContext::new())
//! });
//! ```

pub mod config;
pub mod error;
pub mod pipeline;
pub mod render;
pub mod types;

// Re-export commonly used types
pub use config::{RenderSettings, VisConfig};
pub use error::{Result, VolVisError};
pub use pipeline::{Contract, DataRequest, ExecutionContext, Filter, Pipeline, PipelineError};
pub use render::{Image, View, VolumeRenderer};
pub use types::{Bounds, Cell, CellKind, Dataset, DomainData, UnstructuredMesh};
