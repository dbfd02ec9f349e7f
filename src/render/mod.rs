//! Distributed sample-point volume renderer.
//!
//! Each rank projects its local cells into primitives, the primitives are
//! redistributed so every rank holds what touches its image row strip, each
//! rank rasterizes and shades its strip, and the strips are composited.
//!
//! # Architecture
//!
//! ```text
//! Dataset ──extract──► CellList ──SamplePointCommunicator──► CellList (own strip)
//!         ──rasterize──► Volume ──RayFunction──► strip Image ──TiledImageCompositor──► Image
//! ```
//!
//! # Design
//!
//! - **Flat wire format**: one batch per destination, each record a fixed
//!   header plus a self-describing payload (`bytemuck` Pod headers).
//! - **Communicator trait**: collectives are default methods over
//!   point-to-point `send`/`recv`; ranks can be threads or anything else.
//! - **Deterministic jitter**: offsets are seeded by cell identity.

pub mod arbitrator;
pub mod cell_list;
pub mod comm;
pub mod compositor;
pub mod extract;
pub mod image;
pub mod partition;
pub mod primitive;
pub mod ray_function;
pub mod renderer;
pub mod sample_comm;
pub mod sample_points;
pub mod view;
pub mod volume;

pub use arbitrator::{RelativeValueArbitrator, SampleArbitrator};
pub use cell_list::CellList;
pub use comm::{Communicator, LocalCluster, SerialCommunicator, ThreadCommunicator};
pub use compositor::TiledImageCompositor;
pub use image::Image;
pub use partition::ImagePartition;
pub use primitive::{Footprint, Primitive};
pub use ray_function::{
    CompositeRayFunction, DistanceToValueRayFunction, MaximumIntensityRayFunction, RayFunction,
    ThresholdRayFunction, TransferFunction,
};
pub use renderer::VolumeRenderer;
pub use sample_comm::{MessageVolume, SamplePointCommunicator};
pub use sample_points::SamplePoints;
pub use view::View;
pub use volume::{Ray, Volume};
