//! Volume renderer: the standard rendering pipeline behind one call.
//!
//! ```text
//! [DatabaseSource] ──► [MaterialSelect]? ──► (restriction filters) ──► [SamplePointExtractor] ──► [RayCompositor]
//! ```
//!
//! One renderer runs per rank. All ranks must call [`VolumeRenderer::render`]
//! together because the compositor stage is collective.

use crate::config::RenderSettings;
use crate::error::{Result, VolVisError};
use crate::pipeline::context::ExecutionContext;
use crate::pipeline::contract::{Contract, DataRequest};
use crate::pipeline::database::Database;
use crate::pipeline::error::PipelineResult;
use crate::pipeline::executor::Pipeline;
use crate::pipeline::filter::Filter;
use crate::pipeline::filters::{
    DatabaseSource, MaterialSelectFilter, RayCompositorFilter, RenderStats, SamplePointExtractor,
};
use crate::pipeline::id::NodeId;
use crate::render::comm::Communicator;
use crate::render::image::Image;
use crate::render::view::View;
use crossbeam_channel::Receiver;
use std::sync::Arc;

pub struct VolumeRenderer {
    settings: RenderSettings,
    database: Arc<dyn Database>,
    pipeline: Pipeline,
    source: NodeId,
    extractor: NodeId,
    compositor: NodeId,
    stats_rx: Receiver<RenderStats>,
    timestep: usize,
    pipeline_index: usize,
}

impl VolumeRenderer {
    /// Build the pipeline. `view` must match the image size in `settings`.
    pub fn new(
        settings: RenderSettings,
        database: Arc<dyn Database>,
        comm: Box<dyn Communicator>,
        view: View,
    ) -> Result<Self> {
        settings.validate()?;
        if (view.width, view.height, view.depth) != (settings.width, settings.height, settings.depth_samples) {
            return Err(VolVisError::Config(format!(
                "View is {}x{}x{} but settings ask for {}x{}x{}",
                view.width,
                view.height,
                view.depth,
                settings.width,
                settings.height,
                settings.depth_samples
            )));
        }
        let metadata = database.metadata();
        // a rank without local domains still takes part in the collectives
        if !metadata.domains.is_empty() {
            if let Some(var) = settings.variables().into_iter().find(|v| !metadata.has_variable(v)) {
                return Err(VolVisError::Config(format!(
                    "Database has no variable '{}' (available: {:?})",
                    var, metadata.scalar_variables
                )));
            }
        }

        let rank = comm.rank();
        let (compositor, stats_rx) = RayCompositorFilter::new(comm, settings.build_ray_function());
        let compositor = compositor
            .with_partition(settings.partition)
            .with_compositing(settings.compositing)
            .with_arbitrator(settings.arbitrator.clone())
            .with_background(settings.background);
        let extractor = SamplePointExtractor::new(view, settings.cell_list_capacity)
            .with_jitter(settings.jitter_seed());

        let mut pipeline = Pipeline::new();
        let source = pipeline.add(DatabaseSource::new(database.clone()));
        let mut stages = vec![source];
        if !settings.materials.is_empty() {
            stages.push(pipeline.add(MaterialSelectFilter::new(settings.materials.iter().cloned())));
        }
        let extractor = pipeline.add(extractor);
        let compositor = pipeline.add(compositor);
        stages.extend([extractor, compositor]);
        pipeline.chain(&stages)?;

        tracing::debug!(
            "Rank {} built render pipeline for '{}' on mesh '{}'",
            rank,
            settings.primary_variable,
            metadata.mesh_name
        );

        Ok(Self {
            settings,
            database,
            pipeline,
            source,
            extractor,
            compositor,
            stats_rx,
            timestep: 0,
            pipeline_index: 0,
        })
    }

    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn pipeline_mut(&mut self) -> &mut Pipeline {
        &mut self.pipeline
    }

    pub fn source(&self) -> NodeId {
        self.source
    }

    pub fn extractor(&self) -> NodeId {
        self.extractor
    }

    pub fn compositor(&self) -> NodeId {
        self.compositor
    }

    pub fn timestep(&self) -> usize {
        self.timestep
    }

    pub fn set_timestep(&mut self, timestep: usize) {
        self.timestep = timestep;
    }

    /// Insert a dataset filter directly upstream of the extractor.
    pub fn insert_filter(&mut self, filter: Box<dyn Filter>) -> PipelineResult<NodeId> {
        let upstream = self
            .pipeline
            .inputs(self.extractor)?
            .first()
            .map(|(_, node)| *node)
            .unwrap_or(self.source);
        let node = self.pipeline.add_filter(filter);
        self.pipeline.connect(upstream, node)?;
        self.pipeline.connect(node, self.extractor)?;
        Ok(node)
    }

    /// The contract a render pulls through the pipeline.
    pub fn contract(&self) -> Contract {
        let metadata = self.database.metadata();
        let primary = &self.settings.primary_variable;
        let request = self
            .settings
            .secondary_variables
            .iter()
            .fold(
                DataRequest::new(metadata.mesh_name, primary.clone(), self.timestep),
                |r, v| r.with_secondary_variable(v.clone()),
            )
            .with_extents_for(primary.clone());
        Contract::new(request, self.pipeline_index)
    }

    /// Collective. Updates the pipeline and returns the image on the ranks
    /// that receive it.
    pub fn render(&mut self, ctx: &mut ExecutionContext) -> PipelineResult<Option<Image>> {
        let contract = self.contract();
        let executed = self.pipeline.update(self.compositor, &contract, ctx)?;
        if !executed {
            tracing::debug!("Render output is up to date");
        }
        Ok(self.output_image())
    }

    /// The last composited image, if this rank holds one.
    pub fn output_image(&self) -> Option<Image> {
        self.pipeline
            .output(self.compositor)
            .and_then(|o| o.image().cloned())
    }

    /// Stats from the most recent execution of the compositor stage.
    pub fn stats(&self) -> Option<RenderStats> {
        self.stats_rx.try_iter().last()
    }

    /// Drop cached outputs. Required after an aborted render.
    pub fn release(&mut self) {
        self.pipeline.release_all();
    }
}
