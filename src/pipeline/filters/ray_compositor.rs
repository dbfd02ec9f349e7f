//! RayCompositorFilter: sample points → image.
//!
//! Collective: every rank runs `execute` together. Phases:
//!
//! ```text
//! extents ──► partition ──► redistribute ──► rasterize ──► shade ──► composite
//! ```
//!
//! Abort is agreed at every phase boundary with an `all_reduce_any` over the
//! local predicates, so all ranks leave from the same point and no rank is
//! left blocking in a collective.

use crate::config::{ArbitratorSettings, CompositingMode, PartitionMode};
use crate::pipeline::context::ExecutionContext;
use crate::pipeline::contract::Contract;
use crate::pipeline::data_object::{DataAttributes, DataPayload};
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::filter::{ConfigValue, Filter, FilterInputs, FilterOutput};
use crate::render::arbitrator::RelativeValueArbitrator;
use crate::render::comm::Communicator;
use crate::render::compositor::TiledImageCompositor;
use crate::render::image::Image;
use crate::render::ray_function::RayFunction;
use crate::render::sample_comm::SamplePointCommunicator;
use crate::render::volume::Volume;
use crossbeam_channel::{Receiver, Sender};
use std::ops::Range;
use std::sync::Arc;

const PHASES: usize = 4;

/// What one rank did during one execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderStats {
    pub rank: usize,
    /// Primitive copies sent, summed over destinations
    pub primitives_sent: usize,
    pub bytes_sent: usize,
    /// Primitives kept after redistribution
    pub primitives_received: usize,
    pub valid_samples: usize,
    /// Image rows this rank rendered
    pub rows: Range<usize>,
}

pub struct RayCompositorFilter {
    comm: Box<dyn Communicator>,
    ray_function: Box<dyn RayFunction>,
    partition: PartitionMode,
    compositing: CompositingMode,
    arbitrator: Option<ArbitratorSettings>,
    background: [u8; 3],
    stats_tx: Sender<RenderStats>,
}

impl RayCompositorFilter {
    /// The filter plus the receiving end of its per-execution stats.
    pub fn new(
        comm: Box<dyn Communicator>,
        ray_function: Box<dyn RayFunction>,
    ) -> (Self, Receiver<RenderStats>) {
        let (stats_tx, stats_rx) = crossbeam_channel::unbounded();
        let filter = Self {
            comm,
            ray_function,
            partition: PartitionMode::default(),
            compositing: CompositingMode::default(),
            arbitrator: None,
            background: [0; 3],
            stats_tx,
        };
        (filter, stats_rx)
    }

    pub fn with_partition(mut self, mode: PartitionMode) -> Self {
        self.partition = mode;
        self
    }

    pub fn with_compositing(mut self, mode: CompositingMode) -> Self {
        self.compositing = mode;
        self
    }

    pub fn with_arbitrator(mut self, arbitrator: Option<ArbitratorSettings>) -> Self {
        self.arbitrator = arbitrator;
        self
    }

    pub fn with_background(mut self, background: [u8; 3]) -> Self {
        self.background = background;
        self
    }

    pub fn set_ray_function(&mut self, ray_function: Box<dyn RayFunction>) {
        self.ray_function = ray_function;
    }

    pub fn rank(&self) -> usize {
        self.comm.rank()
    }

    /// Collective abort poll. Fails on every rank when any rank wants out.
    fn agree_on_abort(
        &self,
        ctx: &mut ExecutionContext,
        stage: &'static str,
        phase: usize,
    ) -> PipelineResult<()> {
        ctx.report_progress(stage, phase, PHASES);
        self.vote_abort(ctx, ctx.abort_requested(), stage)
    }

    fn vote_abort(&self, ctx: &ExecutionContext, local: bool, stage: &'static str) -> PipelineResult<()> {
        if self.comm.all_reduce_any(local)? {
            tracing::info!("Rank {} leaving {} on collective abort", self.comm.rank(), stage);
            return Err(PipelineError::Aborted {
                node: ctx.current_node(),
            });
        }
        Ok(())
    }
}

impl Filter for RayCompositorFilter {
    fn name(&self) -> &str {
        "RayCompositor"
    }

    fn is_collective(&self) -> bool {
        true
    }

    fn abandon_collective(&mut self, ctx: &mut ExecutionContext) -> PipelineResult<()> {
        match self.vote_abort(ctx, true, "partition") {
            Err(PipelineError::Aborted { .. }) => Ok(()),
            other => other,
        }
    }

    fn execute(
        &mut self,
        inputs: &FilterInputs,
        _contract: &Contract,
        ctx: &mut ExecutionContext,
    ) -> PipelineResult<FilterOutput> {
        let points = inputs.sample_points()?;
        let view = &points.view;
        let comm = self.comm.as_ref();

        self.agree_on_abort(ctx, "partition", 0)?;
        let extents = comm.all_reduce_extents(points.extents)?;
        let mut ranges = Vec::with_capacity(points.nvars());
        ranges.push(extents);
        for local in &points.secondary_extents {
            ranges.push(comm.all_reduce_extents(*local)?);
        }

        let mut spc = SamplePointCommunicator::new(comm, view.width, view.height);
        let (incoming, sent) = spc.exchange(&points.cell_list, self.partition)?;
        let partition = spc.partition().clone();
        let rows = partition.partition_rows(comm.rank());

        self.agree_on_abort(ctx, "rasterize", 1)?;
        let mut volume = Volume::new(view.width, rows.clone(), view.depth, points.nvars());
        if let Some(arb) = &self.arbitrator {
            let resolved =
                RelativeValueArbitrator::for_variable(&points.variables, &arb.variable, arb.prefer_larger)?;
            volume = volume.with_arbitrator(Arc::new(resolved));
        }
        let mut local = spc.strip_cell_list(points.nvars());
        let kept = local.extract_cells(&incoming, &mut volume)?;

        self.agree_on_abort(ctx, "shade", 2)?;
        let mut strip = Image::strip(view.width, rows.clone(), self.background);
        for row in rows.clone() {
            for x in 0..view.width {
                let shade = volume
                    .ray(x, row)
                    .filter(|ray| ray.has_samples())
                    .and_then(|ray| self.ray_function.shade(&ray, &ranges, self.background));
                if let Some(shade) = shade {
                    strip.set_pixel(x, row, shade.color, shade.depth);
                }
            }
        }

        let stats = RenderStats {
            rank: comm.rank(),
            primitives_sent: sent.total_primitives(),
            bytes_sent: sent.total_bytes(),
            primitives_received: kept,
            valid_samples: volume.valid_samples(),
            rows: rows.clone(),
        };
        tracing::debug!(
            "Rank {} rendered rows {:?}: {} primitives, {} valid samples ({})",
            stats.rank,
            stats.rows,
            stats.primitives_received,
            stats.valid_samples,
            self.ray_function.name()
        );
        let _ = self.stats_tx.send(stats);

        self.agree_on_abort(ctx, "composite", 3)?;
        let compositor = TiledImageCompositor::new(self.compositing, view.width, view.height);
        let image = compositor.composite(comm, &partition, &strip)?;
        ctx.report_progress("composite", PHASES, PHASES);

        let mut attributes = DataAttributes::with_variables(points.variables.iter().cloned());
        if let Some(primary) = points.primary_variable() {
            attributes.extents.insert(primary.to_string(), extents);
        }
        let payload = match image {
            Some(image) => DataPayload::Image(image),
            None => DataPayload::Empty,
        };
        Ok(FilterOutput::new(payload, attributes))
    }

    fn on_config_change(&mut self, key: &str, value: &ConfigValue) -> bool {
        match (key, value.as_str()) {
            ("partition", Some("uniform")) => {
                self.partition = PartitionMode::Uniform;
                true
            }
            ("partition", Some("balanced")) => {
                self.partition = PartitionMode::Balanced;
                true
            }
            ("compositing", Some("all_gather")) => {
                self.compositing = CompositingMode::AllGather;
                true
            }
            ("root", _) => match value.as_int() {
                Some(root) if root >= 0 && (root as usize) < self.comm.size() => {
                    self.compositing = CompositingMode::GatherToRoot {
                        root: root as usize,
                    };
                    true
                }
                _ => false,
            },
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::contract::DataRequest;
    use crate::pipeline::data_object::{DataObject, OriginatingSource};
    use crate::pipeline::id::{CellId, NodeId};
    use crate::render::cell_list::CellList;
    use crate::render::comm::{LocalCluster, SerialCommunicator};
    use crate::render::primitive::Primitive;
    use crate::render::ray_function::MaximumIntensityRayFunction;
    use crate::render::sample_points::SamplePoints;
    use crate::render::view::View;
    use crate::types::{CellKind, Extents};
    use glam::DVec3;

    fn contract() -> Contract {
        Contract::new(DataRequest::new("mesh", "v", 0), 0)
    }

    fn points_input(cells: CellList, extents: Extents) -> FilterInputs {
        let view = View::image_space(8, 8, 4);
        let points = SamplePoints::new(cells, view, vec!["v".to_string()], extents);
        let obj = DataObject::new(
            DataPayload::SamplePoints(points),
            DataAttributes::default(),
            OriginatingSource {
                node: NodeId(0),
                contract: contract(),
            },
        );
        FilterInputs::new(vec![("in".into(), Arc::new(obj))])
    }

    fn point_at(id: u32, x: f64, y: f64, v: f64) -> (Primitive, i32, i32) {
        let p = Primitive::new(
            CellKind::Point,
            CellId::new(0, id),
            vec![DVec3::new(x, y, 1.0)],
            vec![v],
            1,
        );
        (p, x as i32, y as i32)
    }

    #[test]
    fn test_single_rank_renders_points() {
        let mut cells = CellList::new(1);
        for (i, (x, y)) in [(1.0, 1.0), (6.0, 5.0)].into_iter().enumerate() {
            let (p, px, py) = point_at(i as u32, x, y, 1.0);
            cells.store(&p, px, px, py, py).unwrap();
        }
        let (mut filter, stats) = RayCompositorFilter::new(
            Box::new(SerialCommunicator::new()),
            Box::new(MaximumIntensityRayFunction::default()),
        );
        let out = filter
            .execute(
                &points_input(cells, Extents { min: 0.0, max: 1.0 }),
                &contract(),
                &mut ExecutionContext::new(),
            )
            .unwrap();
        let DataPayload::Image(image) = out.payload else {
            panic!("expected an image");
        };
        assert_eq!(image.rows_differing_from([0; 3]), vec![1, 5]);
        let stats = stats.try_recv().unwrap();
        assert_eq!(stats.primitives_received, 2);
        assert_eq!(stats.valid_samples, 2);
        assert_eq!(stats.rows, 0..8);
    }

    #[test]
    fn test_non_root_ranks_output_empty() {
        let outputs = LocalCluster::run(2, |comm| {
            let rank = comm.rank();
            let mut cells = CellList::new(1);
            let (p, px, py) = point_at(rank as u32, 3.0, 6.0 * rank as f64, 1.0);
            cells.store(&p, px, px, py, py).unwrap();
            let (filter, _stats) = RayCompositorFilter::new(
                Box::new(comm),
                Box::new(MaximumIntensityRayFunction::default()),
            );
            let mut filter = filter
                .with_partition(PartitionMode::Uniform)
                .with_compositing(CompositingMode::GatherToRoot { root: 1 });
            let out = filter
                .execute(
                    &points_input(cells, Extents { min: 0.0, max: 1.0 }),
                    &contract(),
                    &mut ExecutionContext::new(),
                )
                .unwrap();
            match out.payload {
                DataPayload::Image(image) => Some(image.rows_differing_from([0; 3])),
                _ => None,
            }
        });
        assert_eq!(outputs[0], None);
        assert_eq!(outputs[1], Some(vec![0, 6]));
    }

    #[test]
    fn test_abort_on_one_rank_stops_all() {
        let outputs = LocalCluster::run(3, |comm| {
            let rank = comm.rank();
            let (mut filter, _stats) = RayCompositorFilter::new(
                Box::new(comm),
                Box::new(MaximumIntensityRayFunction::default()),
            );
            let mut ctx = ExecutionContext::new().with_abort(move || rank == 2);
            filter
                .execute(
                    &points_input(CellList::new(1), Extents::empty()),
                    &contract(),
                    &mut ctx,
                )
                .map(|_| ())
        });
        assert!(outputs.iter().all(|r| matches!(r, Err(e) if e.is_abort())));
    }

    #[test]
    fn test_unknown_arbitrator_variable() {
        let (filter, _stats) = RayCompositorFilter::new(
            Box::new(SerialCommunicator::new()),
            Box::new(MaximumIntensityRayFunction::default()),
        );
        let mut filter = filter.with_arbitrator(Some(ArbitratorSettings {
            variable: "material".to_string(),
            prefer_larger: true,
        }));
        let err = filter
            .execute(
                &points_input(CellList::new(1), Extents::empty()),
                &contract(),
                &mut ExecutionContext::new(),
            )
            .unwrap_err();
        assert_eq!(err, PipelineError::UnknownVariable("material".into()));
    }

    #[test]
    fn test_config_changes() {
        let (mut filter, _stats) = RayCompositorFilter::new(
            Box::new(SerialCommunicator::new()),
            Box::new(MaximumIntensityRayFunction::default()),
        );
        assert!(filter.on_config_change("partition", &ConfigValue::String("uniform".into())));
        assert!(!filter.on_config_change("root", &ConfigValue::Int(1)));
        assert!(filter.on_config_change("root", &ConfigValue::Int(0)));
        assert!(!filter.on_config_change("partition", &ConfigValue::String("diagonal".into())));
    }

    #[test]
    fn test_secondary_range_is_global() {
        use crate::render::ray_function::{ControlPoint, ThresholdRayFunction, TransferFunction};

        let ramp = TransferFunction {
            points: vec![
                ControlPoint {
                    position: 0.0,
                    color: [0; 3],
                    opacity: 1.0,
                },
                ControlPoint {
                    position: 1.0,
                    color: [255; 3],
                    opacity: 1.0,
                },
            ],
            range: None,
        };
        let outputs = LocalCluster::run(2, |comm| {
            let rank = comm.rank();
            // each rank only ever sees one secondary value locally
            let secondary = 10.0 + 20.0 * rank as f64;
            let y = 1.0 + 5.0 * rank as f64;
            let mut cells = CellList::new(2);
            let p = Primitive::new(
                CellKind::Point,
                CellId::new(rank as u32, 0),
                vec![DVec3::new(2.0, y, 1.0)],
                vec![0.5, secondary],
                2,
            );
            cells.store(&p, 2, 2, y as i32, y as i32).unwrap();
            let points = SamplePoints::new(
                cells,
                View::image_space(8, 8, 4),
                vec!["v".to_string(), "s".to_string()],
                Extents { min: 0.0, max: 1.0 },
            )
            .with_secondary_extents(vec![Extents {
                min: secondary,
                max: secondary,
            }]);
            let input = FilterInputs::new(vec![(
                "in".into(),
                Arc::new(DataObject::new(
                    DataPayload::SamplePoints(points),
                    DataAttributes::default(),
                    OriginatingSource {
                        node: NodeId(0),
                        contract: contract(),
                    },
                )),
            )]);

            let (filter, _stats) = RayCompositorFilter::new(
                Box::new(comm),
                Box::new(ThresholdRayFunction::new(0.5, ramp.clone())),
            );
            let mut filter = filter
                .with_partition(PartitionMode::Uniform)
                .with_compositing(CompositingMode::GatherToRoot { root: 0 });
            match filter
                .execute(&input, &contract(), &mut ExecutionContext::new())
                .unwrap()
                .payload
            {
                DataPayload::Image(image) => Some((image.pixel(2, 1), image.pixel(2, 6))),
                _ => None,
            }
        });
        // 10 and 30 are the ends of the global 10..30 range
        assert_eq!(outputs[0], Some((Some([0; 3]), Some([255; 3]))));
    }
}
