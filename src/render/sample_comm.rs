//! Sample point communicator: moves primitives to the ranks that own the
//! image rows they touch.
//!
//! 1. [`SamplePointCommunicator::establish_image_partition_boundaries`]
//!    agrees on the strips, from summed per-row work estimates when balanced.
//! 2. [`SamplePointCommunicator::mutate_messages_by_assignment`] assigns each
//!    primitive to every strip its footprint overlaps and batches one
//!    message per destination.
//! 3. [`SamplePointCommunicator::communicate_messages`] runs one size+payload
//!    exchange.
//! 4. [`SamplePointCommunicator::receive`] keeps only what lands in this
//!    rank's strip.

use crate::config::PartitionMode;
use crate::pipeline::error::PipelineResult;
use crate::render::cell_list::CellList;
use crate::render::comm::Communicator;
use crate::render::partition::ImagePartition;

/// Outgoing traffic of one rank, for logging and stats.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageVolume {
    /// Primitive copies per destination rank
    pub primitives: Vec<usize>,
    /// Batch bytes per destination rank
    pub bytes: Vec<usize>,
}

impl MessageVolume {
    pub fn total_primitives(&self) -> usize {
        self.primitives.iter().sum()
    }

    pub fn total_bytes(&self) -> usize {
        self.bytes.iter().sum()
    }
}

pub struct SamplePointCommunicator<'a> {
    comm: &'a dyn Communicator,
    width: usize,
    height: usize,
    partition: ImagePartition,
}

impl<'a> SamplePointCommunicator<'a> {
    pub fn new(comm: &'a dyn Communicator, width: usize, height: usize) -> Self {
        Self {
            comm,
            width,
            height,
            partition: ImagePartition::uniform(height, comm.size()),
        }
    }

    pub fn partition(&self) -> &ImagePartition {
        &self.partition
    }

    /// Collective. Every rank ends up with the same partition.
    pub fn establish_image_partition_boundaries(
        &mut self,
        cells: &CellList,
        mode: PartitionMode,
    ) -> PipelineResult<&ImagePartition> {
        self.partition = match mode {
            PartitionMode::Uniform => ImagePartition::uniform(self.height, self.comm.size()),
            PartitionMode::Balanced => {
                let mut local = vec![0u64; self.height];
                cells.estimate_number_of_samples_per_scanline(&mut local);
                let global = self.comm.all_reduce_sum(&local)?;
                ImagePartition::balanced(&global, self.comm.size())
            }
        };
        if self.comm.rank() == 0 {
            tracing::debug!("Image partition boundaries: {:?}", self.partition.boundaries());
        }
        Ok(&self.partition)
    }

    /// One batch per rank. A primitive spanning several strips is copied
    /// into each of their batches.
    pub fn mutate_messages_by_assignment(&self, cells: &CellList) -> (Vec<Vec<u8>>, MessageVolume) {
        let size = self.comm.size();
        let mut assignments: Vec<Vec<usize>> = vec![Vec::new(); size];
        for i in cells.indices() {
            if let Some(f) = cells.footprint(i) {
                for rank in self.partition.partitions_overlapping(f.miny, f.maxy) {
                    assignments[rank].push(i);
                }
            }
        }

        let messages: Vec<Vec<u8>> = assignments.iter().map(|a| cells.serialize_batch(a)).collect();
        let volume = MessageVolume {
            primitives: assignments.iter().map(Vec::len).collect(),
            bytes: messages.iter().map(Vec::len).collect(),
        };
        (messages, volume)
    }

    /// Collective exchange of the per-rank batches.
    pub fn communicate_messages(&self, outgoing: Vec<Vec<u8>>) -> PipelineResult<Vec<Vec<u8>>> {
        let incoming = self.comm.all_to_all(outgoing)?;
        tracing::trace!(
            "Rank {} received {} bytes",
            self.comm.rank(),
            incoming.iter().map(Vec::len).sum::<usize>()
        );
        Ok(incoming)
    }

    /// An empty cell list restricted to this rank's strip.
    pub fn strip_cell_list(&self, nvars: usize) -> CellList {
        let rows = self.partition.partition_rows(self.comm.rank());
        let mut local = CellList::new(nvars);
        if rows.is_empty() {
            // nothing can land in an empty strip
            local.restrict(0, -1, 0, -1);
        } else {
            local.restrict(0, self.width as i32 - 1, rows.start as i32, rows.end as i32 - 1);
        }
        local
    }

    /// A cell list restricted to this rank's strip, filled from `incoming`.
    pub fn receive(&self, incoming: &[Vec<u8>], nvars: usize) -> PipelineResult<CellList> {
        let mut local = self.strip_cell_list(nvars);
        local.unserialize_messages(incoming)?;
        Ok(local)
    }

    /// Steps 1 to 3: the raw batches addressed to this rank.
    pub fn exchange(
        &mut self,
        cells: &CellList,
        mode: PartitionMode,
    ) -> PipelineResult<(Vec<Vec<u8>>, MessageVolume)> {
        self.establish_image_partition_boundaries(cells, mode)?;
        let (outgoing, volume) = self.mutate_messages_by_assignment(cells);
        tracing::debug!(
            "Rank {} sending {} primitive copies ({} bytes)",
            self.comm.rank(),
            volume.total_primitives(),
            volume.total_bytes()
        );
        let incoming = self.communicate_messages(outgoing)?;
        Ok((incoming, volume))
    }

    /// Steps 1 to 4 in one call.
    pub fn redistribute(
        &mut self,
        cells: &CellList,
        mode: PartitionMode,
    ) -> PipelineResult<(CellList, MessageVolume)> {
        let (incoming, volume) = self.exchange(cells, mode)?;
        let local = self.receive(&incoming, cells.nvars())?;
        Ok((local, volume))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::id::CellId;
    use crate::render::comm::{LocalCluster, SerialCommunicator};
    use crate::render::primitive::Primitive;
    use crate::types::CellKind;
    use glam::DVec3;

    fn point(id: u32) -> Primitive {
        Primitive::new(CellKind::Point, CellId::new(0, id), vec![DVec3::ZERO], vec![id as f64], 1)
    }

    #[test]
    fn test_spanning_primitive_goes_to_both_owners() {
        let comm = SerialCommunicator::new();
        let mut spc = SamplePointCommunicator::new(&comm, 10, 40);
        spc.partition = ImagePartition::uniform(40, 2);

        let mut cells = CellList::new(1);
        cells.store(&point(0), 0, 3, 10, 30).unwrap();
        cells.store(&point(1), 0, 3, 25, 26).unwrap();

        let assignments: Vec<Vec<usize>> = (0..2)
            .map(|r| {
                cells
                    .indices()
                    .filter(|&i| {
                        let f = cells.footprint(i).unwrap();
                        spc.partition.partitions_overlapping(f.miny, f.maxy).contains(&r)
                    })
                    .collect()
            })
            .collect();
        assert_eq!(assignments, vec![vec![0], vec![0, 1]]);

        // the batch builder agrees once the communicator has two ranks
        let results = LocalCluster::run(2, |comm| {
            let mut spc = SamplePointCommunicator::new(&comm, 10, 40);
            let mine = if comm.rank() == 0 { cells.clone() } else { CellList::new(1) };
            let (local, volume) = spc.redistribute(&mine, PartitionMode::Uniform).unwrap();
            (local.len(), volume.primitives)
        });
        assert_eq!(results[0], (1, vec![1, 2]));
        assert_eq!(results[1], (2, vec![0, 0]));
    }

    #[test]
    fn test_balanced_partition_is_agreed() {
        let results = LocalCluster::run(3, |comm| {
            let mut cells = CellList::new(1);
            if comm.rank() == 1 {
                for i in 0..10 {
                    cells.store(&point(i), 0, 9, 90, 99).unwrap();
                }
            }
            let mut spc = SamplePointCommunicator::new(&comm, 10, 100);
            spc.establish_image_partition_boundaries(&cells, PartitionMode::Balanced)
                .unwrap()
                .clone()
        });
        assert!(results.windows(2).all(|w| w[0] == w[1]));
        // all the work is in rows 90..100, so the first strip swallows the rest
        assert!(results[0].partition_rows(0).end > 90);
    }

    #[test]
    fn test_serial_redistribution_keeps_everything() {
        let comm = SerialCommunicator::new();
        let mut cells = CellList::new(1);
        for i in 0..4 {
            cells.store(&point(i), 0, 0, i as i32, i as i32).unwrap();
        }
        let mut spc = SamplePointCommunicator::new(&comm, 1, 4);
        let (local, volume) = spc.redistribute(&cells, PartitionMode::Balanced).unwrap();
        assert_eq!(local.len(), 4);
        assert_eq!(volume.primitives, vec![4]);
    }
}
