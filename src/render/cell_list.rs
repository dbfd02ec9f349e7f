//! Cell list: the per-rank buffer of serialized primitives.
//!
//! Primitive payloads live back to back in one byte arena; each entry holds
//! the primitive's screen footprint plus an offset into the arena. Entries
//! are referenced by index everywhere else (assignment lists, restriction),
//! never by pointer.
//!
//! The list is append-only. Capacity doubles when full and never shrinks
//! until [`CellList::release`]. [`CellList::restrict`] narrows the logical
//! view without compacting anything.

use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::render::primitive::{
    read_batch_header, read_record_header, BatchHeader, Footprint, Primitive, RecordHeader,
    BATCH_HEADER_BYTES, RECORD_HEADER_BYTES,
};
use crate::render::volume::Volume;
use crate::types::CellKind;

#[derive(Debug, Clone, Copy)]
struct CellEntry {
    footprint: Footprint,
    offset: usize,
    len: usize,
}

#[derive(Debug, Clone)]
pub struct CellList {
    nvars: usize,
    arena: Vec<u8>,
    entries: Vec<CellEntry>,
    /// Allocated entry slots
    capacity: usize,
    window: Option<Footprint>,
}

impl CellList {
    pub fn new(nvars: usize) -> Self {
        Self::with_capacity(nvars, 0)
    }

    pub fn with_capacity(nvars: usize, capacity: usize) -> Self {
        Self {
            nvars,
            arena: Vec::new(),
            entries: Vec::with_capacity(capacity),
            capacity,
            window: None,
        }
    }

    pub fn nvars(&self) -> usize {
        self.nvars
    }

    /// Allocated slots
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Primitives physically stored, ignoring any restriction
    pub fn stored_len(&self) -> usize {
        self.entries.len()
    }

    /// Primitives in the current (possibly restricted) view
    pub fn len(&self) -> usize {
        self.indices().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn arena_bytes(&self) -> usize {
        self.arena.len()
    }

    pub fn window(&self) -> Option<Footprint> {
        self.window
    }

    /// Serialize `primitive` and append it with its footprint.
    pub fn store(
        &mut self,
        primitive: &Primitive,
        minx: i32,
        maxx: i32,
        miny: i32,
        maxy: i32,
    ) -> PipelineResult<()> {
        if primitive.nvars != self.nvars
            || primitive.values.len() != primitive.vertices.len() * self.nvars
        {
            return Err(PipelineError::VariableCountMismatch {
                expected: self.nvars,
                found: primitive.nvars,
            });
        }
        if primitive.vertices.len() != primitive.kind.node_count() {
            return Err(PipelineError::InvalidInput(format!(
                "{:?} {:?} has {} vertices, expected {}",
                primitive.kind,
                primitive.id,
                primitive.vertices.len(),
                primitive.kind.node_count()
            )));
        }
        let footprint = Footprint::new(minx, maxx, miny, maxy);
        if footprint.is_empty() {
            return Err(PipelineError::DegenerateGeometry(format!(
                "{:?} stored with empty footprint {:?}",
                primitive.id, footprint
            )));
        }

        let offset = self.arena.len();
        primitive.write_payload(&mut self.arena);
        let len = self.arena.len() - offset;
        self.push(CellEntry {
            footprint,
            offset,
            len,
        });
        Ok(())
    }

    fn push(&mut self, entry: CellEntry) {
        if self.entries.len() == self.capacity {
            let grown = (self.capacity * 2).max(1);
            self.entries.reserve_exact(grown - self.entries.len());
            tracing::trace!("Cell list grown {} -> {}", self.capacity, grown);
            self.capacity = grown;
        }
        self.entries.push(entry);
    }

    /// Narrow the view to primitives overlapping the inclusive rectangle.
    /// Repeated calls intersect.
    pub fn restrict(&mut self, min_w: i32, max_w: i32, min_h: i32, max_h: i32) {
        let wanted = Footprint::new(min_w, max_w, min_h, max_h);
        self.window = Some(match self.window {
            Some(w) => Footprint::new(
                w.minx.max(wanted.minx),
                w.maxx.min(wanted.maxx),
                w.miny.max(wanted.miny),
                w.maxy.min(wanted.maxy),
            ),
            None => wanted,
        });
    }

    pub fn clear_restriction(&mut self) {
        self.window = None;
    }

    fn visible(&self, footprint: &Footprint) -> bool {
        self.window.map_or(true, |w| w.overlaps(footprint))
    }

    /// Indices of primitives in the current view
    pub fn indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| self.visible(&e.footprint))
            .map(|(i, _)| i)
    }

    pub fn footprint(&self, index: usize) -> Option<Footprint> {
        self.entries.get(index).map(|e| e.footprint)
    }

    /// Deserialize primitive `index`.
    pub fn primitive(&self, index: usize) -> PipelineResult<Primitive> {
        let entry = self.entries.get(index).ok_or_else(|| {
            PipelineError::InvalidInput(format!("cell list has no entry {}", index))
        })?;
        Primitive::read_payload(&self.arena[entry.offset..entry.offset + entry.len], self.nvars)
    }

    /// Add each visible primitive's footprint width to every row it spans.
    /// Rows outside `counts` are ignored.
    pub fn estimate_number_of_samples_per_scanline(&self, counts: &mut [u64]) {
        for i in self.indices() {
            let f = self.entries[i].footprint;
            let lo = f.miny.max(0) as usize;
            let hi = (f.maxy.max(-1) + 1) as usize;
            let hi = hi.min(counts.len());
            for row in counts.iter_mut().take(hi).skip(lo) {
                *row += f.width() as u64;
            }
        }
    }

    /// One batch message holding the listed entries.
    pub fn serialize_batch(&self, indices: &[usize]) -> Vec<u8> {
        let total: usize = indices
            .iter()
            .map(|&i| RECORD_HEADER_BYTES + self.entries[i].len)
            .sum();
        let mut out = Vec::with_capacity(BATCH_HEADER_BYTES + total);
        let header = BatchHeader {
            count: indices.len() as i32,
            total_bytes: total as i32,
        };
        out.extend_from_slice(bytemuck::bytes_of(&header));
        for &i in indices {
            let e = &self.entries[i];
            let record = RecordHeader {
                minx: e.footprint.minx,
                maxx: e.footprint.maxx,
                miny: e.footprint.miny,
                maxy: e.footprint.maxy,
                byte_length: e.len as i32,
            };
            out.extend_from_slice(bytemuck::bytes_of(&record));
            out.extend_from_slice(&self.arena[e.offset..e.offset + e.len]);
        }
        out
    }

    /// A batch of everything in the current view.
    pub fn serialize(&self) -> Vec<u8> {
        let indices: Vec<usize> = self.indices().collect();
        self.serialize_batch(&indices)
    }

    /// Append primitives from received batches, keeping only those that
    /// overlap the restriction window. Returns how many were kept.
    pub fn unserialize_messages(&mut self, messages: &[Vec<u8>]) -> PipelineResult<usize> {
        let mut kept = 0;
        for message in messages {
            if message.is_empty() {
                continue;
            }
            let header = read_batch_header(message)?;
            let mut cursor = BATCH_HEADER_BYTES;
            for _ in 0..header.count {
                let record = read_record_header(&message[cursor..])?;
                cursor += RECORD_HEADER_BYTES;
                let len = usize::try_from(record.byte_length).map_err(|_| {
                    PipelineError::MalformedMessage(format!("record length {}", record.byte_length))
                })?;
                if cursor + len > message.len() {
                    return Err(PipelineError::MalformedMessage(format!(
                        "record of {} bytes overruns batch at {}",
                        len, cursor
                    )));
                }
                let payload = &message[cursor..cursor + len];
                self.check_payload_len(payload)?;
                cursor += len;

                let footprint = record.footprint();
                if footprint.is_empty() || !self.visible(&footprint) {
                    continue;
                }
                let offset = self.arena.len();
                self.arena.extend_from_slice(payload);
                self.push(CellEntry {
                    footprint,
                    offset,
                    len,
                });
                kept += 1;
            }
            if cursor != message.len() {
                return Err(PipelineError::MalformedMessage(format!(
                    "{} trailing bytes after {} records",
                    message.len() - cursor,
                    header.count
                )));
            }
        }
        Ok(kept)
    }

    /// Payload length must match this list's variable count.
    fn check_payload_len(&self, payload: &[u8]) -> PipelineResult<()> {
        if payload.len() < 8 {
            return Err(PipelineError::MalformedMessage("short payload".to_string()));
        }
        let tag: u32 = bytemuck::pod_read_unaligned(&payload[0..4]);
        let kind = CellKind::from_tag(tag)
            .ok_or_else(|| PipelineError::MalformedMessage(format!("unknown cell tag {}", tag)))?;
        let expected = Primitive::payload_len(kind.node_count(), self.nvars);
        if payload.len() != expected {
            return Err(PipelineError::MalformedMessage(format!(
                "{:?} payload is {} bytes, expected {} for {} variables",
                kind,
                payload.len(),
                expected,
                self.nvars
            )));
        }
        Ok(())
    }

    /// Unserialize incoming batches straight into `volume`. The kept
    /// primitives stay in the list as well.
    pub fn extract_cells(&mut self, messages: &[Vec<u8>], volume: &mut Volume) -> PipelineResult<usize> {
        let start = self.entries.len();
        let kept = self.unserialize_messages(messages)?;
        for i in start..self.entries.len() {
            volume.rasterize(&self.primitive(i)?)?;
        }
        Ok(kept)
    }

    /// Rasterize every primitive in the current view.
    pub fn rasterize_into(&self, volume: &mut Volume) -> PipelineResult<()> {
        for i in self.indices() {
            volume.rasterize(&self.primitive(i)?)?;
        }
        Ok(())
    }

    /// Drop all stored primitives and their storage.
    pub fn release(&mut self) {
        self.arena = Vec::new();
        self.entries = Vec::new();
        self.capacity = 0;
        self.window = None;
    }
}
