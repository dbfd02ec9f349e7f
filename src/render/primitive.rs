//! Sample primitives and their wire encoding.
//!
//! A primitive is one cell (or point) already projected into image space,
//! carrying its vertices and per-vertex variable values. The variable count
//! is fixed per cell list, so every byte offset is known up front.
//!
//! Record layout, native endian, no padding:
//!
//! ```text
//! record   [i32 minx][i32 maxx][i32 miny][i32 maxy][i32 byteLength][payload]
//! payload  [u32 kind][u32 nverts][u64 cell id][f64 xyz * nverts][f64 values * nverts * nvars]
//! batch    [i32 count][i32 totalBytes][record]*
//! ```
//!
//! `totalBytes` counts every record byte after the batch header.

use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::id::CellId;
use crate::types::CellKind;
use bytemuck::{Pod, Zeroable};
use glam::DVec3;

/// Bytes in a record header
pub const RECORD_HEADER_BYTES: usize = std::mem::size_of::<RecordHeader>();
/// Bytes in a batch header
pub const BATCH_HEADER_BYTES: usize = std::mem::size_of::<BatchHeader>();

const PAYLOAD_PREFIX_BYTES: usize = 16;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct RecordHeader {
    pub minx: i32,
    pub maxx: i32,
    pub miny: i32,
    pub maxy: i32,
    pub byte_length: i32,
}

impl RecordHeader {
    pub fn footprint(&self) -> Footprint {
        Footprint {
            minx: self.minx,
            maxx: self.maxx,
            miny: self.miny,
            maxy: self.maxy,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct BatchHeader {
    pub count: i32,
    pub total_bytes: i32,
}

/// Inclusive integer pixel rectangle a primitive may write samples into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Footprint {
    pub minx: i32,
    pub maxx: i32,
    pub miny: i32,
    pub maxy: i32,
}

impl Footprint {
    pub fn new(minx: i32, maxx: i32, miny: i32, maxy: i32) -> Self {
        Self {
            minx,
            maxx,
            miny,
            maxy,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.maxx < self.minx || self.maxy < self.miny
    }

    pub fn width(&self) -> usize {
        if self.is_empty() {
            0
        } else {
            (self.maxx - self.minx + 1) as usize
        }
    }

    pub fn overlaps(&self, other: &Footprint) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.minx <= other.maxx
            && other.minx <= self.maxx
            && self.miny <= other.maxy
            && other.miny <= self.maxy
    }
}

/// One projected cell or point.
#[derive(Debug, Clone, PartialEq)]
pub struct Primitive {
    pub kind: CellKind,
    pub id: CellId,
    /// Image-space vertex positions
    pub vertices: Vec<DVec3>,
    /// `vertices.len() * nvars` values, vertex-major
    pub values: Vec<f64>,
    pub nvars: usize,
}

impl Primitive {
    pub fn new(kind: CellKind, id: CellId, vertices: Vec<DVec3>, values: Vec<f64>, nvars: usize) -> Self {
        Self {
            kind,
            id,
            vertices,
            values,
            nvars,
        }
    }

    pub fn vertex_values(&self, vertex: usize) -> &[f64] {
        &self.values[vertex * self.nvars..(vertex + 1) * self.nvars]
    }

    /// Payload size for a primitive of `nverts` vertices with `nvars` variables.
    pub fn payload_len(nverts: usize, nvars: usize) -> usize {
        PAYLOAD_PREFIX_BYTES + nverts * 3 * 8 + nverts * nvars * 8
    }

    /// Append the payload bytes. The caller has checked `nvars`.
    pub fn write_payload(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(bytemuck::bytes_of(&self.kind.tag()));
        out.extend_from_slice(bytemuck::bytes_of(&(self.vertices.len() as u32)));
        out.extend_from_slice(bytemuck::bytes_of(&self.id.0));
        for v in &self.vertices {
            for c in v.to_array() {
                out.extend_from_slice(bytemuck::bytes_of(&c));
            }
        }
        out.extend_from_slice(bytemuck::cast_slice(&self.values));
    }

    /// Decode a payload written with [`Primitive::write_payload`].
    pub fn read_payload(bytes: &[u8], nvars: usize) -> PipelineResult<Self> {
        if bytes.len() < PAYLOAD_PREFIX_BYTES {
            return Err(PipelineError::MalformedMessage(format!(
                "primitive payload of {} bytes",
                bytes.len()
            )));
        }
        let tag: u32 = bytemuck::pod_read_unaligned(&bytes[0..4]);
        let nverts: u32 = bytemuck::pod_read_unaligned(&bytes[4..8]);
        let id: u64 = bytemuck::pod_read_unaligned(&bytes[8..16]);
        let kind = CellKind::from_tag(tag)
            .ok_or_else(|| PipelineError::MalformedMessage(format!("unknown cell tag {}", tag)))?;
        let nverts = nverts as usize;
        if nverts != kind.node_count() {
            return Err(PipelineError::MalformedMessage(format!(
                "{:?} with {} vertices",
                kind, nverts
            )));
        }
        let expected = Self::payload_len(nverts, nvars);
        if bytes.len() != expected {
            return Err(PipelineError::MalformedMessage(format!(
                "payload is {} bytes, expected {} for {} variables",
                bytes.len(),
                expected,
                nvars
            )));
        }

        let mut floats = bytes[PAYLOAD_PREFIX_BYTES..]
            .chunks_exact(8)
            .map(bytemuck::pod_read_unaligned::<f64>);
        let vertices = (0..nverts)
            .map(|_| {
                let x = floats.next().unwrap_or_default();
                let y = floats.next().unwrap_or_default();
                let z = floats.next().unwrap_or_default();
                DVec3::new(x, y, z)
            })
            .collect();
        let values = floats.collect();

        Ok(Self {
            kind,
            id: CellId(id),
            vertices,
            values,
            nvars,
        })
    }
}

pub(crate) fn read_record_header(bytes: &[u8]) -> PipelineResult<RecordHeader> {
    if bytes.len() < RECORD_HEADER_BYTES {
        return Err(PipelineError::MalformedMessage(
            "truncated record header".to_string(),
        ));
    }
    Ok(bytemuck::pod_read_unaligned(&bytes[..RECORD_HEADER_BYTES]))
}

pub(crate) fn read_batch_header(bytes: &[u8]) -> PipelineResult<BatchHeader> {
    if bytes.len() < BATCH_HEADER_BYTES {
        return Err(PipelineError::MalformedMessage(
            "truncated batch header".to_string(),
        ));
    }
    let header: BatchHeader = bytemuck::pod_read_unaligned(&bytes[..BATCH_HEADER_BYTES]);
    if header.count < 0 || header.total_bytes < 0 {
        return Err(PipelineError::MalformedMessage(format!(
            "negative batch header {:?}",
            header
        )));
    }
    if header.total_bytes as usize != bytes.len() - BATCH_HEADER_BYTES {
        return Err(PipelineError::MalformedMessage(format!(
            "batch announces {} bytes, carries {}",
            header.total_bytes,
            bytes.len() - BATCH_HEADER_BYTES
        )));
    }
    Ok(header)
}
