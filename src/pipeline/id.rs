//! Identity types for the pipeline system.
//!
//! IDs are newtypes over `u32` that serve as direct array indices into
//! their storage vectors. A `NodeId` held by a data object is the
//! non-owning back-reference to the filter that produced it.

use std::fmt;

/// Index into `Pipeline::slots`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl NodeId {
    pub const INVALID: NodeId = NodeId(u32::MAX);

    #[inline]
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "NodeId(INVALID)")
        } else {
            write!(f, "NodeId({})", self.0)
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Global identity of a cell: owning domain in the high 32 bits, cell index
/// within the domain in the low 32 bits. Stable across ranks, so anything
/// seeded from it (jitter) is independent of which rank holds the cell.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct CellId(pub u64);

impl CellId {
    pub fn new(domain: u32, cell: u32) -> Self {
        Self(((domain as u64) << 32) | cell as u64)
    }

    #[inline]
    pub fn domain(self) -> u32 {
        (self.0 >> 32) as u32
    }

    #[inline]
    pub fn cell(self) -> u32 {
        (self.0 & 0xFFFF_FFFF) as u32
    }
}

impl fmt::Debug for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CellId(domain={}, cell={})", self.domain(), self.cell())
    }
}
