//! Sample points: the payload between extraction and compositing.

use crate::render::cell_list::CellList;
use crate::render::view::View;
use crate::types::Extents;

#[derive(Debug, Clone)]
pub struct SamplePoints {
    pub cell_list: CellList,
    pub view: View,
    /// Variable order inside every primitive; index 0 is the primary
    pub variables: Vec<String>,
    /// Local extents of the primary variable
    pub extents: Extents,
    /// Local extents of each secondary variable, in variable order
    pub secondary_extents: Vec<Extents>,
}

impl SamplePoints {
    pub fn new(cell_list: CellList, view: View, variables: Vec<String>, extents: Extents) -> Self {
        Self {
            cell_list,
            view,
            variables,
            extents,
            secondary_extents: Vec::new(),
        }
    }

    pub fn with_secondary_extents(mut self, extents: Vec<Extents>) -> Self {
        self.secondary_extents = extents;
        self
    }

    pub fn nvars(&self) -> usize {
        self.variables.len()
    }

    pub fn primary_variable(&self) -> Option<&str> {
        self.variables.first().map(String::as_str)
    }
}
