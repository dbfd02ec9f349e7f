//! Pipeline-specific error types.
//!
//! Covers the whole demand-driven path: contract negotiation, filter
//! execution, the database seam, and the distributed render phases.

use crate::pipeline::id::NodeId;
use thiserror::Error;

/// Errors that can occur within the pipeline system.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("Node {node_id:?} error: {message}")]
    Node { node_id: NodeId, message: String },

    #[error("Variable count mismatch: cell list holds {expected} variables, primitive has {found}")]
    VariableCountMismatch { expected: usize, found: usize },

    #[error("Contract widened by {filter}: {detail}")]
    ContractWidened { filter: String, detail: String },

    #[error("Degenerate geometry: {0}")]
    DegenerateGeometry(String),

    #[error("Invalid connectivity: {0}")]
    InvalidConnectivity(String),

    #[error("Unknown variable: {0}")]
    UnknownVariable(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Execution aborted at {node:?}")]
    Aborted { node: NodeId },

    #[error("Re-entrant update of {0:?} (cycle in pipeline graph?)")]
    ReentrantUpdate(NodeId),

    #[error("{0:?} was interrupted mid-execution; release its data before reuse")]
    StaleFilter(NodeId),

    #[error("{node:?} has no input named '{name}'")]
    MissingInput { node: NodeId, name: String },

    #[error("Invalid edge: {0}")]
    InvalidEdge(String),

    #[error("Cycle detected in pipeline graph")]
    CycleDetected,

    #[error("Database error: {0}")]
    Database(String),

    #[error("No such domain: {0}")]
    NoSuchDomain(u32),

    #[error("Communication error: {0}")]
    Communication(String),

    #[error("Malformed message: {0}")]
    MalformedMessage(String),
}

impl PipelineError {
    /// Logic errors are programming mistakes: fatal to the current request,
    /// never retried.
    pub fn is_logic_error(&self) -> bool {
        matches!(
            self,
            PipelineError::VariableCountMismatch { .. }
                | PipelineError::ContractWidened { .. }
                | PipelineError::DegenerateGeometry(_)
                | PipelineError::InvalidConnectivity(_)
                | PipelineError::ReentrantUpdate(_)
                | PipelineError::StaleFilter(_)
                | PipelineError::CycleDetected
        )
    }

    pub fn is_abort(&self) -> bool {
        matches!(self, PipelineError::Aborted { .. })
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let mismatch = PipelineError::VariableCountMismatch {
            expected: 2,
            found: 3,
        };
        assert!(mismatch.is_logic_error());
        assert!(!mismatch.is_abort());
        assert!(mismatch.to_string().contains("2 variables"));

        let abort = PipelineError::Aborted { node: NodeId(1) };
        assert!(abort.is_abort());
        assert!(!abort.is_logic_error());

        assert!(!PipelineError::Database("gone".into()).is_logic_error());
    }
}
