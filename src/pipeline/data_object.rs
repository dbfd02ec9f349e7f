//! Data objects: the output of a pipeline stage.
//!
//! A [`DataObject`] is shared through [`DataObjectRef`] (`Arc`): the producing
//! slot holds one handle, each consumer that kept its input holds another.
//! The back-reference to the producer is an [`OriginatingSource`], a plain
//! node index plus the contract the producer executed under. It answers
//! "who produced me and under what request" and never keeps anything alive.

use crate::pipeline::contract::Contract;
use crate::pipeline::id::NodeId;
use crate::render::image::Image;
use crate::render::sample_points::SamplePoints;
use crate::types::{Bounds, Dataset, Extents};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub type DataObjectRef = Arc<DataObject>;

/// What a stage produced.
#[derive(Debug, Clone)]
pub enum DataPayload {
    /// Legitimately nothing (e.g. a non-root rank after a gather)
    Empty,
    Dataset(Dataset),
    SamplePoints(SamplePoints),
    Image(Image),
}

impl DataPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            DataPayload::Empty => "empty",
            DataPayload::Dataset(_) => "dataset",
            DataPayload::SamplePoints(_) => "sample points",
            DataPayload::Image(_) => "image",
        }
    }
}

/// Metadata travelling with a payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataAttributes {
    /// Variables present in the payload
    pub variables: Vec<String>,
    /// Extents computed because the contract asked for them
    pub extents: BTreeMap<String, Extents>,
    pub spatial_extents: Option<Bounds>,
}

impl DataAttributes {
    pub fn with_variables<S: Into<String>>(variables: impl IntoIterator<Item = S>) -> Self {
        Self {
            variables: variables.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn extents(&self, variable: &str) -> Option<&Extents> {
        self.extents.get(variable)
    }
}

/// Non-owning reference to the producing filter and its contract.
#[derive(Debug, Clone, PartialEq)]
pub struct OriginatingSource {
    pub node: NodeId,
    pub contract: Contract,
}

/// A stage's materialized output.
#[derive(Debug)]
pub struct DataObject {
    payload: DataPayload,
    attributes: DataAttributes,
    source: OriginatingSource,
    stale: AtomicBool,
}

impl DataObject {
    pub fn new(payload: DataPayload, attributes: DataAttributes, source: OriginatingSource) -> Self {
        Self {
            payload,
            attributes,
            source,
            stale: AtomicBool::new(false),
        }
    }

    pub fn payload(&self) -> &DataPayload {
        &self.payload
    }

    pub fn attributes(&self) -> &DataAttributes {
        &self.attributes
    }

    pub fn originating_source(&self) -> &OriginatingSource {
        &self.source
    }

    /// The contract that produced this object
    pub fn general_contract(&self) -> &Contract {
        &self.source.contract
    }

    pub fn dataset(&self) -> Option<&Dataset> {
        match &self.payload {
            DataPayload::Dataset(d) => Some(d),
            _ => None,
        }
    }

    pub fn sample_points(&self) -> Option<&SamplePoints> {
        match &self.payload {
            DataPayload::SamplePoints(s) => Some(s),
            _ => None,
        }
    }

    pub fn image(&self) -> Option<&Image> {
        match &self.payload {
            DataPayload::Image(i) => Some(i),
            _ => None,
        }
    }

    /// A stale object no longer reflects what its producer was last asked
    /// for (its producer was interrupted). Consumers must not present it as
    /// current.
    pub fn is_stale(&self) -> bool {
        self.stale.load(Ordering::Acquire)
    }

    pub(crate) fn mark_stale(&self) {
        self.stale.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::contract::DataRequest;

    #[test]
    fn test_originating_source_and_staleness() {
        let contract = Contract::new(DataRequest::new("mesh", "density", 2), 0);
        let obj = DataObject::new(
            DataPayload::Dataset(Dataset::default()),
            DataAttributes::with_variables(["density"]),
            OriginatingSource {
                node: NodeId(4),
                contract: contract.clone(),
            },
        );
        assert_eq!(obj.originating_source().node, NodeId(4));
        assert_eq!(obj.general_contract().request().timestep(), 2);
        assert!(obj.dataset().is_some());
        assert!(obj.image().is_none());
        assert_eq!(obj.payload().kind(), "dataset");

        assert!(!obj.is_stale());
        obj.mark_stale();
        assert!(obj.is_stale());
    }
}
