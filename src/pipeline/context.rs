//! Execution context threaded through `update` / `execute`.
//!
//! Carries the abort predicate and the progress sink. Abort is cooperative:
//! filters call [`ExecutionContext::update_progress`] or
//! [`ExecutionContext::check_abort`] between phases and unwind with
//! [`PipelineError::Aborted`] when the predicate fires.

use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::id::NodeId;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// External abort predicate
pub type AbortPredicate = Box<dyn Fn() -> bool + Send + Sync>;

/// Progress sink callback
pub type ProgressSink = Box<dyn FnMut(&ProgressEvent) + Send>;

/// One progress report from a running filter.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    pub node: NodeId,
    pub filter: String,
    pub stage: &'static str,
    pub current: usize,
    pub total: usize,
}

/// Cloneable flag usable as an abort predicate.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::Relaxed);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Per-invocation execution state.
#[derive(Default)]
pub struct ExecutionContext {
    abort: Option<AbortPredicate>,
    progress: Option<ProgressSink>,
    current_node: NodeId,
    current_filter: String,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_abort(mut self, predicate: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        self.abort = Some(Box::new(predicate));
        self
    }

    pub fn with_abort_handle(self, handle: AbortHandle) -> Self {
        self.with_abort(move || handle.is_requested())
    }

    pub fn with_progress(mut self, sink: impl FnMut(&ProgressEvent) + Send + 'static) -> Self {
        self.progress = Some(Box::new(sink));
        self
    }

    /// Node currently executing (set by the executor)
    pub fn current_node(&self) -> NodeId {
        self.current_node
    }

    pub(crate) fn enter(&mut self, node: NodeId, filter: &str) {
        self.current_node = node;
        self.current_filter.clear();
        self.current_filter.push_str(filter);
    }

    pub fn abort_requested(&self) -> bool {
        self.abort.as_ref().map_or(false, |p| p())
    }

    pub fn check_abort(&self) -> PipelineResult<()> {
        if self.abort_requested() {
            tracing::info!(
                "Abort requested during {} ({})",
                self.current_filter,
                self.current_node
            );
            return Err(PipelineError::Aborted {
                node: self.current_node,
            });
        }
        Ok(())
    }

    /// Report progress without polling abort. Collective phases use this and
    /// agree on abort across ranks instead.
    pub fn report_progress(&mut self, stage: &'static str, current: usize, total: usize) {
        if let Some(sink) = self.progress.as_mut() {
            sink(&ProgressEvent {
                node: self.current_node,
                filter: self.current_filter.clone(),
                stage,
                current,
                total,
            });
        }
    }

    /// Report progress, then poll the abort predicate.
    pub fn update_progress(
        &mut self,
        stage: &'static str,
        current: usize,
        total: usize,
    ) -> PipelineResult<()> {
        self.report_progress(stage, current, total);
        self.check_abort()
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("has_abort", &self.abort.is_some())
            .field("has_progress", &self.progress.is_some())
            .field("current_node", &self.current_node)
            .finish()
    }
}
