//! Pipeline executor: the filter graph and the demand-driven update.
//!
//! `update(node, contract)` pulls:
//! 1. Reject re-entry (cycle) and filters left mid-execution by an abort.
//! 2. Let the filter narrow the contract (`modify_contract`, then
//!    `perform_restriction`); reject anything that widens it.
//! 3. Update every input with the narrowed contract. When an input fails
//!    under a collective filter, the filter still casts its abort vote
//!    (`abandon_collective`) so peer ranks do not wait for it.
//! 4. Execute if the filter is modified, an input re-executed, or the
//!    contract differs from the one the cached output was built for.
//!
//! Each slot tracks `modified` / `in_execute`; see [`FilterState`].

use crate::pipeline::context::ExecutionContext;
use crate::pipeline::contract::Contract;
use crate::pipeline::data_object::{DataObject, DataObjectRef, OriginatingSource};
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::filter::{ConfigValue, Filter, FilterInputs, FilterState};
use crate::pipeline::id::NodeId;
use std::sync::Arc;

/// A slot holding a filter, its input wiring, and its cached output.
pub struct FilterSlot {
    pub filter: Box<dyn Filter>,
    /// (input name, upstream node)
    inputs: Vec<(String, NodeId)>,
    output: Option<DataObjectRef>,
    /// Contract the cached output answers
    last_contract: Option<Contract>,
    modified: bool,
    in_execute: bool,
    /// Set while an `update` of this slot is on the stack
    updating: bool,
}

impl FilterSlot {
    fn new(filter: Box<dyn Filter>) -> Self {
        Self {
            filter,
            inputs: Vec::new(),
            output: None,
            last_contract: None,
            modified: true,
            in_execute: false,
            updating: false,
        }
    }

    pub fn state(&self) -> FilterState {
        if self.in_execute {
            FilterState::Executing
        } else if self.modified {
            FilterState::Modified
        } else {
            FilterState::Unmodified
        }
    }
}

/// The filter graph.
#[derive(Default)]
pub struct Pipeline {
    slots: Vec<FilterSlot>,
    /// Number of `execute` calls made, for diagnostics
    executions: u64,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Graph building ──

    /// Add a filter to the pipeline. Returns its NodeId.
    pub fn add_filter(&mut self, filter: Box<dyn Filter>) -> NodeId {
        let id = NodeId(self.slots.len() as u32);
        tracing::debug!("Adding filter '{}' as {}", filter.name(), id);
        self.slots.push(FilterSlot::new(filter));
        id
    }

    pub fn add<F: Filter + 'static>(&mut self, filter: F) -> NodeId {
        self.add_filter(Box::new(filter))
    }

    /// Wire `upstream`'s output into the input `name` of `node`.
    pub fn set_input(&mut self, node: NodeId, name: &str, upstream: NodeId) -> PipelineResult<()> {
        self.slot(node)?;
        self.slot(upstream)?;
        if node == upstream {
            return Err(PipelineError::InvalidEdge(format!(
                "{} cannot consume its own output",
                node
            )));
        }
        if !self.slots[node.index()].filter.input_names().contains(&name) {
            return Err(PipelineError::InvalidEdge(format!(
                "'{}' has no input named '{}'",
                self.slots[node.index()].filter.name(),
                name
            )));
        }

        let slot = &mut self.slots[node.index()];
        let previous = slot.inputs.iter().position(|(n, _)| n == name);
        let replaced = match previous {
            Some(i) => Some(std::mem::replace(&mut slot.inputs[i].1, upstream)),
            None => {
                slot.inputs.push((name.to_string(), upstream));
                None
            }
        };

        if self.topological_order().is_none() {
            let slot = &mut self.slots[node.index()];
            match (previous, replaced) {
                (Some(i), Some(old)) => slot.inputs[i].1 = old,
                _ => {
                    slot.inputs.pop();
                }
            }
            return Err(PipelineError::CycleDetected);
        }

        self.slots[node.index()].modified = true;
        Ok(())
    }

    /// Connect `upstream` to the first declared input of `downstream`.
    pub fn connect(&mut self, upstream: NodeId, downstream: NodeId) -> PipelineResult<()> {
        let name = self
            .slot(downstream)?
            .filter
            .input_names()
            .first()
            .copied()
            .ok_or_else(|| {
                PipelineError::InvalidEdge(format!("{} is a source and takes no input", downstream))
            })?;
        self.set_input(downstream, name, upstream)
    }

    /// Chain filters linearly: each one feeds the next.
    pub fn chain(&mut self, nodes: &[NodeId]) -> PipelineResult<()> {
        for pair in nodes.windows(2) {
            self.connect(pair[0], pair[1])?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn executions(&self) -> u64 {
        self.executions
    }

    pub fn filter_name(&self, node: NodeId) -> Option<&str> {
        self.slots.get(node.index()).map(|s| s.filter.name())
    }

    pub fn inputs(&self, node: NodeId) -> PipelineResult<Vec<(String, NodeId)>> {
        Ok(self.slot(node)?.inputs.clone())
    }

    pub fn state(&self, node: NodeId) -> PipelineResult<FilterState> {
        Ok(self.slot(node)?.state())
    }

    /// Cached output of `node`, if it has executed.
    pub fn output(&self, node: NodeId) -> Option<DataObjectRef> {
        self.slots.get(node.index()).and_then(|s| s.output.clone())
    }

    /// Force `node` to execute on its next update.
    pub fn mark_modified(&mut self, node: NodeId) -> PipelineResult<()> {
        self.slot_mut(node)?.modified = true;
        Ok(())
    }

    /// Forward a parameter change to a filter.
    pub fn configure(&mut self, node: NodeId, key: &str, value: &ConfigValue) -> PipelineResult<bool> {
        let slot = self.slot_mut(node)?;
        let changed = slot.filter.on_config_change(key, value);
        if changed {
            slot.modified = true;
        } else {
            tracing::debug!("{} ignored config '{}'", slot.filter.name(), key);
        }
        Ok(changed)
    }

    fn slot(&self, node: NodeId) -> PipelineResult<&FilterSlot> {
        self.slots
            .get(node.index())
            .ok_or_else(|| PipelineError::InvalidEdge(format!("unknown node {}", node)))
    }

    fn slot_mut(&mut self, node: NodeId) -> PipelineResult<&mut FilterSlot> {
        self.slots
            .get_mut(node.index())
            .ok_or_else(|| PipelineError::InvalidEdge(format!("unknown node {}", node)))
    }

    // ── Topological sort (Kahn's algorithm) ──

    /// Upstream-first order of all filters, or `None` if the graph has a cycle.
    pub fn topological_order(&self) -> Option<Vec<NodeId>> {
        let n = self.slots.len();
        let mut in_degree = vec![0u32; n];
        let mut adj: Vec<Vec<usize>> = vec![Vec::new(); n];

        for (to, slot) in self.slots.iter().enumerate() {
            for (_, from) in &slot.inputs {
                adj[from.index()].push(to);
                in_degree[to] += 1;
            }
        }

        let mut queue: Vec<usize> = (0..n).rev().filter(|&i| in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(n);

        while let Some(node) = queue.pop() {
            order.push(NodeId(node as u32));
            for &next in &adj[node] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    queue.push(next);
                }
            }
        }

        if order.len() != n {
            tracing::warn!(
                "Pipeline graph has a cycle! Only {} of {} filters ordered.",
                order.len(),
                n
            );
            return None;
        }
        Some(order)
    }

    // ── Update ──

    /// Pull `contract` through `node`. Returns whether `node` executed.
    pub fn update(
        &mut self,
        node: NodeId,
        contract: &Contract,
        ctx: &mut ExecutionContext,
    ) -> PipelineResult<bool> {
        {
            let slot = self.slot_mut(node)?;
            if slot.updating {
                return Err(PipelineError::ReentrantUpdate(node));
            }
            if slot.in_execute {
                return Err(PipelineError::StaleFilter(node));
            }
            slot.updating = true;
        }

        let result = self.update_inner(node, contract, ctx);
        self.slots[node.index()].updating = false;
        result
    }

    fn update_inner(
        &mut self,
        node: NodeId,
        contract: &Contract,
        ctx: &mut ExecutionContext,
    ) -> PipelineResult<bool> {
        let idx = node.index();
        let name = self.slots[idx].filter.name().to_string();
        ctx.enter(node, &name);

        let narrowed = self.slots[idx].filter.modify_contract(contract.clone())?;
        Self::check_narrowing(&name, &narrowed, contract)?;
        let restricted = self.slots[idx].filter.perform_restriction(narrowed)?;
        Self::check_narrowing(&name, &restricted, contract)?;

        let wiring = self.slots[idx].inputs.clone();
        for declared in self.slots[idx].filter.input_names() {
            if !wiring.iter().any(|(n, _)| n == declared) {
                return Err(PipelineError::MissingInput {
                    node,
                    name: declared.to_string(),
                });
            }
        }

        let mut upstream_ran = false;
        for (_, upstream) in &wiring {
            match self.update(*upstream, &restricted, ctx) {
                Ok(ran) => upstream_ran |= ran,
                Err(err) if self.slots[idx].filter.is_collective() => {
                    tracing::warn!(
                        "{} '{}' inputs failed ({}); voting peers out of the collective",
                        node,
                        name,
                        err
                    );
                    ctx.enter(node, &name);
                    if let Err(vote) = self.slots[idx].filter.abandon_collective(ctx) {
                        tracing::error!("{} '{}' could not reach peers: {}", node, name, vote);
                    }
                    return Err(err);
                }
                Err(err) => return Err(err),
            }
        }

        let slot = &self.slots[idx];
        let cached = !slot.modified
            && !upstream_ran
            && slot.output.is_some()
            && slot.last_contract.as_ref() == Some(contract);
        if cached {
            tracing::trace!("{} '{}' up to date", node, name);
            return Ok(false);
        }

        let mut entries = Vec::with_capacity(wiring.len());
        for (input_name, upstream) in &wiring {
            let object = self.slots[upstream.index()].output.clone().ok_or_else(|| {
                PipelineError::InvalidInput(format!(
                    "{} produced no output for '{}'",
                    upstream, input_name
                ))
            })?;
            entries.push((input_name.clone(), object));
        }
        let inputs = FilterInputs::new(entries);

        ctx.enter(node, &name);
        let slot = &mut self.slots[idx];
        slot.in_execute = true;
        tracing::debug!("Executing {} '{}'", node, name);

        let outcome = if slot.filter.is_collective() {
            ctx.report_progress("execute", 0, 1);
            slot.filter.execute(&inputs, &restricted, ctx)
        } else {
            ctx.update_progress("execute", 0, 1)
                .and_then(|_| slot.filter.execute(&inputs, &restricted, ctx))
        };
        self.executions += 1;

        match outcome {
            Ok(out) => {
                slot.output = Some(Arc::new(DataObject::new(
                    out.payload,
                    out.attributes,
                    OriginatingSource {
                        node,
                        contract: restricted,
                    },
                )));
                slot.last_contract = Some(contract.clone());
                slot.modified = false;
                slot.in_execute = false;
                Ok(true)
            }
            Err(err) => {
                if let Some(previous) = &slot.output {
                    previous.mark_stale();
                }
                if err.is_abort() {
                    tracing::warn!("{} '{}' aborted; release before reuse", node, name);
                } else {
                    tracing::error!("{} '{}' failed: {}", node, name, err);
                    slot.in_execute = false;
                    slot.modified = true;
                }
                Err(err)
            }
        }
    }

    fn check_narrowing(filter: &str, proposed: &Contract, original: &Contract) -> PipelineResult<()> {
        proposed
            .check_narrowing_of(original)
            .map_err(|detail| PipelineError::ContractWidened {
                filter: filter.to_string(),
                detail,
            })
    }

    // ── Releasing ──

    /// Drop `node`'s cached output and buffers. Clears an interrupted
    /// execution so the filter can be updated again.
    pub fn release_data(&mut self, node: NodeId) -> PipelineResult<()> {
        let slot = self.slot_mut(node)?;
        slot.filter.release_data();
        slot.output = None;
        slot.last_contract = None;
        slot.in_execute = false;
        slot.modified = true;
        Ok(())
    }

    pub fn release_all(&mut self) {
        for slot in &mut self.slots {
            slot.filter.release_data();
            slot.output = None;
            slot.last_contract = None;
            slot.in_execute = false;
            slot.modified = true;
        }
    }
}
