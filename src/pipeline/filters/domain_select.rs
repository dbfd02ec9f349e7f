//! DomainSelectFilter: restricts which domains are read.

use super::dataset_output;
use crate::pipeline::context::ExecutionContext;
use crate::pipeline::contract::Contract;
use crate::pipeline::error::PipelineResult;
use crate::pipeline::filter::{ConfigValue, Filter, FilterInputs, FilterOutput};
use crate::types::Dataset;
use std::collections::BTreeSet;

#[derive(Debug, Default)]
pub struct DomainSelectFilter {
    /// `None` selects every domain
    domains: Option<BTreeSet<u32>>,
}

impl DomainSelectFilter {
    pub fn new(domains: impl IntoIterator<Item = u32>) -> Self {
        Self {
            domains: Some(domains.into_iter().collect()),
        }
    }

    pub fn all() -> Self {
        Self::default()
    }
}

impl Filter for DomainSelectFilter {
    fn name(&self) -> &str {
        "DomainSelect"
    }

    fn perform_restriction(&mut self, contract: Contract) -> PipelineResult<Contract> {
        match &self.domains {
            Some(domains) => {
                let domains = domains.clone();
                Ok(contract.map_request(|r| r.map_subset(|s| s.restrict_domains(domains))))
            }
            None => Ok(contract),
        }
    }

    fn execute(
        &mut self,
        inputs: &FilterInputs,
        contract: &Contract,
        _ctx: &mut ExecutionContext,
    ) -> PipelineResult<FilterOutput> {
        let subset = contract.request().subset();
        let domains = inputs
            .dataset()?
            .domains
            .iter()
            .filter(|d| subset.includes_domain(d.domain))
            .cloned()
            .collect();
        Ok(dataset_output(Dataset::new(domains), contract))
    }

    fn on_config_change(&mut self, key: &str, value: &ConfigValue) -> bool {
        match (key, value.as_str()) {
            // Format: "0,3,4"; empty string selects all
            ("domains", Some(s)) => {
                let parsed: BTreeSet<u32> = s
                    .split(',')
                    .filter_map(|p| p.trim().parse().ok())
                    .collect();
                self.domains = if parsed.is_empty() { None } else { Some(parsed) };
                true
            }
            _ => false,
        }
    }
}
