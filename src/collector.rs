use std::collections::BTreeMap;

use tracing::debug;

use crate::counter::FrequencyTable;
use crate::models::{Aggregate, Ecosystem};
use crate::parser::{ManifestParser, Parser};

/// Pairs an ecosystem's parser with its frequency table.
#[derive(Debug, Clone)]
pub struct EcosystemCollector {
    ecosystem: Ecosystem,
    parser: Parser,
    counter: FrequencyTable,
}

impl EcosystemCollector {
    pub fn new(ecosystem: Ecosystem) -> Self {
        Self {
            ecosystem,
            parser: Parser::for_ecosystem(ecosystem),
            counter: FrequencyTable::new(),
        }
    }

    /// Extract the manifest's dependency set and count it.
    ///
    /// `validate` is kept so every ecosystem shares one call shape; it does
    /// not change extraction.
    pub fn parse_and_collect(&mut self, content: Option<&str>, _validate: bool) {
        let Some(content) = content.filter(|c| !c.is_empty()) else {
            return;
        };
        let set = self.parser.extract(content);
        if set.is_empty() {
            debug!(ecosystem = %self.ecosystem, "manifest declares no dependencies");
            return;
        }
        self.counter.record(&set);
    }

    pub fn counter(&self) -> &FrequencyTable {
        &self.counter
    }
}

/// One collector per supported ecosystem.
#[derive(Debug, Clone)]
pub struct Collectors(BTreeMap<Ecosystem, EcosystemCollector>);

impl Collectors {
    pub fn new() -> Self {
        Self(
            Ecosystem::ALL
                .into_iter()
                .map(|e| (e, EcosystemCollector::new(e)))
                .collect(),
        )
    }

    #[cfg(test)]
    pub fn get(&self, ecosystem: Ecosystem) -> &EcosystemCollector {
        &self.0[&ecosystem]
    }

    pub fn get_mut(&mut self, ecosystem: Ecosystem) -> &mut EcosystemCollector {
        self.0
            .entry(ecosystem)
            .or_insert_with(|| EcosystemCollector::new(ecosystem))
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Snapshot of every ecosystem's table.
    pub fn aggregate(&self) -> Aggregate {
        self.0
            .iter()
            .map(|(eco, collector)| (*eco, collector.counter().clone()))
            .collect()
    }
}

impl Default for Collectors {
    fn default() -> Self {
        Self::new()
    }
}
