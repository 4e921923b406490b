use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::counter::FrequencyTable;

/// A package ecosystem whose manifests are harvested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ecosystem {
    Maven,
    Npm,
    Pypi,
}

impl Ecosystem {
    /// Every supported ecosystem, in the order they are reported.
    pub const ALL: [Ecosystem; 3] = [Ecosystem::Maven, Ecosystem::Npm, Ecosystem::Pypi];

    /// Lowercase name used in object keys, staging directories and the
    /// persisted aggregate.
    pub fn as_str(self) -> &'static str {
        match self {
            Ecosystem::Maven => "maven",
            Ecosystem::Npm => "npm",
            Ecosystem::Pypi => "pypi",
        }
    }

    /// Filename suffix identifying this ecosystem's manifests.
    pub fn manifest_name(self) -> &'static str {
        match self {
            Ecosystem::Maven => "pom.xml",
            Ecosystem::Npm => "package.json",
            Ecosystem::Pypi => "requirements.txt",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|e| e.as_str() == name)
    }
}

impl std::fmt::Display for Ecosystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One result row of the manifest query. Either column may be null.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WarehouseRow {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

impl WarehouseRow {
    #[cfg(test)]
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            content: Some(content.into()),
        }
    }
}

/// A manifest file with both path and content present.
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestRecord {
    pub path: String,
    pub content: String,
}

impl ManifestRecord {
    /// Last path segment, used to name the staged copy of the manifest.
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

/// Per-ecosystem frequency tables, the document published at the end of a run.
pub type Aggregate = BTreeMap<Ecosystem, FrequencyTable>;
