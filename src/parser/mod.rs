use crate::counter::DependencySet;
use crate::models::Ecosystem;

pub mod maven;
pub mod npm;
pub mod pypi;

/// Extracts direct dependency identifiers from raw manifest text.
///
/// Parsing is best-effort: malformed input yields whatever was recognised
/// before the damage, possibly nothing, and never an error.
pub trait ManifestParser {
    fn extract(&self, content: &str) -> DependencySet;
}

/// The parser for each supported ecosystem.
#[derive(Debug, Clone, Copy)]
pub enum Parser {
    Maven(maven::MavenParser),
    Npm(npm::NpmParser),
    Pypi(pypi::PypiParser),
}

impl Parser {
    pub fn for_ecosystem(ecosystem: Ecosystem) -> Self {
        match ecosystem {
            Ecosystem::Maven => Parser::Maven(maven::MavenParser::new()),
            Ecosystem::Npm => Parser::Npm(npm::NpmParser::new()),
            Ecosystem::Pypi => Parser::Pypi(pypi::PypiParser::new()),
        }
    }
}

impl ManifestParser for Parser {
    fn extract(&self, content: &str) -> DependencySet {
        match self {
            Parser::Maven(p) => p.extract(content),
            Parser::Npm(p) => p.extract(content),
            Parser::Pypi(p) => p.extract(content),
        }
    }
}
