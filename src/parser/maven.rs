use quick_xml::events::Event;
use quick_xml::Reader;

use crate::counter::DependencySet;

/// Parser for Maven `pom.xml` manifests.
///
/// Identifiers are `groupId:artifactId`. Only direct dependencies count, i.e.
/// `<dependencies>` directly under `<project>` or a `<profile>`; managed and
/// plugin dependencies are skipped, as is anything with `<scope>test</scope>`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MavenParser;

impl MavenParser {
    /// Create a new `MavenParser`.
    pub fn new() -> Self {
        Self
    }
}

impl super::ManifestParser for MavenParser {
    fn extract(&self, content: &str) -> DependencySet {
        let mut set = DependencySet::new();
        for id in parse_pom_xml(content) {
            set.insert(&id);
        }
        set
    }
}

#[derive(Default)]
struct PendingDependency {
    group_id: String,
    artifact_id: String,
    scope: String,
}

impl PendingDependency {
    fn identifier(&self) -> Option<String> {
        let artifact_id = self.artifact_id.trim();
        if artifact_id.is_empty() || self.scope.trim().eq_ignore_ascii_case("test") {
            return None;
        }
        let group_id = self.group_id.trim();
        if group_id.is_empty() {
            Some(artifact_id.to_string())
        } else {
            Some(format!("{}:{}", group_id, artifact_id))
        }
    }
}

/// Scan `pom.xml` with the quick-xml event API.
///
/// The scan stops at the first XML error; dependencies closed before that
/// point are kept.
fn parse_pom_xml(content: &str) -> Vec<String> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut ids = Vec::new();
    let mut buf = Vec::new();

    // Open element names, outermost first.
    let mut stack: Vec<String> = Vec::new();
    // Stack depth of the open direct <dependency>, if any.
    let mut dependency_depth: Option<usize> = None;
    let mut pending = PendingDependency::default();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let name = String::from_utf8_lossy(e.name().local_name().as_ref()).into_owned();
                if name == "dependency" && dependency_depth.is_none() && is_direct_section(&stack)
                {
                    pending = PendingDependency::default();
                    dependency_depth = Some(stack.len() + 1);
                }
                stack.push(name);
            }
            Ok(Event::End(_)) => {
                if dependency_depth == Some(stack.len()) {
                    if let Some(id) = pending.identifier() {
                        ids.push(id);
                    }
                    dependency_depth = None;
                }
                stack.pop();
            }
            Ok(Event::Text(ref e)) => {
                if let Some(depth) = dependency_depth {
                    // Only direct children of <dependency> carry coordinates.
                    if stack.len() == depth + 1 {
                        let text = e.unescape().unwrap_or_default();
                        append_field(&mut pending, stack.last(), &text);
                    }
                }
            }
            Ok(Event::CData(ref e)) => {
                if let Some(depth) = dependency_depth {
                    if stack.len() == depth + 1 {
                        let text = String::from_utf8_lossy(e.as_ref()).into_owned();
                        append_field(&mut pending, stack.last(), &text);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    ids
}

/// True when the innermost open element is a `<dependencies>` section whose
/// parent is `<project>` or `<profile>`.
fn is_direct_section(stack: &[String]) -> bool {
    match stack {
        [.., parent, section] => {
            section == "dependencies" && (parent == "project" || parent == "profile")
        }
        _ => false,
    }
}

fn append_field(pending: &mut PendingDependency, tag: Option<&String>, text: &str) {
    match tag.map(String::as_str) {
        Some("groupId") => pending.group_id.push_str(text),
        Some("artifactId") => pending.artifact_id.push_str(text),
        Some("scope") => pending.scope.push_str(text),
        _ => {}
    }
}
