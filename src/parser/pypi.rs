use std::sync::OnceLock;

use regex::Regex;

use crate::counter::DependencySet;

/// Distribution name at the start of a requirement line, followed by the end
/// of the line or the start of extras, a version specifier, a marker or a
/// direct reference. Anything else (URLs, paths) is not a named requirement.
const REQUIREMENT_PATTERN: &str = r"^([A-Za-z0-9](?:[A-Za-z0-9._-]*[A-Za-z0-9])?)\s*(?:$|[\[(=<>!~;,@#\s])";

fn requirement_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(REQUIREMENT_PATTERN).expect("requirement pattern is valid"))
}

/// Parser for `requirements.txt`.
///
/// One identifier per requirement line; version pins, extras and markers are
/// dropped. Comments, blank lines and pip options (`-r`, `-e`, `--index-url`)
/// are skipped.
#[derive(Debug, Clone, Copy, Default)]
pub struct PypiParser;

impl PypiParser {
    /// Create a new `PypiParser`.
    pub fn new() -> Self {
        Self
    }
}

impl super::ManifestParser for PypiParser {
    fn extract(&self, content: &str) -> DependencySet {
        parse_requirements_txt(content).into_iter().collect()
    }
}

/// Parse `requirements.txt` into distribution names, in file order.
fn parse_requirements_txt(content: &str) -> Vec<String> {
    let re = requirement_re();
    let mut names = Vec::new();

    for line in content.trim_start_matches('\u{feff}').lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('-') {
            continue;
        }
        if let Some(caps) = re.captures(line) {
            names.push(caps[1].to_string());
        }
    }

    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ManifestParser;

    #[test]
    fn test_parse_requirements_txt() {
        let content = "\
# comment
requests==2.28.1
flask>=2.0.0
numpy==1.24.0 ; python_version >= '3.8'
uvicorn[standard]~=0.22
Django
six # inline comment
";
        assert_eq!(
            parse_requirements_txt(content),
            vec!["requests", "flask", "numpy", "uvicorn", "Django", "six"]
        );
    }

    #[test]
    fn test_boto_and_flask() {
        let set = PypiParser::new().extract("boto\nflask");
        assert_eq!(set.key().as_deref(), Some("boto, flask"));
    }

    #[test]
    fn test_options_urls_and_paths_skipped() {
        let content = "\
-r base.txt
--index-url https://pypi.example.org/simple
-e git+https://github.com/org/repo.git#egg=repo
git+https://github.com/org/other.git
https://files.example.org/pkg-1.0.whl
./vendor/local-pkg
pkg @ https://example.org/pkg.zip
";
        assert_eq!(parse_requirements_txt(content), vec!["pkg"]);
    }

    #[test]
    fn test_case_and_pins_collapse_to_one_identifier() {
        let set = PypiParser::new().extract("Flask==1.0\nflask>=2\n\n   \nFLASK\n");
        assert_eq!(set.len(), 1);
        assert_eq!(set.key().as_deref(), Some("flask"));
    }

    #[test]
    fn test_comment_only_file_is_empty() {
        assert!(PypiParser::new().extract("# nothing here\n\n").is_empty());
        assert!(PypiParser::new().extract("").is_empty());
    }
}
