use serde_json::Value;

use crate::counter::DependencySet;

/// Parser for npm `package.json` manifests.
///
/// Only the keys of the top-level `dependencies` object are read. Documents
/// that are not valid JSON go through [`scan_dependencies`], so damage outside
/// the `dependencies` block does not lose its entries.
#[derive(Debug, Clone, Copy, Default)]
pub struct NpmParser;

impl NpmParser {
    pub fn new() -> Self {
        Self
    }
}

impl super::ManifestParser for NpmParser {
    fn extract(&self, content: &str) -> DependencySet {
        match serde_json::from_str::<Value>(content) {
            Ok(json) => json
                .get("dependencies")
                .and_then(|v| v.as_object())
                .map(|deps| deps.keys().collect())
                .unwrap_or_default(),
            Err(_) => scan_dependencies(content).into_iter().collect(),
        }
    }
}

/// Recover `dependencies` keys from a document that failed strict parsing.
///
/// Finds the first `"dependencies"` key followed by an object and reads its
/// members one pair at a time. Stray and trailing commas are tolerated; any
/// other structural error ends the scan with the names read so far.
fn scan_dependencies(content: &str) -> Vec<String> {
    let mut scanner = Scanner::new(content);
    if !scanner.seek_object("dependencies") {
        return Vec::new();
    }
    scanner.read_member_names()
}

struct Scanner<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Scanner<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            bytes: src.as_bytes(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(b) if b.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    /// Advance past `"<key>" : {`. Returns false when no such key exists.
    fn seek_object(&mut self, key: &str) -> bool {
        while let Some(b) = self.peek() {
            if b != b'"' {
                self.pos += 1;
                continue;
            }
            let Some(name) = self.read_string() else {
                return false;
            };
            if name != key {
                continue;
            }
            self.skip_whitespace();
            if self.peek() != Some(b':') {
                continue;
            }
            self.pos += 1;
            self.skip_whitespace();
            if self.peek() == Some(b'{') {
                self.pos += 1;
                return true;
            }
        }
        false
    }

    /// Read `"name": value` pairs until the closing brace or the first error.
    fn read_member_names(&mut self) -> Vec<String> {
        let mut names = Vec::new();
        loop {
            self.skip_whitespace();
            match self.peek() {
                Some(b',') => self.pos += 1,
                Some(b'"') => {
                    let Some(name) = self.read_string() else {
                        break;
                    };
                    self.skip_whitespace();
                    if self.peek() != Some(b':') {
                        break;
                    }
                    self.pos += 1;
                    self.skip_whitespace();
                    if !self.skip_value() {
                        break;
                    }
                    names.push(name);
                }
                // '}' closes the block; anything else is damage.
                _ => break,
            }
        }
        names
    }

    /// Read a string literal starting at the current `"`.
    fn read_string(&mut self) -> Option<String> {
        let start = self.pos;
        self.pos += 1;
        let mut escaped = false;
        while let Some(b) = self.peek() {
            self.pos += 1;
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => {
                    let literal = &self.src[start..self.pos];
                    let decoded = serde_json::from_str::<String>(literal)
                        .unwrap_or_else(|_| literal[1..literal.len() - 1].to_string());
                    return Some(decoded);
                }
                _ => {}
            }
        }
        None
    }

    /// Skip one JSON value. Returns false if nothing value-like is present.
    fn skip_value(&mut self) -> bool {
        match self.peek() {
            Some(b'"') => self.read_string().is_some(),
            Some(b'{') | Some(b'[') => self.skip_nested(),
            Some(_) => {
                let start = self.pos;
                while let Some(b) = self.peek() {
                    if b == b',' || b == b'}' || b == b']' || b.is_ascii_whitespace() {
                        break;
                    }
                    self.pos += 1;
                }
                self.pos > start
            }
            None => false,
        }
    }

    fn skip_nested(&mut self) -> bool {
        let mut depth = 0usize;
        while let Some(b) = self.peek() {
            match b {
                b'"' => {
                    if self.read_string().is_none() {
                        return false;
                    }
                    continue;
                }
                b'{' | b'[' => depth += 1,
                b'}' | b']' => {
                    depth -= 1;
                    if depth == 0 {
                        self.pos += 1;
                        return true;
                    }
                }
                _ => {}
            }
            self.pos += 1;
        }
        false
    }
}
