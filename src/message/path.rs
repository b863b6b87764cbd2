// src/message/path.rs

//! Dotted / bracketed paths into a message.
//!
//! Accepted forms (mixable):
//!
//! ```text
//! data.items
//! [Data][items]
//! metadata.tags[0]
//! items[2].name        (no root segment: addresses `data`)
//! ```

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use super::Message;

/// Which part of a message a path starts from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathRoot {
    Data,
    Metadata,
}

/// A parsed path: a root plus zero or more segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessagePath {
    raw: String,
    root: PathRoot,
    segments: Vec<String>,
}

fn segment_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[([^\]]*)\]|([^.\[\]]+)").expect("path segment regex is valid"))
}

impl MessagePath {
    /// Parse a path string. Returns an error message for malformed input.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err("loop path must not be empty".to_string());
        }
        if trimmed.matches('[').count() != trimmed.matches(']').count() {
            return Err(format!("unbalanced brackets in path '{trimmed}'"));
        }

        let mut segments: Vec<String> = segment_regex()
            .captures_iter(trimmed)
            .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)))
            .map(|m| m.as_str().trim().trim_matches(|c| c == '"' || c == '\'').to_string())
            .filter(|s| !s.is_empty())
            .collect();

        if segments.is_empty() {
            return Err(format!("path '{trimmed}' has no segments"));
        }

        let root = match segments[0].to_lowercase().as_str() {
            "data" => {
                segments.remove(0);
                PathRoot::Data
            }
            "metadata" => {
                segments.remove(0);
                PathRoot::Metadata
            }
            _ => PathRoot::Data,
        };

        Ok(Self {
            raw: trimmed.to_string(),
            root,
            segments,
        })
    }

    pub fn root(&self) -> PathRoot {
        self.root
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Resolve the addressed sub-structure inside `message`.
    pub fn resolve<'a>(&self, message: &'a Message) -> Option<&'a Value> {
        let start = match self.root {
            PathRoot::Data => &message.data,
            PathRoot::Metadata => &message.metadata,
        };
        self.segments
            .iter()
            .try_fold(start, |current, segment| match current {
                Value::Object(map) => map.get(segment),
                Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
                _ => None,
            })
    }
}

impl fmt::Display for MessagePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
