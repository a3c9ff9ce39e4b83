//! Declarative configuration tree for the device agent
//!
//! The agent is configured through a textual tree delivered over the control
//! channel (`CONFIG <text>`). The tree is TOML; nodes are addressed with
//! slash-separated paths the way the rest of the crate expects them:
//!
//! ```text
//! malamute/endpoint          broker endpoint URL
//! server/name                local identity name
//! malamute/producer          stream to publish on (optional)
//! malamute/consumer/<name>   one consumer binding per child, name = stream,
//!                            value = subject pattern
//! ```
//!
//! Declaration order of consumer children is significant: bindings are
//! applied in the order they appear in the source text.

use thiserror::Error;
use toml::{Table, Value};

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Immutable configuration tree.
///
/// Replacement is wholesale: a new tree is parsed and swapped in, the old
/// one is dropped. A tree that fails to parse never replaces its
/// predecessor.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigTree {
    root: Table,
    source: String,
}

impl ConfigTree {
    /// Parse a configuration tree from its textual form.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let root: Table = toml::from_str(text)?;
        Ok(Self {
            root,
            source: text.to_string(),
        })
    }

    /// Load a configuration tree from a file on disk.
    pub fn load_from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Resolve a slash-separated path to a string value.
    ///
    /// Returns `None` if any path segment is missing or the leaf is not a
    /// string.
    pub fn resolve(&self, path: &str) -> Option<&str> {
        self.locate(path).and_then(Value::as_str)
    }

    /// Enumerate the string-valued children of a table node as
    /// `(name, value)` pairs, preserving declaration order.
    ///
    /// A missing node or a non-table node yields an empty list.
    pub fn children(&self, path: &str) -> Vec<(String, String)> {
        match self.locate(path).and_then(Value::as_table) {
            Some(table) => table
                .iter()
                .filter_map(|(name, value)| {
                    value.as_str().map(|v| (name.clone(), v.to_string()))
                })
                .collect(),
            None => Vec::new(),
        }
    }

    /// The exact text this tree was parsed from.
    pub fn source(&self) -> &str {
        &self.source
    }

    fn locate(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('/').filter(|s| !s.is_empty());
        let first = segments.next()?;
        let mut node = self.root.get(first)?;
        for segment in segments {
            node = node.as_table()?.get(segment)?;
        }
        Some(node)
    }
}
