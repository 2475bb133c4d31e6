//! Structured assistant-reply envelope: extraction, schema, workspace merge.
//!
//! Assistant replies are free-form text that may embed one JSON object.
//! Extraction takes the span from the first `{` to the last `}` in the
//! whole message and parses that — not a balanced-brace scan. Anything
//! outside the span is ignored; a message whose last `}` is not the end
//! of the embedded object therefore fails to parse and is treated as
//! opaque text. At most one envelope is recognized per message.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One generated file: the literal file text, no re-encoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileNode {
    pub content: String,
}

/// A runnable command: the executable plus its ordered arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCommand {
    #[serde(rename = "mainItem")]
    pub main_item: String,
    #[serde(default)]
    pub commands: Vec<String>,
}

/// The structured payload optionally embedded in an assistant message.
///
/// `fileTree` feeds the shared workspace; the remaining fields are
/// display concerns that must round-trip losslessly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssistantEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(rename = "fileTree", default, skip_serializing_if = "Option::is_none")]
    pub file_tree: Option<BTreeMap<String, FileNode>>,
    #[serde(
        rename = "buildCommand",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub build_command: Option<RunCommand>,
    #[serde(
        rename = "startCommand",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub start_command: Option<RunCommand>,
}

/// Extract and parse the embedded envelope, if any.
///
/// Returns `None` when no brace span exists or the span is not a valid
/// envelope-shaped JSON object. Never panics, never partially applies a
/// malformed envelope — the caller keeps showing the raw text.
pub fn parse_envelope(raw: &str) -> Option<AssistantEnvelope> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end < start {
        return None;
    }
    serde_json::from_str(&raw[start..=end]).ok()
}

// ---------------------------------------------------------------------------
// Consumer workspace
// ---------------------------------------------------------------------------

/// The consumer-side file workspace that assistant file trees converge
/// on. Applying an envelope with a `fileTree` replaces the whole tree;
/// an envelope without one leaves the workspace untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Workspace {
    files: BTreeMap<String, String>,
}

impl Workspace {
    pub fn new() -> Self {
        Workspace::default()
    }

    pub fn apply(&mut self, envelope: &AssistantEnvelope) {
        if let Some(tree) = &envelope.file_tree {
            self.files = tree
                .iter()
                .map(|(name, node)| (name.clone(), node.content.clone()))
                .collect();
        }
    }

    pub fn file(&self, name: &str) -> Option<&str> {
        self.files.get(name).map(String::as_str)
    }

    pub fn file_names(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
