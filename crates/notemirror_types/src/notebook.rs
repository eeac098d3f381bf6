//! Notebook records.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A notebook of the mirrored account, or the local mirror of a linked one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notebook {
    /// Remote identifier.
    pub guid: String,
    /// Display name.
    pub name: String,
    /// Optional folder grouping.
    pub stack: Option<String>,
    /// Linked notebook this notebook mirrors, if any.
    pub linked_notebook_guid: Option<String>,
}

impl Notebook {
    /// Creates an account notebook without a stack.
    pub fn new(guid: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            guid: guid.into(),
            name: name.into(),
            stack: None,
            linked_notebook_guid: None,
        }
    }

    /// Sets the stack.
    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }
}

impl fmt::Display for Notebook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' [{}]", self.name, self.guid)?;
        if let Some(stack) = &self.stack {
            write!(f, ", stack '{}'", stack)?;
        }
        Ok(())
    }
}

/// A reference to a notebook owned by another account and shared with this one.
///
/// Linked notebooks are synced under their own watermark.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedNotebook {
    /// Identifier of the link itself (not of the shared notebook).
    pub guid: String,
    /// Name the share was given.
    pub share_name: String,
    /// Owner of the shared notebook.
    pub username: Option<String>,
    /// Shard hosting the shared notebook.
    pub shard_id: String,
    /// Share key for private shares.
    pub share_key: Option<String>,
    /// Public URI for published notebooks.
    pub uri: Option<String>,
    /// Stack the link is filed under in this account.
    pub stack: Option<String>,
}

impl LinkedNotebook {
    /// Creates a private share reference.
    pub fn private(
        guid: impl Into<String>,
        share_name: impl Into<String>,
        shard_id: impl Into<String>,
        share_key: impl Into<String>,
    ) -> Self {
        Self {
            guid: guid.into(),
            share_name: share_name.into(),
            username: None,
            shard_id: shard_id.into(),
            share_key: Some(share_key.into()),
            uri: None,
            stack: None,
        }
    }

    /// Creates a public notebook reference.
    pub fn public(
        guid: impl Into<String>,
        share_name: impl Into<String>,
        shard_id: impl Into<String>,
        uri: impl Into<String>,
    ) -> Self {
        Self {
            guid: guid.into(),
            share_name: share_name.into(),
            username: None,
            shard_id: shard_id.into(),
            share_key: None,
            uri: Some(uri.into()),
            stack: None,
        }
    }

    /// Sets the stack.
    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    /// Returns true if the notebook is published and needs no share authorization.
    pub fn is_public(&self) -> bool {
        self.uri.is_some() && self.share_key.is_none()
    }
}

impl fmt::Display for LinkedNotebook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' [{}]", self.share_name, self.guid)
    }
}
