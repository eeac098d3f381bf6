//! Credentials used to reach a notebook's notes.

use std::fmt;

/// A (token, shard) credential pair.
///
/// Notes in the account's own notebooks are fetched with the primary token on
/// the primary shard (`shard == None`). Notes in linked notebooks may live on
/// another shard and may require a token obtained by authorizing against the
/// shared notebook.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct NotebookAuth {
    /// Authentication token.
    pub token: String,
    /// Shard hosting the notes, `None` for the primary shard.
    pub shard: Option<String>,
}

impl NotebookAuth {
    /// Credentials for the primary account.
    pub fn primary(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            shard: None,
        }
    }

    /// Credentials for notes hosted on another shard.
    pub fn shared(token: impl Into<String>, shard: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            shard: Some(shard.into()),
        }
    }

    /// Returns true if these credentials address a foreign shard.
    pub fn is_shared(&self) -> bool {
        self.shard.is_some()
    }
}

// Tokens never end up in logs.
impl fmt::Debug for NotebookAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotebookAuth")
            .field("token", &"<redacted>")
            .field("shard", &self.shard)
            .finish()
    }
}
