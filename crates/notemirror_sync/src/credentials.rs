//! Credentials and connected clients for content downloads.
//!
//! [`CredentialCache`] lives on the coordinating thread and maps each linked
//! notebook to the credential pair its notes are fetched with. Because only
//! the coordinator touches it, a private share is authorized at most once
//! per run. Tokens are kept in memory only.
//!
//! [`WorkerClients`] is owned by a single download worker and holds one
//! connected client per credential pair, created on first use and dropped
//! with the worker.

use crate::cancel::CancellationToken;
use crate::config::RetryConfig;
use crate::error::{SyncError, SyncResult};
use crate::remote::{NoteClient, RemoteConnector, RemoteService};
use crate::retry::with_network_retry;
use notemirror_types::{LinkedNotebook, NotebookAuth};
use std::collections::HashMap;
use tracing::debug;

/// Run-scoped map from linked notebook guid to its credentials.
#[derive(Debug, Default)]
pub struct CredentialCache {
    resolved: HashMap<String, NotebookAuth>,
}

impl CredentialCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the credentials for the notes of `linked`.
    ///
    /// A public notebook is read with the primary token on the notebook's
    /// shard. A private share is authorized through the remote, with network
    /// errors retried.
    pub fn resolve<R: RemoteService + ?Sized>(
        &mut self,
        remote: &R,
        linked: &LinkedNotebook,
        retry: &RetryConfig,
        cancel: &CancellationToken,
    ) -> SyncResult<NotebookAuth> {
        if let Some(auth) = self.resolved.get(&linked.guid) {
            return Ok(auth.clone());
        }

        let auth = if linked.is_public() {
            NotebookAuth::shared(remote.primary_auth().token, linked.shard_id.clone())
        } else {
            debug!("Authorizing shared notebook {}", linked);
            let token = with_network_retry(retry, cancel, "shared notebook authorization", || {
                remote.authorize_linked_notebook(linked)
            })?;
            NotebookAuth::shared(token, linked.shard_id.clone())
        };

        self.resolved.insert(linked.guid.clone(), auth.clone());
        Ok(auth)
    }

    /// Returns previously resolved credentials without contacting the remote.
    pub fn get(&self, linked_guid: &str) -> Option<&NotebookAuth> {
        self.resolved.get(linked_guid)
    }

    /// Returns the number of resolved notebooks.
    pub fn len(&self) -> usize {
        self.resolved.len()
    }

    /// Returns true if nothing was resolved yet.
    pub fn is_empty(&self) -> bool {
        self.resolved.is_empty()
    }
}

/// Key of a connected client: shard and token.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientKey {
    shard: Option<String>,
    token: String,
}

impl From<&NotebookAuth> for ClientKey {
    fn from(auth: &NotebookAuth) -> Self {
        Self {
            shard: auth.shard.clone(),
            token: auth.token.clone(),
        }
    }
}

/// A connected client plus its lazily loaded tag maps.
///
/// A primary client sees every tag of the account through one map. A
/// shared-mode client may serve several notebooks on the same shard, so its
/// maps are kept per notebook.
#[derive(Debug)]
pub struct CachedClient<C> {
    client: C,
    shared: bool,
    account_tags: Option<HashMap<String, String>>,
    notebook_tags: HashMap<String, HashMap<String, String>>,
}

impl<C: NoteClient> CachedClient<C> {
    fn new(client: C, shared: bool) -> Self {
        Self {
            client,
            shared,
            account_tags: None,
            notebook_tags: HashMap::new(),
        }
    }

    /// Returns the underlying client.
    pub fn client(&mut self) -> &mut C {
        &mut self.client
    }

    /// Loads the tag map covering `notebook_guid` unless already loaded.
    pub fn ensure_tags(&mut self, notebook_guid: &str) -> SyncResult<()> {
        if self.shared {
            if !self.notebook_tags.contains_key(notebook_guid) {
                let tags = self.client.list_tags_for_notebook(notebook_guid)?;
                self.notebook_tags.insert(notebook_guid.to_string(), tags);
            }
        } else if self.account_tags.is_none() {
            self.account_tags = Some(self.client.list_tags()?);
        }
        Ok(())
    }

    /// Maps tag guids of a note in `notebook_guid` to names. Guids missing
    /// from the loaded map are skipped.
    pub fn tag_names(&self, notebook_guid: &str, tag_guids: &[String]) -> Vec<String> {
        let tags = if self.shared {
            self.notebook_tags.get(notebook_guid)
        } else {
            self.account_tags.as_ref()
        };
        let Some(tags) = tags else {
            return Vec::new();
        };
        tag_guids
            .iter()
            .filter_map(|guid| tags.get(guid).cloned())
            .collect()
    }
}

/// Per-worker clients keyed by credential pair.
pub struct WorkerClients<'a, C: RemoteConnector> {
    connector: &'a C,
    clients: HashMap<ClientKey, CachedClient<C::Client>>,
}

impl<'a, C: RemoteConnector> WorkerClients<'a, C> {
    /// Creates an empty client map backed by `connector`.
    pub fn new(connector: &'a C) -> Self {
        Self {
            connector,
            clients: HashMap::new(),
        }
    }

    /// Returns the client for `auth`, connecting it on first use.
    pub fn get(&mut self, auth: &NotebookAuth) -> SyncResult<&mut CachedClient<C::Client>> {
        let key = ClientKey::from(auth);
        if !self.clients.contains_key(&key) {
            debug!("Connecting content client for shard {:?}", auth.shard);
            let client = self.connector.connect(auth)?;
            self.clients
                .insert(key.clone(), CachedClient::new(client, auth.is_shared()));
        }
        self.clients
            .get_mut(&key)
            .ok_or_else(|| SyncError::Worker("client vanished from worker map".into()))
    }

    /// Returns the number of connected clients.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Returns true if no client was connected yet.
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
