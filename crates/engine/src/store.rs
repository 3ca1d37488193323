//! Persistence interfaces and the in-memory reference datastore.
//!
//! All engine work happens inside a [`Transaction`]: credential versions,
//! permission entries and the request's audit record are written through it
//! and become visible together on [`Transaction::commit`]. Dropping a
//! transaction without committing discards everything it wrote.
//!
//! [`InMemoryDatastore`] provides serializable isolation optimistically. A
//! transaction works on private copies of every credential name it touches
//! and remembers the revision of each name at first touch; commit fails with
//! [`StoreError::Conflict`] if another transaction has since changed one of
//! them.

use std::collections::{BTreeMap, HashMap};

use common::{Actor, ServiceError};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::audit::AuditRecord;
use crate::credential::CredentialVersion;
use crate::permission::AccessControlEntry;

/// Errors from a datastore.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Data read by the transaction changed before it committed.
    #[error("concurrent modification of {0}")]
    Conflict(String),

    #[error("datastore failure: {0}")]
    Backend(String),
}

impl From<StoreError> for ServiceError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict(name) => {
                ServiceError::ConflictRetryExhausted(format!("concurrent modification of {name}"))
            }
            StoreError::Backend(m) => ServiceError::Internal(m),
        }
    }
}

/// Versioned credential storage. Names are matched case-insensitively.
pub trait CredentialStore {
    /// Newest version of `name`.
    fn find_most_recent(&mut self, name: &str) -> Result<Option<CredentialVersion>, StoreError>;

    fn find_by_id(&mut self, id: Uuid) -> Result<Option<CredentialVersion>, StoreError>;

    /// Every version of `name`, newest first.
    fn find_all_by_name(&mut self, name: &str) -> Result<Vec<CredentialVersion>, StoreError>;

    fn save(&mut self, version: CredentialVersion) -> Result<(), StoreError>;

    /// Remove every version of `name`, returning how many there were.
    fn delete_by_name(&mut self, name: &str) -> Result<usize, StoreError>;

    /// Versions sealed under any key other than `active_key_id`.
    fn find_sealed_with_other_key(
        &mut self,
        active_key_id: &str,
    ) -> Result<Vec<CredentialVersion>, StoreError>;

    /// Replace the sealed payload of an existing version.
    fn update_sealed(&mut self, version: &CredentialVersion) -> Result<(), StoreError>;
}

/// Access-control entries keyed by (credential name, actor).
pub trait PermissionStore {
    fn find_permission(
        &mut self,
        name: &str,
        actor: &Actor,
    ) -> Result<Option<AccessControlEntry>, StoreError>;

    /// Every entry of `name`, ordered by actor.
    fn find_permissions(&mut self, name: &str) -> Result<Vec<AccessControlEntry>, StoreError>;

    /// Insert or replace the entry for `(entry.credential_name, entry.actor)`.
    fn save_permission(&mut self, entry: AccessControlEntry) -> Result<(), StoreError>;

    fn delete_permission(
        &mut self,
        name: &str,
        actor: &Actor,
    ) -> Result<Option<AccessControlEntry>, StoreError>;

    fn delete_permissions(&mut self, name: &str) -> Result<usize, StoreError>;
}

/// Append-only audit trail.
pub trait AuditLog {
    fn append(&mut self, record: AuditRecord) -> Result<(), StoreError>;
}

/// One atomic unit of work.
pub trait Transaction: CredentialStore + PermissionStore + AuditLog {
    /// Make every write visible at once.
    ///
    /// # Errors
    ///
    /// [`StoreError::Conflict`] if the transaction's reads are stale; nothing
    /// is applied in that case.
    fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

/// Source of transactions.
pub trait Datastore: Send + Sync {
    fn begin(&self) -> Box<dyn Transaction + '_>;
}

fn key(name: &str) -> String {
    name.to_ascii_lowercase()
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct State {
    /// Versions per name key, oldest first.
    chains: HashMap<String, Vec<CredentialVersion>>,
    acls: HashMap<String, BTreeMap<Actor, AccessControlEntry>>,
    /// Bumped on every committed change to a name's versions or ACL.
    revisions: HashMap<String, u64>,
    audit: Vec<AuditRecord>,
    saves: usize,
}

impl State {
    fn revision(&self, key: &str) -> u64 {
        self.revisions.get(key).copied().unwrap_or(0)
    }
}

/// Thread-safe in-process [`Datastore`].
#[derive(Debug, Default)]
pub struct InMemoryDatastore {
    state: Mutex<State>,
}

impl InMemoryDatastore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of versions saved by committed transactions.
    pub fn save_count(&self) -> usize {
        self.state.lock().saves
    }

    /// Committed audit records, oldest first.
    pub fn audit_records(&self) -> Vec<AuditRecord> {
        self.state.lock().audit.clone()
    }

    /// Number of committed versions of `name`.
    pub fn version_count(&self, name: &str) -> usize {
        self.state.lock().chains.get(&key(name)).map_or(0, Vec::len)
    }
}

impl Datastore for InMemoryDatastore {
    fn begin(&self) -> Box<dyn Transaction + '_> {
        Box::new(InMemoryTransaction {
            store: self,
            touched: HashMap::new(),
            chains: HashMap::new(),
            acls: HashMap::new(),
            audit: Vec::new(),
            saves: 0,
        })
    }
}

/// Working copy of the names a transaction has touched.
struct InMemoryTransaction<'a> {
    store: &'a InMemoryDatastore,
    /// Revision of each touched name when first read.
    touched: HashMap<String, u64>,
    chains: HashMap<String, Vec<CredentialVersion>>,
    acls: HashMap<String, BTreeMap<Actor, AccessControlEntry>>,
    audit: Vec<AuditRecord>,
    saves: usize,
}

impl InMemoryTransaction<'_> {
    /// Snapshot `name` into the working copy on first access.
    fn touch(&mut self, name: &str) -> String {
        let key = key(name);
        if !self.touched.contains_key(&key) {
            let state = self.store.state.lock();
            self.touched.insert(key.clone(), state.revision(&key));
            self.chains
                .insert(key.clone(), state.chains.get(&key).cloned().unwrap_or_default());
            self.acls
                .insert(key.clone(), state.acls.get(&key).cloned().unwrap_or_default());
        }
        key
    }

    fn chain(&mut self, name: &str) -> &mut Vec<CredentialVersion> {
        let key = self.touch(name);
        self.chains.entry(key).or_default()
    }

    fn acl(&mut self, name: &str) -> &mut BTreeMap<Actor, AccessControlEntry> {
        let key = self.touch(name);
        self.acls.entry(key).or_default()
    }

    /// Names of committed versions matching `pred`, for lookups not keyed by name.
    fn committed_names_where(&self, pred: impl Fn(&CredentialVersion) -> bool) -> Vec<String> {
        let state = self.store.state.lock();
        state
            .chains
            .iter()
            .filter(|(_, chain)| chain.iter().any(&pred))
            .filter_map(|(_, chain)| chain.first().map(|v| v.name.clone()))
            .collect()
    }
}

impl CredentialStore for InMemoryTransaction<'_> {
    fn find_most_recent(&mut self, name: &str) -> Result<Option<CredentialVersion>, StoreError> {
        Ok(self.chain(name).last().cloned())
    }

    fn find_by_id(&mut self, id: Uuid) -> Result<Option<CredentialVersion>, StoreError> {
        let mut names = self.committed_names_where(|v| v.id == id);
        names.extend(
            self.chains
                .values()
                .filter_map(|chain| chain.iter().find(|v| v.id == id).map(|v| v.name.clone())),
        );
        for name in names {
            if let Some(found) = self.chain(&name).iter().find(|v| v.id == id) {
                return Ok(Some(found.clone()));
            }
        }
        Ok(None)
    }

    fn find_all_by_name(&mut self, name: &str) -> Result<Vec<CredentialVersion>, StoreError> {
        Ok(self.chain(name).iter().rev().cloned().collect())
    }

    fn save(&mut self, version: CredentialVersion) -> Result<(), StoreError> {
        let name = version.name.clone();
        self.chain(&name).push(version);
        self.saves += 1;
        Ok(())
    }

    fn delete_by_name(&mut self, name: &str) -> Result<usize, StoreError> {
        Ok(std::mem::take(self.chain(name)).len())
    }

    fn find_sealed_with_other_key(
        &mut self,
        active_key_id: &str,
    ) -> Result<Vec<CredentialVersion>, StoreError> {
        for name in self.committed_names_where(|v| v.encrypted_value.key_id != active_key_id) {
            self.touch(&name);
        }
        Ok(self
            .chains
            .values()
            .flatten()
            .filter(|v| v.encrypted_value.key_id != active_key_id)
            .cloned()
            .collect())
    }

    fn update_sealed(&mut self, version: &CredentialVersion) -> Result<(), StoreError> {
        let slot = self
            .chain(&version.name)
            .iter_mut()
            .find(|v| v.id == version.id)
            .ok_or_else(|| StoreError::Backend(format!("version {} does not exist", version.id)))?;
        slot.encrypted_value = version.encrypted_value.clone();
        Ok(())
    }
}

impl PermissionStore for InMemoryTransaction<'_> {
    fn find_permission(
        &mut self,
        name: &str,
        actor: &Actor,
    ) -> Result<Option<AccessControlEntry>, StoreError> {
        Ok(self.acl(name).get(actor).cloned())
    }

    fn find_permissions(&mut self, name: &str) -> Result<Vec<AccessControlEntry>, StoreError> {
        Ok(self.acl(name).values().cloned().collect())
    }

    fn save_permission(&mut self, entry: AccessControlEntry) -> Result<(), StoreError> {
        let name = entry.credential_name.clone();
        self.acl(&name).insert(entry.actor.clone(), entry);
        Ok(())
    }

    fn delete_permission(
        &mut self,
        name: &str,
        actor: &Actor,
    ) -> Result<Option<AccessControlEntry>, StoreError> {
        Ok(self.acl(name).remove(actor))
    }

    fn delete_permissions(&mut self, name: &str) -> Result<usize, StoreError> {
        Ok(std::mem::take(self.acl(name)).len())
    }
}

impl AuditLog for InMemoryTransaction<'_> {
    fn append(&mut self, record: AuditRecord) -> Result<(), StoreError> {
        self.audit.push(record);
        Ok(())
    }
}

impl Transaction for InMemoryTransaction<'_> {
    fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let this = *self;
        let mut state = this.store.state.lock();

        if let Some((name, _)) = this
            .touched
            .iter()
            .find(|(key, seen)| state.revision(key) != **seen)
        {
            debug!(name = %name, "commit rejected: stale read");
            return Err(StoreError::Conflict(name.clone()));
        }

        for (key, chain) in this.chains {
            let changed = state.chains.get(&key).map_or(!chain.is_empty(), |c| *c != chain);
            let acl = this.acls.get(&key).cloned().unwrap_or_default();
            let acl_changed = state.acls.get(&key).map_or(!acl.is_empty(), |a| *a != acl);
            if !changed && !acl_changed {
                continue;
            }
            *state.revisions.entry(key.clone()).or_insert(0) += 1;
            if chain.is_empty() {
                state.chains.remove(&key);
            } else {
                state.chains.insert(key.clone(), chain);
            }
            if acl.is_empty() {
                state.acls.remove(&key);
            } else {
                state.acls.insert(key, acl);
            }
        }
        state.saves += this.saves;
        state.audit.extend(this.audit);
        Ok(())
    }
}
