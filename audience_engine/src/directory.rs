// Directory seam: where audiences live.
//
// The host directory assigns ids, enforces case-insensitive name uniqueness
// within a profile scope and stamps host-owned timestamps. Deletion is
// permanent; recreating a name yields a new id.
//
// `InMemoryDirectory` is the reference implementation used by tests, demos
// and any embedding that has no external directory.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;

use crate::audience_metadata::{name_key, Audience, AudienceId, GroupOperation};
use crate::error::{AudienceError, Result};

/// Storage operations the engine needs from a profile-service scope.
///
/// Implementations use interior mutability; the engine assumes external
/// mutual exclusion between writers of the same audience.
pub trait AudienceDirectory: Send + Sync {
    /// Case-insensitive lookup
    fn find_by_name(&self, name: &str) -> Option<Audience>;

    fn find_by_id(&self, id: AudienceId) -> Option<Audience>;

    /// Every audience in the scope, in no particular order
    fn list(&self) -> Vec<Audience>;

    /// Creates an empty audience with a fresh id.
    fn create(&self, name: &str, group_operation: GroupOperation) -> Result<Audience>;

    /// Persists an audience previously returned by this directory.
    fn save(&self, audience: &Audience) -> Result<()>;

    /// Permanently removes an audience. Returns false if it did not exist.
    fn delete(&self, id: AudienceId) -> Result<bool>;
}

// ============================================================================
// In-memory directory
// ============================================================================

#[derive(Default)]
struct DirectoryState {
    audiences: HashMap<AudienceId, Audience>,
    /// name_key -> id
    names: HashMap<String, AudienceId>,
}

/// Thread-safe in-memory directory
#[derive(Default, Clone)]
pub struct InMemoryDirectory {
    state: Arc<RwLock<DirectoryState>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.state.read().audiences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Host-side compile write, standing in for the external compile job.
    pub fn record_compilation(&self, id: AudienceId, member_count: u64, error: Option<String>) -> Result<()> {
        let mut state = self.state.write();
        let audience = state
            .audiences
            .get_mut(&id)
            .ok_or_else(|| AudienceError::AudienceNotFound(id.canonical()))?;
        audience
            .compile_state_mut()
            .record_compilation(Utc::now(), member_count, error);
        Ok(())
    }
}

impl AudienceDirectory for InMemoryDirectory {
    fn find_by_name(&self, name: &str) -> Option<Audience> {
        let state = self.state.read();
        let id = state.names.get(&name_key(name))?;
        state.audiences.get(id).cloned()
    }

    fn find_by_id(&self, id: AudienceId) -> Option<Audience> {
        self.state.read().audiences.get(&id).cloned()
    }

    fn list(&self) -> Vec<Audience> {
        self.state.read().audiences.values().cloned().collect()
    }

    fn create(&self, name: &str, group_operation: GroupOperation) -> Result<Audience> {
        let key = name_key(name);
        if key.is_empty() {
            return Err(AudienceError::InvalidName(name.to_string()));
        }

        let mut state = self.state.write();
        if state.names.contains_key(&key) {
            return Err(AudienceError::AlreadyExists(name.to_string()));
        }

        let mut id = AudienceId::new();
        while state.audiences.contains_key(&id) {
            id = AudienceId::new();
        }

        let audience = Audience::new(id, name, group_operation);
        state.names.insert(key, id);
        state.audiences.insert(id, audience.clone());
        Ok(audience)
    }

    fn save(&self, audience: &Audience) -> Result<()> {
        let mut state = self.state.write();
        let id = audience.id();

        let stored = state
            .audiences
            .get(&id)
            .ok_or_else(|| AudienceError::AudienceNotFound(audience.name().to_string()))?;

        let rules_changed = stored.rules() != audience.rules();
        let properties_changed = stored.description() != audience.description()
            || stored.owner() != audience.owner()
            || stored.group_operation() != audience.group_operation();

        // Compile state belongs to the host; keep the stored copy.
        let mut updated = audience.clone();
        *updated.compile_state_mut() = stored.compile_state().clone();

        let now = Utc::now();
        if rules_changed {
            updated.compile_state_mut().record_rule_update(now);
        }
        if properties_changed {
            updated.compile_state_mut().record_property_update(now);
        }

        state.audiences.insert(id, updated);
        Ok(())
    }

    fn delete(&self, id: AudienceId) -> Result<bool> {
        let mut state = self.state.write();
        let removed = state.audiences.remove(&id);
        match removed {
            Some(removed) => {
                state.names.remove(&name_key(removed.name()));
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
