use std::time::{Duration, Instant};

use indexmap::IndexMap;
use uuid::Uuid;

use crate::model::{Tag, TagKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingKind {
    Add,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    Direct,
    /// One half of an edit, sent as delete(original) then add(edited).
    Update { group: Uuid, phase: UpdatePhase },
    Restore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdatePhase {
    Delete,
    Add,
}

#[derive(Debug, Clone)]
pub struct PendingAction {
    pub token: Uuid,
    pub kind: PendingKind,
    pub tag: Tag,
    pub key: TagKey,
    pub origin: Origin,
    pub submitted_at: Instant,
}

#[derive(Debug, Clone)]
struct UpdateProgress {
    original: Tag,
    delete_confirmed: bool,
}

/// The wire carries no tokens, so confirmations are matched by content
/// and errors resolve the oldest outstanding action.
#[derive(Debug, Default)]
pub struct PendingRegistry {
    actions: IndexMap<Uuid, PendingAction>,
    updates: IndexMap<Uuid, UpdateProgress>,
}

impl PendingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: PendingKind, tag: Tag, origin: Origin) -> Uuid {
        let token = Uuid::new_v4();
        let key = tag.key();
        self.actions.insert(
            token,
            PendingAction {
                token,
                kind,
                tag,
                key,
                origin,
                submitted_at: Instant::now(),
            },
        );
        token
    }

    pub fn begin_update(&mut self, original: Tag) -> Uuid {
        let group = Uuid::new_v4();
        self.updates.insert(
            group,
            UpdateProgress {
                original,
                delete_confirmed: false,
            },
        );
        group
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn contains(&self, token: &Uuid) -> bool {
        self.actions.contains_key(token)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingAction> {
        self.actions.values()
    }

    pub fn take_matching(&mut self, kind: PendingKind, key: &TagKey) -> Option<PendingAction> {
        let token = self
            .actions
            .values()
            .find(|action| action.kind == kind && &action.key == key)
            .map(|action| action.token)?;
        self.take(&token)
    }

    pub fn take_oldest(&mut self) -> Option<PendingAction> {
        self.actions.shift_remove_index(0).map(|(_, action)| action)
    }

    pub fn take(&mut self, token: &Uuid) -> Option<PendingAction> {
        self.actions.shift_remove(token)
    }

    pub fn stale(&self, now: Instant, timeout: Duration) -> Vec<Uuid> {
        self.actions
            .values()
            .filter(|action| now.saturating_duration_since(action.submitted_at) >= timeout)
            .map(|action| action.token)
            .collect()
    }

    pub fn confirm_update_delete(&mut self, group: &Uuid) {
        if let Some(progress) = self.updates.get_mut(group) {
            progress.delete_confirmed = true;
        }
    }

    /// Closes an update group. Returns the original tag when its delete
    /// half was confirmed, i.e. when the original is gone from the server.
    pub fn finish_update(&mut self, group: &Uuid) -> Option<Tag> {
        self.updates
            .shift_remove(group)
            .filter(|progress| progress.delete_confirmed)
            .map(|progress| progress.original)
    }

    pub fn forget_update(&mut self, group: &Uuid) {
        self.updates.shift_remove(group);
    }
}
