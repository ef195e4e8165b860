use std::collections::BTreeMap;

use crate::auth::ActionSet;

/// Registry record of a table or index.
///
/// Lives from CREATE to DROP; grant/revoke mutate the action sets in place.
#[derive(Debug, Clone)]
pub struct StorageEntry {
    id: u64,
    name: String,
    /// Surrogate key the entry is stored under in the KV engine, when the
    /// deployment mints them.
    storage_key: Option<String>,
    authorized_actions: BTreeMap<String, ActionSet>,
    public_actions: ActionSet,
}

impl StorageEntry {
    pub fn new(id: u64, name: impl Into<String>, storage_key: Option<String>) -> Self {
        Self {
            id,
            name: name.into(),
            storage_key,
            authorized_actions: BTreeMap::new(),
            public_actions: ActionSet::empty(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn storage_key(&self) -> Option<&str> {
        self.storage_key.as_deref()
    }

    pub fn public_actions(&self) -> ActionSet {
        self.public_actions
    }

    pub fn set_public_actions(&mut self, actions: ActionSet) {
        self.public_actions = actions;
    }

    pub fn authorized_actions(&self) -> &BTreeMap<String, ActionSet> {
        &self.authorized_actions
    }

    pub fn grant(&mut self, user: impl Into<String>, actions: ActionSet) {
        let entry = self.authorized_actions.entry(user.into()).or_default();
        *entry = entry.union(actions);
    }

    pub fn revoke(&mut self, user: &str, actions: ActionSet) {
        if let Some(entry) = self.authorized_actions.get_mut(user) {
            let mut updated = *entry;
            for kind in [
                crate::auth::ActionKind::Select,
                crate::auth::ActionKind::Insert,
                crate::auth::ActionKind::Update,
                crate::auth::ActionKind::Delete,
                crate::auth::ActionKind::Control,
            ] {
                if actions.contains(kind) {
                    updated.remove(kind);
                }
            }
            if updated.is_empty() {
                self.authorized_actions.remove(user);
            } else {
                *entry = updated;
            }
        }
    }

    /// True when `required` is covered by the user's grants plus the public
    /// set. An anonymous user only gets the public set.
    pub fn allows_user_actions(&self, user: Option<&str>, required: ActionSet) -> bool {
        let mut effective = self.public_actions;
        if let Some(u) = user {
            if let Some(granted) = self.authorized_actions.get(u) {
                effective = effective.union(*granted);
            }
        }
        effective.contains_all(required)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::ActionKind;

    #[test]
    fn public_actions_cover_everyone() {
        let mut e = StorageEntry::new(1, "T", None);
        e.set_public_actions(ActionSet::of(&[ActionKind::Select]));
        assert!(e.allows_user_actions(None, ActionSet::of(&[ActionKind::Select])));
        assert!(e.allows_user_actions(Some("bob"), ActionSet::of(&[ActionKind::Select])));
        assert!(!e.allows_user_actions(Some("bob"), ActionSet::of(&[ActionKind::Insert])));
    }

    #[test]
    fn grants_merge_with_public() {
        let mut e = StorageEntry::new(1, "T", None);
        e.set_public_actions(ActionSet::of(&[ActionKind::Select]));
        e.grant("alice", ActionSet::of(&[ActionKind::Insert]));
        assert!(e.allows_user_actions(
            Some("alice"),
            ActionSet::of(&[ActionKind::Select, ActionKind::Insert])
        ));
        assert!(!e.allows_user_actions(
            Some("bob"),
            ActionSet::of(&[ActionKind::Select, ActionKind::Insert])
        ));
    }

    #[test]
    fn revoke_removes_grants() {
        let mut e = StorageEntry::new(1, "T", None);
        e.grant("alice", ActionSet::of(&[ActionKind::Insert, ActionKind::Delete]));
        e.revoke("alice", ActionSet::of(&[ActionKind::Delete]));
        assert!(e.allows_user_actions(Some("alice"), ActionSet::of(&[ActionKind::Insert])));
        assert!(!e.allows_user_actions(Some("alice"), ActionSet::of(&[ActionKind::Delete])));
        e.revoke("alice", ActionSet::of(&[ActionKind::Insert]));
        assert!(e.authorized_actions().is_empty());
    }
}
