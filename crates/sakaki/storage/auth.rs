use std::fmt;

use serde::{Deserialize, Serialize};

/// One authorizable action on a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionKind {
    Select,
    Insert,
    Update,
    Delete,
    /// DDL and grant/revoke.
    Control,
}

impl ActionKind {
    const ALL: [ActionKind; 5] = [
        ActionKind::Select,
        ActionKind::Insert,
        ActionKind::Update,
        ActionKind::Delete,
        ActionKind::Control,
    ];

    fn bit(self) -> u8 {
        match self {
            ActionKind::Select => 1 << 0,
            ActionKind::Insert => 1 << 1,
            ActionKind::Update => 1 << 2,
            ActionKind::Delete => 1 << 3,
            ActionKind::Control => 1 << 4,
        }
    }
}

/// Set of [`ActionKind`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ActionSet(u8);

impl ActionSet {
    pub fn empty() -> Self {
        Self(0)
    }

    pub fn of(kinds: &[ActionKind]) -> Self {
        let mut set = Self::empty();
        for k in kinds {
            set.add(*k);
        }
        set
    }

    /// Every action, the implicit right of the table owner.
    pub fn all() -> Self {
        Self::of(&ActionKind::ALL)
    }

    pub fn add(&mut self, kind: ActionKind) {
        self.0 |= kind.bit();
    }

    pub fn remove(&mut self, kind: ActionKind) {
        self.0 &= !kind.bit();
    }

    pub fn contains(&self, kind: ActionKind) -> bool {
        self.0 & kind.bit() != 0
    }

    pub fn contains_all(&self, other: ActionSet) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn union(&self, other: ActionSet) -> ActionSet {
        ActionSet(self.0 | other.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ActionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for k in ActionKind::ALL {
            if self.contains(k) {
                if !first {
                    write!(f, ",")?;
                }
                write!(f, "{k:?}")?;
                first = false;
            }
        }
        Ok(())
    }
}
