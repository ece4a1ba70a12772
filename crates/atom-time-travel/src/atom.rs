//! Atom handles: identity-stable references to cells of host store state.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use uuid::Uuid;

/// Unique identifier of an atom
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AtomId(pub Uuid);

impl AtomId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AtomId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AtomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How an atom is read and written by the host store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AtomRole {
    /// Holds a plain value written directly
    Primitive,
    /// Derived from other atoms, read-only
    Computed,
    /// Has a custom write path
    Writable,
}

impl AtomRole {
    pub fn is_read_only(self) -> bool {
        matches!(self, AtomRole::Computed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AtomRole::Primitive => "primitive",
            AtomRole::Computed => "computed",
            AtomRole::Writable => "writable",
        }
    }
}

/// Handle to one piece of store state.
///
/// Equality and hashing use the id only; the name is a debugging label.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Atom {
    id: AtomId,
    name: Option<String>,
    role: AtomRole,
}

impl Atom {
    pub fn new(role: AtomRole) -> Self {
        Self {
            id: AtomId::new(),
            name: None,
            role,
        }
    }

    pub fn primitive(name: impl Into<String>) -> Self {
        Self::new(AtomRole::Primitive).with_name(name)
    }

    pub fn computed(name: impl Into<String>) -> Self {
        Self::new(AtomRole::Computed).with_name(name)
    }

    pub fn writable(name: impl Into<String>) -> Self {
        Self::new(AtomRole::Writable).with_name(name)
    }

    /// Rebuild a handle from its recorded parts, e.g. from a snapshot entry
    pub fn from_parts(id: AtomId, name: Option<String>, role: AtomRole) -> Self {
        Self { id, name, role }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn id(&self) -> AtomId {
        self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn role(&self) -> AtomRole {
        self.role
    }

    /// Name used in snapshots and logs; falls back to the id
    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("atom-{}", self.id),
        }
    }
}

impl PartialEq for Atom {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Atom {}

impl Hash for Atom {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_identity_ignores_name() {
        let atom = Atom::primitive("counter");
        let renamed = Atom::from_parts(atom.id(), Some("other".to_string()), AtomRole::Primitive);
        assert_eq!(atom, renamed);

        let mut set = HashSet::new();
        set.insert(atom.clone());
        assert!(set.contains(&renamed));
    }

    #[test]
    fn test_display_name_falls_back_to_id() {
        let atom = Atom::new(AtomRole::Writable);
        assert!(atom.display_name().starts_with("atom-"));
        assert_eq!(Atom::computed("total").display_name(), "total");
        assert!(Atom::computed("total").role().is_read_only());
    }
}
