//! Strongly-typed identifiers for lockwarden

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Name of a resource group.
///
/// Resource manager names are case-insensitive, so equality and ordering
/// compare the lowercased form while the original spelling is kept for display.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceGroupName(String);

impl ResourceGroupName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn key(&self) -> String {
        self.0.to_ascii_lowercase()
    }
}

impl PartialEq for ResourceGroupName {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Eq for ResourceGroupName {}

impl std::hash::Hash for ResourceGroupName {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl PartialOrd for ResourceGroupName {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ResourceGroupName {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key().cmp(&other.key())
    }
}

impl fmt::Display for ResourceGroupName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ResourceGroupName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ResourceGroupName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Unique identifier for a single workflow execution
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn resource_group_names_compare_case_insensitively() {
        let a = ResourceGroupName::new("rg-Prod");
        let b = ResourceGroupName::new("RG-PROD");
        let c = ResourceGroupName::new("rg-dev");

        assert_eq!(a, b);
        assert_ne!(a, c);

        let mut set = BTreeSet::new();
        assert!(set.insert(a));
        assert!(!set.insert(b));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn run_id_uniqueness() {
        assert_ne!(RunId::new(), RunId::new());
    }

    #[test]
    fn ids_serialize_deserialize() {
        let name = ResourceGroupName::new("rg-prod");
        let json = serde_json::to_string(&name).unwrap();
        assert_eq!(json, "\"rg-prod\"");
        let parsed: ResourceGroupName = serde_json::from_str(&json).unwrap();
        assert_eq!(name, parsed);

        let run_id = RunId::new();
        let json = serde_json::to_string(&run_id).unwrap();
        let parsed: RunId = serde_json::from_str(&json).unwrap();
        assert_eq!(run_id, parsed);
    }
}
