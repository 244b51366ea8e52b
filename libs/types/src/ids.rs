//! Unique identifier types for pipeline entities
//!
//! All IDs use UUID v7 for time-sortable ordering, so connections and
//! alerts can be listed chronologically without a separate sequence column.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a subscriber connection
///
/// Uses UUID v7 for time-based sorting. A ConnectionId is minted when a
/// client attaches to the distribution hub and dies with the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Create a new ConnectionId with current timestamp
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Create from existing UUID
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get inner UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a volume spike alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlertId(Uuid);

impl AlertId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for AlertId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AlertId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_creation() {
        let id1 = ConnectionId::new();
        let id2 = ConnectionId::new();
        assert_ne!(id1, id2, "ConnectionIds should be unique");
    }

    #[test]
    fn test_connection_id_serialization() {
        let id = ConnectionId::new();
        let json = serde_json::to_string(&id).unwrap();
        let deserialized: ConnectionId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, deserialized);
    }

    #[test]
    fn test_connection_ids_sort_by_creation_time() {
        let earlier = ConnectionId::new();
        let later = ConnectionId::new();
        assert!(earlier <= later, "v7 ids should be time-ordered");
    }

    #[test]
    fn test_alert_id_creation() {
        let id1 = AlertId::new();
        let id2 = AlertId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_alert_id_display_roundtrip() {
        let id = AlertId::new();
        let text = id.to_string();
        let parsed = AlertId::from_uuid(text.parse().unwrap());
        assert_eq!(id, parsed);
    }
}
