use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::SlateProtocolError;

/// Maximum length of a node id.
pub const MAX_ID_LEN: usize = 64;

/// Role of a node in the mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Coordinator,
    Participant,
}

impl Role {
    pub fn is_coordinator(self) -> bool {
        matches!(self, Role::Coordinator)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Coordinator => f.write_str("coordinator"),
            Role::Participant => f.write_str("participant"),
        }
    }
}

/// Identity of a node: an opaque id, its role and its namespace.
///
/// The id is restricted to `[A-Za-z0-9_-]` so it can be embedded in
/// channel names. Route keys combine id and namespace, but routing treats
/// every announcement carrying our own id as our own, whatever its
/// namespace: a node never learns a route to its id in another namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeId {
    id: String,
    role: Role,
    namespace: u16,
}

impl NodeId {
    pub fn new(id: impl Into<String>, role: Role, namespace: u16) -> Result<Self, SlateProtocolError> {
        let id = id.into();
        validate_peer_id(&id)?;
        Ok(Self {
            id,
            role,
            namespace,
        })
    }

    pub fn coordinator(id: impl Into<String>, namespace: u16) -> Result<Self, SlateProtocolError> {
        Self::new(id, Role::Coordinator, namespace)
    }

    pub fn participant(id: impl Into<String>, namespace: u16) -> Result<Self, SlateProtocolError> {
        Self::new(id, Role::Participant, namespace)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn namespace(&self) -> u16 {
        self.namespace
    }

    /// Routing-table key for this node (`"{id}:{namespace}"`).
    pub fn route_key(&self) -> String {
        route_key(&self.id, self.namespace)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.id, self.namespace)
    }
}

/// Routing-table key for an arbitrary peer.
pub fn route_key(id: &str, namespace: u16) -> String {
    format!("{id}:{namespace}")
}

/// Node id part of a route key (`"alice:7001"` → `"alice"`).
pub fn route_key_id(key: &str) -> &str {
    key.split_once(':').map_or(key, |(id, _)| id)
}

/// Check that a peer id is usable in channel names.
pub fn validate_peer_id(id: &str) -> Result<(), SlateProtocolError> {
    if id.is_empty() {
        return Err(SlateProtocolError::InvalidNodeId {
            reason: "empty id".into(),
        });
    }
    if id.len() > MAX_ID_LEN {
        return Err(SlateProtocolError::InvalidNodeId {
            reason: format!("id longer than {MAX_ID_LEN} chars"),
        });
    }
    if let Some(c) = id
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
    {
        return Err(SlateProtocolError::InvalidNodeId {
            reason: format!("{id:?} contains {c:?}"),
        });
    }
    Ok(())
}

/// Current time in milliseconds since Unix epoch.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_id_accessors() {
        let node = NodeId::participant("alice", 7001).unwrap();
        assert_eq!(node.id(), "alice");
        assert_eq!(node.namespace(), 7001);
        assert_eq!(node.role(), Role::Participant);
        assert_eq!(node.route_key(), "alice:7001");
        assert_eq!(node.to_string(), "alice:7001");
    }

    #[test]
    fn rejects_bad_ids() {
        for bad in ["", "a.b", "a b", "a/b", "a:b", "é"] {
            assert!(
                matches!(
                    NodeId::participant(bad, 1),
                    Err(SlateProtocolError::InvalidNodeId { .. })
                ),
                "{bad:?} should be rejected"
            );
        }
        assert!(NodeId::participant("x".repeat(MAX_ID_LEN + 1), 1).is_err());
        assert!(NodeId::participant("Node_01-b", 1).is_ok());
    }

    #[test]
    fn route_key_id_split() {
        assert_eq!(route_key_id("alice:7001"), "alice");
        assert_eq!(route_key_id("bare"), "bare");
    }

    #[test]
    fn role_serde_is_snake_case() {
        let json = serde_json::to_string(&Role::Coordinator).unwrap();
        assert_eq!(json, "\"coordinator\"");
        assert!(Role::Coordinator.is_coordinator());
        assert!(!Role::Participant.is_coordinator());
    }

    #[test]
    fn now_ms_is_reasonable() {
        // After 2024-01-01
        assert!(now_ms() > 1_704_067_200_000);
    }
}
