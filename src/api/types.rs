//! Shared types for the HTTP layer: router context and the auth gate.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{ActorConfig, ConfigError};
use crate::core_state::CoreState;
use crate::models::Role;

// ═══════════════════════════════════════════════════════════
// API context: shared state for the router
// ═══════════════════════════════════════════════════════════

/// Shared context for all API routes and middleware.
#[derive(Clone)]
pub struct ApiContext {
    pub core: Arc<CoreState>,
    pub auth: Arc<dyn AuthGate>,
}

impl ApiContext {
    pub fn new(core: Arc<CoreState>, auth: Arc<dyn AuthGate>) -> Self {
        Self { core, auth }
    }
}

// ═══════════════════════════════════════════════════════════
// Actor: injected by auth middleware
// ═══════════════════════════════════════════════════════════

/// Authenticated caller, injected into request extensions by the auth
/// middleware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub username: String,
    pub role: Role,
}

impl Actor {
    /// Clinical assessment (confirm, correct, annotate) and retraining.
    pub fn can_assess(&self) -> bool {
        self.role == Role::Doctor
    }
}

/// Resolves a bearer token to an actor.
pub trait AuthGate: Send + Sync {
    fn authenticate(&self, token: &str) -> Option<Actor>;
}

// ═══════════════════════════════════════════════════════════
// Static token table
// ═══════════════════════════════════════════════════════════

/// Token table from configuration. Only SHA-256 hashes are kept in memory.
pub struct StaticTokenGate {
    actors: HashMap<[u8; 32], Actor>,
}

impl StaticTokenGate {
    pub fn from_config(entries: &[ActorConfig]) -> Result<Self, ConfigError> {
        let mut actors = HashMap::with_capacity(entries.len());
        for entry in entries {
            if entry.token.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    field: "actors.token",
                    reason: format!("empty token for '{}'", entry.username),
                });
            }
            let role: Role = entry.role.parse().map_err(|_| ConfigError::Invalid {
                field: "actors.role",
                reason: format!("'{}' is not a role", entry.role),
            })?;
            let previous = actors.insert(
                hash_token(&entry.token),
                Actor {
                    username: entry.username.clone(),
                    role,
                },
            );
            if previous.is_some() {
                return Err(ConfigError::Invalid {
                    field: "actors.token",
                    reason: format!("token for '{}' is already assigned", entry.username),
                });
            }
        }
        if actors.is_empty() {
            tracing::warn!("No API actors configured, every protected route will return 401");
        }
        Ok(Self { actors })
    }
}

impl AuthGate for StaticTokenGate {
    fn authenticate(&self, token: &str) -> Option<Actor> {
        self.actors.get(&hash_token(token)).cloned()
    }
}

/// Hash a bearer token string using SHA-256.
pub fn hash_token(token: &str) -> [u8; 32] {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(token: &str, username: &str, role: &str) -> ActorConfig {
        ActorConfig {
            token: token.into(),
            username: username.into(),
            role: role.into(),
        }
    }

    #[test]
    fn resolves_configured_tokens() {
        let gate = StaticTokenGate::from_config(&[
            entry("doc-token", "dr_house", "doctor"),
            entry("tech-token", "tech_1", "technician"),
        ])
        .unwrap();

        let doctor = gate.authenticate("doc-token").unwrap();
        assert_eq!(doctor.username, "dr_house");
        assert!(doctor.can_assess());

        let tech = gate.authenticate("tech-token").unwrap();
        assert_eq!(tech.role, Role::Technician);
        assert!(!tech.can_assess());

        assert!(gate.authenticate("nope").is_none());
    }

    #[test]
    fn unknown_role_rejected() {
        let result = StaticTokenGate::from_config(&[entry("t", "u", "admin")]);
        assert!(matches!(result, Err(ConfigError::Invalid { field: "actors.role", .. })));
    }

    #[test]
    fn duplicate_token_rejected() {
        let result = StaticTokenGate::from_config(&[
            entry("same", "a", "doctor"),
            entry("same", "b", "technician"),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn hash_is_stable() {
        assert_eq!(hash_token("abc"), hash_token("abc"));
        assert_ne!(hash_token("abc"), hash_token("abd"));
    }
}
