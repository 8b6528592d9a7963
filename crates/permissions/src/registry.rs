//! Permission registry

use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use milkbank_core::{Action, Actor, Resource, Role};

use crate::error::{PermissionError, PermissionResult};
use crate::policy::{Permission, Policy};

#[derive(Debug, Default, Clone)]
struct Snapshot {
    permissions: HashSet<Permission>,
    grants: HashMap<Role, HashSet<Permission>>,
}

impl Snapshot {
    /// Every permission listed once; every grant names a listed permission
    fn from_policy(policy: &Policy) -> PermissionResult<Self> {
        let mut snapshot = Snapshot::default();
        for permission in &policy.permissions {
            if !snapshot.permissions.insert(*permission) {
                return Err(PermissionError::InvalidPolicy(format!(
                    "permission {}:{} is listed twice",
                    permission.resource, permission.action
                )));
            }
        }
        for (role, granted) in &policy.grants {
            for permission in granted {
                snapshot.grant(*role, *permission).map_err(|_| {
                    PermissionError::InvalidPolicy(format!(
                        "role {} is granted unlisted permission {}:{}",
                        role, permission.resource, permission.action
                    ))
                })?;
            }
        }
        Ok(snapshot)
    }

    fn grant(&mut self, role: Role, permission: Permission) -> PermissionResult<()> {
        if !self.permissions.contains(&permission) {
            return Err(PermissionError::Unregistered {
                resource: permission.resource,
                action: permission.action,
            });
        }
        self.grants.entry(role).or_default().insert(permission);
        Ok(())
    }
}

/// Role → permission map shared by every service
///
/// Deny-by-default: an unregistered or ungranted pair is refused.
#[derive(Debug, Default)]
pub struct PermissionRegistry {
    inner: RwLock<Snapshot>,
}

impl PermissionRegistry {
    /// Empty registry; denies everything
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from a policy
    pub fn from_policy(policy: &Policy) -> PermissionResult<Self> {
        Ok(Self {
            inner: RwLock::new(Snapshot::from_policy(policy)?),
        })
    }

    // A poisoned lock still guards a consistent snapshot: every write
    // replaces or extends it only after validation.
    fn read(&self) -> RwLockReadGuard<'_, Snapshot> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Snapshot> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a `(resource, action)` pair
    pub fn register_permission(&self, resource: Resource, action: Action) -> PermissionResult<()> {
        let mut snapshot = self.write();
        if !snapshot.permissions.insert(Permission::new(resource, action)) {
            return Err(PermissionError::Duplicate { resource, action });
        }
        Ok(())
    }

    /// Grant a registered permission to a role
    pub fn grant(&self, role: Role, resource: Resource, action: Action) -> PermissionResult<()> {
        self.write().grant(role, Permission::new(resource, action))
    }

    /// Remove a grant; returns whether it was present
    pub fn revoke(&self, role: Role, resource: Resource, action: Action) -> bool {
        self.write()
            .grants
            .get_mut(&role)
            .map(|set| set.remove(&Permission::new(resource, action)))
            .unwrap_or(false)
    }

    pub fn check_access(&self, role: Role, resource: Resource, action: Action) -> bool {
        let permission = Permission::new(resource, action);
        let snapshot = self.read();
        snapshot.permissions.contains(&permission)
            && snapshot
                .grants
                .get(&role)
                .is_some_and(|set| set.contains(&permission))
    }

    /// `check_access` for an actor, as an error
    pub fn authorize(&self, actor: &Actor, resource: Resource, action: Action) -> PermissionResult<()> {
        if self.check_access(actor.role, resource, action) {
            Ok(())
        } else {
            tracing::warn!(
                actor = %actor,
                resource = %resource,
                action = %action,
                "Permission denied"
            );
            Err(PermissionError::denied(actor, resource, action))
        }
    }

    /// Validate `policy` and swap it in. On error the current snapshot stays.
    pub fn reload(&self, policy: &Policy) -> PermissionResult<()> {
        let fresh = Snapshot::from_policy(policy)?;
        *self.write() = fresh;
        tracing::info!(
            permissions = policy.permissions.len(),
            roles = policy.grants.len(),
            "Permission policy reloaded"
        );
        Ok(())
    }

    /// Current contents as a policy document, sorted for stable output
    pub fn export(&self) -> Policy {
        let snapshot = self.read();
        let mut permissions: Vec<_> = snapshot.permissions.iter().copied().collect();
        permissions.sort();
        let grants = snapshot
            .grants
            .iter()
            .map(|(role, set)| {
                let mut granted: Vec<_> = set.iter().copied().collect();
                granted.sort();
                (*role, granted)
            })
            .collect();
        Policy {
            permissions,
            grants,
        }
    }
}
