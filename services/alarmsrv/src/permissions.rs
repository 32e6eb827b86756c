//! Permission checks for subscription admission

use crate::domain::{AlarmId, Principal};
use parking_lot::RwLock;
use std::collections::HashSet;

/// Action checked before a subscription is admitted
pub const CAN_SUBSCRIBE: &str = "can_subscribe";

/// Capability check injected into admission control
pub trait PermissionChecker: Send + Sync + 'static {
    fn has_permission(&self, principal: Principal, action: &str, alarm: AlarmId) -> bool;
}

/// Explicit per-object grants
///
/// A user's group grants are not inherited; each principal is checked on its own.
#[derive(Debug, Default)]
pub struct GrantTable {
    grants: RwLock<HashSet<(Principal, String, AlarmId)>>,
}

impl GrantTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(&self, principal: Principal, action: &str, alarm: AlarmId) {
        self.grants
            .write()
            .insert((principal, action.to_string(), alarm));
    }

    /// Returns whether the grant existed
    pub fn revoke(&self, principal: Principal, action: &str, alarm: AlarmId) -> bool {
        self.grants
            .write()
            .remove(&(principal, action.to_string(), alarm))
    }
}

impl PermissionChecker for GrantTable {
    fn has_permission(&self, principal: Principal, action: &str, alarm: AlarmId) -> bool {
        self.grants
            .read()
            .contains(&(principal, action.to_string(), alarm))
    }
}
