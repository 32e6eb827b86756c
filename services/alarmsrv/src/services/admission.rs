//! Subscription admission control
//!
//! Every create and update passes the same checks before anything is
//! written. Checks and writes run under one gate so two concurrent creates
//! cannot both pass the uniqueness checks.

use super::Collaborators;
use crate::domain::{Principal, Subscription, SubscriptionId};
use crate::error::{AlarmError, Result};
use crate::permissions::CAN_SUBSCRIBE;
use parking_lot::Mutex;
use tracing::info;

/// Whether the subscription is new or already stored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionMode {
    Create,
    Update,
}

pub struct AdmissionControl {
    collab: Collaborators,
    gate: Mutex<()>,
}

impl AdmissionControl {
    pub fn new(collab: Collaborators) -> Self {
        Self {
            collab,
            gate: Mutex::new(()),
        }
    }

    /// Run every admission check without writing
    pub fn validate(&self, sub: &Subscription, mode: AdmissionMode) -> Result<()> {
        let principal = match (sub.user, sub.group) {
            (Some(_), Some(_)) => return Err(AlarmError::validation("Only user or only group")),
            (None, None) => return Err(AlarmError::validation("User or Group are required")),
            (Some(user), None) => Principal::User(user),
            (None, Some(group)) => Principal::Group(group),
        };

        if sub.template_count() > 1 {
            return Err(AlarmError::validation("Insert only a template!"));
        }

        let repository = &self.collab.repository;
        let directory = &self.collab.directory;

        if repository.alarm(sub.alarm)?.is_none() {
            return Err(AlarmError::not_found(format!("alarm {}", sub.alarm)));
        }

        let user = match principal {
            Principal::User(id) => Some(
                directory
                    .user(id)?
                    .ok_or_else(|| AlarmError::not_found(format!("user {}", id)))?,
            ),
            Principal::Group(id) => {
                if directory.group(id)?.is_none() {
                    return Err(AlarmError::not_found(format!("group {}", id)));
                }
                None
            },
        };

        if !self
            .collab
            .permissions
            .has_permission(principal, CAN_SUBSCRIBE, sub.alarm)
        {
            return Err(AlarmError::validation(match principal {
                Principal::User(_) => "User doesn't have permission to subscribe to this alarm",
                Principal::Group(_) => "Group doesn't have permission to subscribe to this alarm",
            }));
        }

        if let (AdmissionMode::Create, Some(user)) = (mode, user) {
            let existing = repository.subscriptions_for_alarm(sub.alarm)?;

            let covered = existing
                .iter()
                .any(|s| s.group.is_some_and(|g| user.groups.contains(&g)));
            if covered {
                return Err(AlarmError::validation(
                    "The user is subscribed to the same alarm for a group",
                ));
            }

            let duplicate = existing
                .iter()
                .any(|s| s.active && s.user == Some(user.id));
            if duplicate {
                return Err(AlarmError::validation("The user is subscribed to this alarm"));
            }
        }

        Ok(())
    }

    /// Admit and store a new subscription
    ///
    /// A group subscription deletes the members' individual subscriptions to
    /// the same alarm.
    pub fn create(&self, mut sub: Subscription) -> Result<Subscription> {
        let _gate = self.gate.lock();
        self.validate(&sub, AdmissionMode::Create)?;

        let repository = &self.collab.repository;
        if let Some(group) = sub.group {
            let members: Vec<i64> = self
                .collab
                .directory
                .group_members(group)?
                .into_iter()
                .map(|u| u.id)
                .collect();
            for existing in repository.subscriptions_for_alarm(sub.alarm)? {
                let superseded = existing.user.is_some_and(|u| members.contains(&u));
                if superseded && repository.delete_subscription(existing.id)? {
                    info!(
                        subscription = existing.id,
                        alarm = sub.alarm,
                        group = group,
                        "Individual subscription superseded by group"
                    );
                }
            }
        }

        sub.id = 0;
        sub.created = Some(self.collab.clock.now());
        let stored = repository.insert_subscription(sub)?;
        info!(
            subscription = stored.id,
            alarm = stored.alarm,
            user = ?stored.user,
            group = ?stored.group,
            "Subscription created"
        );
        Ok(stored)
    }

    /// Re-admit and store changes to an existing subscription
    ///
    /// The alarm and the principal cannot change.
    pub fn update(&self, sub: Subscription) -> Result<Subscription> {
        let _gate = self.gate.lock();
        self.update_locked(sub)
    }

    /// Toggle `active`; re-runs admission in update mode
    pub fn set_active(&self, id: SubscriptionId, active: bool) -> Result<Subscription> {
        let _gate = self.gate.lock();
        let mut sub = self.load(id)?;
        sub.active = active;
        self.update_locked(sub)
    }

    pub fn delete(&self, id: SubscriptionId) -> Result<bool> {
        let _gate = self.gate.lock();
        let removed = self.collab.repository.delete_subscription(id)?;
        if removed {
            info!(subscription = id, "Subscription deleted");
        }
        Ok(removed)
    }

    fn load(&self, id: SubscriptionId) -> Result<Subscription> {
        self.collab
            .repository
            .subscription(id)?
            .ok_or_else(|| AlarmError::not_found(format!("subscription {}", id)))
    }

    fn update_locked(&self, mut sub: Subscription) -> Result<Subscription> {
        let current = self.load(sub.id)?;
        if current.alarm != sub.alarm || current.user != sub.user || current.group != sub.group {
            return Err(AlarmError::validation(
                "The alarm and subscriber of a subscription cannot change",
            ));
        }
        self.validate(&sub, AdmissionMode::Update)?;

        sub.created = current.created;
        self.collab.repository.update_subscription(&sub)?;
        Ok(sub)
    }
}
