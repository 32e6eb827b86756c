//! Read-side queries over events, notifications and subscriptions

use super::Collaborators;
use crate::domain::{
    AlarmEvent, AlarmId, DeviceId, EventType, Notification, NotificationId, NotificationStatus,
    Subscription, UserId,
};
use crate::error::{AlarmError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Event state relative to now
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventState {
    /// Finished at or before now
    Finished,
    /// Not finished, or finishing in the future
    Ongoing,
}

/// Event filter; unset fields match everything
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventFilter {
    pub state: Option<EventState>,
    /// Any of these devices
    pub devices: BTreeSet<DeviceId>,
    pub alarm: Option<AlarmId>,
    pub event_type: Option<EventType>,
}

impl EventFilter {
    pub fn matches(&self, event: &AlarmEvent, now: DateTime<Utc>) -> bool {
        let state_ok = match self.state {
            None => true,
            Some(EventState::Finished) => event.finished.is_some_and(|f| f <= now),
            Some(EventState::Ongoing) => event.finished.is_none_or(|f| f > now),
        };
        let device_ok =
            self.devices.is_empty() || event.device.is_some_and(|d| self.devices.contains(&d));

        state_ok
            && device_ok
            && self.alarm.is_none_or(|a| event.alarm == a)
            && self.event_type.is_none_or(|t| event.event_type == t)
    }
}

/// Notification filter; the time range applies to the event's creation time
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationFilter {
    pub user: Option<UserId>,
    pub status: Option<NotificationStatus>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
}

impl NotificationFilter {
    fn needs_event(&self) -> bool {
        self.created_after.is_some() || self.created_before.is_some()
    }

    fn matches(&self, notification: &Notification, event: Option<&AlarmEvent>) -> bool {
        if self.user.is_some_and(|u| notification.user != u) {
            return false;
        }
        if self.status.is_some_and(|s| notification.status != s) {
            return false;
        }
        if !self.needs_event() {
            return true;
        }
        let Some(created) = event.map(|e| e.created) else {
            return false;
        };
        self.created_after.is_none_or(|after| created >= after)
            && self.created_before.is_none_or(|before| created <= before)
    }
}

pub struct Queries {
    collab: Collaborators,
}

impl Queries {
    pub fn new(collab: Collaborators) -> Self {
        Self { collab }
    }

    pub fn events(&self, filter: &EventFilter) -> Result<Vec<AlarmEvent>> {
        let now = self.collab.clock.now();
        Ok(self
            .collab
            .repository
            .events()?
            .into_iter()
            .filter(|e| filter.matches(e, now))
            .collect())
    }

    /// Events of alarms the user is subscribed to, directly or through a group
    pub fn events_visible_to(
        &self,
        user: UserId,
        filter: &EventFilter,
    ) -> Result<Vec<AlarmEvent>> {
        let alarms: BTreeSet<AlarmId> = self
            .subscriptions_for_user(user)?
            .into_iter()
            .map(|s| s.alarm)
            .collect();
        Ok(self
            .events(filter)?
            .into_iter()
            .filter(|e| alarms.contains(&e.alarm))
            .collect())
    }

    pub fn notifications(&self, filter: &NotificationFilter) -> Result<Vec<Notification>> {
        let repository = &self.collab.repository;
        let events: HashMap<i64, AlarmEvent> = if filter.needs_event() {
            repository.events()?.into_iter().map(|e| (e.id, e)).collect()
        } else {
            HashMap::new()
        };

        Ok(repository
            .notifications()?
            .into_iter()
            .filter(|n| filter.matches(n, events.get(&n.event)))
            .collect())
    }

    pub fn mark_notification(
        &self,
        id: NotificationId,
        status: NotificationStatus,
    ) -> Result<Notification> {
        let repository = &self.collab.repository;
        let mut notification = repository
            .notification(id)?
            .ok_or_else(|| AlarmError::not_found(format!("notification {}", id)))?;
        notification.status = status;
        repository.update_notification(&notification)?;
        Ok(notification)
    }

    /// Subscriptions held by the user or by any of the user's groups
    pub fn subscriptions_for_user(&self, user: UserId) -> Result<Vec<Subscription>> {
        let user = self
            .collab
            .directory
            .user(user)?
            .ok_or_else(|| AlarmError::not_found(format!("user {}", user)))?;

        Ok(self
            .collab
            .repository
            .subscriptions()?
            .into_iter()
            .filter(|s| {
                s.user == Some(user.id) || s.group.is_some_and(|g| user.groups.contains(&g))
            })
            .collect())
    }
}
