//! In-memory store implementation
//!
//! All tables live behind one `parking_lot::RwLock`, so every trait call is
//! atomic with respect to the others. Used by tests and scenario replay.

use super::traits::{AlarmRepository, DeviceRegistry, Directory};
use crate::domain::{
    Alarm, AlarmEvent, AlarmId, Device, DeviceId, EventId, EventKey, Group, GroupId, Monitor,
    MonitorId, NewEvent, Notification, NotificationId, NotificationStatus, Profile, ProfileId,
    Subscription, SubscriptionId, User, UserId, Variable, VariableId,
};
use crate::error::{AlarmError, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// One table with its id sequence
#[derive(Debug)]
struct Table<T> {
    rows: BTreeMap<i64, T>,
    last_id: i64,
}

impl<T> Default for Table<T> {
    fn default() -> Self {
        Self {
            rows: BTreeMap::new(),
            last_id: 0,
        }
    }
}

impl<T: Clone> Table<T> {
    /// Keep a caller-chosen id, or hand out the next one for `0`
    fn assign(&mut self, id: i64) -> i64 {
        if id > 0 {
            self.last_id = self.last_id.max(id);
            id
        } else {
            self.last_id += 1;
            self.last_id
        }
    }

    fn get(&self, id: i64) -> Option<T> {
        self.rows.get(&id).cloned()
    }

    fn all(&self) -> Vec<T> {
        self.rows.values().cloned().collect()
    }

    fn replace(&mut self, id: i64, row: T, what: &str) -> Result<()> {
        match self.rows.get_mut(&id) {
            Some(slot) => {
                *slot = row;
                Ok(())
            },
            None => Err(AlarmError::not_found(format!("{} {}", what, id))),
        }
    }
}

#[derive(Debug, Default)]
struct Tables {
    profiles: Table<Profile>,
    devices: Table<Device>,
    variables: Table<Variable>,
    users: Table<User>,
    groups: Table<Group>,
    monitors: Table<Monitor>,
    alarms: Table<Alarm>,
    events: Table<AlarmEvent>,
    subscriptions: Table<Subscription>,
    notifications: Table<Notification>,
}

/// In-memory implementation of every store trait
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ========== Registry and directory mutation ==========

    pub fn upsert_profile(&self, mut profile: Profile) -> Profile {
        let mut tables = self.tables.write();
        profile.id = tables.profiles.assign(profile.id);
        tables.profiles.rows.insert(profile.id, profile.clone());
        profile
    }

    pub fn upsert_device(&self, mut device: Device) -> Device {
        let mut tables = self.tables.write();
        device.id = tables.devices.assign(device.id);
        tables.devices.rows.insert(device.id, device.clone());
        device
    }

    pub fn upsert_variable(&self, mut variable: Variable) -> Variable {
        let mut tables = self.tables.write();
        variable.id = tables.variables.assign(variable.id);
        tables.variables.rows.insert(variable.id, variable.clone());
        variable
    }

    /// Update the current value of a variable
    pub fn set_variable_value(&self, id: VariableId, value: i64) -> Result<Variable> {
        let mut tables = self.tables.write();
        let variable = tables
            .variables
            .rows
            .get_mut(&id)
            .ok_or_else(|| AlarmError::not_found(format!("variable {}", id)))?;
        variable.value = value;
        Ok(variable.clone())
    }

    pub fn upsert_user(&self, mut user: User) -> User {
        let mut tables = self.tables.write();
        user.id = tables.users.assign(user.id);
        tables.users.rows.insert(user.id, user.clone());
        user
    }

    pub fn upsert_group(&self, mut group: Group) -> Group {
        let mut tables = self.tables.write();
        group.id = tables.groups.assign(group.id);
        tables.groups.rows.insert(group.id, group.clone());
        group
    }

    /// Add a user to a group
    pub fn add_member(&self, group: GroupId, user: UserId) -> Result<()> {
        let mut tables = self.tables.write();
        if !tables.groups.rows.contains_key(&group) {
            return Err(AlarmError::not_found(format!("group {}", group)));
        }
        let user = tables
            .users
            .rows
            .get_mut(&user)
            .ok_or_else(|| AlarmError::not_found(format!("user {}", user)))?;
        user.groups.insert(group);
        Ok(())
    }

    /// Clear all data
    pub fn clear(&self) {
        *self.tables.write() = Tables::default();
    }
}

impl DeviceRegistry for MemoryStore {
    fn profile(&self, id: ProfileId) -> Result<Option<Profile>> {
        Ok(self.tables.read().profiles.get(id))
    }

    fn device(&self, id: DeviceId) -> Result<Option<Device>> {
        Ok(self.tables.read().devices.get(id))
    }

    fn variable(&self, id: VariableId) -> Result<Option<Variable>> {
        Ok(self.tables.read().variables.get(id))
    }

    fn variables_of_device(&self, device: DeviceId) -> Result<Vec<Variable>> {
        Ok(self
            .tables
            .read()
            .variables
            .rows
            .values()
            .filter(|v| v.device == device)
            .cloned()
            .collect())
    }

    fn all_variables(&self) -> Result<Vec<Variable>> {
        Ok(self.tables.read().variables.all())
    }
}

impl Directory for MemoryStore {
    fn user(&self, id: UserId) -> Result<Option<User>> {
        Ok(self.tables.read().users.get(id))
    }

    fn group(&self, id: GroupId) -> Result<Option<Group>> {
        Ok(self.tables.read().groups.get(id))
    }

    fn group_members(&self, group: GroupId) -> Result<Vec<User>> {
        Ok(self
            .tables
            .read()
            .users
            .rows
            .values()
            .filter(|u| u.groups.contains(&group))
            .cloned()
            .collect())
    }
}

impl AlarmRepository for MemoryStore {
    // ========== Monitors ==========

    fn save_monitor(&self, mut monitor: Monitor) -> Result<Monitor> {
        let mut tables = self.tables.write();
        monitor.id = tables.monitors.assign(monitor.id);
        tables.monitors.rows.insert(monitor.id, monitor.clone());
        Ok(monitor)
    }

    fn monitor(&self, id: MonitorId) -> Result<Option<Monitor>> {
        Ok(self.tables.read().monitors.get(id))
    }

    fn monitors(&self) -> Result<Vec<Monitor>> {
        Ok(self.tables.read().monitors.all())
    }

    // ========== Alarms ==========

    fn save_alarm(&self, mut alarm: Alarm) -> Result<Alarm> {
        let mut tables = self.tables.write();
        let clash = tables
            .alarms
            .rows
            .values()
            .any(|a| a.slug == alarm.slug && a.id != alarm.id);
        if clash {
            return Err(AlarmError::store(format!(
                "duplicate alarm slug '{}'",
                alarm.slug
            )));
        }
        alarm.id = tables.alarms.assign(alarm.id);
        tables.alarms.rows.insert(alarm.id, alarm.clone());
        Ok(alarm)
    }

    fn alarm(&self, id: AlarmId) -> Result<Option<Alarm>> {
        Ok(self.tables.read().alarms.get(id))
    }

    fn alarms(&self) -> Result<Vec<Alarm>> {
        Ok(self.tables.read().alarms.all())
    }

    fn alarm_by_slug(&self, slug: &str) -> Result<Option<Alarm>> {
        Ok(self
            .tables
            .read()
            .alarms
            .rows
            .values()
            .find(|a| a.slug == slug)
            .cloned())
    }

    // ========== Events ==========

    fn insert_event(&self, event: NewEvent) -> Result<AlarmEvent> {
        let mut tables = self.tables.write();
        let id = tables.events.assign(0);
        let event = AlarmEvent {
            id,
            alarm: event.alarm,
            event_type: event.event_type,
            created: event.created,
            finished: None,
            device: event.device,
            variable: event.variable,
            related: event.related,
            description: event.description,
        };
        tables.events.rows.insert(id, event.clone());
        Ok(event)
    }

    fn update_event(&self, event: &AlarmEvent) -> Result<()> {
        self.tables
            .write()
            .events
            .replace(event.id, event.clone(), "event")
    }

    fn event(&self, id: EventId) -> Result<Option<AlarmEvent>> {
        Ok(self.tables.read().events.get(id))
    }

    fn events(&self) -> Result<Vec<AlarmEvent>> {
        Ok(self.tables.read().events.all())
    }

    fn latest_event(&self, key: &EventKey) -> Result<Option<AlarmEvent>> {
        Ok(self
            .tables
            .read()
            .events
            .rows
            .values()
            .filter(|e| e.key() == *key)
            .max_by_key(|e| (e.created, e.id))
            .cloned())
    }

    fn open_events(&self, key: &EventKey) -> Result<Vec<AlarmEvent>> {
        Ok(self
            .tables
            .read()
            .events
            .rows
            .values()
            .filter(|e| e.is_open() && e.key() == *key)
            .cloned()
            .collect())
    }

    // ========== Subscriptions ==========

    fn insert_subscription(&self, mut subscription: Subscription) -> Result<Subscription> {
        let mut tables = self.tables.write();
        subscription.id = tables.subscriptions.assign(subscription.id);
        tables
            .subscriptions
            .rows
            .insert(subscription.id, subscription.clone());
        Ok(subscription)
    }

    fn update_subscription(&self, subscription: &Subscription) -> Result<()> {
        self.tables.write().subscriptions.replace(
            subscription.id,
            subscription.clone(),
            "subscription",
        )
    }

    fn delete_subscription(&self, id: SubscriptionId) -> Result<bool> {
        Ok(self.tables.write().subscriptions.rows.remove(&id).is_some())
    }

    fn subscription(&self, id: SubscriptionId) -> Result<Option<Subscription>> {
        Ok(self.tables.read().subscriptions.get(id))
    }

    fn subscriptions(&self) -> Result<Vec<Subscription>> {
        Ok(self.tables.read().subscriptions.all())
    }

    fn subscriptions_for_alarm(&self, alarm: AlarmId) -> Result<Vec<Subscription>> {
        Ok(self
            .tables
            .read()
            .subscriptions
            .rows
            .values()
            .filter(|s| s.alarm == alarm)
            .cloned()
            .collect())
    }

    // ========== Notifications ==========

    fn insert_notification(
        &self,
        user: UserId,
        event: EventId,
        created: DateTime<Utc>,
    ) -> Result<Notification> {
        let mut tables = self.tables.write();
        let id = tables.notifications.assign(0);
        let notification = Notification {
            id,
            user,
            event,
            status: NotificationStatus::Unchecked,
            created,
        };
        tables.notifications.rows.insert(id, notification.clone());
        Ok(notification)
    }

    fn update_notification(&self, notification: &Notification) -> Result<()> {
        self.tables.write().notifications.replace(
            notification.id,
            notification.clone(),
            "notification",
        )
    }

    fn notification(&self, id: NotificationId) -> Result<Option<Notification>> {
        Ok(self.tables.read().notifications.get(id))
    }

    fn notifications(&self) -> Result<Vec<Notification>> {
        Ok(self.tables.read().notifications.all())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;
    use crate::domain::EventType;
    use chrono::Duration;
    use std::collections::BTreeSet;

    fn new_event(alarm: AlarmId, device: DeviceId, created: DateTime<Utc>) -> NewEvent {
        NewEvent {
            alarm,
            event_type: EventType::DeviceDriven,
            created,
            device: Some(device),
            variable: None,
            related: BTreeSet::new(),
            description: "default".to_string(),
        }
    }

    #[test]
    fn test_ids_are_assigned() {
        let store = MemoryStore::new();
        let a = store.upsert_group(Group {
            id: 0,
            name: "ops".to_string(),
        });
        let b = store.upsert_group(Group {
            id: 7,
            name: "field".to_string(),
        });
        let c = store.upsert_group(Group {
            id: 0,
            name: "night".to_string(),
        });
        assert_eq!((a.id, b.id, c.id), (1, 7, 8));
    }

    #[test]
    fn test_latest_and_open_events_by_exact_key() {
        let store = MemoryStore::new();
        let t0 = Utc::now();

        let first = store.insert_event(new_event(1, 5, t0)).unwrap();
        let second = store
            .insert_event(new_event(1, 5, t0 + Duration::minutes(1)))
            .unwrap();
        store.insert_event(new_event(2, 5, t0)).unwrap();

        let key = EventKey::device(1, 5, None);
        assert_eq!(store.latest_event(&key).unwrap().map(|e| e.id), Some(second.id));
        assert_eq!(store.open_events(&key).unwrap().len(), 2);

        let mut closed = first.clone();
        closed.finished = Some(t0);
        store.update_event(&closed).unwrap();
        assert_eq!(store.open_events(&key).unwrap().len(), 1);

        // a variable-scoped key is a different key
        let narrower = EventKey::device(1, 5, Some(3));
        assert!(store.latest_event(&narrower).unwrap().is_none());
    }

    #[test]
    fn test_set_variable_value_and_missing_rows() {
        let store = MemoryStore::new();
        let var = store.upsert_variable(Variable {
            id: 0,
            device: 1,
            var_type: "food".to_string(),
            name: "Food".to_string(),
            slug: "food".to_string(),
            value: 0,
        });
        assert_eq!(store.set_variable_value(var.id, 42).unwrap().value, 42);
        assert!(matches!(
            store.set_variable_value(99, 1),
            Err(AlarmError::NotFound(_))
        ));

        let missing = Notification {
            id: 5,
            user: 1,
            event: 1,
            status: NotificationStatus::Checked,
            created: Utc::now(),
        };
        assert!(store.update_notification(&missing).is_err());
    }

    #[test]
    fn test_group_members() {
        let store = MemoryStore::new();
        let group = store.upsert_group(Group {
            id: 0,
            name: "ops".to_string(),
        });
        let user = store.upsert_user(User {
            id: 0,
            username: "ana".to_string(),
            email: None,
            is_staff: false,
            is_active: true,
            groups: BTreeSet::new(),
        });
        assert!(store.group_members(group.id).unwrap().is_empty());

        store.add_member(group.id, user.id).unwrap();
        let members = store.group_members(group.id).unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].username, "ana");
        assert!(store.add_member(99, user.id).is_err());
    }
}
