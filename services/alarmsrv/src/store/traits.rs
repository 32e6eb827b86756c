//! Trait definitions for storage abstraction

use crate::domain::{
    Alarm, AlarmEvent, AlarmId, Device, DeviceId, EventId, EventKey, Group, GroupId, Monitor,
    MonitorId, NewEvent, Notification, NotificationId, Profile, ProfileId, Subscription,
    SubscriptionId, User, UserId, Variable, VariableId,
};
use crate::error::Result;
use chrono::{DateTime, Utc};

/// Read access to the device registry (external, read-only to the engine)
pub trait DeviceRegistry: Send + Sync + 'static {
    fn profile(&self, id: ProfileId) -> Result<Option<Profile>>;

    fn device(&self, id: DeviceId) -> Result<Option<Device>>;

    fn variable(&self, id: VariableId) -> Result<Option<Variable>>;

    /// Variables of one device, ordered by id
    fn variables_of_device(&self, device: DeviceId) -> Result<Vec<Variable>>;

    /// Every variable, ordered by id
    fn all_variables(&self) -> Result<Vec<Variable>>;
}

/// Users and groups
pub trait Directory: Send + Sync + 'static {
    fn user(&self, id: UserId) -> Result<Option<User>>;

    fn group(&self, id: GroupId) -> Result<Option<Group>>;

    /// Members of a group, ordered by user id
    fn group_members(&self, group: GroupId) -> Result<Vec<User>>;
}

/// Persisted alarm state
///
/// Ids of `0` on save/insert are replaced by a freshly assigned id.
/// All list methods return rows ordered by id.
pub trait AlarmRepository: Send + Sync + 'static {
    // ========== Monitors ==========

    fn save_monitor(&self, monitor: Monitor) -> Result<Monitor>;

    fn monitor(&self, id: MonitorId) -> Result<Option<Monitor>>;

    fn monitors(&self) -> Result<Vec<Monitor>>;

    // ========== Alarms ==========

    fn save_alarm(&self, alarm: Alarm) -> Result<Alarm>;

    fn alarm(&self, id: AlarmId) -> Result<Option<Alarm>>;

    fn alarms(&self) -> Result<Vec<Alarm>>;

    /// Alarm holding this slug, if any
    fn alarm_by_slug(&self, slug: &str) -> Result<Option<Alarm>>;

    // ========== Events ==========

    fn insert_event(&self, event: NewEvent) -> Result<AlarmEvent>;

    /// Replace a stored event; fails if it does not exist
    fn update_event(&self, event: &AlarmEvent) -> Result<()>;

    fn event(&self, id: EventId) -> Result<Option<AlarmEvent>>;

    fn events(&self) -> Result<Vec<AlarmEvent>>;

    /// Most recently created event with exactly this key
    fn latest_event(&self, key: &EventKey) -> Result<Option<AlarmEvent>>;

    /// Unfinished events with exactly this key
    fn open_events(&self, key: &EventKey) -> Result<Vec<AlarmEvent>>;

    // ========== Subscriptions ==========

    fn insert_subscription(&self, subscription: Subscription) -> Result<Subscription>;

    fn update_subscription(&self, subscription: &Subscription) -> Result<()>;

    /// Returns whether a row was removed
    fn delete_subscription(&self, id: SubscriptionId) -> Result<bool>;

    fn subscription(&self, id: SubscriptionId) -> Result<Option<Subscription>>;

    fn subscriptions(&self) -> Result<Vec<Subscription>>;

    fn subscriptions_for_alarm(&self, alarm: AlarmId) -> Result<Vec<Subscription>>;

    // ========== Notifications ==========

    fn insert_notification(
        &self,
        user: UserId,
        event: EventId,
        created: DateTime<Utc>,
    ) -> Result<Notification>;

    fn update_notification(&self, notification: &Notification) -> Result<()>;

    fn notification(&self, id: NotificationId) -> Result<Option<Notification>>;

    fn notifications(&self) -> Result<Vec<Notification>>;
}
