//! Domain entities
//!
//! Identifiers are plain integers; `0` means "not yet stored" and is replaced
//! by the store on insert.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

pub type ProfileId = i64;
pub type DeviceId = i64;
pub type VariableId = i64;
pub type UserId = i64;
pub type GroupId = i64;
pub type MonitorId = i64;
pub type AlarmId = i64;
pub type EventId = i64;
pub type SubscriptionId = i64;
pub type NotificationId = i64;

// ============================================================================
// Device registry
// ============================================================================

/// Device profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub id: ProfileId,
    #[serde(default)]
    pub profile_type: String,
    pub name: String,
    #[serde(default)]
    pub slug: String,
}

/// Field device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    #[serde(default)]
    pub id: DeviceId,
    #[serde(default)]
    pub serial: String,
    pub name: String,
    #[serde(default)]
    pub connected: bool,
    #[serde(default)]
    pub profile: Option<ProfileId>,
}

/// Device variable; every value change is a trigger point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    #[serde(default)]
    pub id: VariableId,
    pub device: DeviceId,
    pub var_type: String,
    #[serde(default)]
    pub name: String,
    /// Not globally unique
    pub slug: String,
    #[serde(default)]
    pub value: i64,
}

// ============================================================================
// Directory
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(default)]
    pub id: UserId,
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub is_staff: bool,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub groups: BTreeSet<GroupId>,
}

impl User {
    /// Usable email address, if any
    pub fn email_address(&self) -> Option<&str> {
        self.email
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    #[serde(default)]
    pub id: GroupId,
    pub name: String,
}

/// Subscriber: exactly one user or one group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Principal {
    User(UserId),
    Group(GroupId),
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Principal::User(id) => write!(f, "user {}", id),
            Principal::Group(id) => write!(f, "group {}", id),
        }
    }
}

// ============================================================================
// Monitors and alarms
// ============================================================================

/// Monitor frequency tag (informational)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Frequency {
    #[default]
    #[serde(rename = "D", alias = "daily")]
    Daily,
    #[serde(rename = "S", alias = "weekly")]
    Weekly,
    #[serde(rename = "M", alias = "monthly")]
    Monthly,
    #[serde(rename = "A", alias = "yearly")]
    Yearly,
}

/// How a monitor selects its targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionMode {
    Devices,
    Variables,
    Lookup,
}

/// Governs which entities may trigger the alarms linked to it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Monitor {
    #[serde(default)]
    pub id: MonitorId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub devices: BTreeSet<DeviceId>,
    #[serde(default)]
    pub variables: BTreeSet<VariableId>,
    /// Lookup expression, empty when unused
    #[serde(default)]
    pub lookups: String,
    #[serde(default)]
    pub active: bool,
    /// Priority
    #[serde(default)]
    pub weight: i32,
    #[serde(default)]
    pub frequency: Frequency,
    /// Hours
    #[serde(default)]
    pub duration: f64,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
}

impl Monitor {
    pub fn has_lookup(&self) -> bool {
        !self.lookups.trim().is_empty()
    }

    /// Exactly one of devices / variables / lookup must be set
    pub fn selection_mode(&self) -> std::result::Result<SelectionMode, String> {
        let mut modes = Vec::with_capacity(3);
        if !self.devices.is_empty() {
            modes.push(SelectionMode::Devices);
        }
        if !self.variables.is_empty() {
            modes.push(SelectionMode::Variables);
        }
        if self.has_lookup() {
            modes.push(SelectionMode::Lookup);
        }
        match modes.as_slice() {
            [mode] => Ok(*mode),
            [] => Err("Select devices, variables or write a lookup".to_string()),
            _ => Err("Use only one of devices, variables or lookups".to_string()),
        }
    }
}

/// Alarm definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alarm {
    #[serde(default)]
    pub id: AlarmId,
    #[serde(default)]
    pub name: String,
    /// Unique; derived from the name when empty
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub creator: Option<UserId>,
    /// Template rendering to a boolean expression
    pub formula: String,
    /// Debounce window in hours
    #[serde(default)]
    pub duration: f64,
    /// Copied onto events
    #[serde(default = "default_description")]
    pub description: String,
    #[serde(default)]
    pub monitors: BTreeSet<MonitorId>,
}

// ============================================================================
// Events
// ============================================================================

/// Event type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventType {
    UserDriven,
    DeviceDriven,
    NoDevice,
}

impl EventType {
    pub fn code(&self) -> &'static str {
        match self {
            EventType::UserDriven => "US",
            EventType::DeviceDriven => "DV",
            EventType::NoDevice => "ND",
        }
    }
}

/// Opaque `(type-tag, id)` reference to an arbitrary entity
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RelatedObject {
    pub kind: String,
    pub id: i64,
}

impl RelatedObject {
    pub fn new(kind: impl Into<String>, id: i64) -> Self {
        Self {
            kind: kind.into(),
            id,
        }
    }
}

impl fmt::Display for RelatedObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// One alarm firing for one entity key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmEvent {
    pub id: EventId,
    pub alarm: AlarmId,
    pub event_type: EventType,
    pub created: DateTime<Utc>,
    /// `None` while open
    pub finished: Option<DateTime<Utc>>,
    pub device: Option<DeviceId>,
    pub variable: Option<VariableId>,
    pub related: BTreeSet<RelatedObject>,
    pub description: String,
}

impl AlarmEvent {
    pub fn is_open(&self) -> bool {
        self.finished.is_none()
    }

    /// No device, no variable and no related objects
    pub fn is_bare(&self) -> bool {
        self.device.is_none() && self.variable.is_none() && self.related.is_empty()
    }

    pub fn key(&self) -> EventKey {
        EventKey {
            alarm: self.alarm,
            device: self.device,
            variable: self.variable,
            related: self.related.clone(),
        }
    }

    /// `<type-code>-<id>`, e.g. `DV-12`
    pub fn display(&self) -> String {
        format!("{}-{}", self.event_type.code(), self.id)
    }
}

impl fmt::Display for AlarmEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.event_type.code(), self.id)
    }
}

/// Event to be inserted; the store assigns the id
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    pub alarm: AlarmId,
    pub event_type: EventType,
    pub created: DateTime<Utc>,
    pub device: Option<DeviceId>,
    pub variable: Option<VariableId>,
    pub related: BTreeSet<RelatedObject>,
    pub description: String,
}

/// Lifecycle key: an event is OPEN/CLOSED per exact key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventKey {
    pub alarm: AlarmId,
    pub device: Option<DeviceId>,
    pub variable: Option<VariableId>,
    pub related: BTreeSet<RelatedObject>,
}

impl EventKey {
    pub fn device(alarm: AlarmId, device: DeviceId, variable: Option<VariableId>) -> Self {
        Self {
            alarm,
            device: Some(device),
            variable,
            related: BTreeSet::new(),
        }
    }

    pub fn related(alarm: AlarmId, object: RelatedObject) -> Self {
        Self {
            alarm,
            device: None,
            variable: None,
            related: BTreeSet::from([object]),
        }
    }
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "alarm={}", self.alarm)?;
        if let Some(device) = self.device {
            write!(f, " device={}", device)?;
        }
        if let Some(variable) = self.variable {
            write!(f, " variable={}", variable)?;
        }
        for object in &self.related {
            write!(f, " related={}", object)?;
        }
        Ok(())
    }
}

// ============================================================================
// Subscriptions and notifications
// ============================================================================

/// Where the HTML body of a notification email comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateSource {
    /// Template file name
    Named(String),
    /// Inline template text
    Inline(String),
}

/// Binds one user or one group to one alarm
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    #[serde(default)]
    pub id: SubscriptionId,
    pub alarm: AlarmId,
    #[serde(default)]
    pub user: Option<UserId>,
    #[serde(default)]
    pub group: Option<GroupId>,
    #[serde(default = "default_true")]
    pub active: bool,
    /// Send email in addition to the in-app notification
    #[serde(default = "default_true")]
    pub email: bool,
    #[serde(default)]
    pub staff_template: Option<String>,
    #[serde(default)]
    pub user_template: Option<String>,
    #[serde(default)]
    pub staff_template_text: Option<String>,
    #[serde(default)]
    pub user_template_text: Option<String>,
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
}

impl Subscription {
    pub fn for_user(alarm: AlarmId, user: UserId) -> Self {
        Self::new(alarm, Some(user), None)
    }

    pub fn for_group(alarm: AlarmId, group: GroupId) -> Self {
        Self::new(alarm, None, Some(group))
    }

    fn new(alarm: AlarmId, user: Option<UserId>, group: Option<GroupId>) -> Self {
        Self {
            id: 0,
            alarm,
            user,
            group,
            active: true,
            email: true,
            staff_template: None,
            user_template: None,
            staff_template_text: None,
            user_template_text: None,
            created: None,
        }
    }

    /// The subscriber, or `None` when both or neither of user/group are set
    pub fn principal(&self) -> Option<Principal> {
        match (self.user, self.group) {
            (Some(user), None) => Some(Principal::User(user)),
            (None, Some(group)) => Some(Principal::Group(group)),
            _ => None,
        }
    }

    fn template_fields(&self) -> [Option<&str>; 4] {
        fn set(field: &Option<String>) -> Option<&str> {
            field.as_deref().filter(|s| !s.trim().is_empty())
        }
        [
            set(&self.staff_template),
            set(&self.staff_template_text),
            set(&self.user_template),
            set(&self.user_template_text),
        ]
    }

    /// Number of populated template sources
    pub fn template_count(&self) -> usize {
        self.template_fields().iter().flatten().count()
    }

    /// First populated source: staff file, staff text, user file, user text
    pub fn template_source(&self) -> Option<TemplateSource> {
        let [staff, staff_text, user, user_text] = self.template_fields();
        staff
            .map(|n| TemplateSource::Named(n.to_string()))
            .or_else(|| staff_text.map(|t| TemplateSource::Inline(t.to_string())))
            .or_else(|| user.map(|n| TemplateSource::Named(n.to_string())))
            .or_else(|| user_text.map(|t| TemplateSource::Inline(t.to_string())))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    Checked,
    #[default]
    Unchecked,
}

/// One per (user, event)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub user: UserId,
    pub event: EventId,
    pub status: NotificationStatus,
    pub created: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

fn default_description() -> String {
    "default".to_string()
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;

    fn monitor() -> Monitor {
        Monitor {
            id: 1,
            name: "m".to_string(),
            devices: BTreeSet::new(),
            variables: BTreeSet::new(),
            lookups: String::new(),
            active: true,
            weight: 0,
            frequency: Frequency::Daily,
            duration: 0.0,
            start_time: None,
        }
    }

    #[test]
    fn test_monitor_selection_mode() {
        let mut m = monitor();
        assert!(m.selection_mode().is_err());

        m.devices.insert(3);
        assert_eq!(m.selection_mode(), Ok(SelectionMode::Devices));

        m.lookups = "Q(slug='food')".to_string();
        assert!(m.selection_mode().is_err());

        m.devices.clear();
        assert_eq!(m.selection_mode(), Ok(SelectionMode::Lookup));

        m.lookups = "   ".to_string();
        m.variables.insert(9);
        assert_eq!(m.selection_mode(), Ok(SelectionMode::Variables));
    }

    #[test]
    fn test_template_precedence() {
        let mut sub = Subscription::for_user(1, 2);
        assert_eq!(sub.template_source(), None);
        assert_eq!(sub.template_count(), 0);

        sub.user_template_text = Some("<p>{{ alarm.name }}</p>".to_string());
        assert_eq!(
            sub.template_source(),
            Some(TemplateSource::Inline("<p>{{ alarm.name }}</p>".to_string()))
        );

        sub.user_template = Some("user.html".to_string());
        assert_eq!(
            sub.template_source(),
            Some(TemplateSource::Named("user.html".to_string()))
        );

        sub.staff_template_text = Some("<b>staff</b>".to_string());
        sub.staff_template = Some("staff.html".to_string());
        assert_eq!(
            sub.template_source(),
            Some(TemplateSource::Named("staff.html".to_string()))
        );
        assert_eq!(sub.template_count(), 4);

        // blank strings do not count as a source
        sub.staff_template = Some(" ".to_string());
        assert_eq!(
            sub.template_source(),
            Some(TemplateSource::Inline("<b>staff</b>".to_string()))
        );
    }

    #[test]
    fn test_principal() {
        let mut sub = Subscription::for_group(1, 5);
        assert_eq!(sub.principal(), Some(Principal::Group(5)));
        sub.user = Some(3);
        assert_eq!(sub.principal(), None);
        sub.user = None;
        sub.group = None;
        assert_eq!(sub.principal(), None);
    }

    #[test]
    fn test_event_display_and_serde_codes() {
        let event = AlarmEvent {
            id: 12,
            alarm: 1,
            event_type: EventType::DeviceDriven,
            created: Utc::now(),
            finished: None,
            device: Some(1),
            variable: None,
            related: BTreeSet::new(),
            description: String::new(),
        };
        assert_eq!(event.display(), "DV-12");
        assert_eq!(event.to_string(), "DV-12");
        assert!(event.is_open());
        assert!(!event.is_bare());

        assert_eq!(
            serde_json::to_string(&EventType::NoDevice).unwrap(),
            "\"no-device\""
        );
        assert_eq!(serde_json::to_string(&Frequency::Weekly).unwrap(), "\"S\"");
        let f: Frequency = serde_json::from_str("\"monthly\"").unwrap();
        assert_eq!(f, Frequency::Monthly);
    }
}
