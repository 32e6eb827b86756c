//! Scenario replay
//!
//! A scenario is a YAML document that seeds the in-memory backend and then
//! applies a list of changes through the engine:
//!
//! ```yaml
//! start: 2024-01-01T00:00:00Z
//! devices:
//!   - { id: 1, name: Barn }
//! variables:
//!   - { id: 1, device: 1, var_type: food, slug: food, value: 10 }
//! monitors:
//!   - { id: 1, devices: [1], active: true }
//! alarms:
//!   - { name: Low food, formula: "{{ vars.food.value }} < 5", monitors: [1] }
//! steps:
//!   - { action: set_variable, variable: 1, value: 3 }
//!   - { action: touch_device, device: 1 }
//!   - { action: advance, hours: 2 }
//! ```
//!
//! Configuration entities (monitors, alarms, subscriptions) go through the
//! same validation as any other write.

use crate::domain::{
    Alarm, AlarmEvent, AlarmId, Device, DeviceId, Group, GroupId, Monitor, Notification,
    Principal, Profile, RelatedObject, Subscription, User, UserId, Variable, VariableId,
};
use crate::error::{AlarmError, Result};
use crate::mailer::EmailMessage;
use crate::permissions::CAN_SUBSCRIBE;
use crate::services::{
    AlarmService, EventFilter, GenericSubject, InMemoryBackend, NotificationFilter, TriggerReport,
};
use crate::store::{AlarmRepository, DeviceRegistry};
use crate::time::{hours, FixedTimeProvider};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::info;

/// `can_subscribe` grant for one principal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grant {
    #[serde(default)]
    pub user: Option<UserId>,
    #[serde(default)]
    pub group: Option<GroupId>,
    pub alarm: AlarmId,
}

/// One change applied to the system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    /// New variable value, then the variable trigger
    SetVariable { variable: VariableId, value: i64 },
    /// Device save, optionally changing connectivity, then the device trigger
    TouchDevice {
        device: DeviceId,
        #[serde(default)]
        connected: Option<bool>,
    },
    /// Move the clock forward
    Advance { hours: f64 },
    /// Evaluate one alarm against an arbitrary entity
    Generic {
        alarm: AlarmId,
        subject: GenericSubject,
    },
    /// Record a user-driven event
    Manual {
        alarm: AlarmId,
        #[serde(default)]
        description: Option<String>,
        #[serde(default)]
        related: BTreeSet<RelatedObject>,
    },
}

impl Step {
    fn name(&self) -> &'static str {
        match self {
            Step::SetVariable { .. } => "set_variable",
            Step::TouchDevice { .. } => "touch_device",
            Step::Advance { .. } => "advance",
            Step::Generic { .. } => "generic",
            Step::Manual { .. } => "manual",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Scenario {
    /// Clock start; now when absent
    pub start: Option<DateTime<Utc>>,
    pub profiles: Vec<Profile>,
    pub devices: Vec<Device>,
    pub variables: Vec<Variable>,
    pub users: Vec<User>,
    pub groups: Vec<Group>,
    pub grants: Vec<Grant>,
    pub monitors: Vec<Monitor>,
    pub alarms: Vec<Alarm>,
    pub subscriptions: Vec<Subscription>,
    /// Named templates registered ahead of the template directory
    pub templates: BTreeMap<String, String>,
    pub steps: Vec<Step>,
}

/// Result of one applied step
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepOutcome {
    pub index: usize,
    pub action: &'static str,
    pub at: DateTime<Utc>,
    pub report: TriggerReport,
}

/// Final state after a replay
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplayOutcome {
    pub steps: Vec<StepOutcome>,
    pub events: Vec<AlarmEvent>,
    pub notifications: Vec<Notification>,
    pub emails: Vec<EmailMessage>,
}

impl Scenario {
    pub fn from_yaml(text: &str) -> Result<Self> {
        serde_yaml::from_str(text)
            .map_err(|e| AlarmError::config(format!("invalid scenario: {}", e)))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml(&text)
    }

    /// Seed the backend, then apply every step in order
    pub fn run(
        &self,
        service: &AlarmService,
        backend: &InMemoryBackend,
        clock: &FixedTimeProvider,
    ) -> Result<ReplayOutcome> {
        if let Some(start) = self.start {
            clock.set(start);
        }
        self.seed(service, backend)?;

        let mut steps = Vec::with_capacity(self.steps.len());
        for (index, step) in self.steps.iter().enumerate() {
            let report = apply_step(step, service, backend, clock)?;
            info!(
                step = index,
                action = step.name(),
                opened = report.opened.len(),
                closed = report.closed.len(),
                errors = report.errors,
                "Scenario step applied"
            );
            steps.push(StepOutcome {
                index,
                action: step.name(),
                at: service.collaborators().clock.now(),
                report,
            });
        }

        Ok(ReplayOutcome {
            steps,
            events: service.events(&EventFilter::default())?,
            notifications: service.notifications(&NotificationFilter::default())?,
            emails: backend.mailer.sent(),
        })
    }

    fn seed(&self, service: &AlarmService, backend: &InMemoryBackend) -> Result<()> {
        let store = &backend.store;
        for profile in &self.profiles {
            store.upsert_profile(profile.clone());
        }
        for device in &self.devices {
            store.upsert_device(device.clone());
        }
        for variable in &self.variables {
            store.upsert_variable(variable.clone());
        }
        for group in &self.groups {
            store.upsert_group(group.clone());
        }
        for user in &self.users {
            store.upsert_user(user.clone());
        }
        for (name, body) in &self.templates {
            backend.templates.insert(name, body)?;
        }

        for monitor in &self.monitors {
            service.save_monitor(monitor.clone())?;
        }
        for alarm in &self.alarms {
            service.save_alarm(alarm.clone())?;
        }
        for grant in &self.grants {
            let principal = match (grant.user, grant.group) {
                (Some(user), None) => Principal::User(user),
                (None, Some(group)) => Principal::Group(group),
                _ => {
                    return Err(AlarmError::config(format!(
                        "grant for alarm {} needs exactly one of user or group",
                        grant.alarm
                    )))
                },
            };
            backend.grants.grant(principal, CAN_SUBSCRIBE, grant.alarm);
        }
        for subscription in &self.subscriptions {
            service.create_subscription(subscription.clone())?;
        }

        info!(
            devices = self.devices.len(),
            variables = self.variables.len(),
            monitors = store.monitors()?.len(),
            alarms = store.alarms()?.len(),
            "Scenario seeded"
        );
        Ok(())
    }
}

fn apply_step(
    step: &Step,
    service: &AlarmService,
    backend: &InMemoryBackend,
    clock: &FixedTimeProvider,
) -> Result<TriggerReport> {
    let store = &backend.store;
    match step {
        Step::SetVariable { variable, value } => {
            store.set_variable_value(*variable, *value)?;
            service.on_variable_changed(*variable)
        },
        Step::TouchDevice { device, connected } => {
            if let Some(connected) = connected {
                let mut current = store
                    .device(*device)?
                    .ok_or_else(|| AlarmError::not_found(format!("device {}", device)))?;
                current.connected = *connected;
                store.upsert_device(current);
            }
            service.on_device_changed(*device)
        },
        Step::Advance { hours: h } => {
            clock.advance(hours(*h));
            Ok(TriggerReport::default())
        },
        Step::Generic { alarm, subject } => service.on_generic_entity(subject, *alarm),
        Step::Manual {
            alarm,
            description,
            related,
        } => {
            let (event, fanout) =
                service.record_manual_event(*alarm, description.clone(), related.clone())?;
            Ok(TriggerReport {
                opened: vec![event.id],
                notifications: fanout.notifications,
                emails: fanout.emails,
                ..Default::default()
            })
        },
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;
    use crate::config::AlarmConfig;
    use std::sync::Arc;
    use tracing_test::traced_test;

    const SCENARIO: &str = r#"
start: 2024-01-01T00:00:00Z
devices:
  - { id: 1, name: Barn }
variables:
  - { id: 1, device: 1, var_type: food, slug: food, value: 10 }
users:
  - { id: 1, username: ana, email: ana@example.com }
monitors:
  - { id: 1, devices: [1], active: true }
alarms:
  - { id: 1, name: Low food, formula: "{{ vars.food.value }} < 5", duration: 1, monitors: [1] }
grants:
  - { user: 1, alarm: 1 }
subscriptions:
  - { alarm: 1, user: 1 }
templates:
  mail.txt: "{{ alarm.name }} on {{ device.name }}"
steps:
  - { action: set_variable, variable: 1, value: 3 }
  - { action: touch_device, device: 1 }
  - { action: touch_device, device: 1 }
  - { action: set_variable, variable: 1, value: 20 }
  - { action: touch_device, device: 1 }
  - { action: advance, hours: 2 }
  - { action: set_variable, variable: 1, value: 1 }
  - { action: touch_device, device: 1 }
"#;

    #[test]
    fn test_replay_device_scenario() {
        let scenario = Scenario::from_yaml(SCENARIO).unwrap();
        assert_eq!(scenario.steps.len(), 8);

        let clock = Arc::new(FixedTimeProvider::from_millis(0));
        let (service, backend) = AlarmService::in_memory(AlarmConfig::default(), clock.clone());
        let outcome = scenario.run(&service, &backend, &clock).unwrap();

        // opened on the first touch, ignored while open, closed, re-opened after the window
        assert_eq!(outcome.steps[1].report.opened.len(), 1);
        assert!(outcome.steps[2].report.opened.is_empty());
        assert_eq!(outcome.steps[4].report.closed.len(), 1);
        assert_eq!(outcome.steps[7].report.opened.len(), 1);

        assert_eq!(outcome.events.len(), 2);
        assert_eq!(outcome.events[0].variable, Some(1));
        assert_eq!(outcome.notifications.len(), 2);
        assert_eq!(outcome.emails.len(), 2);
        assert_eq!(outcome.emails[0].body, "Low food on Barn");
        assert_eq!(outcome.emails[0].subject, "Event Alert: DV-1");
    }

    #[test]
    #[traced_test]
    fn test_replay_logs_skipped_formula() {
        let text = SCENARIO.replace("{{ vars.food.value }} < 5", "{{ vars.food.value } < 5");
        let scenario = Scenario::from_yaml(&text).unwrap();

        let clock = Arc::new(FixedTimeProvider::from_millis(0));
        let (service, backend) = AlarmService::in_memory(AlarmConfig::default(), clock.clone());
        let outcome = scenario.run(&service, &backend, &clock).unwrap();

        assert!(outcome.events.is_empty());
        assert_eq!(outcome.steps[1].report.errors, 1);
        assert!(logs_contain("Formula evaluation failed"));
        assert!(logs_contain("Scenario step applied"));
    }

    #[test]
    fn test_invalid_scenario() {
        let err = Scenario::from_yaml("steps:\n  - { action: explode }").unwrap_err();
        assert!(matches!(err, AlarmError::Config(_)));
    }
}
