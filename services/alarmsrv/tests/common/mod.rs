//! Common test utilities and helpers

#![allow(dead_code)]

use alarmsrv::domain::{
    Alarm, AlarmId, Device, DeviceId, Group, GroupId, Monitor, MonitorId, Principal, User,
    UserId, Variable, VariableId,
};
use alarmsrv::error::{AlarmError, Result};
use alarmsrv::mailer::{EmailMessage, EmailSender};
use alarmsrv::permissions::CAN_SUBSCRIBE;
use alarmsrv::services::{AlarmService, InMemoryBackend, TriggerReport};
use alarmsrv::store::MemoryStore;
use alarmsrv::time::{hours, FixedTimeProvider};
use alarmsrv::AlarmConfig;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Start of every test clock
pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

/// Service over an in-memory backend and a fixed clock
pub struct Fixture {
    pub service: AlarmService,
    pub backend: InMemoryBackend,
    pub clock: Arc<FixedTimeProvider>,
}

impl Fixture {
    pub fn new() -> Self {
        let clock = Arc::new(FixedTimeProvider::new(start()));
        let (service, backend) = AlarmService::in_memory(AlarmConfig::default(), clock.clone());
        Self {
            service,
            backend,
            clock,
        }
    }

    /// Same backend, but email goes through `mailer`
    pub fn with_mailer(mailer: Arc<dyn EmailSender>) -> Self {
        let config = AlarmConfig::default();
        let clock = Arc::new(FixedTimeProvider::new(start()));
        let backend = InMemoryBackend::new(&config);
        let mut collab = backend.collaborators(clock.clone());
        collab.mailer = mailer;
        Self {
            service: AlarmService::new(collab, config),
            backend,
            clock,
        }
    }

    pub fn store(&self) -> &MemoryStore {
        &self.backend.store
    }

    // ========== Seeding ==========

    /// Device 1 "Barn" with food (1) and water (2), both at 10
    pub fn barn(&self) {
        self.device(1, "Barn");
        self.variable(1, 1, "food", "barn-food", 10);
        self.variable(2, 1, "water", "barn-water", 10);
    }

    pub fn device(&self, id: DeviceId, name: &str) -> Device {
        self.store().upsert_device(Device {
            id,
            serial: format!("SN-{}", id),
            name: name.to_string(),
            connected: true,
            profile: None,
        })
    }

    pub fn variable(
        &self,
        id: VariableId,
        device: DeviceId,
        var_type: &str,
        slug: &str,
        value: i64,
    ) -> Variable {
        self.store().upsert_variable(Variable {
            id,
            device,
            var_type: var_type.to_string(),
            name: var_type.to_string(),
            slug: slug.to_string(),
            value,
        })
    }

    pub fn user(&self, id: UserId, username: &str, email: Option<&str>) -> User {
        self.store().upsert_user(User {
            id,
            username: username.to_string(),
            email: email.map(str::to_string),
            is_staff: false,
            is_active: true,
            groups: BTreeSet::new(),
        })
    }

    pub fn group(&self, id: GroupId, name: &str, members: &[UserId]) -> Group {
        let group = self.store().upsert_group(Group {
            id,
            name: name.to_string(),
        });
        for member in members {
            self.store().add_member(group.id, *member).unwrap();
        }
        group
    }

    pub fn grant_user(&self, user: UserId, alarm: AlarmId) {
        self.backend
            .grants
            .grant(Principal::User(user), CAN_SUBSCRIBE, alarm);
    }

    pub fn grant_group(&self, group: GroupId, alarm: AlarmId) {
        self.backend
            .grants
            .grant(Principal::Group(group), CAN_SUBSCRIBE, alarm);
    }

    pub fn device_monitor(&self, devices: &[DeviceId]) -> Monitor {
        self.service
            .save_monitor(Monitor {
                devices: devices.iter().copied().collect(),
                active: true,
                ..blank_monitor()
            })
            .unwrap()
    }

    pub fn variable_monitor(&self, variables: &[VariableId]) -> Monitor {
        self.service
            .save_monitor(Monitor {
                variables: variables.iter().copied().collect(),
                active: true,
                ..blank_monitor()
            })
            .unwrap()
    }

    pub fn lookup_monitor(&self, lookup: &str) -> Monitor {
        self.service
            .save_monitor(Monitor {
                lookups: lookup.to_string(),
                active: true,
                ..blank_monitor()
            })
            .unwrap()
    }

    /// Alarm with a one hour debounce window
    pub fn alarm(&self, name: &str, formula: &str, monitors: &[MonitorId]) -> Alarm {
        self.service
            .save_alarm(Alarm {
                name: name.to_string(),
                formula: formula.to_string(),
                duration: 1.0,
                monitors: monitors.iter().copied().collect(),
                ..blank_alarm()
            })
            .unwrap()
    }

    // ========== Changes ==========

    /// Store a new value and run the variable trigger
    pub fn set(&self, variable: VariableId, value: i64) -> TriggerReport {
        self.store().set_variable_value(variable, value).unwrap();
        self.service.on_variable_changed(variable).unwrap()
    }

    /// Store a new value and run the device trigger for its device
    pub fn set_and_touch(&self, variable: VariableId, value: i64) -> TriggerReport {
        let variable = self.store().set_variable_value(variable, value).unwrap();
        self.service.on_device_changed(variable.device).unwrap()
    }

    pub fn touch(&self, device: DeviceId) -> TriggerReport {
        self.service.on_device_changed(device).unwrap()
    }

    pub fn advance(&self, h: f64) {
        self.clock.advance(hours(h));
    }
}

pub fn blank_monitor() -> Monitor {
    Monitor {
        id: 0,
        name: String::new(),
        devices: BTreeSet::new(),
        variables: BTreeSet::new(),
        lookups: String::new(),
        active: false,
        weight: 0,
        frequency: Default::default(),
        duration: 0.0,
        start_time: None,
    }
}

pub fn blank_alarm() -> Alarm {
    Alarm {
        id: 0,
        name: String::new(),
        slug: String::new(),
        creator: None,
        formula: String::new(),
        duration: 0.0,
        description: "default".to_string(),
        monitors: BTreeSet::new(),
    }
}

/// Reason carried by a validation error
pub fn reason(err: AlarmError) -> String {
    match err {
        AlarmError::Validation(msg) => msg,
        other => panic!("expected a validation error, got {:?}", other),
    }
}

// ============================================================================
// Failing mailer
// ============================================================================

/// Records every attempt; fails messages carrying HTML, or everything
#[derive(Debug, Default)]
pub struct FailingMailer {
    fail_all: bool,
    attempts: Mutex<Vec<EmailMessage>>,
}

impl FailingMailer {
    /// Rejects any message with an HTML part
    pub fn html() -> Self {
        Self::default()
    }

    /// Rejects every message
    pub fn always() -> Self {
        Self {
            fail_all: true,
            attempts: Mutex::new(Vec::new()),
        }
    }

    pub fn attempts(&self) -> Vec<EmailMessage> {
        self.attempts.lock().clone()
    }
}

impl EmailSender for FailingMailer {
    fn send(&self, message: &EmailMessage) -> Result<()> {
        self.attempts.lock().push(message.clone());
        if self.fail_all || message.html.is_some() {
            return Err(AlarmError::mail("smtp unavailable"));
        }
        Ok(())
    }
}
