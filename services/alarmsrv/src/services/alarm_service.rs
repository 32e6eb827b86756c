//! Alarm service facade
//!
//! Wires the components over one set of collaborators. The entity-mutation
//! boundary calls `on_device_changed` / `on_variable_changed` explicitly after
//! every write.

use super::admin::ConfigAdmin;
use super::admission::{AdmissionControl, AdmissionMode};
use super::fanout::{FanOut, FanOutReport};
use super::queries::{EventFilter, NotificationFilter, Queries};
use super::selector::{ChangedEntity, MonitorSelector, MonitorTargets};
use super::trigger::{GenericSubject, TriggerEngine, TriggerReport};
use super::Collaborators;
use crate::config::AlarmConfig;
use crate::domain::{
    Alarm, AlarmEvent, AlarmId, DeviceId, Monitor, MonitorId, Notification, NotificationId,
    NotificationStatus, RelatedObject, Subscription, SubscriptionId, UserId, VariableId,
};
use crate::error::{AlarmError, Result};
use crate::mailer::LogMailer;
use crate::permissions::GrantTable;
use crate::store::MemoryStore;
use crate::templates::FileTemplateRenderer;
use crate::time::TimeProvider;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::info;

/// In-memory collaborators, kept as concrete handles for seeding and inspection
#[derive(Clone)]
pub struct InMemoryBackend {
    pub store: Arc<MemoryStore>,
    pub grants: Arc<GrantTable>,
    pub templates: Arc<FileTemplateRenderer>,
    pub mailer: Arc<LogMailer>,
}

impl InMemoryBackend {
    pub fn new(config: &AlarmConfig) -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            grants: Arc::new(GrantTable::new()),
            templates: Arc::new(FileTemplateRenderer::from_config(&config.templates)),
            mailer: Arc::new(LogMailer::new()),
        }
    }

    pub fn collaborators(&self, clock: Arc<dyn TimeProvider>) -> Collaborators {
        Collaborators {
            registry: self.store.clone(),
            directory: self.store.clone(),
            repository: self.store.clone(),
            permissions: self.grants.clone(),
            templates: self.templates.clone(),
            mailer: self.mailer.clone(),
            clock,
        }
    }
}

pub struct AlarmService {
    collab: Collaborators,
    config: AlarmConfig,
    selector: Arc<MonitorSelector>,
    fanout: Arc<FanOut>,
    trigger: TriggerEngine,
    admission: AdmissionControl,
    admin: ConfigAdmin,
    queries: Queries,
}

impl AlarmService {
    pub fn new(collab: Collaborators, config: AlarmConfig) -> Self {
        let selector = Arc::new(MonitorSelector::new(
            collab.registry.clone(),
            collab.repository.clone(),
            config.engine.lookup_max_len,
        ));
        let fanout = Arc::new(FanOut::new(collab.clone(), config.mail.clone()));
        let trigger = TriggerEngine::new(collab.clone(), selector.clone(), fanout.clone());

        info!(
            templates = %config.templates.dir.display(),
            from = %config.mail.from_address,
            "Alarm service initialised"
        );

        Self {
            admission: AdmissionControl::new(collab.clone()),
            admin: ConfigAdmin::new(collab.clone(), config.engine.clone()),
            queries: Queries::new(collab.clone()),
            collab,
            config,
            selector,
            fanout,
            trigger,
        }
    }

    /// Service over a fresh in-memory backend
    pub fn in_memory(
        config: AlarmConfig,
        clock: Arc<dyn TimeProvider>,
    ) -> (Self, InMemoryBackend) {
        let backend = InMemoryBackend::new(&config);
        let service = Self::new(backend.collaborators(clock), config);
        (service, backend)
    }

    pub fn config(&self) -> &AlarmConfig {
        &self.config
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.collab
    }

    // ========== Triggers ==========

    pub fn on_device_changed(&self, device: DeviceId) -> Result<TriggerReport> {
        self.trigger.on_device_changed(device)
    }

    pub fn on_variable_changed(&self, variable: VariableId) -> Result<TriggerReport> {
        self.trigger.on_variable_changed(variable)
    }

    pub fn on_generic_entity(
        &self,
        subject: &GenericSubject,
        alarm: AlarmId,
    ) -> Result<TriggerReport> {
        self.trigger.on_generic_entity(subject, alarm)
    }

    pub fn record_manual_event(
        &self,
        alarm: AlarmId,
        description: Option<String>,
        related: BTreeSet<RelatedObject>,
    ) -> Result<(AlarmEvent, FanOutReport)> {
        self.trigger.record_manual_event(alarm, description, related)
    }

    /// Run fan-out for an already stored event
    pub fn fan_out(&self, event: &AlarmEvent) -> Result<FanOutReport> {
        self.fanout.fan_out(event)
    }

    // ========== Selection ==========

    pub fn active_alarms_for(&self, entity: ChangedEntity) -> Result<Vec<Alarm>> {
        self.selector.active_alarms_for(entity)
    }

    pub fn monitor_targets(&self, monitor: MonitorId) -> Result<MonitorTargets> {
        let monitor = self
            .collab
            .repository
            .monitor(monitor)?
            .ok_or_else(|| AlarmError::not_found(format!("monitor {}", monitor)))?;
        self.selector.targets(&monitor)
    }

    // ========== Configuration ==========

    pub fn save_monitor(&self, monitor: Monitor) -> Result<Monitor> {
        self.admin.save_monitor(monitor)
    }

    pub fn set_monitors_active(&self, ids: &[MonitorId], active: bool) -> Result<usize> {
        self.admin.set_monitors_active(ids, active)
    }

    pub fn reset_monitor_start_time(&self, ids: &[MonitorId]) -> Result<usize> {
        self.admin.reset_monitor_start_time(ids)
    }

    pub fn save_alarm(&self, alarm: Alarm) -> Result<Alarm> {
        self.admin.save_alarm(alarm)
    }

    // ========== Subscriptions ==========

    pub fn validate_subscription(&self, sub: &Subscription, mode: AdmissionMode) -> Result<()> {
        self.admission.validate(sub, mode)
    }

    pub fn create_subscription(&self, sub: Subscription) -> Result<Subscription> {
        self.admission.create(sub)
    }

    pub fn update_subscription(&self, sub: Subscription) -> Result<Subscription> {
        self.admission.update(sub)
    }

    pub fn set_subscription_active(
        &self,
        id: SubscriptionId,
        active: bool,
    ) -> Result<Subscription> {
        self.admission.set_active(id, active)
    }

    pub fn delete_subscription(&self, id: SubscriptionId) -> Result<bool> {
        self.admission.delete(id)
    }

    pub fn subscriptions_for_user(&self, user: UserId) -> Result<Vec<Subscription>> {
        self.queries.subscriptions_for_user(user)
    }

    // ========== Events and notifications ==========

    pub fn events(&self, filter: &EventFilter) -> Result<Vec<AlarmEvent>> {
        self.queries.events(filter)
    }

    pub fn events_visible_to(
        &self,
        user: UserId,
        filter: &EventFilter,
    ) -> Result<Vec<AlarmEvent>> {
        self.queries.events_visible_to(user, filter)
    }

    pub fn notifications(&self, filter: &NotificationFilter) -> Result<Vec<Notification>> {
        self.queries.notifications(filter)
    }

    pub fn mark_notification(
        &self,
        id: NotificationId,
        status: NotificationStatus,
    ) -> Result<Notification> {
        self.queries.mark_notification(id, status)
    }
}
