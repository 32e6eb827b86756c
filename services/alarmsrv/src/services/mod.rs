//! Services module for alarm service
//!
//! Selection, trigger evaluation, notification fan-out, subscription
//! admission, configuration admin and read-side queries. All components share
//! one [`Collaborators`] bundle.

pub mod admin;
pub mod admission;
pub mod alarm_service;
pub mod fanout;
pub mod queries;
pub mod selector;
pub mod trigger;

pub use admission::AdmissionMode;
pub use alarm_service::{AlarmService, InMemoryBackend};
pub use fanout::FanOutReport;
pub use queries::{EventFilter, EventState, NotificationFilter};
pub use selector::{ChangedEntity, LookupScope, MonitorSelector, MonitorTargets, VariableRecord};
pub use trigger::{GenericSubject, TriggerEngine, TriggerReport};

use crate::mailer::EmailSender;
use crate::permissions::PermissionChecker;
use crate::store::{AlarmRepository, DeviceRegistry, Directory};
use crate::templates::TemplateRenderer;
use crate::time::TimeProvider;
use std::sync::Arc;

/// External collaborators injected into every component
#[derive(Clone)]
pub struct Collaborators {
    pub registry: Arc<dyn DeviceRegistry>,
    pub directory: Arc<dyn Directory>,
    pub repository: Arc<dyn AlarmRepository>,
    pub permissions: Arc<dyn PermissionChecker>,
    pub templates: Arc<dyn TemplateRenderer>,
    pub mailer: Arc<dyn EmailSender>,
    pub clock: Arc<dyn TimeProvider>,
}
