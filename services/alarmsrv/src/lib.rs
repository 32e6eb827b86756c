//! Alarm Service Library
//!
//! Evaluates alarm formulas when devices and variables change, keeps the
//! event lifecycle (open, debounce, close), and fans notifications and emails
//! out to subscribed users and groups.

pub mod config;
pub mod domain;
pub mod error;
pub mod logging;
pub mod mailer;
pub mod permissions;
pub mod scenario;
pub mod services;
pub mod store;
pub mod templates;
pub mod time;

pub use config::AlarmConfig;
pub use domain::{Alarm, AlarmEvent, EventType, Monitor, Notification, Subscription};
pub use error::{AlarmError, Result};
pub use scenario::{ReplayOutcome, Scenario};
pub use services::{AlarmService, Collaborators, InMemoryBackend, TriggerReport};
pub use store::MemoryStore;
pub use time::{FixedTimeProvider, SystemTimeProvider, TimeProvider};
