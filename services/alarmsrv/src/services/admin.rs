//! Configuration administration for monitors and alarms
//!
//! Save-time validation lives here: a monitor uses exactly one selection
//! mode and a well-formed lookup; an alarm has a bounded formula and a unique
//! slug.

use super::Collaborators;
use crate::config::EngineConfig;
use crate::domain::{unique_slug, Alarm, Monitor, MonitorId};
use crate::error::{AlarmError, Result};
use std::collections::HashSet;
use tracing::{info, warn};
use voltage_lookup::Lookup;

pub struct ConfigAdmin {
    collab: Collaborators,
    limits: EngineConfig,
}

impl ConfigAdmin {
    pub fn new(collab: Collaborators, limits: EngineConfig) -> Self {
        Self { collab, limits }
    }

    // ========== Monitors ==========

    /// Validate and store a monitor; a missing start time defaults to now
    pub fn save_monitor(&self, mut monitor: Monitor) -> Result<Monitor> {
        monitor.selection_mode().map_err(AlarmError::validation)?;

        if monitor.has_lookup() {
            Lookup::parse_with_limit(&monitor.lookups, self.limits.lookup_max_len).map_err(|e| {
                AlarmError::validation(format!("Invalid lookup '{}': {}", monitor.lookups, e))
            })?;
        }
        if !monitor.duration.is_finite() || monitor.duration < 0.0 {
            return Err(AlarmError::validation(
                "Monitor duration must be a non-negative number of hours",
            ));
        }

        let registry = &self.collab.registry;
        for id in &monitor.devices {
            if registry.device(*id)?.is_none() {
                return Err(AlarmError::validation(format!("Unknown device {}", id)));
            }
        }
        for id in &monitor.variables {
            if registry.variable(*id)?.is_none() {
                return Err(AlarmError::validation(format!("Unknown variable {}", id)));
            }
        }

        if monitor.start_time.is_none() {
            monitor.start_time = Some(self.collab.clock.now());
        }
        let stored = self.collab.repository.save_monitor(monitor)?;
        info!(monitor = stored.id, active = stored.active, "Monitor saved");
        Ok(stored)
    }

    /// Bulk activate or deactivate; returns how many monitors were updated
    pub fn set_monitors_active(&self, ids: &[MonitorId], active: bool) -> Result<usize> {
        self.update_monitors(ids, |m| m.active = active)
    }

    /// Bulk reset of the start time to now
    pub fn reset_monitor_start_time(&self, ids: &[MonitorId]) -> Result<usize> {
        let now = self.collab.clock.now();
        self.update_monitors(ids, |m| m.start_time = Some(now))
    }

    fn update_monitors<F>(&self, ids: &[MonitorId], change: F) -> Result<usize>
    where
        F: Fn(&mut Monitor),
    {
        let repository = &self.collab.repository;
        let mut updated = 0;
        for id in ids {
            let Some(mut monitor) = repository.monitor(*id)? else {
                warn!(monitor = id, "Monitor not found, skipped");
                continue;
            };
            change(&mut monitor);
            repository.save_monitor(monitor)?;
            updated += 1;
        }
        Ok(updated)
    }

    // ========== Alarms ==========

    /// Validate and store an alarm
    ///
    /// An empty slug is derived from the name (`-1`, `-2`, ... on clashes);
    /// an unnamed alarm becomes `Alarm <id>`.
    pub fn save_alarm(&self, mut alarm: Alarm) -> Result<Alarm> {
        let length = alarm.formula.chars().count();
        if alarm.formula.trim().is_empty() {
            return Err(AlarmError::validation("Formula is required"));
        }
        if length > self.limits.formula_max_len {
            return Err(AlarmError::validation(format!(
                "Formula has {} characters (max {})",
                length, self.limits.formula_max_len
            )));
        }
        if !alarm.duration.is_finite() || alarm.duration < 0.0 {
            return Err(AlarmError::validation(
                "Alarm duration must be a non-negative number of hours",
            ));
        }

        let repository = &self.collab.repository;
        for id in &alarm.monitors {
            if repository.monitor(*id)?.is_none() {
                return Err(AlarmError::validation(format!("Unknown monitor {}", id)));
            }
        }

        alarm.name = alarm.name.trim().to_string();
        alarm.slug = alarm.slug.trim().to_string();
        let taken = self.slugs_in_use(alarm.id)?;
        let derived_slug = alarm.slug.is_empty();

        if derived_slug {
            let base = if alarm.name.is_empty() {
                "alarm"
            } else {
                alarm.name.as_str()
            };
            alarm.slug = unique_slug(base, |s| taken.contains(s));
        } else if taken.contains(&alarm.slug) {
            return Err(AlarmError::validation(format!(
                "Alarm slug '{}' already exists",
                alarm.slug
            )));
        }

        let mut stored = repository.save_alarm(alarm)?;

        if stored.name.is_empty() {
            stored.name = format!("Alarm {}", stored.id);
            if derived_slug {
                let taken = self.slugs_in_use(stored.id)?;
                stored.slug = unique_slug(&stored.name, |s| taken.contains(s));
            }
            stored = repository.save_alarm(stored)?;
        }

        info!(alarm = stored.id, slug = %stored.slug, "Alarm saved");
        Ok(stored)
    }

    /// Slugs of every alarm except `own`
    fn slugs_in_use(&self, own: i64) -> Result<HashSet<String>> {
        Ok(self
            .collab
            .repository
            .alarms()?
            .into_iter()
            .filter(|a| a.id != own)
            .map(|a| a.slug)
            .collect())
    }
}
