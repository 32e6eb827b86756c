//! Alarm trigger engine
//!
//! Evaluates alarm formulas for a changed entity and drives the event
//! lifecycle. The state of a key `(alarm, device, variable, related)` is OPEN
//! when its latest event is unfinished, CLOSED otherwise.
//!
//! - formula true, key CLOSED and outside the debounce window: open an event
//!   and fan it out
//! - formula true, key OPEN: nothing
//! - formula false: finish every open event of the key
//! - evaluation error: logged, the alarm is skipped, siblings still run
//!
//! Every entry point runs under one gate, so the read-decide-write on a key
//! never interleaves with another trigger.

use super::fanout::{FanOut, FanOutReport};
use super::selector::MonitorSelector;
use super::Collaborators;
use crate::domain::context::{device_json, variable_json};
use crate::domain::{
    Alarm, AlarmEvent, AlarmId, DeviceId, EventId, EventKey, EventType, NewEvent,
    RelatedObject, Variable, VariableId,
};
use crate::error::{AlarmError, Result};
use crate::time::hours;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};
use voltage_formula::{Context, FormulaEngine};

/// Arbitrary entity evaluated directly against one alarm
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenericSubject {
    /// Reference stored on the event
    pub object: RelatedObject,
    /// Exposed to the formula as `var`
    #[serde(default)]
    pub fields: Value,
}

/// Outcome of one trigger cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TriggerReport {
    pub opened: Vec<EventId>,
    pub closed: Vec<EventId>,
    /// Formula evaluations attempted
    pub evaluations: usize,
    /// Evaluations that failed and were skipped
    pub errors: usize,
    /// Lookup monitors skipped because their lookup failed
    pub skipped_monitors: usize,
    pub notifications: usize,
    pub emails: usize,
}

impl TriggerReport {
    fn absorb(&mut self, fanout: FanOutReport) {
        self.notifications += fanout.notifications;
        self.emails += fanout.emails;
    }
}

/// Decision for one evaluated key
enum Outcome {
    True,
    False,
    Error,
}

pub struct TriggerEngine {
    collab: Collaborators,
    selector: Arc<MonitorSelector>,
    fanout: Arc<FanOut>,
    formulas: FormulaEngine,
    gate: Mutex<()>,
}

impl TriggerEngine {
    pub fn new(
        collab: Collaborators,
        selector: Arc<MonitorSelector>,
        fanout: Arc<FanOut>,
    ) -> Self {
        Self {
            collab,
            selector,
            fanout,
            formulas: FormulaEngine::new(),
            gate: Mutex::new(()),
        }
    }

    // ========== Entry points ==========

    /// A device was saved: evaluate alarms of monitors that list it
    ///
    /// The context exposes every variable of the device under `vars`, keyed
    /// by variable type, and the device itself under `device`.
    pub fn on_device_changed(&self, device_id: DeviceId) -> Result<TriggerReport> {
        let _gate = self.gate.lock();
        let registry = &self.collab.registry;

        let device = registry
            .device(device_id)?
            .ok_or_else(|| AlarmError::not_found(format!("device {}", device_id)))?;
        let profile = match device.profile {
            Some(id) => registry.profile(id)?,
            None => None,
        };
        let device_view = device_json(&device, profile.as_ref());
        let variables = registry.variables_of_device(device_id)?;

        let mut vars = Map::new();
        for variable in &variables {
            vars.insert(
                variable.var_type.clone(),
                variable_json(variable, Some(device_view.clone())),
            );
        }
        let mut context = Context::new();
        context.insert("vars".to_string(), Value::Object(vars));
        context.insert("device".to_string(), device_view);

        let mut report = TriggerReport::default();
        for alarm in self.selector.alarms_for_device(device_id)? {
            let variable = implicated_variable(&alarm.formula, &variables);
            let key = EventKey::device(alarm.id, device_id, variable);
            self.apply(&alarm, key, EventType::DeviceDriven, &context, &mut report)?;
        }

        Ok(report)
    }

    /// A variable was saved: evaluate lookup-scoped and explicitly selected alarms
    ///
    /// For each lookup monitor containing the variable, its alarms are
    /// evaluated once per variable in the monitor's scope; `vars` accumulates
    /// every variable touched in the cycle, keyed by slug. Explicitly
    /// selected alarms then evaluate the changed variable alone.
    pub fn on_variable_changed(&self, variable_id: VariableId) -> Result<TriggerReport> {
        let _gate = self.gate.lock();

        let variable = self
            .collab
            .registry
            .variable(variable_id)?
            .ok_or_else(|| AlarmError::not_found(format!("variable {}", variable_id)))?;

        let mut report = TriggerReport::default();
        let mut devices: HashMap<DeviceId, Value> = HashMap::new();
        let mut evaluated: HashSet<(AlarmId, VariableId)> = HashSet::new();

        let pass = self.selector.lookup_scopes(&variable)?;
        report.skipped_monitors = pass.skipped;

        let mut vars = Map::new();
        for scope in &pass.scopes {
            for alarm in &scope.alarms {
                for item in &scope.variables {
                    if !evaluated.insert((alarm.id, item.id)) {
                        continue;
                    }
                    let view = self.variable_view(item, &mut devices)?;
                    vars.insert(item.slug.clone(), view.clone());

                    let mut context = Context::new();
                    context.insert("vars".to_string(), Value::Object(vars.clone()));
                    context.insert("var".to_string(), view);

                    let key = EventKey::device(alarm.id, item.device, Some(item.id));
                    self.apply(alarm, key, EventType::DeviceDriven, &context, &mut report)?;
                }
            }
        }

        let explicit = self.selector.alarms_for_explicit_variable(variable.id)?;
        if !explicit.is_empty() {
            let view = self.variable_view(&variable, &mut devices)?;
            let mut own = Map::new();
            own.insert(variable.slug.clone(), view.clone());
            let mut context = Context::new();
            context.insert("vars".to_string(), Value::Object(own));
            context.insert("var".to_string(), view);

            for alarm in &explicit {
                if !evaluated.insert((alarm.id, variable.id)) {
                    continue;
                }
                let key = EventKey::device(alarm.id, variable.device, Some(variable.id));
                self.apply(alarm, key, EventType::DeviceDriven, &context, &mut report)?;
            }
        }

        Ok(report)
    }

    /// Evaluate one alarm against an arbitrary entity, bypassing monitors
    ///
    /// The entity is bound as `var`; events are keyed by `{subject.object}`.
    pub fn on_generic_entity(
        &self,
        subject: &GenericSubject,
        alarm_id: AlarmId,
    ) -> Result<TriggerReport> {
        let _gate = self.gate.lock();

        let alarm = self.load_alarm(alarm_id)?;
        let mut context = Context::new();
        context.insert("var".to_string(), subject.fields.clone());

        let mut report = TriggerReport::default();
        let key = EventKey::related(alarm.id, subject.object.clone());
        self.apply(&alarm, key, EventType::NoDevice, &context, &mut report)?;
        Ok(report)
    }

    /// Record a user-driven event and fan it out; no lifecycle rules apply
    pub fn record_manual_event(
        &self,
        alarm_id: AlarmId,
        description: Option<String>,
        related: BTreeSet<RelatedObject>,
    ) -> Result<(AlarmEvent, FanOutReport)> {
        let _gate = self.gate.lock();

        let alarm = self.load_alarm(alarm_id)?;
        let event = self.collab.repository.insert_event(NewEvent {
            alarm: alarm.id,
            event_type: EventType::UserDriven,
            created: self.collab.clock.now(),
            device: None,
            variable: None,
            related,
            description: description.unwrap_or_else(|| alarm.description.clone()),
        })?;
        info!(event = %event, alarm = alarm.id, "Manual event recorded");

        let fanout = self.fanout.fan_out(&event)?;
        Ok((event, fanout))
    }

    // ========== Lifecycle ==========

    fn evaluate(&self, alarm: &Alarm, context: &Context, report: &mut TriggerReport) -> Outcome {
        report.evaluations += 1;
        match self.formulas.evaluate(&alarm.formula, context) {
            Ok(true) => Outcome::True,
            Ok(false) => Outcome::False,
            Err(e) => {
                report.errors += 1;
                warn!(
                    alarm = alarm.id,
                    slug = %alarm.slug,
                    error = %e,
                    "Formula evaluation failed, alarm skipped"
                );
                Outcome::Error
            },
        }
    }

    fn apply(
        &self,
        alarm: &Alarm,
        key: EventKey,
        event_type: EventType,
        context: &Context,
        report: &mut TriggerReport,
    ) -> Result<()> {
        match self.evaluate(alarm, context, report) {
            Outcome::True => self.open(alarm, key, event_type, report),
            Outcome::False => self.close(alarm, &key, report),
            Outcome::Error => Ok(()),
        }
    }

    fn open(
        &self,
        alarm: &Alarm,
        key: EventKey,
        event_type: EventType,
        report: &mut TriggerReport,
    ) -> Result<()> {
        let repository = &self.collab.repository;
        let now = self.collab.clock.now();

        if let Some(last) = repository.latest_event(&key)? {
            if last.is_open() {
                debug!(event = %last, key = %key, "Event already open");
                return Ok(());
            }
            match last.created.checked_add_signed(hours(alarm.duration)) {
                Some(rearm) if now < rearm => {
                    debug!(key = %key, rearm = %rearm, "Within debounce window");
                    return Ok(());
                },
                None => {
                    debug!(key = %key, duration = alarm.duration, "Debounce window never ends");
                    return Ok(());
                },
                Some(_) => {},
            }
        }

        let event = repository.insert_event(NewEvent {
            alarm: alarm.id,
            event_type,
            created: now,
            device: key.device,
            variable: key.variable,
            related: key.related,
            description: alarm.description.clone(),
        })?;
        info!(event = %event, alarm = alarm.id, "Event opened");
        report.opened.push(event.id);

        let fanout = self.fanout.fan_out(&event)?;
        report.absorb(fanout);
        Ok(())
    }

    fn close(&self, alarm: &Alarm, key: &EventKey, report: &mut TriggerReport) -> Result<()> {
        let repository = &self.collab.repository;
        let now = self.collab.clock.now();

        for mut event in repository.open_events(key)? {
            event.finished = Some(now);
            event.description = alarm.description.clone();
            repository.update_event(&event)?;
            info!(event = %event, alarm = alarm.id, "Event closed");
            report.closed.push(event.id);
        }
        Ok(())
    }

    // ========== Helpers ==========

    fn load_alarm(&self, id: AlarmId) -> Result<Alarm> {
        self.collab
            .repository
            .alarm(id)?
            .ok_or_else(|| AlarmError::not_found(format!("alarm {}", id)))
    }

    fn variable_view(
        &self,
        variable: &Variable,
        devices: &mut HashMap<DeviceId, Value>,
    ) -> Result<Value> {
        if let Some(device) = devices.get(&variable.device) {
            return Ok(variable_json(variable, Some(device.clone())));
        }

        let registry = &self.collab.registry;
        let device = match registry.device(variable.device)? {
            Some(device) => {
                let profile = match device.profile {
                    Some(id) => registry.profile(id)?,
                    None => None,
                };
                device_json(&device, profile.as_ref())
            },
            None => Value::Null,
        };
        devices.insert(variable.device, device.clone());
        Ok(variable_json(variable, Some(device)))
    }
}

/// The single variable whose type appears in the formula text
///
/// More than one match is ambiguous and yields `None`; the event is then
/// keyed by device only.
fn implicated_variable(formula: &str, variables: &[Variable]) -> Option<VariableId> {
    let mut matches = variables
        .iter()
        .filter(|v| !v.var_type.is_empty() && formula.contains(v.var_type.as_str()));
    match (matches.next(), matches.next()) {
        (Some(only), None) => Some(only.id),
        _ => None,
    }
}
