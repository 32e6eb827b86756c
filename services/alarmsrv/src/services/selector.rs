//! Monitor selection
//!
//! Decides which alarms a changed device or variable may trigger, and which
//! variables a lookup monitor covers.

use crate::domain::{
    Alarm, AlarmId, Device, DeviceId, Monitor, Profile, ProfileId, SelectionMode, Variable,
    VariableId,
};
use crate::error::{AlarmError, Result};
use crate::store::{AlarmRepository, DeviceRegistry};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};
use voltage_lookup::{FieldValue, Lookup, LookupRecord};

/// The entity whose change is being processed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangedEntity {
    Device(DeviceId),
    Variable(VariableId),
}

/// Effective targets of one monitor
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorTargets {
    Devices(Vec<Device>),
    Variables(Vec<Variable>),
    /// Variables resolved from the lookup expression
    Lookup(Vec<Variable>),
}

/// One active lookup monitor whose scope contains the changed variable
#[derive(Debug, Clone)]
pub struct LookupScope {
    pub monitor: Monitor,
    /// Alarms linked to the monitor, ordered by id
    pub alarms: Vec<Alarm>,
    /// Every variable the lookup resolves to, ordered by id
    pub variables: Vec<Variable>,
}

/// Result of scanning lookup monitors for one variable change
#[derive(Debug, Clone, Default)]
pub struct LookupPass {
    pub scopes: Vec<LookupScope>,
    /// Monitors skipped because their lookup failed
    pub skipped: usize,
}

// ============================================================================
// Lookup records
// ============================================================================

/// A variable joined with its device and profile, as seen by lookups
///
/// Fields: `id`/`pk`, `slug`, `name`, `var_type`, `value`, `device`
/// (`device__id`), `device__serial`, `device__name`, `device__connected`,
/// `device__profile` (`device__profile__id`), `device__profile__name`,
/// `device__profile__slug`, `device__profile__profile_type`.
#[derive(Debug, Clone, Copy)]
pub struct VariableRecord<'a> {
    pub variable: &'a Variable,
    pub device: Option<&'a Device>,
    pub profile: Option<&'a Profile>,
}

impl LookupRecord for VariableRecord<'_> {
    fn field(&self, path: &str) -> Option<FieldValue> {
        let v = self.variable;
        let device = self.device;
        let profile = self.profile;

        Some(match path {
            "id" | "pk" => FieldValue::Int(v.id),
            "slug" => FieldValue::from(v.slug.as_str()),
            "name" => FieldValue::from(v.name.as_str()),
            "var_type" => FieldValue::from(v.var_type.as_str()),
            "value" => FieldValue::Int(v.value),
            "device" | "device__id" | "device__pk" => FieldValue::Int(v.device),
            "device__serial" => FieldValue::from(device.map(|d| d.serial.as_str())),
            "device__name" => FieldValue::from(device.map(|d| d.name.as_str())),
            "device__connected" => FieldValue::from(device.map(|d| d.connected)),
            "device__profile" | "device__profile__id" | "device__profile__pk" => {
                FieldValue::from(device.and_then(|d| d.profile))
            },
            "device__profile__name" => FieldValue::from(profile.map(|p| p.name.as_str())),
            "device__profile__slug" => FieldValue::from(profile.map(|p| p.slug.as_str())),
            "device__profile__profile_type" => {
                FieldValue::from(profile.map(|p| p.profile_type.as_str()))
            },
            _ => return None,
        })
    }
}

/// All variables with their devices and profiles, loaded once per pass
struct RegistrySnapshot {
    variables: Vec<Variable>,
    devices: HashMap<DeviceId, Device>,
    profiles: HashMap<ProfileId, Profile>,
}

impl RegistrySnapshot {
    fn load(registry: &dyn DeviceRegistry) -> Result<Self> {
        let variables = registry.all_variables()?;

        let mut devices = HashMap::new();
        let mut profiles = HashMap::new();
        let device_ids: BTreeSet<DeviceId> = variables.iter().map(|v| v.device).collect();
        for id in device_ids {
            let Some(device) = registry.device(id)? else {
                continue;
            };
            if let Some(profile_id) = device.profile {
                if !profiles.contains_key(&profile_id) {
                    if let Some(profile) = registry.profile(profile_id)? {
                        profiles.insert(profile_id, profile);
                    }
                }
            }
            devices.insert(id, device);
        }

        Ok(Self {
            variables,
            devices,
            profiles,
        })
    }

    fn record<'a>(&'a self, variable: &'a Variable) -> VariableRecord<'a> {
        let device = self.devices.get(&variable.device);
        let profile = device
            .and_then(|d| d.profile)
            .and_then(|id| self.profiles.get(&id));
        VariableRecord {
            variable,
            device,
            profile,
        }
    }

    fn resolve(&self, lookup: &Lookup) -> Result<Vec<Variable>> {
        let records: Vec<VariableRecord<'_>> =
            self.variables.iter().map(|v| self.record(v)).collect();
        let matched = lookup.resolve(&records)?;
        Ok(matched.into_iter().map(|r| r.variable.clone()).collect())
    }
}

// ============================================================================
// Selector
// ============================================================================

/// Finds the alarms governed by active monitors for a changed entity
pub struct MonitorSelector {
    registry: Arc<dyn DeviceRegistry>,
    repository: Arc<dyn AlarmRepository>,
    lookup_max_len: usize,
}

impl MonitorSelector {
    pub fn new(
        registry: Arc<dyn DeviceRegistry>,
        repository: Arc<dyn AlarmRepository>,
        lookup_max_len: usize,
    ) -> Self {
        Self {
            registry,
            repository,
            lookup_max_len,
        }
    }

    pub fn parse_lookup(&self, source: &str) -> Result<Lookup> {
        Ok(Lookup::parse_with_limit(source, self.lookup_max_len)?)
    }

    /// Alarms linked to any of the given monitors, deduplicated and ordered by id
    fn alarms_linked_to(&self, monitors: &BTreeSet<i64>) -> Result<Vec<Alarm>> {
        if monitors.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self
            .repository
            .alarms()?
            .into_iter()
            .filter(|a| !a.monitors.is_disjoint(monitors))
            .collect())
    }

    /// Alarms of active monitors that list the device explicitly
    pub fn alarms_for_device(&self, device: DeviceId) -> Result<Vec<Alarm>> {
        let monitors: BTreeSet<i64> = self
            .repository
            .monitors()?
            .into_iter()
            .filter(|m| m.active && m.devices.contains(&device))
            .map(|m| m.id)
            .collect();
        self.alarms_linked_to(&monitors)
    }

    /// Alarms of active monitors that list the variable explicitly and have no lookup
    pub fn alarms_for_explicit_variable(&self, variable: VariableId) -> Result<Vec<Alarm>> {
        let monitors: BTreeSet<i64> = self
            .repository
            .monitors()?
            .into_iter()
            .filter(|m| m.active && !m.has_lookup() && m.variables.contains(&variable))
            .map(|m| m.id)
            .collect();
        self.alarms_linked_to(&monitors)
    }

    /// Active lookup monitors whose scope contains the variable
    ///
    /// A monitor whose lookup fails to parse or evaluate is logged and skipped.
    pub fn lookup_scopes(&self, variable: &Variable) -> Result<LookupPass> {
        let monitors: Vec<Monitor> = self
            .repository
            .monitors()?
            .into_iter()
            .filter(|m| m.active && m.has_lookup())
            .collect();
        if monitors.is_empty() {
            return Ok(LookupPass::default());
        }

        let snapshot = RegistrySnapshot::load(self.registry.as_ref())?;
        let alarms = self.repository.alarms()?;
        let mut pass = LookupPass::default();

        for monitor in monitors {
            let resolved = self
                .parse_lookup(&monitor.lookups)
                .and_then(|lookup| snapshot.resolve(&lookup));
            let variables = match resolved {
                Ok(variables) => variables,
                Err(e) => {
                    warn!(
                        monitor = monitor.id,
                        lookup = %monitor.lookups,
                        error = %e,
                        "Lookup failed, monitor skipped"
                    );
                    pass.skipped += 1;
                    continue;
                },
            };

            if !variables.iter().any(|v| v.id == variable.id) {
                continue;
            }

            let linked: Vec<Alarm> = alarms
                .iter()
                .filter(|a| a.monitors.contains(&monitor.id))
                .cloned()
                .collect();
            debug!(
                monitor = monitor.id,
                variable = variable.id,
                scope = variables.len(),
                alarms = linked.len(),
                "Variable in lookup scope"
            );
            pass.scopes.push(LookupScope {
                monitor,
                alarms: linked,
                variables,
            });
        }

        Ok(pass)
    }

    /// Union of alarms that a change of this entity may trigger, ordered by id
    pub fn active_alarms_for(&self, entity: ChangedEntity) -> Result<Vec<Alarm>> {
        match entity {
            ChangedEntity::Device(device) => self.alarms_for_device(device),
            ChangedEntity::Variable(id) => {
                let variable = self
                    .registry
                    .variable(id)?
                    .ok_or_else(|| AlarmError::not_found(format!("variable {}", id)))?;

                let mut alarms: BTreeMap<AlarmId, Alarm> = BTreeMap::new();
                for scope in self.lookup_scopes(&variable)?.scopes {
                    for alarm in scope.alarms {
                        alarms.entry(alarm.id).or_insert(alarm);
                    }
                }
                for alarm in self.alarms_for_explicit_variable(id)? {
                    alarms.entry(alarm.id).or_insert(alarm);
                }
                Ok(alarms.into_values().collect())
            },
        }
    }

    /// Effective targets of a monitor; lookup errors propagate
    pub fn targets(&self, monitor: &Monitor) -> Result<MonitorTargets> {
        let mode = monitor.selection_mode().map_err(AlarmError::validation)?;
        match mode {
            SelectionMode::Devices => {
                let mut devices = Vec::with_capacity(monitor.devices.len());
                for id in &monitor.devices {
                    if let Some(device) = self.registry.device(*id)? {
                        devices.push(device);
                    }
                }
                Ok(MonitorTargets::Devices(devices))
            },
            SelectionMode::Variables => {
                let mut variables = Vec::with_capacity(monitor.variables.len());
                for id in &monitor.variables {
                    if let Some(variable) = self.registry.variable(*id)? {
                        variables.push(variable);
                    }
                }
                Ok(MonitorTargets::Variables(variables))
            },
            SelectionMode::Lookup => {
                let lookup = self.parse_lookup(&monitor.lookups)?;
                let snapshot = RegistrySnapshot::load(self.registry.as_ref())?;
                Ok(MonitorTargets::Lookup(snapshot.resolve(&lookup)?))
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;
    use crate::domain::Frequency;
    use crate::store::MemoryStore;

    fn variable(device: DeviceId, slug: &str) -> Variable {
        Variable {
            id: 0,
            device,
            var_type: slug.to_string(),
            name: slug.to_string(),
            slug: slug.to_string(),
            value: 0,
        }
    }

    fn monitor(lookups: &str) -> Monitor {
        Monitor {
            id: 0,
            name: "m".to_string(),
            devices: BTreeSet::new(),
            variables: BTreeSet::new(),
            lookups: lookups.to_string(),
            active: true,
            weight: 0,
            frequency: Frequency::Daily,
            duration: 0.0,
            start_time: None,
        }
    }

    fn alarm(monitor: i64) -> Alarm {
        Alarm {
            id: 0,
            name: "a".to_string(),
            slug: format!("a-{}", monitor),
            creator: None,
            formula: "True".to_string(),
            duration: 0.0,
            description: "default".to_string(),
            monitors: BTreeSet::from([monitor]),
        }
    }

    fn setup() -> (Arc<MemoryStore>, MonitorSelector) {
        let store = Arc::new(MemoryStore::new());
        let profile = store.upsert_profile(Profile {
            id: 0,
            profile_type: "feeder".to_string(),
            name: "Feeder".to_string(),
            slug: "feeder".to_string(),
        });
        store.upsert_device(Device {
            id: 0,
            serial: "A1".to_string(),
            name: "Barn".to_string(),
            connected: true,
            profile: Some(profile.id),
        });
        store.upsert_device(Device {
            id: 0,
            serial: "B1".to_string(),
            name: "Silo".to_string(),
            connected: false,
            profile: None,
        });
        let selector = MonitorSelector::new(store.clone(), store.clone(), 255);
        (store, selector)
    }

    #[test]
    fn test_variable_record_fields() {
        let (store, _) = setup();
        let var = store.upsert_variable(variable(1, "food"));
        let device = store.device(1).unwrap().unwrap();
        let profile = store.profile(1).unwrap().unwrap();
        let record = VariableRecord {
            variable: &var,
            device: Some(&device),
            profile: Some(&profile),
        };

        assert_eq!(record.field("slug"), Some(FieldValue::from("food")));
        assert_eq!(record.field("device"), Some(FieldValue::Int(1)));
        assert_eq!(record.field("device__connected"), Some(FieldValue::Bool(true)));
        assert_eq!(
            record.field("device__profile__name"),
            Some(FieldValue::from("Feeder"))
        );
        assert_eq!(record.field("colour"), None);

        let orphan = VariableRecord {
            variable: &var,
            device: None,
            profile: None,
        };
        assert_eq!(orphan.field("device__name"), Some(FieldValue::Null));
    }

    #[test]
    fn test_lookup_scope_and_bad_lookup_skipped() {
        let (store, selector) = setup();
        let food_a = store.upsert_variable(variable(1, "food"));
        let food_b = store.upsert_variable(variable(2, "food-silo"));
        let water = store.upsert_variable(variable(2, "water"));

        let good = store.save_monitor(monitor("Q(slug__startswith='food')")).unwrap();
        store.save_monitor(monitor("Q(colour='red')")).unwrap();
        let linked = store.save_alarm(alarm(good.id)).unwrap();

        let pass = selector.lookup_scopes(&food_a).unwrap();
        assert_eq!(pass.skipped, 1);
        assert_eq!(pass.scopes.len(), 1);
        let scope = &pass.scopes[0];
        assert_eq!(scope.alarms[0].id, linked.id);
        let ids: Vec<_> = scope.variables.iter().map(|v| v.id).collect();
        assert_eq!(ids, vec![food_a.id, food_b.id]);

        let pass = selector.lookup_scopes(&water).unwrap();
        assert!(pass.scopes.is_empty());
    }

    #[test]
    fn test_active_alarms_for_entities() {
        let (store, selector) = setup();
        let food = store.upsert_variable(variable(1, "food"));

        let mut by_device = monitor("");
        by_device.devices.insert(1);
        let by_device = store.save_monitor(by_device).unwrap();

        let mut by_var = monitor("");
        by_var.variables.insert(food.id);
        let by_var = store.save_monitor(by_var).unwrap();

        let mut inactive = monitor("");
        inactive.devices.insert(1);
        inactive.active = false;
        let inactive = store.save_monitor(inactive).unwrap();

        let device_alarm = store.save_alarm(alarm(by_device.id)).unwrap();
        let var_alarm = store.save_alarm(alarm(by_var.id)).unwrap();
        store.save_alarm(alarm(inactive.id)).unwrap();

        let ids = |alarms: Vec<Alarm>| alarms.into_iter().map(|a| a.id).collect::<Vec<_>>();
        assert_eq!(
            ids(selector.active_alarms_for(ChangedEntity::Device(1)).unwrap()),
            vec![device_alarm.id]
        );
        assert_eq!(
            ids(selector
                .active_alarms_for(ChangedEntity::Variable(food.id))
                .unwrap()),
            vec![var_alarm.id]
        );
        assert!(selector
            .active_alarms_for(ChangedEntity::Device(2))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_targets() {
        let (store, selector) = setup();
        let food = store.upsert_variable(variable(1, "food"));
        store.upsert_variable(variable(2, "water"));

        let targets = selector
            .targets(&monitor("Q(device__name='Barn')"))
            .unwrap();
        assert_eq!(targets, MonitorTargets::Lookup(vec![food.clone()]));

        let mut explicit = monitor("");
        explicit.devices.insert(2);
        match selector.targets(&explicit).unwrap() {
            MonitorTargets::Devices(devices) => assert_eq!(devices[0].name, "Silo"),
            other => panic!("unexpected targets {:?}", other),
        }

        assert!(selector.targets(&monitor("")).unwrap_err().is_validation());
        assert!(matches!(
            selector.targets(&monitor("Q(slug='x'")),
            Err(AlarmError::Lookup(_))
        ));
    }
}
