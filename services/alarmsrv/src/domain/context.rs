//! JSON views of domain entities
//!
//! Formulas and notification templates address entities by dotted path
//! (`var.value`, `var.device.name`, `vars.food.value`, `alarm.name`), so each
//! entity is flattened into a JSON object before evaluation.

use super::types::{Alarm, AlarmEvent, Device, Group, Profile, User, Variable};
use serde_json::{json, Value};

pub fn profile_json(profile: &Profile) -> Value {
    json!({
        "id": profile.id,
        "name": profile.name,
        "slug": profile.slug,
        "profile_type": profile.profile_type,
    })
}

pub fn device_json(device: &Device, profile: Option<&Profile>) -> Value {
    json!({
        "id": device.id,
        "pk": device.id,
        "serial": device.serial,
        "name": device.name,
        "connected": device.connected,
        "profile": profile.map(profile_json),
    })
}

/// Variable view; `device` is the already-built device view, if known
pub fn variable_json(variable: &Variable, device: Option<Value>) -> Value {
    json!({
        "id": variable.id,
        "pk": variable.id,
        "name": variable.name,
        "slug": variable.slug,
        "var_type": variable.var_type,
        "value": variable.value,
        "device": device.unwrap_or(Value::Null),
    })
}

pub fn alarm_json(alarm: &Alarm) -> Value {
    json!({
        "id": alarm.id,
        "name": alarm.name,
        "slug": alarm.slug,
        "formula": alarm.formula,
        "duration": alarm.duration,
        "description": alarm.description,
    })
}

pub fn event_json(event: &AlarmEvent) -> Value {
    let related: Vec<Value> = event
        .related
        .iter()
        .map(|r| json!({"kind": r.kind, "id": r.id}))
        .collect();

    json!({
        "id": event.id,
        "display": event.display(),
        "event_type": event.event_type.code(),
        "created": event.created.to_rfc3339(),
        "finished": event.finished.map(|f| f.to_rfc3339()),
        "device": event.device,
        "variable": event.variable,
        "related": related,
        "description": event.description,
    })
}

pub fn user_json(user: &User) -> Value {
    json!({
        "id": user.id,
        "username": user.username,
        "email": user.email,
        "is_staff": user.is_staff,
    })
}

pub fn group_json(group: &Group) -> Value {
    json!({
        "id": group.id,
        "name": group.name,
    })
}
