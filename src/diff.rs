//! Attribute-level change detection between declared and observed state.

use crate::error::ReconcileError;
use crate::model::{DesiredSpec, RemoteState};
use crate::schema::{AttributeSchema, ResourceDescriptor};
use indexmap::IndexMap;
use serde_json::Value;
use std::collections::BTreeSet;

/// Names of the attributes whose declared value differs from the observed one.
///
/// Immutable and computed attributes never show up here. An attribute missing
/// from `desired` only counts when the schema gives it a default.
pub fn diff(
    descriptor: &ResourceDescriptor,
    desired: &DesiredSpec,
    observed: &RemoteState,
) -> BTreeSet<String> {
    descriptor
        .attributes
        .iter()
        .filter(|attr| !attr.immutable && !attr.computed)
        .filter_map(|attr| {
            let wanted = desired_value(attr, desired)?;
            let seen = observed.get(attr.name).unwrap_or(&Value::Null);
            (!equivalent(attr, &wanted, seen)).then(|| attr.name.to_string())
        })
        .collect()
}

/// Immutable attributes whose declared value differs from the observed one.
///
/// These can only change by replacing the resource, which is up to the caller.
pub fn replacement_fields(
    descriptor: &ResourceDescriptor,
    desired: &DesiredSpec,
    observed: &RemoteState,
) -> BTreeSet<String> {
    descriptor
        .attributes
        .iter()
        .filter(|attr| attr.immutable && !attr.computed)
        .filter_map(|attr| {
            let wanted = desired.get(attr.name)?;
            // not reported back by the API, nothing to compare against
            let seen = observed.get(attr.name)?;
            (!equivalent(attr, wanted, seen)).then(|| attr.name.to_string())
        })
        .collect()
}

/// Normalized desired values of `changed`, the payload of a restricted update.
pub fn changed_values(
    descriptor: &ResourceDescriptor,
    desired: &DesiredSpec,
    changed: &BTreeSet<String>,
) -> IndexMap<String, Value> {
    changed
        .iter()
        .filter_map(|name| {
            let attr = descriptor.attribute(name)?;
            let value = desired_value(attr, desired)?;
            Some((name.clone(), attr.normalize(&value)))
        })
        .collect()
}

/// Normalized payload for a creation call: every declared attribute plus defaults.
pub fn creation_values(descriptor: &ResourceDescriptor, desired: &DesiredSpec) -> IndexMap<String, Value> {
    descriptor
        .attributes
        .iter()
        .filter(|attr| !attr.computed)
        .filter_map(|attr| {
            let value = desired_value(attr, desired)?;
            (!value.is_null()).then(|| (attr.name.to_string(), attr.normalize(&value)))
        })
        .collect()
}

/// Check a spec against the schema before anything is sent.
pub fn validate_spec(descriptor: &ResourceDescriptor, desired: &DesiredSpec) -> Result<(), ReconcileError> {
    for (name, _) in desired.iter() {
        match descriptor.attribute(name) {
            None => {
                return Err(ReconcileError::InvalidSpec {
                    reason: format!("unknown attribute '{name}' for {:?}", descriptor.kind),
                })
            }
            Some(attr) if attr.computed => {
                return Err(ReconcileError::InvalidSpec {
                    reason: format!("attribute '{name}' is computed and cannot be declared"),
                })
            }
            Some(_) => {}
        }
    }

    let missing: Vec<_> = descriptor
        .attributes
        .iter()
        .filter(|attr| attr.required)
        .filter(|attr| desired.get(attr.name).map_or(true, Value::is_null))
        .map(|attr| attr.name)
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(ReconcileError::InvalidSpec {
            reason: format!("missing required attributes: {}", missing.join(", ")),
        })
    }
}

fn desired_value(attr: &AttributeSchema, desired: &DesiredSpec) -> Option<Value> {
    match desired.get(attr.name) {
        Some(value) => Some(value.clone()),
        None => attr.default.map(|d| d.to_value()),
    }
}

fn equivalent(attr: &AttributeSchema, desired: &Value, observed: &Value) -> bool {
    match &attr.rule {
        Some(rule) => rule.equivalent(desired, observed),
        None => desired == observed,
    }
}
