//! Desired-state reconciliation: the one create/update/delete decision every module shares.
//!
//! [`process`] takes a natural key, the desired attributes, creation-only defaults and a
//! target state, looks the entity up through an [`EntityContext`] and applies the smallest
//! change that brings the server in line:
//!
//! | key given | state   | found | action                        | changed |
//! |-----------|---------|-------|-------------------------------|---------|
//! | no        | any     | -     | `list()`                      | false   |
//! | yes       | present | no    | `create(key ∪ desired ∪ defaults)` | true |
//! | yes       | present | yes   | `update(diff)` if diff non-empty | diff non-empty |
//! | yes       | absent  | no    | nothing                       | false   |
//! | yes       | absent  | yes   | `delete()`                    | true    |
//! | yes       | unset   | any   | report what was found         | false   |
//!
//! # Check mode
//! With [`ProcessOptions::check_mode`] the lookup still happens but no mutating call is made;
//! the outcome describes what the entity would look like afterwards.
//!
//! # Error Handling
//! Errors from the context are returned as-is. Nothing is retried.

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::contract::{Attributes, Entity, EntityContext, NaturalKey, TargetState};
use crate::error::SqueezerError;

#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessOptions {
    pub check_mode: bool,
}

/// Entity snapshots around a keyed run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EntityDiff {
    pub before: Option<Entity>,
    pub after: Option<Entity>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Read-all mode: every entity of the type, nothing changed.
    Listed(Vec<Entity>),
    /// Keyed mode: the entity after the run (`None` when absent).
    Entity {
        entity: Option<Entity>,
        changed: bool,
        diff: EntityDiff,
    },
}

impl Outcome {
    pub fn changed(&self) -> bool {
        match self {
            Outcome::Listed(_) => false,
            Outcome::Entity { changed, .. } => *changed,
        }
    }

    fn unchanged(entity: Option<Entity>) -> Self {
        Outcome::Entity {
            diff: EntityDiff {
                before: entity.clone(),
                after: entity.clone(),
            },
            entity,
            changed: false,
        }
    }
}

/// Fields of `desired` whose value differs from `current`.
///
/// A field missing from `current` compares equal to `null`.
pub fn diff_attributes(current: &Entity, desired: &Attributes) -> Attributes {
    desired
        .iter()
        .filter(|(field, wanted)| current.get(field.as_str()).unwrap_or(&Value::Null) != *wanted)
        .map(|(field, wanted)| (field.clone(), wanted.clone()))
        .collect()
}

fn merge_into(target: &mut Attributes, source: &Attributes) {
    for (field, value) in source {
        target.insert(field.clone(), value.clone());
    }
}

/// Reconciles one entity (or lists all of them) against the desired state.
pub async fn process<C>(
    ctx: &C,
    natural_key: &NaturalKey,
    desired: &Attributes,
    defaults: &Attributes,
    state: Option<TargetState>,
    options: ProcessOptions,
) -> Result<Outcome, SqueezerError>
where
    C: EntityContext + ?Sized,
{
    let entity_name = ctx.entity_singular();

    if natural_key.is_unspecified() {
        info!(entity = entity_name, "[PROCESS] No natural key given, listing all");
        let entities = ctx.list(natural_key).await?;
        info!(entity = entity_name, count = entities.len(), "[PROCESS] Listed entities");
        return Ok(Outcome::Listed(entities));
    }

    // A query with an incomplete key may match many entities; list them all.
    if state.is_none() && natural_key.is_partial() {
        info!(entity = entity_name, key = %natural_key, "[PROCESS] Partial key given, listing matches");
        let entities = ctx.list(natural_key).await?;
        info!(entity = entity_name, count = entities.len(), "[PROCESS] Listed entities");
        return Ok(Outcome::Listed(entities));
    }

    // Natural-key fields are lookup-only and never part of an update payload.
    let mut desired = desired.clone();
    desired.retain(|field, _| {
        let is_key = natural_key.contains(field);
        if is_key {
            warn!(entity = entity_name, field = %field, "[PROCESS] Ignoring natural-key field in desired attributes");
        }
        !is_key
    });

    debug!(entity = entity_name, key = %natural_key, "[PROCESS] Looking up entity");
    let found = ctx.find(natural_key).await?;

    let Some(state) = state else {
        info!(entity = entity_name, key = %natural_key, found = found.is_some(), "[PROCESS] Query only");
        return Ok(Outcome::unchanged(found));
    };

    match (state, found) {
        (TargetState::Present, None) => {
            let mut attributes = natural_key.to_attributes();
            merge_into(&mut attributes, &desired);
            merge_into(&mut attributes, defaults);

            let created = if options.check_mode {
                info!(entity = entity_name, key = %natural_key, "[PROCESS][CHECK] Would create entity");
                attributes
            } else {
                info!(entity = entity_name, key = %natural_key, "[PROCESS] Creating entity");
                ctx.create(&attributes).await?
            };
            Ok(Outcome::Entity {
                diff: EntityDiff {
                    before: None,
                    after: Some(created.clone()),
                },
                entity: Some(created),
                changed: true,
            })
        }
        (TargetState::Present, Some(current)) => {
            let diff = diff_attributes(&current, &desired);
            if diff.is_empty() {
                info!(entity = entity_name, key = %natural_key, "[PROCESS] Entity already in desired state");
                return Ok(Outcome::unchanged(Some(current)));
            }

            let fields: Vec<&str> = diff.keys().map(String::as_str).collect();
            let updated = if options.check_mode {
                info!(entity = entity_name, key = %natural_key, ?fields, "[PROCESS][CHECK] Would update entity");
                let mut preview = current.clone();
                merge_into(&mut preview, &diff);
                preview
            } else {
                info!(entity = entity_name, key = %natural_key, ?fields, "[PROCESS] Updating entity");
                ctx.update(&current, &diff).await?
            };
            Ok(Outcome::Entity {
                diff: EntityDiff {
                    before: Some(current),
                    after: Some(updated.clone()),
                },
                entity: Some(updated),
                changed: true,
            })
        }
        (TargetState::Absent, None) => {
            info!(entity = entity_name, key = %natural_key, "[PROCESS] Entity already absent");
            Ok(Outcome::unchanged(None))
        }
        (TargetState::Absent, Some(current)) => {
            if options.check_mode {
                info!(entity = entity_name, key = %natural_key, "[PROCESS][CHECK] Would delete entity");
            } else {
                info!(entity = entity_name, key = %natural_key, "[PROCESS] Deleting entity");
                ctx.delete(&current).await?;
            }
            Ok(Outcome::Entity {
                entity: None,
                changed: true,
                diff: EntityDiff {
                    before: Some(current),
                    after: None,
                },
            })
        }
    }
}
