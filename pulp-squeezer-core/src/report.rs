use serde::Serialize;
use serde_json::{Map, Value};

use crate::reconcile::{EntityDiff, Outcome};

/// The JSON document a module run prints: `changed`, the entity under its singular key
/// (or the listing under its plural key), and optionally the before/after diff.
#[derive(Debug, Clone, Serialize)]
pub struct ModuleReport {
    pub changed: bool,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<EntityDiff>,
}

impl ModuleReport {
    pub fn from_outcome(outcome: Outcome, singular: &str, plural: &str, with_diff: bool) -> Self {
        let mut payload = Map::new();
        match outcome {
            Outcome::Listed(entities) => {
                let listed = entities.into_iter().map(Value::Object).collect();
                payload.insert(plural.to_string(), Value::Array(listed));
                ModuleReport {
                    changed: false,
                    payload,
                    diff: None,
                }
            }
            Outcome::Entity {
                entity,
                changed,
                diff,
            } => {
                payload.insert(
                    singular.to_string(),
                    entity.map(Value::Object).unwrap_or(Value::Null),
                );
                ModuleReport {
                    changed,
                    payload,
                    diff: with_diff.then_some(diff),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn listing_goes_under_plural_key() {
        let outcome = Outcome::Listed(vec![Map::new()]);
        let report = ModuleReport::from_outcome(outcome, "repository", "repositories", true);
        let rendered = serde_json::to_value(&report).unwrap();
        assert_eq!(rendered, json!({"changed": false, "repositories": [{}]}));
    }

    #[test]
    fn absent_entity_renders_null_and_optional_diff() {
        let outcome = Outcome::Entity {
            entity: None,
            changed: true,
            diff: EntityDiff {
                before: Some(Map::new()),
                after: None,
            },
        };
        let plain = ModuleReport::from_outcome(outcome.clone(), "content", "contents", false);
        assert_eq!(
            serde_json::to_value(&plain).unwrap(),
            json!({"changed": true, "content": null})
        );

        let with_diff = ModuleReport::from_outcome(outcome, "content", "contents", true);
        assert_eq!(
            serde_json::to_value(&with_diff).unwrap(),
            json!({"changed": true, "content": null, "diff": {"before": {}, "after": null}})
        );
    }
}
