//! JSON CSDL rendering of the service model for `$metadata`.

use super::model::ServiceModel;
use super::types::{PropertyKind, ResourceTypeKind};
use serde_json::{Map, Value, json};

/// Render the model as a JSON CSDL document.
///
/// Only sets accepted by `set_visible` appear in the entity container, and
/// only the listed operations are emitted as function imports.
pub fn render<F>(model: &ServiceModel, set_visible: F, operations: &[(&str, bool)]) -> Value
where
    F: Fn(&str) -> bool,
{
    let namespace = model.namespace();
    let mut schema = Map::new();

    for resource_type in model.resource_types() {
        let mut entry = Map::new();
        let kind = match resource_type.kind {
            ResourceTypeKind::Entity => "EntityType",
            ResourceTypeKind::Complex => "ComplexType",
        };
        entry.insert("$Kind".to_string(), json!(kind));
        if let Some(base) = &resource_type.base_type {
            entry.insert("$BaseType".to_string(), json!(format!("{}.{}", namespace, base)));
        } else if resource_type.kind == ResourceTypeKind::Entity {
            let keys: Vec<&str> = model
                .key_properties(&resource_type.name)
                .iter()
                .map(|p| p.name.as_str())
                .collect();
            entry.insert("$Key".to_string(), json!(keys));
        }
        if resource_type.is_abstract {
            entry.insert("$Abstract".to_string(), json!(true));
        }
        if resource_type.is_open {
            entry.insert("$OpenType".to_string(), json!(true));
        }

        for property in &resource_type.properties {
            let mut prop = Map::new();
            match &property.kind {
                PropertyKind::Key(t) | PropertyKind::Primitive(t) => {
                    prop.insert("$Type".to_string(), json!(t.edm_name()));
                }
                PropertyKind::Complex(type_name) => {
                    prop.insert("$Type".to_string(), json!(format!("{}.{}", namespace, type_name)));
                }
                PropertyKind::Navigation(target) => {
                    let target_type = model
                        .resource_set(&target.target_set)
                        .map(|set| set.entity_type.as_str())
                        .unwrap_or_default();
                    prop.insert("$Kind".to_string(), json!("NavigationProperty"));
                    prop.insert("$Type".to_string(), json!(format!("{}.{}", namespace, target_type)));
                    if target.multiplicity.is_collection() {
                        prop.insert("$Collection".to_string(), json!(true));
                    }
                }
                PropertyKind::Stream => {
                    prop.insert("$Type".to_string(), json!("Edm.Stream"));
                }
            }
            if property.nullable && property.is_structural() && !property.is_key() {
                prop.insert("$Nullable".to_string(), json!(true));
            }
            if property.concurrency_token {
                prop.insert("@Core.OptimisticConcurrency".to_string(), json!(true));
            }
            entry.insert(property.name.clone(), Value::Object(prop));
        }
        schema.insert(resource_type.name.clone(), Value::Object(entry));
    }

    let mut container = Map::new();
    container.insert("$Kind".to_string(), json!("EntityContainer"));
    for set in model.resource_sets().filter(|s| set_visible(&s.name)) {
        container.insert(
            set.name.clone(),
            json!({
                "$Collection": true,
                "$Type": format!("{}.{}", namespace, set.entity_type),
            }),
        );
    }
    for (name, is_action) in operations {
        let key = if *is_action { "$Action" } else { "$Function" };
        container.insert(name.to_string(), json!({ key: format!("{}.{}", namespace, name) }));
    }
    schema.insert("Container".to_string(), Value::Object(container));

    json!({
        "$Version": "4.0",
        "$EntityContainer": format!("{}.Container", namespace),
        namespace: Value::Object(schema),
    })
}
