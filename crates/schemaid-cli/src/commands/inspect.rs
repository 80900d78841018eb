use std::path::Path;

use anyhow::{bail, Result};

use schemaid_core::{IdUid, IndexKind, ModelInfo, Property, PropertyFlags};

use crate::reader::load_model;

pub fn run_inspect(model_path: &Path, format: &str) -> Result<String> {
    if !model_path.exists() {
        bail!("Model file does not exist: {}", model_path.display());
    }
    let model = load_model(model_path)?;

    match format {
        "json" => Ok(serde_json::to_string_pretty(&inspect_json(&model))?),
        _ => Ok(inspect_human(&model)),
    }
}

fn flag_names(flags: PropertyFlags) -> Vec<&'static str> {
    flags.iter_names().map(|(name, _)| name).collect()
}

fn index_kind_name(kind: IndexKind) -> &'static str {
    match kind {
        IndexKind::Implicit => "implicit",
        IndexKind::Value => "value",
        IndexKind::Hash => "hash",
        IndexKind::Hash64 => "hash64",
    }
}

fn counter(value: Option<IdUid>) -> String {
    value.map(|c| c.to_string()).unwrap_or_default()
}

fn target_name(model: &ModelInfo, target: IdUid) -> String {
    model
        .find_entity_by_uid(target.uid)
        .map_or_else(|| format!("<missing {target}>"), |e| e.name.clone())
}

fn property_line(property: &Property) -> String {
    let mut line = format!(
        "  {} {} {}",
        property.name, property.id, property.property_type
    );
    if let Some(target) = &property.relation_target {
        line.push_str(&format!(" -> {target}"));
    }
    let flags = flag_names(property.flags);
    if !flags.is_empty() {
        line.push_str(&format!(" [{}]", flags.join(", ")));
    }
    if let Some(index) = &property.index {
        line.push_str(&format!(
            " index {} {}",
            index.id,
            index_kind_name(index.kind)
        ));
        if index.unique {
            line.push_str(" unique");
        }
    }
    line
}

fn inspect_human(model: &ModelInfo) -> String {
    let mut lines: Vec<String> = Vec::new();

    for entity in &model.entities {
        lines.push(format!(
            "{} {} (last property {})",
            entity.name,
            entity.id,
            counter(entity.last_property_id)
        ));
        for property in &entity.properties {
            lines.push(property_line(property));
        }
        for relation in &entity.relations {
            lines.push(format!(
                "  relation {} {} -> {}",
                relation.name,
                relation.id,
                target_name(model, relation.target_id)
            ));
        }
    }

    lines.push(format!(
        "lastEntityId {}, lastIndexId {}, lastRelationId {}",
        counter(model.last_entity_id),
        counter(model.last_index_id),
        counter(model.last_relation_id)
    ));
    let entity_count = model.entities.len();
    let entity_word = if entity_count == 1 {
        "entity"
    } else {
        "entities"
    };
    lines.push(format!(
        "{entity_count} {entity_word}, {} retired uids, model version {}.",
        model.retired_uids().count(),
        model.model_version
    ));

    lines.join("\n")
}

fn inspect_json(model: &ModelInfo) -> serde_json::Value {
    let entities: Vec<serde_json::Value> = model
        .entities
        .iter()
        .map(|entity| {
            let properties: Vec<serde_json::Value> = entity
                .properties
                .iter()
                .map(|p| {
                    serde_json::json!({
                        "name": p.name,
                        "id": p.id,
                        "type": p.property_type,
                        "flags": flag_names(p.flags),
                        "index": p.index.map(|i| serde_json::json!({
                            "id": i.id,
                            "kind": i.kind,
                            "unique": i.unique,
                        })),
                        "relationTarget": p.relation_target,
                    })
                })
                .collect();
            let relations: Vec<serde_json::Value> = entity
                .relations
                .iter()
                .map(|r| {
                    serde_json::json!({
                        "name": r.name,
                        "id": r.id,
                        "target": target_name(model, r.target_id),
                    })
                })
                .collect();
            serde_json::json!({
                "name": entity.name,
                "id": entity.id,
                "lastPropertyId": counter(entity.last_property_id),
                "properties": properties,
                "relations": relations,
            })
        })
        .collect();

    serde_json::json!({
        "entities": entities,
        "lastEntityId": counter(model.last_entity_id),
        "lastIndexId": counter(model.last_index_id),
        "lastRelationId": counter(model.last_relation_id),
        "retiredUids": model.retired_uids().count(),
        "modelVersion": model.model_version,
    })
}
