use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::catalogs::{normalize_name, MODEL_VERSION, NAME_PATTERN};
use crate::error::{ElementKind, InvariantViolation, Result};
use crate::iduid::{Id, IdUid, Uid};
use crate::model::{describe_entity, describe_property, ModelInfo};
use crate::types::PropertyType;

/// Bring derived counters up to date, then validate.
///
/// Counters only ever move up: each one ends at the highest id it has seen,
/// whether that id is still in use or not. Running it twice changes nothing.
pub fn finalize(model: &mut ModelInfo) -> Result<()> {
    for entity in &mut model.entities {
        for property in &entity.properties {
            raise(&mut entity.last_property_id, property.id);
        }
    }

    let mut entity_ids = Vec::new();
    let mut index_ids = Vec::new();
    let mut relation_ids = Vec::new();
    for entity in &model.entities {
        entity_ids.push(entity.id);
        index_ids.extend(entity.properties.iter().filter_map(|p| p.index.map(|i| i.id)));
        relation_ids.extend(entity.relations.iter().map(|r| r.id));
    }
    for id in entity_ids {
        raise(&mut model.last_entity_id, id);
    }
    for id in index_ids {
        raise(&mut model.last_index_id, id);
    }
    for id in relation_ids {
        raise(&mut model.last_relation_id, id);
    }

    validate(model)?;
    debug!(entities = model.entities.len(), "model finalized");
    Ok(())
}

fn raise(counter: &mut Option<IdUid>, observed: IdUid) {
    if counter.map_or(true, |c| c.id < observed.id) {
        *counter = Some(observed);
    }
}

/// Return the first invariant violation, if any.
pub fn validate(model: &ModelInfo) -> Result<()> {
    match check(model).into_iter().next() {
        Some(violation) => Err(violation.into()),
        None => Ok(()),
    }
}

/// Check every model invariant and report all violations, in model order.
/// Works on the persisted state only, so a freshly loaded model can be
/// checked as is.
pub fn check(model: &ModelInfo) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();

    if model.model_version_parser_minimum > MODEL_VERSION {
        violations.push(InvariantViolation::UnsupportedModelVersion {
            required: model.model_version_parser_minimum,
            supported: MODEL_VERSION,
        });
    }

    check_names(model, &mut violations);
    check_identifiers(model, &mut violations);
    check_id_properties(model, &mut violations);
    check_relation_targets(model, &mut violations);
    check_uids(model, &mut violations);
    check_counters(model, &mut violations);

    violations
}

// ---------------------------------------------------------------------------
// Names
// ---------------------------------------------------------------------------

fn check_names(model: &ModelInfo, out: &mut Vec<InvariantViolation>) {
    let entity_names = model.entities.iter().map(|e| e.name.as_str());
    check_name_scope(ElementKind::Entity, "the model", entity_names, out);
    for entity in &model.entities {
        let scope = describe_entity(entity);
        let property_names = entity.properties.iter().map(|p| p.name.as_str());
        check_name_scope(ElementKind::Property, &scope, property_names, out);
        let relation_names = entity.relations.iter().map(|r| r.name.as_str());
        check_name_scope(ElementKind::Relation, &scope, relation_names, out);
    }
}

fn check_name_scope<'n>(
    kind: ElementKind,
    scope: &str,
    names: impl Iterator<Item = &'n str>,
    out: &mut Vec<InvariantViolation>,
) {
    let mut seen = HashSet::new();
    for name in names {
        if !NAME_PATTERN.is_match(name) {
            out.push(InvariantViolation::InvalidName {
                kind,
                name: name.to_string(),
            });
        }
        if !seen.insert(normalize_name(name)) {
            out.push(InvariantViolation::DuplicateName {
                kind,
                name: name.to_string(),
                scope: scope.to_string(),
            });
        }
    }
}

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Tracks ids within one numbering scope.
struct IdScope {
    kind: ElementKind,
    seen: HashMap<Id, String>,
}

impl IdScope {
    fn new(kind: ElementKind) -> Self {
        Self {
            kind,
            seen: HashMap::new(),
        }
    }

    fn add(&mut self, id: IdUid, element: String, out: &mut Vec<InvariantViolation>) {
        if id.id == 0 || id.uid == 0 {
            out.push(InvariantViolation::UnassignedIdentifier { element });
            return;
        }
        if let Some(first) = self.seen.get(&id.id) {
            out.push(InvariantViolation::DuplicateIdentifier {
                kind: self.kind,
                id: id.id,
                first: first.clone(),
                second: element,
            });
        } else {
            self.seen.insert(id.id, element);
        }
    }
}

fn check_identifiers(model: &ModelInfo, out: &mut Vec<InvariantViolation>) {
    let mut entities = IdScope::new(ElementKind::Entity);
    let mut indexes = IdScope::new(ElementKind::Index);
    let mut relations = IdScope::new(ElementKind::Relation);

    for entity in &model.entities {
        entities.add(entity.id, describe_entity(entity), out);

        // Property ids are numbered per entity.
        let mut properties = IdScope::new(ElementKind::Property);
        for property in &entity.properties {
            let element = describe_property(entity, property);
            if let Some(index) = &property.index {
                indexes.add(index.id, format!("index of {element}"), out);
            }
            properties.add(property.id, element, out);
        }
        for relation in &entity.relations {
            relations.add(
                relation.id,
                format!("relation {}.{} ({})", entity.name, relation.name, relation.id),
                out,
            );
        }
    }
}

fn check_id_properties(model: &ModelInfo, out: &mut Vec<InvariantViolation>) {
    for entity in &model.entities {
        let ids: Vec<_> = entity.id_properties().collect();
        match ids.as_slice() {
            [] => out.push(InvariantViolation::MissingIdProperty {
                entity: entity.name.clone(),
            }),
            [id] if !id.property_type.can_be_id() => {
                out.push(InvariantViolation::InvalidIdPropertyType {
                    entity: entity.name.clone(),
                    property: id.name.clone(),
                    found: id.property_type.to_string(),
                })
            }
            [_] => {}
            _ => out.push(InvariantViolation::MultipleIdProperties {
                entity: entity.name.clone(),
                properties: ids.iter().map(|p| p.name.clone()).collect(),
            }),
        }
    }
}

fn check_relation_targets(model: &ModelInfo, out: &mut Vec<InvariantViolation>) {
    for entity in &model.entities {
        for property in &entity.properties {
            let is_relation = property.property_type == PropertyType::Relation;
            match &property.relation_target {
                Some(target) if is_relation => {
                    if model.find_entity_by_name(target).is_none() {
                        out.push(InvariantViolation::OrphanRelationTarget {
                            element: describe_property(entity, property),
                            target: target.clone(),
                        });
                    }
                }
                None if !is_relation => {}
                _ => out.push(InvariantViolation::RelationTargetMismatch {
                    entity: entity.name.clone(),
                    property: property.name.clone(),
                }),
            }
        }

        for relation in &entity.relations {
            let resolved = model
                .find_entity_by_uid(relation.target_id.uid)
                .is_some_and(|t| t.id.id == relation.target_id.id);
            if !resolved {
                out.push(InvariantViolation::OrphanRelationTarget {
                    element: format!("relation {}.{} ({})", entity.name, relation.name, relation.id),
                    target: relation.target_id.to_string(),
                });
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Uids
// ---------------------------------------------------------------------------

fn check_uids(model: &ModelInfo, out: &mut Vec<InvariantViolation>) {
    let retired: HashSet<Uid> = model.retired_uids().collect();
    let mut owners: HashMap<Uid, String> = HashMap::new();

    for (uid, element) in model.active_uids() {
        if uid == 0 {
            // Reported as an unassigned identifier.
            continue;
        }
        if retired.contains(&uid) {
            out.push(InvariantViolation::RetiredUidInUse {
                uid,
                element: element.clone(),
            });
        }
        if let Some(first) = owners.get(&uid) {
            out.push(InvariantViolation::DuplicateUid {
                uid,
                first: first.clone(),
                second: element,
            });
        } else {
            owners.insert(uid, element);
        }
    }
}

// ---------------------------------------------------------------------------
// Counters
// ---------------------------------------------------------------------------

fn check_counters(model: &ModelInfo, out: &mut Vec<InvariantViolation>) {
    let mut behind = |counter: Option<IdUid>, name: &str, id: IdUid, element: String| {
        let counter_id = counter.map_or(0, |c| c.id);
        if counter_id < id.id {
            out.push(InvariantViolation::CounterBehind {
                counter: name.to_string(),
                counter_id,
                id: id.id,
                element,
            });
        }
    };

    for entity in &model.entities {
        behind(
            model.last_entity_id,
            "lastEntityId",
            entity.id,
            describe_entity(entity),
        );
        let last_property = format!("lastPropertyId of entity {}", entity.name);
        for property in &entity.properties {
            let element = describe_property(entity, property);
            if let Some(index) = &property.index {
                behind(
                    model.last_index_id,
                    "lastIndexId",
                    index.id,
                    format!("index of {element}"),
                );
            }
            behind(entity.last_property_id, &last_property, property.id, element);
        }
        for relation in &entity.relations {
            behind(
                model.last_relation_id,
                "lastRelationId",
                relation.id,
                format!("relation {}.{}", entity.name, relation.name),
            );
        }
    }
}
