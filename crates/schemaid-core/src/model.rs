//! The persisted model registry: entities plus the root counters and the
//! retired uid lists that keep identifiers stable across schema versions.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::catalogs::{
    names_match, normalize_name, FILE_FORMAT_VERSION, MODEL_NOTES, MODEL_VERSION,
};
use crate::error::{ElementKind, Result};
use crate::iduid::{IdUid, Uid};
use crate::types::{Entity, Property};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    pub entities: Vec<Entity>,
    #[serde(with = "crate::iduid::optional")]
    pub last_entity_id: Option<IdUid>,
    #[serde(with = "crate::iduid::optional")]
    pub last_index_id: Option<IdUid>,
    #[serde(with = "crate::iduid::optional")]
    pub last_relation_id: Option<IdUid>,
    #[serde(with = "crate::iduid::optional")]
    pub last_sequence_id: Option<IdUid>,
    pub model_version: u32,
    pub model_version_parser_minimum: u32,
    #[serde(default)]
    pub retired_entity_uids: Vec<Uid>,
    #[serde(default)]
    pub retired_index_uids: Vec<Uid>,
    #[serde(default)]
    pub retired_property_uids: Vec<Uid>,
    #[serde(default)]
    pub retired_relation_uids: Vec<Uid>,
    pub version: u32,
}

/// File layout: the fixed notes followed by the model itself.
#[derive(Serialize)]
struct PersistedModel<'a> {
    #[serde(rename = "_note1")]
    note1: &'static str,
    #[serde(rename = "_note2")]
    note2: &'static str,
    #[serde(rename = "_note3")]
    note3: &'static str,
    #[serde(flatten)]
    model: &'a ModelInfo,
}

impl Default for ModelInfo {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelInfo {
    /// An empty model at the current model version.
    pub fn new() -> Self {
        Self {
            entities: Vec::new(),
            last_entity_id: None,
            last_index_id: None,
            last_relation_id: None,
            last_sequence_id: None,
            model_version: MODEL_VERSION,
            model_version_parser_minimum: MODEL_VERSION,
            retired_entity_uids: Vec::new(),
            retired_index_uids: Vec::new(),
            retired_property_uids: Vec::new(),
            retired_relation_uids: Vec::new(),
            version: FILE_FORMAT_VERSION,
        }
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    /// Decode a model file. Malformed identifiers abort the load with
    /// [`ModelError::Format`](crate::error::ModelError::Format).
    pub fn from_json(json: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(json)?;
        check_persisted_identifiers(&value)?;
        Ok(serde_json::from_value(value)?)
    }

    /// Encode the model in its persisted layout (two-space indentation,
    /// trailing newline).
    pub fn to_json(&self) -> Result<String> {
        let persisted = PersistedModel {
            note1: MODEL_NOTES[0],
            note2: MODEL_NOTES[1],
            note3: MODEL_NOTES[2],
            model: self,
        };
        let mut json = serde_json::to_string_pretty(&persisted)?;
        json.push('\n');
        Ok(json)
    }

    // -----------------------------------------------------------------------
    // Lookup
    // -----------------------------------------------------------------------

    pub fn find_entity_by_name(&self, name: &str) -> Option<&Entity> {
        self.entities.iter().find(|e| names_match(&e.name, name))
    }

    pub fn find_entity_by_uid(&self, uid: Uid) -> Option<&Entity> {
        self.entities.iter().find(|e| e.id.uid == uid)
    }

    pub(crate) fn entity_position(&self, uid: Uid) -> Option<usize> {
        self.entities.iter().position(|e| e.id.uid == uid)
    }

    /// Every retired uid, across all scopes.
    pub fn retired_uids(&self) -> impl Iterator<Item = Uid> + '_ {
        self.retired_entity_uids
            .iter()
            .chain(&self.retired_property_uids)
            .chain(&self.retired_index_uids)
            .chain(&self.retired_relation_uids)
            .copied()
    }

    pub fn is_retired(&self, uid: Uid) -> bool {
        self.retired_uids().any(|u| u == uid)
    }

    /// Every uid currently owned by an element, with a description of the
    /// owner, in model order.
    pub fn active_uids(&self) -> Vec<(Uid, String)> {
        let mut uids = Vec::new();
        for entity in &self.entities {
            uids.push((entity.id.uid, describe_entity(entity)));
            for property in &entity.properties {
                uids.push((property.id.uid, describe_property(entity, property)));
                if let Some(index) = &property.index {
                    uids.push((
                        index.id.uid,
                        format!("index {} of {}", index.id, describe_property(entity, property)),
                    ));
                }
            }
            for relation in &entity.relations {
                uids.push((
                    relation.id.uid,
                    format!("relation {}.{} ({})", entity.name, relation.name, relation.id),
                ));
            }
        }
        uids
    }

    /// Human readable owner of `uid`, if it was ever used in this model.
    pub fn describe_uid(&self, uid: Uid) -> Option<String> {
        if let Some((_, owner)) = self.active_uids().into_iter().find(|(u, _)| *u == uid) {
            return Some(owner);
        }
        let retired = [
            (ElementKind::Entity, &self.retired_entity_uids),
            (ElementKind::Property, &self.retired_property_uids),
            (ElementKind::Index, &self.retired_index_uids),
            (ElementKind::Relation, &self.retired_relation_uids),
        ];
        retired
            .into_iter()
            .find(|(_, list)| list.contains(&uid))
            .map(|(kind, _)| format!("a retired {kind}"))
    }

    // -----------------------------------------------------------------------
    // Presence tracking and removal
    // -----------------------------------------------------------------------

    /// Forget which entities earlier passes have seen.
    pub fn clear_presence(&mut self) {
        for entity in &mut self.entities {
            entity.currently_present = false;
        }
    }

    /// Entities no merge has matched since the last [`Self::clear_presence`].
    pub fn absent_entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.iter().filter(|e| !e.currently_present)
    }

    /// Remove an entity and retire every uid it owns. Its id slot is not
    /// reclaimed: `lastEntityId` keeps pointing at the highest id ever used.
    pub fn remove_entity(&mut self, uid: Uid) -> Option<Entity> {
        let position = self.entity_position(uid)?;
        let entity = self.entities.remove(position);
        info!(entity = %entity.name, id = %entity.id, "removing entity");

        self.retired_entity_uids.push(entity.id.uid);
        for property in &entity.properties {
            self.retire_property(property);
        }
        for relation in &entity.relations {
            self.retired_relation_uids.push(relation.id.uid);
        }
        Some(entity)
    }

    /// Remove all entities not marked present, returning them in model order.
    pub fn remove_absent_entities(&mut self) -> Vec<Entity> {
        let absent: Vec<Uid> = self.absent_entities().map(|e| e.id.uid).collect();
        absent
            .into_iter()
            .filter_map(|uid| self.remove_entity(uid))
            .collect()
    }

    /// Retire the uids of a property that has been dropped from its entity.
    pub(crate) fn retire_property(&mut self, property: &Property) {
        self.retired_property_uids.push(property.id.uid);
        if let Some(index) = &property.index {
            self.retired_index_uids.push(index.id.uid);
        }
    }

    /// Carry entity renames into the to-one relations of entities outside
    /// `declared`. Targets are resolved to uids against the names as they are
    /// before any rename is applied, so chains and swaps land on the entity
    /// that was meant.
    pub(crate) fn carry_renames(
        &mut self,
        renames: &HashMap<Uid, String>,
        declared: &HashSet<Uid>,
    ) {
        if renames.is_empty() {
            return;
        }
        let targets: HashMap<String, Uid> = self
            .entities
            .iter()
            .map(|e| (normalize_name(&e.name), e.id.uid))
            .collect();
        for entity in &mut self.entities {
            if declared.contains(&entity.id.uid) {
                continue;
            }
            for property in &mut entity.properties {
                let Some(target) = &mut property.relation_target else {
                    continue;
                };
                let renamed = targets
                    .get(&normalize_name(target))
                    .and_then(|uid| renames.get(uid));
                if let Some(new_name) = renamed {
                    *target = new_name.clone();
                }
            }
        }
    }

    /// Point every standalone relation targeting the entity `old` at its
    /// replacement.
    pub(crate) fn replace_relation_target(&mut self, old: Uid, new: IdUid) {
        for relation in self.entities.iter_mut().flat_map(|e| e.relations.iter_mut()) {
            if relation.target_id.uid == old {
                relation.target_id = new;
            }
        }
    }

    /// Raise the model version to the one this build writes. Never lowers it.
    pub fn upgrade_version(&mut self) {
        self.model_version = self.model_version.max(MODEL_VERSION);
        self.model_version_parser_minimum = self.model_version_parser_minimum.max(MODEL_VERSION);
    }
}

/// Parse every identifier of a decoded model file before the typed decode,
/// so a malformed one is reported as a format error naming it.
fn check_persisted_identifiers(model: &Value) -> Result<()> {
    const ROOT_COUNTERS: [&str; 4] = [
        "lastEntityId",
        "lastIndexId",
        "lastRelationId",
        "lastSequenceId",
    ];
    for key in ROOT_COUNTERS {
        parse_identifier(model.get(key), true)?;
    }
    for entity in items(model, "entities") {
        parse_identifier(entity.get("id"), false)?;
        parse_identifier(entity.get("lastPropertyId"), true)?;
        for property in items(entity, "properties") {
            parse_identifier(property.get("id"), false)?;
            parse_identifier(property.get("indexId"), false)?;
        }
        for relation in items(entity, "relations") {
            parse_identifier(relation.get("id"), false)?;
            parse_identifier(relation.get("targetId"), false)?;
        }
    }
    Ok(())
}

fn items<'v>(value: &'v Value, key: &str) -> &'v [Value] {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

/// Missing keys and non-string values are left to the typed decode.
fn parse_identifier(value: Option<&Value>, counter: bool) -> Result<()> {
    match value.and_then(Value::as_str) {
        Some("") if counter => Ok(()),
        Some(raw) => IdUid::parse(raw).map(|_| ()),
        None => Ok(()),
    }
}

pub(crate) fn describe_entity(entity: &Entity) -> String {
    format!("entity {} ({})", entity.name, entity.id)
}

pub(crate) fn describe_property(entity: &Entity, property: &Property) -> String {
    format!("property {}.{} ({})", entity.name, property.name, property.id)
}
