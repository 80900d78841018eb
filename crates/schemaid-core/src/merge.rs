//! Merging one candidate model into the registry.
//!
//! A merge runs in two phases. Planning matches every candidate element and
//! settles where its identifier comes from without touching the model, so a
//! rejected source leaves the registry as it was. Applying then performs the
//! allocations, renames and removals the plan calls for.

use std::collections::{HashMap, HashSet};
use std::fmt;

use rand::RngCore;
use serde::Serialize;
use tracing::{info, warn};

use crate::allocator::{Scope, UidAllocator};
use crate::candidate::{
    CandidateEntity, CandidateIndex, CandidateModel, CandidateProperty, CandidateRelation,
    UidRequest,
};
use crate::catalogs::normalize_name;
use crate::error::{ElementKind, InvariantViolation, ModelError, Result};
use crate::iduid::{IdUid, Uid};
use crate::matcher::{MatchEntry, MatchKey, MatchOutcome, MatcherChain};
use crate::model::ModelInfo;
use crate::types::{Entity, Property, PropertyIndex, PropertyType, Relation};

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum MergeEvent {
    Created {
        kind: ElementKind,
        element: String,
        iduid: IdUid,
    },
    Renamed {
        kind: ElementKind,
        from: String,
        to: String,
        iduid: IdUid,
    },
    Removed {
        kind: ElementKind,
        element: String,
        iduid: IdUid,
    },
    /// Element replaced by a new one through an explicit uid request.
    Reset {
        kind: ElementKind,
        element: String,
        old: IdUid,
        new: IdUid,
    },
    /// The stored representation of a property changed.
    TypeChanged {
        element: String,
        from: PropertyType,
        to: PropertyType,
    },
}

impl MergeEvent {
    /// Events the user should look at: existing data may not read back the
    /// same way after them.
    pub fn is_warning(&self) -> bool {
        matches!(self, Self::Reset { .. } | Self::TypeChanged { .. })
    }
}

impl fmt::Display for MergeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created { element, iduid, .. } => write!(f, "created {element} ({iduid})"),
            Self::Renamed {
                kind,
                from,
                to,
                iduid,
            } => write!(f, "renamed {kind} {from} to {to} ({iduid})"),
            Self::Removed { element, iduid, .. } => write!(f, "removed {element} ({iduid})"),
            Self::Reset {
                element, old, new, ..
            } => write!(f, "reset {element}: {old} replaced by {new}"),
            Self::TypeChanged { element, from, to } => {
                write!(f, "{element} changed type from {from} to {to}")
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MergeReport {
    pub source: String,
    pub events: Vec<MergeEvent>,
}

impl MergeReport {
    fn new(source: &str) -> Self {
        Self {
            source: source.to_string(),
            events: Vec::new(),
        }
    }

    fn record(&mut self, event: MergeEvent) {
        if event.is_warning() {
            warn!(source = %self.source, "{event}");
        } else {
            info!(source = %self.source, "{event}");
        }
        self.events.push(event);
    }

    pub fn warnings(&self) -> impl Iterator<Item = &MergeEvent> {
        self.events.iter().filter(|e| e.is_warning())
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Planning
// ---------------------------------------------------------------------------

/// Where a candidate element's identifier comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    /// Keep the stored element with this uid.
    Existing(Uid),
    /// Create an element, with the requested uid or a random one.
    New(Option<Uid>),
    /// Retire the stored element `old` and create one with `uid`.
    Replace { old: Uid, uid: Uid },
}

struct Planned<'c, T> {
    candidate: &'c T,
    target: Target,
}

struct EntityPlan<'c> {
    candidate: &'c CandidateEntity,
    target: Target,
    properties: Vec<Planned<'c, CandidateProperty>>,
    relations: Vec<Planned<'c, CandidateRelation>>,
}

struct Planner<'a, R> {
    model: &'a ModelInfo,
    alloc: &'a mut UidAllocator<R>,
    chain: MatcherChain,
    /// Uids taken from the allocator while planning.
    claims: Vec<Uid>,
}

impl<'a, R: RngCore> Planner<'a, R> {
    fn plan<'c>(&mut self, source: &'c CandidateModel) -> Result<Vec<EntityPlan<'c>>> {
        let model = self.model;
        check_unique_names(
            ElementKind::Entity,
            "the source",
            source.entities.iter().map(|e| e.name.as_str()),
        )?;

        let entries: Vec<MatchEntry<'_>> = model
            .entities
            .iter()
            .map(|e| MatchEntry {
                name: &e.name,
                uid: e.id.uid,
            })
            .collect();
        let mut claimed = HashMap::new();
        let mut plans = Vec::with_capacity(source.entities.len());

        for candidate in &source.entities {
            let key = MatchKey {
                name: &candidate.name,
                uid: candidate.uid,
            };
            let matched = self.select(
                ElementKind::Entity,
                &candidate.name,
                &key,
                &entries,
                &mut claimed,
            )?;
            let target = self.target(
                candidate.uid_request,
                matched,
                &format!("entity {}", candidate.name),
            )?;
            let stored = match target {
                Target::Existing(uid) => model.find_entity_by_uid(uid),
                _ => None,
            };
            plans.push(EntityPlan {
                candidate,
                target,
                properties: self.plan_properties(candidate, stored)?,
                relations: self.plan_relations(candidate, stored)?,
            });
        }

        self.check_entity_names(source, &plans)?;
        Ok(plans)
    }

    fn plan_properties<'c>(
        &mut self,
        entity: &'c CandidateEntity,
        stored: Option<&Entity>,
    ) -> Result<Vec<Planned<'c, CandidateProperty>>> {
        check_unique_names(
            ElementKind::Property,
            &format!("entity {}", entity.name),
            entity.properties.iter().map(|p| p.name.as_str()),
        )?;
        let entries: Vec<MatchEntry<'_>> = stored
            .map(|e| {
                e.properties
                    .iter()
                    .map(|p| MatchEntry {
                        name: &p.name,
                        uid: p.id.uid,
                    })
                    .collect()
            })
            .unwrap_or_default();
        let mut claimed = HashMap::new();
        let mut plans = Vec::with_capacity(entity.properties.len());

        for candidate in &entity.properties {
            let label = format!("{}.{}", entity.name, candidate.name);
            let key = MatchKey {
                name: &candidate.name,
                uid: candidate.uid,
            };
            let matched =
                self.select(ElementKind::Property, &label, &key, &entries, &mut claimed)?;
            let target =
                self.target(candidate.uid_request, matched, &format!("property {label}"))?;
            plans.push(Planned { candidate, target });
        }
        Ok(plans)
    }

    fn plan_relations<'c>(
        &mut self,
        entity: &'c CandidateEntity,
        stored: Option<&Entity>,
    ) -> Result<Vec<Planned<'c, CandidateRelation>>> {
        check_unique_names(
            ElementKind::Relation,
            &format!("entity {}", entity.name),
            entity.relations.iter().map(|r| r.name.as_str()),
        )?;
        let entries: Vec<MatchEntry<'_>> = stored
            .map(|e| {
                e.relations
                    .iter()
                    .map(|r| MatchEntry {
                        name: &r.name,
                        uid: r.id.uid,
                    })
                    .collect()
            })
            .unwrap_or_default();
        let mut claimed = HashMap::new();
        let mut plans = Vec::with_capacity(entity.relations.len());

        for candidate in &entity.relations {
            let label = format!("{}.{}", entity.name, candidate.name);
            let key = MatchKey {
                name: &candidate.name,
                uid: candidate.uid,
            };
            let matched =
                self.select(ElementKind::Relation, &label, &key, &entries, &mut claimed)?;
            let target =
                self.target(candidate.uid_request, matched, &format!("relation {label}"))?;
            plans.push(Planned { candidate, target });
        }
        Ok(plans)
    }

    /// Run the matcher chain and make sure no two candidates bind to the
    /// same stored element.
    fn select(
        &self,
        kind: ElementKind,
        label: &str,
        key: &MatchKey<'_>,
        entries: &[MatchEntry<'_>],
        claimed: &mut HashMap<Uid, String>,
    ) -> Result<Option<Uid>> {
        match self.chain.resolve(key, entries) {
            MatchOutcome::NoMatch => Ok(None),
            MatchOutcome::Ambiguous { uids, reason } => Err(ModelError::AmbiguousMatch {
                kind,
                name: label.to_string(),
                uids,
                reason,
            }),
            MatchOutcome::Matched(i) => {
                let uid = entries[i].uid;
                if let Some(first) = claimed.insert(uid, label.to_string()) {
                    return Err(ModelError::AmbiguousMatch {
                        kind,
                        name: label.to_string(),
                        uids: vec![uid],
                        reason: format!("{first} and {label} both match the same stored {kind}"),
                    });
                }
                Ok(Some(uid))
            }
        }
    }

    /// Apply the candidate's uid request, if any, to the match result.
    fn target(
        &mut self,
        request: Option<UidRequest>,
        current: Option<Uid>,
        element: &str,
    ) -> Result<Target> {
        match request {
            None => Ok(current.map_or(Target::New(None), Target::Existing)),
            Some(UidRequest::Pending) => {
                let suggested = self.alloc.next_uid();
                self.claims.push(suggested);
                Err(ModelError::UidRequestPending {
                    element: element.to_string(),
                    current,
                    suggested,
                })
            }
            Some(UidRequest::Assign(uid)) if Some(uid) == current => Ok(Target::Existing(uid)),
            Some(UidRequest::Assign(0)) => Err(ModelError::Format {
                input: "0".to_string(),
                reason: format!("uid requested by {element} is zero"),
            }),
            Some(UidRequest::Assign(uid)) => {
                if !self.alloc.claim(uid) {
                    return Err(ModelError::DuplicateUid {
                        uid,
                        requested_by: element.to_string(),
                        owner: self
                            .model
                            .describe_uid(uid)
                            .unwrap_or_else(|| "another element of this source".to_string()),
                    });
                }
                self.claims.push(uid);
                Ok(match current {
                    Some(old) => Target::Replace { old, uid },
                    None => Target::New(Some(uid)),
                })
            }
        }
    }

    /// Entity names must stay unique once the source is applied, and every
    /// relation must point at an entity that will exist.
    fn check_entity_names(&self, source: &CandidateModel, plans: &[EntityPlan<'_>]) -> Result<()> {
        let claimed: HashSet<Uid> = plans
            .iter()
            .filter_map(|p| match p.target {
                Target::Existing(uid) | Target::Replace { old: uid, .. } => Some(uid),
                Target::New(_) => None,
            })
            .collect();

        let mut names: HashSet<String> = source
            .entities
            .iter()
            .map(|e| normalize_name(&e.name))
            .collect();
        for stored in &self.model.entities {
            if claimed.contains(&stored.id.uid) {
                continue;
            }
            if !names.insert(normalize_name(&stored.name)) {
                return Err(ModelError::AmbiguousMatch {
                    kind: ElementKind::Entity,
                    name: stored.name.clone(),
                    uids: vec![stored.id.uid],
                    reason: "the name is still held by a stored entity no candidate claims"
                        .to_string(),
                });
            }
        }

        for entity in &source.entities {
            let targets = entity
                .properties
                .iter()
                .filter_map(|p| {
                    p.relation_target
                        .as_ref()
                        .map(|t| (format!("property {}.{}", entity.name, p.name), t))
                })
                .chain(entity.relations.iter().map(|r| {
                    (format!("relation {}.{}", entity.name, r.name), &r.target)
                }));
            for (element, target) in targets {
                if !names.contains(&normalize_name(target)) {
                    return Err(InvariantViolation::OrphanRelationTarget {
                        element,
                        target: target.clone(),
                    }
                    .into());
                }
            }
        }
        Ok(())
    }
}

fn check_unique_names<'n>(
    kind: ElementKind,
    scope: &str,
    names: impl Iterator<Item = &'n str>,
) -> Result<()> {
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(normalize_name(name)) {
            return Err(ModelError::AmbiguousMatch {
                kind,
                name: name.to_string(),
                uids: Vec::new(),
                reason: format!("declared more than once in {scope}"),
            });
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

/// Merge `source` into `model`.
///
/// Matched entities are marked present; removing the ones no source matched
/// is up to the caller. On error the model is left untouched unless the
/// failure happens while applying (id space exhausted). Uids claimed while
/// planning a rejected source are released.
pub fn merge<R: RngCore>(
    source: &CandidateModel,
    model: &mut ModelInfo,
    alloc: &mut UidAllocator<R>,
) -> Result<MergeReport> {
    alloc.observe(model);
    let mut planner = Planner {
        model,
        alloc: &mut *alloc,
        chain: MatcherChain::default(),
        claims: Vec::new(),
    };
    let plans = match planner.plan(source) {
        Ok(plans) => plans,
        Err(err) => {
            planner.alloc.release(&planner.claims);
            return Err(err);
        }
    };

    let (renames, declared) = entity_renames(model, &plans);
    model.carry_renames(&renames, &declared);

    let mut report = MergeReport::new(&source.source);
    let mut applied = Vec::with_capacity(plans.len());
    for plan in &plans {
        applied.push(apply_entity(model, alloc, plan, &mut report)?);
    }
    // Relations last: their targets may be entities created above.
    for (plan, uid) in plans.iter().zip(applied) {
        apply_relations(model, alloc, uid, plan, &mut report)?;
    }
    Ok(report)
}

/// New names of the stored entities the plans rename, and the uids of every
/// stored entity the source declares.
fn entity_renames(
    model: &ModelInfo,
    plans: &[EntityPlan<'_>],
) -> (HashMap<Uid, String>, HashSet<Uid>) {
    let mut renames = HashMap::new();
    let mut declared = HashSet::new();
    for plan in plans {
        let (Target::Existing(uid) | Target::Replace { old: uid, .. }) = plan.target else {
            continue;
        };
        declared.insert(uid);
        let name = &plan.candidate.name;
        if model.find_entity_by_uid(uid).is_some_and(|e| &e.name != name) {
            renames.insert(uid, name.clone());
        }
    }
    (renames, declared)
}

fn apply_entity<R: RngCore>(
    model: &mut ModelInfo,
    alloc: &mut UidAllocator<R>,
    plan: &EntityPlan<'_>,
    report: &mut MergeReport,
) -> Result<Uid> {
    let candidate = plan.candidate;
    let label = format!("entity {}", candidate.name);
    let unknown = |uid| ModelError::UnknownUid {
        kind: ElementKind::Entity,
        uid,
    };

    let (position, mut entity) = match plan.target {
        Target::Existing(uid) => {
            let position = model.entity_position(uid).ok_or_else(|| unknown(uid))?;
            let mut stored = model.entities.remove(position);
            if stored.name != candidate.name {
                let from = std::mem::replace(&mut stored.name, candidate.name.clone());
                report.record(MergeEvent::Renamed {
                    kind: ElementKind::Entity,
                    from,
                    to: candidate.name.clone(),
                    iduid: stored.id,
                });
            }
            (position, stored)
        }
        Target::Replace { old, uid } => {
            let position = model.entity_position(old).ok_or_else(|| unknown(old))?;
            let removed = model.remove_entity(old).ok_or_else(|| unknown(old))?;
            let id = model.allocate(Scope::Entity, uid)?;
            model.replace_relation_target(old, id);
            report.record(MergeEvent::Reset {
                kind: ElementKind::Entity,
                element: label,
                old: removed.id,
                new: id,
            });
            (position, Entity::new(&candidate.name, id))
        }
        Target::New(uid) => {
            let uid = uid.unwrap_or_else(|| alloc.next_uid());
            let id = model.allocate(Scope::Entity, uid)?;
            report.record(MergeEvent::Created {
                kind: ElementKind::Entity,
                element: label,
                iduid: id,
            });
            (model.entities.len(), Entity::new(&candidate.name, id))
        }
    };

    let uid = entity.id.uid;
    entity.currently_present = true;
    let applied = apply_properties(model, alloc, &mut entity, &plan.properties, report);
    model.entities.insert(position, entity);
    applied.map(|()| uid)
}

fn apply_properties<R: RngCore>(
    model: &mut ModelInfo,
    alloc: &mut UidAllocator<R>,
    entity: &mut Entity,
    plans: &[Planned<'_, CandidateProperty>],
    report: &mut MergeReport,
) -> Result<()> {
    let unknown = |uid| ModelError::UnknownUid {
        kind: ElementKind::Property,
        uid,
    };
    let mut stored = std::mem::take(&mut entity.properties);
    let mut properties = Vec::with_capacity(plans.len());

    for plan in plans {
        let candidate = plan.candidate;
        let label = format!("property {}.{}", entity.name, candidate.name);
        let property = match plan.target {
            Target::Existing(uid) => {
                let existing =
                    take_where(&mut stored, |p| p.id.uid == uid).ok_or_else(|| unknown(uid))?;
                update_property(model, alloc, existing, candidate, &label, report)?
            }
            Target::Replace { old, uid } => {
                let existing =
                    take_where(&mut stored, |p| p.id.uid == old).ok_or_else(|| unknown(old))?;
                model.retire_property(&existing);
                let id = entity.allocate_property_id(uid)?;
                report.record(MergeEvent::Reset {
                    kind: ElementKind::Property,
                    element: label.clone(),
                    old: existing.id,
                    new: id,
                });
                new_property(model, alloc, id, candidate, &label, report)?
            }
            Target::New(uid) => {
                let uid = uid.unwrap_or_else(|| alloc.next_uid());
                let id = entity.allocate_property_id(uid)?;
                report.record(MergeEvent::Created {
                    kind: ElementKind::Property,
                    element: label.clone(),
                    iduid: id,
                });
                new_property(model, alloc, id, candidate, &label, report)?
            }
        };
        properties.push(property);
    }

    // An entity is declared in full by one source: whatever is left is gone.
    for dropped in stored {
        model.retire_property(&dropped);
        report.record(MergeEvent::Removed {
            kind: ElementKind::Property,
            element: format!("property {}.{}", entity.name, dropped.name),
            iduid: dropped.id,
        });
    }
    entity.properties = properties;
    Ok(())
}

fn update_property<R: RngCore>(
    model: &mut ModelInfo,
    alloc: &mut UidAllocator<R>,
    mut property: Property,
    candidate: &CandidateProperty,
    label: &str,
    report: &mut MergeReport,
) -> Result<Property> {
    if property.name != candidate.name {
        report.record(MergeEvent::Renamed {
            kind: ElementKind::Property,
            from: property.name.clone(),
            to: candidate.name.clone(),
            iduid: property.id,
        });
        property.name = candidate.name.clone();
    }
    if property.property_type.storage_class() != candidate.property_type.storage_class() {
        report.record(MergeEvent::TypeChanged {
            element: label.to_string(),
            from: property.property_type,
            to: candidate.property_type,
        });
    }
    property.property_type = candidate.property_type;
    property.flags = candidate.resolved_flags();
    property.relation_target = candidate.relation_target.clone();
    property.index = apply_index(
        model,
        alloc,
        property.index,
        candidate.resolved_index(),
        label,
        report,
    )?;
    Ok(property)
}

fn new_property<R: RngCore>(
    model: &mut ModelInfo,
    alloc: &mut UidAllocator<R>,
    id: IdUid,
    candidate: &CandidateProperty,
    label: &str,
    report: &mut MergeReport,
) -> Result<Property> {
    let index = apply_index(model, alloc, None, candidate.resolved_index(), label, report)?;
    Ok(Property {
        name: candidate.name.clone(),
        id,
        property_type: candidate.property_type,
        flags: candidate.resolved_flags(),
        index,
        relation_target: candidate.relation_target.clone(),
    })
}

/// An index keeps its identifier for as long as the property has one,
/// whatever its kind.
fn apply_index<R: RngCore>(
    model: &mut ModelInfo,
    alloc: &mut UidAllocator<R>,
    current: Option<PropertyIndex>,
    wanted: Option<CandidateIndex>,
    label: &str,
    report: &mut MergeReport,
) -> Result<Option<PropertyIndex>> {
    Ok(match (current, wanted) {
        (Some(index), Some(wanted)) => Some(PropertyIndex {
            id: index.id,
            kind: wanted.kind,
            unique: wanted.unique,
        }),
        (None, Some(wanted)) => {
            let id = model.allocate(Scope::Index, alloc.next_uid())?;
            report.record(MergeEvent::Created {
                kind: ElementKind::Index,
                element: format!("index of {label}"),
                iduid: id,
            });
            Some(PropertyIndex {
                id,
                kind: wanted.kind,
                unique: wanted.unique,
            })
        }
        (Some(index), None) => {
            model.retired_index_uids.push(index.id.uid);
            report.record(MergeEvent::Removed {
                kind: ElementKind::Index,
                element: format!("index of {label}"),
                iduid: index.id,
            });
            None
        }
        (None, None) => None,
    })
}

fn apply_relations<R: RngCore>(
    model: &mut ModelInfo,
    alloc: &mut UidAllocator<R>,
    entity_uid: Uid,
    plan: &EntityPlan<'_>,
    report: &mut MergeReport,
) -> Result<()> {
    let owner = &plan.candidate.name;
    let mut target_ids = Vec::with_capacity(plan.relations.len());
    for planned in &plan.relations {
        let target = &planned.candidate.target;
        let target_id = model
            .find_entity_by_name(target)
            .map(|e| e.id)
            .ok_or_else(|| InvariantViolation::OrphanRelationTarget {
                element: format!("relation {owner}.{}", planned.candidate.name),
                target: target.clone(),
            })?;
        target_ids.push(target_id);
    }

    let position = model
        .entity_position(entity_uid)
        .ok_or(ModelError::UnknownUid {
            kind: ElementKind::Entity,
            uid: entity_uid,
        })?;
    let unknown = |uid| ModelError::UnknownUid {
        kind: ElementKind::Relation,
        uid,
    };
    let mut stored = std::mem::take(&mut model.entities[position].relations);
    let mut relations = Vec::with_capacity(plan.relations.len());

    for (planned, target_id) in plan.relations.iter().zip(target_ids) {
        let candidate = planned.candidate;
        let label = format!("relation {owner}.{}", candidate.name);
        let relation = match planned.target {
            Target::Existing(uid) => {
                let mut relation =
                    take_where(&mut stored, |r| r.id.uid == uid).ok_or_else(|| unknown(uid))?;
                if relation.name != candidate.name {
                    report.record(MergeEvent::Renamed {
                        kind: ElementKind::Relation,
                        from: relation.name.clone(),
                        to: candidate.name.clone(),
                        iduid: relation.id,
                    });
                    relation.name = candidate.name.clone();
                }
                relation.target_id = target_id;
                relation
            }
            Target::Replace { old, uid } => {
                let existing =
                    take_where(&mut stored, |r| r.id.uid == old).ok_or_else(|| unknown(old))?;
                model.retired_relation_uids.push(existing.id.uid);
                let id = model.allocate(Scope::Relation, uid)?;
                report.record(MergeEvent::Reset {
                    kind: ElementKind::Relation,
                    element: label,
                    old: existing.id,
                    new: id,
                });
                Relation {
                    id,
                    name: candidate.name.clone(),
                    target_id,
                }
            }
            Target::New(uid) => {
                let uid = uid.unwrap_or_else(|| alloc.next_uid());
                let id = model.allocate(Scope::Relation, uid)?;
                report.record(MergeEvent::Created {
                    kind: ElementKind::Relation,
                    element: label,
                    iduid: id,
                });
                Relation {
                    id,
                    name: candidate.name.clone(),
                    target_id,
                }
            }
        };
        relations.push(relation);
    }

    for dropped in stored {
        model.retired_relation_uids.push(dropped.id.uid);
        report.record(MergeEvent::Removed {
            kind: ElementKind::Relation,
            element: format!("relation {owner}.{}", dropped.name),
            iduid: dropped.id,
        });
    }
    model.entities[position].relations = relations;
    Ok(())
}

fn take_where<T>(items: &mut Vec<T>, pred: impl Fn(&T) -> bool) -> Option<T> {
    let position = items.iter().position(pred)?;
    Some(items.remove(position))
}
