//! Identifier allocation.
//!
//! Ids are sequential per scope and come from the counters stored in the
//! model; they are never handed out twice, even after the element owning
//! them is removed. Uids are random and checked against every uid the model
//! has ever used, active or retired.

use std::collections::HashSet;
use std::fmt;

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use tracing::debug;

use crate::error::{ModelError, Result};
use crate::iduid::{Id, IdUid, Uid};
use crate::model::ModelInfo;
use crate::types::Entity;

// ---------------------------------------------------------------------------
// Scopes
// ---------------------------------------------------------------------------

/// Model-wide numbering scopes. Property ids are numbered per entity, see
/// [`Entity::allocate_property_id`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Entity,
    Index,
    Relation,
    Sequence,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.counter_name())
    }
}

impl Scope {
    pub const fn counter_name(self) -> &'static str {
        match self {
            Self::Entity => "lastEntityId",
            Self::Index => "lastIndexId",
            Self::Relation => "lastRelationId",
            Self::Sequence => "lastSequenceId",
        }
    }
}

fn next_after(counter: Option<IdUid>, counter_name: &str) -> Result<Id> {
    counter
        .map_or(0, |c| c.id)
        .checked_add(1)
        .ok_or_else(|| ModelError::Format {
            input: counter_name.to_string(),
            reason: "id space exhausted".to_string(),
        })
}

impl ModelInfo {
    fn counter_mut(&mut self, scope: Scope) -> &mut Option<IdUid> {
        match scope {
            Scope::Entity => &mut self.last_entity_id,
            Scope::Index => &mut self.last_index_id,
            Scope::Relation => &mut self.last_relation_id,
            Scope::Sequence => &mut self.last_sequence_id,
        }
    }

    pub fn counter(&self, scope: Scope) -> Option<IdUid> {
        match scope {
            Scope::Entity => self.last_entity_id,
            Scope::Index => self.last_index_id,
            Scope::Relation => self.last_relation_id,
            Scope::Sequence => self.last_sequence_id,
        }
    }

    /// The id the next allocation in `scope` will receive.
    pub fn next_id(&self, scope: Scope) -> Result<Id> {
        next_after(self.counter(scope), scope.counter_name())
    }

    /// Take the next id in `scope`, pair it with `uid` and advance the counter.
    pub fn allocate(&mut self, scope: Scope, uid: Uid) -> Result<IdUid> {
        let iduid = IdUid::new(self.next_id(scope)?, uid);
        *self.counter_mut(scope) = Some(iduid);
        debug!(%scope, %iduid, "allocated identifier");
        Ok(iduid)
    }
}

impl Entity {
    pub fn next_property_id(&self) -> Result<Id> {
        next_after(self.last_property_id, "lastPropertyId")
    }

    /// Take the next property id of this entity and pair it with `uid`.
    pub fn allocate_property_id(&mut self, uid: Uid) -> Result<IdUid> {
        let iduid = IdUid::new(self.next_property_id()?, uid);
        self.last_property_id = Some(iduid);
        debug!(entity = %self.name, %iduid, "allocated property identifier");
        Ok(iduid)
    }
}

// ---------------------------------------------------------------------------
// Uid allocator
// ---------------------------------------------------------------------------

/// Source of fresh uids; the only non-deterministic part of reconciliation.
pub struct UidAllocator<R = StdRng> {
    rng: R,
    used: HashSet<Uid>,
}

impl UidAllocator<StdRng> {
    pub fn from_entropy() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Reproducible allocation for tests and `--seed` runs.
    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }
}

impl<R: RngCore> UidAllocator<R> {
    pub fn with_rng(rng: R) -> Self {
        Self {
            rng,
            used: HashSet::new(),
        }
    }

    /// Record every uid `model` has ever used so none of them is drawn again.
    pub fn observe(&mut self, model: &ModelInfo) {
        self.used
            .extend(model.active_uids().into_iter().map(|(uid, _)| uid));
        self.used.extend(model.retired_uids());
        let counters = [
            model.last_entity_id,
            model.last_index_id,
            model.last_relation_id,
            model.last_sequence_id,
        ];
        self.used.extend(counters.into_iter().flatten().map(|c| c.uid));
        for entity in &model.entities {
            self.used.extend(entity.last_property_id.map(|c| c.uid));
        }
    }

    pub fn is_used(&self, uid: Uid) -> bool {
        self.used.contains(&uid)
    }

    /// Mark a requested uid as taken. Returns `false` if it already was.
    pub fn claim(&mut self, uid: Uid) -> bool {
        uid != 0 && self.used.insert(uid)
    }

    /// Draw a random non-zero uid not used before and record it.
    pub fn next_uid(&mut self) -> Uid {
        loop {
            let uid = self.rng.next_u64();
            if self.claim(uid) {
                return uid;
            }
            debug!(uid, "uid collision, drawing again");
        }
    }

    /// Give back uids claimed for a merge that was rejected.
    pub(crate) fn release(&mut self, uids: &[Uid]) {
        for uid in uids {
            self.used.remove(uid);
        }
    }
}
