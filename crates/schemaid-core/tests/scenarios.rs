use pretty_assertions::assert_eq;
use schemaid_core::{
    finalize, merge, reconcile, CandidateEntity, CandidateModel, CandidateProperty,
    CandidateRelation, InvariantViolation, ModelError, ModelInfo, PropertyType, ReconcileOptions,
    UidAllocator, UidRequest,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn entity(name: &str, fields: &[(&str, PropertyType)]) -> CandidateEntity {
    let mut entity = CandidateEntity::new(name).with_property(CandidateProperty::id("id"));
    for (field, ty) in fields {
        entity = entity.with_property(CandidateProperty::new(*field, *ty));
    }
    entity
}

fn source(name: &str, entities: Vec<CandidateEntity>) -> CandidateModel {
    CandidateModel {
        source: name.into(),
        entities,
    }
}

fn run(model: &mut ModelInfo, sources: &[CandidateModel], options: ReconcileOptions) {
    let mut alloc = UidAllocator::seeded(11);
    reconcile(model, sources, &options, &mut alloc).unwrap();
}

// ---------------------------------------------------------------------------
// Allocation
// ---------------------------------------------------------------------------

#[test]
fn new_task_gets_first_ids() {
    let mut model = ModelInfo::new();
    let task = entity("Task", &[("text", PropertyType::String)]);
    run(&mut model, &[source("task.fbs", vec![task])], ReconcileOptions::default());

    let task = &model.entities[0];
    assert_eq!(task.id.id, 1);
    let ids: Vec<u32> = task.properties.iter().map(|p| p.id.id).collect();
    assert_eq!(ids, vec![1, 2]);
    assert_eq!(model.last_entity_id.unwrap().uid, task.id.uid);
    assert_eq!(task.last_property_id.unwrap().uid, task.properties[1].id.uid);
}

#[test]
fn ids_are_not_reused_after_removal() {
    let mut model = ModelInfo::new();
    let full = ReconcileOptions::full_schema();
    run(
        &mut model,
        &[source("s", vec![entity("A", &[]), entity("B", &[])])],
        full,
    );
    run(&mut model, &[source("s", vec![entity("A", &[])])], full);
    run(
        &mut model,
        &[source("s", vec![entity("A", &[]), entity("C", &[])])],
        full,
    );

    let c = model.find_entity_by_name("C").unwrap();
    assert_eq!(c.id.id, 3);
    assert_eq!(model.last_entity_id.unwrap().id, 3);
}

#[test]
fn property_ids_are_not_reused_after_removal() {
    let mut model = ModelInfo::new();
    let full = ReconcileOptions::full_schema();
    let fields = [("a", PropertyType::Int), ("b", PropertyType::Int)];
    run(&mut model, &[source("s", vec![entity("T", &fields)])], full);
    run(&mut model, &[source("s", vec![entity("T", &fields[..1])])], full);
    run(&mut model, &[source("s", vec![entity("T", &fields)])], full);

    let t = &model.entities[0];
    assert_eq!(t.properties[2].id.id, 4);
    assert_eq!(t.last_property_id.unwrap().id, 4);
    assert_eq!(model.retired_property_uids.len(), 1);
}

// ---------------------------------------------------------------------------
// Renames
// ---------------------------------------------------------------------------

#[test]
fn rename_via_uid_keeps_identifier() {
    let mut model = ModelInfo::new();
    run(
        &mut model,
        &[source("s", vec![entity("Foo", &[])])],
        ReconcileOptions::default(),
    );
    let before = model.entities[0].id;

    let bar = entity("Bar", &[]).with_uid(before.uid);
    run(
        &mut model,
        &[source("s", vec![bar])],
        ReconcileOptions::full_schema(),
    );

    assert_eq!(model.entities.len(), 1);
    let after = &model.entities[0];
    assert_eq!(after.name, "Bar");
    assert_eq!((after.id.id, after.id.uid), (before.id, before.uid));
    assert!(model.retired_entity_uids.is_empty());
}

#[test]
fn rename_updates_relation_targets() {
    let mut model = ModelInfo::new();
    let task = entity("Task", &[]).with_property(CandidateProperty::relation("owner", "User"));
    run(
        &mut model,
        &[source("s", vec![task, entity("User", &[])])],
        ReconcileOptions::default(),
    );
    let user_uid = model.find_entity_by_name("User").unwrap().id.uid;

    // Only the user file changes.
    let person = entity("Person", &[]).with_uid(user_uid);
    run(
        &mut model,
        &[source("user.fbs", vec![person])],
        ReconcileOptions::default(),
    );
    let owner = &model.find_entity_by_name("Task").unwrap().properties[1];
    assert_eq!(owner.relation_target.as_deref(), Some("Person"));
}

#[test]
fn property_rename_via_uid() {
    let mut model = ModelInfo::new();
    run(
        &mut model,
        &[source("s", vec![entity("Task", &[("text", PropertyType::String)])])],
        ReconcileOptions::default(),
    );
    let text = model.entities[0].properties[1].id;

    let renamed = CandidateEntity::new("Task")
        .with_property(CandidateProperty::id("id"))
        .with_property(CandidateProperty::new("body", PropertyType::String).with_uid(text.uid));
    run(
        &mut model,
        &[source("s", vec![renamed])],
        ReconcileOptions::default(),
    );
    let body = &model.entities[0].properties[1];
    assert_eq!(body.name, "body");
    assert_eq!((body.id.id, body.id.uid), (text.id, text.uid));
}

// ---------------------------------------------------------------------------
// Removal
// ---------------------------------------------------------------------------

#[test]
fn single_source_run_removes_undeclared_entity() {
    let mut model = ModelInfo::new();
    run(
        &mut model,
        &[source("s", vec![entity("A", &[]), entity("B", &[])])],
        ReconcileOptions::default(),
    );
    let b = model.find_entity_by_name("B").unwrap().clone();

    run(
        &mut model,
        &[source("a.fbs", vec![entity("A", &[])])],
        ReconcileOptions::full_schema(),
    );
    assert!(model.find_entity_by_name("B").is_none());
    assert!(model.is_retired(b.id.uid));
    for property in &b.properties {
        assert!(model.retired_property_uids.contains(&property.id.uid));
    }
}

#[test]
fn sequential_sources_keep_all_entities() {
    let mut model = ModelInfo::new();
    run(
        &mut model,
        &[source("s", vec![entity("A", &[]), entity("B", &[])])],
        ReconcileOptions::default(),
    );
    let before = model.to_json().unwrap();

    let sources = [
        source("a.fbs", vec![entity("A", &[])]),
        source("b.fbs", vec![entity("B", &[])]),
    ];
    run(&mut model, &sources, ReconcileOptions::full_schema());
    assert_eq!(model.entities.len(), 2);
    assert_eq!(model.to_json().unwrap(), before);
}

#[test]
fn absent_entities_are_reported_before_removal() {
    let mut model = ModelInfo::new();
    run(
        &mut model,
        &[source("s", vec![entity("A", &[]), entity("B", &[])])],
        ReconcileOptions::default(),
    );

    let mut alloc = UidAllocator::seeded(2);
    model.clear_presence();
    merge(&source("a.fbs", vec![entity("A", &[])]), &mut model, &mut alloc).unwrap();
    let absent: Vec<&str> = model.absent_entities().map(|e| e.name.as_str()).collect();
    assert_eq!(absent, vec!["B"]);
}

// ---------------------------------------------------------------------------
// Uid requests
// ---------------------------------------------------------------------------

#[test]
fn duplicate_uid_request_is_rejected() {
    let mut model = ModelInfo::new();
    run(
        &mut model,
        &[source(
            "s",
            vec![entity("Task", &[]), entity("Note", &[("text", PropertyType::String)])],
        )],
        ReconcileOptions::default(),
    );
    let foreign = model.find_entity_by_name("Note").unwrap().id.uid;
    let before = model.clone();

    let task = CandidateEntity::new("Task")
        .with_property(CandidateProperty::id("id"))
        .with_property(
            CandidateProperty::new("title", PropertyType::String)
                .with_uid_request(UidRequest::Assign(foreign)),
        );
    let mut alloc = UidAllocator::seeded(5);
    let err = reconcile(
        &mut model,
        &[source("task.fbs", vec![task])],
        &ReconcileOptions::default(),
        &mut alloc,
    )
    .unwrap_err();

    match &err {
        ModelError::DuplicateUid { uid, owner, .. } => {
            assert_eq!(*uid, foreign);
            assert!(owner.starts_with("entity Note"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(model
        .entities
        .iter()
        .flat_map(|e| &e.properties)
        .all(|p| p.id.uid != foreign));
    assert_eq!(model.to_json().unwrap(), before.to_json().unwrap());
}

#[test]
fn retired_uid_cannot_be_requested() {
    let mut model = ModelInfo::new();
    let full = ReconcileOptions::full_schema();
    run(
        &mut model,
        &[source("s", vec![entity("A", &[]), entity("B", &[])])],
        full,
    );
    let b_uid = model.find_entity_by_name("B").unwrap().id.uid;
    run(&mut model, &[source("s", vec![entity("A", &[])])], full);

    let c = entity("C", &[]).with_uid_request(UidRequest::Assign(b_uid));
    let mut alloc = UidAllocator::seeded(5);
    let err = reconcile(&mut model, &[source("s", vec![c])], &full, &mut alloc).unwrap_err();
    assert!(err.to_string().contains("a retired entity"));
}

#[test]
fn entity_uid_reset() {
    let mut model = ModelInfo::new();
    run(
        &mut model,
        &[source("s", vec![entity("Task", &[("text", PropertyType::String)])])],
        ReconcileOptions::default(),
    );
    let old = model.entities[0].clone();

    let reset = entity("Task", &[("text", PropertyType::String)])
        .with_uid_request(UidRequest::Assign(777));
    let mut alloc = UidAllocator::seeded(5);
    let report = reconcile(
        &mut model,
        &[source("s", vec![reset])],
        &ReconcileOptions::default(),
        &mut alloc,
    )
    .unwrap();

    let task = &model.entities[0];
    assert_eq!(task.id.uid, 777);
    assert_eq!(task.id.id, 2);
    assert!(old.owned_uids().iter().all(|uid| model.is_retired(*uid)));
    assert_eq!(report.warnings().count(), 1);
}

#[test]
fn entity_reset_keeps_relations_declared_in_another_source() {
    let tasks = || entity("Task", &[]).with_relation(CandidateRelation::new("tags", "Tag"));
    let tag_file = || {
        source(
            "tag.fbs",
            vec![entity("Tag", &[]).with_uid_request(UidRequest::Assign(424242))],
        )
    };

    for reset_first in [true, false] {
        let mut model = ModelInfo::new();
        let full = ReconcileOptions::full_schema();
        run(
            &mut model,
            &[source("s", vec![entity("Tag", &[]), tasks()])],
            full,
        );
        let old = model.find_entity_by_name("Tag").unwrap().id;

        let sources = if reset_first {
            [tag_file(), source("task.fbs", vec![tasks()])]
        } else {
            [source("task.fbs", vec![tasks()]), tag_file()]
        };
        run(&mut model, &sources, full);

        let tag = model.find_entity_by_name("Tag").unwrap();
        assert_eq!(tag.id.uid, 424242);
        let tags = model
            .find_entity_by_name("Task")
            .and_then(|t| t.find_relation_by_name("tags"))
            .unwrap();
        assert_eq!((tags.target_id.id, tags.target_id.uid), (tag.id.id, 424242));
        assert!(model.is_retired(old.uid));
    }
}

// ---------------------------------------------------------------------------
// Relations and ordering
// ---------------------------------------------------------------------------

#[test]
fn relation_to_entity_of_a_later_source_is_an_orphan() {
    let mut model = ModelInfo::new();
    let task = entity("Task", &[]).with_relation(CandidateRelation::new("tags", "Tag"));
    let sources = [
        source("task.fbs", vec![task]),
        source("tag.fbs", vec![entity("Tag", &[])]),
    ];
    let mut alloc = UidAllocator::seeded(5);
    let err = reconcile(
        &mut model,
        &sources,
        &ReconcileOptions::default(),
        &mut alloc,
    )
    .unwrap_err();
    assert!(matches!(
        err,
        ModelError::Invariant(InvariantViolation::OrphanRelationTarget { ref target, .. }) if target == "Tag"
    ));
}

#[test]
fn removing_a_relation_retires_it() {
    let mut model = ModelInfo::new();
    let with_tags = entity("Task", &[]).with_relation(CandidateRelation::new("tags", "Task"));
    run(
        &mut model,
        &[source("s", vec![with_tags])],
        ReconcileOptions::default(),
    );
    let relation = model.entities[0].relations[0].id;

    run(
        &mut model,
        &[source("s", vec![entity("Task", &[])])],
        ReconcileOptions::default(),
    );
    assert!(model.entities[0].relations.is_empty());
    assert_eq!(model.retired_relation_uids, vec![relation.uid]);
    assert_eq!(model.last_relation_id.unwrap().id, relation.id);
}

#[test]
fn reloaded_model_finalizes_cleanly() {
    let mut model = ModelInfo::new();
    let task = entity("Task", &[("text", PropertyType::String)])
        .with_property(CandidateProperty::relation("owner", "User"))
        .with_relation(CandidateRelation::new("watchers", "User"));
    run(
        &mut model,
        &[source("s", vec![task, entity("User", &[])])],
        ReconcileOptions::full_schema(),
    );

    let saved = model.to_json().unwrap();
    let mut reloaded = ModelInfo::from_json(&saved).unwrap();
    finalize(&mut reloaded).unwrap();
    assert_eq!(reloaded.to_json().unwrap(), saved);
}
