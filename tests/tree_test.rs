mod common;

use common::*;
use pulse::attributes::AttributeDefinition;
use pulse::blueprint::{BlueprintBuilder, BuildStep, StepKind, StepTree};
use pulse::error::{EditError, Severity, StepError, StructureError, ValidationError};
use pulse::Blueprint;
use serde_json::json;

fn sample_tree() -> (StepTree, [pulse::blueprint::StepId; 4]) {
    let mut tree = StepTree::new();
    let root = tree.root();
    let arm = tree.add_child(root, BuildStep::group("Arm"), None).unwrap();
    let hand = tree.add_child(arm, BuildStep::group("Hand"), None).unwrap();
    let finger = tree.add_child(hand, BuildStep::group("Finger"), None).unwrap();
    let leg = tree.add_child(root, BuildStep::group("Leg"), None).unwrap();
    (tree, [arm, hand, finger, leg])
}

#[test]
fn test_moving_group_beneath_descendant_fails() {
    let (mut tree, [arm, _hand, finger, _leg]) = sample_tree();
    let before = tree.clone();

    let err = tree.move_step(arm, finger, None).unwrap_err();
    assert!(matches!(err, StructureError::Cycle { .. }));
    assert_eq!(tree, before);

    assert!(matches!(tree.move_step(arm, arm, None), Err(StructureError::Cycle { .. })));
    assert_eq!(tree, before);
}

#[test]
fn test_move_reparents_and_reorders() {
    let (mut tree, [arm, hand, _finger, leg]) = sample_tree();
    tree.move_step(hand, tree.root(), Some(0)).unwrap();

    assert_eq!(tree.children(tree.root()), &[hand, arm, leg]);
    assert!(tree.children(arm).is_empty());
    assert_eq!(tree.path(hand), "Hand");
    assert_eq!(tree.find("Hand/Finger"), tree.children(hand).first().copied());

    // index counts positions after the step is detached
    tree.move_step(hand, tree.root(), Some(2)).unwrap();
    assert_eq!(tree.children(tree.root()), &[arm, leg, hand]);

    let err = tree.move_step(hand, tree.root(), Some(4)).unwrap_err();
    assert_eq!(err, StructureError::IndexOutOfBounds { index: 4, len: 2 });
}

#[test]
fn test_add_child_checks_bounds_and_parent_kind() {
    let (registry, _log) = test_registry();
    let (mut tree, [arm, ..]) = sample_tree();
    let before = tree.clone();

    let err = tree.add_child(arm, BuildStep::group("Late"), Some(3)).unwrap_err();
    assert_eq!(err, StructureError::IndexOutOfBounds { index: 3, len: 1 });
    assert_eq!(tree, before);

    let action = tree
        .add_child(arm, Blueprint::action_step(&registry, "Scripted", SCRIPTED), Some(0))
        .unwrap();
    let err = tree.add_child(action, BuildStep::group("Child"), None).unwrap_err();
    assert!(matches!(err, StructureError::NotAGroup(path) if path == "Arm/Scripted"));
}

#[test]
fn test_sibling_names_are_unique() {
    let mut tree = StepTree::new();
    let root = tree.root();
    let a = tree.add_child(root, BuildStep::group("Ctl"), None).unwrap();
    let b = tree.add_child(root, BuildStep::group("Ctl"), None).unwrap();
    let c = tree.add_child(root, BuildStep::group("Ctl"), None).unwrap();
    let d = tree.add_child(root, BuildStep::group("Ctl 1"), None).unwrap();

    let names: Vec<&str> = [a, b, c, d].iter().map(|id| tree.step(*id).unwrap().name.as_str()).collect();
    assert_eq!(names, vec!["Ctl", "Ctl 1", "Ctl 2", "Ctl 3"]);

    tree.rename(a, "Ctl 2").unwrap();
    assert_eq!(tree.step(a).unwrap().name, "Ctl 4");
    tree.rename(a, "Ctl").unwrap();
    assert_eq!(tree.step(a).unwrap().name, "Ctl");
}

#[test]
fn test_remove_subtree() {
    let (mut tree, [arm, hand, finger, leg]) = sample_tree();
    assert_eq!(tree.len(), 5);

    let removed = tree.remove(arm).unwrap();
    assert_eq!(removed.name, "Arm");
    assert_eq!(tree.len(), 2);
    assert!(tree.step(hand).is_none());
    assert!(tree.step(finger).is_none());
    assert_eq!(tree.children(tree.root()), &[leg]);
    assert!(tree.find("Arm/Hand").is_none());

    assert_eq!(tree.remove(tree.root()), Err(StructureError::RootImmutable));
    assert!(matches!(tree.remove(arm), Err(StructureError::StepNotFound(_))));
}

#[test]
fn test_removed_slots_are_reused() {
    let (mut tree, [arm, hand, finger, leg]) = sample_tree();
    let capacity = tree.capacity();
    tree.remove(arm).unwrap();

    let root = tree.root();
    let added: Vec<_> = ["Neck", "Head", "Jaw"]
        .into_iter()
        .map(|name| tree.add_child(root, BuildStep::group(name), None).unwrap())
        .collect();

    assert_eq!(tree.capacity(), capacity);
    assert_eq!(tree.len(), 5);
    for stale in [arm, hand, finger] {
        assert!(tree.step(stale).is_none());
        assert!(matches!(tree.get(stale), Err(StructureError::StepNotFound(_))));
        assert!(added.iter().any(|id| id.index() == stale.index()));
    }
    assert!(matches!(tree.remove(hand), Err(StructureError::StepNotFound(_))));
    assert_eq!(tree.step(added[0]).unwrap().name, "Neck");
    assert_eq!(tree.children(root), &[leg, added[0], added[1], added[2]]);
}

#[test]
fn test_paths_and_preorder() {
    let (tree, [arm, hand, finger, leg]) = sample_tree();
    assert_eq!(tree.path(finger), "Arm/Hand/Finger");
    assert_eq!(tree.find("Arm/Hand/Finger"), Some(finger));
    assert_eq!(tree.find("Arm/Nope"), None);
    assert_eq!(tree.descendants(tree.root()), vec![tree.root(), arm, hand, finger, leg]);
    assert_eq!(tree.step(arm).unwrap().display_name(), "Arm (1)");
}

#[test]
fn test_set_attr_rejects_invalid_values() {
    let (registry, _log) = test_registry();
    let mut blueprint = BlueprintBuilder::new(&registry)
        .action("Scripted", SCRIPTED).attr("label", "first").build()
        .build();
    let id = blueprint.tree.find("Scripted").unwrap();

    assert_eq!(blueprint.get_attr(id, "label").unwrap(), json!("first"));
    assert_eq!(blueprint.get_attr(id, "outcome").unwrap(), json!(0));

    let err = blueprint.set_attr(id, "outcome", json!(9)).unwrap_err();
    assert!(matches!(err, EditError::Validation(ValidationError::OptionOutOfRange { .. })));
    assert_eq!(blueprint.get_attr(id, "outcome").unwrap(), json!(0));

    let err = blueprint.set_attr(id, "label", json!(12)).unwrap_err();
    assert!(matches!(err, EditError::Validation(ValidationError::TypeMismatch { .. })));
    assert_eq!(blueprint.get_attr(id, "label").unwrap(), json!("first"));

    let err = blueprint.set_attr(id, "colour", json!("red")).unwrap_err();
    assert!(matches!(err, EditError::Validation(ValidationError::UnknownAttribute { .. })));

    blueprint.set_attr(id, "weight", json!(0.25)).unwrap();
    assert_eq!(blueprint.get_attr(id, "weight").unwrap(), json!(0.25));
    assert_eq!(blueprint.reset_attr(id, "weight").unwrap(), Some(json!(0.25)));
    assert_eq!(blueprint.get_attr(id, "weight").unwrap(), json!(0.0));

    let group = blueprint.root();
    assert!(matches!(
        blueprint.get_attr(group, "label"),
        Err(EditError::Structure(StructureError::NotAnAction(_)))
    ));
}

#[test]
fn test_set_attr_checks_expression_results() {
    let (registry, _log) = test_registry();
    let mut blueprint = BlueprintBuilder::new(&registry)
        .var("half", 0.5)
        .var("name", "wrist")
        .action("Scripted", SCRIPTED).build()
        .build();
    let id = blueprint.tree.find("Scripted").unwrap();

    blueprint.set_attr(id, "weight", json!("${half}")).unwrap();
    assert_eq!(blueprint.get_attr(id, "weight").unwrap(), json!("${half}"));
    assert!(blueprint.set_attr(id, "weight", json!("${name}")).is_err());
    assert!(blueprint.set_attr(id, "weight", json!("=half * 4")).is_err());
}

#[test]
fn test_unresolved_steps_reject_edits() {
    let (registry, _log) = test_registry();
    let mut blueprint = BlueprintBuilder::new(&registry)
        .action("Ghost", "Plugin.Missing").attr("size", 2).build()
        .build();
    let id = blueprint.tree.find("Ghost").unwrap();
    assert!(matches!(blueprint.set_attr(id, "size", json!(3)), Err(EditError::UnresolvedAction(_))));
}

#[test]
fn test_batch_variant_editing() {
    let (registry, _log) = test_registry();
    let mut blueprint = BlueprintBuilder::new(&registry)
        .batch("Fingers", SCRIPTED).attr("label", "finger").build()
        .build();
    let id = blueprint.tree.find("Fingers").unwrap();

    assert_eq!(blueprint.add_variant(id).unwrap(), 0);
    assert_eq!(blueprint.add_variant(id).unwrap(), 1);
    blueprint.set_variant_attr(id, 1, "outcome", json!(1)).unwrap();
    assert!(blueprint.set_variant_attr(id, 1, "outcome", json!(7)).is_err());
    assert!(matches!(
        blueprint.set_variant_attr(id, 5, "outcome", json!(1)),
        Err(EditError::Structure(StructureError::VariantOutOfBounds { index: 5, len: 2 }))
    ));

    blueprint.set_variant_attr_enabled(id, "label", true).unwrap();
    let StepKind::Batch(batch) = &blueprint.tree.step(id).unwrap().kind else {
        panic!("not a batch");
    };
    assert_eq!(batch.variant_attrs, vec!["label"]);
    assert!(!batch.base.attrs.contains_key("label"));
    let expanded: Vec<_> = batch.expand().collect();
    assert_eq!(expanded.len(), 2);
    assert_eq!(expanded[0].get("label"), Some(&json!("finger")));
    assert_eq!(expanded[1].get("outcome"), Some(&json!(1)));
    assert_eq!(blueprint.tree.step(id).unwrap().display_name(), "Fingers (x2)");

    let removed = blueprint.remove_variant(id, 0).unwrap();
    assert_eq!(removed.get("label"), Some(&json!("finger")));
    assert!(blueprint.remove_variant(id, 3).is_err());

    let group = blueprint.tree.add_child(blueprint.root(), BuildStep::group("Plain"), None).unwrap();
    assert!(matches!(
        blueprint.add_variant(group),
        Err(EditError::Structure(StructureError::NotABatch(_)))
    ));
}

#[test]
fn test_validate_reports_in_preorder() {
    let (registry, _log) = test_registry();
    let blueprint = BlueprintBuilder::new(&registry)
        .group("First")
        .action("Bad", SCRIPTED).attr("label", "").build()
        .action("Odd", SCRIPTED).attr("mystery", 1).build()
        .end()
        .group("Empty")
        .end()
        .batch("Batch", SCRIPTED)
        .attr("outcome", 0)
        .variant_attr("outcome")
        .variant([("weight", json!(2.0))])
        .build()
        .action("Off", SCRIPTED).attr("label", "").disabled().build()
        .build();

    let issues = blueprint.validate();
    let summary: Vec<(&str, Severity, Option<usize>)> =
        issues.iter().map(|i| (i.path.as_str(), i.severity, i.variant)).collect();
    assert_eq!(
        summary,
        vec![
            ("First/Bad", Severity::Error, None),
            ("First/Odd", Severity::Warning, None),
            ("Empty", Severity::Warning, None),
            ("Batch", Severity::Warning, None),
            ("Batch", Severity::Error, Some(0)),
        ]
    );
    assert!(matches!(issues[0].error, StepError::Validation(ValidationError::Required { .. })));
    assert!(matches!(issues[4].error, StepError::Validation(ValidationError::OutOfRange { .. })));
}

#[test]
fn test_resolve_actions_after_late_registration() {
    let (registry, log) = test_registry();
    let mut blueprint = BlueprintBuilder::new(&registry)
        .action("Later", "Late.Scripted").attr("label", "late").build()
        .build();
    assert_eq!(blueprint.validate().len(), 1);

    registry
        .register_source("test:late", vec![scripted_entry(scripted_spec("Late.Scripted"), &log)])
        .unwrap();
    assert_eq!(blueprint.resolve_actions(&registry), 1);
    assert!(blueprint.validate().is_empty());
}

#[test]
fn test_resolve_actions_replaces_stale_specs() {
    let (registry, log) = test_registry();
    let mut blueprint = BlueprintBuilder::new(&registry)
        .action("Step", SCRIPTED).attr("label", "step").build()
        .build();
    assert!(blueprint.validate().is_empty());

    registry.reset();
    let revised = scripted_spec(SCRIPTED).attr(AttributeDefinition::new("target", "string"));
    registry
        .register_source("test:revised", vec![scripted_entry(revised, &log)])
        .unwrap();
    assert_eq!(blueprint.resolve_actions(&registry), 0);

    let issues = blueprint.validate();
    assert_eq!(issues.len(), 1);
    assert!(matches!(
        &issues[0].error,
        StepError::Validation(ValidationError::Required { attr }) if attr == "target"
    ));

    registry.reset();
    blueprint.resolve_actions(&registry);
    let issues = blueprint.validate();
    assert_eq!(issues.len(), 1);
    assert!(matches!(issues[0].error, StepError::UnresolvedAction(_)));
}

#[test]
fn test_empty_rig_name_is_a_pre_build_error() {
    let (registry, _log) = test_registry();
    let blueprint = BlueprintBuilder::new(&registry).build();
    let issues = blueprint.pre_build_issues();
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].severity, Severity::Error);
    assert_eq!(issues[0].step, blueprint.root());
    assert!(matches!(
        &issues[0].error,
        StepError::Validation(ValidationError::Required { attr }) if attr == "rigName"
    ));

    let blank = BlueprintBuilder::new(&registry).setting("rigName", "  ").build();
    assert_eq!(blank.pre_build_issues().len(), 1);
    assert!(rig_builder(&registry).build().pre_build_issues().is_empty());
}
