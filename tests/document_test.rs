mod common;

use std::collections::BTreeMap;

use common::*;
use proptest::prelude::*;
use pulse::Blueprint;
use pulse::blueprint::{ActionDocument, BlueprintBuilder, BlueprintDocument, Settings, StepDocument, StepKind};
use serde_json::{Value, json};
use tempfile::tempdir;

const RIG_YAML: &str = r#"
version: 1
settings:
  rigName: hero
variables:
  side: L
steps:
  - name: Setup
    children:
      - name: Root Node
        action:
          id: Core.CreateNode
          attrs:
            name: "${side}_root"
            translate: [0, 1, 0]
      - name: Note
        disabled: true
        action:
          id: Core.Log
          attrs:
            message: skipped
  - name: Fingers
    action:
      id: Test.Scripted
      attrs:
        outcome: 0
      variantAttrs: [label]
      variants:
        - label: index
        - label: middle
          weight: 0.5
  - name: Plugin
    action:
      id: Plugin.Muscle
      attrs:
        stiffness: 3
"#;

#[test]
fn test_yaml_document_round_trip() {
    let (registry, _log) = test_registry();
    let blueprint = Blueprint::from_yaml_str(RIG_YAML, &registry).unwrap();

    assert_eq!(blueprint.settings.rig_name(), "hero");
    assert_eq!(blueprint.variables["side"], json!("L"));
    assert_eq!(blueprint.tree.len(), 6);

    let note = blueprint.tree.find("Setup/Note").unwrap();
    assert!(blueprint.tree.step(note).unwrap().disabled);

    let fingers = blueprint.tree.find("Fingers").unwrap();
    let StepKind::Batch(batch) = &blueprint.tree.step(fingers).unwrap().kind else {
        panic!("not a batch");
    };
    assert_eq!(batch.variants.len(), 2);
    assert_eq!(batch.variant_attrs, vec!["label"]);

    let again = Blueprint::from_yaml_str(&blueprint.to_yaml_string().unwrap(), &registry).unwrap();
    assert_eq!(again.to_document(), blueprint.to_document());
}

#[test]
fn test_unknown_action_is_kept_as_placeholder() {
    let (registry, _log) = test_registry();
    let blueprint = Blueprint::from_yaml_str(RIG_YAML, &registry).unwrap();

    let plugin = blueprint.tree.find("Plugin").unwrap();
    let binding = blueprint.tree.step(plugin).unwrap().binding().unwrap();
    assert!(!binding.is_resolved());
    assert_eq!(binding.attrs["stiffness"], json!(3));

    let doc = blueprint.to_document();
    let saved = doc.steps.iter().find(|s| s.name == "Plugin").unwrap();
    assert_eq!(
        saved.action,
        Some(ActionDocument {
            id: "Plugin.Muscle".to_string(),
            attrs: BTreeMap::from([("stiffness".to_string(), json!(3))]),
            ..Default::default()
        })
    );
}

#[test]
fn test_save_and_load_files() {
    let (registry, _log) = test_registry();
    let blueprint = BlueprintBuilder::new(&registry)
        .setting("rigName", "hero")
        .var("height", 2.0)
        .group("Spine")
        .action("Hips", "Core.CreateNode").attr("name", "hips").attr("translate", json!([0, "=height", 0])).build()
        .end()
        .build();
    let dir = tempdir().unwrap();

    for file in ["rig.yaml", "rig.json"] {
        let path = dir.path().join(file);
        blueprint.save(&path).unwrap();
        let loaded = Blueprint::load(&path, &registry).unwrap();
        assert_eq!(loaded.to_document(), blueprint.to_document(), "{}", file);
    }

    let json = std::fs::read_to_string(dir.path().join("rig.json")).unwrap();
    assert!(json.trim_start().starts_with('{'));

    let err = Blueprint::load(dir.path().join("missing.yaml"), &registry).unwrap_err();
    assert!(err.to_string().contains("Failed to read blueprint"));
}

#[test]
fn test_newer_version_is_rejected() {
    let (registry, _log) = test_registry();
    let err = Blueprint::from_yaml_str("version: 9\nsteps: []\n", &registry).unwrap_err();
    assert!(err.to_string().contains("newer"));
}

#[test]
fn test_action_with_children_is_rejected() {
    let (registry, _log) = test_registry();
    let doc = BlueprintDocument {
        version: 1,
        steps: vec![StepDocument {
            name: "Odd".to_string(),
            action: Some(ActionDocument {
                id: SCRIPTED.to_string(),
                ..Default::default()
            }),
            children: vec![StepDocument {
                name: "Child".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        }],
        ..Default::default()
    };
    assert!(Blueprint::from_document(&doc, &registry).is_err());
}

#[test]
fn test_variant_attrs_require_a_batch() {
    let (registry, _log) = test_registry();
    let yaml = r#"
steps:
  - name: Single
    action:
      id: Test.Scripted
      variantAttrs: [label]
"#;
    let err = Blueprint::from_yaml_str(yaml, &registry).unwrap_err();
    assert!(format!("{:#}", err).contains("variantAttrs"));

    let batch = yaml.replace("variantAttrs: [label]", "variantAttrs: [label]\n      variants: []");
    let blueprint = Blueprint::from_yaml_str(&batch, &registry).unwrap();
    let id = blueprint.tree.find("Single").unwrap();
    match &blueprint.tree.step(id).unwrap().kind {
        StepKind::Batch(batch) => assert_eq!(batch.variant_attrs, vec!["label"]),
        other => panic!("expected a batch, got {:?}", other),
    }
}

#[test]
fn test_settings_accessors() {
    let mut settings = Settings::default();
    assert_eq!(settings.rig_node_name(), "_rig");
    assert!(!settings.debug_build());

    settings.set("rigName", "hero");
    assert_eq!(settings.rig_node_name(), "hero_rig");
    settings.set("rigNodeNameFormat", "RIG_{rigName}");
    assert_eq!(settings.rig_node_name(), "RIG_hero");

    let defaults = BTreeMap::from([
        ("rigName".to_string(), json!("villain")),
        ("debugBuild".to_string(), json!(true)),
    ]);
    settings.merge_defaults(&defaults);
    assert_eq!(settings.rig_name(), "hero");
    assert!(settings.debug_build());
}

fn value() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<bool>().prop_map(Value::from),
        any::<i32>().prop_map(Value::from),
        "[a-z]{0,6}".prop_map(Value::from),
    ]
}

fn attrs() -> impl Strategy<Value = BTreeMap<String, Value>> {
    prop::collection::btree_map("[a-z]{1,5}", value(), 0..3)
}

fn action() -> impl Strategy<Value = ActionDocument> {
    (
        prop_oneof![Just(SCRIPTED), Just("Plugin.Missing")],
        attrs(),
        prop::option::of(prop::collection::vec(attrs(), 0..3)),
        prop::collection::vec("[a-z]{1,5}", 0..2),
    )
        .prop_map(|(id, attrs, variants, variant_attrs)| ActionDocument {
            id: id.to_string(),
            attrs,
            variant_attrs: if variants.is_some() { variant_attrs } else { Vec::new() },
            variants,
        })
}

fn step() -> impl Strategy<Value = StepDocument> {
    let leaf = prop_oneof![
        ("[A-Z][a-z]{0,5}", any::<bool>(), action()).prop_map(|(name, disabled, action)| StepDocument {
            name,
            disabled,
            action: Some(action),
            children: Vec::new(),
        }),
        ("[A-Z][a-z]{0,5}", any::<bool>()).prop_map(|(name, disabled)| StepDocument {
            name,
            disabled,
            ..Default::default()
        }),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        ("[A-Z][a-z]{0,5}", any::<bool>(), prop::collection::vec(inner, 0..4)).prop_map(|(name, disabled, children)| {
            StepDocument {
                name,
                disabled,
                action: None,
                children,
            }
        })
    })
}

proptest! {
    #[test]
    fn prop_document_survives_rebuild(
        steps in prop::collection::vec(step(), 0..4),
        variables in attrs(),
        settings in attrs(),
    ) {
        let (registry, _log) = test_registry();
        let doc = BlueprintDocument { version: 1, settings, variables, steps };

        let text = serde_json::to_string(&doc).unwrap();
        let parsed: BlueprintDocument = serde_json::from_str(&text).unwrap();
        let blueprint = Blueprint::from_document(&parsed, &registry).unwrap();
        prop_assert_eq!(blueprint.to_document(), doc);
    }
}
