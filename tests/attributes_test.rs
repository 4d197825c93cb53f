use std::collections::{BTreeMap, HashSet};

use proptest::prelude::*;
use pulse::attributes::{self, AttrType, AttributeDefinition, AttributeValues, NodeLookup, check_value, expr};
use pulse::error::{RegistrationError, ValidationError};
use serde_json::{Value, json};

struct Nodes(HashSet<&'static str>);

impl NodeLookup for Nodes {
    fn contains_node(&self, name: &str) -> bool {
        self.0.contains(name)
    }
}

fn nodes(names: &[&'static str]) -> Nodes {
    Nodes(names.iter().copied().collect())
}

#[test]
fn test_type_tags() {
    assert_eq!(AttrType::from("vector3"), AttrType::Vector(3));
    assert_eq!(AttrType::from("nodelist"), AttrType::NodeList);
    assert_eq!(AttrType::from("color"), AttrType::Unknown("color".to_string()));
    assert_eq!(AttrType::Vector(2).to_string(), "vector2");

    let def: AttributeDefinition = serde_yaml::from_str("name: size\ntype: matrix\n").unwrap();
    assert_eq!(def.attr_type, AttrType::Unknown("matrix".to_string()));
    assert!(matches!(
        def.check_definition("Rig.Thing"),
        Err(RegistrationError::UnknownAttributeType { tag, .. }) if tag == "matrix"
    ));
}

#[test]
fn test_definition_checks() {
    let no_options = AttributeDefinition::new("mode", "option");
    assert!(no_options.check_definition("A.B").is_err());

    let inverted = AttributeDefinition::new("size", "float").range(Some(2.0), Some(1.0));
    assert!(inverted.check_definition("A.B").is_err());

    let bad_default = AttributeDefinition::new("size", "int").range(Some(0.0), Some(5.0)).default_value(9);
    assert!(bad_default.check_definition("A.B").is_err());

    let good = AttributeDefinition::new("size", "int").range(Some(0.0), Some(5.0)).default_value(3);
    assert!(good.check_definition("A.B").is_ok());
}

#[test]
fn test_type_defaults_are_valid() {
    for tag in ["bool", "int", "float", "string", "stringlist", "vector3", "nodelist", "file"] {
        let def = AttributeDefinition::new("x", tag);
        assert!(check_value(&def, &def.default_or_type()).is_ok(), "{}", tag);
    }
    let def = AttributeDefinition::new("x", "option").options(["a", "b"]);
    assert_eq!(def.default_or_type(), json!(0));
    assert!(check_value(&def, &def.default_or_type()).is_ok());
}

#[test]
fn test_type_mismatch() {
    let def = AttributeDefinition::new("count", "int");
    assert!(matches!(
        check_value(&def, &json!("three")),
        Err(ValidationError::TypeMismatch { found, .. }) if found == "string"
    ));
    assert!(check_value(&def, &json!(1.5)).is_err());
    assert!(check_value(&AttributeDefinition::new("on", "bool"), &json!(1)).is_err());
    assert!(check_value(&AttributeDefinition::new("names", "stringlist"), &json!(["a", 1])).is_err());
}

#[test]
fn test_vector_arity() {
    let def = AttributeDefinition::new("offset", "vector3");
    assert!(check_value(&def, &json!([1, 2.5, -3])).is_ok());
    assert_eq!(
        check_value(&def, &json!([1, 2])),
        Err(ValidationError::ArityMismatch {
            attr: "offset".to_string(),
            expected: 3,
            found: 2
        })
    );
}

#[test]
fn test_required_values() {
    let name = AttributeDefinition::new("name", "string");
    assert_eq!(
        attributes::validate(&name, &json!(""), None),
        Err(ValidationError::Required { attr: "name".to_string() })
    );
    let optional_name = AttributeDefinition::new("name", "string").optional();
    assert!(attributes::validate(&optional_name, &json!(""), None).is_ok());

    let node = AttributeDefinition::new("target", "node");
    assert!(attributes::validate(&node, &Value::Null, None).is_err());
    assert!(attributes::validate(&node.clone().optional(), &Value::Null, None).is_ok());
}

#[test]
fn test_node_references_resolve_against_lookup() {
    let scene = nodes(&["hips", "spine"]);
    let node = AttributeDefinition::new("target", "node");
    assert!(attributes::validate(&node, &json!("hips"), Some(&scene)).is_ok());
    assert_eq!(
        attributes::validate(&node, &json!("head"), Some(&scene)),
        Err(ValidationError::UnresolvedNode {
            attr: "target".to_string(),
            node: "head".to_string()
        })
    );
    // without a lookup the reference is only shape-checked
    assert!(attributes::validate(&node, &json!("head"), None).is_ok());

    let list = AttributeDefinition::new("chain", "nodelist");
    assert!(attributes::validate(&list, &json!([]), Some(&scene)).is_ok());
    assert!(attributes::validate(&list, &json!(["hips", "spine"]), Some(&scene)).is_ok());
    assert!(attributes::validate(&list, &json!(["hips", "head"]), Some(&scene)).is_err());
    assert!(attributes::validate(&list, &json!(["hips", ""]), Some(&scene)).is_err());
}

#[test]
fn test_expressions() {
    let mut vars = BTreeMap::new();
    vars.insert("side".to_string(), json!("L"));
    vars.insert("count".to_string(), json!(3));

    assert!(expr::is_expression(&json!("${side}")));
    assert!(expr::is_expression(&json!([1, "=count"])));
    assert!(!expr::is_expression(&json!("plain")));

    assert_eq!(expr::resolve("a", &json!("${side}"), &vars).unwrap(), json!("L"));
    assert_eq!(expr::resolve("a", &json!("=count * 2 + 1"), &vars).unwrap(), json!(7));
    assert_eq!(expr::resolve("a", &json!("=side + \"_arm\""), &vars).unwrap(), json!("L_arm"));
    assert_eq!(expr::resolve("a", &json!([0, "${count}"]), &vars).unwrap(), json!([0, 3]));
    assert!(matches!(
        expr::resolve("a", &json!("${missing}"), &vars),
        Err(ValidationError::Expression { .. })
    ));
    assert!(expr::resolve("a", &json!("=count +"), &vars).is_err());
}

#[test]
fn test_attribute_values_accessors() {
    let mut values = BTreeMap::new();
    values.insert("flag".to_string(), json!(true));
    values.insert("size".to_string(), json!(2.5));
    values.insert("count".to_string(), json!(4));
    values.insert("parent".to_string(), Value::Null);
    values.insert("chain".to_string(), json!(["a", "b"]));
    values.insert("offset".to_string(), json!([1, 2, 3]));
    let values = AttributeValues::new(values);

    assert!(values.get_bool("flag").unwrap());
    assert_eq!(values.get_float("size").unwrap(), 2.5);
    assert_eq!(values.get_float("count").unwrap(), 4.0);
    assert_eq!(values.get_int("count").unwrap(), 4);
    assert_eq!(values.get_node("parent").unwrap(), None);
    assert_eq!(values.get_nodes("chain").unwrap(), vec!["a", "b"]);
    assert_eq!(values.get_vector("offset").unwrap(), vec![1.0, 2.0, 3.0]);
    assert!(values.get_str("flag").is_err());
    assert!(values.get_bool("nope").is_err());
}

proptest! {
    #[test]
    fn prop_int_bounds(min in -100i64..100, span in 0i64..100, value in -300i64..300) {
        let max = min + span;
        let def = AttributeDefinition::new("n", "int").range(Some(min as f64), Some(max as f64));
        let result = check_value(&def, &json!(value));
        if value >= min && value <= max {
            prop_assert!(result.is_ok());
        } else {
            let is_out_of_range = matches!(result, Err(ValidationError::OutOfRange { .. }));
            prop_assert!(is_out_of_range);
        }
    }

    #[test]
    fn prop_float_bounds(min in -10.0f64..10.0, span in 0.0f64..10.0, value in -30.0f64..30.0) {
        let max = min + span;
        let def = AttributeDefinition::new("f", "float").range(Some(min), Some(max));
        let result = check_value(&def, &json!(value));
        prop_assert_eq!(result.is_ok(), value >= min && value <= max);
    }

    #[test]
    fn prop_option_index(count in 1usize..6, index in -3i64..10) {
        let labels: Vec<String> = (0..count).map(|i| format!("o{}", i)).collect();
        let def = AttributeDefinition::new("mode", "option").options(labels);
        let result = check_value(&def, &json!(index));
        if index >= 0 && (index as usize) < count {
            prop_assert!(result.is_ok());
        } else {
            let is_out_of_range = matches!(result, Err(ValidationError::OptionOutOfRange { .. }));
            prop_assert!(is_out_of_range);
        }
    }

    #[test]
    fn prop_vector_components(arity in 2usize..5, items in prop::collection::vec(-5.0f64..5.0, 0..6)) {
        let def = AttributeDefinition::new("v", AttrType::Vector(arity)).range(Some(-1.0), Some(1.0));
        let in_bounds = items.iter().all(|x| (-1.0..=1.0).contains(x));
        let result = check_value(&def, &json!(items));
        prop_assert_eq!(result.is_ok(), items.len() == arity && in_bounds);
    }

    #[test]
    fn prop_unbounded_values_of_matching_shape(b in any::<bool>(), s in "[a-z]{0,8}", n in any::<i32>()) {
        prop_assert!(check_value(&AttributeDefinition::new("b", "bool"), &json!(b)).is_ok());
        prop_assert!(check_value(&AttributeDefinition::new("s", "string"), &json!(s)).is_ok());
        prop_assert!(check_value(&AttributeDefinition::new("f", "file"), &json!(s)).is_ok());
        prop_assert!(check_value(&AttributeDefinition::new("i", "int"), &json!(n)).is_ok());
        prop_assert!(check_value(&AttributeDefinition::new("x", "float"), &json!(n)).is_ok());
    }
}
