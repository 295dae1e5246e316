use serde_json::{json, Value};
use zapmcp::ToolParameters;

fn required_of(schema: &Value) -> Vec<String> {
    schema["required"].as_array().map_or_else(Vec::new, |arr| {
        arr.iter()
            .map(|v| v.as_str().unwrap().to_string())
            .collect()
    })
}

#[derive(ToolParameters)]
#[allow(dead_code)]
struct BasicParams {
    name: String,
    age: i32,
}

#[test]
fn test_basic_params() {
    let schema = BasicParams::input_schema();
    assert_eq!(schema["type"], "object");
    assert_eq!(schema["properties"]["name"]["type"], "string");
    assert_eq!(schema["properties"]["age"]["type"], "integer");
    assert_eq!(required_of(&schema), vec!["name", "age"]);
}

#[derive(ToolParameters)]
#[allow(dead_code)]
struct OptionalParams {
    id: String,
    note: Option<String>,
    ratio: Option<f64>,
}

#[test]
fn test_option_is_not_required() {
    let schema = OptionalParams::input_schema();
    assert_eq!(schema["properties"]["note"]["type"], "string");
    assert_eq!(schema["properties"]["ratio"]["type"], "number");
    assert_eq!(required_of(&schema), vec!["id"]);
}

#[derive(ToolParameters)]
#[allow(dead_code)]
struct CollectionParams {
    tags: Vec<String>,
    weights: std::collections::HashMap<String, f32>,
    raw: Value,
}

#[test]
fn test_collections_and_raw_values() {
    let schema = CollectionParams::input_schema();
    assert_eq!(
        schema["properties"]["tags"],
        json!({ "type": "array", "items": { "type": "string" } })
    );
    assert_eq!(
        schema["properties"]["weights"],
        json!({ "type": "object", "additionalProperties": { "type": "number" } })
    );
    assert_eq!(schema["properties"]["raw"], json!({}));
}

#[derive(ToolParameters)]
#[allow(dead_code)]
struct DescribedParams {
    #[param(desc = "The unique identifier.")]
    id: String,
    /// City to look up.
    city: String,
}

#[test]
fn test_descriptions_from_attribute_and_doc_comment() {
    let schema = DescribedParams::input_schema();
    assert_eq!(
        schema["properties"]["id"]["description"],
        "The unique identifier."
    );
    assert_eq!(schema["properties"]["city"]["description"], "City to look up.");
}

#[derive(ToolParameters)]
#[allow(dead_code)]
struct RenamedParams {
    #[param(rename = "userIdentifier")]
    user_id: String,
    r#type: String,
    #[param(skip)]
    internal: i32,
}

#[test]
fn test_rename_raw_identifiers_and_skip() {
    let schema = RenamedParams::input_schema();
    let properties = schema["properties"].as_object().unwrap();
    assert!(properties.contains_key("userIdentifier"));
    assert!(properties.contains_key("type"));
    assert!(!properties.contains_key("user_id"));
    assert!(!properties.contains_key("internal"));
    assert_eq!(required_of(&schema), vec!["userIdentifier", "type"]);
}

#[derive(ToolParameters)]
#[allow(dead_code)]
struct RequiredOverrides {
    #[param(required = false)]
    name: String,
    #[param(required)]
    description: Option<String>,
    #[param(required = true)]
    code: Option<i32>,
}

#[test]
fn test_required_overrides() {
    let schema = RequiredOverrides::input_schema();
    assert_eq!(schema["properties"]["code"]["type"], "integer");
    assert_eq!(required_of(&schema), vec!["description", "code"]);
}

#[derive(ToolParameters)]
#[allow(dead_code)]
struct Inner {
    detail: String,
    #[param(desc = "An optional detail code")]
    detail_code: Option<i32>,
}

#[derive(ToolParameters)]
#[allow(dead_code)]
struct Outer {
    id: i32,
    inner: Inner,
    optional_inner: Option<Inner>,
    #[param(desc = "A list of inner details")]
    inner_list: Vec<Inner>,
}

#[test]
fn test_nested_structs_compose() {
    let inner_expected = json!({
        "type": "object",
        "properties": {
            "detail": { "type": "string" },
            "detail_code": { "type": "integer", "description": "An optional detail code" }
        },
        "required": ["detail"]
    });
    assert_eq!(Inner::input_schema(), inner_expected);

    let outer = Outer::input_schema();
    assert_eq!(outer["properties"]["inner"], inner_expected);
    assert_eq!(outer["properties"]["optional_inner"], inner_expected);
    assert_eq!(outer["properties"]["inner_list"]["items"], inner_expected);
    assert_eq!(
        outer["properties"]["inner_list"]["description"],
        "A list of inner details"
    );
    assert_eq!(required_of(&outer), vec!["id", "inner", "inner_list"]);
}

#[derive(ToolParameters)]
struct NoParams;

#[test]
fn test_unit_struct_has_empty_object_schema() {
    assert_eq!(
        NoParams::input_schema(),
        json!({ "type": "object", "properties": {} })
    );
}
