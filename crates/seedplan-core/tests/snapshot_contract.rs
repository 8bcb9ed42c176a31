use seedplan_core::{
    FkAction, RelationshipInput, SchemaSnapshot, TableInput, snapshot_json_schema,
    validate_snapshot, validate_snapshot_json,
};

#[test]
fn serializes_snapshot_deterministically() {
    let snapshot = SchemaSnapshot {
        snapshot_version: "0.1".to_string(),
        tables: vec![TableInput::new("users")],
        relationships: vec![
            RelationshipInput::required("users", "invited_by", "users")
                .nullable()
                .on_delete(FkAction::SetNull),
        ],
    };

    let json = serde_json::to_string_pretty(&snapshot).expect("serialize snapshot");
    let expected = r#"{
  "snapshot_version": "0.1",
  "tables": [
    {
      "name": "users",
      "schema": "public",
      "metadata": {
        "is_junction_table": false,
        "is_tenant_scoped": false,
        "has_timestamps": false,
        "primary_key": []
      }
    }
  ],
  "relationships": [
    {
      "from_table": "users",
      "from_column": "invited_by",
      "to_table": "users",
      "to_column": "id",
      "on_delete": "set_null",
      "on_update": "no_action",
      "is_nullable": true,
      "is_deferrable": false
    }
  ]
}"#;
    assert_eq!(json, expected);
}

#[test]
fn json_schema_requires_tables() {
    let schema = snapshot_json_schema().expect("generate schema");
    let required = schema
        .get("required")
        .and_then(|value| value.as_array())
        .expect("required array");
    assert!(required.iter().any(|value| value == "tables"));
}

#[test]
fn serialized_snapshot_passes_both_validations() {
    let snapshot = SchemaSnapshot {
        snapshot_version: "0.1".to_string(),
        tables: vec![TableInput::new("users"), TableInput::new("orders")],
        relationships: vec![RelationshipInput::required("orders", "user_id", "users")],
    };

    let value = serde_json::to_value(&snapshot).expect("serialize snapshot");
    let structural = validate_snapshot_json(&value).expect("validate json");
    assert!(structural.is_ok(), "structural errors: {:?}", structural.errors);

    let semantic = validate_snapshot(&snapshot);
    assert!(semantic.is_ok());
    assert!(semantic.warnings.is_empty());
}
