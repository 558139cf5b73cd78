use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde_json::Value;

/// Scannable (table, field) targets discovered from the field-definition
/// schema, plus the tables that declared columns but no qualifying field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaTargets {
    pub targets: BTreeMap<String, String>,
    pub skipped_tables: Vec<String>,
}

/// Loads the field-definition schema dump and collects every (table, field)
/// pair holding link content.
pub fn load_schema_targets(tca_path: &Path) -> Result<SchemaTargets> {
    if !tca_path.exists() {
        bail!(
            "field-definition schema dump not found: {}",
            tca_path.display()
        );
    }
    let content = fs::read_to_string(tca_path)
        .with_context(|| format!("failed to read {}", tca_path.display()))?;
    let schema: Value = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse {}", tca_path.display()))?;
    Ok(collect_link_fields(&schema))
}

/// Walks the schema tree (table -> columns -> field -> attributes) and keeps
/// every field whose configuration declares type "link" or a soft-reference
/// parser including "typolink". One field per table; when several qualify,
/// the last discovered wins.
pub fn collect_link_fields(schema: &Value) -> SchemaTargets {
    let mut out = SchemaTargets::default();
    let Some(tables) = schema.as_object() else {
        return out;
    };

    for (table, table_definition) in tables {
        let Some(columns) = table_definition
            .get("columns")
            .and_then(Value::as_object)
        else {
            continue;
        };

        let mut found = false;
        for (field, field_definition) in columns {
            if field_qualifies(field_definition) {
                out.targets.insert(table.clone(), field.clone());
                found = true;
            }
        }
        if !found {
            out.skipped_tables.push(table.clone());
        }
    }

    out
}

// Explicit recursive walk: a field qualifies when any nested node carries a
// "type" scalar equal to "link" or a "softref" scalar listing a typolink
// parser. Nested structures (palettes, flex sections) are descended into.
fn field_qualifies(node: &Value) -> bool {
    match node {
        Value::Object(map) => map.iter().any(|(key, value)| {
            if key == "type" && value.as_str() == Some("link") {
                return true;
            }
            if key == "softref"
                && value
                    .as_str()
                    .is_some_and(|list| {
                        list.split(',')
                            .any(|entry| entry.trim().starts_with("typolink"))
                    })
            {
                return true;
            }
            field_qualifies(value)
        }),
        Value::Array(items) => items.iter().any(field_qualifies),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::collect_link_fields;

    #[test]
    fn collects_link_typed_and_typolink_softref_fields() {
        let schema = json!({
            "tt_content": {
                "columns": {
                    "bodytext": {
                        "config": {
                            "type": "text",
                            "softref": "typolink_tag,email[subst],url"
                        }
                    },
                    "header": {
                        "config": { "type": "input" }
                    }
                }
            },
            "tx_news_domain_model_news": {
                "columns": {
                    "external_url": {
                        "config": { "type": "link" }
                    }
                }
            }
        });

        let targets = collect_link_fields(&schema);
        assert_eq!(
            targets.targets.get("tt_content").map(String::as_str),
            Some("bodytext")
        );
        assert_eq!(
            targets
                .targets
                .get("tx_news_domain_model_news")
                .map(String::as_str),
            Some("external_url")
        );
        assert!(targets.skipped_tables.is_empty());
    }

    #[test]
    fn last_qualifying_field_wins_per_table() {
        let schema = json!({
            "pages": {
                "columns": {
                    "canonical_link": { "config": { "type": "link" } },
                    "media_link": { "config": { "type": "link" } }
                }
            }
        });

        let targets = collect_link_fields(&schema);
        assert_eq!(
            targets.targets.get("pages").map(String::as_str),
            Some("media_link")
        );
    }

    #[test]
    fn tables_without_qualifying_fields_are_skipped_and_reported() {
        let schema = json!({
            "sys_log": {
                "columns": {
                    "details": { "config": { "type": "text" } }
                }
            }
        });

        let targets = collect_link_fields(&schema);
        assert!(targets.targets.is_empty());
        assert_eq!(targets.skipped_tables, vec!["sys_log"]);
    }

    #[test]
    fn deeply_nested_configuration_is_descended_into() {
        let schema = json!({
            "tx_catalog_items": {
                "columns": {
                    "flexfield": {
                        "config": {
                            "type": "flex",
                            "ds": {
                                "sheets": {
                                    "main": {
                                        "el": {
                                            "link": { "config": { "softref": "typolink" } }
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
            }
        });

        let targets = collect_link_fields(&schema);
        assert_eq!(
            targets.targets.get("tx_catalog_items").map(String::as_str),
            Some("flexfield")
        );
    }
}
