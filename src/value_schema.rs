//! JSON schema inference for helm values files
//!
//! The generated document is consumed by editors through the `{uri, fileMatch, schema}`
//! envelope, so values files get completion for the keys the chart ships with.

use serde_json::{json, Map, Value as Json};
use serde_yaml::Value as Yaml;

pub const SCHEMA_URI: &str = "https://unikube/helm_json_schema";
pub const SCHEMA_TITLE: &str = "HelmValuesJsonSchema";

/// Infer the schema envelope for a YAML values document.
///
/// Returns `None` unless the document parses to a mapping.
pub fn infer(yaml: &str) -> Option<Json> {
    let content: Yaml = match serde_yaml::from_str(yaml) {
        Ok(content) => content,
        Err(e) => {
            tracing::info!("Values are not parsable: {}", e);
            return None;
        }
    };
    let Yaml::Mapping(mapping) = content else {
        tracing::info!("Values are not a mapping, no schema generated");
        return None;
    };

    let mut builder = SchemaBuilder::default();
    let mut schema = builder.object(SCHEMA_TITLE, &mapping);
    if !builder.definitions.is_empty() {
        schema.insert("definitions".to_string(), Json::Object(builder.definitions));
    }

    Some(json!({
        "uri": SCHEMA_URI,
        "fileMatch": ["*"],
        "schema": Json::Object(schema),
    }))
}

/// Serialized form stored on environments
pub fn infer_string(yaml: &str) -> Option<String> {
    infer(yaml).map(|schema| schema.to_string())
}

#[derive(Default)]
struct SchemaBuilder {
    definitions: Map<String, Json>,
}

impl SchemaBuilder {
    fn object(&mut self, title: &str, mapping: &serde_yaml::Mapping) -> Map<String, Json> {
        let mut properties = Map::new();
        for (key, value) in mapping {
            let key = key_name(key);
            let property = self.property(&key, value);
            properties.insert(key, property);
        }

        let mut schema = Map::new();
        schema.insert("title".to_string(), Json::String(title.to_string()));
        schema.insert("type".to_string(), Json::String("object".to_string()));
        schema.insert("properties".to_string(), Json::Object(properties));
        schema
    }

    fn property(&mut self, key: &str, value: &Yaml) -> Json {
        match value {
            Yaml::Mapping(nested) => {
                let name = self.reserve_name(key);
                let definition = self.object(&name, nested);
                self.definitions.insert(name.clone(), Json::Object(definition));
                json!({ "$ref": format!("#/definitions/{}", name) })
            }
            Yaml::Sequence(items) => match items.first() {
                Some(first) => json!({ "type": "array", "items": scalar_type(first) }),
                None => json!({ "type": "array", "items": {} }),
            },
            other => scalar_type(other),
        }
    }

    /// Claim a definition name, suffixing the lowest free integer on collision
    fn reserve_name(&mut self, key: &str) -> String {
        let mut name = key.to_string();
        let mut suffix = 1;
        while self.definitions.contains_key(&name) {
            name = format!("{}{}", key, suffix);
            suffix += 1;
        }
        // Placeholder keeps the name taken while nested objects are processed
        self.definitions.insert(name.clone(), Json::Null);
        name
    }
}

fn scalar_type(value: &Yaml) -> Json {
    let kind = match value {
        Yaml::Bool(_) => "boolean",
        Yaml::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Yaml::Number(_) => "number",
        Yaml::String(_) => "string",
        Yaml::Sequence(_) => "array",
        Yaml::Mapping(_) => "object",
        Yaml::Tagged(tagged) => return scalar_type(&tagged.value),
        Yaml::Null => return json!({}),
    };
    json!({ "type": kind })
}

fn key_name(key: &Yaml) -> String {
    match key {
        Yaml::String(s) => s.clone(),
        Yaml::Bool(b) => b.to_string(),
        Yaml::Number(n) => n.to_string(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim().to_string())
            .unwrap_or_default(),
    }
}
