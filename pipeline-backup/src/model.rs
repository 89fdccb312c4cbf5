//! Documents exchanged with the pipeline service.
//!
//! Only identity fields are typed; everything else the service returns is
//! carried through untouched in `extra`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Namespaces that always exist on the service and are never recreated.
pub const RESERVED_NAMESPACE: &str = "default";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Namespace {
    pub name: String,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Namespace {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            extra: Map::new(),
        }
    }

    pub fn is_reserved(&self) -> bool {
        self.name == RESERVED_NAMESPACE
    }
}

/// Entry of a draft listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftSummary {
    pub id: String,
    pub name: String,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDraft {
    pub id: String,
    pub name: String,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub name: String,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A deployed application. The service transmits `configuration` as a
/// JSON-encoded string; backups store it decoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Application {
    /// Export files do not always carry the name; the file name is used then.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub configuration: Value,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Application {
    /// Replace a string `configuration` with the object it encodes.
    /// A configuration that is already structured is left as is.
    pub fn decode_configuration(&mut self) -> serde_json::Result<()> {
        if let Value::String(raw) = &self.configuration {
            self.configuration = serde_json::from_str(raw)?;
        }
        Ok(())
    }

    /// Replace a structured `configuration` with its JSON encoding.
    pub fn encode_configuration(&mut self) -> serde_json::Result<()> {
        if !matches!(self.configuration, Value::String(_) | Value::Null) {
            self.configuration = Value::String(serde_json::to_string(&self.configuration)?);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_opaque_fields_survive() {
        let doc = json!({"name": "ns1", "description": "team", "config": {"k": "v"}});
        let ns: Namespace = serde_json::from_value(doc.clone()).unwrap();
        assert_eq!(ns.name, "ns1");
        assert_eq!(serde_json::to_value(&ns).unwrap(), doc);
    }

    #[test]
    fn test_decode_configuration() {
        let mut app: Application = serde_json::from_value(json!({
            "name": "etl",
            "configuration": "{\"stages\":[{\"name\":\"src\"}]}",
            "artifact": {"name": "cdap-data-pipeline"}
        }))
        .unwrap();

        app.decode_configuration().unwrap();
        assert_eq!(app.configuration, json!({"stages": [{"name": "src"}]}));
        assert_eq!(app.extra["artifact"], json!({"name": "cdap-data-pipeline"}));

        // already decoded, nothing to do
        app.decode_configuration().unwrap();
        assert_eq!(app.configuration, json!({"stages": [{"name": "src"}]}));

        app.encode_configuration().unwrap();
        assert_eq!(
            app.configuration,
            Value::String("{\"stages\":[{\"name\":\"src\"}]}".to_string())
        );
    }

    #[test]
    fn test_decode_configuration_rejects_garbage() {
        let mut app: Application =
            serde_json::from_value(json!({"name": "etl", "configuration": "{not json"})).unwrap();
        assert!(app.decode_configuration().is_err());
        assert_eq!(app.configuration, json!("{not json"));
    }
}
