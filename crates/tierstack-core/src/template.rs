//! Declarative template model.
//!
//! Components declare resources into a [`Template`] in dependency order.
//! Property values may embed `{"Ref": id}` and `{"Fn::GetAtt": [id, attr]}`
//! expressions; `Template::add` refuses any reference to a resource that
//! has not been declared yet, so the declaration order of the template is
//! always a valid creation order.
//!
//! # Logical IDs
//!
//! ```text
//! path  = ["Vpc", "PublicSubnet1"]
//! id    = "VpcPublicSubnet1" + first 4 bytes of sha256("Vpc/PublicSubnet1") as hex
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{ComposeError, ComposeResult};

const FORMAT_VERSION: &str = "2010-09-09";

/// Stable identifier of a declared resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogicalId(String);

impl LogicalId {
    /// Derive a logical ID from a construct path.
    pub fn from_path<S: AsRef<str>>(path: &[S]) -> Self {
        let human: String = path
            .iter()
            .flat_map(|segment| segment.as_ref().chars().filter(|c| c.is_ascii_alphanumeric()))
            .collect();
        let joined = path
            .iter()
            .map(|segment| segment.as_ref())
            .collect::<Vec<_>>()
            .join("/");
        let digest = Sha256::digest(joined.as_bytes());
        let hash = hex::encode_upper(&digest[..4]);
        Self(format!("{human}{hash}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LogicalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// `{"Ref": id}`: the resource's primary identifier.
pub fn reference(id: &LogicalId) -> Value {
    json!({ "Ref": id.as_str() })
}

/// `{"Fn::GetAtt": [id, attribute]}`: a resource attribute.
pub fn attribute(id: &LogicalId, attribute: &str) -> Value {
    json!({ "Fn::GetAtt": [id.as_str(), attribute] })
}

/// `{"Fn::Join": ["", parts]}`: string concatenation at apply time.
pub fn join(parts: Vec<Value>) -> Value {
    json!({ "Fn::Join": ["", parts] })
}

/// A declared resource.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resource {
    #[serde(rename = "Type")]
    pub kind: String,
    #[serde(rename = "Properties", skip_serializing_if = "Map::is_empty")]
    pub properties: Map<String, Value>,
    #[serde(rename = "DependsOn", skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<LogicalId>,
}

impl Resource {
    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }
}

/// Builder for a resource before it enters the template.
#[derive(Debug, Clone)]
pub struct ResourceDecl {
    path: Vec<String>,
    kind: String,
    properties: Map<String, Value>,
    depends_on: Vec<LogicalId>,
}

impl ResourceDecl {
    pub fn new<S: AsRef<str>>(path: &[S], kind: &str) -> Self {
        Self {
            path: path.iter().map(|s| s.as_ref().to_string()).collect(),
            kind: kind.to_string(),
            properties: Map::new(),
            depends_on: Vec::new(),
        }
    }

    pub fn property(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.properties.insert(key.to_string(), value.into());
        self
    }

    /// Set a property only when a value is present.
    pub fn optional_property<V: Into<Value>>(self, key: &str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.property(key, v),
            None => self,
        }
    }

    /// Explicit ordering edge for dependencies not visible through references.
    pub fn depends_on(mut self, id: &LogicalId) -> Self {
        if !self.depends_on.contains(id) {
            self.depends_on.push(id.clone());
        }
        self
    }

    pub fn logical_id(&self) -> LogicalId {
        LogicalId::from_path(&self.path)
    }
}

/// A stack output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Output {
    #[serde(rename = "Value")]
    pub value: Value,
    #[serde(rename = "Description", skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// The composed, declarative description of a deployment.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Template {
    #[serde(rename = "AWSTemplateFormatVersion")]
    format_version: &'static str,
    #[serde(rename = "Description", skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(rename = "Resources")]
    resources: BTreeMap<LogicalId, Resource>,
    #[serde(rename = "Outputs", skip_serializing_if = "BTreeMap::is_empty")]
    outputs: BTreeMap<String, Output>,
    #[serde(skip)]
    order: Vec<LogicalId>,
}

impl Template {
    pub fn new(description: Option<String>) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            description,
            ..Default::default()
        }
    }

    /// Declare a resource.
    ///
    /// Fails with a resource error if the declaration references or depends
    /// on an undeclared resource, and with a configuration error if the
    /// logical ID is already taken.
    pub fn add(&mut self, decl: ResourceDecl) -> ComposeResult<LogicalId> {
        let id = decl.logical_id();
        let path = decl.path.join("/");

        if self.resources.contains_key(&id) {
            return Err(ComposeError::configuration(
                path,
                "logical_id",
                format!("{id} is declared twice"),
            ));
        }

        let mut referenced = Vec::new();
        for value in decl.properties.values() {
            collect_references(value, &mut referenced);
        }
        for dep in referenced
            .iter()
            .map(String::as_str)
            .chain(decl.depends_on.iter().map(LogicalId::as_str))
        {
            if !self.resources.keys().any(|k| k.as_str() == dep) {
                return Err(ComposeError::resource(
                    path,
                    format!("depends on {dep}, which has not been declared"),
                ));
            }
        }

        debug!(%id, kind = %decl.kind, %path, "resource declared");
        self.resources.insert(
            id.clone(),
            Resource {
                kind: decl.kind,
                properties: decl.properties,
                depends_on: decl.depends_on,
            },
        );
        self.order.push(id.clone());
        Ok(id)
    }

    /// Publish an output value.
    pub fn add_output(
        &mut self,
        name: &str,
        value: Value,
        description: Option<&str>,
    ) -> ComposeResult<()> {
        let mut referenced = Vec::new();
        collect_references(&value, &mut referenced);
        if let Some(missing) = referenced
            .iter()
            .find(|r| !self.resources.keys().any(|k| k.as_str() == r.as_str()))
        {
            return Err(ComposeError::resource(
                format!("Outputs/{name}"),
                format!("refers to {missing}, which has not been declared"),
            ));
        }
        self.outputs.insert(
            name.to_string(),
            Output {
                value,
                description: description.map(str::to_string),
            },
        );
        Ok(())
    }

    pub fn resource(&self, id: &LogicalId) -> Option<&Resource> {
        self.resources.get(id)
    }

    /// All resources of a given type, in declaration order.
    pub fn resources_of_kind<'a>(
        &'a self,
        kind: &'a str,
    ) -> impl Iterator<Item = (&'a LogicalId, &'a Resource)> + 'a {
        self.order
            .iter()
            .filter_map(|id| self.resources.get_key_value(id))
            .filter(move |(_, r)| r.kind == kind)
    }

    pub fn output(&self, name: &str) -> Option<&Output> {
        self.outputs.get(name)
    }

    /// Logical IDs in the order they were declared.
    pub fn declaration_order(&self) -> &[LogicalId] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Collect every logical ID mentioned by `Ref` / `Fn::GetAtt` inside a value.
fn collect_references(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            if let Some(Value::String(id)) = map.get("Ref") {
                out.push(id.clone());
            }
            if let Some(Value::Array(parts)) = map.get("Fn::GetAtt")
                && let Some(Value::String(id)) = parts.first()
            {
                out.push(id.clone());
            }
            for v in map.values() {
                collect_references(v, out);
            }
        }
        Value::Array(items) => {
            for v in items {
                collect_references(v, out);
            }
        }
        _ => {}
    }
}
