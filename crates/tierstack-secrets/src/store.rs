//! Secret references and the store that knows which fields they carry.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Value, json};
use tracing::debug;

use tierstack_core::template::{join, reference};
use tierstack_core::{ComposeError, ComposeResult, LogicalId};

/// A complete secret ARN ends in `-` and the six characters the secrets
/// service appends to every secret name.
static COMPLETE_ARN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r":secret:[^:]+-[A-Za-z0-9]{6}$").expect("valid secret arn regex")
});

/// Matches any random suffix in an IAM resource.
const ARN_SUFFIX_WILDCARD: &str = "-??????";

/// Where a secret comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretSource {
    /// Generated by the platform as part of this stack.
    Generated(LogicalId),
    /// Managed outside the stack. `arn` may contain `${...}` pseudo
    /// parameters; `complete` is false when it lacks the random suffix.
    Imported { arn: String, complete: bool },
}

/// A named secret in the secret store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretRef {
    pub name: String,
    pub source: SecretSource,
}

impl SecretRef {
    pub fn generated(name: impl Into<String>, id: LogicalId) -> Self {
        Self {
            name: name.into(),
            source: SecretSource::Generated(id),
        }
    }

    /// An imported secret; the ARN is complete if it carries the random
    /// suffix.
    pub fn imported(name: impl Into<String>, arn: impl Into<String>) -> Self {
        let arn = arn.into();
        let complete = COMPLETE_ARN.is_match(&arn);
        Self {
            name: name.into(),
            source: SecretSource::Imported { arn, complete },
        }
    }

    /// An imported secret known only by its partial ARN.
    pub fn partial(name: impl Into<String>, arn: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: SecretSource::Imported {
                arn: arn.into(),
                complete: false,
            },
        }
    }

    /// The secret's ARN as a template value.
    pub fn arn(&self) -> Value {
        match &self.source {
            SecretSource::Generated(id) => reference(id),
            SecretSource::Imported { arn, .. } => arn_value(arn),
        }
    }

    /// The resource an IAM statement must name to read this secret. Partial
    /// ARNs get a wildcard for the random suffix.
    pub fn policy_resource(&self) -> Value {
        match &self.source {
            SecretSource::Generated(id) => reference(id),
            SecretSource::Imported { arn, complete: true } => arn_value(arn),
            SecretSource::Imported { arn, complete: false } => {
                arn_value(&format!("{arn}{ARN_SUFFIX_WILDCARD}"))
            }
        }
    }
}

fn arn_value(arn: &str) -> Value {
    if arn.contains("${") {
        json!({ "Fn::Sub": arn })
    } else {
        Value::String(arn.to_string())
    }
}

/// One field of a secret, resolved by the platform at deploy time.
///
/// `Debug` and `Display` never print the expression; use [`expose`] when
/// writing it into a template.
///
/// [`expose`]: SecretValue::expose
#[derive(Clone, PartialEq)]
pub struct SecretValue {
    secret: SecretRef,
    field: String,
}

impl SecretValue {
    pub(crate) fn new(secret: SecretRef, field: &str) -> Self {
        Self {
            secret,
            field: field.to_string(),
        }
    }

    pub fn secret(&self) -> &SecretRef {
        &self.secret
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn is_empty(&self) -> bool {
        self.field.trim().is_empty() || self.secret.name.trim().is_empty()
    }

    /// Container secret source: `<arn>:<field>::`.
    pub fn expose(&self) -> Value {
        let suffix = format!(":{}::", self.field);
        match &self.secret.source {
            SecretSource::Generated(id) => join(vec![reference(id), json!(suffix)]),
            SecretSource::Imported { arn, .. } => arn_value(&format!("{arn}{suffix}")),
        }
    }

    /// Dynamic reference for resource properties:
    /// `{{resolve:secretsmanager:<arn>:SecretString:<field>}}`.
    pub fn dynamic_reference(&self) -> Value {
        join(vec![
            json!("{{resolve:secretsmanager:"),
            self.secret.arn(),
            json!(format!(":SecretString:{}}}}}", self.field)),
        ])
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretValue")
            .field("secret", &self.secret.name)
            .field("field", &self.field)
            .field("value", &"<redacted>")
            .finish()
    }
}

impl fmt::Display for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:<redacted>", self.secret.name, self.field)
    }
}

/// Knows which secrets exist and which fields each carries.
pub trait SecretStore {
    /// Record a secret and its fields. Registering the same secret again
    /// adds fields; a different secret under the same name is rejected.
    fn register(&mut self, secret: &SecretRef, fields: &[&str]) -> ComposeResult<()>;

    /// Find a secret by name.
    fn lookup(&self, name: &str) -> Option<&SecretRef>;

    /// One field of a secret, or `None` if the secret does not carry it.
    fn field(&self, secret: &SecretRef, field: &str) -> Option<SecretValue>;
}

#[derive(Debug, Clone)]
struct Entry {
    secret: SecretRef,
    fields: Vec<String>,
}

/// Secret store backed by the platform's secrets service.
#[derive(Debug, Clone)]
pub struct PlatformSecretStore {
    account: String,
    region: String,
    entries: BTreeMap<String, Entry>,
}

impl PlatformSecretStore {
    pub fn new(account: &str, region: &str) -> Self {
        Self {
            account: account.to_string(),
            region: region.to_string(),
            entries: BTreeMap::new(),
        }
    }

    /// Register an externally managed secret. Without an explicit ARN the
    /// partial ARN for the stack's account and region is used, in whatever
    /// partition the stack deploys to.
    pub fn import(&mut self, name: &str, arn: Option<&str>, fields: &[String]) -> ComposeResult<SecretRef> {
        let secret = match arn {
            Some(arn) if !arn.trim().is_empty() => SecretRef::imported(name, arn),
            _ => SecretRef::partial(
                name,
                format!(
                    "arn:${{AWS::Partition}}:secretsmanager:{}:{}:secret:{name}",
                    self.region, self.account
                ),
            ),
        };
        let fields: Vec<&str> = fields.iter().map(String::as_str).collect();
        self.register(&secret, &fields)?;
        Ok(secret)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl SecretStore for PlatformSecretStore {
    fn register(&mut self, secret: &SecretRef, fields: &[&str]) -> ComposeResult<()> {
        if secret.name.trim().is_empty() {
            return Err(ComposeError::configuration("Secret", "name", "must not be empty"));
        }
        if let Some(empty) = fields.iter().position(|f| f.trim().is_empty()) {
            return Err(ComposeError::configuration(
                secret.name.as_str(),
                "fields",
                format!("field #{} has an empty name", empty + 1),
            ));
        }

        let entry = self.entries.entry(secret.name.clone()).or_insert_with(|| Entry {
            secret: secret.clone(),
            fields: Vec::new(),
        });
        if entry.secret != *secret {
            return Err(ComposeError::configuration(
                secret.name.as_str(),
                "name",
                "a different secret is already registered under this name",
            ));
        }
        for field in fields {
            if !entry.fields.iter().any(|f| f == field) {
                entry.fields.push(field.to_string());
            }
        }
        debug!(secret = %secret.name, fields = entry.fields.len(), "secret registered");
        Ok(())
    }

    fn lookup(&self, name: &str) -> Option<&SecretRef> {
        self.entries.get(name).map(|e| &e.secret)
    }

    fn field(&self, secret: &SecretRef, field: &str) -> Option<SecretValue> {
        let entry = self.entries.get(&secret.name)?;
        if entry.secret != *secret || !entry.fields.iter().any(|f| f == field) {
            return None;
        }
        Some(SecretValue::new(entry.secret.clone(), field))
    }
}
