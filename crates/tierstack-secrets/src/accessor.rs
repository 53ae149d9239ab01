//! Field resolution against a [`SecretStore`].

use tracing::{debug, info};

use tierstack_core::{ComposeError, ComposeResult};

use crate::credential::{CREDENTIAL_FIELDS, Credential};
use crate::store::{SecretRef, SecretStore, SecretValue};

/// Resolved fields of one secret, in request order.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSecrets {
    secret: String,
    values: Vec<(String, SecretValue)>,
}

impl ResolvedSecrets {
    pub fn secret_name(&self) -> &str {
        &self.secret
    }

    pub fn get(&self, field: &str) -> Option<&SecretValue> {
        self.values.iter().find(|(f, _)| f == field).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SecretValue)> {
        self.values.iter().map(|(f, v)| (f.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn take(&mut self, field: &str) -> Option<SecretValue> {
        let index = self.values.iter().position(|(f, _)| f == field)?;
        Some(self.values.remove(index).1)
    }
}

/// Read-only view of a secret store.
pub struct SecretAccessor<'a, S: SecretStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: SecretStore + ?Sized> SecretAccessor<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Find a registered secret by name.
    pub fn lookup(&self, name: &str) -> ComposeResult<&'a SecretRef> {
        self.store.lookup(name).ok_or_else(|| {
            ComposeError::resource(name, "no secret with this name is registered")
        })
    }

    /// Resolve `fields` of `secret`. Every field must resolve to a non-empty
    /// value; the first that does not aborts with a resource error.
    pub fn resolve(&self, secret: &SecretRef, fields: &[&str]) -> ComposeResult<ResolvedSecrets> {
        if fields.is_empty() {
            return Err(ComposeError::configuration(
                secret.name.as_str(),
                "fields",
                "no fields requested",
            ));
        }

        let mut values: Vec<(String, SecretValue)> = Vec::with_capacity(fields.len());
        for &field in fields {
            if values.iter().any(|(f, _)| f == field) {
                continue;
            }
            let value = self.store.field(secret, field).ok_or_else(|| {
                ComposeError::resource(
                    secret.name.as_str(),
                    format!("secret field {field:?} did not resolve"),
                )
            })?;
            if value.is_empty() {
                return Err(ComposeError::resource(
                    secret.name.as_str(),
                    format!("secret field {field:?} resolved to an empty value"),
                ));
            }
            debug!(secret = %secret.name, field, "secret field resolved");
            values.push((field.to_string(), value));
        }

        info!(secret = %secret.name, fields = values.len(), "secret resolved");
        Ok(ResolvedSecrets {
            secret: secret.name.clone(),
            values,
        })
    }

    /// Resolve the six database connection fields in one call.
    pub fn credential(&self, secret: &SecretRef) -> ComposeResult<Credential> {
        let mut resolved = self.resolve(secret, &CREDENTIAL_FIELDS)?;
        let mut next = |field: &str| {
            resolved.take(field).ok_or_else(|| {
                ComposeError::resource(
                    secret.name.as_str(),
                    format!("secret field {field:?} did not resolve"),
                )
            })
        };
        Ok(Credential {
            engine: next("engine")?,
            username: next("username")?,
            password: next("password")?,
            host: next("host")?,
            port: next("port")?,
            dbname: next("dbname")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::PlatformSecretStore;
    use tierstack_core::{ErrorKind, LogicalId};

    fn store_with_credential() -> (PlatformSecretStore, SecretRef) {
        let mut store = PlatformSecretStore::new("123456789012", "ap-northeast-1");
        let secret = SecretRef::generated("cdk-training-db", LogicalId::from_path(&["Rds", "Secret"]));
        store.register(&secret, &CREDENTIAL_FIELDS).unwrap();
        (store, secret)
    }

    #[test]
    fn credential_has_six_fields() {
        let (store, secret) = store_with_credential();
        let credential = SecretAccessor::new(&store).credential(&secret).unwrap();
        let names: Vec<&str> = credential.fields().iter().map(|(n, _)| *n).collect();
        assert_eq!(names, CREDENTIAL_FIELDS);
        assert_eq!(credential.password.field(), "password");
    }

    #[test]
    fn resolution_is_idempotent() {
        let (store, secret) = store_with_credential();
        let accessor = SecretAccessor::new(&store);
        let first = accessor.resolve(&secret, &["host", "port"]).unwrap();
        let second = accessor.resolve(&secret, &["host", "port"]).unwrap();
        assert_eq!(first, second);
        assert_eq!(accessor.credential(&secret).unwrap(), accessor.credential(&secret).unwrap());
    }

    #[test]
    fn order_follows_request() {
        let (store, secret) = store_with_credential();
        let resolved = SecretAccessor::new(&store)
            .resolve(&secret, &["port", "host", "port"])
            .unwrap();
        let order: Vec<&str> = resolved.iter().map(|(f, _)| f).collect();
        assert_eq!(order, vec!["port", "host"]);
    }

    #[test]
    fn missing_field_names_the_field() {
        let mut store = PlatformSecretStore::new("123456789012", "ap-northeast-1");
        let secret = SecretRef::generated("db", LogicalId::from_path(&["Rds", "Secret"]));
        store.register(&secret, &["username", "password"]).unwrap();

        let err = SecretAccessor::new(&store).credential(&secret).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Resource);
        assert!(err.to_string().contains("\"engine\""));
    }

    /// A store whose secret exists but whose fields come back blank.
    struct BlankStore(SecretRef);

    impl SecretStore for BlankStore {
        fn register(&mut self, _: &SecretRef, _: &[&str]) -> ComposeResult<()> {
            Ok(())
        }

        fn lookup(&self, name: &str) -> Option<&SecretRef> {
            (self.0.name == name).then_some(&self.0)
        }

        fn field(&self, secret: &SecretRef, _: &str) -> Option<SecretValue> {
            Some(SecretValue::new(secret.clone(), ""))
        }
    }

    #[test]
    fn lookup_by_name() {
        let (store, secret) = store_with_credential();
        let accessor = SecretAccessor::new(&store);
        assert_eq!(accessor.lookup("cdk-training-db").unwrap(), &secret);
        assert_eq!(accessor.lookup("other").unwrap_err().kind(), ErrorKind::Resource);
    }

    #[test]
    fn empty_requests_rejected() {
        let (store, secret) = store_with_credential();
        let err = SecretAccessor::new(&store).resolve(&secret, &[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn store_without_values_yields_resource_error() {
        let secret = SecretRef::imported("blank", "arn");
        let store = BlankStore(secret.clone());
        let err = SecretAccessor::new(&store).resolve(&secret, &["x"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Resource);
        assert!(err.to_string().contains("empty value"));
    }
}
