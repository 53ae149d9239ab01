//! Database parameters as container variables.
//!
//! Every injection form reduces to one [`ContainerSecrets`] through
//! [`SecretInjection::container_secrets`]; the task definition never sees
//! which form was configured.

use serde_json::Value;

use tierstack_core::config::SecretInjectionConfig;
use tierstack_core::{ComposeError, ComposeResult, EngineKind};
use tierstack_secrets::{Credential, SecretAccessor, SecretRef, SecretStore, SecretValue};

const DEFAULT_URL_VARIABLE: &str = "DATABASE_URL";

/// How the database reaches the container.
#[derive(Debug, Clone, PartialEq)]
pub enum SecretInjection {
    /// One variable per credential field, named after the field.
    Discrete(Credential),
    /// A complete connection URL stored in one secret field.
    ConnectionString { variable: String, value: SecretValue },
    /// The discrete fields plus a URL template
    /// (`mysql://${username}:${password}@${host}:${port}/${dbname}`).
    ///
    /// The platform does not expand the template. The image's entrypoint
    /// must substitute the discrete variables before the application reads
    /// the URL; a plain `CMD` sees the literal placeholders.
    Composed {
        variable: String,
        scheme: &'static str,
        credential: Credential,
    },
}

/// Secret-backed and plain variables for one container.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ContainerSecrets {
    pub secrets: Vec<(String, SecretValue)>,
    pub environment: Vec<(String, String)>,
}

impl ContainerSecrets {
    /// IAM resources for every secret the task must be allowed to read.
    pub fn policy_resources(&self) -> Vec<Value> {
        let mut resources: Vec<Value> = Vec::new();
        for (_, value) in &self.secrets {
            let resource = value.secret().policy_resource();
            if !resources.contains(&resource) {
                resources.push(resource);
            }
        }
        resources
    }
}

impl SecretInjection {
    /// Resolve configuration against the secret store.
    ///
    /// `connection_string` with a `secret` reads the URL from that imported
    /// secret; without one the URL is composed from the database credential.
    pub fn resolve<S>(
        config: &SecretInjectionConfig,
        accessor: &SecretAccessor<'_, S>,
        database: &SecretRef,
        engine: EngineKind,
    ) -> ComposeResult<Self>
    where
        S: SecretStore + ?Sized,
    {
        match config {
            SecretInjectionConfig::Discrete => Ok(Self::Discrete(accessor.credential(database)?)),
            SecretInjectionConfig::ConnectionString {
                variable,
                secret,
                field,
            } => {
                let variable = variable
                    .clone()
                    .unwrap_or_else(|| DEFAULT_URL_VARIABLE.to_string());
                match secret {
                    Some(name) => {
                        let imported = accessor.lookup(name)?;
                        let field = field.as_deref().unwrap_or(DEFAULT_URL_VARIABLE);
                        let resolved = accessor.resolve(imported, &[field])?;
                        let value = resolved.get(field).cloned().ok_or_else(|| {
                            ComposeError::resource(
                                name.as_str(),
                                format!("secret field {field:?} did not resolve"),
                            )
                        })?;
                        Ok(Self::ConnectionString { variable, value })
                    }
                    None => Ok(Self::Composed {
                        variable,
                        scheme: url_scheme(engine),
                        credential: accessor.credential(database)?,
                    }),
                }
            }
        }
    }

    /// The variable holding an unexpanded URL template, if any.
    pub fn unexpanded_variable(&self) -> Option<&str> {
        match self {
            Self::Composed { variable, .. } => Some(variable.as_str()),
            _ => None,
        }
    }

    /// The single mapping from injection form to container variables.
    pub fn container_secrets(&self) -> ContainerSecrets {
        let discrete = |credential: &Credential| -> Vec<(String, SecretValue)> {
            credential
                .fields()
                .into_iter()
                .map(|(name, value)| (name.to_string(), value.clone()))
                .collect()
        };
        match self {
            Self::Discrete(credential) => ContainerSecrets {
                secrets: discrete(credential),
                environment: Vec::new(),
            },
            Self::ConnectionString { variable, value } => ContainerSecrets {
                secrets: vec![(variable.clone(), value.clone())],
                environment: Vec::new(),
            },
            Self::Composed {
                variable,
                scheme,
                credential,
            } => ContainerSecrets {
                secrets: discrete(credential),
                environment: vec![(
                    variable.clone(),
                    format!("{scheme}://${{username}}:${{password}}@${{host}}:${{port}}/${{dbname}}"),
                )],
            },
        }
    }
}

fn url_scheme(engine: EngineKind) -> &'static str {
    match engine {
        EngineKind::Mysql => "mysql",
        EngineKind::Postgres => "postgresql",
    }
}
