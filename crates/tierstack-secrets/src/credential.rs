//! Database credential fields.

use crate::store::SecretValue;

/// Field names of a generated database secret, in resolution order.
pub const CREDENTIAL_FIELDS: [&str; 6] = ["engine", "username", "password", "host", "port", "dbname"];

/// The six connection parameters of a database, as secret-backed values.
#[derive(Debug, Clone, PartialEq)]
pub struct Credential {
    pub engine: SecretValue,
    pub username: SecretValue,
    pub password: SecretValue,
    pub host: SecretValue,
    pub port: SecretValue,
    pub dbname: SecretValue,
}

impl Credential {
    /// `(field name, value)` pairs in [`CREDENTIAL_FIELDS`] order.
    pub fn fields(&self) -> [(&'static str, &SecretValue); 6] {
        [
            ("engine", &self.engine),
            ("username", &self.username),
            ("password", &self.password),
            ("host", &self.host),
            ("port", &self.port),
            ("dbname", &self.dbname),
        ]
    }
}
