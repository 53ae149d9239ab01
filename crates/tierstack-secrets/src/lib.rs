//! tierstack-secrets — secret store references and field resolution.
//!
//! Secret material never passes through the composer. A [`SecretValue`] is
//! a template expression the platform resolves at deploy time, so resolving
//! a field means proving it exists and building that expression.
//!
//! # Architecture
//!
//! ```text
//! data tier ──register(secret, fields)──▶ SecretStore
//!                                             │
//! compute ◀──Credential / ResolvedSecrets── SecretAccessor::resolve
//! ```

pub mod accessor;
pub mod credential;
pub mod store;

pub use accessor::{ResolvedSecrets, SecretAccessor};
pub use credential::{CREDENTIAL_FIELDS, Credential};
pub use store::{PlatformSecretStore, SecretRef, SecretSource, SecretStore, SecretValue};
