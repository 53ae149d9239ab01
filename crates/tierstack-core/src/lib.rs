//! tierstack-core — shared building blocks for stack composition.
//!
//! Every component crate declares its resources into a [`Template`] and
//! reports failures through [`ComposeError`]. The deployment input is a
//! flat [`StackConfig`] parsed from `stack.toml` plus environment overrides.

pub mod config;
pub mod error;
pub mod naming;
pub mod template;
pub mod types;

pub use config::StackConfig;
pub use error::{ComposeError, ComposeResult, ErrorKind};
pub use template::{LogicalId, ResourceDecl, Template};
pub use types::*;
