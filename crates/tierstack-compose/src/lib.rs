//! tierstack-compose — builds a whole deployment from one [`StackConfig`].
//!
//! # Architecture
//!
//! ```text
//!   StackConfig
//!       │
//!       ▼
//!   network ──▶ access policies ──▶ image ──▶ edge (listener)
//!                                              │
//!   data tier ──▶ secret accessor ──▶ compute ─┴─▶ add_targets ──▶ scaling
//!                                                                   │
//!                                                                   ▼
//!                                                         outputs (endpoint)
//! ```
//!
//! Composition is linear and synchronous. The first failing step aborts it,
//! so a [`Stack`] (and therefore its endpoint) exists only when every tier
//! was declared.
//!
//! [`StackConfig`]: tierstack_core::StackConfig

pub mod stack;

pub use stack::{OUTPUT_DATABASE_SECRET, OUTPUT_LOAD_BALANCER_DNS, Stack, compose};
