//! Azure Firewall Policy as code.
//!
//! This library keeps firewall policies in a typed model and converts them
//! between the representations the workflow needs: ARM templates exported from
//! Azure, YAML and CSV documents that operators edit, and Bicep modules that
//! are deployed. It also reconciles independently edited YAML and CSV copies
//! and scores how closely two ARM templates agree.
//!
//! # Architecture
//!
//! ## Model
//!
//! - [`model`]: Policies, rule collection groups, rule collections and rules,
//!   with the invariants every codec relies on
//! - [`names`]: Date-suffix versioning and IP group naming conventions
//!
//! ## Conversion
//!
//! - [`codec`]: ARM-JSON, YAML, CSV and Bicep encoders/decoders
//!   - [`codec::expr`] evaluates the ARM template expressions found in exports
//!
//! ## Workflow
//!
//! - [`sync`]: Merge YAML and CSV snapshots and surface conflicts
//! - [`sync_state`]: `.sync_lock` hash and baseline of the last sync
//! - [`compare`]: Normalized similarity score and keyed diff of two templates
//! - [`config`]: Environment (`_firewalls/*.toml`) and tool (`azfw.toml`) configuration
//!
//! ## Output
//!
//! - [`report`]: Coloured terminal rendering
//! - [`error`]: Error types shared by every module
//!
//! The library never logs and never prints; callers decide how results and
//! errors are presented.

pub mod codec;
pub mod compare;
pub mod config;
pub mod error;
pub mod model;
pub mod names;
pub mod report;
pub mod sync;
pub mod sync_state;

pub use compare::{compare_documents, CompareOptions, Comparison};
pub use error::{ConfigError, ConflictError, Error, ParseError, RenderError, ValidationError};
pub use model::{Policy, PolicySet, Rule, RuleCollection, RuleCollectionGroup};
pub use sync::{synchronize, Baseline, Resolution, Snapshot, SyncOutcome};
