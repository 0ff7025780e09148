//! Content-addressed materialization of derived artifacts.
//!
//! An [`Artifact`] is either a source with an attached file, or derived by running a [`Tool`] over its inputs. A
//! [`Resolver`] turns artifacts into files: it pulls inputs recursively, computes a [`Fingerprint`] of the derivation,
//! and reuses the cached output for that fingerprint or runs the tool to produce it.

pub use artifact::{Artifact, ArtifactId, ArtifactStatus, InvalidArtifact, ParamValue, ToolParams};
pub use cache::Cache;
pub use config::{ConfigError, ResolverConfig};
pub use error::PullError;
pub use fingerprint::{fingerprint, Fingerprint};
pub use resolver::{Resolver, Session};
pub use runner::{CommandExecutor, ProcessExecutor, ToolFailure, ToolInvocation, ToolRunner};
pub use store::{InMemoryStore, MetadataStore, StoreError};
pub use tool::{Tool, ToolRegistry, ToolSet};

pub mod artifact;
pub mod tool;
pub mod fingerprint;
pub mod runner;
pub mod cache;
pub mod resolver;
pub mod store;
pub mod error;
pub mod config;
pub mod tracker;
pub mod fs;
