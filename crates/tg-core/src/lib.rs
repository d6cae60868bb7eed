//! Core types for the task indexing pipeline.
//!
//! This crate holds everything that is shared between the line grammar
//! parser, the worker runtime and the managers that drive them:
//!
//! - [`task`]: the parsed [`Task`] record and its metadata
//! - [`project`]: project classification ([`TgProject`]) and project settings
//! - [`parser_config`]: the immutable [`TaskParserConfig`] and its builder
//! - [`settings`]: user-facing settings, loadable from TOML
//! - [`resolver`]: project resolution and metadata mapping/coercion
//! - [`date`] / [`clock`]: date parsing and monotonic timestamps

pub mod clock;
pub mod date;
pub mod error;
pub mod parser_config;
pub mod project;
pub mod resolver;
pub mod settings;
pub mod task;

pub use error::ConfigError;
pub use parser_config::{FileMetadataInheritance, MetadataParseMode, TagRole, TaskParserConfig};
pub use project::{
  CachedProjectData, DefaultProjectNaming, DetectionKind, MetadataConfig, MetadataMapping, NamingStrategy, PathMapping, ProjectConfig,
  ProjectDetectionMethod, ProjectSource, ProjectWorkerConfig, TgProject,
};
pub use settings::{FileParsingConfig, MetadataFormat, Settings, TagPrefixes, WorkerSettings};
pub use task::{CanvasPosition, DateField, DateType, Metadata, SourceType, Task, TaskId, TaskMetadata};
