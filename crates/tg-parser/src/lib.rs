//! Task line grammar for markdown and canvas files
//!
//! This crate turns raw file text into [`Task`](tg_core::Task) records:
//! - [`MarkdownTaskParser`]: the configurable line grammar
//! - [`CanvasParser`]: canvas JSON adapter over the line grammar
//! - [`FileMetadataTaskParser`]: tasks derived from frontmatter and file tags
//! - [`legacy`]: minimal fallback used when the line grammar fails
//! - [`process`]: the per-file pipeline run by workers and the sync path
//!
//! # Example
//! ```ignore
//! use tg_core::TaskParserConfig;
//! use tg_parser::MarkdownTaskParser;
//!
//! let parser = MarkdownTaskParser::new(TaskParserConfig::default());
//! let tasks = parser.parse("- [ ] Ship it 📅 2024-12-31", "todo.md");
//! ```

mod canvas;
mod error;
mod file_metadata;
pub mod legacy;
mod markdown;
mod metadata;
pub mod process;
mod protected;
mod task_line;

pub use canvas::{CanvasData, CanvasNode, CanvasParser, CanvasParsingOptions};
pub use error::{CanvasError, ParseError};
pub use file_metadata::{FileCache, FileMetadataResult, FileMetadataTaskParser};
pub use markdown::{FileContext, MarkdownTaskParser};
pub use process::{BatchEntry, BatchResult, BatchStats, FileStats, ParseRequest, ParseResult, ParseStats, TaskPipeline};
pub use protected::ProtectedRanges;
