//! Core data structures shared by dispatch, block handling, validation and the
//! orchestrator.

pub mod request;
pub mod text;
pub mod types;
pub mod value;

pub use request::{
    FieldDefinition, FieldType, RequestError, RequestOptions, Schema, TargetRequest,
    validate_schema,
};
pub use text::{clean_content, truncate_chars};
pub use types::{
    EngineKind, ExtractionMode, ScrapeResponse, ScrapeResult, Strategy, TaskStatus,
    WorkflowState,
};
pub use value::{FieldMap, FieldValue};
