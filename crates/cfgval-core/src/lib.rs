//! Core contracts and helpers for cfgval.
//!
//! This crate defines the schema document contract, the immutable schema
//! registry with its table dependency graph, key helpers, edit request types
//! and the structured validation error taxonomy shared by the store, engine
//! and CLI crates.

pub mod codes;
pub mod document;
pub mod error;
pub mod graph;
pub mod keys;
pub mod model;
pub mod request;
pub mod validation;

pub use codes::{ErrorInfo, RetCode};
pub use document::{
    CustomValidationDef, DEFAULT_KEY_DELIM, FieldDef, FieldKind, FieldType, ModuleDef, MustDef,
    SchemaDocument, TableDef, WhenDef, document_json_schema, load_document, parse_document,
};
pub use error::{Error, Result};
pub use graph::{DependencyGraph, DependencyReport, GraphSummary};
pub use keys::{KeyPart, KeyPattern, escape_glob, key_match};
pub use model::{
    FieldInfo, HookBinding, KeyBinding, MustInfo, ReferenceDescriptor, ReverseReference,
    SchemaModel, TableInfo, WhenInfo,
};
pub use request::{
    EditRequest, FieldMap, LEAF_LIST_SEPARATOR, LEAF_LIST_SUFFIX, NULL_FIELD, OpMask, Operation,
    ValidateType, base_field_name, fields, split_leaf_list,
};
pub use validation::validate_document;

/// Current contract version for schema documents.
pub const SCHEMA_VERSION: &str = "0.1";
