//! luascript-ir - Intermediate representation of LuaScript
//!
//! The IR is a flat, versioned table of nodes that refer to each other by
//! id. It is the single contract between the front end and every backend:
//!
//! ```text
//! ESTree (luascript-ast)
//!         ↓
//!    [Lowering]      scope resolution, desugaring
//!         ↓
//!    [IrBuilder]     id allocation, reference checks
//!         ↓
//!      Module  ──→  [Validator]   schema + structural invariants
//!         ↓
//!   [Transforms]     inlining, constant folding, DCE (optional)
//!         ↓
//!    [Codegen]       Lua / WASM / LLVM / MLIR (luascript-codegen)
//! ```
//!
//! A finished [`Module`] is immutable; transforms reopen it with
//! [`IrBuilder::from_module`] and produce a new one.

pub mod builder;
pub mod cfg;
pub mod error;
pub mod lower;
pub mod module;
pub mod node;
pub mod opt;
pub mod types;
pub mod validate;
pub mod visit;

pub use builder::{BuildOptions, IrBuilder, NodeMeta, NodeRef};
pub use cfg::{BasicBlock, ControlFlowGraph};
pub use error::{BuilderError, IrError, LoweringError};
pub use lower::{lower, lower_with, LowerOptions};
pub use module::{Module, ModuleMetadata, SCHEMA_VERSION};
pub use node::{Node, NodeId, NodeKind};
pub use opt::{Transform, TransformRegistry};
pub use types::TypeDescriptor;
pub use validate::{validate, validate_json, ValidationReport};
pub use visit::{ParentMap, Visitor};
