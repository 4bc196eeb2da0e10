//! luascript-codegen - Code generation for the LuaScript IR
//!
//! Four independent backends consume a validated, frozen [`Module`]:
//! - **Lua**: readable Lua 5.1/5.4 source
//! - **WASM**: a binary module for the numeric subset
//! - **LLVM**: SSA-form LLVM IR text for the numeric subset
//! - **MLIR**: `luascript.*` dialect text with canonicalization and CSE
//!
//! [`BackendManager`] dispatches a module to one or all of them.
//!
//! # Example
//!
//! ```rust,ignore
//! use luascript_codegen::{BackendManager, CompileOptions};
//!
//! let manager = BackendManager::with_defaults(&CompileOptions::default());
//! let output = manager.compile(&module, "lua")?;
//! println!("{}", output.text().unwrap_or_default());
//! ```

pub mod error;
pub mod llvm_backend;
pub mod lua_backend;
pub mod manager;
pub mod mlir_backend;
mod support;
pub mod wasm_backend;

pub use error::BackendError;
pub use llvm_backend::LlvmBackend;
pub use lua_backend::LuaBackend;
pub use manager::BackendManager;
pub use mlir_backend::MlirBackend;
pub use wasm_backend::WasmBackend;

use luascript_ir::Module;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Trait for code generation backends.
///
/// Backends never mutate the module, so one module can be compiled by
/// several backends at once.
pub trait CodeGen: Send + Sync {
    fn target(&self) -> Target;

    fn compile(&self, module: &Module) -> CompileOutput;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    Lua,
    Wasm,
    Llvm,
    Mlir,
}

impl Target {
    pub const ALL: [Target; 4] = [Target::Lua, Target::Wasm, Target::Llvm, Target::Mlir];

    pub fn as_str(&self) -> &'static str {
        match self {
            Target::Lua => "lua",
            Target::Wasm => "wasm",
            Target::Llvm => "llvm",
            Target::Mlir => "mlir",
        }
    }

    /// File extension of the artifact.
    pub fn extension(&self) -> &'static str {
        match self {
            Target::Lua => "lua",
            Target::Wasm => "wasm",
            Target::Llvm => "ll",
            Target::Mlir => "mlir",
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Target {
    type Err = BackendError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Target::ALL
            .into_iter()
            .find(|t| t.as_str() == name.to_ascii_lowercase())
            .ok_or_else(|| BackendError::UnknownTarget {
                name: name.to_string(),
                known: Target::ALL.iter().map(|t| t.as_str().to_string()).collect(),
            })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Artifact {
    Text(String),
    Binary(Vec<u8>),
}

impl Artifact {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Artifact::Text(text) => Some(text),
            Artifact::Binary(_) => None,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Artifact::Text(text) => text.as_bytes(),
            Artifact::Binary(bytes) => bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }
}

/// Result of one backend run. `output` is only present on success;
/// a backend never hands out partially generated code.
#[derive(Debug, Clone)]
pub struct CompileOutput {
    pub target: Target,
    pub success: bool,
    pub output: Option<Artifact>,
    pub diagnostics: Vec<BackendError>,
}

impl CompileOutput {
    pub fn from_result(target: Target, result: Result<Artifact, Vec<BackendError>>) -> Self {
        match result {
            Ok(artifact) => Self {
                target,
                success: true,
                output: Some(artifact),
                diagnostics: Vec::new(),
            },
            Err(diagnostics) => Self::failed(target, diagnostics),
        }
    }

    pub fn failed(target: Target, diagnostics: Vec<BackendError>) -> Self {
        Self {
            target,
            success: false,
            output: None,
            diagnostics,
        }
    }

    pub fn text(&self) -> Option<&str> {
        self.output.as_ref().and_then(Artifact::as_text)
    }

    pub fn bytes(&self) -> Option<&[u8]> {
        self.output.as_ref().map(Artifact::as_bytes)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LuaVersion {
    #[serde(rename = "5.1")]
    Lua51,
    #[default]
    #[serde(rename = "5.4")]
    Lua54,
}

impl LuaVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            LuaVersion::Lua51 => "5.1",
            LuaVersion::Lua54 => "5.4",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct LuaOptions {
    pub version: LuaVersion,
    pub indent_width: usize,
}

impl Default for LuaOptions {
    fn default() -> Self {
        Self {
            version: LuaVersion::default(),
            indent_width: 4,
        }
    }
}

/// Compilation options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct CompileOptions {
    /// Optimization level (0-3)
    pub opt_level: u8,
    /// Target triple written into LLVM output
    pub target_triple: String,
    /// Annotate output with source positions
    pub debug_info: bool,
    /// Run the IR optimizer before WASM encoding
    pub wasm_optimize: bool,
    /// Run canonicalization and CSE on the MLIR op tree
    pub mlir_canonicalize: bool,
    pub lua: LuaOptions,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            opt_level: 0,
            target_triple: target_lexicon::HOST.to_string(),
            debug_info: false,
            wasm_optimize: true,
            mlir_canonicalize: true,
            lua: LuaOptions::default(),
        }
    }
}

impl CompileOptions {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
