//! IR Module - the frozen output of a build
//!
//! A module owns the flat node table. It is only produced by
//! [`crate::IrBuilder::build`] or [`Module::from_json`] and never mutated
//! afterwards, so it can be shared across threads freely.

use crate::cfg::ControlFlowGraph;
use crate::error::IrError;
use crate::node::{Node, NodeId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Version of the on-disk IR format written by this crate.
pub const SCHEMA_VERSION: &str = "1.0.0";

fn major(version: &str) -> Option<u64> {
    version.split('.').next()?.parse().ok()
}

/// True when a document written as `version` can be read by this build.
pub fn is_compatible_version(version: &str) -> bool {
    let parts: Vec<&str> = version.split('.').collect();
    parts.len() == 3
        && parts.iter().all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
        && major(version) == major(SCHEMA_VERSION)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleMetadata {
    /// Control-flow graphs keyed by function node id
    #[serde(default)]
    pub cfg: BTreeMap<NodeId, ControlFlowGraph>,
    /// Name of the source the module was lowered from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Directive prologue entries (`"use strict"`) of the program
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub directives: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Module {
    pub(crate) schema_version: String,
    pub(crate) nodes: BTreeMap<NodeId, Node>,
    pub(crate) body: Vec<NodeId>,
    #[serde(default)]
    pub(crate) metadata: ModuleMetadata,
}

impl Module {
    pub fn schema_version(&self) -> &str {
        &self.schema_version
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    /// Nodes in ascending id order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Top-level statements in program order.
    pub fn body(&self) -> &[NodeId] {
        &self.body
    }

    pub fn metadata(&self) -> &ModuleMetadata {
        &self.metadata
    }

    pub fn cfg(&self, function: NodeId) -> Option<&ControlFlowGraph> {
        self.metadata.cfg.get(&function)
    }

    /// Ids of every function-like node, ascending.
    pub fn functions(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values().filter(|n| n.kind.as_function().is_some())
    }

    pub fn to_json(&self) -> Result<String, IrError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn to_json_pretty(&self) -> Result<String, IrError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_value(&self) -> Result<serde_json::Value, IrError> {
        Ok(serde_json::to_value(self)?)
    }

    /// Reads a module document. Structure is not validated here; use
    /// [`crate::validate`] on the result.
    pub fn from_json(json: &str) -> Result<Module, IrError> {
        let module: Module = serde_json::from_str(json)?;
        module.check_version()?;
        Ok(module)
    }

    pub fn from_value(value: serde_json::Value) -> Result<Module, IrError> {
        let module: Module = serde_json::from_value(value)?;
        module.check_version()?;
        Ok(module)
    }

    fn check_version(&self) -> Result<(), IrError> {
        if is_compatible_version(&self.schema_version) {
            Ok(())
        } else {
            Err(IrError::IncompatibleSchema {
                found: self.schema_version.clone(),
                supported: SCHEMA_VERSION.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{BuildOptions, IrBuilder};
    use crate::node::{BinaryOperator, ListItem};

    fn sample() -> Module {
        let mut b = IrBuilder::new();
        let callee = b.identifier("print", None).unwrap();
        let one = b.numeric_literal(1.5).unwrap();
        let two = b.string_literal("two").unwrap();
        let sum = b
            .binary_expression(BinaryOperator::Add, one.id, two.id)
            .unwrap();
        let call = b.call_expression(callee.id, vec![ListItem::plain(sum.id)]).unwrap();
        let stmt = b.expression_statement(call.id).unwrap();
        b.push_statement(stmt);
        b.build(&BuildOptions::default()).unwrap()
    }

    #[test]
    fn test_json_round_trip() {
        let module = sample();
        let json = module.to_json().unwrap();
        let back = Module::from_json(&json).unwrap();
        assert_eq!(back, module);
        assert_eq!(back.to_json().unwrap(), json);
    }

    #[test]
    fn test_document_layout() {
        let value = sample().to_value().unwrap();
        assert_eq!(value["schemaVersion"], SCHEMA_VERSION);
        assert!(value["nodes"].is_object());
        assert_eq!(value["body"].as_array().map(Vec::len), Some(1));
        assert!(value["metadata"].is_object());
        assert_eq!(value["nodes"]["2"]["value"], 1.5);
    }

    #[test]
    fn test_rejects_other_major_version() {
        let mut value = sample().to_value().unwrap();
        value["schemaVersion"] = "2.0.0".into();
        let err = Module::from_value(value).unwrap_err();
        assert!(matches!(err, IrError::IncompatibleSchema { ref found, .. } if found == "2.0.0"));
    }

    #[test]
    fn test_version_compatibility() {
        assert!(is_compatible_version("1.0.0"));
        assert!(is_compatible_version("1.4.2"));
        assert!(!is_compatible_version("0.9.0"));
        assert!(!is_compatible_version("1.0"));
        assert!(!is_compatible_version("1.x.0"));
    }
}
