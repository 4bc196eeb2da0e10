//! Lexical scopes used while lowering

use crate::node::NodeId;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Module,
    Function,
    Block,
}

#[derive(Debug)]
struct Frame {
    kind: FrameKind,
    bindings: HashMap<String, NodeId>,
}

/// Stack of name → declaring-node maps, innermost last.
#[derive(Debug)]
pub struct ScopeStack {
    frames: Vec<Frame>,
}

impl Default for ScopeStack {
    fn default() -> Self {
        Self::new()
    }
}

impl ScopeStack {
    pub fn new() -> Self {
        Self {
            frames: vec![Frame {
                kind: FrameKind::Module,
                bindings: HashMap::new(),
            }],
        }
    }

    pub fn push_scope(&mut self, kind: FrameKind) {
        self.frames.push(Frame {
            kind,
            bindings: HashMap::new(),
        });
    }

    pub fn pop_scope(&mut self) {
        // the module frame is never popped
        if self.frames.len() > 1 {
            self.frames.pop();
        }
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Binds `name` in the innermost frame, shadowing any earlier binding
    /// of the same frame.
    pub fn add_binding(&mut self, name: &str, node: NodeId) {
        if let Some(frame) = self.frames.last_mut() {
            frame.bindings.insert(name.to_string(), node);
        }
    }

    /// Binds `name` in the nearest function (or module) frame.
    pub fn add_function_binding(&mut self, name: &str, node: NodeId) {
        let frame = self
            .frames
            .iter_mut()
            .rev()
            .find(|f| f.kind != FrameKind::Block);
        if let Some(frame) = frame {
            frame.bindings.insert(name.to_string(), node);
        }
    }

    /// Binding of `name` in the innermost frame only.
    pub fn local(&self, name: &str) -> Option<NodeId> {
        self.frames.last()?.bindings.get(name).copied()
    }

    pub fn has_binding(&self, name: &str) -> bool {
        self.resolve(name).is_some()
    }

    /// Walks outwards; `None` means the name is a global.
    pub fn resolve(&self, name: &str) -> Option<NodeId> {
        self.frames
            .iter()
            .rev()
            .find_map(|frame| frame.bindings.get(name).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shadowing_and_pop() {
        let mut scopes = ScopeStack::new();
        scopes.add_binding("x", NodeId(1));
        scopes.push_scope(FrameKind::Block);
        scopes.add_binding("x", NodeId(2));
        assert_eq!(scopes.resolve("x"), Some(NodeId(2)));
        scopes.pop_scope();
        assert_eq!(scopes.resolve("x"), Some(NodeId(1)));
        assert!(!scopes.has_binding("print"));
    }

    #[test]
    fn test_function_binding_skips_blocks() {
        let mut scopes = ScopeStack::new();
        scopes.push_scope(FrameKind::Function);
        scopes.push_scope(FrameKind::Block);
        scopes.add_function_binding("v", NodeId(7));
        assert_eq!(scopes.local("v"), None);
        scopes.pop_scope();
        assert_eq!(scopes.local("v"), Some(NodeId(7)));
    }

    #[test]
    fn test_module_frame_survives_pop() {
        let mut scopes = ScopeStack::new();
        scopes.pop_scope();
        scopes.add_binding("g", NodeId(3));
        assert_eq!(scopes.depth(), 1);
        assert_eq!(scopes.resolve("g"), Some(NodeId(3)));
    }
}
