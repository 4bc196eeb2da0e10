//! Control-flow graphs derived from structured IR
//!
//! One graph per function body. Blocks hold the ids of the statements they
//! execute; branch statements (`if`, loops, `switch`) are recorded in the
//! block that evaluates their test. Blocks unreachable from the entry are
//! dropped and the rest renumbered densely in creation order.

use crate::node::{Node, NodeId, NodeKind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicBlock {
    pub id: u32,
    pub statements: Vec<NodeId>,
    pub successors: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlFlowGraph {
    pub entry: u32,
    pub blocks: Vec<BasicBlock>,
}

impl ControlFlowGraph {
    pub fn block(&self, id: u32) -> Option<&BasicBlock> {
        self.blocks.iter().find(|b| b.id == id)
    }

    /// Block ids reachable from `entry`, in visiting order.
    pub fn reachable(&self) -> BTreeSet<u32> {
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::from([self.entry]);
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id) {
                continue;
            }
            if let Some(block) = self.block(id) {
                queue.extend(block.successors.iter().copied());
            }
        }
        seen
    }
}

enum Frame {
    Loop { exit: u32, next: u32 },
    Switch { exit: u32 },
    Try { handler: u32 },
}

struct CfgBuilder<'a> {
    nodes: &'a BTreeMap<NodeId, Node>,
    blocks: Vec<BasicBlock>,
    frames: Vec<Frame>,
}

impl<'a> CfgBuilder<'a> {
    fn new(nodes: &'a BTreeMap<NodeId, Node>) -> Self {
        Self {
            nodes,
            blocks: Vec::new(),
            frames: Vec::new(),
        }
    }

    fn new_block(&mut self) -> u32 {
        let id = self.blocks.len() as u32;
        self.blocks.push(BasicBlock {
            id,
            statements: Vec::new(),
            successors: Vec::new(),
        });
        id
    }

    fn edge(&mut self, from: u32, to: u32) {
        let successors = &mut self.blocks[from as usize].successors;
        if !successors.contains(&to) {
            successors.push(to);
        }
    }

    fn record(&mut self, block: u32, stmt: NodeId) {
        self.blocks[block as usize].statements.push(stmt);
    }

    fn kind(&self, id: NodeId) -> Option<&'a NodeKind> {
        self.nodes.get(&id).map(|n| &n.kind)
    }

    fn enter_loop(&mut self, exit: u32, next: u32) {
        self.frames.push(Frame::Loop { exit, next });
    }

    fn break_target(&self) -> Option<u32> {
        self.frames.iter().rev().find_map(|f| match f {
            Frame::Loop { exit, .. } | Frame::Switch { exit } => Some(*exit),
            Frame::Try { .. } => None,
        })
    }

    fn continue_target(&self) -> Option<u32> {
        self.frames.iter().rev().find_map(|f| match f {
            Frame::Loop { next, .. } => Some(*next),
            _ => None,
        })
    }

    fn handler(&self) -> Option<u32> {
        self.frames.iter().rev().find_map(|f| match f {
            Frame::Try { handler } => Some(*handler),
            _ => None,
        })
    }

    fn list(&mut self, mut current: Option<u32>, ids: &[NodeId]) -> Option<u32> {
        for &id in ids {
            // Dead code still gets a block; it is pruned afterwards.
            let block = match current {
                Some(block) => block,
                None => self.new_block(),
            };
            current = self.stmt(block, id);
        }
        current
    }

    /// Adds `id` to the graph starting in `block`; returns the block control
    /// continues in, or `None` when the statement never falls through.
    fn stmt(&mut self, block: u32, id: NodeId) -> Option<u32> {
        let Some(kind) = self.kind(id) else {
            self.record(block, id);
            return Some(block);
        };

        match kind {
            NodeKind::BlockStatement { body } => self.list(Some(block), body),
            NodeKind::IfStatement {
                consequent,
                alternate,
                ..
            } => {
                self.record(block, id);
                let join = self.new_block();
                let then_block = self.new_block();
                self.edge(block, then_block);
                if let Some(end) = self.stmt(then_block, *consequent) {
                    self.edge(end, join);
                }
                match alternate {
                    Some(alternate) => {
                        let else_block = self.new_block();
                        self.edge(block, else_block);
                        if let Some(end) = self.stmt(else_block, *alternate) {
                            self.edge(end, join);
                        }
                    }
                    None => self.edge(block, join),
                }
                Some(join)
            }
            NodeKind::WhileStatement { body, .. } | NodeKind::ForEachStatement { body, .. } => {
                let header = self.new_block();
                self.edge(block, header);
                self.record(header, id);
                let exit = self.new_block();
                let body_block = self.new_block();
                self.edge(header, body_block);
                self.edge(header, exit);

                self.enter_loop(exit, header);
                if let Some(end) = self.stmt(body_block, *body) {
                    self.edge(end, header);
                }
                self.frames.pop();
                Some(exit)
            }
            NodeKind::DoWhileStatement { body, .. } => {
                let body_block = self.new_block();
                self.edge(block, body_block);
                let test = self.new_block();
                self.record(test, id);
                let exit = self.new_block();

                self.enter_loop(exit, test);
                if let Some(end) = self.stmt(body_block, *body) {
                    self.edge(end, test);
                }
                self.frames.pop();
                self.edge(test, body_block);
                self.edge(test, exit);
                Some(exit)
            }
            NodeKind::ForStatement { test, body, .. } => {
                let header = self.new_block();
                self.edge(block, header);
                self.record(header, id);
                let exit = self.new_block();
                let update = self.new_block();
                let body_block = self.new_block();
                self.edge(header, body_block);
                if test.is_some() {
                    self.edge(header, exit);
                }

                self.enter_loop(exit, update);
                if let Some(end) = self.stmt(body_block, *body) {
                    self.edge(end, update);
                }
                self.frames.pop();
                self.edge(update, header);
                Some(exit)
            }
            NodeKind::SwitchStatement { cases, .. } => {
                self.record(block, id);
                let exit = self.new_block();
                let mut has_default = false;
                let case_blocks: Vec<u32> = cases.iter().map(|_| self.new_block()).collect();

                self.frames.push(Frame::Switch { exit });
                let mut fallthrough: Option<u32> = None;
                for (case_id, &case_block) in cases.iter().zip(&case_blocks) {
                    self.edge(block, case_block);
                    if let Some(from) = fallthrough {
                        self.edge(from, case_block);
                    }
                    let consequent = match self.kind(*case_id) {
                        Some(NodeKind::SwitchCase { test, consequent }) => {
                            has_default |= test.is_none();
                            consequent.as_slice()
                        }
                        _ => &[][..],
                    };
                    fallthrough = self.list(Some(case_block), consequent);
                }
                self.frames.pop();

                if let Some(from) = fallthrough {
                    self.edge(from, exit);
                }
                if !has_default {
                    self.edge(block, exit);
                }
                Some(exit)
            }
            NodeKind::TryStatement {
                block: try_block,
                handler,
                finalizer,
            } => {
                self.record(block, id);
                let join = self.new_block();
                let after = match finalizer {
                    Some(_) => self.new_block(),
                    None => join,
                };
                let body_entry = self.new_block();
                self.edge(block, body_entry);

                let handler_entry = handler.map(|_| self.new_block());
                if let Some(handler_entry) = handler_entry {
                    self.edge(body_entry, handler_entry);
                    self.frames.push(Frame::Try {
                        handler: handler_entry,
                    });
                }
                let body_end = self.stmt(body_entry, *try_block);
                if handler_entry.is_some() {
                    self.frames.pop();
                }
                if let Some(end) = body_end {
                    self.edge(end, after);
                }

                if let (Some(handler), Some(entry)) = (handler, handler_entry) {
                    let handler_body = match self.kind(*handler) {
                        Some(NodeKind::CatchClause { body, .. }) => Some(*body),
                        _ => None,
                    };
                    self.record(entry, *handler);
                    let end = match handler_body {
                        Some(body) => self.stmt(entry, body),
                        None => Some(entry),
                    };
                    if let Some(end) = end {
                        self.edge(end, after);
                    }
                }

                if let Some(finalizer) = finalizer {
                    if let Some(end) = self.stmt(after, *finalizer) {
                        self.edge(end, join);
                    }
                }
                Some(join)
            }
            NodeKind::ReturnStatement { .. } => {
                self.record(block, id);
                None
            }
            NodeKind::ThrowStatement { .. } => {
                self.record(block, id);
                if let Some(handler) = self.handler() {
                    self.edge(block, handler);
                }
                None
            }
            NodeKind::BreakStatement => {
                self.record(block, id);
                if let Some(target) = self.break_target() {
                    self.edge(block, target);
                }
                None
            }
            NodeKind::ContinueStatement => {
                self.record(block, id);
                if let Some(target) = self.continue_target() {
                    self.edge(block, target);
                }
                None
            }
            _ => {
                self.record(block, id);
                Some(block)
            }
        }
    }

    fn finish(self, entry: u32) -> ControlFlowGraph {
        let raw = ControlFlowGraph {
            entry,
            blocks: self.blocks,
        };
        let live = raw.reachable();
        let renumber: BTreeMap<u32, u32> = live
            .iter()
            .enumerate()
            .map(|(new, old)| (*old, new as u32))
            .collect();

        let blocks = raw
            .blocks
            .into_iter()
            .filter_map(|block| {
                let id = *renumber.get(&block.id)?;
                Some(BasicBlock {
                    id,
                    statements: block.statements,
                    successors: block
                        .successors
                        .iter()
                        .filter_map(|s| renumber.get(s).copied())
                        .collect(),
                })
            })
            .collect();

        ControlFlowGraph {
            entry: renumber.get(&entry).copied().unwrap_or_default(),
            blocks,
        }
    }
}

/// Graph for the body of one function node.
pub fn function_cfg(nodes: &BTreeMap<NodeId, Node>, function: NodeId) -> Option<ControlFlowGraph> {
    let body = nodes.get(&function)?.kind.as_function()?.body;
    let mut builder = CfgBuilder::new(nodes);
    let entry = builder.new_block();
    builder.stmt(entry, body);
    Some(builder.finish(entry))
}

/// Graphs for every function node in the table.
pub fn derive_all(nodes: &BTreeMap<NodeId, Node>) -> BTreeMap<NodeId, ControlFlowGraph> {
    nodes
        .values()
        .filter(|n| n.kind.as_function().is_some())
        .filter_map(|n| Some((n.id, function_cfg(nodes, n.id)?)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{BuildOptions, IrBuilder};
    use crate::node::{BinaryOperator, FunctionNode};

    /// `function f(x) { if (x) { return 1; } while (x) { break; } return 2; }`
    fn build_function() -> (crate::Module, NodeId) {
        let mut b = IrBuilder::new();
        let fn_id = b.reserve().unwrap();
        let x = b.parameter("x").unwrap();

        let test = b.identifier("x", Some(x.id)).unwrap();
        let one = b.numeric_literal(1.0).unwrap();
        let ret1 = b.return_statement(Some(one.id)).unwrap();
        let then_block = b.block_statement(vec![ret1.id]).unwrap();
        let if_stmt = b.if_statement(test.id, then_block.id, None).unwrap();

        let cond = b.identifier("x", Some(x.id)).unwrap();
        let brk = b.create_node(NodeKind::BreakStatement).unwrap();
        let loop_body = b.block_statement(vec![brk.id]).unwrap();
        let while_stmt = b
            .create_node(NodeKind::WhileStatement {
                test: cond.id,
                body: loop_body.id,
            })
            .unwrap();

        let two = b.numeric_literal(2.0).unwrap();
        let ret2 = b.return_statement(Some(two.id)).unwrap();
        let body = b
            .block_statement(vec![if_stmt.id, while_stmt.id, ret2.id])
            .unwrap();
        b.fill(
            fn_id,
            NodeKind::FunctionDeclaration(FunctionNode {
                name: Some("f".into()),
                params: vec![x.id],
                rest: None,
                body: body.id,
                is_async: false,
            }),
        )
        .unwrap();
        b.push_statement(fn_id);
        (b.build(&BuildOptions::default()).unwrap(), fn_id)
    }

    #[test]
    fn test_all_blocks_reachable() {
        let (module, fn_id) = build_function();
        let cfg = module.cfg(fn_id).unwrap();
        assert_eq!(cfg.entry, 0);
        assert_eq!(cfg.reachable().len(), cfg.blocks.len());
        for block in &cfg.blocks {
            for succ in &block.successors {
                assert!(cfg.block(*succ).is_some());
            }
        }
    }

    #[test]
    fn test_return_block_has_no_successors() {
        let (module, fn_id) = build_function();
        let cfg = module.cfg(fn_id).unwrap();
        let returns: Vec<&BasicBlock> = cfg
            .blocks
            .iter()
            .filter(|b| {
                b.statements.iter().any(|s| {
                    matches!(
                        module.node(*s).map(|n| &n.kind),
                        Some(NodeKind::ReturnStatement { .. })
                    )
                })
            })
            .collect();
        assert_eq!(returns.len(), 2);
        assert!(returns.iter().all(|b| b.successors.is_empty()));
    }

    #[test]
    fn test_dead_code_is_pruned() {
        let mut b = IrBuilder::new();
        let fn_id = b.reserve().unwrap();
        let ret = b.return_statement(None).unwrap();
        let one = b.numeric_literal(1.0).unwrap();
        let two = b.numeric_literal(2.0).unwrap();
        let sum = b
            .binary_expression(BinaryOperator::Add, one.id, two.id)
            .unwrap();
        let dead = b.expression_statement(sum.id).unwrap();
        let body = b.block_statement(vec![ret.id, dead.id]).unwrap();
        b.fill(
            fn_id,
            NodeKind::FunctionDeclaration(FunctionNode {
                name: Some("g".into()),
                params: vec![],
                rest: None,
                body: body.id,
                is_async: false,
            }),
        )
        .unwrap();
        b.push_statement(fn_id);
        let module = b.build(&BuildOptions::default()).unwrap();

        let cfg = module.cfg(fn_id).unwrap();
        assert_eq!(cfg.blocks.len(), 1);
        assert_eq!(cfg.blocks[0].statements, vec![ret.id]);
    }
}
