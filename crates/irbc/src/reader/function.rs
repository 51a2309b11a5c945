//! Function blocks.

use tracing::{debug, trace};

use super::{FunctionScope, Session};
use crate::error::ErrorKind;
use crate::format::BlockKind;
use crate::ir::{PrimitiveType, ValueId};

/// Sections of a function body, in the order they may appear.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Stage {
    Start,
    Compaction,
    Constants,
    Blocks,
    Symbols,
}

impl Session<'_> {
    pub(super) fn read_function(&mut self) -> Result<(), ErrorKind> {
        self.finish_module_constants()?;
        let function = self
            .pending_bodies
            .pop_front()
            .ok_or(ErrorKind::InvalidValue("function block without a declared body"))?;

        let result = self
            .incorporate_function(function)
            .and_then(|()| self.read_function_body());
        self.purge_function();
        result?;

        self.functions_read += 1;
        Ok(())
    }

    /// Installs a fresh local scope whose planes start with the arguments.
    fn incorporate_function(&mut self, function: ValueId) -> Result<(), ErrorKind> {
        let arguments = self
            .module
            .function(function)
            .map(|f| f.arguments.clone())
            .ok_or(ErrorKind::InvalidValue("function slot holds a non-function"))?;
        self.func = Some(FunctionScope::new(function));
        for arg in arguments {
            let ty = self.module.type_of(arg);
            self.define_value(ty, arg)?;
        }
        Ok(())
    }

    fn purge_function(&mut self) {
        self.func = None;
    }

    fn read_function_body(&mut self) -> Result<(), ErrorKind> {
        let mut stage = Stage::Start;
        while !self.block_done() {
            let header = self.reader.enter_block()?;
            trace!(kind = header.kind, len = header.len, offset = header.body_start, "function block");
            match BlockKind::from_u32(header.kind) {
                Some(BlockKind::CompactionTable) => {
                    if stage != Stage::Start {
                        return Err(ErrorKind::InvalidValue("compaction table is not first"));
                    }
                    stage = Stage::Compaction;
                    self.read_compaction_table()?;
                }
                Some(BlockKind::ConstantPool) => {
                    if stage > Stage::Constants {
                        return Err(ErrorKind::InvalidValue("constant pool after basic blocks"));
                    }
                    stage = Stage::Constants;
                    self.read_constant_pool()?;
                    self.fold_null_aggregates()?;
                }
                Some(BlockKind::BasicBlock) => {
                    if stage > Stage::Blocks {
                        return Err(ErrorKind::InvalidValue("basic block after symbol table"));
                    }
                    stage = Stage::Blocks;
                    self.read_basic_block()?;
                }
                Some(BlockKind::SymbolTable) => {
                    stage = Stage::Symbols;
                    self.read_symbol_table()?;
                }
                _ => trace!(kind = header.kind, "skipping unknown block"),
            }
            self.reader.exit_block();
        }
        self.finish_function()
    }

    fn read_basic_block(&mut self) -> Result<(), ErrorKind> {
        let (function, slot) = match self.func.as_mut() {
            Some(f) => {
                f.defined_blocks += 1;
                (f.function, f.defined_blocks - 1)
            }
            None => return Err(ErrorKind::InvalidValue("basic block outside a function")),
        };
        let block = self.block_for(slot)?;
        self.module.append_block(function, block)?;
        while !self.block_done() {
            self.read_instruction(block)?;
        }
        Ok(())
    }

    /// Every label and forward reference must have been defined.
    fn finish_function(&self) -> Result<(), ErrorKind> {
        let Some(f) = self.func.as_ref() else {
            return Ok(());
        };
        if f.defined_blocks == 0 {
            return Err(ErrorKind::InvalidValue("function body has no basic blocks"));
        }
        if let Some(&slot) = f.blocks.keys().filter(|&&s| s >= f.defined_blocks).min() {
            return Err(ErrorKind::UnresolvedReference {
                ty: PrimitiveType::Label.type_id(),
                slot,
            });
        }
        if let Some((ty, slot)) = f.refs.first_unresolved() {
            return Err(ErrorKind::UnresolvedReference { ty, slot });
        }
        debug!(
            function = %f.function,
            blocks = f.defined_blocks,
            compacted = !f.compaction.is_empty() || !f.compact_types.is_empty(),
            "decoded function"
        );
        Ok(())
    }
}
