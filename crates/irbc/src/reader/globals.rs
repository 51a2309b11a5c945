//! ModuleGlobalInfo: global variables and function declarations.

use tracing::debug;

use super::{PendingInit, Session};
use crate::error::ErrorKind;
use crate::ir::{Linkage, TypeId};

impl Session<'_> {
    pub(super) fn read_global_info(&mut self) -> Result<(), ErrorKind> {
        if self.globals_read {
            return Err(ErrorKind::InvalidValue("second global info block"));
        }
        self.globals_read = true;

        let nglobals = self.read_count()?;
        for _ in 0..nglobals {
            let word = self.reader.read_vbr_u64()?;
            let ptr_ty = self.pointer_slot(word >> 5)?;
            let linkage = linkage((word >> 2) & 0b111)?;
            let has_init = word & 0b10 != 0;
            let is_constant = word & 0b1 != 0;
            let element = self
                .module
                .pointee(ptr_ty)
                .ok_or(ErrorKind::InvalidType("global type is not a pointer"))?;
            let global = self.module.new_global(element, is_constant, linkage, None);
            self.define_value(ptr_ty, global)?;
            if has_init {
                let slot = self.reader.read_vbr_u32()?;
                self.pending_inits.push(PendingInit {
                    global,
                    ty: element,
                    slot,
                });
            }
        }

        let nfunctions = self.read_count()?;
        for _ in 0..nfunctions {
            let word = self.reader.read_vbr_u64()?;
            let ptr_ty = self.pointer_slot(word >> 4)?;
            let linkage = linkage((word >> 1) & 0b111)?;
            let fn_ty = self
                .module
                .pointee(ptr_ty)
                .ok_or(ErrorKind::InvalidType("function type is not a pointer"))?;
            let function = self
                .module
                .new_function(fn_ty, linkage)
                .map_err(|_| ErrorKind::InvalidType("function value of non-function type"))?;
            self.define_value(ptr_ty, function)?;
            if word & 1 != 0 {
                self.pending_bodies.push_back(function);
            }
        }
        debug!(
            globals = nglobals,
            functions = nfunctions,
            bodies = self.pending_bodies.len(),
            "decoded global info"
        );
        Ok(())
    }

    fn pointer_slot(&self, slot: u64) -> Result<TypeId, ErrorKind> {
        let wire = u32::try_from(slot).map_err(|_| ErrorKind::InvalidType("type slot out of range"))?;
        self.global_type(wire)
    }
}

fn linkage(code: u64) -> Result<Linkage, ErrorKind> {
    Linkage::from_u32(code as u32).ok_or(ErrorKind::InvalidValue("unknown linkage"))
}
