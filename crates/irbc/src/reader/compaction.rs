//! Per-function compaction table.

use std::collections::HashMap;

use tracing::debug;

use super::Session;
use crate::error::ErrorKind;

impl Session<'_> {
    /// Installs the function's compaction table: an optional list of global
    /// type ids that later type references index into, and per-type planes
    /// of module values that shadow the module planes.
    pub(super) fn read_compaction_table(&mut self) -> Result<(), ErrorKind> {
        let ntypes = self.read_count()?;
        let mut compact_types = Vec::with_capacity(ntypes as usize);
        for _ in 0..ntypes {
            let wire = self.reader.read_vbr_u32()?;
            self.global_type(wire)?;
            compact_types.push(wire);
        }

        let mut planes = HashMap::new();
        while !self.block_done() {
            let count = self.read_count()?;
            let wire = self.reader.read_vbr_u32()?;
            let ty = self.global_type(wire)?;
            if planes.contains_key(&ty) {
                return Err(ErrorKind::DuplicatePlane(wire));
            }
            let mut plane = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let slot = self.reader.read_vbr_u32()?;
                plane.push(self.module_value(ty, slot)?);
            }
            planes.insert(ty, plane);
        }

        debug!(
            types = compact_types.len(),
            planes = planes.len(),
            "installed compaction table"
        );
        let f = self
            .func
            .as_mut()
            .ok_or(ErrorKind::InvalidValue("compaction table outside a function"))?;
        f.compact_types = compact_types;
        f.compaction = planes;
        Ok(())
    }
}
