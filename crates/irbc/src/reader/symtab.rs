//! SymbolTable blocks: type names and value names.

use super::Session;
use crate::error::ErrorKind;
use crate::format::FormatFlags;

impl Session<'_> {
    pub(super) fn read_symbol_table(&mut self) -> Result<(), ErrorKind> {
        if !self.flags.contains(FormatFlags::TYPES_IN_VALUE_PLANES) {
            let ntypes = self.read_count()?;
            for _ in 0..ntypes {
                let ty = self.read_type_ref()?;
                let name = self.read_name()?;
                self.module.name_type(ty, name);
            }
        }

        while !self.block_done() {
            let count = self.read_count()?;
            let wire = self.reader.read_vbr_u32()?;
            if self.is_type_plane(wire) {
                for _ in 0..count {
                    let ty = self.read_type_ref()?;
                    let name = self.read_name()?;
                    self.module.name_type(ty, name);
                }
                continue;
            }
            let ty = self.type_ref(wire)?;
            for _ in 0..count {
                let slot = self.reader.read_vbr_u32()?;
                let name = self.read_name()?;
                let value = self.value_ref(ty, slot, false)?;
                self.module.set_name(value, name);
            }
        }
        Ok(())
    }

    fn read_name(&mut self) -> Result<String, ErrorKind> {
        let name = self.reader.read_string()?.to_owned();
        if self.flags.contains(FormatFlags::PADDED_STRINGS) {
            self.reader.align32()?;
        }
        Ok(name)
    }
}
