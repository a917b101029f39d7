//! The loaded debug-information model.
//!
//! A [`Target`] is built once per subordinate executable, at launch, from
//! its ELF/DWARF data. Everything downstream — breakpoint placement,
//! stepping, expression evaluation — reads it but never mutates it; the
//! one thing that changes per-run (the PIE load offset) lives with the
//! process, not here, so a `Target` can be reused across relaunches of the
//! same binary.

pub mod loader;
pub mod string_cache;
pub mod types;
pub mod unit;

pub use string_cache::StringCache;
pub use types::{DataType, DataTypeKind, Member, Variable};
pub use unit::{CompileUnit, DieRef, Function, FunctionNdx, Place, TypeNdx, VariableNdx};

use crate::address::GlobalAddress;
use crate::error::Error;
use gimli::{BaseAddresses, EhFrame, Section, UnwindContext, UnwindSection, UnwindTableRow};
use loader::R;
use memmap2::Mmap;
use object::{Object, ObjectSection};
use std::path::{Path, PathBuf};

/// A fully loaded executable's debug information: one DWARF-derived
/// [`CompileUnit`] per compile unit, plus the CFI data needed to unwind
/// through it.
pub struct Target {
    path: PathBuf,
    pie: bool,
    addr_size: u8,
    strings: StringCache,
    eh_frame: EhFrame<R>,
    bases: BaseAddresses,
    compile_units: Vec<CompileUnit>,
}

impl Target {
    /// Loads debug information from an ELF executable at `path`. Section
    /// loading is parallelized (§9); DIE walking is currently serial per
    /// compile unit, which is where the bulk of load time for
    /// heavily-templated binaries goes.
    pub fn load(path: impl AsRef<Path>) -> Result<Target, Error> {
        let path = path.as_ref().to_path_buf();
        let file = std::fs::File::open(&path)?;
        let mmap = unsafe { Mmap::map(&file)? };
        let object = object::File::parse(&*mmap)?;

        let endian = if object.is_little_endian() {
            gimli::RunTimeEndian::Little
        } else {
            gimli::RunTimeEndian::Big
        };
        let pie = object.kind() == object::ObjectKind::Dynamic;
        let addr_size = if object.is_64() { 8 } else { 4 };

        let dwarf = loader::load_dwarf_par(&object, endian)?;
        let eh_frame = EhFrame::load(|id| loader::load_section(id, &object, endian))?;
        let bases = build_base_addresses(&object);

        let mut strings = StringCache::new();
        let mut compile_units = Vec::new();
        let mut units = dwarf.units();
        while let Some(header) = units.next()? {
            let unit = dwarf.unit(header)?;
            let cu = loader::build_compile_unit(&dwarf, &unit, &mut strings)?;
            compile_units.push(cu);
        }

        Ok(Target { path, pie, addr_size, strings, eh_frame, bases, compile_units })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_pie(&self) -> bool {
        self.pie
    }

    pub fn addr_size(&self) -> u8 {
        self.addr_size
    }

    pub fn strings(&self) -> &StringCache {
        &self.strings
    }

    pub fn compile_units(&self) -> &[CompileUnit] {
        &self.compile_units
    }

    /// Finds the compile unit whose address ranges contain `pc`, per §4.1's
    /// "binary-search lookup is the only runtime operation required".
    pub fn find_unit_by_pc(&self, pc: GlobalAddress) -> Option<&CompileUnit> {
        self.compile_units.iter().find(|unit| unit.contains_pc(pc))
    }

    pub fn find_function_by_pc(&self, pc: GlobalAddress) -> Option<(FunctionNdx, &Function)> {
        self.find_unit_by_pc(pc)?.find_function_by_pc(pc)
    }

    pub fn find_place_from_pc(&self, pc: GlobalAddress) -> Option<Place> {
        self.find_unit_by_pc(pc)?.find_place_by_pc(pc)
    }

    pub fn find_exact_place_from_pc(&self, pc: GlobalAddress) -> Option<Place> {
        self.find_unit_by_pc(pc)?.find_exact_place_by_pc(pc)
    }

    /// Looks up the `.eh_frame` unwind row covering `pc`, the first step of
    /// evaluating a frame's CFA (§4.5's frame computation); the caller
    /// resolves the row's CFA rule against live registers.
    pub fn unwind_row_for_pc(&self, pc: GlobalAddress) -> Result<UnwindTableRow<R>, Error> {
        let mut ctx = UnwindContext::new();
        let row = self
            .eh_frame
            .unwind_info_for_address(&self.bases, &mut ctx, u64::from(pc), EhFrame::cie_from_offset)
            .map_err(|_| Error::NoUnwindInfoForAddress(pc))?;
        Ok(row.clone())
    }
}

fn build_base_addresses(object: &object::File) -> BaseAddresses {
    let section_addr = |name: &str| -> Option<u64> {
        object.sections().find_map(|section| (section.name().ok()? == name).then(|| section.address()))
    };

    let mut bases = BaseAddresses::default();
    if let Some(got) = section_addr(".got") {
        bases = bases.set_got(got);
    }
    if let Some(text) = section_addr(".text") {
        bases = bases.set_text(text);
    }
    if let Some(eh) = section_addr(".eh_frame") {
        bases = bases.set_eh_frame(eh);
    }
    if let Some(eh_hdr) = section_addr(".eh_frame_hdr") {
        bases = bases.set_eh_frame_hdr(eh_hdr);
    }
    bases
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_rejects_missing_file() {
        let err = Target::load("/nonexistent/path/to/binary");
        assert!(err.is_err());
    }
}
