//! Compile units, functions and source statements: the per-unit pieces of
//! the [`crate::target::Target`] model.

use crate::address::GlobalAddress;
use crate::target::types::{DataType, Variable};
use gimli::Range;
use std::path::{Path, PathBuf};

/// Index of a [`DataType`] within its owning [`CompileUnit::data_types`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeNdx(pub usize);

/// Index of a [`Variable`] within its owning [`CompileUnit::variables`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VariableNdx(pub usize);

/// Index of a [`Function`] within its owning [`CompileUnit::functions`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FunctionNdx(pub usize);

/// A reference to a DWARF debugging information entry, either local to the
/// compile unit that produced it or a global offset into `.debug_info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DieRef {
    Unit(gimli::UnitOffset),
    Global(gimli::DebugInfoOffset),
}

/// A source line that a breakpoint can legally be placed on. `breakpoint_addr`
/// is the address just past the function prologue for that statement, per
/// §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceStatement {
    pub breakpoint_addr: GlobalAddress,
    pub source_line: u64,
    pub file_index: usize,
    pub is_stmt: bool,
    /// Position of this row within [`CompileUnit::sources`], used to walk
    /// forward to the next row without a second lookup.
    pub pos: usize,
}

/// A resolved source location, handed to callers that need the file path
/// rather than just its index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Place {
    pub file: PathBuf,
    pub address: GlobalAddress,
    pub line_number: u64,
    pub column_number: u64,
    pub is_stmt: bool,
    pub pos_in_unit: usize,
}

impl Place {
    pub fn line_eq(&self, other: &Place) -> bool {
        self.file == other.file && self.line_number == other.line_number
    }
}

/// A function's platform-specific unwind/frame data: currently just the
/// raw `DW_AT_frame_base` expression bytes, evaluated lazily.
#[derive(Debug, Clone, Default)]
pub struct PlatformData {
    pub frame_base_expr: Option<Vec<u8>>,
}

/// A DWARF subprogram: `{ name_hash, source_loc?, statements[], addr_ranges[],
/// inline_ranges[], variable_indices[], platform_data }` per §3.
#[derive(Debug, Clone)]
pub struct Function {
    pub name_hash: Option<u64>,
    pub source_loc: Option<Place>,
    /// Indices into the owning unit's `sources`, sorted by address.
    pub statements: Vec<usize>,
    pub addr_ranges: Vec<Range>,
    /// Address ranges covered by every `DW_TAG_inlined_subroutine` nested
    /// anywhere under this subprogram, collected by recursing through its
    /// children (a DWARF inlined call can itself contain further inlined
    /// calls). Step-over must not plant internal breakpoints inside these
    /// (§4.4, B).
    pub inline_ranges: Vec<Range>,
    pub variable_indices: Vec<VariableNdx>,
    pub platform_data: PlatformData,
}

impl Function {
    pub fn contains_pc(&self, pc: GlobalAddress) -> bool {
        pc.in_ranges(&self.addr_ranges)
    }

    pub fn low_pc(&self) -> Option<GlobalAddress> {
        self.addr_ranges.iter().map(|r| r.begin).min().map(GlobalAddress::from)
    }
}

/// `{ language, addr_size, address_ranges[] (sorted by low), sources[],
/// data_types[], functions, variables[] }` per §3.
pub struct CompileUnit {
    pub language: gimli::DwLang,
    /// Raw `DW_AT_producer` string (e.g. `"zig 0.11.0"`), kept because no
    /// stable `DW_LANG_Zig` constant exists across DWARF producers.
    pub producer: Option<String>,
    /// The unit header's address size/DWARF format/version, needed verbatim
    /// by `gimli::Expression::evaluation` to evaluate a variable's location
    /// expression (§4.5's "simple variable location lookup").
    pub encoding: gimli::Encoding,
    pub addr_size: u8,
    /// Sorted by `.begin`; invariant maintained by the loader.
    pub address_ranges: Vec<Range>,
    pub files: Vec<PathBuf>,
    pub sources: Vec<SourceStatement>,
    pub data_types: Vec<DataType>,
    pub functions: Vec<Function>,
    pub variables: Vec<Variable>,
    /// `(range.begin) -> function index`, sorted by low address, per §4.1's
    /// "Function index" contract. A function may appear more than once
    /// (disjoint ranges).
    function_index: Vec<(u64, FunctionNdx)>,
}

impl CompileUnit {
    pub fn new(
        language: gimli::DwLang,
        producer: Option<String>,
        encoding: gimli::Encoding,
        addr_size: u8,
        address_ranges: Vec<Range>,
        files: Vec<PathBuf>,
        sources: Vec<SourceStatement>,
        data_types: Vec<DataType>,
        functions: Vec<Function>,
        variables: Vec<Variable>,
    ) -> Self {
        let mut function_index: Vec<(u64, FunctionNdx)> = functions
            .iter()
            .enumerate()
            .flat_map(|(idx, f)| {
                f.addr_ranges
                    .iter()
                    .map(move |r| (r.begin, FunctionNdx(idx)))
            })
            .collect();
        function_index.sort_by_key(|(addr, _)| *addr);

        Self {
            language,
            producer,
            encoding,
            addr_size,
            address_ranges,
            files,
            sources,
            data_types,
            functions,
            variables,
            function_index,
        }
    }

    pub fn data_type(&self, ndx: TypeNdx) -> &DataType {
        &self.data_types[ndx.0]
    }

    pub fn variable(&self, ndx: VariableNdx) -> &Variable {
        &self.variables[ndx.0]
    }

    pub fn function(&self, ndx: FunctionNdx) -> &Function {
        &self.functions[ndx.0]
    }

    pub fn contains_pc(&self, pc: GlobalAddress) -> bool {
        pc.in_ranges(&self.address_ranges)
    }

    /// No stable `DW_LANG_Zig` constant exists across DWARF producers, so
    /// the Zig toolchain is recognized from `DW_AT_producer` instead.
    pub fn is_zig_toolchain(&self) -> bool {
        self.producer.as_deref().is_some_and(|p| p.starts_with("zig"))
    }

    /// Binary-search lookup per §4.1: "binary-search lookup is the only
    /// runtime operation required".
    pub fn find_function_by_pc(&self, pc: GlobalAddress) -> Option<(FunctionNdx, &Function)> {
        let target = u64::from(pc);
        let pos = match self
            .function_index
            .binary_search_by_key(&target, |(addr, _)| *addr)
        {
            Ok(pos) => pos,
            Err(0) => return None,
            Err(pos) => pos - 1,
        };

        // A single begin address may host several (disjoint-range) entries
        // for the same function; walk back to the first match, then confirm
        // the pc actually falls in one of its ranges.
        for (_, ndx) in self.function_index[..=pos].iter().rev() {
            let func = self.function(*ndx);
            if func.contains_pc(pc) {
                return Some((*ndx, func));
            }
        }
        None
    }

    pub fn find_place(&self, pos: usize) -> Option<Place> {
        let stmt = self.sources.get(pos)?;
        Some(Place {
            file: self.files.get(stmt.file_index).cloned().unwrap_or_default(),
            address: stmt.breakpoint_addr,
            line_number: stmt.source_line,
            column_number: 0,
            is_stmt: stmt.is_stmt,
            pos_in_unit: pos,
        })
    }

    pub fn find_place_by_pc(&self, pc: GlobalAddress) -> Option<Place> {
        let target = u64::from(pc);
        let pos = match self
            .sources
            .binary_search_by_key(&target, |s| u64::from(s.breakpoint_addr))
        {
            Ok(p) => p,
            Err(0) => return None,
            Err(p) => p - 1,
        };
        self.find_place(pos)
    }

    pub fn find_exact_place_by_pc(&self, pc: GlobalAddress) -> Option<Place> {
        let target = u64::from(pc);
        let pos = self
            .sources
            .binary_search_by_key(&target, |s| u64::from(s.breakpoint_addr))
            .ok()?;
        self.find_place(pos)
    }

    /// Implements the breakpoint manager's per-toolchain line-to-address
    /// policy (§4.3): first match for most languages, last match for the
    /// Zig toolchain (`DW_LANG_zig` doesn't exist as a stable gimli constant
    /// across DWARF producers, so callers pass the already-resolved
    /// `is_zig_toolchain` flag determined from the unit's producer string).
    pub fn find_stmt_line(&self, file: &Path, line: u64, last_match: bool) -> Option<Place> {
        let file_idx = self.files.iter().position(|f| f.ends_with(file))?;

        let mut found = None;
        for (pos, stmt) in self.sources.iter().enumerate() {
            if stmt.file_index == file_idx && stmt.source_line == line {
                found = Some(pos);
                if !last_match {
                    break;
                }
            }
        }
        self.find_place(found?)
    }
}

impl std::fmt::Debug for CompileUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompileUnit")
            .field("language", &self.language)
            .field("functions", &self.functions.len())
            .field("data_types", &self.data_types.len())
            .field("sources", &self.sources.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::types::DataTypeKind;

    fn mk_function(name_hash: u64, begin: u64, end: u64) -> Function {
        Function {
            name_hash: Some(name_hash),
            source_loc: None,
            statements: vec![],
            addr_ranges: vec![Range { begin, end }],
            inline_ranges: vec![],
            variable_indices: vec![],
            platform_data: PlatformData::default(),
        }
    }

    fn test_encoding() -> gimli::Encoding {
        gimli::Encoding { address_size: 8, format: gimli::Format::Dwarf32, version: 5 }
    }

    #[test]
    fn find_function_by_pc_matches_disjoint_ranges() {
        let functions = vec![mk_function(1, 0x1000, 0x1010), mk_function(2, 0x2000, 0x2020)];
        let cu = CompileUnit::new(
            gimli::DW_LANG_C,
            None,
            test_encoding(),
            8,
            vec![],
            vec![],
            vec![],
            vec![DataType {
                name_hash: None,
                size_bytes: None,
                kind: DataTypeKind::Unknown,
            }],
            functions,
            vec![],
        );

        let (ndx, func) = cu.find_function_by_pc(GlobalAddress::from(0x2010u64)).unwrap();
        assert_eq!(ndx, FunctionNdx(1));
        assert_eq!(func.name_hash, Some(2));
        assert!(cu.find_function_by_pc(GlobalAddress::from(0x1500u64)).is_none());
    }

    #[test]
    fn find_place_by_pc_picks_nearest_preceding_statement() {
        let sources = vec![
            SourceStatement {
                breakpoint_addr: GlobalAddress::from(0x1000u64),
                source_line: 10,
                file_index: 0,
                is_stmt: true,
                pos: 0,
            },
            SourceStatement {
                breakpoint_addr: GlobalAddress::from(0x1010u64),
                source_line: 11,
                file_index: 0,
                is_stmt: true,
                pos: 1,
            },
        ];
        let cu = CompileUnit::new(
            gimli::DW_LANG_C,
            None,
            test_encoding(),
            8,
            vec![],
            vec![PathBuf::from("main.c")],
            sources,
            vec![],
            vec![],
            vec![],
        );

        let place = cu.find_place_by_pc(GlobalAddress::from(0x1008u64)).unwrap();
        assert_eq!(place.line_number, 10);
    }
}
