//! Loads `.debug_*` sections from an ELF object into a [`gimli::Dwarf`],
//! then walks each compile unit's DIE tree into the immutable
//! [`crate::target::unit::CompileUnit`] model.
//!
//! Section loading is parallelized across a thread pool exactly as the
//! teacher's loader does it: each section is an independent slice of the
//! mapped file, so there's no reason to load them serially.

use crate::address::GlobalAddress;
use crate::error::Error;
use crate::target::string_cache::StringCache;
use crate::target::types::{DataType, DataTypeKind, Enumerator, Member, PrimitiveEncoding, Variable};
use crate::target::unit::{CompileUnit, Function, PlatformData, Place, SourceStatement, TypeNdx, VariableNdx};
use gimli::{
    AttributeValue, DebuggingInformationEntry, Dwarf, EndianArcSlice, Range, RunTimeEndian,
    Section, SectionId, Unit, UnitOffset,
};
use object::{Object, ObjectSection};
use rayon::prelude::*;
use std::borrow::Cow;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

pub type R = EndianArcSlice<RunTimeEndian>;

pub(crate) fn load_section(id: SectionId, file: &object::File, endian: RunTimeEndian) -> Result<R, Error> {
    let data = file
        .section_by_name(id.name())
        .and_then(|section| section.uncompressed_data().ok())
        .unwrap_or(Cow::Borrowed(&[]));
    Ok(gimli::EndianArcSlice::new(Arc::from(&*data), endian))
}

/// Loads every DWARF section in parallel, matching the teacher's
/// `dwarf::loader::load_par`.
pub fn load_dwarf_par(file: &object::File, endian: RunTimeEndian) -> Result<Dwarf<R>, Error> {
    let sections: Mutex<HashMap<SectionId, R>> = Mutex::new(HashMap::new());
    let ids = [
        SectionId::DebugAbbrev,
        SectionId::DebugAddr,
        SectionId::DebugAranges,
        SectionId::DebugInfo,
        SectionId::DebugLine,
        SectionId::DebugLineStr,
        SectionId::DebugStr,
        SectionId::DebugStrOffsets,
        SectionId::DebugTypes,
        SectionId::DebugLoc,
        SectionId::DebugLocLists,
        SectionId::DebugRanges,
        SectionId::DebugRngLists,
    ];

    ids.into_par_iter().try_for_each(|id| -> Result<(), Error> {
        let sect = load_section(id, file, endian)?;
        sections.lock().expect("loader mutex poisoned").insert(id, sect);
        Ok(())
    })?;

    let mut sections = sections.into_inner().expect("loader mutex poisoned");
    let mut take =
        |id: SectionId| sections.remove(&id).unwrap_or_else(|| R::new(Arc::from(&[][..]), endian));

    Ok(Dwarf {
        debug_abbrev: gimli::DebugAbbrev::from(take(SectionId::DebugAbbrev)),
        debug_addr: gimli::DebugAddr::from(take(SectionId::DebugAddr)),
        debug_aranges: gimli::DebugAranges::from(take(SectionId::DebugAranges)),
        debug_info: gimli::DebugInfo::from(take(SectionId::DebugInfo)),
        debug_line: gimli::DebugLine::from(take(SectionId::DebugLine)),
        debug_line_str: gimli::DebugLineStr::from(take(SectionId::DebugLineStr)),
        debug_str: gimli::DebugStr::from(take(SectionId::DebugStr)),
        debug_str_offsets: gimli::DebugStrOffsets::from(take(SectionId::DebugStrOffsets)),
        debug_types: gimli::DebugTypes::from(take(SectionId::DebugTypes)),
        locations: gimli::LocationLists::new(
            gimli::DebugLoc::from(take(SectionId::DebugLoc)),
            gimli::DebugLocLists::from(take(SectionId::DebugLocLists)),
        ),
        ranges: gimli::RangeLists::new(
            gimli::DebugRanges::from(take(SectionId::DebugRanges)),
            gimli::DebugRngLists::from(take(SectionId::DebugRngLists)),
        ),
        file_type: gimli::DwarfFileType::Main,
        sup: None,
        abbreviations_cache: gimli::AbbreviationsCache::new(),
    })
}

fn attr_string(dwarf: &Dwarf<R>, unit: &Unit<R>, attr: AttributeValue<R>) -> Option<String> {
    dwarf
        .attr_string(unit, attr)
        .ok()
        .and_then(|s| s.to_string().ok().map(|s| s.into_owned()))
}

fn attr_u64(entry: &DebuggingInformationEntry<R>, at: gimli::DwAt) -> Option<u64> {
    entry.attr_value(at).ok().flatten().and_then(|v| v.udata_value())
}

fn attr_i64(entry: &DebuggingInformationEntry<R>, at: gimli::DwAt) -> Option<i64> {
    entry.attr_value(at).ok().flatten().and_then(|v| v.sdata_value())
}

fn attr_type_ref(entry: &DebuggingInformationEntry<R>) -> Option<UnitOffset> {
    match entry.attr_value(gimli::DW_AT_type).ok().flatten()? {
        AttributeValue::UnitRef(off) => Some(off),
        _ => None,
    }
}

fn attr_exprloc(entry: &DebuggingInformationEntry<R>, at: gimli::DwAt) -> Option<Vec<u8>> {
    match entry.attr_value(at).ok().flatten()? {
        AttributeValue::Exprloc(expr) => Some(expr.0.to_slice().ok()?.to_vec()),
        _ => None,
    }
}

const TYPE_TAGS: &[gimli::DwTag] = &[
    gimli::DW_TAG_base_type,
    gimli::DW_TAG_pointer_type,
    gimli::DW_TAG_const_type,
    gimli::DW_TAG_volatile_type,
    gimli::DW_TAG_structure_type,
    gimli::DW_TAG_union_type,
    gimli::DW_TAG_array_type,
    gimli::DW_TAG_typedef,
    gimli::DW_TAG_enumeration_type,
    gimli::DW_TAG_subroutine_type,
];

/// A DIE stripped to the handful of attributes this loader understands,
/// collected in a single DFS pass so later resolution can do random-access
/// lookups by unit offset (DWARF attributes may reference a DIE that hasn't
/// been visited yet).
struct RawDie {
    offset: UnitOffset,
    tag: gimli::DwTag,
    name: Option<String>,
    type_ref: Option<UnitOffset>,
    byte_size: Option<u64>,
    encoding: Option<u8>,
    const_value: Option<i64>,
    upper_bound: Option<i64>,
    count: Option<u64>,
    data_member_location: Option<u64>,
    location: Option<Vec<u8>>,
    frame_base: Option<Vec<u8>>,
    ranges: Vec<Range>,
}

/// Walks a single compile unit's DIE tree and builds the immutable
/// [`CompileUnit`] model. Grounded on the teacher's `dwarf::parser::unit`
/// two-pass shape (collect then resolve) to handle DWARF's forward type
/// references without requiring a second DIE walk.
pub fn build_compile_unit(
    dwarf: &Dwarf<R>,
    unit: &Unit<R>,
    strings: &mut StringCache,
) -> Result<CompileUnit, Error> {
    let encoding = unit.encoding();
    let addr_size = encoding.address_size;

    let (language, producer) = {
        let mut cursor = unit.entries();
        let root = cursor.next_dfs()?.map(|(_, root)| root);
        let language = root
            .and_then(|root| attr_u64(root, gimli::DW_AT_language))
            .map(|v| gimli::DwLang(v as u16))
            .unwrap_or(gimli::DW_LANG_C);
        let producer = root
            .and_then(|root| root.attr_value(gimli::DW_AT_producer).ok().flatten())
            .and_then(|v| attr_string(dwarf, unit, v));
        (language, producer)
    };

    let mut raw_dies: Vec<RawDie> = Vec::new();
    let mut offset_index: HashMap<UnitOffset, usize> = HashMap::new();
    let mut parent_stack: Vec<usize> = Vec::new();
    let mut children_of: HashMap<usize, Vec<usize>> = HashMap::new();

    let mut cursor = unit.entries();
    while let Some((delta_depth, entry)) = cursor.next_dfs()? {
        if delta_depth <= 0 {
            for _ in delta_depth..=0 {
                parent_stack.pop();
            }
        }

        let name = entry
            .attr_value(gimli::DW_AT_name)
            .ok()
            .flatten()
            .and_then(|v| attr_string(dwarf, unit, v));

        let ranges: Vec<Range> = dwarf
            .die_ranges(unit, entry)
            .map(|mut iter| {
                let mut out = Vec::new();
                while let Ok(Some(r)) = iter.next() {
                    out.push(r);
                }
                out
            })
            .unwrap_or_default();

        let idx = raw_dies.len();
        raw_dies.push(RawDie {
            offset: entry.offset(),
            tag: entry.tag(),
            name,
            type_ref: attr_type_ref(entry),
            byte_size: attr_u64(entry, gimli::DW_AT_byte_size),
            encoding: attr_u64(entry, gimli::DW_AT_encoding).map(|v| v as u8),
            const_value: attr_i64(entry, gimli::DW_AT_const_value),
            upper_bound: attr_i64(entry, gimli::DW_AT_upper_bound),
            count: attr_u64(entry, gimli::DW_AT_count),
            data_member_location: attr_u64(entry, gimli::DW_AT_data_member_location),
            location: attr_exprloc(entry, gimli::DW_AT_location),
            frame_base: attr_exprloc(entry, gimli::DW_AT_frame_base),
            ranges,
        });
        offset_index.insert(entry.offset(), idx);

        if let Some(&parent) = parent_stack.last() {
            children_of.entry(parent).or_default().push(idx);
        }
        parent_stack.push(idx);
    }

    let data_types = build_data_types(&raw_dies, &children_of, strings);
    let type_ndx: HashMap<UnitOffset, TypeNdx> = raw_dies
        .iter()
        .enumerate()
        .filter(|(_, die)| TYPE_TAGS.contains(&die.tag))
        .enumerate()
        .map(|(slot, (_, die))| (die.offset, TypeNdx(slot)))
        .collect();

    let (functions_raw, variables) = build_functions(&raw_dies, &children_of, &type_ndx, strings);
    let (files, mut sources) = build_sources(dwarf, unit)?;
    sources.sort_by_key(|s| u64::from(s.breakpoint_addr));

    let mut functions = functions_raw;
    for func in &mut functions {
        func.statements = sources
            .iter()
            .enumerate()
            .filter(|(_, s)| s.breakpoint_addr.in_ranges(&func.addr_ranges))
            .map(|(pos, _)| pos)
            .collect();
        if let Some(&first) = func.statements.first() {
            let stmt = &sources[first];
            func.source_loc = Some(Place {
                file: files.get(stmt.file_index).cloned().unwrap_or_default(),
                address: stmt.breakpoint_addr,
                line_number: stmt.source_line,
                column_number: 0,
                is_stmt: stmt.is_stmt,
                pos_in_unit: first,
            });
        }
    }

    let mut address_ranges: Vec<Range> = functions.iter().flat_map(|f| f.addr_ranges.clone()).collect();
    address_ranges.sort_by_key(|r| r.begin);

    Ok(CompileUnit::new(
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
    ))
}

/// Pass 1+2 combined: allocate a slot per type DIE (in DFS order) then fill
/// in each slot's `kind`. All slots exist before any are filled, so a
/// member naming a struct declared later in the unit still resolves.
fn build_data_types(
    raw_dies: &[RawDie],
    children_of: &HashMap<usize, Vec<usize>>,
    strings: &mut StringCache,
) -> Vec<DataType> {
    let type_ndx: HashMap<UnitOffset, TypeNdx> = raw_dies
        .iter()
        .enumerate()
        .filter(|(_, die)| TYPE_TAGS.contains(&die.tag))
        .enumerate()
        .map(|(slot, (_, die))| (die.offset, TypeNdx(slot)))
        .collect();
    let resolve = |off: Option<UnitOffset>| off.and_then(|o| type_ndx.get(&o).copied());

    let mut data_types: Vec<DataType> = raw_dies
        .iter()
        .filter(|die| TYPE_TAGS.contains(&die.tag))
        .map(|die| DataType {
            name_hash: die.name.as_deref().map(|n| strings.intern(n)),
            size_bytes: die.byte_size,
            kind: DataTypeKind::Unknown,
        })
        .collect();

    for (idx, die) in raw_dies.iter().enumerate() {
        let Some(&ndx) = type_ndx.get(&die.offset) else { continue };
        data_types[ndx.0].kind = build_type_kind(die, idx, raw_dies, children_of, &resolve, strings);
    }

    data_types
}

fn build_type_kind(
    die: &RawDie,
    idx: usize,
    raw_dies: &[RawDie],
    children_of: &HashMap<usize, Vec<usize>>,
    resolve: &impl Fn(Option<UnitOffset>) -> Option<TypeNdx>,
    strings: &mut StringCache,
) -> DataTypeKind {
    use gimli::constants::*;

    if die.tag == gimli::DW_TAG_base_type {
        let encoding = match die.encoding {
            Some(v) if v as u16 == DW_ATE_boolean_VALUE => PrimitiveEncoding::Bool,
            Some(v) if v as u16 == DW_ATE_float_VALUE => PrimitiveEncoding::Float,
            Some(v) if v as u16 == DW_ATE_signed_VALUE || v as u16 == DW_ATE_signed_char_VALUE => {
                PrimitiveEncoding::Signed
            }
            Some(v) if v as u16 == DW_ATE_UTF_VALUE => PrimitiveEncoding::String,
            Some(v) if v as u16 == DW_ATE_complex_float_VALUE => PrimitiveEncoding::Complex,
            _ => PrimitiveEncoding::Unsigned,
        };
        return DataTypeKind::Primitive { encoding };
    }
    if die.tag == gimli::DW_TAG_pointer_type {
        return DataTypeKind::Pointer { pointee: resolve(die.type_ref) };
    }
    if die.tag == gimli::DW_TAG_const_type || die.tag == gimli::DW_TAG_volatile_type {
        return DataTypeKind::Const { of: resolve(die.type_ref) };
    }
    if die.tag == gimli::DW_TAG_typedef {
        return DataTypeKind::Typedef { of: resolve(die.type_ref) };
    }
    if die.tag == gimli::DW_TAG_subroutine_type {
        return DataTypeKind::Function;
    }
    if die.tag == gimli::DW_TAG_array_type {
        let len = children_of.get(&idx).and_then(|children| {
            children.iter().find_map(|&c| {
                let child = &raw_dies[c];
                if child.tag != gimli::DW_TAG_subrange_type {
                    return None;
                }
                child.count.or_else(|| child.upper_bound.map(|u| (u + 1) as u64))
            })
        });
        return DataTypeKind::Array { element_type: resolve(die.type_ref), len };
    }
    if die.tag == gimli::DW_TAG_structure_type {
        let members = children_of
            .get(&idx)
            .map(|children| {
                children
                    .iter()
                    .filter(|&&c| raw_dies[c].tag == gimli::DW_TAG_member)
                    .map(|&c| member_from_raw(&raw_dies[c], resolve, strings))
                    .collect()
            })
            .unwrap_or_default();
        return DataTypeKind::Struct { members };
    }
    if die.tag == gimli::DW_TAG_union_type {
        let members = children_of
            .get(&idx)
            .map(|children| {
                children
                    .iter()
                    .filter(|&&c| raw_dies[c].tag == gimli::DW_TAG_member)
                    .map(|&c| member_from_raw(&raw_dies[c], resolve, strings))
                    .collect()
            })
            .unwrap_or_default();
        return DataTypeKind::Union { members };
    }
    if die.tag == gimli::DW_TAG_enumeration_type {
        let values = children_of
            .get(&idx)
            .map(|children| {
                children
                    .iter()
                    .filter(|&&c| raw_dies[c].tag == gimli::DW_TAG_enumerator)
                    .filter_map(|&c| {
                        let child = &raw_dies[c];
                        Some(Enumerator {
                            name_hash: strings.intern(child.name.as_deref()?),
                            const_value: child.const_value.unwrap_or(0),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        return DataTypeKind::Enum { underlying: resolve(die.type_ref), values };
    }
    DataTypeKind::Unknown
}

fn member_from_raw(
    die: &RawDie,
    resolve: &impl Fn(Option<UnitOffset>) -> Option<TypeNdx>,
    strings: &mut StringCache,
) -> Member {
    Member {
        name_hash: die.name.as_deref().map(|n| strings.intern(n)),
        type_ref: resolve(die.type_ref),
        offset: die.data_member_location.unwrap_or(0),
    }
}

/// Collects the address ranges of every `DW_TAG_inlined_subroutine`
/// anywhere under `root`, recursing through nested inline calls, matching
/// the teacher's `DieRef::inline_ranges`'s `for_each_children_recursive`.
fn collect_inline_ranges(root: usize, raw_dies: &[RawDie], children_of: &HashMap<usize, Vec<usize>>, out: &mut Vec<Range>) {
    let Some(children) = children_of.get(&root) else { return };
    for &child in children {
        if raw_dies[child].tag == gimli::DW_TAG_inlined_subroutine {
            out.extend(raw_dies[child].ranges.iter().cloned());
        }
        collect_inline_ranges(child, raw_dies, children_of, out);
    }
}

fn build_functions(
    raw_dies: &[RawDie],
    children_of: &HashMap<usize, Vec<usize>>,
    type_ndx: &HashMap<UnitOffset, TypeNdx>,
    strings: &mut StringCache,
) -> (Vec<Function>, Vec<Variable>) {
    let resolve = |off: Option<UnitOffset>| off.and_then(|o| type_ndx.get(&o).copied());
    let mut variables: Vec<Variable> = Vec::new();
    let mut functions: Vec<Function> = Vec::new();

    for (idx, die) in raw_dies.iter().enumerate() {
        if die.tag != gimli::DW_TAG_subprogram {
            continue;
        }

        let var_indices: Vec<VariableNdx> = children_of
            .get(&idx)
            .map(|children| {
                children
                    .iter()
                    .filter(|&&c| {
                        raw_dies[c].tag == gimli::DW_TAG_variable
                            || raw_dies[c].tag == gimli::DW_TAG_formal_parameter
                    })
                    .map(|&c| {
                        let child = &raw_dies[c];
                        let ndx = VariableNdx(variables.len());
                        variables.push(Variable {
                            name_hash: child.name.as_deref().map(|n| strings.intern(n)),
                            type_ref: resolve(child.type_ref),
                            location: child.location.clone(),
                        });
                        ndx
                    })
                    .collect()
            })
            .unwrap_or_default();

        let mut inline_ranges = Vec::new();
        collect_inline_ranges(idx, raw_dies, children_of, &mut inline_ranges);

        functions.push(Function {
            name_hash: die.name.as_deref().map(|n| strings.intern(n)),
            source_loc: None,
            statements: Vec::new(),
            addr_ranges: die.ranges.clone(),
            inline_ranges,
            variable_indices: var_indices,
            platform_data: PlatformData { frame_base_expr: die.frame_base.clone() },
        });
    }

    (functions, variables)
}

fn build_sources(dwarf: &Dwarf<R>, unit: &Unit<R>) -> Result<(Vec<PathBuf>, Vec<SourceStatement>), Error> {
    let Some(program) = unit.line_program.clone() else {
        return Ok((Vec::new(), Vec::new()));
    };

    let header = program.header().clone();
    let mut files = Vec::new();
    let mut idx = 0u64;
    while let Some(file) = header.file(idx) {
        let mut path = PathBuf::new();
        if let Some(dir) = file.directory(&header) {
            if let Some(dir) = attr_string(dwarf, unit, dir) {
                path.push(dir);
            }
        }
        if let Some(name) = attr_string(dwarf, unit, file.path_name()) {
            path.push(name);
        }
        files.push(path);
        idx += 1;
    }

    let mut sources = Vec::new();
    let mut rows = program.rows();
    while let Some((_, row)) = rows.next_row()? {
        if row.end_sequence() {
            continue;
        }
        sources.push(SourceStatement {
            breakpoint_addr: GlobalAddress::from(row.address()),
            source_line: row.line().map(|l| l.get()).unwrap_or(0),
            file_index: row.file_index() as usize,
            is_stmt: row.is_stmt(),
            pos: sources.len(),
        });
    }

    Ok((files, sources))
}
