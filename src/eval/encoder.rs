//! Language-specific rendering capabilities (§4.5 step 2): C and the Zig
//! toolchain are supported; anything else is rejected with
//! `Error::LanguageUnsupported` before a `Renderer` is ever constructed.

use crate::error::Error;
use crate::process;
use crate::target::types::{DataType, DataTypeKind, PrimitiveEncoding};
use crate::target::unit::TypeNdx;
use crate::target::{CompileUnit, StringCache};
use nix::unistd::Pid;

/// Where a slice's pointer and length live within its backing struct, and
/// what type its elements are, per `LanguageEncoder::render_slice`.
pub struct SliceLayout {
    pub ptr_offset: u64,
    pub len_offset: u64,
    pub element_type: Option<TypeNdx>,
}

/// The capability set a `Renderer` needs from a language to special-case
/// strings, slices and opaque pointers instead of rendering them as plain
/// struct/pointer fields.
pub trait LanguageEncoder {
    fn is_string(&self, pointee: &DataType) -> bool;
    fn render_string(&self, pid: Pid, addr: u64) -> Result<String, Error>;
    fn is_slice(&self, ty: &DataType, strings: &StringCache) -> bool;
    fn render_slice(&self, ty: &DataType, strings: &StringCache) -> Option<SliceLayout>;
    fn is_opaque_pointer(&self, pointee: &DataType) -> bool;
}

fn is_char_primitive(ty: &DataType) -> bool {
    matches!(ty.kind, DataTypeKind::Primitive { encoding: PrimitiveEncoding::String }) || (ty.size_bytes == Some(1) && matches!(ty.kind, DataTypeKind::Primitive { encoding: PrimitiveEncoding::Signed | PrimitiveEncoding::Unsigned }))
}

/// Reads a NUL-terminated byte string from the subordinate, bounded so a
/// corrupt/unterminated string can't turn one read into an unbounded one.
fn read_c_string(pid: Pid, addr: u64) -> Result<String, Error> {
    const MAX_LEN: usize = 4096;
    const CHUNK: usize = 64;

    let mut out = Vec::new();
    let mut cursor = addr as usize;
    while out.len() < MAX_LEN {
        let chunk = process::read_memory(pid, cursor, CHUNK)?;
        match chunk.iter().position(|&b| b == 0) {
            Some(nul) => {
                out.extend_from_slice(&chunk[..nul]);
                break;
            }
            None => {
                out.extend_from_slice(&chunk);
                cursor += CHUNK;
            }
        }
    }
    Ok(String::from_utf8_lossy(&out).into_owned())
}

/// C: a `char*` (signed or unsigned 1-byte pointee) is a string; no slice
/// type exists; no opaque-pointer convention beyond `void*` (which already
/// renders as address-only since it has no pointee type).
pub struct CEncoder;

impl LanguageEncoder for CEncoder {
    fn is_string(&self, pointee: &DataType) -> bool {
        is_char_primitive(pointee)
    }

    fn render_string(&self, pid: Pid, addr: u64) -> Result<String, Error> {
        read_c_string(pid, addr)
    }

    fn is_slice(&self, _ty: &DataType, _strings: &StringCache) -> bool {
        false
    }

    fn render_slice(&self, _ty: &DataType, _strings: &StringCache) -> Option<SliceLayout> {
        None
    }

    fn is_opaque_pointer(&self, _pointee: &DataType) -> bool {
        false
    }
}

/// The Zig toolchain: a `{ptr, len}` struct is recognized as a slice and
/// rendered as one (`Renderer::render_slice`), showing its length and a
/// representative first element rather than the raw two-field struct.
pub struct ZigEncoder;

impl LanguageEncoder for ZigEncoder {
    fn is_string(&self, pointee: &DataType) -> bool {
        is_char_primitive(pointee)
    }

    fn render_string(&self, pid: Pid, addr: u64) -> Result<String, Error> {
        read_c_string(pid, addr)
    }

    fn is_slice(&self, ty: &DataType, strings: &StringCache) -> bool {
        let DataTypeKind::Struct { members } = &ty.kind else { return false };
        let named = |wanted: &str| members.iter().any(|m| m.name_hash.and_then(|h| strings.get(h)) == Some(wanted));
        members.len() == 2 && named("ptr") && named("len")
    }

    fn render_slice(&self, ty: &DataType, strings: &StringCache) -> Option<SliceLayout> {
        let DataTypeKind::Struct { members } = &ty.kind else { return None };
        let named = |wanted: &str| members.iter().find(|m| m.name_hash.and_then(|h| strings.get(h)) == Some(wanted));
        let ptr_member = named("ptr")?;
        let len_member = named("len")?;
        Some(SliceLayout { ptr_offset: ptr_member.offset, len_offset: len_member.offset, element_type: ptr_member.type_ref })
    }

    fn is_opaque_pointer(&self, pointee: &DataType) -> bool {
        matches!(pointee.kind, DataTypeKind::Unknown) && pointee.size_bytes.is_none()
    }
}

/// Selects the encoder for a compile unit's language, per §4.5's "C or the
/// Zig toolchain currently; others are rejected". DWARF has no stable
/// `DW_LANG_Zig` constant across producers, so the Zig toolchain is
/// recognized via [`CompileUnit::is_zig_toolchain`], the same signal the
/// breakpoint manager's line-address policy uses.
pub fn encoder_for(unit: &CompileUnit) -> Result<Box<dyn LanguageEncoder>, Error> {
    if unit.is_zig_toolchain() {
        return Ok(Box::new(ZigEncoder));
    }
    match unit.language {
        gimli::DW_LANG_C | gimli::DW_LANG_C89 | gimli::DW_LANG_C99 | gimli::DW_LANG_C11 => Ok(Box::new(CEncoder)),
        other => Err(Error::LanguageUnsupported(other)),
    }
}
