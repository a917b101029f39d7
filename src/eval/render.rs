//! Recursive value rendering (§4.5 step 3): walks a `DataType` tree against
//! raw subordinate memory bytes, producing a flat arena of [`Field`]s where
//! children reference their parent by index.

use crate::error::Error;
use crate::eval::encoder::LanguageEncoder;
use crate::process;
use crate::target::types::{DataTypeKind, PrimitiveEncoding};
use crate::target::unit::TypeNdx;
use crate::target::{CompileUnit, StringCache};
use nix::unistd::Pid;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub enum FieldKind {
    Primitive { encoding: PrimitiveEncoding, bytes: Vec<u8> },
    Pointer { address: u64, points_to: Option<usize> },
    OpaquePointer { address: u64 },
    CString { address: u64, text: String },
    Slice { ptr: u64, len: u64, element: Option<usize> },
    Array { items: Vec<usize> },
    Struct { members: Vec<(String, usize)> },
    Union { members: Vec<(String, usize)> },
    Enum { value: i64, name: Option<String> },
    Unknown,
}

#[derive(Debug, Clone)]
pub struct Field {
    pub name: Option<String>,
    pub type_name: Option<String>,
    pub kind: FieldKind,
}

/// `{ expression_hash, fields[] }` per §4.5's output contract; `fields[0]` is
/// always the expression's top-level rendered value.
#[derive(Debug, Clone)]
pub struct ExpressionResult {
    pub expression_hash: u64,
    pub fields: Vec<Field>,
}

/// Recursively renders one expression's value tree against a single live
/// subordinate. A fresh `Renderer` is used per expression so the
/// pointer-cycle map (§4.5 step 4) never leaks between expressions.
pub struct Renderer<'a> {
    unit: &'a CompileUnit,
    strings: &'a StringCache,
    encoder: &'a dyn LanguageEncoder,
    pid: Pid,
    visited: HashMap<u64, usize>,
    fields: Vec<Field>,
}

impl<'a> Renderer<'a> {
    pub fn new(unit: &'a CompileUnit, strings: &'a StringCache, encoder: &'a dyn LanguageEncoder, pid: Pid) -> Self {
        Self { unit, strings, encoder, pid, visited: HashMap::new(), fields: Vec::new() }
    }

    /// Renders `type_ref`'s value from `buf`, returning the index of the
    /// produced (possibly container) field, and consuming `self` into the
    /// finished arena.
    pub fn finish(mut self, type_ref: Option<TypeNdx>, buf: &[u8], expression_hash: u64) -> Result<ExpressionResult, Error> {
        self.render(type_ref, buf)?;
        Ok(ExpressionResult { expression_hash, fields: self.fields })
    }

    fn push(&mut self, field: Field) -> usize {
        self.fields.push(field);
        self.fields.len() - 1
    }

    fn type_name(&self, type_ref: Option<TypeNdx>) -> Option<String> {
        let ty = self.unit.data_type(type_ref?);
        ty.name_hash.and_then(|h| self.strings.get(h)).map(str::to_string)
    }

    fn render(&mut self, type_ref: Option<TypeNdx>, buf: &[u8]) -> Result<usize, Error> {
        let Some(ndx) = type_ref else {
            return Ok(self.push(Field { name: None, type_name: None, kind: FieldKind::Unknown }));
        };
        let type_name = self.type_name(type_ref);
        let ty = self.unit.data_type(ndx);

        match &ty.kind {
            DataTypeKind::Unknown | DataTypeKind::Function => Ok(self.push(Field { name: None, type_name, kind: FieldKind::Unknown })),

            DataTypeKind::Typedef { of } | DataTypeKind::Const { of } => self.render(*of, buf),

            DataTypeKind::Primitive { encoding } => {
                Ok(self.push(Field { name: None, type_name, kind: FieldKind::Primitive { encoding: *encoding, bytes: buf.to_vec() } }))
            }

            DataTypeKind::Pointer { pointee } => self.render_pointer(type_name, *pointee, buf),

            DataTypeKind::Array { element_type, len } => {
                let Some(len) = len else {
                    return Ok(self.push(Field { name: None, type_name, kind: FieldKind::Unknown }));
                };
                let elem_size = element_type.and_then(|e| self.unit.data_type(e).size_bytes).unwrap_or(0) as usize;
                let mut items = Vec::with_capacity(*len as usize);
                for i in 0..*len as usize {
                    let start = i * elem_size;
                    let slice = buf.get(start..start + elem_size).unwrap_or(&[]);
                    items.push(self.render(*element_type, slice)?);
                }
                Ok(self.push(Field { name: None, type_name, kind: FieldKind::Array { items } }))
            }

            DataTypeKind::Struct { members } => {
                if self.encoder.is_slice(ty, self.strings) {
                    return self.render_slice(type_name, ty, buf);
                }
                let rendered = self.render_members(members, buf)?;
                Ok(self.push(Field { name: None, type_name, kind: FieldKind::Struct { members: rendered } }))
            }

            DataTypeKind::Union { members } => {
                let rendered = self.render_members(members, buf)?;
                Ok(self.push(Field { name: None, type_name, kind: FieldKind::Union { members: rendered } }))
            }

            DataTypeKind::Enum { values, .. } => {
                let size = ty.size_bytes.unwrap_or(4) as usize;
                let value = sign_extend(buf, size);
                let name = values.iter().find(|e| e.const_value == value).and_then(|e| self.strings.get(e.name_hash)).map(str::to_string);
                Ok(self.push(Field { name: None, type_name, kind: FieldKind::Enum { value, name } }))
            }
        }
    }

    fn render_members(&mut self, members: &[crate::target::types::Member], buf: &[u8]) -> Result<Vec<(String, usize)>, Error> {
        let mut out = Vec::with_capacity(members.len());
        for member in members {
            let size = member.type_ref.and_then(|t| self.unit.data_type(t).size_bytes).unwrap_or(0) as usize;
            let start = member.offset as usize;
            let slice = buf.get(start..start + size).unwrap_or(&[]);
            let idx = self.render(member.type_ref, slice)?;
            let name = member.name_hash.and_then(|h| self.strings.get(h)).unwrap_or("").to_string();
            out.push((name, idx));
        }
        Ok(out)
    }

    /// Renders a `{ptr, len}` slice (per `LanguageEncoder::render_slice`) as
    /// a single `Slice` field instead of falling through to generic
    /// struct rendering. Only a representative first element is rendered,
    /// not the full run — the result tree stays bounded regardless of
    /// `len`.
    fn render_slice(&mut self, type_name: Option<String>, ty: &crate::target::types::DataType, buf: &[u8]) -> Result<usize, Error> {
        let DataTypeKind::Struct { members } = &ty.kind else { unreachable!("caller already matched Struct") };
        let Some(layout) = self.encoder.render_slice(ty, self.strings) else {
            let rendered = self.render_members(members, buf)?;
            return Ok(self.push(Field { name: None, type_name, kind: FieldKind::Struct { members: rendered } }));
        };

        let read_u64 = |offset: u64| {
            let start = offset as usize;
            buf.get(start..start + 8).and_then(|b| b.try_into().ok()).map(u64::from_ne_bytes).unwrap_or(0)
        };
        let ptr = read_u64(layout.ptr_offset);
        let len = read_u64(layout.len_offset);

        let element_type = layout.element_type.map(|p| self.unit.data_type(p)).and_then(|ty| match &ty.kind {
            DataTypeKind::Pointer { pointee } => *pointee,
            _ => None,
        });

        let element = if ptr != 0 && len > 0 {
            let elem_size = element_type.and_then(|e| self.unit.data_type(e).size_bytes).unwrap_or(0) as usize;
            if elem_size > 0 {
                let mem = process::read_memory(self.pid, ptr as usize, elem_size)?;
                Some(self.render(element_type, &mem)?)
            } else {
                None
            }
        } else {
            None
        };

        Ok(self.push(Field { name: None, type_name, kind: FieldKind::Slice { ptr, len, element } }))
    }

    fn render_pointer(&mut self, type_name: Option<String>, pointee: Option<TypeNdx>, buf: &[u8]) -> Result<usize, Error> {
        let address = if buf.len() >= 8 { u64::from_ne_bytes(buf[..8].try_into().expect("8 bytes")) } else { 0 };

        if address == 0 {
            return Ok(self.push(Field { name: None, type_name, kind: FieldKind::Pointer { address: 0, points_to: None } }));
        }
        if let Some(&idx) = self.visited.get(&address) {
            return Ok(idx);
        }

        let pointee_ty = pointee.map(|p| self.unit.data_type(p));
        if let Some(ty) = pointee_ty {
            if self.encoder.is_opaque_pointer(ty) {
                return Ok(self.push(Field { name: None, type_name, kind: FieldKind::OpaquePointer { address } }));
            }
            if self.encoder.is_string(ty) {
                let text = self.encoder.render_string(self.pid, address)?;
                return Ok(self.push(Field { name: None, type_name, kind: FieldKind::CString { address, text } }));
            }
        }

        // Reserve the slot before recursing so a cycle back to this address
        // finds a valid index rather than re-entering `render_pointer`.
        let reserved = self.push(Field { name: None, type_name: type_name.clone(), kind: FieldKind::Pointer { address, points_to: None } });
        self.visited.insert(address, reserved);

        let points_to = match pointee {
            Some(p) => {
                let size = self.unit.data_type(p).size_bytes.unwrap_or(8) as usize;
                let mem = process::read_memory(self.pid, address as usize, size)?;
                Some(self.render(Some(p), &mem)?)
            }
            None => None,
        };
        self.fields[reserved].kind = FieldKind::Pointer { address, points_to };
        Ok(reserved)
    }
}

/// Sign-extends the first `size` bytes of `buf` (little-endian) to an `i64`,
/// for reading a DWARF enum's underlying constant.
fn sign_extend(buf: &[u8], size: usize) -> i64 {
    let size = size.min(8).max(1).min(buf.len().max(1));
    let mut bytes = [0u8; 8];
    bytes[..size.min(buf.len())].copy_from_slice(&buf[..size.min(buf.len())]);
    let shift = (8 - size) * 8;
    ((i64::from_le_bytes(bytes)) << shift) >> shift
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_extend_negative_i32() {
        let bytes = (-1i32).to_le_bytes();
        assert_eq!(sign_extend(&bytes, 4), -1);
    }

    #[test]
    fn sign_extend_positive_u8_sized() {
        let bytes = [5u8, 0, 0, 0, 0, 0, 0, 0];
        assert_eq!(sign_extend(&bytes[..1], 1), 5);
    }
}
