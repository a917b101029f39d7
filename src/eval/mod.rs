//! The expression evaluator (§4.5): stack frame computation, local variable
//! discovery, and watch/local expression rendering into a language-neutral
//! value tree. Runs once per stop to build a `PauseData`.

pub mod encoder;
pub mod frame;
pub mod location;
pub mod render;

pub use encoder::{CEncoder, LanguageEncoder, ZigEncoder};
pub use frame::{FrameComputer, StackFrame};
pub use location::LocationContext;
pub use render::{ExpressionResult, Field, FieldKind, Renderer};

use crate::address::RelocatedAddress;
use crate::process::DwarfRegisterMap;
use crate::target::string_cache::hash_str;
use crate::target::{CompileUnit, Function, StringCache, VariableNdx};
use nix::unistd::Pid;
use thiserror::Error;

/// Failures specific to locating or evaluating a variable's DWARF location
/// expression — the "simple variable location lookup" the Non-goals section
/// permits, not a full `DW_OP_*` interpreter.
#[derive(Debug, Error)]
pub enum ParsingError {
    #[error("dwarf expression stack underflow")]
    StackUnderflow,
    #[error("unsupported dwarf expression opcode: {0}")]
    UnsupportedOpcode(String),
    #[error("variable has no location expression")]
    NoLocation,
    #[error(transparent)]
    Gimli(#[from] gimli::Error),
}

/// A local variable or watch expression with no match: §4.5.1's "emit a
/// single field marked unknown".
pub fn unknown_field(name: &str) -> Field {
    Field { name: Some(name.to_string()), type_name: None, kind: FieldKind::Unknown }
}

/// Labels an `ExpressionResult`'s top-level field with the name/expression
/// text it was evaluated from, if `render`'s generic tree-walk left it
/// unset (container/primitive roots don't know their own binding name;
/// only the caller does).
pub fn name_expression_result(mut result: ExpressionResult, name: &str) -> ExpressionResult {
    if let Some(field) = result.fields.get_mut(0) {
        if field.name.is_none() {
            field.name = Some(name.to_string());
        }
    }
    result
}

/// Finds a named variable declared in `function`'s scope (§4.5's
/// "locate a variable whose name equals the expression"). Variable names are
/// interned with the same hash used here, so a hash match is sufficient —
/// no string comparison against `strings` is needed.
pub fn find_named_variable<'a>(unit: &'a CompileUnit, variable_indices: &[VariableNdx], name: &str) -> Option<&'a crate::target::types::Variable> {
    let target_hash = hash_str(name);
    variable_indices.iter().map(|ndx| unit.variable(*ndx)).find(|v| v.name_hash == Some(target_hash))
}

/// Resolves and renders one watch/local expression against the top frame's
/// scope (§4.5 steps 1-3). `expression_hash` identifies the expression in
/// the resulting tree, independent of the text/name it came from.
pub fn evaluate_expression(
    unit: &CompileUnit,
    function: &Function,
    encoder: &dyn LanguageEncoder,
    strings: &StringCache,
    pid: Pid,
    frame_base: RelocatedAddress,
    registers: DwarfRegisterMap,
    name: &str,
    expression_hash: u64,
) -> Result<ExpressionResult, crate::error::Error> {
    let Some(variable) = find_named_variable(unit, &function.variable_indices, name) else {
        return Ok(ExpressionResult { expression_hash, fields: vec![unknown_field(name)] });
    };

    let Some(location_expr) = &variable.location else {
        return Ok(ExpressionResult { expression_hash, fields: vec![unknown_field(name)] });
    };

    let size = variable.type_ref.map(|t| unit.data_type(t).size_bytes.unwrap_or(8)).unwrap_or(8) as usize;
    let ctx = LocationContext { pid, encoding: unit.encoding, frame_base: Some(frame_base), registers };
    let buf = location::evaluate_to_bytes(location_expr, &ctx, size)?;

    let renderer = Renderer::new(unit, strings, encoder, pid);
    let result = renderer.finish(variable.type_ref, &buf, expression_hash)?;
    Ok(name_expression_result(result, name))
}
