//! Evaluates a DWARF location expression (`DW_AT_location`/`DW_AT_frame_base`)
//! against a live frame, per §4.5's "simple variable location lookup" — the
//! Non-goals exclude a full `DW_OP_*` interpreter, but `gimli::Evaluation`
//! already implements the stack machine; this module only supplies the
//! handful of live inputs (registers, frame base, memory) it asks for as it
//! runs.

use crate::address::RelocatedAddress;
use crate::eval::ParsingError;
use crate::process;
use gimli::{EndianSlice, Evaluation, EvaluationResult, Expression, Location, NativeEndian, Piece, Value};
use nix::unistd::Pid;

/// The small bag of live context a location expression may ask for while it
/// runs. Most expressions only need `frame_base`; pointer-typed locals or
/// register-resident values pull register/memory reads too.
pub struct LocationContext {
    pub pid: Pid,
    pub encoding: gimli::Encoding,
    pub frame_base: Option<RelocatedAddress>,
    pub registers: crate::process::DwarfRegisterMap,
}

/// Runs `expr` to completion and reads the resulting pieces into a flat byte
/// buffer sized to `byte_size`, matching the teacher's
/// `CompletedResult::into_raw_buffer`.
pub fn evaluate_to_bytes(expr_bytes: &[u8], ctx: &LocationContext, byte_size: usize) -> Result<Vec<u8>, ParsingError> {
    if expr_bytes.is_empty() {
        return Err(ParsingError::NoLocation);
    }

    let expr = Expression(EndianSlice::new(expr_bytes, NativeEndian));
    let mut eval: Evaluation<EndianSlice<NativeEndian>> = expr.evaluation(ctx.encoding);
    let mut result = eval.evaluate()?;

    loop {
        result = match result {
            EvaluationResult::Complete => break,
            EvaluationResult::RequiresRegister { register, .. } => {
                let value = ctx.registers.value(register).map_err(|_| ParsingError::UnsupportedOpcode(format!("register {register:?} unavailable")))?;
                eval.resume_with_register(Value::Generic(value))?
            }
            EvaluationResult::RequiresFrameBase => {
                let base = ctx.frame_base.ok_or_else(|| ParsingError::UnsupportedOpcode("frame base required but not available".to_string()))?;
                eval.resume_with_frame_base(base.as_u64())?
            }
            EvaluationResult::RequiresMemory { address, size, .. } => {
                let bytes = process::read_memory(ctx.pid, address as usize, size as usize).map_err(|_| ParsingError::UnsupportedOpcode(format!("failed to read {size} bytes at {address:#x}")))?;
                let value = bytes_to_u64(&bytes);
                eval.resume_with_memory(Value::Generic(value))?
            }
            other => return Err(ParsingError::UnsupportedOpcode(format!("{other:?}"))),
        };
    }

    pieces_to_bytes(eval.result(), ctx.pid, byte_size)
}

fn bytes_to_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf[..bytes.len().min(8)].copy_from_slice(&bytes[..bytes.len().min(8)]);
    u64::from_ne_bytes(buf)
}

fn pieces_to_bytes(pieces: &[Piece<EndianSlice<NativeEndian>>], pid: Pid, byte_size: usize) -> Result<Vec<u8>, ParsingError> {
    let mut out = Vec::with_capacity(byte_size);
    for piece in pieces {
        let take = piece.size_in_bits.map(|bits| bits as usize / 8).unwrap_or(byte_size.saturating_sub(out.len()));
        match piece.location {
            Location::Address { address } => {
                let bytes = process::read_memory(pid, address as usize, take).map_err(|_| ParsingError::UnsupportedOpcode(format!("failed to read piece at {address:#x}")))?;
                out.extend_from_slice(&bytes);
            }
            Location::Register { register } => {
                let value = crate::process::RegisterMap::current(pid).ok().and_then(|m| m.value(register).ok()).unwrap_or(0);
                out.extend_from_slice(&value.to_ne_bytes()[..take.min(8)]);
            }
            Location::Value { value } => out.extend_from_slice(&value_to_bytes(value)[..take.min(8)]),
            Location::Bytes { ref value, .. } => out.extend_from_slice(value.slice()),
            Location::Empty => {}
            Location::ImplicitPointer { .. } => return Err(ParsingError::UnsupportedOpcode("implicit pointer locations are unsupported".to_string())),
        }
    }
    out.resize(byte_size, 0);
    Ok(out)
}

fn value_to_bytes(value: Value) -> [u8; 8] {
    match value {
        Value::Generic(v) | Value::U64(v) => v.to_ne_bytes(),
        Value::I64(v) => v.to_ne_bytes(),
        Value::U32(v) => (v as u64).to_ne_bytes(),
        Value::I32(v) => (v as i64).to_ne_bytes(),
        Value::U16(v) => (v as u64).to_ne_bytes(),
        Value::I16(v) => (v as i64).to_ne_bytes(),
        Value::U8(v) => (v as u64).to_ne_bytes(),
        Value::I8(v) => (v as i64).to_ne_bytes(),
        Value::F32(v) => (v.to_bits() as u64).to_ne_bytes(),
        Value::F64(v) => v.to_bits().to_ne_bytes(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_expression_is_no_location() {
        let ctx = LocationContext {
            pid: Pid::from_raw(std::process::id() as i32),
            encoding: gimli::Encoding { address_size: 8, format: gimli::Format::Dwarf32, version: 5 },
            frame_base: None,
            registers: crate::process::DwarfRegisterMap::empty(),
        };
        assert!(matches!(evaluate_to_bytes(&[], &ctx, 8), Err(ParsingError::NoLocation)));
    }
}
