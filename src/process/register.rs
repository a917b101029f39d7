//! x86-64 register access: the live machine registers of a traced thread,
//! and the DWARF register-number mapping the unwinder and expression
//! evaluator need.

use crate::error::Error;
use nix::libc::user_regs_struct;
use nix::sys;
use nix::unistd::Pid;
use smallvec::{smallvec, SmallVec};
use strum_macros::{Display, EnumString};

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, EnumString, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Register {
    Rax,
    Rbx,
    Rcx,
    Rdx,
    Rdi,
    Rsi,
    Rbp,
    Rsp,
    R8,
    R9,
    R10,
    R11,
    R12,
    R13,
    R14,
    R15,
    Rip,
    Eflags,
    Cs,
    OrigRax,
    FsBase,
    GsBase,
    Fs,
    Gs,
    Ss,
    Ds,
    Es,
}

impl Register {
    /// This register's DWARF register number, per the x86-64 SysV ABI
    /// register numbering the unwinder and `DW_OP_breg*` expressions use.
    pub fn dwarf_register(self) -> Option<u16> {
        Some(match self {
            Register::Rax => 0,
            Register::Rdx => 1,
            Register::Rcx => 2,
            Register::Rbx => 3,
            Register::Rsi => 4,
            Register::Rdi => 5,
            Register::Rbp => 6,
            Register::Rsp => 7,
            Register::R8 => 8,
            Register::R9 => 9,
            Register::R10 => 10,
            Register::R11 => 11,
            Register::R12 => 12,
            Register::R13 => 13,
            Register::R14 => 14,
            Register::R15 => 15,
            Register::Rip => return None,
            Register::Eflags => 49,
            Register::Es => 50,
            Register::Cs => 51,
            Register::Ss => 52,
            Register::Ds => 53,
            Register::Fs => 54,
            Register::Gs => 55,
            Register::FsBase => 58,
            Register::GsBase => 59,
            Register::OrigRax => return None,
        })
    }
}

impl From<gimli::Register> for Register {
    fn from(value: gimli::Register) -> Self {
        match value.0 as i32 {
            -1 => Register::Rip,
            0 => Register::Rax,
            1 => Register::Rdx,
            2 => Register::Rcx,
            3 => Register::Rbx,
            4 => Register::Rsi,
            5 => Register::Rdi,
            6 => Register::Rbp,
            7 => Register::Rsp,
            8 => Register::R8,
            9 => Register::R9,
            10 => Register::R10,
            11 => Register::R11,
            12 => Register::R12,
            13 => Register::R13,
            14 => Register::R14,
            15 => Register::R15,
            49 => Register::Eflags,
            50 => Register::Es,
            51 => Register::Cs,
            52 => Register::Ss,
            53 => Register::Ds,
            54 => Register::Fs,
            55 => Register::Gs,
            58 => Register::FsBase,
            59 => Register::GsBase,
            n => unreachable!("unknown dwarf register number {n}"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RegisterMap {
    rax: u64,
    rbx: u64,
    rcx: u64,
    rdx: u64,
    rdi: u64,
    rsi: u64,
    rbp: u64,
    rsp: u64,
    r8: u64,
    r9: u64,
    r10: u64,
    r11: u64,
    r12: u64,
    r13: u64,
    r14: u64,
    r15: u64,
    rip: u64,
    eflags: u64,
    cs: u64,
    orig_rax: u64,
    fs_base: u64,
    gs_base: u64,
    fs: u64,
    gs: u64,
    ss: u64,
    ds: u64,
    es: u64,
}

impl From<user_regs_struct> for RegisterMap {
    fn from(v: user_regs_struct) -> Self {
        Self {
            rax: v.rax,
            rbx: v.rbx,
            rcx: v.rcx,
            rdx: v.rdx,
            rdi: v.rdi,
            rsi: v.rsi,
            rbp: v.rbp,
            rsp: v.rsp,
            r8: v.r8,
            r9: v.r9,
            r10: v.r10,
            r11: v.r11,
            r12: v.r12,
            r13: v.r13,
            r14: v.r14,
            r15: v.r15,
            rip: v.rip,
            eflags: v.eflags,
            cs: v.cs,
            orig_rax: v.orig_rax,
            fs_base: v.fs_base,
            gs_base: v.gs_base,
            fs: v.fs,
            gs: v.gs,
            ss: v.ss,
            ds: v.ds,
            es: v.es,
        }
    }
}

impl From<RegisterMap> for user_regs_struct {
    fn from(m: RegisterMap) -> user_regs_struct {
        user_regs_struct {
            rax: m.rax,
            rbx: m.rbx,
            rcx: m.rcx,
            rdx: m.rdx,
            rdi: m.rdi,
            rsi: m.rsi,
            rbp: m.rbp,
            rsp: m.rsp,
            r8: m.r8,
            r9: m.r9,
            r10: m.r10,
            r11: m.r11,
            r12: m.r12,
            r13: m.r13,
            r14: m.r14,
            r15: m.r15,
            rip: m.rip,
            eflags: m.eflags,
            cs: m.cs,
            orig_rax: m.orig_rax,
            fs_base: m.fs_base,
            gs_base: m.gs_base,
            fs: m.fs,
            gs: m.gs,
            ss: m.ss,
            ds: m.ds,
            es: m.es,
        }
    }
}

impl RegisterMap {
    pub fn current(pid: Pid) -> Result<Self, Error> {
        let regs = sys::ptrace::getregs(pid).map_err(Error::Ptrace)?;
        Ok(regs.into())
    }

    pub fn value(&self, register: impl Into<Register>) -> u64 {
        match register.into() {
            Register::Rax => self.rax,
            Register::Rbx => self.rbx,
            Register::Rcx => self.rcx,
            Register::Rdx => self.rdx,
            Register::Rdi => self.rdi,
            Register::Rsi => self.rsi,
            Register::Rbp => self.rbp,
            Register::Rsp => self.rsp,
            Register::R8 => self.r8,
            Register::R9 => self.r9,
            Register::R10 => self.r10,
            Register::R11 => self.r11,
            Register::R12 => self.r12,
            Register::R13 => self.r13,
            Register::R14 => self.r14,
            Register::R15 => self.r15,
            Register::Rip => self.rip,
            Register::Eflags => self.eflags,
            Register::Cs => self.cs,
            Register::OrigRax => self.orig_rax,
            Register::FsBase => self.fs_base,
            Register::GsBase => self.gs_base,
            Register::Fs => self.fs,
            Register::Gs => self.gs,
            Register::Ss => self.ss,
            Register::Ds => self.ds,
            Register::Es => self.es,
        }
    }

    pub fn update(&mut self, register: impl Into<Register>, value: u64) {
        match register.into() {
            Register::Rax => self.rax = value,
            Register::Rbx => self.rbx = value,
            Register::Rcx => self.rcx = value,
            Register::Rdx => self.rdx = value,
            Register::Rdi => self.rdi = value,
            Register::Rsi => self.rsi = value,
            Register::Rbp => self.rbp = value,
            Register::Rsp => self.rsp = value,
            Register::R8 => self.r8 = value,
            Register::R9 => self.r9 = value,
            Register::R10 => self.r10 = value,
            Register::R11 => self.r11 = value,
            Register::R12 => self.r12 = value,
            Register::R13 => self.r13 = value,
            Register::R14 => self.r14 = value,
            Register::R15 => self.r15 = value,
            Register::Rip => self.rip = value,
            Register::Eflags => self.eflags = value,
            Register::Cs => self.cs = value,
            Register::OrigRax => self.orig_rax = value,
            Register::FsBase => self.fs_base = value,
            Register::GsBase => self.gs_base = value,
            Register::Fs => self.fs = value,
            Register::Gs => self.gs = value,
            Register::Ss => self.ss = value,
            Register::Ds => self.ds = value,
            Register::Es => self.es = value,
        }
    }

    pub fn persist(self, pid: Pid) -> Result<(), Error> {
        sys::ptrace::setregs(pid, self.into()).map_err(Error::Ptrace)
    }
}

/// `RegisterMap` reindexed by DWARF register number, for evaluating
/// `DW_OP_breg*`/CFI register rules without a match on [`Register`] at
/// every step.
#[derive(Debug, Clone)]
pub struct DwarfRegisterMap(SmallVec<[Option<u64>; 0x80]>);

impl DwarfRegisterMap {
    /// An empty map with no register values populated; every `value()` call
    /// fails until `update`d. Used where a map is needed structurally (e.g.
    /// probing a location expression that turns out not to need registers)
    /// before a live one is available.
    pub fn empty() -> Self {
        DwarfRegisterMap(smallvec![None; 0x80])
    }

    pub fn value(&self, register: gimli::Register) -> Result<u64, Error> {
        self.0
            .get(register.0 as usize)
            .copied()
            .flatten()
            .ok_or(Error::RegisterNotFound(register))
    }

    pub fn update(&mut self, register: gimli::Register, value: u64) {
        let idx = register.0 as usize;
        if idx >= self.0.len() {
            self.0.resize(idx + 1, None);
        }
        self.0[idx] = Some(value);
    }

    /// Overwrites this map's values with `other`'s, used after restoring
    /// the register set at an unwound frame.
    pub fn update_from(&mut self, other: &DwarfRegisterMap) {
        self.0 = other.0.clone();
    }
}

impl From<RegisterMap> for DwarfRegisterMap {
    fn from(map: RegisterMap) -> Self {
        let mut dwarf_map: SmallVec<[Option<u64>; 0x80]> = smallvec![None; 0x80];
        dwarf_map[0] = Some(map.rax);
        dwarf_map[1] = Some(map.rdx);
        dwarf_map[2] = Some(map.rcx);
        dwarf_map[3] = Some(map.rbx);
        dwarf_map[4] = Some(map.rsi);
        dwarf_map[5] = Some(map.rdi);
        dwarf_map[6] = Some(map.rbp);
        dwarf_map[7] = Some(map.rsp);
        dwarf_map[8] = Some(map.r8);
        dwarf_map[9] = Some(map.r9);
        dwarf_map[10] = Some(map.r10);
        dwarf_map[11] = Some(map.r11);
        dwarf_map[12] = Some(map.r12);
        dwarf_map[13] = Some(map.r13);
        dwarf_map[14] = Some(map.r14);
        dwarf_map[15] = Some(map.r15);
        dwarf_map[49] = Some(map.eflags);
        dwarf_map[50] = Some(map.es);
        dwarf_map[51] = Some(map.cs);
        dwarf_map[52] = Some(map.ss);
        dwarf_map[53] = Some(map.ds);
        dwarf_map[54] = Some(map.fs);
        dwarf_map[55] = Some(map.gs);
        dwarf_map[58] = Some(map.fs_base);
        dwarf_map[59] = Some(map.gs_base);
        DwarfRegisterMap(dwarf_map)
    }
}
