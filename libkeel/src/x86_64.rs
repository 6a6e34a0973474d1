//! x86-64 back-end: the capability surface the scanner consumes, for the
//! most common target. Branches reach everywhere on x86-64, so there is no
//! trampoline support here.

use crate::arch::Arch;
use crate::expr::RelExpr;
use crate::section::InputSection;
use crate::symbol::Symbol;
use crate::target::DynRelocType;
use crate::target::TargetHooks;
use object::elf;
use std::borrow::Cow;

pub struct X86_64;

impl TargetHooks for X86_64 {
    fn arch(&self) -> Arch {
        Arch::X86_64
    }

    fn rel_expr(
        &self,
        r_type: u32,
        _sym: &Symbol,
        _section: &InputSection,
        _offset: u64,
    ) -> RelExpr {
        match r_type {
            elf::R_X86_64_8
            | elf::R_X86_64_16
            | elf::R_X86_64_32
            | elf::R_X86_64_32S
            | elf::R_X86_64_64 => RelExpr::Absolute,
            elf::R_X86_64_PC8 | elf::R_X86_64_PC16 | elf::R_X86_64_PC32 | elf::R_X86_64_PC64 => {
                RelExpr::Relative
            }
            elf::R_X86_64_PLT32 => RelExpr::PltPc,
            elf::R_X86_64_GOTPCREL
            | elf::R_X86_64_GOTPCRELX
            | elf::R_X86_64_REX_GOTPCRELX
            | elf::R_X86_64_GOTTPOFF => RelExpr::GotPc,
            // x86-64 measures GOT slots from the end of the combined GOT
            // area, which is the `.got.plt` base.
            elf::R_X86_64_GOT32 | elf::R_X86_64_GOT64 => RelExpr::GotPlt,
            elf::R_X86_64_GOTOFF64 => RelExpr::GotPltRelGotBase,
            elf::R_X86_64_GOTPC32 | elf::R_X86_64_GOTPC64 => RelExpr::GotPltOnlyPc,
            elf::R_X86_64_DTPOFF32 | elf::R_X86_64_DTPOFF64 => RelExpr::DtpRel,
            elf::R_X86_64_TPOFF32 => RelExpr::TpRel,
            elf::R_X86_64_TLSGD => RelExpr::TlsGdGot,
            elf::R_X86_64_TLSLD => RelExpr::TlsLdGot,
            elf::R_X86_64_GOTPC32_TLSDESC => RelExpr::TlsDescPc,
            elf::R_X86_64_TLSDESC_CALL => RelExpr::TlsDescCall,
            elf::R_X86_64_SIZE32 | elf::R_X86_64_SIZE64 => RelExpr::Size,
            _ => RelExpr::None,
        }
    }

    fn rel_type_to_string(&self, r_type: u32) -> Cow<'static, str> {
        let known = match r_type {
            elf::R_X86_64_64 => "R_X86_64_64",
            elf::R_X86_64_32 => "R_X86_64_32",
            elf::R_X86_64_32S => "R_X86_64_32S",
            elf::R_X86_64_PC32 => "R_X86_64_PC32",
            elf::R_X86_64_PLT32 => "R_X86_64_PLT32",
            elf::R_X86_64_GOTPCREL => "R_X86_64_GOTPCREL",
            elf::R_X86_64_GOTPCRELX => "R_X86_64_GOTPCRELX",
            elf::R_X86_64_REX_GOTPCRELX => "R_X86_64_REX_GOTPCRELX",
            elf::R_X86_64_GOTTPOFF => "R_X86_64_GOTTPOFF",
            elf::R_X86_64_TPOFF32 => "R_X86_64_TPOFF32",
            elf::R_X86_64_TLSGD => "R_X86_64_TLSGD",
            elf::R_X86_64_TLSLD => "R_X86_64_TLSLD",
            elf::R_X86_64_DTPOFF32 => "R_X86_64_DTPOFF32",
            _ => return Cow::Owned(format!("relocation type {r_type} (x86-64)")),
        };
        Cow::Borrowed(known)
    }

    fn implicit_addend(&self, data: &[u8], offset: u64, r_type: u32) -> i64 {
        let offset = offset as usize;
        let read32 = |data: &[u8]| {
            data.get(offset..offset + 4)
                .map_or(0, |b| i64::from(i32::from_le_bytes(b.try_into().unwrap())))
        };
        let read64 = |data: &[u8]| {
            data.get(offset..offset + 8)
                .map_or(0, |b| i64::from_le_bytes(b.try_into().unwrap()))
        };
        match r_type {
            elf::R_X86_64_8 => data.get(offset).map_or(0, |&b| i64::from(b as i8)),
            elf::R_X86_64_16 => data
                .get(offset..offset + 2)
                .map_or(0, |b| i64::from(i16::from_le_bytes(b.try_into().unwrap()))),
            elf::R_X86_64_64 | elf::R_X86_64_PC64 | elf::R_X86_64_SIZE64 => read64(data),
            _ => read32(data),
        }
    }

    fn tls_gd_relax_skip(&self, _r_type: u32) -> usize {
        // The relaxed GD/LD forms overwrite the paired call to the TLS
        // runtime, so its relocation is consumed along with this one.
        2
    }

    fn adjust_got_pc_expr(&self, r_type: u32, addend: i64, _data: &[u8], _offset: u64) -> RelExpr {
        // Only the `mov`/`test`-relaxable forms with the standard -4 addend
        // can drop the GOT load.
        if matches!(
            r_type,
            elf::R_X86_64_GOTPCRELX | elf::R_X86_64_REX_GOTPCRELX
        ) && addend == -4
        {
            RelExpr::RelaxGotPc
        } else {
            RelExpr::GotPc
        }
    }

    fn dyn_rel(&self, r_type: u32) -> Option<u32> {
        (r_type == elf::R_X86_64_64).then_some(r_type)
    }

    fn dyn_reloc_type(&self, kind: DynRelocType) -> u32 {
        match kind {
            DynRelocType::Copy => elf::R_X86_64_COPY,
            DynRelocType::GlobalData => elf::R_X86_64_GLOB_DAT,
            DynRelocType::JumpSlot => elf::R_X86_64_JUMP_SLOT,
            DynRelocType::IRelative => elf::R_X86_64_IRELATIVE,
            DynRelocType::Relative => elf::R_X86_64_RELATIVE,
            DynRelocType::Symbolic => elf::R_X86_64_64,
            DynRelocType::TlsDesc => elf::R_X86_64_TLSDESC,
            DynRelocType::TlsGot => elf::R_X86_64_TPOFF64,
            DynRelocType::TlsModuleIndex => elf::R_X86_64_DTPMOD64,
            DynRelocType::TlsOffset => elf::R_X86_64_DTPOFF64,
        }
    }
}
