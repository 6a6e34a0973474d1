//! AArch64 back-end. The interesting part is branch reach: `bl`/`b` carry a
//! 26-bit word displacement, so calls further than 128 MiB need a
//! trampoline.

use crate::arch::Arch;
use crate::expr::RelExpr;
use crate::input::FileId;
use crate::section::InputSection;
use crate::symbol::Symbol;
use crate::target::DynRelocType;
use crate::target::TargetHooks;
use object::elf;
use std::borrow::Cow;

pub struct AArch64;

const BRANCH26_RANGE: u64 = 128 * 1024 * 1024;
const CONDBR19_RANGE: u64 = 1024 * 1024;
const TSTBR14_RANGE: u64 = 32 * 1024;

/// `adrp x16, dest; add x16, x16, :lo12:dest; br x16`, padded.
const THUNK_SIZE: u64 = 16;

fn branch_range(r_type: u32) -> Option<u64> {
    match r_type {
        elf::R_AARCH64_CALL26 | elf::R_AARCH64_JUMP26 => Some(BRANCH26_RANGE),
        elf::R_AARCH64_CONDBR19 => Some(CONDBR19_RANGE),
        elf::R_AARCH64_TSTBR14 => Some(TSTBR14_RANGE),
        _ => None,
    }
}

impl TargetHooks for AArch64 {
    fn arch(&self) -> Arch {
        Arch::AArch64
    }

    fn rel_expr(
        &self,
        r_type: u32,
        _sym: &Symbol,
        _section: &InputSection,
        _offset: u64,
    ) -> RelExpr {
        match r_type {
            elf::R_AARCH64_ABS64
            | elf::R_AARCH64_ABS32
            | elf::R_AARCH64_ABS16
            | elf::R_AARCH64_ADD_ABS_LO12_NC
            | elf::R_AARCH64_LDST8_ABS_LO12_NC
            | elf::R_AARCH64_LDST16_ABS_LO12_NC
            | elf::R_AARCH64_LDST32_ABS_LO12_NC
            | elf::R_AARCH64_LDST64_ABS_LO12_NC
            | elf::R_AARCH64_LDST128_ABS_LO12_NC => RelExpr::Absolute,
            elf::R_AARCH64_PREL64 | elf::R_AARCH64_PREL32 | elf::R_AARCH64_PREL16 => {
                RelExpr::Relative
            }
            elf::R_AARCH64_CALL26
            | elf::R_AARCH64_JUMP26
            | elf::R_AARCH64_CONDBR19
            | elf::R_AARCH64_TSTBR14 => RelExpr::PltPc,
            elf::R_AARCH64_ADR_PREL_PG_HI21 => RelExpr::PagePc,
            elf::R_AARCH64_ADR_GOT_PAGE | elf::R_AARCH64_TLSIE_ADR_GOTTPREL_PAGE21 => {
                RelExpr::GotPagePc
            }
            elf::R_AARCH64_LD64_GOT_LO12_NC | elf::R_AARCH64_TLSIE_LD64_GOTTPREL_LO12_NC => {
                RelExpr::Got
            }
            elf::R_AARCH64_LD64_GOTPAGE_LO15 => RelExpr::GotPage,
            elf::R_AARCH64_TLSGD_ADR_PAGE21 => RelExpr::TlsGdPc,
            elf::R_AARCH64_TLSGD_ADD_LO12_NC => RelExpr::TlsGdGot,
            elf::R_AARCH64_TLSLD_ADR_PAGE21 => RelExpr::TlsLdPc,
            elf::R_AARCH64_TLSLD_ADD_LO12_NC => RelExpr::TlsLdGot,
            elf::R_AARCH64_TLSLE_ADD_TPREL_HI12
            | elf::R_AARCH64_TLSLE_ADD_TPREL_LO12
            | elf::R_AARCH64_TLSLE_ADD_TPREL_LO12_NC => RelExpr::TpRel,
            elf::R_AARCH64_TLSDESC_ADR_PAGE21 => RelExpr::TlsDescPagePc,
            elf::R_AARCH64_TLSDESC_LD64_LO12 | elf::R_AARCH64_TLSDESC_ADD_LO12 => RelExpr::TlsDesc,
            elf::R_AARCH64_TLSDESC_CALL => RelExpr::TlsDescCall,
            _ => RelExpr::None,
        }
    }

    fn rel_type_to_string(&self, r_type: u32) -> Cow<'static, str> {
        let known = match r_type {
            elf::R_AARCH64_ABS64 => "R_AARCH64_ABS64",
            elf::R_AARCH64_CALL26 => "R_AARCH64_CALL26",
            elf::R_AARCH64_JUMP26 => "R_AARCH64_JUMP26",
            elf::R_AARCH64_ADR_PREL_PG_HI21 => "R_AARCH64_ADR_PREL_PG_HI21",
            elf::R_AARCH64_ADR_GOT_PAGE => "R_AARCH64_ADR_GOT_PAGE",
            elf::R_AARCH64_LD64_GOT_LO12_NC => "R_AARCH64_LD64_GOT_LO12_NC",
            _ => return Cow::Owned(format!("relocation type {r_type} (aarch64)")),
        };
        Cow::Borrowed(known)
    }

    fn implicit_addend(&self, data: &[u8], offset: u64, r_type: u32) -> i64 {
        let offset = offset as usize;
        match r_type {
            elf::R_AARCH64_ABS64 | elf::R_AARCH64_PREL64 => data
                .get(offset..offset + 8)
                .map_or(0, |b| i64::from_le_bytes(b.try_into().unwrap())),
            elf::R_AARCH64_ABS32 | elf::R_AARCH64_PREL32 => data
                .get(offset..offset + 4)
                .map_or(0, |b| i64::from(i32::from_le_bytes(b.try_into().unwrap()))),
            _ => 0,
        }
    }

    fn uses_only_low_page_bits(&self, r_type: u32) -> bool {
        matches!(
            r_type,
            elf::R_AARCH64_ADD_ABS_LO12_NC
                | elf::R_AARCH64_LDST8_ABS_LO12_NC
                | elf::R_AARCH64_LDST16_ABS_LO12_NC
                | elf::R_AARCH64_LDST32_ABS_LO12_NC
                | elf::R_AARCH64_LDST64_ABS_LO12_NC
                | elf::R_AARCH64_LDST128_ABS_LO12_NC
                | elf::R_AARCH64_LD64_GOT_LO12_NC
                | elf::R_AARCH64_TLSIE_LD64_GOTTPREL_LO12_NC
                | elf::R_AARCH64_TLSDESC_LD64_LO12
                | elf::R_AARCH64_TLSDESC_ADD_LO12
        )
    }

    fn dyn_rel(&self, r_type: u32) -> Option<u32> {
        (r_type == elf::R_AARCH64_ABS64).then_some(r_type)
    }

    fn dyn_reloc_type(&self, kind: DynRelocType) -> u32 {
        match kind {
            DynRelocType::Copy => elf::R_AARCH64_COPY,
            DynRelocType::GlobalData => elf::R_AARCH64_GLOB_DAT,
            DynRelocType::JumpSlot => elf::R_AARCH64_JUMP_SLOT,
            DynRelocType::IRelative => elf::R_AARCH64_IRELATIVE,
            DynRelocType::Relative => elf::R_AARCH64_RELATIVE,
            DynRelocType::Symbolic => elf::R_AARCH64_ABS64,
            DynRelocType::TlsDesc => elf::R_AARCH64_TLSDESC,
            DynRelocType::TlsGot => elf::R_AARCH64_TLS_TPREL,
            DynRelocType::TlsModuleIndex => elf::R_AARCH64_TLS_DTPMOD,
            DynRelocType::TlsOffset => elf::R_AARCH64_TLS_DTPREL,
        }
    }

    fn thunk_section_spacing(&self) -> Option<u64> {
        // Leave headroom below the 128 MiB limit so a trampoline section
        // can grow without pushing its callers out of range.
        Some(0xFF8000)
    }

    fn in_branch_range(&self, r_type: u32, src: u64, dst: u64) -> bool {
        let Some(range) = branch_range(r_type) else {
            return true;
        };
        let distance = dst.wrapping_sub(src) as i64;
        distance.unsigned_abs() < range
    }

    fn needs_thunk(
        &self,
        expr: RelExpr,
        r_type: u32,
        _file: Option<FileId>,
        src: u64,
        dst: u64,
        sym: &Symbol,
        _addend: i64,
    ) -> bool {
        if branch_range(r_type).is_none() {
            return false;
        }
        if !matches!(expr, RelExpr::PltPc | RelExpr::Relative) {
            return false;
        }
        // An undefined weak target resolves to zero and such branches are
        // guarded; there is nothing to reach.
        if sym.is_undef_weak() && !sym.is_in_plt {
            return false;
        }
        !self.in_branch_range(r_type, src, dst)
    }

    fn thunk_spec(
        &self,
        _rel: &crate::section::Relocation,
        _sym: &Symbol,
    ) -> crate::target::ThunkSpec {
        crate::target::ThunkSpec {
            size: THUNK_SIZE,
            must_precede: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branch_range_limits() {
        let target = AArch64;
        let base = 0x10_0000;
        assert!(target.in_branch_range(elf::R_AARCH64_CALL26, base, base + BRANCH26_RANGE - 4));
        assert!(!target.in_branch_range(elf::R_AARCH64_CALL26, base, base + BRANCH26_RANGE));
        // Backwards branches too.
        assert!(target.in_branch_range(
            elf::R_AARCH64_CALL26,
            base + BRANCH26_RANGE,
            base + 4
        ));
        assert!(!target.in_branch_range(elf::R_AARCH64_CONDBR19, base, base + CONDBR19_RANGE));
    }
}
