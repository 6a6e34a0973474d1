//! The capability surface each architecture back-end provides to the
//! scanner. The core never looks at instruction encodings; everything it
//! needs to know about an architecture comes through this trait.

use crate::arch::Arch;
use crate::expr::RelExpr;
use crate::input::FileId;
use crate::section::InputSection;
use crate::section::Relocation;
use crate::symbol::Symbol;
use std::borrow::Cow;

/// Architecture-independent names for the dynamic relocation types a target
/// must be able to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DynRelocType {
    Copy,
    GlobalData,
    JumpSlot,
    IRelative,
    Relative,
    /// Word-sized "store the symbol's address" form.
    Symbolic,
    TlsDesc,
    TlsGot,
    TlsModuleIndex,
    TlsOffset,
}

/// Shape of a trampoline a back-end wants for a particular branch.
#[derive(Debug, Clone, Copy)]
pub struct ThunkSpec {
    pub size: u64,
    /// A trampoline that must sit immediately before this input section
    /// (MIPS entry-shim style) instead of anywhere in range of the caller.
    pub must_precede: Option<crate::section::SectionId>,
}

pub trait TargetHooks {
    fn arch(&self) -> Arch;

    /// Classifies a raw relocation type into an expression.
    fn rel_expr(&self, r_type: u32, sym: &Symbol, section: &InputSection, offset: u64) -> RelExpr;

    fn rel_type_to_string(&self, r_type: u32) -> Cow<'static, str> {
        Cow::Owned(format!("relocation type {r_type}"))
    }

    /// Reads the addend stored in the section bytes for REL-form inputs.
    fn implicit_addend(&self, data: &[u8], offset: u64, r_type: u32) -> i64;

    /// Whether the instruction only keeps the low, page-offset bits of the
    /// computed value.
    fn uses_only_low_page_bits(&self, _r_type: u32) -> bool {
        false
    }

    /// Maps a TLS relocation type to the expression of its relaxed form.
    /// Targets whose relaxed sequences need type-specific handling override
    /// this; the default keeps the generic relaxation expression.
    fn adjust_tls_expr(&self, _r_type: u32, relax: RelExpr) -> RelExpr {
        relax
    }

    /// How many raw relocation records a relaxed general/local-dynamic
    /// sequence consumes, counting the one being processed.
    fn tls_gd_relax_skip(&self, _r_type: u32) -> usize {
        1
    }

    /// A chance to rewrite a GOT-PC expression into a cheaper direct form
    /// when the slot value is known to bind locally.
    fn adjust_got_pc_expr(&self, _r_type: u32, _addend: i64, _data: &[u8], _offset: u64) -> RelExpr {
        RelExpr::GotPc
    }

    /// The dynamic relocation type that can carry this input relocation
    /// as-is against a writable section, or `None` if there isn't one.
    fn dyn_rel(&self, _r_type: u32) -> Option<u32> {
        None
    }

    /// Numeric value of an architecture-independent dynamic relocation kind.
    fn dyn_reloc_type(&self, kind: DynRelocType) -> u32;

    fn plt_header_size(&self) -> u64 {
        16
    }

    fn plt_entry_size(&self) -> u64 {
        16
    }

    fn iplt_entry_size(&self) -> u64 {
        self.plt_entry_size()
    }

    /// PLT-shaped expressions that must keep their code sequence even when
    /// the target binds locally (the scanner normally rewrites them to
    /// direct references).
    fn keeps_plt_sequence(&self, _r_type: u32) -> bool {
        false
    }

    /// The REL-form pair that completes `r_type`, for architectures that
    /// split an addend across two records.
    fn paired_reloc_type(&self, _r_type: u32, _is_local: bool) -> Option<u32> {
        None
    }

    // Trampoline hooks.

    /// Interval at which empty trampoline sections are pre-created on the
    /// first placement pass. `None` disables pre-creation.
    fn thunk_section_spacing(&self) -> Option<u64> {
        None
    }

    fn in_branch_range(&self, _r_type: u32, _src: u64, _dst: u64) -> bool {
        true
    }

    /// Whether this relocation needs a trampoline given where the caller
    /// and callee ended up. `dst` is the callee's resolved address with the
    /// addend applied.
    fn needs_thunk(
        &self,
        _expr: RelExpr,
        _r_type: u32,
        _file: Option<FileId>,
        _src: u64,
        _dst: u64,
        _sym: &Symbol,
        _addend: i64,
    ) -> bool {
        false
    }

    /// Describes the trampoline to create for a relocation the target said
    /// needs one.
    fn thunk_spec(&self, _rel: &Relocation, _sym: &Symbol) -> ThunkSpec {
        ThunkSpec {
            size: 16,
            must_precede: None,
        }
    }

    /// Whether an existing trampoline's code sequence can serve this caller
    /// (interworking state, addressing mode).
    fn thunk_compatible(&self, _rel: &Relocation) -> bool {
        true
    }

    /// Displacement already baked into the branch encoding; ARM's pipeline
    /// offset. Cancelled out when keying trampolines by destination.
    fn pc_bias(&self, _r_type: u32) -> i64 {
        0
    }
}
