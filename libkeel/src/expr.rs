//! The closed set of relocation expressions and the predicates the scanner
//! uses to classify them. An expression describes what value the writer will
//! eventually compute for a relocation: the symbol itself, its distance from
//! the place being patched, the offset of an indirection slot, and so on.
//!
//! Raw relocation types are architecture-specific; expressions are not. Each
//! back-end maps its types onto this set in
//! [`crate::target::TargetHooks::rel_expr`].

use crate::context::LinkContext;
use crate::section::SectionId;
use crate::symbol::SymbolId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelExpr {
    /// Marker relocation; nothing to compute.
    None,
    /// S + A.
    Absolute,
    /// A constant the scanner already folded; the writer stores the addend.
    Addend,
    /// S + A − P.
    Relative,
    /// The size of the symbol.
    Size,

    /// Offset of the symbol's GOT slot from the GOT base.
    Got,
    GotOff,
    /// Address of the symbol's GOT slot relative to the place.
    GotPc,
    /// S + A − GOT base; no slot is created.
    GotRelGotBase,
    /// GOT base relative to the place; no slot is created.
    GotOnlyPc,
    GotPlt,
    GotPltOnlyPc,
    GotPltRelGotBase,

    Plt,
    PltPc,
    /// A GOT-PC access the target proved relaxable to a direct access.
    RelaxGotPc,
    RelaxGotPcNoPic,

    TlsGdGot,
    TlsGdGotPlt,
    TlsGdPc,
    TlsLdGot,
    TlsLdGotPlt,
    TlsLdPc,
    TlsLdHint,
    /// Offset-from-dynamic-thread-pointer stored in the GOT; not relaxable.
    TlsLdGotOff,
    TlsIeHint,

    TlsDesc,
    TlsDescCall,
    TlsDescPc,
    /// Page address of a TLS descriptor slot (AArch64 `adrp` form).
    TlsDescPagePc,

    /// Offset within the TLS block, dynamic-thread-pointer relative.
    DtpRel,
    /// Offset from the thread pointer.
    TpRel,
    TpRelNeg,

    RelaxTlsGdToIe,
    RelaxTlsGdToLe,
    RelaxTlsLdToLe,
    RelaxTlsIeToLe,

    /// AArch64 page-granular forms.
    GotPagePc,
    GotPage,
    PagePc,

    RiscvAdd,
    RiscvPcIndirect,

    Ppc32PltRel,
    Ppc64Call,
    Ppc64CallPlt,
    Ppc64RelaxToc,
    Ppc64TocBase,
    Ppc64RelaxGotPc,

    MipsGotLocalPage,
    MipsGotOff,
    MipsGotOff32,
    MipsGotRel,
    MipsGotGpPc,
    MipsTlsGd,
    MipsTlsLd,

    /// A tagged capability; can never be written at link time.
    Capability,
    CapTableIndex,
    CapTableIndexSmallImm,
    CapTableIndexCall,
    CapTableIndexCallSmallImm,
    CapTableEntryPc,
    CapTableRel,
    CapTableTlsGd,
    CapTableTlsIe,
    MipsCapTableTlsGd,
    MipsCapTableTlsLd,
    MipsCapTableTpRel,
}

/// Returns whether the expression is resolved through a PLT entry.
pub fn needs_plt(expr: RelExpr) -> bool {
    matches!(
        expr,
        RelExpr::Plt | RelExpr::PltPc | RelExpr::Ppc32PltRel | RelExpr::Ppc64CallPlt
    )
}

/// Returns whether the expression reads a GOT slot. TLS expressions also use
/// the GOT but allocate their slots differently, so they return false here.
pub fn needs_got(expr: RelExpr) -> bool {
    matches!(
        expr,
        RelExpr::Got
            | RelExpr::GotOff
            | RelExpr::GotPc
            | RelExpr::GotPlt
            | RelExpr::GotPagePc
            | RelExpr::GotPage
            | RelExpr::MipsGotLocalPage
            | RelExpr::MipsGotOff
            | RelExpr::MipsGotOff32
    )
}

/// Returns whether the expression has the shape `S − position`, where the
/// position is the place itself, the GOT base, or the capability table.
pub fn is_rel_expr(expr: RelExpr) -> bool {
    matches!(
        expr,
        RelExpr::Relative
            | RelExpr::GotRelGotBase
            | RelExpr::GotPltRelGotBase
            | RelExpr::MipsGotRel
            | RelExpr::Ppc64Call
            | RelExpr::Ppc64RelaxToc
            | RelExpr::PagePc
            | RelExpr::RelaxGotPc
            | RelExpr::RiscvPcIndirect
            | RelExpr::Ppc64RelaxGotPc
            | RelExpr::CapTableRel
    )
}

/// Rewrites a direct expression into its PLT-indirected form.
pub fn to_plt(expr: RelExpr) -> RelExpr {
    match expr {
        RelExpr::Ppc64Call => RelExpr::Ppc64CallPlt,
        RelExpr::Relative => RelExpr::PltPc,
        RelExpr::Absolute => RelExpr::Plt,
        other => other,
    }
}

/// Rewrites a PLT-indirected expression back into a direct reference to the
/// symbol. Used when the symbol turned out to bind locally.
pub fn from_plt(expr: RelExpr) -> RelExpr {
    match expr {
        RelExpr::PltPc | RelExpr::Ppc32PltRel => RelExpr::Relative,
        RelExpr::Ppc64CallPlt => RelExpr::Ppc64Call,
        RelExpr::Plt => RelExpr::Absolute,
        other => other,
    }
}

/// Returns whether the final value of the relocation is knowable now, at
/// link time. When this returns false the writer must emit a dynamic
/// relocation and let the runtime loader finish the job.
pub fn is_static_link_time_constant(
    ctx: &mut LinkContext,
    expr: RelExpr,
    r_type: u32,
    sym_id: SymbolId,
    sec_id: SectionId,
    offset: u64,
) -> bool {
    // These always compute a constant: distances between linker-chosen
    // positions, slot indices, hint markers.
    if matches!(
        expr,
        RelExpr::DtpRel
            | RelExpr::GotPlt
            | RelExpr::GotOff
            | RelExpr::TlsLdGotOff
            | RelExpr::CapTableIndex
            | RelExpr::CapTableIndexSmallImm
            | RelExpr::CapTableIndexCall
            | RelExpr::CapTableIndexCallSmallImm
            | RelExpr::CapTableEntryPc
            | RelExpr::CapTableRel
            | RelExpr::MipsGotLocalPage
            | RelExpr::MipsGotRel
            | RelExpr::MipsGotOff
            | RelExpr::MipsGotOff32
            | RelExpr::MipsGotGpPc
            | RelExpr::MipsTlsGd
            | RelExpr::GotPagePc
            | RelExpr::GotPc
            | RelExpr::GotOnlyPc
            | RelExpr::GotPltOnlyPc
            | RelExpr::PltPc
            | RelExpr::TlsGdGot
            | RelExpr::TlsGdGotPlt
            | RelExpr::TlsGdPc
            | RelExpr::Ppc32PltRel
            | RelExpr::Ppc64CallPlt
            | RelExpr::Ppc64RelaxToc
            | RelExpr::RiscvAdd
            | RelExpr::TlsDescCall
            | RelExpr::TlsDescPc
            | RelExpr::TlsDescPagePc
            | RelExpr::TlsLdHint
            | RelExpr::TlsIeHint
            | RelExpr::GotPage
    ) {
        return true;
    }

    // A capability carries a tag bit that has no representation in the file,
    // so it can never be produced statically.
    if expr == RelExpr::Capability {
        return false;
    }

    // Slot offsets measured from the image base are constants only when the
    // image base itself is fixed, or when the instruction only keeps the low
    // page bits.
    if matches!(expr, RelExpr::Got | RelExpr::Plt | RelExpr::TlsDesc) {
        return ctx.target.uses_only_low_page_bits(r_type) || !ctx.args.is_pic();
    }

    if ctx.symbols.get(sym_id).is_preemptible {
        return false;
    }
    if !ctx.args.is_pic() {
        return true;
    }

    // The size of a non-preemptible symbol never changes at load time.
    if expr == RelExpr::Size {
        return true;
    }

    let sym = ctx.symbols.get(sym_id);
    let absolute = sym.has_absolute_value();
    let relative = is_rel_expr(expr);
    if absolute && !relative {
        return true;
    }
    if !absolute && relative {
        return true;
    }
    if !absolute && !relative {
        return ctx.target.uses_only_low_page_bits(r_type);
    }

    // Absolute value in a position-relative expression. An undefined weak
    // symbol resolves to zero and such calls are normally guarded, so allow
    // it; symbols assigned by the linker script get their final values later
    // and are link-time constants as well.
    if sym.is_undef_weak() || sym.script_defined {
        return true;
    }

    let location = ctx.location(sec_id, sym_id, offset);
    let message = format!(
        "relocation {} cannot refer to absolute symbol: {}{location}",
        ctx.target.rel_type_to_string(r_type),
        ctx.symbols.get(sym_id).name,
    );
    ctx.diagnostics.error_or_warn(message);
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plt_round_trip() {
        for expr in [RelExpr::Relative, RelExpr::Absolute, RelExpr::Ppc64Call] {
            assert_eq!(from_plt(to_plt(expr)), expr);
        }
        // Expressions without a PLT flavour pass through unchanged.
        assert_eq!(to_plt(RelExpr::Got), RelExpr::Got);
        assert_eq!(from_plt(RelExpr::Got), RelExpr::Got);
    }

    #[test]
    fn got_and_plt_classification_disjoint() {
        for expr in [
            RelExpr::Got,
            RelExpr::GotPc,
            RelExpr::GotPagePc,
            RelExpr::MipsGotOff,
        ] {
            assert!(needs_got(expr));
            assert!(!needs_plt(expr));
        }
        for expr in [RelExpr::PltPc, RelExpr::Plt, RelExpr::Ppc64CallPlt] {
            assert!(needs_plt(expr));
            assert!(!needs_got(expr));
        }
    }
}
