//! The relocation scanner. Walks every raw relocation of an input section,
//! classifies it, applies whatever rewrites the output kind and symbol
//! binding allow, allocates indirection slots, and records the decisions as
//! [`Relocation`] entries for the writer.
//!
//! Nothing here touches the output buffer; the scanner only decides and
//! records.

use crate::arch::Arch;
use crate::context::LinkContext;
use crate::error::Result;
use crate::expr;
use crate::expr::RelExpr;
use crate::section::DEAD_OFFSET;
use crate::section::OffsetGetter;
use crate::section::RawReloc;
use crate::section::Relocation;
use crate::section::SectionId;
use crate::symbol::Place;
use crate::symbol::SymbolId;
use crate::symbol::SymbolPlacement;
use crate::target::DynRelocType;
use crate::tls::handle_tls_relocation;
use crate::undefined::maybe_report_undefined;
use smallvec::SmallVec;

// Not yet defined in the `object` crate's `elf` module; value from the
// PPC64 ELF ABI (64-bit ELFv2 ABI specification).
const R_PPC64_REL24_NOTOC: u32 = 253;

/// Scans one input section, appending scanned records to it and mutating
/// the synthetic sections. Returns `Err` only for conditions that must stop
/// the link; everything else lands in the diagnostics sink.
pub fn scan_relocations(ctx: &mut LinkContext, sec_id: SectionId) -> Result {
    if ctx.args.arch == Arch::Ppc64 {
        check_ppc64_tls_relax(ctx, sec_id);
    }

    let section = ctx.section(sec_id);
    let mut rels = section.raw_relocs.clone();
    let pieces: Vec<crate::section::EhPiece> =
        section.eh_pieces.as_deref().unwrap_or(&[]).to_vec();

    // The piece-table walk needs offsets in increasing order. A linker
    // script can reorder exception-frame pieces, so sort the records when a
    // piece table is present.
    if !pieces.is_empty() {
        rels.sort_by_key(|rel| rel.offset);
    }

    ctx.section_mut(sec_id).relocations.reserve(rels.len());

    let mut getter = OffsetGetter::from_pieces(&pieces);
    let mut i = 0;
    while i < rels.len() {
        i = scan_reloc(ctx, sec_id, &rels, i, &mut getter)?;
    }

    // The writer searches these by offset when pairing high/low parts.
    if ctx.args.arch == Arch::RiscV64
        || (ctx.args.arch == Arch::Ppc64 && ctx.section(sec_id).name == ".toc")
    {
        ctx.section_mut(sec_id).relocations.sort_by_key(|rel| rel.offset);
    }
    Ok(())
}

/// Processes the logical relocation starting at `rels[i]` and returns the
/// index of the first unconsumed record.
fn scan_reloc(
    ctx: &mut LinkContext,
    sec_id: SectionId,
    rels: &[RawReloc],
    i: usize,
    getter: &mut OffsetGetter,
) -> Result<usize> {
    let rel = rels[i];
    let Some(file_id) = ctx.section(sec_id).file else {
        // Synthetic sections own no raw relocations worth scanning.
        return Ok(rels.len());
    };
    let sym_id = ctx.symbol_for_index(file_id, rel.sym_index);

    // The N32 ABI describes one logical relocation as a run of records
    // sharing an offset; their types pack into a single value byte by byte.
    let (r_type, mut next) = if ctx.args.mips_n32_abi {
        let mut packed: u32 = 0;
        let mut run: SmallVec<[u32; 3]> = SmallVec::new();
        let mut j = i;
        while j < rels.len() && rels[j].offset == rel.offset {
            run.push(rels[j].r_type);
            j += 1;
        }
        for (n, ty) in run.iter().enumerate() {
            packed |= *ty << (8 * n);
        }
        (packed, j)
    } else {
        (rel.r_type, i + 1)
    };

    let mut offset = getter.get(rel.offset)?;
    if offset == DEAD_OFFSET {
        return Ok(next);
    }

    // Index 0 is the null symbol, used by marker relocations; it can never
    // be "undefined" in a reportable sense.
    if rel.sym_index != 0 && maybe_report_undefined(ctx, sym_id, sec_id, rel.offset) {
        return Ok(next);
    }

    let mut expr = ctx
        .target
        .rel_expr(r_type, ctx.symbols.get(sym_id), ctx.section(sec_id), rel.offset);
    if expr == RelExpr::None {
        return Ok(next);
    }

    let mut addend = compute_addend(ctx, sec_id, rels, i, expr, r_type);

    if ctx.args.arch == Arch::Ppc64 {
        ppc64_reloc_bookkeeping(ctx, sec_id, sym_id, r_type, addend);

        // The 4-byte-aligned GD/LD call markers get offset by one byte when
        // the following branch is the no-TOC form, so the writer can tell
        // the two call-stub shapes apart.
        if (r_type == object::elf::R_PPC64_TLSGD && expr == RelExpr::TlsDescCall)
            || (r_type == object::elf::R_PPC64_TLSLD && expr == RelExpr::TlsLdHint)
        {
            match rels.get(next) {
                None => {
                    let location = ctx.location(sec_id, sym_id, offset);
                    ctx.diagnostics.error_or_warn(format!(
                        "TLS call marker may not be the last relocation{location}"
                    ));
                    return Ok(next);
                }
                Some(following) if following.r_type == R_PPC64_REL24_NOTOC => {
                    offset += 1;
                }
                Some(_) => {}
            }
        }
    }

    // If the symbol binds locally there is no reason to go through a PLT:
    // rewrite the expression to address the symbol directly. GOT-PC
    // accesses get a chance to relax into direct addressing instead.
    {
        let sym = ctx.symbols.get(sym_id);
        if !sym.is_preemptible && (!sym.is_ifunc() || ctx.args.z_ifunc_noplt) {
            if expr != RelExpr::GotPc {
                // The high bit of the PPC32 PLT-relative addend selects a
                // call-stub flavour; it is meaningless once the call is
                // direct.
                if ctx.args.arch == Arch::Ppc32 && expr == RelExpr::Ppc32PltRel {
                    addend &= !0x8000;
                }
                if !ctx.target.keeps_plt_sequence(r_type) {
                    expr = expr::from_plt(expr);
                }
            } else if !sym.has_absolute_value() {
                expr =
                    ctx.target
                        .adjust_got_pc_expr(r_type, addend, &ctx.section(sec_id).data, rel.offset);
            }
        }
    }

    // Expressions that measure from the GOT or GOTPLT base force the
    // section to exist even when they create no entry.
    match expr {
        RelExpr::GotPltOnlyPc | RelExpr::GotPltRelGotBase | RelExpr::GotPlt | RelExpr::TlsGdGotPlt => {
            ctx.synthetic.got_plt.has_base_rel = true;
        }
        RelExpr::GotOnlyPc
        | RelExpr::GotRelGotBase
        | RelExpr::Ppc64TocBase
        | RelExpr::Ppc64RelaxToc => {
            ctx.synthetic.got.has_base_rel = true;
        }
        _ => {}
    }

    // Thread-pointer-relative values only exist once the TLS block layout is
    // fixed, which is never true for a shared object.
    if matches!(expr, RelExpr::TpRel | RelExpr::TpRelNeg) {
        if ctx.args.is_shared() {
            let location = ctx.location(sec_id, sym_id, offset);
            let message = format!(
                "relocation {} against {} cannot be used with -shared{location}",
                ctx.target.rel_type_to_string(r_type),
                ctx.symbol_name_for_display(sym_id),
            );
            ctx.diagnostics.error_or_warn(message);
            return Ok(next);
        }
    } else {
        let processed = handle_tls_relocation(ctx, r_type, sym_id, sec_id, offset, addend, expr);
        if processed > 0 {
            return Ok(next + processed - 1);
        }
    }

    // `-z ifunc-noplt`: don't build resolver plumbing, just hand the
    // original relocation to the runtime.
    if ctx.symbols.get(sym_id).is_ifunc() && ctx.args.z_ifunc_noplt {
        ctx.symbols.get_mut(sym_id).export_dynamic = true;
        ctx.synthetic.rela_dyn.add_symbol_reloc(
            r_type,
            Place::Input(sec_id),
            offset,
            sym_id,
            addend,
        );
        return Ok(next);
    }

    if matches!(
        expr,
        RelExpr::CapTableIndex
            | RelExpr::CapTableIndexSmallImm
            | RelExpr::CapTableIndexCall
            | RelExpr::CapTableIndexCallSmallImm
            | RelExpr::CapTableEntryPc
    ) {
        if let Some(cap_table) = ctx.synthetic.cap_table.as_mut() {
            cap_table.add_entry(sym_id);
        }
        push_record(ctx, sec_id, expr, r_type, offset, addend, sym_id);
        return Ok(next);
    }

    let sym = ctx.symbols.get(sym_id);
    if !sym.is_ifunc() || sym.is_preemptible {
        if expr::needs_plt(expr) && !sym.is_in_plt {
            add_plt_entry(ctx, sym_id);
        }
        if expr::needs_got(expr) {
            if ctx.args.arch.is_mips() {
                // The MIPS ABI fills its GOT from the dynamic symbol table,
                // so entries need no accompanying relocation.
                if let Some(mips_got) = ctx.synthetic.mips_got.as_mut() {
                    mips_got.add_entry(sym_id, addend);
                }
            } else if !ctx.symbols.get(sym_id).is_in_got {
                add_got_entry(ctx, sym_id);
            }
        }
    } else {
        scan_nonpreemptible_ifunc(ctx, sym_id, expr);
    }

    process_reloc_aux(ctx, sec_id, expr, r_type, offset, sym_id, addend)?;
    Ok(next)
}

/// A non-preemptible ifunc has no fixed value until its resolver runs, so
/// every reference goes through an entry in the ifunc PLT, relocated
/// eagerly at startup. A direct (non-GOT, non-PLT) reference forces the
/// entry to become the symbol's one true address.
fn scan_nonpreemptible_ifunc(ctx: &mut LinkContext, sym_id: SymbolId, rel_expr: RelExpr) {
    if !ctx.symbols.get(sym_id).is_in_plt {
        // The relocation in the ifunc GOT must keep pointing at the
        // resolver even if the symbol is later rebound to the entry, so it
        // targets a private copy of the symbol.
        let direct = ctx.symbols.get(sym_id).clone();
        let direct_id = ctx.symbols.add(direct);
        add_iplt_entry(ctx, direct_id);

        let direct_index = ctx.symbols.get(direct_id).plt_index;
        let sym = ctx.symbols.get_mut(sym_id);
        sym.is_in_iplt = true;
        sym.is_in_plt = true;
        sym.plt_index = direct_index;
    }

    if expr::needs_got(rel_expr) {
        // Keep note that GOT-shaped references were served by the ifunc
        // GOT; a later direct reference has to undo this.
        ctx.symbols.get_mut(sym_id).got_in_igot = true;
    } else if !expr::needs_plt(rel_expr) {
        // Make the entry canonical: the symbol now *is* its ifunc-PLT slot.
        let entry_size = ctx.target.iplt_entry_size();
        let sym = ctx.symbols.get_mut(sym_id);
        let value = u64::from(sym.plt_index.unwrap_or(0)) * entry_size;
        sym.placement = SymbolPlacement::Defined {
            place: Some(Place::Iplt),
        };
        sym.value = value;
        sym.size = 0;
        // The dynamic loader must not treat the entry as another resolver.
        sym.kind = crate::symbol::SymbolKind::Func;

        if sym.got_in_igot {
            ctx.symbols.get_mut(sym_id).got_in_igot = false;
            add_got_entry(ctx, sym_id);
        }
    }
}

/// The policy tail of the scanner: static resolution, dynamic relocation,
/// copy relocation, canonical PLT, or a diagnostic.
fn process_reloc_aux(
    ctx: &mut LinkContext,
    sec_id: SectionId,
    rel_expr: RelExpr,
    r_type: u32,
    offset: u64,
    sym_id: SymbolId,
    addend: i64,
) -> Result {
    let is_constant =
        expr::is_static_link_time_constant(ctx, rel_expr, r_type, sym_id, sec_id, offset);

    // An undefined weak reference in a fixed-position output resolves to
    // zero statically; PIC outputs prefer a dynamic relocation for it.
    let sym = ctx.symbols.get(sym_id);
    if is_constant
        || (!ctx.args.is_pic() && sym.is_undef_weak() && rel_expr != RelExpr::Capability)
    {
        push_record(ctx, sec_id, rel_expr, r_type, offset, addend, sym_id);
        return Ok(());
    }

    let can_write = ctx.section(sec_id).flags.is_writable() || !ctx.args.z_text;

    if rel_expr == RelExpr::Capability {
        if !can_write {
            let location = ctx.location(sec_id, sym_id, offset);
            let message = format!(
                "cannot create a capability relocation against {} in a read-only section{location}",
                ctx.symbol_name_for_display(sym_id),
            );
            ctx.diagnostics.error_or_warn(message);
            return Ok(());
        }
        if let Some(cap_table) = ctx.synthetic.cap_table.as_mut() {
            cap_table.cap_relocs.push(Relocation {
                expr: rel_expr,
                r_type,
                offset,
                addend,
                sym: sym_id,
            });
        }
        return Ok(());
    }

    if can_write {
        let dyn_type = ctx.target.dyn_rel(r_type);
        let symbolic = ctx.target.dyn_reloc_type(DynRelocType::Symbolic);
        let preemptible = ctx.symbols.get(sym_id).is_preemptible;

        if rel_expr == RelExpr::Got || (dyn_type == Some(symbolic) && !preemptible) {
            add_relative_reloc(ctx, sec_id, rel_expr, r_type, offset, sym_id, addend);
            return Ok(());
        }
        if let Some(mut dyn_type) = dyn_type {
            // The MIPS loader resolves symbolic relocations through its
            // GOT, so the section side uses the relative form and the
            // symbol gets a GOT entry regardless.
            if ctx.args.arch.is_mips() && dyn_type == symbolic {
                dyn_type = ctx.target.dyn_reloc_type(DynRelocType::Relative);
            }
            ctx.synthetic.rela_dyn.add_symbol_reloc(
                dyn_type,
                Place::Input(sec_id),
                offset,
                sym_id,
                addend,
            );
            push_record(ctx, sec_id, rel_expr, r_type, offset, addend, sym_id);
            if ctx.args.arch.is_mips() {
                if let Some(mips_got) = ctx.synthetic.mips_got.as_mut() {
                    mips_got.add_entry(sym_id, addend);
                }
            }
            return Ok(());
        }
    }

    if !ctx.args.is_shared() {
        if !can_define_symbol_in_executable(ctx, sym_id) {
            let location = ctx.location(sec_id, sym_id, offset);
            let message = format!(
                "cannot preempt symbol: {}{location}",
                ctx.symbol_name_for_display(sym_id)
            );
            ctx.diagnostics.error_or_warn(message);
            return Ok(());
        }

        let (is_object, is_func, is_shared) = {
            let sym = ctx.symbols.get(sym_id);
            (sym.is_object(), sym.is_func(), sym.is_shared())
        };
        if is_object {
            if is_shared {
                if !ctx.args.z_copyreloc {
                    let location = ctx.location(sec_id, sym_id, offset);
                    ctx.diagnostics.error(format!(
                        "unresolvable relocation {} against symbol '{}'; recompile with -fPIC \
                         or remove '-z nocopyreloc'{location}",
                        ctx.target.rel_type_to_string(r_type),
                        ctx.symbol_name_for_display(sym_id),
                    ));
                }
                add_copy_rel_symbol(ctx, sym_id)?;
            }
            push_record(ctx, sec_id, rel_expr, r_type, offset, addend, sym_id);
            return Ok(());
        }

        if is_func {
            // A non-PIC call into a shared library: give the function a PLT
            // entry and make that entry its official address, so pointer
            // comparisons agree across modules.
            if ctx.args.is_pie() && ctx.args.arch == Arch::I386 {
                let location = ctx.location(sec_id, sym_id, offset);
                ctx.diagnostics.error_or_warn(format!(
                    "symbol '{}' cannot be preempted; recompile with -fPIE{location}",
                    ctx.symbol_name_for_display(sym_id),
                ));
            }
            if !ctx.symbols.get(sym_id).is_in_plt {
                add_plt_entry(ctx, sym_id);
            }
            if !ctx.symbols.get(sym_id).is_defined() {
                let plt_index = u64::from(ctx.symbols.get(sym_id).plt_index.unwrap_or(0));
                let value =
                    ctx.target.plt_header_size() + ctx.target.plt_entry_size() * plt_index;
                ctx.symbols
                    .get_mut(sym_id)
                    .replace_with_defined(Place::Plt, value, 0);
                if ctx.args.arch == Arch::Ppc32 {
                    // PPC32 keeps canonical entries at the front of the
                    // call-stub header, which grows to hold them.
                    let header = ctx.synthetic.plt.header_size;
                    ctx.symbols.get_mut(sym_id).value = header;
                    ctx.synthetic.plt.header_size = header + 16;
                    ctx.synthetic.plt.canonical_entries.push(sym_id);
                }
            }
            ctx.symbols.get_mut(sym_id).needs_plt_addr = true;
            push_record(ctx, sec_id, rel_expr, r_type, offset, addend, sym_id);
            return Ok(());
        }
    }

    if ctx.args.is_pic() {
        let location = ctx.location(sec_id, sym_id, offset);
        let type_name = ctx.target.rel_type_to_string(r_type);
        let sym_name = ctx.symbol_name_for_display(sym_id).to_owned();
        let message = if !can_write && !expr::is_rel_expr(rel_expr) {
            format!(
                "can't create dynamic relocation {type_name} against {sym_name} in readonly \
                 segment; recompile object files with -fPIC or pass '-Wl,-z,notext' to allow \
                 text relocations in the output{location}"
            )
        } else {
            format!(
                "relocation {type_name} cannot be used against {sym_name}; recompile with \
                 -fPIC{location}"
            )
        };
        ctx.diagnostics.error_or_warn(message);
        return Ok(());
    }

    let location = ctx.location(sec_id, sym_id, offset);
    ctx.diagnostics.error_or_warn(format!(
        "symbol '{}' has no type{location}",
        ctx.symbol_name_for_display(sym_id)
    ));
    Ok(())
}

fn push_record(
    ctx: &mut LinkContext,
    sec_id: SectionId,
    rel_expr: RelExpr,
    r_type: u32,
    offset: u64,
    addend: i64,
    sym: SymbolId,
) {
    ctx.section_mut(sec_id).relocations.push(Relocation {
        expr: rel_expr,
        r_type,
        offset,
        addend,
        sym,
    });
}

/// Extracts the addend: explicit for RELA records, decoded from the section
/// bytes for REL, plus the PPC64 TOC and MIPS pairing adjustments.
fn compute_addend(
    ctx: &mut LinkContext,
    sec_id: SectionId,
    rels: &[RawReloc],
    index: usize,
    rel_expr: RelExpr,
    r_type: u32,
) -> i64 {
    let rel = rels[index];
    let section = ctx.section(sec_id);
    let mut addend = if section.is_rela {
        rel.addend
    } else {
        ctx.target.implicit_addend(&section.data, rel.offset, rel.r_type)
    };

    if ctx.args.arch == Arch::Ppc64
        && ctx.args.is_pic()
        && r_type == object::elf::R_PPC64_TOC
    {
        addend += ctx.args.ppc64_toc_base as i64;
    }
    if ctx.args.arch.is_mips() {
        addend += compute_mips_addend(ctx, sec_id, rels, index, rel_expr);
    }
    addend
}

/// MIPS splits an addend across a high/low pair of REL records; the partner
/// record may sit anywhere later in the table, so this is a linear search.
fn compute_mips_addend(
    ctx: &mut LinkContext,
    sec_id: SectionId,
    rels: &[RawReloc],
    index: usize,
    rel_expr: RelExpr,
) -> i64 {
    let rel = rels[index];
    let sym_id = ctx
        .section(sec_id)
        .file
        .map(|f| ctx.symbol_for_index(f, rel.sym_index));
    let is_local = sym_id.is_some_and(|id| ctx.symbols.get(id).is_local());

    if rel_expr == RelExpr::MipsGotRel && is_local {
        let file = ctx.section(sec_id).file.unwrap();
        return ctx.file(file).mips_gp0;
    }

    // Pairing only exists for the REL form.
    if ctx.section(sec_id).is_rela {
        return 0;
    }

    let Some(pair_type) = ctx.target.paired_reloc_type(rel.r_type, is_local) else {
        return 0;
    };

    for candidate in &rels[index..] {
        if candidate.r_type == pair_type && candidate.sym_index == rel.sym_index {
            let section = ctx.section(sec_id);
            return ctx
                .target
                .implicit_addend(&section.data, candidate.offset, pair_type);
        }
    }

    ctx.diagnostics.warn(format!(
        "can't find matching {} relocation for {}",
        ctx.target.rel_type_to_string(pair_type),
        ctx.target.rel_type_to_string(rel.r_type),
    ));
    0
}

fn ppc64_reloc_bookkeeping(
    ctx: &mut LinkContext,
    sec_id: SectionId,
    sym_id: SymbolId,
    r_type: u32,
    addend: i64,
) {
    // Sections referenced with small-code-model TOC relocations have to be
    // placed within the first 64 KiB of the TOC pointer; layout wants to
    // know which files those came from.
    if matches!(
        r_type,
        object::elf::R_PPC64_TOC16 | object::elf::R_PPC64_TOC16_DS
    ) {
        if let Some(file) = ctx.section(sec_id).file {
            ctx.file_mut(file).ppc64_small_code_model_toc_relocs = true;
        }
    }

    // A low-half reference into `.toc` pins that TOC entry: it can't be
    // relaxed away if its address escapes.
    if r_type == object::elf::R_PPC64_TOC16_LO {
        let sym = ctx.symbols.get(sym_id);
        if sym.is_section()
            && let SymbolPlacement::Defined {
                place: Some(Place::Input(sec)),
            } = sym.placement
            && ctx.section(sec).name == ".toc"
        {
            ctx.ppc64_no_toc_relax.insert((sym_id, addend));
        }
    }
}

/// GOT-based TLS relocations are supposed to come with call markers; very
/// old IBM XL compilers omitted them, and the relaxed sequences are wrong
/// without them. Detect that and disable relaxation for the whole file.
fn check_ppc64_tls_relax(ctx: &mut LinkContext, sec_id: SectionId) {
    let Some(file_id) = ctx.section(sec_id).file else {
        return;
    };
    if ctx.file(file_id).ppc64_disable_tls_relax {
        return;
    }

    let mut has_gd_ld = false;
    for rel in &ctx.section(sec_id).raw_relocs {
        match rel.r_type {
            object::elf::R_PPC64_TLSGD | object::elf::R_PPC64_TLSLD => return,
            object::elf::R_PPC64_GOT_TLSGD16
            | object::elf::R_PPC64_GOT_TLSGD16_HA
            | object::elf::R_PPC64_GOT_TLSGD16_HI
            | object::elf::R_PPC64_GOT_TLSGD16_LO
            | object::elf::R_PPC64_GOT_TLSLD16
            | object::elf::R_PPC64_GOT_TLSLD16_HA
            | object::elf::R_PPC64_GOT_TLSLD16_HI
            | object::elf::R_PPC64_GOT_TLSLD16_LO => has_gd_ld = true,
            _ => {}
        }
    }

    if has_gd_ld {
        ctx.file_mut(file_id).ppc64_disable_tls_relax = true;
        let path = ctx.file(file_id).path.clone();
        ctx.diagnostics.warn(format!(
            "{path}: disable TLS relaxation due to GOT-based TLS relocations without call markers"
        ));
    }
}

/// Allocates the symbol's GOT slot and whatever relocation fills it: a
/// static one when the value is known now, a relative one for local
/// symbols in PIC output, a symbol-bearing dynamic one otherwise.
pub(crate) fn add_got_entry(ctx: &mut LinkContext, sym_id: SymbolId) {
    let slot = ctx.synthetic.got.add_entry(sym_id);
    {
        let wordsize = ctx.args.wordsize;
        let sym = ctx.symbols.get_mut(sym_id);
        sym.is_in_got = true;
        sym.got_index = Some((slot / wordsize) as u32);
    }

    let sym = ctx.symbols.get(sym_id);
    let is_tls = sym.is_tls();
    let preemptible = sym.is_preemptible;
    let value_expr = if is_tls {
        RelExpr::TpRel
    } else {
        RelExpr::Absolute
    };
    let symbolic = ctx.target.dyn_reloc_type(DynRelocType::Symbolic);

    let is_link_time_constant = !preemptible && (!ctx.args.is_pic() || sym.is_absolute());
    if is_link_time_constant {
        ctx.synthetic.got.relocations.push(Relocation {
            expr: value_expr,
            r_type: symbolic,
            offset: slot,
            addend: 0,
            sym: sym_id,
        });
        return;
    }

    if !is_tls && !preemptible && ctx.args.is_pic() {
        add_relative_reloc_at(ctx, Place::Got, ctx.args.wordsize, slot, sym_id, 0);
        return;
    }

    let got_type = if is_tls {
        ctx.target.dyn_reloc_type(DynRelocType::TlsGot)
    } else {
        ctx.target.dyn_reloc_type(DynRelocType::GlobalData)
    };
    ctx.synthetic
        .rela_dyn
        .add_reloc_against_sym_or_addend(got_type, Place::Got, slot, sym_id, preemptible);
}

/// PLT entry plus its `.got.plt` slot plus the jump-slot relocation that
/// binds the two at load time. On capability ABIs the indirection cell
/// lives in the capability table instead, relocated through the general
/// dynamic section so the runtime loader needs no new machinery.
pub(crate) fn add_plt_entry(ctx: &mut LinkContext, sym_id: SymbolId) {
    let index = ctx.synthetic.plt.add_entry(sym_id);
    {
        let sym = ctx.symbols.get_mut(sym_id);
        sym.is_in_plt = true;
        sym.plt_index = Some(index);
    }

    if ctx.args.is_cheri_abi {
        if let Some(cap_table) = ctx.synthetic.cap_table.as_mut() {
            cap_table.add_entry(sym_id);
        }
        return;
    }

    let gotplt_offset = ctx.synthetic.got_plt.add_entry(sym_id);
    let jump_slot = ctx.target.dyn_reloc_type(DynRelocType::JumpSlot);
    let preemptible = ctx.symbols.get(sym_id).is_preemptible;
    ctx.synthetic.rela_plt.add_reloc_against_sym_or_addend(
        jump_slot,
        Place::GotPlt,
        gotplt_offset,
        sym_id,
        preemptible,
    );
}

/// Ifunc flavour of [`add_plt_entry`]: entry in the ifunc PLT, slot in the
/// ifunc GOT, eager IRELATIVE relocation.
fn add_iplt_entry(ctx: &mut LinkContext, sym_id: SymbolId) {
    let index = ctx.synthetic.iplt.add_entry(sym_id);
    {
        let sym = ctx.symbols.get_mut(sym_id);
        sym.is_in_plt = true;
        sym.plt_index = Some(index);
    }

    if ctx.args.is_cheri_abi {
        if let Some(cap_table) = ctx.synthetic.cap_table.as_mut() {
            cap_table.add_entry(sym_id);
        }
        return;
    }

    let igotplt_offset = ctx.synthetic.igot_plt.add_entry(sym_id);
    let irelative = ctx.target.dyn_reloc_type(DynRelocType::IRelative);
    ctx.synthetic.rela_iplt.add_reloc(crate::synthetic::DynReloc {
        r_type: irelative,
        kind: crate::synthetic::DynRelocKind::AddendOnly,
        place: Place::IgotPlt,
        offset: igotplt_offset,
        sym: Some(sym_id),
        addend: 0,
    });
}

/// Emits a relative dynamic relocation for a section location and records
/// the link-time value alongside it.
fn add_relative_reloc(
    ctx: &mut LinkContext,
    sec_id: SectionId,
    rel_expr: RelExpr,
    r_type: u32,
    offset: u64,
    sym_id: SymbolId,
    addend: i64,
) {
    push_record(ctx, sec_id, rel_expr, r_type, offset, addend, sym_id);
    let alignment = ctx.section(sec_id).alignment;
    add_relative_reloc_at(ctx, Place::Input(sec_id), alignment, offset, sym_id, addend);
}

/// The compact relative encoding can only name even offsets, so odd or
/// under-aligned locations fall back to the general section. Compact
/// entries carry no addend, so the slot's link-time value has to be
/// recorded for the writer.
fn add_relative_reloc_at(
    ctx: &mut LinkContext,
    place: Place,
    alignment: u64,
    offset: u64,
    sym_id: SymbolId,
    addend: i64,
) {
    if ctx.synthetic.relr_dyn.is_some() && alignment >= 2 && offset % 2 == 0 {
        if place == Place::Got {
            let symbolic = ctx.target.dyn_reloc_type(DynRelocType::Symbolic);
            ctx.synthetic.got.relocations.push(Relocation {
                expr: RelExpr::Absolute,
                r_type: symbolic,
                offset,
                addend,
                sym: sym_id,
            });
        }
        if let Some(relr) = ctx.synthetic.relr_dyn.as_mut() {
            relr.relocs.push((place, offset));
        }
        return;
    }
    let relative = ctx.target.dyn_reloc_type(DynRelocType::Relative);
    ctx.synthetic
        .rela_dyn
        .add_relative_reloc(relative, place, offset, sym_id, addend);
}

/// Whether the executable may claim this shared symbol as its own (the
/// precondition for copy relocations and canonical PLT entries).
fn can_define_symbol_in_executable(ctx: &LinkContext, sym_id: SymbolId) -> bool {
    let sym = ctx.symbols.get(sym_id);
    // Default visibility means a definition in the executable preempts the
    // DSO's, which is exactly what the copy/canonical tricks rely on.
    if sym.visibility == crate::symbol::Visibility::Default {
        return true;
    }
    (sym.is_func() && ctx.args.ignore_function_address_equality)
        || (sym.is_object() && ctx.args.ignore_data_address_equality)
}

/// Reserves zero-fill space for a shared object symbol, rebinds the symbol
/// and every alias at the same address to the reservation, and emits the
/// copy relocation that fills it at load time.
///
/// The aliases matter: if `environ` and `__environ` share an address in the
/// DSO, copying one but not the other would tear them apart at runtime.
fn add_copy_rel_symbol(ctx: &mut LinkContext, sym_id: SymbolId) -> Result {
    let sym = ctx.symbols.get(sym_id);
    let SymbolPlacement::Shared { alignment } = sym.placement else {
        return Ok(());
    };
    let size = sym.size;
    crate::ensure!(
        size != 0 && alignment != 0,
        "cannot create a copy relocation for symbol {}",
        ctx.symbol_name_for_display(sym_id)
    );

    // Preserve the symbol's memory protection: bytes that were read-only in
    // the DSO go into the relro reservation.
    let read_only = is_read_only_in_dso(ctx, sym_id);
    let (chunk, offset) = if read_only {
        ctx.synthetic.bss_rel_ro.reserve(size, alignment)
    } else {
        ctx.synthetic.bss.reserve(size, alignment)
    };
    let place = if read_only {
        Place::BssRelRo { chunk }
    } else {
        Place::Bss { chunk }
    };

    let value = ctx.symbols.get(sym_id).value;
    let file = ctx.symbols.get(sym_id).file;
    let alias_ids: Vec<SymbolId> = match file {
        Some(file) => ctx
            .file(file)
            .symbols
            .iter()
            .copied()
            .filter(|&id| {
                let alias = ctx.symbols.get(id);
                alias.is_shared() && !alias.is_tls() && alias.value == value
            })
            .collect(),
        None => vec![sym_id],
    };

    for alias_id in alias_ids {
        let alias_size = ctx.symbols.get(alias_id).size;
        ctx.symbols
            .get_mut(alias_id)
            .replace_with_defined(place, offset, alias_size);
    }

    let copy = ctx.target.dyn_reloc_type(DynRelocType::Copy);
    ctx.synthetic
        .rela_dyn
        .add_symbol_reloc(copy, place, offset, sym_id, 0);
    Ok(())
}

/// Scans the origin DSO's loadable segments to see whether the symbol's
/// bytes live in read-only memory there.
fn is_read_only_in_dso(ctx: &LinkContext, sym_id: SymbolId) -> bool {
    let sym = ctx.symbols.get(sym_id);
    let Some(file) = sym.file else {
        return false;
    };
    ctx.file(file).segments.iter().any(|segment| {
        !segment.writable
            && sym.value >= segment.vaddr
            && sym.value < segment.vaddr + segment.memsz
    })
}

/// Re-exported entry point matching the writer's view: scan every section
/// of every file that has relocations.
pub fn scan_all(ctx: &mut LinkContext) -> Result {
    for index in 0..ctx.sections.len() {
        let sec_id = SectionId::from_usize(index);
        if ctx.section(sec_id).raw_relocs.is_empty() {
            continue;
        }
        scan_relocations(ctx, sec_id)?;
    }
    Ok(())
}

/// Post-scan sweep for Hexagon: general-dynamic TLS calls lower to plain
/// calls to the TLS runtime, which needs a PLT entry the moment the first
/// such call exists.
pub fn hexagon_needs_tls_symbol(ctx: &LinkContext) -> bool {
    ctx.sections.iter().any(|section| {
        section.relocations.iter().any(|rel| {
            ctx.symbols.get(rel.sym).is_tls() && rel.expr == RelExpr::PltPc
        })
    })
}

/// Rebinds Hexagon GD-PLT calls to the TLS runtime entry point.
pub fn hexagon_tls_symbol_update(ctx: &mut LinkContext) {
    let Some(tls_get_addr) = ctx.symbols.find("__tls_get_addr") else {
        return;
    };
    let mut needs_entry = true;
    for index in 0..ctx.sections.len() {
        let sec_id = SectionId::from_usize(index);
        for rel_index in 0..ctx.section(sec_id).relocations.len() {
            let rel = ctx.section(sec_id).relocations[rel_index];
            if ctx.symbols.get(rel.sym).is_tls() && rel.expr == RelExpr::PltPc {
                if needs_entry {
                    add_plt_entry(ctx, tls_get_addr);
                    needs_entry = false;
                }
                ctx.section_mut(sec_id).relocations[rel_index].sym = tls_get_addr;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::OutputKind;
    use crate::args::UnresolvedPolicy;
    use crate::symbol::Binding;
    use crate::symbol::SymbolKind;
    use crate::synthetic::DynRelocKind;
    use crate::test_utils::*;
    use object::elf;

    #[test]
    fn pc_relative_to_local_symbol_in_pie_stays_static() {
        let mut ctx = x86_64_ctx(OutputKind::PieExecutable);
        let file = add_object(&mut ctx, "a.o");
        let sec = text_section(&mut ctx, file, ".text");
        let (sym, index) = defined_symbol(
            &mut ctx,
            file,
            "helper",
            sec,
            0x40,
            SymbolKind::Func,
            Binding::Local,
        );

        push_raw(&mut ctx, sec, 0x10, elf::R_X86_64_PC32, index, -4);
        scan_relocations(&mut ctx, sec).unwrap();

        let records = &ctx.section(sec).relocations;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].expr, RelExpr::Relative);
        assert_eq!(records[0].offset, 0x10);
        assert!(ctx.synthetic.rela_dyn.relocs.is_empty());
        assert_eq!(ctx.synthetic.got.num_slots(), 0);
        assert!(!ctx.symbols.get(sym).is_in_got);
    }

    #[test]
    fn absolute_to_preemptible_symbol_in_shared_needs_dynamic_reloc() {
        let mut ctx = x86_64_ctx(OutputKind::SharedObject);
        let file = add_object(&mut ctx, "a.o");
        let data = data_section(&mut ctx, file, ".data");
        let (sym, index) = defined_symbol(
            &mut ctx,
            file,
            "global_var",
            data,
            0,
            SymbolKind::Object,
            Binding::Global,
        );
        ctx.symbols.get_mut(sym).is_preemptible = true;

        push_raw(&mut ctx, data, 0x10, elf::R_X86_64_64, index, 5);
        scan_relocations(&mut ctx, data).unwrap();

        let relocs = &ctx.synthetic.rela_dyn.relocs;
        assert_eq!(relocs.len(), 1);
        assert_eq!(relocs[0].r_type, elf::R_X86_64_64);
        assert_eq!(relocs[0].kind, DynRelocKind::AgainstSymbol);
        assert_eq!(relocs[0].sym, Some(sym));
        assert_eq!(relocs[0].offset, 0x10);
        assert_eq!(relocs[0].addend, 5);

        let records = &ctx.section(data).relocations;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].expr, RelExpr::Absolute);
        assert_eq!(records[0].offset, 0x10);
        assert_eq!(ctx.synthetic.got.num_slots(), 0);
    }

    #[test]
    fn copy_relocation_rebinds_every_alias_at_the_same_address() {
        let mut ctx = x86_64_ctx(OutputKind::DynamicExecutable);
        let file = add_object(&mut ctx, "a.o");
        let sec = text_section(&mut ctx, file, ".text");
        let dso = add_dso(&mut ctx, "libfoo.so");
        // Three names for the same 24 bytes of writable DSO data.
        let (foo, _) = shared_symbol(&mut ctx, dso, "foo", 0x1010, 24, 8, SymbolKind::Object);
        let (bar, _) = shared_symbol(&mut ctx, dso, "bar", 0x1010, 24, 8, SymbolKind::Object);
        let (baz, _) = shared_symbol(&mut ctx, dso, "baz", 0x1010, 24, 8, SymbolKind::Object);
        ctx.file_mut(file).symbols.push(foo);
        let index = (ctx.file(file).symbols.len() - 1) as u32;

        push_raw(&mut ctx, sec, 0, elf::R_X86_64_64, index, 0);
        scan_relocations(&mut ctx, sec).unwrap();

        assert_eq!(ctx.synthetic.bss.chunks.len(), 1);
        assert_eq!(ctx.synthetic.bss.chunks[0].size, 24);
        for sym in [foo, bar, baz] {
            let sym = ctx.symbols.get(sym);
            assert!(sym.is_defined());
            assert_eq!(sym.value, 0);
            assert!(matches!(
                sym.placement,
                crate::symbol::SymbolPlacement::Defined {
                    place: Some(Place::Bss { chunk: 0 })
                }
            ));
            assert!(sym.export_dynamic);
        }
        let copies: Vec<_> = ctx
            .synthetic
            .rela_dyn
            .relocs
            .iter()
            .filter(|r| r.r_type == elf::R_X86_64_COPY)
            .collect();
        assert_eq!(copies.len(), 1);
        assert_eq!(copies[0].sym, Some(foo));
        assert_eq!(ctx.section(sec).relocations.len(), 1);
    }

    #[test]
    fn copy_relocation_for_read_only_data_uses_the_relro_reservation() {
        let mut ctx = x86_64_ctx(OutputKind::DynamicExecutable);
        let file = add_object(&mut ctx, "a.o");
        let sec = text_section(&mut ctx, file, ".text");
        let dso = add_dso(&mut ctx, "libro.so");
        let (sym, _) = shared_symbol(&mut ctx, dso, "ro_table", 0x10, 16, 8, SymbolKind::Object);
        ctx.file_mut(file).symbols.push(sym);
        let index = (ctx.file(file).symbols.len() - 1) as u32;

        push_raw(&mut ctx, sec, 0, elf::R_X86_64_64, index, 0);
        scan_relocations(&mut ctx, sec).unwrap();

        assert!(ctx.synthetic.bss.chunks.is_empty());
        assert_eq!(ctx.synthetic.bss_rel_ro.chunks.len(), 1);
        assert!(matches!(
            ctx.symbols.get(sym).placement,
            crate::symbol::SymbolPlacement::Defined {
                place: Some(Place::BssRelRo { chunk: 0 })
            }
        ));
    }

    #[test]
    fn zero_sized_copy_relocation_is_fatal() {
        let mut ctx = x86_64_ctx(OutputKind::DynamicExecutable);
        let file = add_object(&mut ctx, "a.o");
        let sec = text_section(&mut ctx, file, ".text");
        let dso = add_dso(&mut ctx, "libzero.so");
        let (sym, _) = shared_symbol(&mut ctx, dso, "empty", 0x1010, 0, 8, SymbolKind::Object);
        ctx.file_mut(file).symbols.push(sym);
        let index = (ctx.file(file).symbols.len() - 1) as u32;

        push_raw(&mut ctx, sec, 0, elf::R_X86_64_64, index, 0);
        let result = scan_relocations(&mut ctx, sec);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("copy relocation"));
    }

    #[test]
    fn got_allocation_is_idempotent_across_references() {
        let mut ctx = x86_64_ctx(OutputKind::SharedObject);
        let file = add_object(&mut ctx, "a.o");
        let sec = text_section(&mut ctx, file, ".text");
        let data = data_section(&mut ctx, file, ".data");
        let (sym, index) = defined_symbol(
            &mut ctx,
            file,
            "val",
            data,
            0,
            SymbolKind::Object,
            Binding::Global,
        );
        ctx.symbols.get_mut(sym).is_preemptible = true;

        push_raw(&mut ctx, sec, 0, elf::R_X86_64_GOTPCREL, index, -4);
        push_raw(&mut ctx, sec, 8, elf::R_X86_64_GOTPCREL, index, -4);
        scan_relocations(&mut ctx, sec).unwrap();

        assert!(ctx.symbols.get(sym).is_in_got);
        assert_eq!(ctx.synthetic.got.num_slots(), 1);
        assert_eq!(ctx.synthetic.rela_dyn.relocs.len(), 1);
        assert_eq!(ctx.synthetic.rela_dyn.relocs[0].r_type, elf::R_X86_64_GLOB_DAT);
        assert_eq!(ctx.section(sec).relocations.len(), 2);
    }

    #[test]
    fn every_jump_slot_has_exactly_one_plt_entry() {
        let mut ctx = x86_64_ctx(OutputKind::SharedObject);
        ctx.args.unresolved_symbols = UnresolvedPolicy::Ignore;
        let file = add_object(&mut ctx, "a.o");
        let sec = text_section(&mut ctx, file, ".text");
        let (sym, index) = undefined_symbol(&mut ctx, file, "ext_fn", Binding::Global);
        ctx.symbols.get_mut(sym).kind = SymbolKind::Func;

        push_raw(&mut ctx, sec, 0, elf::R_X86_64_PLT32, index, -4);
        push_raw(&mut ctx, sec, 0x10, elf::R_X86_64_PLT32, index, -4);
        scan_relocations(&mut ctx, sec).unwrap();

        assert!(ctx.symbols.get(sym).is_in_plt);
        assert_eq!(ctx.symbols.get(sym).plt_index, Some(0));
        assert_eq!(ctx.synthetic.plt.num_entries(), 1);
        assert_eq!(ctx.synthetic.got_plt.num_entries(), 1);
        let jump_slots: Vec<_> = ctx
            .synthetic
            .rela_plt
            .relocs
            .iter()
            .filter(|r| r.r_type == elf::R_X86_64_JUMP_SLOT)
            .collect();
        assert_eq!(jump_slots.len(), 1);
        assert_eq!(jump_slots[0].sym, Some(sym));
        assert_eq!(ctx.section(sec).relocations.len(), 2);
    }

    #[test]
    fn thread_pointer_offsets_are_rejected_in_shared_output() {
        let mut ctx = x86_64_ctx(OutputKind::SharedObject);
        let file = add_object(&mut ctx, "a.o");
        let sec = text_section(&mut ctx, file, ".text");
        let data = data_section(&mut ctx, file, ".tdata");
        let (_, index) = defined_symbol(
            &mut ctx,
            file,
            "tls_var",
            data,
            0,
            SymbolKind::Tls,
            Binding::Local,
        );

        push_raw(&mut ctx, sec, 0, elf::R_X86_64_TPOFF32, index, 0);
        scan_relocations(&mut ctx, sec).unwrap();

        assert!(ctx.diagnostics.has_errors());
        let message = ctx.diagnostics.messages().next().unwrap();
        assert!(message.contains("cannot be used with -shared"));
        assert!(ctx.section(sec).relocations.is_empty());
    }

    #[test]
    fn non_pic_call_to_shared_function_gets_a_canonical_plt() {
        let mut ctx = x86_64_ctx(OutputKind::DynamicExecutable);
        let file = add_object(&mut ctx, "a.o");
        let sec = text_section(&mut ctx, file, ".text");
        let dso = add_dso(&mut ctx, "libc.so");
        let (sym, _) = shared_symbol(&mut ctx, dso, "puts", 0x20, 0, 1, SymbolKind::Func);
        ctx.file_mut(file).symbols.push(sym);
        let index = (ctx.file(file).symbols.len() - 1) as u32;

        push_raw(&mut ctx, sec, 0, elf::R_X86_64_PC32, index, -4);
        scan_relocations(&mut ctx, sec).unwrap();

        let rebound = ctx.symbols.get(sym);
        assert!(rebound.is_defined());
        assert!(rebound.needs_plt_addr);
        assert!(rebound.is_in_plt);
        // Entry 0 sits right after the PLT header.
        assert_eq!(rebound.value, 16);
        assert!(matches!(
            rebound.placement,
            crate::symbol::SymbolPlacement::Defined {
                place: Some(Place::Plt)
            }
        ));
        assert_eq!(ctx.synthetic.plt.num_entries(), 1);
        assert_eq!(ctx.synthetic.rela_plt.relocs.len(), 1);
        assert_eq!(ctx.section(sec).relocations.len(), 1);
    }

    #[test]
    fn direct_reference_makes_a_nonpreemptible_ifunc_canonical() {
        let mut ctx = x86_64_ctx(OutputKind::DynamicExecutable);
        let file = add_object(&mut ctx, "a.o");
        let text = text_section(&mut ctx, file, ".text");
        let data = data_section(&mut ctx, file, ".data");
        let (sym, index) = defined_symbol(
            &mut ctx,
            file,
            "fancy_memcpy",
            text,
            0x100,
            SymbolKind::IFunc,
            Binding::Local,
        );

        push_raw(&mut ctx, data, 0, elf::R_X86_64_64, index, 0);
        scan_relocations(&mut ctx, data).unwrap();

        let sym = ctx.symbols.get(sym);
        assert!(sym.is_in_iplt);
        assert_eq!(sym.kind, SymbolKind::Func);
        assert!(matches!(
            sym.placement,
            crate::symbol::SymbolPlacement::Defined {
                place: Some(Place::Iplt)
            }
        ));
        assert_eq!(ctx.synthetic.iplt.num_entries(), 1);
        assert_eq!(ctx.synthetic.rela_iplt.relocs.len(), 1);
        assert_eq!(
            ctx.synthetic.rela_iplt.relocs[0].r_type,
            elf::R_X86_64_IRELATIVE
        );
        assert_eq!(
            ctx.synthetic.rela_iplt.relocs[0].kind,
            DynRelocKind::AddendOnly
        );
    }

    #[test]
    fn got_reference_to_ifunc_promotes_on_later_direct_reference() {
        let mut ctx = x86_64_ctx(OutputKind::PieExecutable);
        let file = add_object(&mut ctx, "a.o");
        let text = text_section(&mut ctx, file, ".text");
        let data = data_section(&mut ctx, file, ".data");
        let (sym, index) = defined_symbol(
            &mut ctx,
            file,
            "resolved_fn",
            text,
            0x100,
            SymbolKind::IFunc,
            Binding::Local,
        );

        push_raw(&mut ctx, text, 0, elf::R_X86_64_GOTPCREL, index, -4);
        scan_relocations(&mut ctx, text).unwrap();
        assert!(ctx.symbols.get(sym).got_in_igot);
        assert_eq!(ctx.synthetic.got.num_slots(), 0);

        // The address-taken reference forces a real GOT entry holding the
        // canonical (ifunc-PLT) address.
        push_raw(&mut ctx, data, 0, elf::R_X86_64_64, index, 0);
        scan_relocations(&mut ctx, data).unwrap();
        assert!(!ctx.symbols.get(sym).got_in_igot);
        assert_eq!(ctx.synthetic.got.num_slots(), 1);
        assert_eq!(ctx.synthetic.iplt.num_entries(), 1);
    }

    #[test]
    fn relative_relocations_prefer_the_compact_encoding() {
        let mut ctx = x86_64_ctx(OutputKind::PieExecutable);
        ctx.args.pack_relative_relocs = true;
        let file = add_object(&mut ctx, "a.o");
        let data = data_section(&mut ctx, file, ".data");
        let (_, index) = defined_symbol(
            &mut ctx,
            file,
            "local_ptr_target",
            data,
            0,
            SymbolKind::Object,
            Binding::Local,
        );

        push_raw(&mut ctx, data, 0x10, elf::R_X86_64_64, index, 0);
        push_raw(&mut ctx, data, 0x21, elf::R_X86_64_64, index, 0);
        scan_relocations(&mut ctx, data).unwrap();

        let relr = ctx.synthetic.relr_dyn.as_ref().unwrap();
        assert_eq!(relr.relocs.len(), 1);
        assert_eq!(relr.relocs[0].1, 0x10);
        // The odd offset can't be packed and falls back to the general
        // section.
        let relatives: Vec<_> = ctx
            .synthetic
            .rela_dyn
            .relocs
            .iter()
            .filter(|r| r.kind == DynRelocKind::Relative)
            .collect();
        assert_eq!(relatives.len(), 1);
        assert_eq!(relatives[0].offset, 0x21);
        assert_eq!(ctx.section(data).relocations.len(), 2);
    }

    #[test]
    fn absolute_in_read_only_section_of_pie_is_an_error() {
        let mut ctx = x86_64_ctx(OutputKind::PieExecutable);
        let file = add_object(&mut ctx, "a.o");
        let sec = text_section(&mut ctx, file, ".text");
        let (_, index) = defined_symbol(
            &mut ctx,
            file,
            "target",
            sec,
            0x40,
            SymbolKind::Func,
            Binding::Local,
        );

        push_raw(&mut ctx, sec, 0, elf::R_X86_64_64, index, 0);
        scan_relocations(&mut ctx, sec).unwrap();

        assert!(ctx.diagnostics.has_errors());
        let message = ctx.diagnostics.messages().next().unwrap();
        assert!(message.contains("readonly segment"));
        assert!(message.contains("-fPIC"));
    }

    #[test]
    fn undefined_weak_resolves_statically_in_fixed_position_output() {
        let mut ctx = x86_64_ctx(OutputKind::DynamicExecutable);
        let file = add_object(&mut ctx, "a.o");
        let sec = text_section(&mut ctx, file, ".text");
        let (sym, index) = undefined_symbol(&mut ctx, file, "maybe_hook", Binding::Weak);
        ctx.symbols.get_mut(sym).is_preemptible = false;

        push_raw(&mut ctx, sec, 0, elf::R_X86_64_64, index, 0);
        scan_relocations(&mut ctx, sec).unwrap();

        assert_eq!(ctx.section(sec).relocations.len(), 1);
        assert!(ctx.synthetic.rela_dyn.relocs.is_empty());
        assert!(!ctx.diagnostics.has_errors());
        assert!(ctx.undefs.is_empty());
    }

    #[test]
    fn preemptible_reference_in_read_only_shared_section_errors_not_truncates() {
        let mut ctx = x86_64_ctx(OutputKind::SharedObject);
        let file = add_object(&mut ctx, "a.o");
        let sec = rodata_section(&mut ctx, file, ".rodata");
        let data = data_section(&mut ctx, file, ".data");
        let (sym, index) = defined_symbol(
            &mut ctx,
            file,
            "interposable",
            data,
            0,
            SymbolKind::NoType,
            Binding::Global,
        );
        ctx.symbols.get_mut(sym).is_preemptible = true;

        // No dynamic form exists for PC32, the section is read-only, and
        // the symbol may be interposed: the only correct outcome is a
        // diagnostic.
        push_raw(&mut ctx, sec, 0, elf::R_X86_64_PC32, index, -4);
        scan_relocations(&mut ctx, sec).unwrap();
        assert!(ctx.diagnostics.has_errors());
    }

    #[test]
    fn relocation_records_are_sorted_by_offset_on_riscv() {
        // The sort is keyed off the architecture; exercise the helper
        // directly with records appended out of order.
        let mut ctx = x86_64_ctx(OutputKind::DynamicExecutable);
        ctx.args.arch = crate::arch::Arch::RiscV64;
        let file = add_object(&mut ctx, "a.o");
        let sec = text_section(&mut ctx, file, ".text");
        let (_, index) = defined_symbol(
            &mut ctx,
            file,
            "x",
            sec,
            0,
            SymbolKind::Object,
            Binding::Local,
        );

        push_raw(&mut ctx, sec, 0x20, elf::R_X86_64_PC32, index, 0);
        push_raw(&mut ctx, sec, 0x10, elf::R_X86_64_PC32, index, 0);
        scan_relocations(&mut ctx, sec).unwrap();

        let offsets: Vec<u64> = ctx.section(sec).relocations.iter().map(|r| r.offset).collect();
        assert_eq!(offsets, vec![0x10, 0x20]);
    }
}
