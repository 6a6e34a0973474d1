//! The thread-local-storage decision tree. TLS access models form a ladder
//! from most general (general-dynamic, TLS descriptors) down to cheapest
//! (local-exec); when the output kind and the symbol's binding allow it, the
//! scanner rewrites an access to a cheaper rung instead of allocating the
//! slots the general form would need.

use crate::context::LinkContext;
use crate::expr::RelExpr;
use crate::section::Relocation;
use crate::section::SectionId;
use crate::symbol::Place;
use crate::symbol::SymbolId;
use crate::target::DynRelocType;

/// Handles one TLS relocation. Returns 0 if the relocation is not TLS-shaped
/// and the caller should continue down the general path; otherwise returns
/// how many raw records were consumed (relaxed sequences swallow the
/// follow-up records that described the call to the TLS runtime).
pub(crate) fn handle_tls_relocation(
    ctx: &mut LinkContext,
    r_type: u32,
    sym_id: SymbolId,
    sec_id: SectionId,
    offset: u64,
    addend: i64,
    expr: RelExpr,
) -> usize {
    if !ctx.symbols.get(sym_id).is_tls() {
        return 0;
    }

    if ctx.args.arch.is_mips() {
        return handle_mips_tls_relocation(ctx, r_type, sym_id, sec_id, offset, addend, expr);
    }

    let record = Relocation {
        expr,
        r_type,
        offset,
        addend,
        sym: sym_id,
    };
    let preemptible = ctx.symbols.get(sym_id).is_preemptible;

    // TLS descriptors in a shared object stay descriptors; the pair of
    // slots is filled by the runtime loader.
    if matches!(
        expr,
        RelExpr::TlsDescPagePc | RelExpr::TlsDesc | RelExpr::TlsDescCall | RelExpr::TlsDescPc
    ) && ctx.args.is_shared()
    {
        let (slot, added) = ctx.synthetic.got.add_dyn_tls_entry(sym_id);
        if added {
            let desc_type = ctx.target.dyn_reloc_type(DynRelocType::TlsDesc);
            ctx.synthetic.rela_dyn.add_reloc_against_sym_or_addend(
                desc_type,
                Place::Got,
                slot,
                sym_id,
                preemptible,
            );
        }
        if expr != RelExpr::TlsDescCall {
            ctx.section_mut(sec_id).relocations.push(record);
        }
        return 1;
    }

    let file_blocks_relax = ctx
        .section(sec_id)
        .file
        .is_some_and(|f| ctx.file(f).ppc64_disable_tls_relax);
    let to_exec_relax =
        !ctx.args.is_shared() && ctx.args.arch.supports_tls_relaxation() && !file_blocks_relax;

    // Capability-table TLS accesses have no relaxed forms at all.
    if expr == RelExpr::CapTableTlsGd {
        if let Some(cap_table) = ctx.synthetic.cap_table.as_mut() {
            cap_table.add_dyn_tls_entry(sym_id);
        }
        ctx.section_mut(sec_id).relocations.push(record);
        return 1;
    }
    if expr == RelExpr::CapTableTlsIe {
        if let Some(cap_table) = ctx.synthetic.cap_table.as_mut() {
            cap_table.add_tls_entry(sym_id);
        }
        ctx.section_mut(sec_id).relocations.push(record);
        return 1;
    }

    // In an executable, a non-preemptible TLS symbol is known to live in the
    // module itself, so the module index is always 1 and offsets are final.
    let is_local_in_executable = !preemptible && !ctx.args.is_shared();
    let symbolic = ctx.target.dyn_reloc_type(DynRelocType::Symbolic);

    // Local-dynamic: one shared module-index pair for the whole module.
    if matches!(
        expr,
        RelExpr::TlsLdGot | RelExpr::TlsLdGotPlt | RelExpr::TlsLdPc | RelExpr::TlsLdHint
    ) {
        if to_exec_relax {
            let relaxed = ctx.target.adjust_tls_expr(r_type, RelExpr::RelaxTlsLdToLe);
            ctx.section_mut(sec_id).relocations.push(Relocation {
                expr: relaxed,
                ..record
            });
            return ctx.target.tls_gd_relax_skip(r_type);
        }
        if expr == RelExpr::TlsLdHint {
            return 1;
        }
        let (slot, added) = ctx.synthetic.got.add_tls_index();
        if added {
            if is_local_in_executable {
                // The module index of the executable itself is always 1.
                ctx.synthetic.got.relocations.push(Relocation {
                    expr: RelExpr::Addend,
                    r_type: symbolic,
                    offset: slot,
                    addend: 1,
                    sym: sym_id,
                });
            } else {
                let module_index = ctx.target.dyn_reloc_type(DynRelocType::TlsModuleIndex);
                ctx.synthetic.rela_dyn.add_reloc(crate::synthetic::DynReloc {
                    r_type: module_index,
                    kind: crate::synthetic::DynRelocKind::AddendOnly,
                    place: Place::Got,
                    offset: slot,
                    sym: None,
                    addend: 0,
                });
            }
        }
        ctx.section_mut(sec_id).relocations.push(record);
        return 1;
    }

    if expr == RelExpr::DtpRel && to_exec_relax {
        let relaxed = ctx.target.adjust_tls_expr(r_type, RelExpr::RelaxTlsLdToLe);
        ctx.section_mut(sec_id).relocations.push(Relocation {
            expr: relaxed,
            ..record
        });
        return 1;
    }

    // Local-dynamic with the variable's dtp offset held in the GOT. The
    // offset is a link-time constant but the slot still has to exist.
    if expr == RelExpr::TlsLdGotOff {
        if !ctx.symbols.get(sym_id).is_in_got {
            let slot = ctx.synthetic.got.add_entry(sym_id);
            let sym = ctx.symbols.get_mut(sym_id);
            sym.is_in_got = true;
            sym.got_index = Some((slot / ctx.args.wordsize) as u32);
            let tls_offset = ctx.target.dyn_reloc_type(DynRelocType::TlsOffset);
            ctx.synthetic.got.relocations.push(Relocation {
                expr: RelExpr::Absolute,
                r_type: tls_offset,
                offset: slot,
                addend: 0,
                sym: sym_id,
            });
        }
        ctx.section_mut(sec_id).relocations.push(record);
        return 1;
    }

    // General-dynamic and TLS descriptors outside shared output.
    if matches!(
        expr,
        RelExpr::TlsDescPagePc
            | RelExpr::TlsDesc
            | RelExpr::TlsDescCall
            | RelExpr::TlsDescPc
            | RelExpr::TlsGdGot
            | RelExpr::TlsGdGotPlt
            | RelExpr::TlsGdPc
    ) {
        if !to_exec_relax {
            let (slot, added) = ctx.synthetic.got.add_dyn_tls_entry(sym_id);
            if added {
                if is_local_in_executable {
                    ctx.synthetic.got.relocations.push(Relocation {
                        expr: RelExpr::Addend,
                        r_type: symbolic,
                        offset: slot,
                        addend: 1,
                        sym: sym_id,
                    });
                } else {
                    let module_index = ctx.target.dyn_reloc_type(DynRelocType::TlsModuleIndex);
                    ctx.synthetic.rela_dyn.add_symbol_reloc(
                        module_index,
                        Place::Got,
                        slot,
                        sym_id,
                        0,
                    );
                }

                // The second slot of the pair holds the symbol's offset in
                // its module's TLS block. Preemptible symbols defer it to
                // the loader; everyone else gets it written at link time.
                let offset_slot = slot + ctx.args.wordsize;
                let tls_offset = ctx.target.dyn_reloc_type(DynRelocType::TlsOffset);
                if preemptible {
                    ctx.synthetic.rela_dyn.add_symbol_reloc(
                        tls_offset,
                        Place::Got,
                        offset_slot,
                        sym_id,
                        0,
                    );
                } else {
                    ctx.synthetic.got.relocations.push(Relocation {
                        expr: RelExpr::Absolute,
                        r_type: tls_offset,
                        offset: offset_slot,
                        addend: 0,
                        sym: sym_id,
                    });
                }
            }
            ctx.section_mut(sec_id).relocations.push(record);
            return 1;
        }

        // Relaxing: a preemptible symbol can only drop to initial-exec (its
        // offset is still the loader's business); a local one goes straight
        // to local-exec.
        if preemptible {
            let relaxed = ctx.target.adjust_tls_expr(r_type, RelExpr::RelaxTlsGdToIe);
            ctx.section_mut(sec_id).relocations.push(Relocation {
                expr: relaxed,
                ..record
            });
            if !ctx.symbols.get(sym_id).is_in_got {
                let slot = ctx.synthetic.got.add_entry(sym_id);
                let sym = ctx.symbols.get_mut(sym_id);
                sym.is_in_got = true;
                sym.got_index = Some((slot / ctx.args.wordsize) as u32);
                let tls_got = ctx.target.dyn_reloc_type(DynRelocType::TlsGot);
                ctx.synthetic
                    .rela_dyn
                    .add_symbol_reloc(tls_got, Place::Got, slot, sym_id, 0);
            }
        } else {
            let relaxed = ctx.target.adjust_tls_expr(r_type, RelExpr::RelaxTlsGdToLe);
            ctx.section_mut(sec_id).relocations.push(Relocation {
                expr: relaxed,
                ..record
            });
        }
        return ctx.target.tls_gd_relax_skip(r_type);
    }

    // Initial-exec reads its slot through ordinary GOT expressions; when the
    // symbol is local to an executable the load can become a constant.
    if matches!(
        expr,
        RelExpr::Got
            | RelExpr::GotPlt
            | RelExpr::GotPc
            | RelExpr::GotPagePc
            | RelExpr::GotOff
            | RelExpr::TlsIeHint
    ) && to_exec_relax
        && is_local_in_executable
    {
        ctx.section_mut(sec_id).relocations.push(Relocation {
            expr: RelExpr::RelaxTlsIeToLe,
            ..record
        });
        return 1;
    }

    if expr == RelExpr::TlsIeHint {
        return 1;
    }
    0
}

/// MIPS has no TLS relaxations, and its GOT writes TLS slots through the
/// dedicated MIPS GOT; keeping the MIPS ladder separate keeps the main one
/// readable.
fn handle_mips_tls_relocation(
    ctx: &mut LinkContext,
    r_type: u32,
    sym_id: SymbolId,
    sec_id: SectionId,
    offset: u64,
    addend: i64,
    expr: RelExpr,
) -> usize {
    let record = Relocation {
        expr,
        r_type,
        offset,
        addend,
        sym: sym_id,
    };
    let file = ctx.section(sec_id).file;

    match expr {
        RelExpr::MipsTlsLd => {
            if let (Some(mips_got), Some(file)) = (ctx.synthetic.mips_got.as_mut(), file) {
                mips_got.add_tls_index(file);
            }
        }
        RelExpr::MipsTlsGd => {
            if let (Some(mips_got), Some(file)) = (ctx.synthetic.mips_got.as_mut(), file) {
                mips_got.add_dyn_tls_entry(file, sym_id);
            }
        }
        RelExpr::MipsCapTableTlsLd => {
            if let Some(cap_table) = ctx.synthetic.cap_table.as_mut() {
                cap_table.add_tls_index();
            }
        }
        RelExpr::MipsCapTableTlsGd => {
            if let Some(cap_table) = ctx.synthetic.cap_table.as_mut() {
                cap_table.add_dyn_tls_entry(sym_id);
            }
        }
        RelExpr::MipsCapTableTpRel => {
            if let Some(cap_table) = ctx.synthetic.cap_table.as_mut() {
                cap_table.add_tls_entry(sym_id);
            }
        }
        _ => return 0,
    }
    ctx.section_mut(sec_id).relocations.push(record);
    1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::OutputKind;
    use crate::scan::scan_relocations;
    use crate::symbol::Binding;
    use crate::symbol::SymbolKind;
    use crate::synthetic::DynRelocKind;
    use crate::test_utils::*;
    use object::elf;

    #[test]
    fn local_dynamic_relaxes_to_local_exec_in_executable() {
        let mut ctx = x86_64_ctx(OutputKind::DynamicExecutable);
        let file = add_object(&mut ctx, "a.o");
        let sec = text_section(&mut ctx, file, ".text");
        let data = data_section(&mut ctx, file, ".tdata");
        let (_, tls_index) = defined_symbol(
            &mut ctx,
            file,
            "tls_var",
            data,
            0,
            SymbolKind::Tls,
            Binding::Local,
        );
        let (_, helper_index) = undefined_symbol(&mut ctx, file, "__tls_get_addr", Binding::Global);

        // The GD/LD sequence is two records: the slot reference and the
        // call into the TLS runtime. Relaxation consumes both.
        push_raw(&mut ctx, sec, 0, elf::R_X86_64_TLSLD, tls_index, -4);
        push_raw(&mut ctx, sec, 8, elf::R_X86_64_PLT32, helper_index, -4);
        scan_relocations(&mut ctx, sec).unwrap();

        let records = &ctx.section(sec).relocations;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].expr, RelExpr::RelaxTlsLdToLe);
        assert_eq!(records[0].offset, 0);
        assert!(ctx.synthetic.got.tls_index_offset().is_none());
        assert_eq!(ctx.synthetic.got.num_slots(), 0);
        assert!(!ctx.diagnostics.has_errors());
    }

    #[test]
    fn local_dynamic_in_shared_allocates_one_module_index_pair() {
        let mut ctx = x86_64_ctx(OutputKind::SharedObject);
        let file = add_object(&mut ctx, "a.o");
        let sec = text_section(&mut ctx, file, ".text");
        let data = data_section(&mut ctx, file, ".tdata");
        let (_, tls_index) = defined_symbol(
            &mut ctx,
            file,
            "tls_var",
            data,
            0,
            SymbolKind::Tls,
            Binding::Local,
        );

        push_raw(&mut ctx, sec, 0, elf::R_X86_64_TLSLD, tls_index, -4);
        push_raw(&mut ctx, sec, 0x20, elf::R_X86_64_TLSLD, tls_index, -4);
        scan_relocations(&mut ctx, sec).unwrap();

        // One shared pair regardless of how many accesses.
        assert_eq!(ctx.synthetic.got.num_slots(), 2);
        assert_eq!(ctx.synthetic.rela_dyn.relocs.len(), 1);
        let module_index = &ctx.synthetic.rela_dyn.relocs[0];
        assert_eq!(module_index.r_type, elf::R_X86_64_DTPMOD64);
        assert_eq!(module_index.kind, DynRelocKind::AddendOnly);
        assert!(module_index.sym.is_none());
        assert_eq!(ctx.section(sec).relocations.len(), 2);
    }

    #[test]
    fn general_dynamic_in_shared_emits_module_and_offset_relocs() {
        let mut ctx = x86_64_ctx(OutputKind::SharedObject);
        let file = add_object(&mut ctx, "a.o");
        let sec = text_section(&mut ctx, file, ".text");
        let data = data_section(&mut ctx, file, ".tdata");
        let (sym, index) = defined_symbol(
            &mut ctx,
            file,
            "tls_var",
            data,
            0,
            SymbolKind::Tls,
            Binding::Global,
        );
        ctx.symbols.get_mut(sym).is_preemptible = true;

        push_raw(&mut ctx, sec, 0, elf::R_X86_64_TLSGD, index, -4);
        scan_relocations(&mut ctx, sec).unwrap();

        assert_eq!(ctx.synthetic.got.num_slots(), 2);
        let relocs = &ctx.synthetic.rela_dyn.relocs;
        assert_eq!(relocs.len(), 2);
        assert_eq!(relocs[0].r_type, elf::R_X86_64_DTPMOD64);
        assert_eq!(relocs[0].sym, Some(sym));
        assert_eq!(relocs[1].r_type, elf::R_X86_64_DTPOFF64);
        assert_eq!(relocs[1].offset, relocs[0].offset + 8);
        assert_eq!(ctx.section(sec).relocations.len(), 1);
        assert_eq!(ctx.section(sec).relocations[0].expr, RelExpr::TlsGdGot);
    }

    #[test]
    fn general_dynamic_relaxes_per_symbol_binding() {
        // Local symbol in an executable: straight to local-exec.
        let mut ctx = x86_64_ctx(OutputKind::DynamicExecutable);
        let file = add_object(&mut ctx, "a.o");
        let sec = text_section(&mut ctx, file, ".text");
        let data = data_section(&mut ctx, file, ".tdata");
        let (_, local_index) = defined_symbol(
            &mut ctx,
            file,
            "local_tls",
            data,
            0,
            SymbolKind::Tls,
            Binding::Local,
        );
        let (_, helper) = undefined_symbol(&mut ctx, file, "__tls_get_addr", Binding::Global);
        push_raw(&mut ctx, sec, 0, elf::R_X86_64_TLSGD, local_index, -4);
        push_raw(&mut ctx, sec, 8, elf::R_X86_64_PLT32, helper, -4);
        scan_relocations(&mut ctx, sec).unwrap();
        assert_eq!(ctx.section(sec).relocations.len(), 1);
        assert_eq!(
            ctx.section(sec).relocations[0].expr,
            RelExpr::RelaxTlsGdToLe
        );
        assert_eq!(ctx.synthetic.got.num_slots(), 0);

        // Preemptible symbol in an executable: down to initial-exec, which
        // still needs a slot the loader fills.
        let mut ctx = x86_64_ctx(OutputKind::DynamicExecutable);
        let file = add_object(&mut ctx, "b.o");
        let sec = text_section(&mut ctx, file, ".text");
        let dso = add_dso(&mut ctx, "libtls.so");
        let (shared, _) = shared_symbol(&mut ctx, dso, "shared_tls", 0x10, 8, 8, SymbolKind::Tls);
        ctx.file_mut(file).symbols.push(shared);
        let index = (ctx.file(file).symbols.len() - 1) as u32;
        let (_, helper) = undefined_symbol(&mut ctx, file, "__tls_get_addr", Binding::Global);
        push_raw(&mut ctx, sec, 0, elf::R_X86_64_TLSGD, index, -4);
        push_raw(&mut ctx, sec, 8, elf::R_X86_64_PLT32, helper, -4);
        scan_relocations(&mut ctx, sec).unwrap();
        assert_eq!(ctx.section(sec).relocations.len(), 1);
        assert_eq!(
            ctx.section(sec).relocations[0].expr,
            RelExpr::RelaxTlsGdToIe
        );
        assert_eq!(ctx.synthetic.got.num_slots(), 1);
        assert_eq!(ctx.synthetic.rela_dyn.relocs.len(), 1);
        assert_eq!(ctx.synthetic.rela_dyn.relocs[0].r_type, elf::R_X86_64_TPOFF64);
        assert!(ctx.symbols.get(shared).is_in_got);
    }

    #[test]
    fn initial_exec_relaxes_to_local_exec_for_local_symbols() {
        let mut ctx = x86_64_ctx(OutputKind::DynamicExecutable);
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
        push_raw(&mut ctx, sec, 0, elf::R_X86_64_GOTTPOFF, index, -4);
        scan_relocations(&mut ctx, sec).unwrap();

        assert_eq!(ctx.section(sec).relocations.len(), 1);
        assert_eq!(ctx.section(sec).relocations[0].expr, RelExpr::RelaxTlsIeToLe);
        assert_eq!(ctx.synthetic.got.num_slots(), 0);
    }

    #[test]
    fn initial_exec_in_shared_keeps_the_got_slot() {
        let mut ctx = x86_64_ctx(OutputKind::SharedObject);
        let file = add_object(&mut ctx, "a.o");
        let sec = text_section(&mut ctx, file, ".text");
        let data = data_section(&mut ctx, file, ".tdata");
        let (sym, index) = defined_symbol(
            &mut ctx,
            file,
            "tls_var",
            data,
            0,
            SymbolKind::Tls,
            Binding::Global,
        );
        ctx.symbols.get_mut(sym).is_preemptible = true;

        push_raw(&mut ctx, sec, 0, elf::R_X86_64_GOTTPOFF, index, -4);
        scan_relocations(&mut ctx, sec).unwrap();

        assert_eq!(ctx.synthetic.got.num_slots(), 1);
        assert_eq!(ctx.synthetic.rela_dyn.relocs.len(), 1);
        assert_eq!(ctx.synthetic.rela_dyn.relocs[0].r_type, elf::R_X86_64_TPOFF64);
        assert_eq!(ctx.synthetic.rela_dyn.relocs[0].kind, DynRelocKind::AgainstSymbol);
        // The record itself stays GOT-shaped.
        assert_eq!(ctx.section(sec).relocations[0].expr, RelExpr::GotPc);
    }

    #[test]
    fn tls_descriptors_stay_descriptors_in_shared_output() {
        let mut ctx = x86_64_ctx(OutputKind::SharedObject);
        let file = add_object(&mut ctx, "a.o");
        let sec = text_section(&mut ctx, file, ".text");
        let data = data_section(&mut ctx, file, ".tdata");
        let (sym, index) = defined_symbol(
            &mut ctx,
            file,
            "tls_var",
            data,
            0,
            SymbolKind::Tls,
            Binding::Global,
        );
        ctx.symbols.get_mut(sym).is_preemptible = true;

        push_raw(&mut ctx, sec, 0, elf::R_X86_64_GOTPC32_TLSDESC, index, -4);
        push_raw(&mut ctx, sec, 8, elf::R_X86_64_TLSDESC_CALL, index, 0);
        scan_relocations(&mut ctx, sec).unwrap();

        // Descriptor pair allocated once; the call marker leaves no record.
        assert_eq!(ctx.synthetic.got.num_slots(), 2);
        assert_eq!(ctx.synthetic.rela_dyn.relocs.len(), 1);
        assert_eq!(ctx.synthetic.rela_dyn.relocs[0].r_type, elf::R_X86_64_TLSDESC);
        assert_eq!(ctx.section(sec).relocations.len(), 1);
        assert_eq!(ctx.section(sec).relocations[0].expr, RelExpr::TlsDescPc);
    }
}
