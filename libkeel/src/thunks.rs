//! Range-extension trampolines. When a branch cannot reach its target, the
//! linker fabricates a small code fragment ("thunk") within reach of the
//! caller that forwards to the real destination, and redirects the branch
//! at it.
//!
//! The hard part is placement: inserting a trampoline moves everything
//! after it, which can push other just-in-range branches out of range. The
//! placer therefore runs in passes until no address changes. Pass 0
//! pre-creates empty trampoline sections at target-chosen intervals so most
//! branches find a home without disturbing the layout much; trampolines
//! that fit nowhere pre-created get a new section right next to the caller.

use crate::bail;
use crate::context::LinkContext;
use crate::error::Result;
use crate::expr::from_plt;
use crate::expr::to_plt;
use crate::output::IsdMember;
use crate::output::OutputSectionId;
use crate::output::ThunkSectionId;
use crate::section::Relocation;
use crate::section::SectionId;
use crate::symbol::Binding;
use crate::symbol::Place;
use crate::symbol::Symbol;
use crate::symbol::SymbolId;
use crate::symbol::SymbolKind;
use crate::symbol::SymbolPlacement;
use hashbrown::HashMap;

const THUNK_ALIGNMENT: u64 = 4;
/// Errata-sensitive code cares about addresses modulo this.
const ERRATA_PAGE: u64 = 4096;

#[derive(Debug)]
pub struct Thunk {
    /// The branch target the trampoline forwards to.
    pub destination: SymbolId,
    /// The original branch addend, restored if the redirection is undone.
    pub addend: i64,
    /// The trampoline's own entry symbol; redirected branches point here.
    pub entry_sym: SymbolId,
    pub size: u64,
    /// Trampolines that must sit immediately before a particular section.
    pub must_precede: Option<SectionId>,
    pub offset: u64,
    pub section: Option<ThunkSectionId>,
}

#[derive(Debug)]
pub struct ThunkSection {
    pub osec: OutputSectionId,
    pub out_sec_off: u64,
    pub partition: u8,
    pub thunks: Vec<usize>,
    pub size: u64,
    /// Keep the section's size a whole number of 4 KiB pages so errata
    /// patches keyed to addresses modulo 4 KiB survive later passes.
    pub round_up_for_errata: bool,
    pub target_input_section: Option<SectionId>,
}

/// Placement state across passes.
#[derive(Debug, Default)]
pub struct ThunkCreator {
    pass: u32,
    pub thunks: Vec<Thunk>,
    pub thunk_sections: Vec<ThunkSection>,

    /// Trampolines keyed by normalised destination. Keying defined symbols
    /// by `(section, value)` lets aliases and folded-identical sections
    /// share one trampoline.
    thunked_by_section: HashMap<(SectionId, u64, i64), Vec<usize>>,
    thunked_by_symbol: HashMap<(SymbolId, i64), Vec<usize>>,

    /// Entry symbol → trampoline, for recognising already-redirected
    /// branches on later passes.
    thunk_for_entry: HashMap<SymbolId, usize>,

    /// Must-precede target section → its trampoline section.
    sections_with_leading_thunks: HashMap<SectionId, ThunkSectionId>,
}

impl ThunkCreator {
    /// Runs one placement pass. Returns true if any address changed, in
    /// which case the caller must reassign addresses and run another pass.
    pub fn create_thunks(&mut self, ctx: &mut LinkContext) -> Result<bool> {
        let mut addresses_changed = false;

        if self.pass == 0 && ctx.target.thunk_section_spacing().is_some() {
            self.create_initial_thunk_sections(ctx);
        }

        for osec_index in 0..ctx.output_sections.len() {
            let osec_id = OutputSectionId::from_usize(osec_index);
            if !ctx.output_section(osec_id).is_executable() {
                continue;
            }
            for isd_index in 0..ctx.output_section(osec_id).descriptions.len() {
                let sec_ids: Vec<SectionId> = ctx.output_sections[osec_index].descriptions
                    [isd_index]
                    .section_ids()
                    .collect();
                for sec_id in sec_ids {
                    self.scan_section_branches(ctx, osec_id, isd_index, sec_id)?;
                }
            }
        }

        for ts_index in 0..self.thunk_sections.len() {
            addresses_changed |= self.assign_offsets(ctx, ts_index);
        }

        self.merge_thunks(ctx);
        self.pass += 1;
        Ok(addresses_changed)
    }

    fn scan_section_branches(
        &mut self,
        ctx: &mut LinkContext,
        osec_id: OutputSectionId,
        isd_index: usize,
        sec_id: SectionId,
    ) -> Result {
        for rel_index in 0..ctx.section(sec_id).relocations.len() {
            let src = {
                let rel = ctx.section(sec_id).relocations[rel_index];
                ctx.section_address(sec_id, rel.offset)
            };

            // A branch already pointing at a trampoline stays put if the
            // trampoline is still reachable; otherwise restore the original
            // target and let the logic below make a new one.
            if self.pass > 0 && self.normalize_existing_thunk(ctx, sec_id, rel_index, src) {
                continue;
            }

            let rel = ctx.section(sec_id).relocations[rel_index];
            let dst = ctx.symbol_address(rel.sym).wrapping_add_signed(rel.addend);
            let needs = ctx.target.needs_thunk(
                rel.expr,
                rel.r_type,
                ctx.section(sec_id).file,
                src,
                dst,
                ctx.symbols.get(rel.sym),
                rel.addend,
            );
            if !needs {
                continue;
            }

            let (thunk_index, is_new) = self.get_thunk(ctx, sec_id, &rel, src);
            if is_new {
                let ts_id = match self.thunks[thunk_index].must_precede {
                    Some(target_section) => self.leading_thunk_section(ctx, target_section)?,
                    None => self.in_range_thunk_section(ctx, osec_id, isd_index, sec_id, &rel, src)?,
                };
                self.thunk_sections[ts_id.as_usize()].thunks.push(thunk_index);
                self.thunks[thunk_index].section = Some(ts_id);
                let entry = self.thunks[thunk_index].entry_sym;
                ctx.symbols.get_mut(entry).placement = SymbolPlacement::Defined {
                    place: Some(Place::ThunkSection {
                        index: ts_id.as_usize() as u32,
                    }),
                };
                self.thunk_for_entry.insert(entry, thunk_index);
            }

            // Redirect the branch. A trampoline is always reached directly,
            // never through a PLT.
            let entry = self.thunks[thunk_index].entry_sym;
            let pc_bias = ctx.target.pc_bias(rel.r_type);
            let keep_addend = ctx.args.arch.is_mips();
            let record = &mut ctx.section_mut(sec_id).relocations[rel_index];
            record.sym = entry;
            record.expr = from_plt(record.expr);
            // Branches encoded as section-plus-addend must not apply the
            // addend a second time once they aim at the trampoline.
            if !keep_addend {
                record.addend = -pc_bias;
            }
        }
        Ok(())
    }

    /// Returns true if the relocation already targets a trampoline that is
    /// still in range. Otherwise restores the original destination (if the
    /// target was a trampoline) and returns false.
    fn normalize_existing_thunk(
        &mut self,
        ctx: &mut LinkContext,
        sec_id: SectionId,
        rel_index: usize,
        src: u64,
    ) -> bool {
        let rel = ctx.section(sec_id).relocations[rel_index];
        let Some(&thunk_index) = self.thunk_for_entry.get(&rel.sym) else {
            return false;
        };

        let entry_va = ctx
            .symbol_address(rel.sym)
            .wrapping_add_signed(rel.addend);
        if ctx.target.in_branch_range(rel.r_type, src, entry_va) {
            return true;
        }

        let thunk = &self.thunks[thunk_index];
        let destination = thunk.destination;
        let addend = thunk.addend;
        let dest_in_plt = ctx.symbols.get(destination).is_in_plt;
        let record = &mut ctx.section_mut(sec_id).relocations[rel_index];
        record.sym = destination;
        record.addend = addend;
        if dest_in_plt {
            record.expr = to_plt(record.expr);
        }
        false
    }

    /// Finds a reusable trampoline for this branch or creates a new one.
    /// Reuse requires partition compatibility, a compatible code sequence,
    /// and the trampoline being in range of the caller.
    fn get_thunk(
        &mut self,
        ctx: &mut LinkContext,
        sec_id: SectionId,
        rel: &Relocation,
        src: u64,
    ) -> (usize, bool) {
        // The branch displacement the hardware adds is folded out of the
        // key so two encodings of the same destination share a trampoline.
        let key_addend = rel.addend + ctx.target.pc_bias(rel.r_type);

        let sym = ctx.symbols.get(rel.sym);
        let section_key = match sym.placement {
            SymbolPlacement::Defined {
                place: Some(Place::Input(section)),
            } if !sym.is_in_plt => Some((section, sym.value)),
            _ => None,
        };

        let candidates = match section_key {
            Some((section, value)) => self
                .thunked_by_section
                .entry((section, value, key_addend))
                .or_default(),
            None => self.thunked_by_symbol.entry((rel.sym, key_addend)).or_default(),
        };

        let src_partition = ctx.sections[sec_id.as_usize()].partition;
        for &candidate in candidates.iter() {
            let thunk = &self.thunks[candidate];
            let thunk_partition = thunk
                .section
                .map_or(1, |ts| self.thunk_sections[ts.as_usize()].partition);
            // Partition 1 is always loaded, so its trampolines serve
            // callers from any partition.
            let partitions_ok = src_partition == thunk_partition || thunk_partition == 1;
            let entry_va = ctx
                .symbols
                .get(thunk.entry_sym)
                .value
                .wrapping_add_signed(rel.addend);
            if partitions_ok
                && ctx.target.thunk_compatible(rel)
                && ctx.target.in_branch_range(rel.r_type, src, entry_va)
            {
                return (candidate, false);
            }
        }

        let spec = ctx
            .target
            .thunk_spec(rel, ctx.symbols.get(rel.sym));
        let entry_name = format!("__thunk_{}", ctx.symbols.get(rel.sym).name);
        let mut entry = Symbol::new(entry_name);
        entry.binding = Binding::Local;
        entry.kind = SymbolKind::Func;
        let entry_sym = ctx.symbols.add(entry);

        let thunk_index = self.thunks.len();
        self.thunks.push(Thunk {
            destination: rel.sym,
            addend: rel.addend,
            entry_sym,
            size: spec.size,
            must_precede: spec.must_precede,
            offset: 0,
            section: None,
        });
        candidates.push(thunk_index);
        (thunk_index, true)
    }

    /// Finds or creates the trampoline section that must immediately
    /// precede `target_section`.
    fn leading_thunk_section(
        &mut self,
        ctx: &mut LinkContext,
        target_section: SectionId,
    ) -> Result<ThunkSectionId> {
        if let Some(&ts) = self.sections_with_leading_thunks.get(&target_section) {
            return Ok(ts);
        }

        let Some(placement) = ctx.section(target_section).out else {
            bail!(
                "section {} needs a leading trampoline but is not in the output",
                ctx.section(target_section).name
            );
        };
        let target_off = placement.offset;
        let osec_id = placement.osec;

        for isd_index in 0..ctx.output_section(osec_id).descriptions.len() {
            let isd = &ctx.output_section(osec_id).descriptions[isd_index];
            let mut bounds = None;
            for member_sec in isd.section_ids() {
                let off = ctx.section(member_sec).out_sec_off();
                let (first, last) = bounds.get_or_insert((off, off));
                *first = (*first).min(off);
                *last = (*last).max(off);
            }
            if let Some((first, last)) = bounds
                && first <= target_off
                && target_off <= last
            {
                let ts = self.add_thunk_section(ctx, osec_id, isd_index, target_off);
                self.thunk_sections[ts.as_usize()].target_input_section = Some(target_section);
                self.sections_with_leading_thunks.insert(target_section, ts);
                return Ok(ts);
            }
        }
        bail!(
            "could not find a home for the trampoline preceding {}",
            ctx.section(target_section).name
        );
    }

    /// Finds a pre-created trampoline section in range of the caller, or
    /// creates one adjacent to the calling section.
    fn in_range_thunk_section(
        &mut self,
        ctx: &mut LinkContext,
        osec_id: OutputSectionId,
        isd_index: usize,
        sec_id: SectionId,
        rel: &Relocation,
        src: u64,
    ) -> Result<ThunkSectionId> {
        let osec_addr = ctx.output_section(osec_id).addr;

        let existing: Vec<ThunkSectionId> = ctx.output_section(osec_id).descriptions[isd_index]
            .thunk_sections
            .iter()
            .map(|&(ts, _)| ts)
            .collect();
        for ts_id in existing {
            let ts = &self.thunk_sections[ts_id.as_usize()];
            let ts_base = (osec_addr + ts.out_sec_off).wrapping_add_signed(rel.addend);
            let ts_limit = (ts_base + ts.size).wrapping_add_signed(rel.addend);
            let probe = if src > ts_limit { ts_base } else { ts_limit };
            if ctx.target.in_branch_range(rel.r_type, src, probe) {
                return Ok(ts_id);
            }
        }

        // Nothing pre-created is reachable; this happens when the branch's
        // range is smaller than the section spacing, or a section soaked up
        // too many trampolines. Fall back to placing one right next to the
        // caller, trying both of its ends.
        let section = ctx.section(sec_id);
        let mut thunk_off = section.out_sec_off();
        if !ctx
            .target
            .in_branch_range(rel.r_type, src, (osec_addr + thunk_off).wrapping_add_signed(rel.addend))
        {
            thunk_off = section.out_sec_off() + section.size;
            if !ctx.target.in_branch_range(
                rel.r_type,
                src,
                (osec_addr + thunk_off).wrapping_add_signed(rel.addend),
            ) {
                bail!(
                    "input section too large for range extension trampoline: {}",
                    ctx.reference_location(sec_id, src.saturating_sub(osec_addr + section.out_sec_off())),
                );
            }
        }
        Ok(self.add_thunk_section(ctx, osec_id, isd_index, thunk_off))
    }

    fn add_thunk_section(
        &mut self,
        ctx: &mut LinkContext,
        osec_id: OutputSectionId,
        isd_index: usize,
        out_sec_off: u64,
    ) -> ThunkSectionId {
        let osec = ctx.output_section(osec_id);
        let partition = osec.partition;

        // Errata-patching rewrites instructions at positions keyed to the
        // address modulo 4 KiB. If this section later grows, everything
        // after it shifts; rounding its size to whole pages keeps those
        // positions stable between passes.
        let mut round_up_for_errata = false;
        if ctx.args.fix_cortex_a53_843419 || ctx.args.fix_cortex_a8 {
            let isd = &osec.descriptions[isd_index];
            let mut first_last = None;
            for sec in isd.section_ids() {
                let off = ctx.section(sec).out_sec_off();
                let end = off + ctx.section(sec).size;
                let (first, last) = first_last.get_or_insert((off, end));
                *first = (*first).min(off);
                *last = (*last).max(end);
            }
            if let Some((first, last)) = first_last {
                let isd_size = last - first;
                let spacing = ctx.target.thunk_section_spacing().unwrap_or(u64::MAX);
                if osec.size > spacing && isd_size > ERRATA_PAGE {
                    round_up_for_errata = true;
                }
            }
        }

        let ts_id = ThunkSectionId::from_usize(self.thunk_sections.len());
        self.thunk_sections.push(ThunkSection {
            osec: osec_id,
            out_sec_off,
            partition,
            thunks: Vec::new(),
            size: 0,
            round_up_for_errata,
            target_input_section: None,
        });
        ctx.output_sections[osec_id.as_usize()].descriptions[isd_index]
            .thunk_sections
            .push((ts_id, self.pass));
        ts_id
    }

    /// Pre-creates evenly spaced empty trampoline sections. The final one
    /// is pulled back to `spacing` before the end of large runs so
    /// trampolines near the end still land close to their targets.
    fn create_initial_thunk_sections(&mut self, ctx: &mut LinkContext) {
        let Some(spacing) = ctx.target.thunk_section_spacing() else {
            return;
        };

        for osec_index in 0..ctx.output_sections.len() {
            let osec_id = OutputSectionId::from_usize(osec_index);
            if !ctx.output_section(osec_id).is_executable() {
                continue;
            }
            for isd_index in 0..ctx.output_section(osec_id).descriptions.len() {
                let sections: Vec<SectionId> = ctx.output_section(osec_id).descriptions[isd_index]
                    .section_ids()
                    .collect();
                let Some(&first) = sections.first() else {
                    continue;
                };
                let last = *sections.last().unwrap();

                let isd_begin = ctx.section(first).out_sec_off();
                let isd_end = ctx.section(last).out_sec_off() + ctx.section(last).size;
                let last_thunk_lower_bound = if isd_end - isd_begin > spacing * 2 {
                    isd_end - spacing
                } else {
                    u64::MAX
                };

                let mut isec_limit = isd_begin;
                let mut prev_isec_limit = isd_begin;
                let mut thunk_upper_bound = isd_begin + spacing;

                for sec in sections {
                    isec_limit = ctx.section(sec).out_sec_off() + ctx.section(sec).size;
                    if isec_limit > thunk_upper_bound {
                        self.add_thunk_section(ctx, osec_id, isd_index, prev_isec_limit);
                        thunk_upper_bound = prev_isec_limit + spacing;
                    }
                    if isec_limit > last_thunk_lower_bound {
                        break;
                    }
                    prev_isec_limit = isec_limit;
                }
                self.add_thunk_section(ctx, osec_id, isd_index, isec_limit);
            }
        }
    }

    /// Lays the trampolines out inside their section and refreshes entry
    /// symbol addresses. Returns true if the section's size or any entry
    /// address changed.
    fn assign_offsets(&mut self, ctx: &mut LinkContext, ts_index: usize) -> bool {
        let osec_addr = {
            let ts = &self.thunk_sections[ts_index];
            ctx.output_section(ts.osec).addr
        };

        let mut changed = false;
        let mut offset: u64 = 0;
        let thunk_ids: Vec<usize> = self.thunk_sections[ts_index].thunks.clone();
        for thunk_index in thunk_ids {
            offset = offset.next_multiple_of(THUNK_ALIGNMENT);
            let thunk = &mut self.thunks[thunk_index];
            thunk.offset = offset;
            offset += thunk.size;

            let entry_va = osec_addr + self.thunk_sections[ts_index].out_sec_off + thunk.offset;
            let entry_sym = self.thunks[thunk_index].entry_sym;
            if ctx.symbols.get(entry_sym).value != entry_va {
                ctx.symbols.get_mut(entry_sym).value = entry_va;
                changed = true;
            }
        }

        let mut size = offset;
        if self.thunk_sections[ts_index].round_up_for_errata {
            size = size.next_multiple_of(ERRATA_PAGE);
        }
        if self.thunk_sections[ts_index].size != size {
            self.thunk_sections[ts_index].size = size;
            changed = true;
        }
        changed
    }

    /// Splices this pass's non-empty trampoline sections into their runs'
    /// member lists, by output offset, dropping pre-created sections that
    /// stayed empty. Ties go to the trampoline section, and a must-precede
    /// trampoline wins against its own target.
    fn merge_thunks(&mut self, ctx: &mut LinkContext) {
        for osec in &mut ctx.output_sections {
            for isd in &mut osec.descriptions {
                if isd.thunk_sections.is_empty() {
                    continue;
                }

                isd.thunk_sections
                    .retain(|&(ts, _)| self.thunk_sections[ts.as_usize()].size != 0);

                let mut new_thunk_sections: Vec<ThunkSectionId> = isd
                    .thunk_sections
                    .iter()
                    .filter(|&&(_, pass)| pass == self.pass)
                    .map(|&(ts, _)| ts)
                    .collect();
                new_thunk_sections
                    .sort_by_key(|ts| self.thunk_sections[ts.as_usize()].out_sec_off);
                if new_thunk_sections.is_empty() {
                    continue;
                }

                let member_offset = |member: &IsdMember| -> u64 {
                    match member {
                        IsdMember::Section(sec) => ctx.sections[sec.as_usize()].out_sec_off(),
                        IsdMember::Thunks(ts) => self.thunk_sections[ts.as_usize()].out_sec_off,
                    }
                };
                let thunk_precedes = |ts: ThunkSectionId, member: &IsdMember| -> bool {
                    let section = &self.thunk_sections[ts.as_usize()];
                    match member {
                        IsdMember::Section(sec) => {
                            section.target_input_section == Some(*sec)
                                || section.target_input_section.is_none()
                        }
                        IsdMember::Thunks(_) => false,
                    }
                };

                let old_members = std::mem::take(&mut isd.members);
                let mut merged =
                    Vec::with_capacity(old_members.len() + new_thunk_sections.len());
                let mut pending = new_thunk_sections.into_iter().peekable();
                for member in old_members {
                    while let Some(&ts) = pending.peek() {
                        let ts_off = self.thunk_sections[ts.as_usize()].out_sec_off;
                        let member_off = member_offset(&member);
                        let before = ts_off < member_off
                            || (ts_off == member_off && thunk_precedes(ts, &member));
                        if before {
                            merged.push(IsdMember::Thunks(ts));
                            pending.next();
                        } else {
                            break;
                        }
                    }
                    merged.push(member);
                }
                merged.extend(pending.map(IsdMember::Thunks));
                isd.members = merged;
            }
        }
    }

    /// Recomputes member offsets after a pass added trampoline sections,
    /// standing in for the writer's address assignment between passes.
    pub fn assign_addresses(&mut self, ctx: &mut LinkContext) {
        for osec_index in 0..ctx.output_sections.len() {
            let osec_id = OutputSectionId::from_usize(osec_index);
            let osec_addr = ctx.output_sections[osec_index].addr;
            let mut offset: u64 = 0;
            for isd_index in 0..ctx.output_sections[osec_index].descriptions.len() {
                let members = ctx.output_sections[osec_index].descriptions[isd_index]
                    .members
                    .clone();
                for member in members {
                    match member {
                        IsdMember::Section(sec) => {
                            let alignment = ctx.section(sec).alignment.max(1);
                            offset = offset.next_multiple_of(alignment);
                            if let Some(placement) = &mut ctx.section_mut(sec).out {
                                placement.offset = offset;
                            }
                            offset += ctx.section(sec).size;
                        }
                        IsdMember::Thunks(ts) => {
                            offset = offset.next_multiple_of(THUNK_ALIGNMENT);
                            let section = &mut self.thunk_sections[ts.as_usize()];
                            section.out_sec_off = offset;
                            for &thunk_index in &section.thunks {
                                let thunk = &self.thunks[thunk_index];
                                let entry_va = osec_addr + offset + thunk.offset;
                                ctx.symbols.get_mut(thunk.entry_sym).value = entry_va;
                            }
                            offset += section.size;
                        }
                    }
                }
            }
            ctx.output_sections[osec_index].size = offset;
        }
    }
}
