//! Linker-materialised sections: the GOT family, the PLT family, the
//! dynamic-relocation sections and the zero-fill reservations for copy
//! relocations.
//!
//! Every insertion here is idempotent, keyed by `(symbol, role)`: asking for
//! a slot that already exists returns the existing offset. Slot offsets are
//! stable once assigned, which is what lets the scanner record them into
//! relocations long before the writer runs.

use crate::args::Args;
use crate::input::FileId;
use crate::section::Relocation;
use crate::symbol::Place;
use crate::symbol::SymbolId;
use hashbrown::HashMap;

/// How the runtime loader should interpret a dynamic relocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DynRelocKind {
    /// Resolve the named dynamic symbol and use its address.
    AgainstSymbol,
    /// No symbol lookup; the stored addend (plus the target's link-time
    /// address where applicable) is the whole story.
    AddendOnly,
    /// Image base plus stored addend.
    Relative,
}

#[derive(Debug, Clone, Copy)]
pub struct DynReloc {
    pub r_type: u32,
    pub kind: DynRelocKind,
    pub place: Place,
    pub offset: u64,
    pub sym: Option<SymbolId>,
    pub addend: i64,
}

/// One of `rela.dyn`, `rela.plt`, `rela.iplt`.
#[derive(Debug)]
pub struct DynRelocSection {
    pub name: &'static str,
    pub relocs: Vec<DynReloc>,
}

impl DynRelocSection {
    fn new(name: &'static str) -> Self {
        DynRelocSection {
            name,
            relocs: Vec::new(),
        }
    }

    pub fn add_reloc(&mut self, reloc: DynReloc) {
        self.relocs.push(reloc);
    }

    pub fn add_symbol_reloc(
        &mut self,
        r_type: u32,
        place: Place,
        offset: u64,
        sym: SymbolId,
        addend: i64,
    ) {
        self.add_reloc(DynReloc {
            r_type,
            kind: DynRelocKind::AgainstSymbol,
            place,
            offset,
            sym: Some(sym),
            addend,
        });
    }

    /// Emits a symbol-bearing relocation for preemptible symbols and an
    /// addend-only one otherwise, so non-preemptible targets never cost a
    /// runtime symbol lookup.
    pub fn add_reloc_against_sym_or_addend(
        &mut self,
        r_type: u32,
        place: Place,
        offset: u64,
        sym: SymbolId,
        is_preemptible: bool,
    ) {
        let kind = if is_preemptible {
            DynRelocKind::AgainstSymbol
        } else {
            DynRelocKind::AddendOnly
        };
        self.add_reloc(DynReloc {
            r_type,
            kind,
            place,
            offset,
            sym: Some(sym),
            addend: 0,
        });
    }

    pub fn add_relative_reloc(
        &mut self,
        r_type: u32,
        place: Place,
        offset: u64,
        sym: SymbolId,
        addend: i64,
    ) {
        self.add_reloc(DynReloc {
            r_type,
            kind: DynRelocKind::Relative,
            place,
            offset,
            sym: Some(sym),
            addend,
        });
    }
}

/// The compact encoding for relative relocations. Only even offsets in
/// sufficiently aligned sections can be represented.
#[derive(Debug, Default)]
pub struct RelrSection {
    pub relocs: Vec<(Place, u64)>,
}

/// The global offset table. Regular slots are one word; TLS module/offset
/// pairs are two.
#[derive(Debug)]
pub struct GotSection {
    entry_size: u64,
    num_slots: u64,
    regular: HashMap<SymbolId, u64>,
    /// First slot of the module-index/offset pair for GD-model symbols.
    global_dyn: HashMap<SymbolId, u64>,
    tls_index_slot: Option<u64>,
    /// Link-time-resolvable slots, recorded for the writer.
    pub relocations: Vec<Relocation>,
    /// Something computed an offset relative to this section without making
    /// an entry, so the section must exist even if empty.
    pub has_base_rel: bool,
}

impl GotSection {
    fn new(entry_size: u64) -> Self {
        GotSection {
            entry_size,
            num_slots: 0,
            regular: HashMap::new(),
            global_dyn: HashMap::new(),
            tls_index_slot: None,
            relocations: Vec::new(),
            has_base_rel: false,
        }
    }

    fn bump(&mut self, slots: u64) -> u64 {
        let offset = self.num_slots * self.entry_size;
        self.num_slots += slots;
        offset
    }

    /// Reserves (or finds) the symbol's single-word slot.
    pub fn add_entry(&mut self, sym: SymbolId) -> u64 {
        if let Some(&offset) = self.regular.get(&sym) {
            return offset;
        }
        let offset = self.bump(1);
        self.regular.insert(sym, offset);
        offset
    }

    pub fn entry_offset(&self, sym: SymbolId) -> Option<u64> {
        self.regular.get(&sym).copied()
    }

    /// Reserves the two-slot module/offset pair for a general-dynamic or
    /// TLS-descriptor access. Returns the pair's offset and whether it was
    /// newly created.
    pub fn add_dyn_tls_entry(&mut self, sym: SymbolId) -> (u64, bool) {
        if let Some(&offset) = self.global_dyn.get(&sym) {
            return (offset, false);
        }
        let offset = self.bump(2);
        self.global_dyn.insert(sym, offset);
        (offset, true)
    }

    pub fn global_dyn_offset(&self, sym: SymbolId) -> Option<u64> {
        self.global_dyn.get(&sym).copied()
    }

    /// Reserves the single module-index pair shared by all local-dynamic
    /// accesses. Returns the offset and whether it was newly created.
    pub fn add_tls_index(&mut self) -> (u64, bool) {
        if let Some(offset) = self.tls_index_slot {
            return (offset, false);
        }
        let offset = self.bump(2);
        self.tls_index_slot = Some(offset);
        (offset, true)
    }

    pub fn tls_index_offset(&self) -> Option<u64> {
        self.tls_index_slot
    }

    pub fn num_slots(&self) -> u64 {
        self.num_slots
    }
}

/// `.got.plt` (or the ifunc variant). Slot offsets account for the reserved
/// header words the runtime loader owns.
#[derive(Debug)]
pub struct GotPltSection {
    entry_size: u64,
    header_slots: u64,
    index_of: HashMap<SymbolId, u64>,
    pub entries: Vec<SymbolId>,
    pub has_base_rel: bool,
}

impl GotPltSection {
    fn new(entry_size: u64, header_slots: u64) -> Self {
        GotPltSection {
            entry_size,
            header_slots,
            index_of: HashMap::new(),
            entries: Vec::new(),
            has_base_rel: false,
        }
    }

    pub fn add_entry(&mut self, sym: SymbolId) -> u64 {
        if let Some(&index) = self.index_of.get(&sym) {
            return (self.header_slots + index) * self.entry_size;
        }
        let index = self.entries.len() as u64;
        self.index_of.insert(sym, index);
        self.entries.push(sym);
        (self.header_slots + index) * self.entry_size
    }

    pub fn entry_offset(&self, sym: SymbolId) -> Option<u64> {
        self.index_of
            .get(&sym)
            .map(|index| (self.header_slots + index) * self.entry_size)
    }

    pub fn num_entries(&self) -> usize {
        self.entries.len()
    }
}

/// `.plt` or `.iplt`. Entry indices are stable; the PPC32 canonical entries
/// grow the header instead of the entry array.
#[derive(Debug)]
pub struct PltSection {
    index_of: HashMap<SymbolId, u32>,
    pub entries: Vec<SymbolId>,
    pub header_size: u64,
    /// Symbols whose canonical definition is their entry at the start of the
    /// PPC32 `.glink` header.
    pub canonical_entries: Vec<SymbolId>,
}

impl PltSection {
    fn new(header_size: u64) -> Self {
        PltSection {
            index_of: HashMap::new(),
            entries: Vec::new(),
            header_size,
            canonical_entries: Vec::new(),
        }
    }

    pub fn add_entry(&mut self, sym: SymbolId) -> u32 {
        if let Some(&index) = self.index_of.get(&sym) {
            return index;
        }
        let index = self.entries.len() as u32;
        self.index_of.insert(sym, index);
        self.entries.push(sym);
        index
    }

    pub fn num_entries(&self) -> usize {
        self.entries.len()
    }
}

/// Zero-initialised reservations: `.bss` proper and the relro variant used
/// when the copied bytes were read-only in their home DSO.
#[derive(Debug)]
pub struct BssSection {
    pub name: &'static str,
    pub size: u64,
    pub chunks: Vec<BssChunk>,
}

#[derive(Debug, Clone, Copy)]
pub struct BssChunk {
    pub offset: u64,
    pub size: u64,
    pub alignment: u64,
}

impl BssSection {
    fn new(name: &'static str) -> Self {
        BssSection {
            name,
            size: 0,
            chunks: Vec::new(),
        }
    }

    pub fn reserve(&mut self, size: u64, alignment: u64) -> (u32, u64) {
        let offset = self.size.next_multiple_of(alignment.max(1));
        let index = self.chunks.len() as u32;
        self.chunks.push(BssChunk {
            offset,
            size,
            alignment,
        });
        self.size = offset + size;
        (index, offset)
    }
}

/// The MIPS GOT. The MIPS ABI fills GOT slots from a specially ordered
/// dynamic symbol table instead of relocations, and local entries are keyed
/// by page, so entries carry their addend.
#[derive(Debug, Default)]
pub struct MipsGotSection {
    num_slots: u64,
    entries: HashMap<(SymbolId, i64), u64>,
    tls_entries: HashMap<SymbolId, u64>,
    dyn_tls_entries: HashMap<(FileId, SymbolId), u64>,
    tls_index_for_file: HashMap<FileId, u64>,
}

impl MipsGotSection {
    pub fn add_entry(&mut self, sym: SymbolId, addend: i64) -> u64 {
        let next = self.num_slots;
        let entry = self.entries.entry((sym, addend)).or_insert(next);
        if *entry == next {
            self.num_slots += 1;
        }
        *entry
    }

    pub fn add_tls_entry(&mut self, sym: SymbolId) -> u64 {
        let next = self.num_slots;
        let entry = self.tls_entries.entry(sym).or_insert(next);
        if *entry == next {
            self.num_slots += 1;
        }
        *entry
    }

    /// Module/offset pair for a general-dynamic access from `file`.
    pub fn add_dyn_tls_entry(&mut self, file: FileId, sym: SymbolId) -> u64 {
        let next = self.num_slots;
        let entry = self.dyn_tls_entries.entry((file, sym)).or_insert(next);
        if *entry == next {
            self.num_slots += 2;
        }
        *entry
    }

    /// Per-file module-index pair for local-dynamic accesses.
    pub fn add_tls_index(&mut self, file: FileId) -> u64 {
        let next = self.num_slots;
        let entry = self.tls_index_for_file.entry(file).or_insert(next);
        if *entry == next {
            self.num_slots += 2;
        }
        *entry
    }

    pub fn num_slots(&self) -> u64 {
        self.num_slots
    }
}

/// The capability table of CHERI targets. Fills the role the GOT plays
/// elsewhere, but each slot is a full capability.
#[derive(Debug, Default)]
pub struct CapTableSection {
    index_of: HashMap<SymbolId, u32>,
    pub entries: Vec<SymbolId>,
    tls_entries: HashMap<SymbolId, u32>,
    dyn_tls_entries: HashMap<SymbolId, u32>,
    has_tls_index: bool,
    /// Capability relocations queued for the writer.
    pub cap_relocs: Vec<Relocation>,
}

impl CapTableSection {
    pub fn add_entry(&mut self, sym: SymbolId) -> u32 {
        if let Some(&index) = self.index_of.get(&sym) {
            return index;
        }
        let index = self.entries.len() as u32;
        self.index_of.insert(sym, index);
        self.entries.push(sym);
        index
    }

    pub fn add_tls_entry(&mut self, sym: SymbolId) -> u32 {
        let next = self.tls_entries.len() as u32;
        *self.tls_entries.entry(sym).or_insert(next)
    }

    pub fn add_dyn_tls_entry(&mut self, sym: SymbolId) -> u32 {
        let next = self.dyn_tls_entries.len() as u32;
        *self.dyn_tls_entries.entry(sym).or_insert(next)
    }

    pub fn add_tls_index(&mut self) {
        self.has_tls_index = true;
    }
}

/// The registry of synthetic sections for one output image.
#[derive(Debug)]
pub struct SyntheticSections {
    pub got: GotSection,
    pub got_plt: GotPltSection,
    pub plt: PltSection,
    pub iplt: PltSection,
    pub igot_plt: GotPltSection,
    pub rela_dyn: DynRelocSection,
    pub rela_plt: DynRelocSection,
    pub rela_iplt: DynRelocSection,
    pub relr_dyn: Option<RelrSection>,
    pub bss: BssSection,
    pub bss_rel_ro: BssSection,
    pub mips_got: Option<MipsGotSection>,
    pub cap_table: Option<CapTableSection>,
}

impl SyntheticSections {
    pub fn new(args: &Args, plt_header_size: u64) -> Self {
        SyntheticSections {
            got: GotSection::new(args.wordsize),
            got_plt: GotPltSection::new(args.wordsize, 3),
            plt: PltSection::new(plt_header_size),
            iplt: PltSection::new(0),
            igot_plt: GotPltSection::new(args.wordsize, 0),
            rela_dyn: DynRelocSection::new(".rela.dyn"),
            rela_plt: DynRelocSection::new(".rela.plt"),
            rela_iplt: DynRelocSection::new(".rela.iplt"),
            relr_dyn: args.pack_relative_relocs.then(RelrSection::default),
            bss: BssSection::new(".bss"),
            bss_rel_ro: BssSection::new(".bss.rel.ro"),
            mips_got: args.arch.is_mips().then(MipsGotSection::default),
            cap_table: args.is_cheri_abi.then(CapTableSection::default),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn got_slots_are_stable_and_idempotent() {
        let mut got = GotSection::new(8);
        let a = SymbolId::from_usize(1);
        let b = SymbolId::from_usize(2);
        assert_eq!(got.add_entry(a), 0);
        assert_eq!(got.add_entry(b), 8);
        assert_eq!(got.add_entry(a), 0);
        assert_eq!(got.num_slots(), 2);

        let (pair, added) = got.add_dyn_tls_entry(a);
        assert!(added);
        assert_eq!(pair, 16);
        let (again, added) = got.add_dyn_tls_entry(a);
        assert!(!added);
        assert_eq!(again, pair);
        assert_eq!(got.num_slots(), 4);
    }

    #[test]
    fn tls_index_pair_is_shared() {
        let mut got = GotSection::new(8);
        let (first, added_first) = got.add_tls_index();
        let (second, added_second) = got.add_tls_index();
        assert!(added_first);
        assert!(!added_second);
        assert_eq!(first, second);
        assert_eq!(got.num_slots(), 2);
    }

    #[test]
    fn got_plt_offsets_skip_the_reserved_header() {
        let mut got_plt = GotPltSection::new(8, 3);
        let sym = SymbolId::from_usize(7);
        assert_eq!(got_plt.add_entry(sym), 24);
        assert_eq!(got_plt.add_entry(sym), 24);
        assert_eq!(got_plt.num_entries(), 1);
    }

    #[test]
    fn bss_reservations_respect_alignment() {
        let mut bss = BssSection::new(".bss");
        let (_, first) = bss.reserve(10, 8);
        let (_, second) = bss.reserve(4, 16);
        assert_eq!(first, 0);
        assert_eq!(second, 16);
        assert_eq!(bss.size, 20);
    }
}
