//! The symbol arena. Symbols, sections and files refer to each other by
//! compact indices rather than pointers, which keeps the reference graph
//! acyclic and lets the whole table be dropped in one go at the end of the
//! link.

use crate::input::FileId;
use crate::section::SectionId;
use hashbrown::HashMap;

/// Index of a symbol in the [`SymbolDb`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolId(u32);

impl SymbolId {
    pub fn from_usize(value: usize) -> Self {
        SymbolId(u32::try_from(value).expect("too many symbols"))
    }

    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    Local,
    Global,
    Weak,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Default,
    Internal,
    Hidden,
    Protected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    NoType,
    Object,
    Func,
    Section,
    Tls,
    IFunc,
}

/// Where a symbol's bytes live. Synthetic places cover entities the linker
/// itself materialises (PLT entries, copy-relocation reservations,
/// trampolines).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Place {
    Input(SectionId),
    Got,
    GotPlt,
    Plt,
    Iplt,
    IgotPlt,
    Bss { chunk: u32 },
    BssRelRo { chunk: u32 },
    CapTable,
    ThunkSection { index: u32 },
}

/// What kind of definition (if any) a symbol resolved to. The fields every
/// variant shares live directly on [`Symbol`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolPlacement {
    /// Defined in this link unit. `None` means an absolute symbol.
    Defined { place: Option<Place> },
    /// Referenced but never defined. `discarded_section` marks definitions
    /// that existed but lost COMDAT resolution.
    Undefined { discarded_section: bool },
    /// Defined by a shared object on the link line.
    Shared { alignment: u64 },
    /// Available in an archive that was never loaded.
    Lazy,
}

#[derive(Debug, Clone)]
pub struct Symbol {
    /// Symbol name, possibly carrying an `@`/`@@` version suffix.
    pub name: String,
    pub file: Option<FileId>,
    pub binding: Binding,
    pub visibility: Visibility,
    pub kind: SymbolKind,
    pub placement: SymbolPlacement,
    pub value: u64,
    pub size: u64,

    /// Whether a definition from another module may replace this one at
    /// load time.
    pub is_preemptible: bool,
    /// Defined by a linker-script assignment; gets its final value late.
    pub script_defined: bool,

    pub is_in_got: bool,
    pub is_in_plt: bool,
    pub is_in_iplt: bool,
    /// GOT-shaped references were redirected to the ifunc GOT.
    pub got_in_igot: bool,
    /// The symbol's official address is its PLT entry.
    pub needs_plt_addr: bool,
    pub export_dynamic: bool,
    pub is_used_in_regular_obj: bool,

    pub got_index: Option<u32>,
    pub plt_index: Option<u32>,
    pub verdef_index: Option<u32>,
}

impl Symbol {
    pub fn new(name: impl Into<String>) -> Symbol {
        Symbol {
            name: name.into(),
            file: None,
            binding: Binding::Global,
            visibility: Visibility::Default,
            kind: SymbolKind::NoType,
            placement: SymbolPlacement::Undefined {
                discarded_section: false,
            },
            value: 0,
            size: 0,
            is_preemptible: false,
            script_defined: false,
            is_in_got: false,
            is_in_plt: false,
            is_in_iplt: false,
            got_in_igot: false,
            needs_plt_addr: false,
            export_dynamic: false,
            is_used_in_regular_obj: false,
            got_index: None,
            plt_index: None,
            verdef_index: None,
        }
    }

    pub fn is_defined(&self) -> bool {
        matches!(self.placement, SymbolPlacement::Defined { .. })
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self.placement, SymbolPlacement::Undefined { .. })
    }

    pub fn is_shared(&self) -> bool {
        matches!(self.placement, SymbolPlacement::Shared { .. })
    }

    pub fn is_undef_weak(&self) -> bool {
        self.is_undefined() && self.binding == Binding::Weak
    }

    pub fn is_local(&self) -> bool {
        self.binding == Binding::Local
    }

    pub fn is_weak(&self) -> bool {
        self.binding == Binding::Weak
    }

    pub fn is_tls(&self) -> bool {
        self.kind == SymbolKind::Tls
    }

    pub fn is_func(&self) -> bool {
        self.kind == SymbolKind::Func
    }

    pub fn is_object(&self) -> bool {
        self.kind == SymbolKind::Object
    }

    pub fn is_section(&self) -> bool {
        self.kind == SymbolKind::Section
    }

    pub fn is_ifunc(&self) -> bool {
        self.kind == SymbolKind::IFunc
    }

    /// A symbol whose value is independent of where the image loads: an
    /// absolute definition or an undefined weak (which resolves to zero).
    pub fn is_absolute(&self) -> bool {
        if self.is_undef_weak() {
            return true;
        }
        matches!(self.placement, SymbolPlacement::Defined { place: None })
    }

    /// As [`Self::is_absolute`], but TLS symbols also count: their values
    /// are offsets within the TLS block, not addresses.
    pub fn has_absolute_value(&self) -> bool {
        self.is_absolute() || self.is_tls()
    }

    /// The `@version` suffix of the name, empty if unversioned.
    pub fn version_suffix(&self) -> &str {
        match self.name.find('@') {
            Some(at) => &self.name[at..],
            None => "",
        }
    }

    pub fn unversioned_name(&self) -> &str {
        match self.name.find('@') {
            Some(at) => &self.name[..at],
            None => &self.name,
        }
    }

    /// Rebinds the symbol to a definition the linker created itself (a copy
    /// relocation reservation or a canonical PLT entry). Slot indices and
    /// the name survive; the old placement does not.
    pub fn replace_with_defined(&mut self, place: Place, value: u64, size: u64) {
        self.placement = SymbolPlacement::Defined { place: Some(place) };
        self.value = value;
        self.size = size;
        self.export_dynamic = true;
        self.is_used_in_regular_obj = true;
    }
}

/// Global symbol table plus arena storage for every symbol in the link,
/// including locals.
#[derive(Debug, Default)]
pub struct SymbolDb {
    symbols: Vec<Symbol>,
    /// Name → id for global lookup. Locals are reachable only through their
    /// file's symbol list.
    global_names: HashMap<String, SymbolId>,
}

impl SymbolDb {
    pub fn add(&mut self, symbol: Symbol) -> SymbolId {
        let id = SymbolId::from_usize(self.symbols.len());
        if symbol.binding != Binding::Local {
            self.global_names
                .entry(symbol.unversioned_name().to_owned())
                .or_insert(id);
        }
        self.symbols.push(symbol);
        id
    }

    pub fn find(&self, name: &str) -> Option<SymbolId> {
        self.global_names.get(name).copied()
    }

    pub fn get(&self, id: SymbolId) -> &Symbol {
        &self.symbols[id.as_usize()]
    }

    pub fn get_mut(&mut self, id: SymbolId) -> &mut Symbol {
        &mut self.symbols[id.as_usize()]
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn iter_ids(&self) -> impl Iterator<Item = SymbolId> + use<> {
        (0..self.symbols.len()).map(SymbolId::from_usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_suffix_split() {
        let sym = Symbol::new("read@GLIBC_2.2.5");
        assert_eq!(sym.unversioned_name(), "read");
        assert_eq!(sym.version_suffix(), "@GLIBC_2.2.5");
        assert_eq!(Symbol::new("read").version_suffix(), "");
    }

    #[test]
    fn locals_stay_out_of_the_global_map() {
        let mut db = SymbolDb::default();
        let mut local = Symbol::new("x");
        local.binding = Binding::Local;
        db.add(local);
        assert!(db.find("x").is_none());

        let id = db.add(Symbol::new("x"));
        assert_eq!(db.find("x"), Some(id));
    }
}
