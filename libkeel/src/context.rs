//! Shared state for one link invocation. Everything the scanner and the
//! trampoline placer mutate hangs off this context: the arenas, the
//! synthetic sections, the deferred undefined-symbol diagnostics. It is
//! created at the start of a link and dropped wholesale at the end.

use crate::args::Args;
use crate::diagnostics::Diagnostics;
use crate::input::FileId;
use crate::input::InputFile;
use crate::output::OutputSection;
use crate::output::OutputSectionId;
use crate::section::InputSection;
use crate::section::SectionId;
use crate::symbol::Symbol;
use crate::symbol::SymbolDb;
use crate::symbol::SymbolId;
use crate::synthetic::SyntheticSections;
use crate::target::TargetHooks;
use crate::undefined::UndefinedDiag;
use foldhash::HashSet;

pub struct LinkContext {
    pub args: Args,
    pub target: Box<dyn TargetHooks>,

    pub files: Vec<InputFile>,
    pub symbols: SymbolDb,
    pub sections: Vec<InputSection>,
    pub output_sections: Vec<OutputSection>,

    pub synthetic: SyntheticSections,

    /// Undefined references, queued so they can be coalesced and decorated
    /// once the scan is complete.
    pub undefs: Vec<UndefinedDiag>,

    pub diagnostics: Diagnostics,

    /// `(symbol, addend)` pairs naming TOC entries that must not be
    /// relaxed because something takes their address directly.
    pub ppc64_no_toc_relax: HashSet<(SymbolId, i64)>,
}

impl LinkContext {
    pub fn new(args: Args, target: Box<dyn TargetHooks>) -> Self {
        let diagnostics = Diagnostics {
            downgrade_errors: args.noinhibit_exec,
            ..Diagnostics::default()
        };
        let synthetic = SyntheticSections::new(&args, target.plt_header_size());
        LinkContext {
            args,
            target,
            files: Vec::new(),
            symbols: SymbolDb::default(),
            sections: Vec::new(),
            output_sections: Vec::new(),
            synthetic,
            undefs: Vec::new(),
            diagnostics,
            ppc64_no_toc_relax: HashSet::default(),
        }
    }

    pub fn add_file(&mut self, file: InputFile) -> FileId {
        let id = FileId::from_usize(self.files.len());
        self.files.push(file);
        id
    }

    pub fn add_section(&mut self, section: InputSection) -> SectionId {
        let id = SectionId::from_usize(self.sections.len());
        self.sections.push(section);
        id
    }

    pub fn add_output_section(&mut self, osec: OutputSection) -> OutputSectionId {
        let id = OutputSectionId::from_usize(self.output_sections.len());
        self.output_sections.push(osec);
        id
    }

    pub fn file(&self, id: FileId) -> &InputFile {
        &self.files[id.as_usize()]
    }

    pub fn file_mut(&mut self, id: FileId) -> &mut InputFile {
        &mut self.files[id.as_usize()]
    }

    pub fn section(&self, id: SectionId) -> &InputSection {
        &self.sections[id.as_usize()]
    }

    pub fn section_mut(&mut self, id: SectionId) -> &mut InputSection {
        &mut self.sections[id.as_usize()]
    }

    pub fn output_section(&self, id: OutputSectionId) -> &OutputSection {
        &self.output_sections[id.as_usize()]
    }

    /// Resolves a raw relocation's symbol index through the owning file's
    /// symbol table.
    pub fn symbol_for_index(&self, file: FileId, sym_index: u32) -> SymbolId {
        self.file(file).symbols[sym_index as usize]
    }

    /// Output address a section offset maps to, once the writer has placed
    /// the section. Zero-based before placement, which is all the scanner
    /// needs for record-keeping.
    pub fn section_address(&self, sec_id: SectionId, offset: u64) -> u64 {
        let section = self.section(sec_id);
        match section.out {
            Some(placement) => {
                self.output_section(placement.osec).addr + placement.offset + offset
            }
            None => offset,
        }
    }

    /// Address a symbol resolves to for branch-range purposes.
    pub fn symbol_address(&self, sym_id: SymbolId) -> u64 {
        let sym = self.symbols.get(sym_id);
        match sym.placement {
            crate::symbol::SymbolPlacement::Defined {
                place: Some(crate::symbol::Place::Input(sec)),
            } => self.section_address(sec, sym.value),
            _ => sym.value,
        }
    }

    fn defined_location(&self, sym_id: SymbolId) -> String {
        let sym = self.symbols.get(sym_id);
        match sym.file {
            Some(file) => format!("\n>>> defined in {}", self.file(file).path),
            None if sym.script_defined => "\n>>> defined by the linker script".to_owned(),
            None => String::new(),
        }
    }

    /// The standard two-line location block attached to relocation
    /// diagnostics:
    ///
    /// ```text
    /// >>> defined in /path/to/foo.o
    /// >>> referenced by /path/to/bar.o:(.text+0x1)
    /// ```
    pub fn location(&self, sec_id: SectionId, sym_id: SymbolId, offset: u64) -> String {
        format!(
            "{}\n>>> referenced by {}",
            self.defined_location(sym_id),
            self.reference_location(sec_id, offset),
        )
    }

    /// `file:(.section+0x<off>)`, the object-offset form used when no source
    /// line information is available.
    pub fn reference_location(&self, sec_id: SectionId, offset: u64) -> String {
        let section = self.section(sec_id);
        let file = section
            .file
            .map(|id| self.file(id).path.as_str())
            .unwrap_or("<synthetic>");
        format!("{file}:({}+0x{offset:x})", section.name)
    }

    /// Display name for a symbol in diagnostics; local symbols without a
    /// name are shown by kind.
    pub fn symbol_name_for_display(&self, sym_id: SymbolId) -> &str {
        let sym = self.symbols.get(sym_id);
        if sym.name.is_empty() {
            "local symbol"
        } else {
            &sym.name
        }
    }

    pub fn add_symbol(&mut self, symbol: Symbol) -> SymbolId {
        self.symbols.add(symbol)
    }
}
