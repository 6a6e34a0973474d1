//! Input files as the scanner sees them: a name for diagnostics, the file's
//! symbol table mapped into the global arena, and the per-file oddities a
//! few architectures need to track.

use crate::symbol::SymbolId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileId(u32);

impl FileId {
    pub fn from_usize(value: usize) -> Self {
        FileId(u32::try_from(value).expect("too many input files"))
    }

    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// A loadable segment of a shared object, kept so copy relocations can tell
/// whether the copied bytes were read-only in their home DSO.
#[derive(Debug, Clone, Copy)]
pub struct DsoSegment {
    pub writable: bool,
    pub vaddr: u64,
    pub memsz: u64,
}

#[derive(Debug)]
pub struct InputFile {
    pub path: String,
    pub is_dynamic: bool,

    /// The file's symbol table, in symbol-index order, resolved into the
    /// global arena. Raw relocations index into this.
    pub symbols: Vec<SymbolId>,

    /// `PT_LOAD`/`PT_GNU_RELRO` segments; only populated for shared objects.
    pub segments: Vec<DsoSegment>,

    /// GD/LD TLS relaxation was disabled for this file because its GOT-based
    /// TLS relocations carry no call markers (old IBM XL output).
    pub ppc64_disable_tls_relax: bool,
    /// The file addresses its TOC with small-code-model relocations, which
    /// constrains where its `.toc` may be placed.
    pub ppc64_small_code_model_toc_relocs: bool,

    /// Value of the `_gp` pointer the file was assembled with.
    pub mips_gp0: i64,
}

impl InputFile {
    pub fn new(path: impl Into<String>) -> InputFile {
        InputFile {
            path: path.into(),
            is_dynamic: false,
            symbols: Vec::new(),
            segments: Vec::new(),
            ppc64_disable_tls_relax: false,
            ppc64_small_code_model_toc_relocs: false,
            mips_gp0: 0,
        }
    }
}
