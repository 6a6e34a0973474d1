//! Link configuration consumed by the scanner. Command-line parsing happens
//! in the front end; by the time the core runs, everything has been reduced
//! to this struct.

use crate::arch::Arch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    StaticExecutable,
    DynamicExecutable,
    PieExecutable,
    SharedObject,
}

impl OutputKind {
    pub fn is_executable(self) -> bool {
        !self.is_shared_object()
    }

    pub fn is_shared_object(self) -> bool {
        self == OutputKind::SharedObject
    }

    pub fn is_static_executable(self) -> bool {
        self == OutputKind::StaticExecutable
    }

    /// Whether the output may be loaded at an arbitrary base address.
    pub fn is_relocatable(self) -> bool {
        matches!(self, OutputKind::PieExecutable | OutputKind::SharedObject)
    }
}

/// What to do about references to symbols that nothing defines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnresolvedPolicy {
    #[default]
    Error,
    Warn,
    Ignore,
}

#[derive(Debug, Clone)]
pub struct Args {
    pub arch: Arch,
    pub output_kind: OutputKind,

    /// Forbid dynamic relocations against read-only sections (`-z text`).
    pub z_text: bool,
    /// Allow copy relocations (`-z copyreloc`, enabled unless `nocopyreloc`).
    pub z_copyreloc: bool,
    /// Don't make PLT entries for ifuncs; pass the relocation through to the
    /// runtime instead (`-z ifunc-noplt`).
    pub z_ifunc_noplt: bool,

    pub unresolved_symbols: UnresolvedPolicy,
    /// Keep going and produce an output even with unresolved references
    /// (`--noinhibit-exec`). Downgrades most relocation errors to warnings.
    pub noinhibit_exec: bool,

    /// Emit compact relative relocations in addition to the general dynamic
    /// relocation section.
    pub pack_relative_relocs: bool,

    /// Break pointer equality for functions/data if it lets the link succeed.
    pub ignore_function_address_equality: bool,
    pub ignore_data_address_equality: bool,

    pub mips_n32_abi: bool,
    pub is_mips64el: bool,
    pub is_cheri_abi: bool,

    /// Base of the table-of-contents pointer on PPC64 (`.got` + 0x8000 once
    /// the image is laid out; the writer provides the real value).
    pub ppc64_toc_base: u64,

    /// Size of a GOT slot / pointer in the output.
    pub wordsize: u64,

    /// Cortex-A53 erratum 843419 / Cortex-A8 erratum 657417 workarounds.
    /// These constrain how trampoline sections may grow.
    pub fix_cortex_a53_843419: bool,
    pub fix_cortex_a8: bool,
}

impl Args {
    pub fn new(arch: Arch, output_kind: OutputKind) -> Self {
        Args {
            arch,
            output_kind,
            z_text: true,
            z_copyreloc: true,
            z_ifunc_noplt: false,
            unresolved_symbols: UnresolvedPolicy::Error,
            noinhibit_exec: false,
            pack_relative_relocs: false,
            ignore_function_address_equality: false,
            ignore_data_address_equality: false,
            mips_n32_abi: false,
            is_mips64el: false,
            is_cheri_abi: false,
            ppc64_toc_base: 0,
            wordsize: 8,
            fix_cortex_a53_843419: false,
            fix_cortex_a8: false,
        }
    }

    pub fn is_shared(&self) -> bool {
        self.output_kind.is_shared_object()
    }

    pub fn is_pie(&self) -> bool {
        self.output_kind == OutputKind::PieExecutable
    }

    /// Position-independent output: PIE or shared object.
    pub fn is_pic(&self) -> bool {
        self.output_kind.is_relocatable()
    }
}
