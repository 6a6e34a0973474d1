//! Builders shared by the in-crate tests: contexts, files, sections and
//! symbols assembled the way the file reader would hand them over.

use crate::aarch64::AArch64;
use crate::args::Args;
use crate::args::OutputKind;
use crate::context::LinkContext;
use crate::input::FileId;
use crate::input::InputFile;
use crate::output::InputSectionDescription;
use crate::output::IsdMember;
use crate::output::OutputSection;
use crate::output::OutputSectionId;
use crate::section::InputSection;
use crate::section::OutputPlacement;
use crate::section::RawReloc;
use crate::section::SectionFlags;
use crate::section::SectionId;
use crate::symbol::Binding;
use crate::symbol::Place;
use crate::symbol::Symbol;
use crate::symbol::SymbolId;
use crate::symbol::SymbolKind;
use crate::symbol::SymbolPlacement;
use crate::target::TargetHooks;
use crate::x86_64::X86_64;

pub(crate) fn ctx_for(target: Box<dyn TargetHooks>, output_kind: OutputKind) -> LinkContext {
    let args = Args::new(target.arch(), output_kind);
    LinkContext::new(args, target)
}

pub(crate) fn x86_64_ctx(output_kind: OutputKind) -> LinkContext {
    ctx_for(Box::new(X86_64), output_kind)
}

pub(crate) fn aarch64_ctx(output_kind: OutputKind) -> LinkContext {
    ctx_for(Box::new(AArch64), output_kind)
}

/// Adds an input object with the null symbol at index 0, like a real
/// symbol table.
pub(crate) fn add_object(ctx: &mut LinkContext, path: &str) -> FileId {
    let file = ctx.add_file(InputFile::new(path));
    let mut null = Symbol::new("");
    null.binding = Binding::Local;
    let null_id = ctx.add_symbol(null);
    ctx.file_mut(file).symbols.push(null_id);
    file
}

/// Adds a shared object on the link line, with one read-write and one
/// read-only loadable segment.
pub(crate) fn add_dso(ctx: &mut LinkContext, path: &str) -> FileId {
    let file = add_object(ctx, path);
    ctx.file_mut(file).is_dynamic = true;
    ctx.file_mut(file).segments = vec![
        crate::input::DsoSegment {
            writable: false,
            vaddr: 0,
            memsz: 0x1000,
        },
        crate::input::DsoSegment {
            writable: true,
            vaddr: 0x1000,
            memsz: 0x1000,
        },
    ];
    file
}

pub(crate) fn add_file_symbol(
    ctx: &mut LinkContext,
    file: FileId,
    symbol: Symbol,
) -> (SymbolId, u32) {
    let id = ctx.add_symbol(symbol);
    let index = ctx.file(file).symbols.len() as u32;
    ctx.file_mut(file).symbols.push(id);
    (id, index)
}

fn section(ctx: &mut LinkContext, file: FileId, name: &str, flags: u64, alignment: u64) -> SectionId {
    let mut sec = InputSection::new(name, SectionFlags(flags));
    sec.file = Some(file);
    sec.alignment = alignment;
    ctx.add_section(sec)
}

pub(crate) fn text_section(ctx: &mut LinkContext, file: FileId, name: &str) -> SectionId {
    let flags = u64::from(object::elf::SHF_ALLOC | object::elf::SHF_EXECINSTR);
    section(ctx, file, name, flags, 4)
}

pub(crate) fn data_section(ctx: &mut LinkContext, file: FileId, name: &str) -> SectionId {
    let flags = u64::from(object::elf::SHF_ALLOC | object::elf::SHF_WRITE);
    section(ctx, file, name, flags, 8)
}

pub(crate) fn rodata_section(ctx: &mut LinkContext, file: FileId, name: &str) -> SectionId {
    section(ctx, file, name, u64::from(object::elf::SHF_ALLOC), 8)
}

pub(crate) fn defined_symbol(
    ctx: &mut LinkContext,
    file: FileId,
    name: &str,
    sec: SectionId,
    value: u64,
    kind: SymbolKind,
    binding: Binding,
) -> (SymbolId, u32) {
    let mut sym = Symbol::new(name);
    sym.file = Some(file);
    sym.binding = binding;
    sym.kind = kind;
    sym.value = value;
    sym.placement = SymbolPlacement::Defined {
        place: Some(Place::Input(sec)),
    };
    add_file_symbol(ctx, file, sym)
}

pub(crate) fn undefined_symbol(
    ctx: &mut LinkContext,
    file: FileId,
    name: &str,
    binding: Binding,
) -> (SymbolId, u32) {
    let mut sym = Symbol::new(name);
    sym.file = Some(file);
    sym.binding = binding;
    sym.is_preemptible = true;
    add_file_symbol(ctx, file, sym)
}

/// A symbol defined by a shared object: preemptible, with the alignment
/// copy relocations need.
pub(crate) fn shared_symbol(
    ctx: &mut LinkContext,
    dso: FileId,
    name: &str,
    value: u64,
    size: u64,
    alignment: u64,
    kind: SymbolKind,
) -> (SymbolId, u32) {
    let mut sym = Symbol::new(name);
    sym.file = Some(dso);
    sym.kind = kind;
    sym.value = value;
    sym.size = size;
    sym.is_preemptible = true;
    sym.placement = SymbolPlacement::Shared { alignment };
    add_file_symbol(ctx, dso, sym)
}

pub(crate) fn push_raw(
    ctx: &mut LinkContext,
    sec: SectionId,
    offset: u64,
    r_type: u32,
    sym_index: u32,
    addend: i64,
) {
    ctx.section_mut(sec).raw_relocs.push(RawReloc {
        offset,
        r_type,
        sym_index,
        addend,
    });
}

/// An executable output section at the given base address.
pub(crate) fn executable_osec(ctx: &mut LinkContext, name: &str, addr: u64) -> OutputSectionId {
    let flags = SectionFlags(u64::from(object::elf::SHF_ALLOC | object::elf::SHF_EXECINSTR));
    let mut osec = OutputSection::new(name, flags);
    osec.addr = addr;
    osec.descriptions.push(InputSectionDescription::default());
    ctx.add_output_section(osec)
}

/// Pins an input section at an offset within the output section's first
/// input-section run.
pub(crate) fn place_section(
    ctx: &mut LinkContext,
    osec: OutputSectionId,
    sec: SectionId,
    offset: u64,
    size: u64,
) {
    ctx.section_mut(sec).size = size;
    ctx.section_mut(sec).out = Some(OutputPlacement { osec, offset });
    let end = offset + size;
    let osec = &mut ctx.output_sections[osec.as_usize()];
    osec.descriptions[0].members.push(IsdMember::Section(sec));
    osec.size = osec.size.max(end);
}
