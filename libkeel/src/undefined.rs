//! Deferred undefined-symbol diagnostics. References to undefined symbols
//! are queued during the scan and reported together at the end, which makes
//! it possible to coalesce repeated references into one message and to run
//! the (comparatively expensive) spelling correction only for the first
//! couple of diagnostics.

use crate::context::LinkContext;
use crate::section::SectionId;
use crate::symbol::SymbolId;
use crate::symbol::SymbolPlacement;
use crate::symbol::Visibility;
use hashbrown::HashMap;
use itertools::Itertools;
use symbolic_common::Language;
use symbolic_common::Name;
use symbolic_common::NameMangling;
use symbolic_demangle::Demangle;
use symbolic_demangle::DemangleOptions;

/// One queued undefined reference. Starts with a single location; the
/// coalescing step folds later references into the first record.
#[derive(Debug)]
pub struct UndefinedDiag {
    pub sym: SymbolId,
    pub locs: Vec<(SectionId, u64)>,
    pub is_warning: bool,
}

const MAX_UNDEF_REFERENCES: usize = 3;

/// Queues a diagnostic if the referenced symbol is undefined and the
/// configuration says that matters. Returns true when the reference is an
/// error severe enough that the caller should stop processing the
/// relocation.
pub(crate) fn maybe_report_undefined(
    ctx: &mut LinkContext,
    sym_id: SymbolId,
    sec_id: SectionId,
    offset: u64,
) -> bool {
    let sym = ctx.symbols.get(sym_id);
    if !sym.is_undefined() {
        return false;
    }

    // A versioned undefined reference is always an error: without a
    // defining file there is no way to build the version-need entry.
    if !sym.version_suffix().is_empty() {
        ctx.undefs.push(UndefinedDiag {
            sym: sym_id,
            locs: vec![(sec_id, offset)],
            is_warning: false,
        });
        return true;
    }

    if sym.is_weak() {
        return false;
    }

    let can_be_external = !sym.is_local() && sym.visibility == Visibility::Default;
    if ctx.args.unresolved_symbols == crate::args::UnresolvedPolicy::Ignore && can_be_external {
        return false;
    }

    // Compilers emit `.toc`/`.got2` references to local symbols in sections
    // that COMDAT resolution discarded, in violation of the ELF spec. Those
    // references are dead; don't diagnose them.
    if matches!(
        sym.placement,
        SymbolPlacement::Undefined {
            discarded_section: true
        }
    ) {
        let sec_name = &ctx.section(sec_id).name;
        if sec_name == ".got2" || sec_name == ".toc" {
            return false;
        }
    }

    let is_warning = (ctx.args.unresolved_symbols == crate::args::UnresolvedPolicy::Warn
        && can_be_external)
        || ctx.args.noinhibit_exec;
    ctx.undefs.push(UndefinedDiag {
        sym: sym_id,
        locs: vec![(sec_id, offset)],
        is_warning,
    });
    !is_warning
}

/// Emits the queued undefined-symbol diagnostics: one per symbol, each
/// carrying every reference location, with spelling correction for the
/// first two.
pub fn report_undefined_symbols(ctx: &mut LinkContext) {
    let mut undefs = std::mem::take(&mut ctx.undefs);

    // Coalesce by symbol: all locations accumulate under the first record.
    let mut first_ref: HashMap<SymbolId, usize> = HashMap::new();
    for index in 0..undefs.len() {
        let sym = undefs[index].sym;
        match first_ref.get(&sym) {
            Some(&canonical) => {
                let locs = std::mem::take(&mut undefs[index].locs);
                undefs[canonical].locs.extend(locs);
            }
            None => {
                first_ref.insert(sym, index);
            }
        }
    }

    for (index, undef) in undefs
        .iter()
        .filter(|undef| !undef.locs.is_empty())
        .enumerate()
    {
        report_one(ctx, undef, index < 2);
    }
}

fn report_one(ctx: &mut LinkContext, undef: &UndefinedDiag, correct_spelling: bool) {
    let sym = ctx.symbols.get(undef.sym);
    let discarded = matches!(
        sym.placement,
        SymbolPlacement::Undefined {
            discarded_section: true
        }
    );

    let visibility = match sym.visibility {
        Visibility::Internal => "internal ",
        Visibility::Hidden => "hidden ",
        Visibility::Protected => "protected ",
        Visibility::Default => "",
    };

    let mut message = if discarded {
        let mut msg = format!(
            "relocation refers to a symbol in a discarded section: {}",
            sym.name
        );
        if let Some(file) = sym.file {
            msg.push_str(&format!("\n>>> defined in {}", ctx.file(file).path));
        }
        msg
    } else {
        format!("undefined {visibility}symbol: {}", sym.name)
    };

    for &(sec_id, offset) in undef.locs.iter().take(MAX_UNDEF_REFERENCES) {
        message.push_str("\n>>> referenced by ");
        message.push_str(&ctx.reference_location(sec_id, offset));
    }
    if undef.locs.len() > MAX_UNDEF_REFERENCES {
        message.push_str(&format!(
            "\n>>> referenced {} more times",
            undef.locs.len() - MAX_UNDEF_REFERENCES
        ));
    }

    // Suggesting a different symbol for a discarded definition would only
    // mislead; the symbol exists, its section doesn't.
    if correct_spelling && !discarded {
        if let Some(correction) = get_alternative_spelling(ctx, undef.sym) {
            message.push_str(&format!(
                "\n>>> did you mean{}{}{}",
                correction.pre_hint,
                ctx.symbols.get(correction.sym).name,
                correction.post_hint
            ));
            if let Some(file) = ctx.symbols.get(correction.sym).file {
                message.push_str(&format!("\n>>> defined in: {}", ctx.file(file).path));
            }
        }
    }

    if ctx.symbols.get(undef.sym).name.starts_with("_ZTV") {
        message.push_str(
            "\n>>> the vtable symbol may be undefined because the class is missing its key \
             function",
        );
    }

    if undef.is_warning {
        ctx.diagnostics.warn(message);
    } else {
        ctx.diagnostics.error(message);
    }
}

struct SpellingCorrection {
    sym: SymbolId,
    pre_hint: &'static str,
    post_hint: &'static str,
}

/// Finds a plausible alternative for a misspelled symbol: every string at
/// edit distance one (plus adjacent transposition), then a case-insensitive
/// match, then mangled-vs-unmangled confusion.
fn get_alternative_spelling(ctx: &LinkContext, sym_id: SymbolId) -> Option<SpellingCorrection> {
    // Locally defined symbols of the referencing file are fair suggestions
    // even though they aren't in the global table.
    let mut local_defined: HashMap<&str, SymbolId> = HashMap::new();
    if let Some(file) = ctx.symbols.get(sym_id).file {
        for &id in &ctx.file(file).symbols {
            let candidate = ctx.symbols.get(id);
            if candidate.is_local() && candidate.is_defined() && !candidate.name.is_empty() {
                local_defined.entry(&candidate.name).or_insert(id);
            }
        }
    }

    let suggest = |name: &str| -> Option<SymbolId> {
        if let Some(&id) = local_defined.get(name) {
            return Some(id);
        }
        if let Some(id) = ctx.symbols.find(name)
            && !ctx.symbols.get(id).is_undefined()
        {
            return Some(id);
        }
        None
    };
    let found = |sym: SymbolId| {
        Some(SpellingCorrection {
            sym,
            pre_hint: ": ",
            post_hint: "",
        })
    };

    // Enumerate every candidate at Levenshtein distance one. The alphabet
    // deliberately spans '0'..='z' exactly, punctuation included.
    let name = ctx.symbols.get(sym_id).name.as_bytes();
    let len = name.len();
    for i in 0..=len {
        // Insert a character before name[i].
        let mut candidate = Vec::with_capacity(len + 1);
        candidate.extend_from_slice(&name[..i]);
        candidate.push(b'0');
        candidate.extend_from_slice(&name[i..]);
        for c in b'0'..=b'z' {
            candidate[i] = c;
            if let Ok(text) = str::from_utf8(&candidate)
                && let Some(sym) = suggest(text)
            {
                return found(sym);
            }
        }
        if i == len {
            break;
        }

        // Substitute name[i].
        let mut candidate = name.to_vec();
        for c in b'0'..=b'z' {
            candidate[i] = c;
            if let Ok(text) = str::from_utf8(&candidate)
                && let Some(sym) = suggest(text)
            {
                return found(sym);
            }
        }

        // Transpose name[i] and name[i + 1]. Distance two, but a common
        // enough typo to special-case.
        if i + 1 < len {
            candidate[i] = name[i + 1];
            candidate[i + 1] = name[i];
            if let Ok(text) = str::from_utf8(&candidate)
                && let Some(sym) = suggest(text)
            {
                return found(sym);
            }
        }

        // Delete name[i].
        let mut candidate = Vec::with_capacity(len - 1);
        candidate.extend_from_slice(&name[..i]);
        candidate.extend_from_slice(&name[i + 1..]);
        if let Ok(text) = str::from_utf8(&candidate)
            && let Some(sym) = suggest(text)
        {
            return found(sym);
        }
    }

    // Case mismatch, e.g. Foo vs FOO.
    let name = &ctx.symbols.get(sym_id).name;
    for (&candidate_name, &id) in &local_defined {
        if name.eq_ignore_ascii_case(candidate_name) {
            return found(id);
        }
    }
    for id in ctx.symbols.iter_ids() {
        let candidate = ctx.symbols.get(id);
        if !candidate.is_undefined() && name.eq_ignore_ascii_case(&candidate.name) {
            return found(id);
        }
    }

    // The reference may be mangled while the definition is plain C, or the
    // other way around; both smell like a missing `extern "C"`.
    if name.starts_with("_Z") {
        if let Some(function_name) = demangled_function_name(name)
            && let Some(sym) = suggest(&function_name)
        {
            return Some(SpellingCorrection {
                sym,
                pre_hint: ": extern \"C\" ",
                post_hint: "",
            });
        }
    } else {
        let as_extern_c = |sym: SymbolId| SpellingCorrection {
            sym,
            pre_hint: " to declare ",
            post_hint: " as extern \"C\"?",
        };
        for (&candidate_name, &id) in local_defined.iter().sorted() {
            if mangled_name_matches(name, candidate_name) {
                return Some(as_extern_c(id));
            }
        }
        for id in ctx.symbols.iter_ids() {
            if mangled_name_matches(name, &ctx.symbols.get(id).name) {
                return Some(as_extern_c(id));
            }
        }
    }

    None
}

/// Whether `definition` is a mangled function name whose base name matches
/// the plain reference.
fn mangled_name_matches(reference: &str, definition: &str) -> bool {
    demangled_function_name(definition).is_some_and(|name| name == reference)
}

fn demangled_function_name(name: &str) -> Option<String> {
    if !name.starts_with("_Z") {
        return None;
    }
    Name::new(name, NameMangling::Mangled, Language::Cpp).demangle(DemangleOptions::name_only())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::OutputKind;
    use crate::scan::scan_relocations;
    use crate::symbol::Binding;
    use crate::symbol::SymbolKind;
    use crate::test_utils::*;
    use object::elf;

    fn error_messages(ctx: &crate::context::LinkContext) -> Vec<String> {
        ctx.diagnostics.messages().map(str::to_owned).collect()
    }

    #[test]
    fn typo_suggestion_at_edit_distance_one() {
        let mut ctx = x86_64_ctx(OutputKind::DynamicExecutable);
        let file = add_object(&mut ctx, "main.o");
        let sec = text_section(&mut ctx, file, ".text");
        let lib = add_object(&mut ctx, "libc.o");
        let libc_text = text_section(&mut ctx, lib, ".text");
        defined_symbol(
            &mut ctx,
            lib,
            "printf",
            libc_text,
            0,
            SymbolKind::Func,
            Binding::Global,
        );
        let (_, index) = undefined_symbol(&mut ctx, file, "prinft", Binding::Global);

        push_raw(&mut ctx, sec, 0, elf::R_X86_64_PLT32, index, -4);
        scan_relocations(&mut ctx, sec).unwrap();
        report_undefined_symbols(&mut ctx);

        let messages = error_messages(&ctx);
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("undefined symbol: prinft"));
        assert!(messages[0].contains("did you mean: printf"));
        assert!(messages[0].contains(">>> referenced by main.o:(.text+0x0)"));
        assert!(ctx.diagnostics.has_errors());
    }

    #[test]
    fn repeated_references_coalesce_into_one_diagnostic() {
        let mut ctx = x86_64_ctx(OutputKind::DynamicExecutable);
        let file = add_object(&mut ctx, "main.o");
        let sec = text_section(&mut ctx, file, ".text");
        let (_, index) = undefined_symbol(&mut ctx, file, "missing", Binding::Global);

        for n in 0..5 {
            push_raw(&mut ctx, sec, n * 0x10, elf::R_X86_64_PLT32, index, -4);
        }
        scan_relocations(&mut ctx, sec).unwrap();
        report_undefined_symbols(&mut ctx);

        let messages = error_messages(&ctx);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].matches(">>> referenced by").count(), 3);
        assert!(messages[0].contains("referenced 2 more times"));
    }

    #[test]
    fn weak_undefined_references_are_fine() {
        let mut ctx = x86_64_ctx(OutputKind::DynamicExecutable);
        let file = add_object(&mut ctx, "main.o");
        let sec = text_section(&mut ctx, file, ".text");
        let (_, index) = undefined_symbol(&mut ctx, file, "optional_hook", Binding::Weak);

        push_raw(&mut ctx, sec, 0, elf::R_X86_64_PLT32, index, -4);
        scan_relocations(&mut ctx, sec).unwrap();
        report_undefined_symbols(&mut ctx);

        assert!(!ctx.diagnostics.has_errors());
    }

    #[test]
    fn versioned_undefined_reference_is_always_an_error() {
        let mut ctx = x86_64_ctx(OutputKind::DynamicExecutable);
        let file = add_object(&mut ctx, "main.o");
        let sec = text_section(&mut ctx, file, ".text");
        let (_, index) = undefined_symbol(&mut ctx, file, "read@GLIBC_2.2.5", Binding::Weak);

        push_raw(&mut ctx, sec, 0, elf::R_X86_64_PLT32, index, -4);
        scan_relocations(&mut ctx, sec).unwrap();
        report_undefined_symbols(&mut ctx);

        assert!(ctx.diagnostics.has_errors());
    }

    #[test]
    fn warn_policy_downgrades_external_references() {
        let mut ctx = x86_64_ctx(OutputKind::DynamicExecutable);
        ctx.args.unresolved_symbols = crate::args::UnresolvedPolicy::Warn;
        let file = add_object(&mut ctx, "main.o");
        let sec = text_section(&mut ctx, file, ".text");
        let (_, index) = undefined_symbol(&mut ctx, file, "missing", Binding::Global);

        push_raw(&mut ctx, sec, 0, elf::R_X86_64_PLT32, index, -4);
        scan_relocations(&mut ctx, sec).unwrap();
        report_undefined_symbols(&mut ctx);

        assert!(!ctx.diagnostics.has_errors());
        assert_eq!(ctx.diagnostics.records().len(), 1);
    }

    #[test]
    fn case_mismatch_is_suggested_when_no_close_edit_exists() {
        let mut ctx = x86_64_ctx(OutputKind::DynamicExecutable);
        let file = add_object(&mut ctx, "main.o");
        let sec = text_section(&mut ctx, file, ".text");
        let data = data_section(&mut ctx, file, ".data");
        defined_symbol(
            &mut ctx,
            file,
            "GLOBAL_TABLE",
            data,
            0,
            SymbolKind::Object,
            Binding::Global,
        );
        let (_, index) = undefined_symbol(&mut ctx, file, "global_table", Binding::Global);

        push_raw(&mut ctx, sec, 0, elf::R_X86_64_PC32, index, -4);
        scan_relocations(&mut ctx, sec).unwrap();
        report_undefined_symbols(&mut ctx);

        let messages = error_messages(&ctx);
        assert!(messages[0].contains("did you mean: GLOBAL_TABLE"));
    }

    #[test]
    fn vtable_reference_gets_the_key_function_hint() {
        let mut ctx = x86_64_ctx(OutputKind::DynamicExecutable);
        let file = add_object(&mut ctx, "widget.o");
        let sec = text_section(&mut ctx, file, ".text");
        let (_, index) = undefined_symbol(&mut ctx, file, "_ZTV6Widget", Binding::Global);

        push_raw(&mut ctx, sec, 0, elf::R_X86_64_PC32, index, -4);
        scan_relocations(&mut ctx, sec).unwrap();
        report_undefined_symbols(&mut ctx);

        let messages = error_messages(&ctx);
        assert!(messages[0].contains("missing its key function"));
    }

    #[test]
    fn plain_reference_to_mangled_definition_suggests_extern_c() {
        let mut ctx = x86_64_ctx(OutputKind::DynamicExecutable);
        let file = add_object(&mut ctx, "main.o");
        let sec = text_section(&mut ctx, file, ".text");
        let lib = add_object(&mut ctx, "util.o");
        let util_text = text_section(&mut ctx, lib, ".text");
        defined_symbol(
            &mut ctx,
            lib,
            "_Z7do_workv",
            util_text,
            0,
            SymbolKind::Func,
            Binding::Global,
        );
        let (_, index) = undefined_symbol(&mut ctx, file, "do_work", Binding::Global);

        push_raw(&mut ctx, sec, 0, elf::R_X86_64_PLT32, index, -4);
        scan_relocations(&mut ctx, sec).unwrap();
        report_undefined_symbols(&mut ctx);

        let messages = error_messages(&ctx);
        assert!(
            messages[0].contains("did you mean to declare _Z7do_workv as extern \"C\"?"),
            "message was: {}",
            messages[0]
        );
    }

    #[test]
    fn hidden_visibility_shows_in_the_message() {
        let mut ctx = x86_64_ctx(OutputKind::DynamicExecutable);
        let file = add_object(&mut ctx, "main.o");
        let sec = text_section(&mut ctx, file, ".text");
        let (sym, index) = undefined_symbol(&mut ctx, file, "internal_detail", Binding::Global);
        ctx.symbols.get_mut(sym).visibility = Visibility::Hidden;

        push_raw(&mut ctx, sec, 0, elf::R_X86_64_PC32, index, -4);
        scan_relocations(&mut ctx, sec).unwrap();
        report_undefined_symbols(&mut ctx);

        let messages = error_messages(&ctx);
        assert!(messages[0].contains("undefined hidden symbol: internal_detail"));
    }
}
