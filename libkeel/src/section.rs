//! Input sections, their raw relocation records, and the scanned
//! [`Relocation`] list the writer will later apply.

use crate::bail;
use crate::error::Result;
use crate::expr::RelExpr;
use crate::input::FileId;
use crate::output::OutputSectionId;
use crate::symbol::SymbolId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SectionId(u32);

impl SectionId {
    pub fn from_usize(value: usize) -> Self {
        SectionId(u32::try_from(value).expect("too many input sections"))
    }

    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// Wrapper over raw `sh_flags` bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SectionFlags(pub u64);

impl SectionFlags {
    pub fn is_alloc(self) -> bool {
        self.0 & u64::from(object::elf::SHF_ALLOC) != 0
    }

    pub fn is_writable(self) -> bool {
        self.0 & u64::from(object::elf::SHF_WRITE) != 0
    }

    pub fn is_executable(self) -> bool {
        self.0 & u64::from(object::elf::SHF_EXECINSTR) != 0
    }

    pub fn is_tls(self) -> bool {
        self.0 & u64::from(object::elf::SHF_TLS) != 0
    }
}

/// One record from an input `.rel`/`.rela` section. For REL inputs the
/// addend field is unused; the scanner reads the in-place bytes instead.
#[derive(Debug, Clone, Copy)]
pub struct RawReloc {
    pub offset: u64,
    pub r_type: u32,
    pub sym_index: u32,
    pub addend: i64,
}

/// A scanned relocation, ready for the writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relocation {
    pub expr: RelExpr,
    pub r_type: u32,
    pub offset: u64,
    pub addend: i64,
    pub sym: SymbolId,
}

/// One piece of a mergeable exception-frame section. Dead pieces (garbage
/// collected) have no output offset.
#[derive(Debug, Clone, Copy)]
pub struct EhPiece {
    pub input_off: u64,
    pub size: u64,
    pub output_off: Option<u64>,
}

/// Where an input section landed in the output image.
#[derive(Debug, Clone, Copy)]
pub struct OutputPlacement {
    pub osec: OutputSectionId,
    pub offset: u64,
}

#[derive(Debug)]
pub struct InputSection {
    pub file: Option<FileId>,
    pub name: String,
    pub flags: SectionFlags,
    pub alignment: u64,
    pub size: u64,
    /// Read-only view of the section bytes, used for implicit addends.
    pub data: Vec<u8>,

    pub raw_relocs: Vec<RawReloc>,
    pub is_rela: bool,

    /// Populated by the scanner, in scan order.
    pub relocations: Vec<Relocation>,

    /// Piece table for exception-frame sections; `None` elsewhere.
    pub eh_pieces: Option<Vec<EhPiece>>,

    pub partition: u8,
    pub out: Option<OutputPlacement>,
}

impl InputSection {
    pub fn new(name: impl Into<String>, flags: SectionFlags) -> InputSection {
        InputSection {
            file: None,
            name: name.into(),
            flags,
            alignment: 1,
            size: 0,
            data: Vec::new(),
            raw_relocs: Vec::new(),
            is_rela: true,
            relocations: Vec::new(),
            eh_pieces: None,
            partition: 1,
            out: None,
        }
    }

    pub fn out_sec_off(&self) -> u64 {
        self.out.map_or(0, |placement| placement.offset)
    }
}

/// Maps input offsets to output offsets. The identity map for ordinary
/// sections; a piece-table walk for exception-frame sections. Offsets must
/// be requested in increasing order, which relocation order guarantees.
pub struct OffsetGetter<'a> {
    pieces: &'a [EhPiece],
    index: usize,
}

/// Returned for relocations that land in garbage-collected pieces.
pub const DEAD_OFFSET: u64 = u64::MAX;

impl<'a> OffsetGetter<'a> {
    pub fn new(section: &'a InputSection) -> Self {
        Self::from_pieces(section.eh_pieces.as_deref().unwrap_or(&[]))
    }

    pub fn from_pieces(pieces: &'a [EhPiece]) -> Self {
        OffsetGetter { pieces, index: 0 }
    }

    pub fn get(&mut self, off: u64) -> Result<u64> {
        if self.pieces.is_empty() {
            return Ok(off);
        }

        while let Some(piece) = self.pieces.get(self.index) {
            if piece.input_off + piece.size > off {
                break;
            }
            self.index += 1;
        }
        let Some(piece) = self.pieces.get(self.index) else {
            bail!("relocation at offset 0x{off:x} is not in any exception-frame piece");
        };
        debug_assert!(piece.input_off <= off, "relocation not in any piece");

        match piece.output_off {
            Some(out) => Ok(out + off - piece.input_off),
            None => Ok(DEAD_OFFSET),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn piece(input_off: u64, size: u64, output_off: Option<u64>) -> EhPiece {
        EhPiece {
            input_off,
            size,
            output_off,
        }
    }

    #[test]
    fn offsets_pass_through_without_pieces() {
        let sec = InputSection::new(".text", SectionFlags(0));
        let mut getter = OffsetGetter::new(&sec);
        assert_eq!(getter.get(0x40).unwrap(), 0x40);
    }

    #[test]
    fn piece_table_remaps_and_skips_dead_pieces() {
        let mut sec = InputSection::new(".eh_frame", SectionFlags(0));
        sec.eh_pieces = Some(vec![
            piece(0, 0x20, Some(0x100)),
            piece(0x20, 0x20, None),
            piece(0x40, 0x20, Some(0x120)),
        ]);
        let mut getter = OffsetGetter::new(&sec);
        assert_eq!(getter.get(0x8).unwrap(), 0x108);
        assert_eq!(getter.get(0x28).unwrap(), DEAD_OFFSET);
        assert_eq!(getter.get(0x44).unwrap(), 0x124);
        assert!(getter.get(0x60).is_err());
    }
}
