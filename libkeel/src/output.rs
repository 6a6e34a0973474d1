//! The slice of the output image the scanner needs to see: output sections,
//! and the runs of input sections ("descriptions") the trampoline placer
//! works over. Full image layout belongs to the writer.

use crate::section::SectionFlags;
use crate::section::SectionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutputSectionId(u32);

impl OutputSectionId {
    pub fn from_usize(value: usize) -> Self {
        OutputSectionId(u32::try_from(value).expect("too many output sections"))
    }

    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// Index of a trampoline section in the placer's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThunkSectionId(u32);

impl ThunkSectionId {
    pub fn from_usize(value: usize) -> Self {
        ThunkSectionId(u32::try_from(value).expect("too many trampoline sections"))
    }

    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// Members of an input-section description, in output order. Trampoline
/// sections get spliced in between regular sections as passes add them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsdMember {
    Section(SectionId),
    Thunks(ThunkSectionId),
}

/// A contiguous run of input sections within an output section, as produced
/// by one linker-script input-section pattern.
#[derive(Debug, Default)]
pub struct InputSectionDescription {
    pub members: Vec<IsdMember>,
    /// Every trampoline section created inside this run, tagged with the
    /// pass that created it.
    pub thunk_sections: Vec<(ThunkSectionId, u32)>,
}

impl InputSectionDescription {
    pub fn section_ids(&self) -> impl Iterator<Item = SectionId> + '_ {
        self.members.iter().filter_map(|member| match member {
            IsdMember::Section(id) => Some(*id),
            IsdMember::Thunks(_) => None,
        })
    }
}

#[derive(Debug)]
pub struct OutputSection {
    pub name: String,
    pub flags: SectionFlags,
    pub addr: u64,
    pub size: u64,
    pub partition: u8,
    pub descriptions: Vec<InputSectionDescription>,
}

impl OutputSection {
    pub fn new(name: impl Into<String>, flags: SectionFlags) -> OutputSection {
        OutputSection {
            name: name.into(),
            flags,
            addr: 0,
            size: 0,
            partition: 1,
            descriptions: Vec::new(),
        }
    }

    pub fn is_executable(&self) -> bool {
        self.flags.is_alloc() && self.flags.is_executable()
    }
}
