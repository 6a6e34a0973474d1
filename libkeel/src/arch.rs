/// Architecture of the output being produced. The scanner forks on this for
/// the handful of per-architecture conventions that aren't expressible
/// through [`crate::target::TargetHooks`] alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arch {
    X86_64,
    I386,
    AArch64,
    Arm,
    RiscV64,
    Ppc32,
    Ppc64,
    Mips,
    Hexagon,
}

impl Arch {
    /// Whether general/local-dynamic TLS sequences may be rewritten into the
    /// initial-exec or local-exec forms. ARM, Hexagon and RISC-V define no
    /// such rewrites.
    pub fn supports_tls_relaxation(self) -> bool {
        !matches!(self, Arch::Arm | Arch::Hexagon | Arch::RiscV64)
    }

    pub fn is_mips(self) -> bool {
        self == Arch::Mips
    }
}
