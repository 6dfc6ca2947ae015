//! Register names and register sets captured at a stop.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use once_cell::sync::Lazy;

use super::{Address, Architecture};

/// Name of a CPU register as reported by the backend
///
/// Names are case-insensitive and stored lowercase; a leading `$` (the
/// expression syntax for registers) is stripped.
///
/// ```rust
/// use mortem_core::types::RegisterName;
///
/// assert_eq!(RegisterName::new("$RAX"), RegisterName::new("rax"));
/// assert_eq!(RegisterName::new("rax").as_str(), "rax");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RegisterName(String);

impl RegisterName
{
    /// Normalize and wrap a register name.
    pub fn new(name: impl AsRef<str>) -> Self
    {
        let name = name.as_ref().trim();
        let name = name.strip_prefix('$').unwrap_or(name);
        Self(name.to_ascii_lowercase())
    }

    /// Normalized name.
    pub fn as_str(&self) -> &str
    {
        &self.0
    }
}

impl From<&str> for RegisterName
{
    fn from(name: &str) -> Self
    {
        Self::new(name)
    }
}

impl fmt::Display for RegisterName
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.write_str(&self.0)
    }
}

/// Generic register roles that have a different concrete name per
/// architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum RegisterRole
{
    Pc,
    Sp,
    Fp,
    Lr,
    Flags,
}

struct ArchRegisters
{
    aliases: HashMap<&'static str, RegisterRole>,
    roles: HashMap<RegisterRole, &'static str>,
    general: &'static [&'static str],
}

const X86_64_GENERAL: &[&str] = &[
    "rax", "rbx", "rcx", "rdx", "rdi", "rsi", "rbp", "rsp", "r8", "r9", "r10", "r11", "r12", "r13", "r14", "r15",
];

const ARM64_GENERAL: &[&str] = &[
    "x0", "x1", "x2", "x3", "x4", "x5", "x6", "x7", "x8", "x9", "x10", "x11", "x12", "x13", "x14", "x15", "x16",
    "x17", "x18", "x19", "x20", "x21", "x22", "x23", "x24", "x25", "x26", "x27", "x28", "x29", "x30",
];

static ALIASES: Lazy<HashMap<Architecture, ArchRegisters>> = Lazy::new(|| {
    let generic = [
        ("pc", RegisterRole::Pc),
        ("sp", RegisterRole::Sp),
        ("fp", RegisterRole::Fp),
        ("lr", RegisterRole::Lr),
        ("ra", RegisterRole::Lr),
        ("flags", RegisterRole::Flags),
    ];

    let mut table = HashMap::new();
    table.insert(
        Architecture::X86_64,
        ArchRegisters {
            aliases: generic.into_iter().collect(),
            roles: [
                (RegisterRole::Pc, "rip"),
                (RegisterRole::Sp, "rsp"),
                (RegisterRole::Fp, "rbp"),
                (RegisterRole::Flags, "rflags"),
            ]
            .into_iter()
            .collect(),
            general: X86_64_GENERAL,
        },
    );
    table.insert(
        Architecture::Arm64,
        ArchRegisters {
            aliases: generic.into_iter().collect(),
            roles: [
                (RegisterRole::Pc, "pc"),
                (RegisterRole::Sp, "sp"),
                (RegisterRole::Fp, "x29"),
                (RegisterRole::Lr, "x30"),
                (RegisterRole::Flags, "cpsr"),
            ]
            .into_iter()
            .collect(),
            general: ARM64_GENERAL,
        },
    );
    table
});

/// Register values of one thread, frozen at a stop
///
/// Built from the `name -> word` mapping the backend returns. Lookups go
/// through [`RegisterSet::get`], which understands the generic aliases
/// `pc`, `sp`, `fp`, `lr` and `flags` for the known architectures.
///
/// ```rust
/// use mortem_core::types::{Architecture, RegisterName, RegisterSet};
///
/// let regs = RegisterSet::from_values(Architecture::X86_64, [("rip", 0x401000), ("rax", 7)]);
/// assert_eq!(regs.get(&RegisterName::new("pc")), Some(0x401000));
/// assert_eq!(regs.get(&RegisterName::new("RAX")), Some(7));
/// assert_eq!(regs.get(&RegisterName::new("rbx")), None);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterSet
{
    architecture: Architecture,
    values: BTreeMap<RegisterName, u64>,
}

impl RegisterSet
{
    /// Create an empty register set.
    pub fn new(architecture: Architecture) -> Self
    {
        Self {
            architecture,
            values: BTreeMap::new(),
        }
    }

    /// Build a register set from `(name, value)` pairs.
    pub fn from_values<N, I>(architecture: Architecture, values: I) -> Self
    where
        N: AsRef<str>,
        I: IntoIterator<Item = (N, u64)>,
    {
        Self {
            architecture,
            values: values
                .into_iter()
                .map(|(name, value)| (RegisterName::new(name), value))
                .collect(),
        }
    }

    /// Architecture these registers belong to.
    pub fn architecture(&self) -> Architecture
    {
        self.architecture
    }

    /// Number of registers captured.
    pub fn len(&self) -> usize
    {
        self.values.len()
    }

    /// Whether no registers were captured.
    pub fn is_empty(&self) -> bool
    {
        self.values.is_empty()
    }

    /// Look up a register by name or generic alias.
    ///
    /// A concrete name always wins over an alias, so on AArch64 `sp` and
    /// `pc` resolve directly.
    pub fn get(&self, name: &RegisterName) -> Option<u64>
    {
        if let Some(value) = self.values.get(name) {
            return Some(*value);
        }

        let table = ALIASES.get(&self.architecture)?;
        let role = table.aliases.get(name.as_str())?;
        let concrete = table.roles.get(role)?;
        self.values.get(&RegisterName::new(concrete)).copied()
    }

    /// Program counter, if captured.
    pub fn pc(&self) -> Option<Address>
    {
        self.get(&RegisterName::new("pc")).map(Address::from)
    }

    /// Stack pointer, if captured.
    pub fn sp(&self) -> Option<Address>
    {
        self.get(&RegisterName::new("sp")).map(Address::from)
    }

    /// Frame pointer, if captured.
    pub fn fp(&self) -> Option<Address>
    {
        self.get(&RegisterName::new("fp")).map(Address::from)
    }

    /// The first general-purpose register of the architecture that was
    /// captured (`rax` on x86-64, `x0` on AArch64).
    ///
    /// For unknown architectures this falls back to the first register in
    /// name order.
    pub fn first_general(&self) -> Option<(RegisterName, u64)>
    {
        match ALIASES.get(&self.architecture) {
            Some(table) => table.general.iter().find_map(|name| {
                let name = RegisterName::new(name);
                self.values.get(&name).map(|value| (name, *value))
            }),
            None => self.values.iter().next().map(|(name, value)| (name.clone(), *value)),
        }
    }

    /// Iterate over all captured registers in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&RegisterName, u64)>
    {
        self.values.iter().map(|(name, value)| (name, *value))
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_arm64_aliases()
    {
        let regs = RegisterSet::from_values(
            Architecture::Arm64,
            [("pc", 0x1000), ("sp", 0x7000), ("x29", 0x7010), ("x30", 0x2000), ("x0", 1)],
        );
        assert_eq!(regs.pc(), Some(Address::from(0x1000)));
        assert_eq!(regs.sp(), Some(Address::from(0x7000)));
        assert_eq!(regs.fp(), Some(Address::from(0x7010)));
        assert_eq!(regs.get(&RegisterName::new("lr")), Some(0x2000));
        assert_eq!(regs.first_general(), Some((RegisterName::new("x0"), 1)));
    }

    #[test]
    fn test_first_general_skips_missing_registers()
    {
        let regs = RegisterSet::from_values(Architecture::X86_64, [("rcx", 3), ("rip", 0x10)]);
        assert_eq!(regs.first_general(), Some((RegisterName::new("rcx"), 3)));
    }

    #[test]
    fn test_unknown_architecture_has_no_aliases()
    {
        let regs = RegisterSet::from_values(Architecture::Unknown("mips"), [("zz", 2), ("a0", 9)]);
        assert_eq!(regs.pc(), None);
        assert_eq!(regs.first_general(), Some((RegisterName::new("a0"), 9)));
    }
}
