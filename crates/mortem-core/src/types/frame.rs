//! Stack frame, symbol, and source location types.

use std::fmt;

use super::Address;

/// Programming language associated with a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolLanguage
{
    /// Rust symbol (detected via mangling or namespace patterns).
    Rust,
    /// C++ symbol (Itanium mangling without Rust extensions).
    Cpp,
    /// C symbol or unmangled global.
    C,
}

impl fmt::Display for SymbolLanguage
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        let label = match self {
            SymbolLanguage::Rust => "rust",
            SymbolLanguage::Cpp => "c++",
            SymbolLanguage::C => "c",
        };
        write!(f, "{label}")
    }
}

/// A function name with demangling metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolName
{
    raw: String,
    demangled: Option<String>,
    language: SymbolLanguage,
}

impl SymbolName
{
    /// Construct from a raw linkage name, demangling Rust symbols.
    ///
    /// ```rust
    /// use mortem_core::types::{SymbolLanguage, SymbolName};
    ///
    /// let main = SymbolName::from_linkage_name("main");
    /// assert_eq!(main.display_name(), "main");
    /// assert_eq!(main.language(), SymbolLanguage::C);
    ///
    /// let rust = SymbolName::from_linkage_name("_ZN4core9panicking5panic17h0123456789abcdefE");
    /// assert_eq!(rust.display_name(), "core::panicking::panic");
    /// ```
    pub fn from_linkage_name(raw: impl Into<String>) -> Self
    {
        let raw = raw.into();
        // `{:#}` drops the trailing hash from legacy Rust symbols.
        let demangled = rustc_demangle::try_demangle(&raw).ok().map(|d| format!("{d:#}"));
        let language = if raw.starts_with("_R") || (raw.starts_with("_ZN") && demangled.is_some()) {
            SymbolLanguage::Rust
        } else if raw.starts_with("_Z") {
            SymbolLanguage::Cpp
        } else {
            SymbolLanguage::C
        };

        Self {
            raw,
            demangled,
            language,
        }
    }

    /// Raw (mangled) name emitted in the object file.
    pub fn raw(&self) -> &str
    {
        &self.raw
    }

    /// Demangled human-friendly name if available.
    pub fn demangled(&self) -> Option<&str>
    {
        self.demangled.as_deref()
    }

    /// Preferred presentation (demangled, falling back to raw).
    pub fn display_name(&self) -> &str
    {
        self.demangled.as_deref().unwrap_or(&self.raw)
    }

    /// Language classification for the symbol.
    pub fn language(&self) -> SymbolLanguage
    {
        self.language
    }
}

impl fmt::Display for SymbolName
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}", self.display_name())
    }
}

/// Source code location for a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation
{
    /// Absolute or compilation-directory-relative path.
    pub file: String,
    /// Line number, if known.
    pub line: Option<u32>,
    /// Column number, if known.
    pub column: Option<u32>,
}

impl SourceLocation
{
    /// Location with a file and line.
    pub fn new(file: impl Into<String>, line: u32) -> Self
    {
        Self {
            file: file.into(),
            line: Some(line),
            column: None,
        }
    }

    /// Final path component, e.g. `main.c` for `/src/app/main.c`.
    pub fn file_name(&self) -> &str
    {
        self.file.rsplit(['/', '\\']).next().unwrap_or(&self.file)
    }
}

impl fmt::Display for SourceLocation
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self.line {
            Some(line) => write!(f, "{}:{line}", self.file_name()),
            None => f.write_str(self.file_name()),
        }
    }
}

/// What the symbolizer knows about a code address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Symbolication
{
    /// Enclosing function.
    pub function: Option<SymbolName>,
    /// Source position.
    pub location: Option<SourceLocation>,
}

/// One frame of a backtrace, frozen at a stop
///
/// Index 0 is the innermost frame (where the thread stopped); higher indices
/// walk outwards towards the entry point. Without debug information only
/// the addresses are filled in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame
{
    /// Position in the backtrace (0 = innermost).
    pub index: usize,
    /// Program counter of the frame.
    pub pc: Address,
    /// Stack pointer for the frame, when known.
    pub sp: Option<Address>,
    /// Frame pointer for the frame, when known.
    pub fp: Option<Address>,
    /// Enclosing function, if symbols are available.
    pub function: Option<SymbolName>,
    /// Source position, if line tables are available.
    pub location: Option<SourceLocation>,
}

impl Frame
{
    /// Frame with addresses only.
    pub fn new(index: usize, pc: Address) -> Self
    {
        Self {
            index,
            pc,
            sp: None,
            fp: None,
            function: None,
            location: None,
        }
    }

    /// Source file name, if known.
    pub fn source_file(&self) -> Option<&str>
    {
        self.location.as_ref().map(|loc| loc.file.as_str())
    }

    /// Source line, if known.
    pub fn source_line(&self) -> Option<u32>
    {
        self.location.as_ref().and_then(|loc| loc.line)
    }

    /// Function name, if known.
    pub fn function_name(&self) -> Option<&str>
    {
        self.function.as_ref().map(SymbolName::display_name)
    }

    /// Whether any symbol information was resolved.
    pub fn is_symbolicated(&self) -> bool
    {
        self.function.is_some() || self.location.is_some()
    }
}

impl fmt::Display for Frame
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "frame #{}: 0x{:016x}", self.index, self.pc.value())?;
        if let Some(function) = &self.function {
            write!(f, " {function}")?;
        }
        if let Some(location) = &self.location {
            write!(f, " at {location}")?;
        }
        Ok(())
    }
}
