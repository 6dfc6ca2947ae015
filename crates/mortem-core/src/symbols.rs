//! # Symbolizers
//!
//! [`Symbolizer`] implementations.
//!
//! - [`NoSymbols`]: no debug information; frames carry addresses only.
//! - [`DwarfSymbolizer`]: reads the executable's symbol table and DWARF line
//!   tables through [`addr2line::Loader`]. Names are demangled with
//!   `rustc-demangle` by [`SymbolName::from_linkage_name`].
//!
//! Variable lookup needs a DWARF type walker, which neither implementation
//! has; backends that can describe variables implement
//! [`Symbolizer::variable`] themselves.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use addr2line::Loader;
use tracing::{debug, warn};

use crate::error::{MortemError, MortemResult};
use crate::target::Symbolizer;
use crate::types::{Address, SourceLocation, SymbolName, Symbolication};

/// Symbolizer for targets without debug information.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSymbols;

impl Symbolizer for NoSymbols
{
    fn symbolize(&self, _pc: Address) -> Option<Symbolication>
    {
        None
    }
}

/// Symbolizer backed by the executable's own symbol table and DWARF
///
/// Runtime addresses are turned into file addresses by subtracting the
/// load bias (the slide of a PIE or ASLR'd image); the backend knows it
/// from the loader's view of the process.
pub struct DwarfSymbolizer
{
    path: PathBuf,
    loader: Mutex<Loader>,
    load_bias: u64,
}

impl fmt::Debug for DwarfSymbolizer
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("DwarfSymbolizer")
            .field("path", &self.path)
            .field("load_bias", &format_args!("0x{:x}", self.load_bias))
            .finish_non_exhaustive()
    }
}

impl DwarfSymbolizer
{
    /// Load symbols from the executable (or separate debug file) at `path`.
    ///
    /// ## Errors
    ///
    /// - `Io`: the file cannot be accessed
    /// - `Target`: the file is not an object file `addr2line` understands
    pub fn open(path: impl AsRef<Path>) -> MortemResult<Self>
    {
        let path = path.as_ref();
        std::fs::metadata(path)?;

        let loader = Loader::new(path).map_err(|err| {
            warn!(path = %path.display(), error = %err, "failed to load debug information");
            MortemError::Target(format!("cannot load symbols from {}: {err}", path.display()))
        })?;
        debug!(path = %path.display(), "loaded debug information");

        Ok(Self {
            path: path.to_path_buf(),
            loader: Mutex::new(loader),
            load_bias: 0,
        })
    }

    /// Set the difference between runtime and file addresses.
    #[must_use]
    pub fn with_load_bias(mut self, load_bias: u64) -> Self
    {
        self.load_bias = load_bias;
        self
    }

    /// File the symbols were loaded from.
    pub fn path(&self) -> &Path
    {
        &self.path
    }
}

impl Symbolizer for DwarfSymbolizer
{
    fn symbolize(&self, pc: Address) -> Option<Symbolication>
    {
        let file_address = pc.value().checked_sub(self.load_bias)?;
        let Ok(loader) = self.loader.lock() else {
            warn!(%pc, path = %self.path.display(), "symbol loader poisoned, frame left unsymbolicated");
            return None;
        };

        let function = loader.find_symbol(file_address).map(SymbolName::from_linkage_name);
        let location = match loader.find_location(file_address) {
            Ok(Some(location)) => location.file.map(|file| SourceLocation {
                file: file.to_string(),
                line: location.line,
                column: location.column,
            }),
            Ok(None) => None,
            Err(err) => {
                debug!(%pc, error = %err, "line lookup failed");
                None
            }
        };

        if function.is_none() && location.is_none() {
            return None;
        }
        Some(Symbolication { function, location })
    }
}
