//! Dynamic library loading, mirroring the search order a native linker would use for `-lfoo`.
//!
//! Given a bare name like `"m"`, we don't know whether the caller means a path, a file in the
//! current directory, or a system library that needs a `lib`/`.so` dance — so we try each
//! plausible form in turn and keep the first one that loads.

use std::path::PathBuf;

use crate::error::{Diagnostic, ErrorKind};

const SEARCH_DIRS: &[&str] = &["/usr/lib", "/usr/lib/x86_64-linux-gnu", "/usr/local/lib", "/lib", "/lib/x86_64-linux-gnu"];

/// A loaded dynamic library. Dropping this unloads it, same as `libloading::Library`.
pub struct DynLib {
    pub name: String,
    lib: libloading::Library,
}

impl std::fmt::Debug for DynLib {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynLib").field("name", &self.name).finish()
    }
}

impl DynLib {
    /// Opens the current process's own symbol table (`path == None`), letting `@import`ed C
    /// headers resolve against whatever is already linked into the interpreter.
    #[cfg(unix)]
    pub fn open_self() -> crate::error::Result<Self> {
        // SAFETY: loading the running process image has no library-specific initializers to run.
        let lib = unsafe { libloading::os::unix::Library::this() };
        Ok(Self { name: "<self>".into(), lib: lib.into() })
    }

    #[cfg(windows)]
    pub fn open_self() -> crate::error::Result<Self> {
        Err(Diagnostic::at_line(ErrorKind::Import, "opening the current process as a native library is not supported on this platform", 0))
    }

    /// Resolves `path` the way a linker resolves `-l<name>`: try it verbatim, then with a `.so`
    /// suffix, then with a `lib`/`.so` wrap, then the same wrapped name inside each directory in
    /// [`SEARCH_DIRS`].
    pub fn open(path: &str) -> crate::error::Result<Self> {
        if path.is_empty() {
            return Self::open_self();
        }

        let mut candidates = vec![PathBuf::from(path), PathBuf::from(format!("{path}.so"))];
        let file_stem = path.rsplit('/').next().unwrap_or(path);
        candidates.push(PathBuf::from(format!("lib{file_stem}.so")));
        for dir in SEARCH_DIRS {
            candidates.push(PathBuf::from(format!("{dir}/lib{file_stem}.so")));
        }

        for candidate in &candidates {
            // SAFETY: library initializers run arbitrary code, same trust boundary as any
            // dynamically loaded native extension.
            if let Ok(lib) = unsafe { libloading::Library::new(candidate) } {
                tracing::debug!(path, loaded = %candidate.display(), "opened native library");
                return Ok(Self { name: path.to_string(), lib });
            }
        }

        tracing::warn!(path, tried = candidates.len(), "failed to open native library");
        Err(Diagnostic::at_line(
            ErrorKind::Import,
            format!("could not load native library '{path}' (tried {} candidates)", candidates.len()),
            0,
        ))
    }

    /// Looks up `symbol`, returning its address as an opaque function pointer.
    pub fn symbol(&self, symbol: &str) -> crate::error::Result<*const ()> {
        // SAFETY: the returned pointer is only ever invoked through a `ForeignFunction` whose
        // declared signature the caller is responsible for getting right, the same trust
        // boundary as any FFI call.
        unsafe {
            self.lib.get::<*const ()>(symbol.as_bytes()).map(|sym| *sym).map_err(|e| {
                tracing::warn!(library = %self.name, symbol, "symbol not found");
                Diagnostic::at_line(ErrorKind::Import, format!("symbol '{symbol}' not found in '{}': {e}", self.name), 0)
            })
        }
    }
}
