//! Dynamic library loading and symbol resolution
//!
//! Opens shared libraries through the platform dynamic linker using
//! `libloading`, with the caller choosing lazy or immediate binding.
//! Every open/resolve/close is funneled through [`link_call`], which turns a
//! linker failure into a [`LinkError`] carrying the `dlerror()` text that
//! `libloading` captured right after the failing call.

use crate::error::LinkError;
use libloading::os::unix::{Library, RTLD_LAZY, RTLD_NOW};
use objbridge_config::OpenMode;
use std::cell::RefCell;
use std::ffi::c_void;
use std::fmt;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::rc::{Rc, Weak};
use tracing::{debug, warn};

/// Placeholder path reported for the running process image
const PROCESS_IMAGE: &str = "<process>";

fn mode_flags(mode: OpenMode) -> i32 {
    match mode {
        OpenMode::Lazy => RTLD_LAZY,
        OpenMode::Now => RTLD_NOW,
    }
}

/// Map a `libloading` result onto the bridge's link error
///
/// `libloading` reports the `*Unknown` variants when the linker left no
/// diagnostic behind; those become `diagnostic: None`.
pub(crate) fn link_call<T>(
    operation: &'static str,
    argument: &str,
    result: Result<T, libloading::Error>,
) -> Result<T, LinkError> {
    result.map_err(|err| {
        let diagnostic = match err {
            libloading::Error::DlOpenUnknown
            | libloading::Error::DlSymUnknown
            | libloading::Error::DlCloseUnknown => None,
            other => Some(other.to_string()),
        };
        LinkError::new(operation, argument, diagnostic)
    })
}

struct LibraryInner {
    path: PathBuf,
    mode: OpenMode,
    library: RefCell<Option<Library>>,
}

impl LibraryInner {
    fn is_open(&self) -> bool {
        self.library.borrow().is_some()
    }
}

impl Drop for LibraryInner {
    fn drop(&mut self) {
        if let Some(library) = self.library.get_mut().take() {
            let path = self.path.display().to_string();
            match link_call("dlclose", &path, library.close()) {
                Ok(()) => debug!(path = %path, "closed library on drop"),
                Err(err) => warn!(path = %path, error = %err, "implicit library close failed"),
            }
        }
    }
}

/// An open dynamic library
///
/// Clones share the same OS handle. The handle is closed exactly once: by an
/// explicit [`close`](Self::close), or when the last clone is dropped.
#[derive(Clone)]
pub struct LibraryHandle {
    inner: Rc<LibraryInner>,
}

impl LibraryHandle {
    /// Open the library at `path`
    ///
    /// # Safety
    ///
    /// Opening a library runs its initializers in this process. The caller
    /// must trust the library.
    pub unsafe fn open(path: impl AsRef<Path>, mode: OpenMode) -> Result<Self, LinkError> {
        let path = path.as_ref();
        let shown = path.display().to_string();
        let library = link_call(
            "dlopen",
            &shown,
            Library::open(Some(path.as_os_str()), mode_flags(mode)),
        )?;
        debug!(path = %shown, mode = %mode, "opened library");
        Ok(Self::from_library(path.to_path_buf(), mode, library))
    }

    /// Handle to the symbols already loaded into the running process
    pub fn open_process() -> Self {
        Self::from_library(PathBuf::from(PROCESS_IMAGE), OpenMode::Lazy, Library::this())
    }

    fn from_library(path: PathBuf, mode: OpenMode, library: Library) -> Self {
        Self {
            inner: Rc::new(LibraryInner {
                path,
                mode,
                library: RefCell::new(Some(library)),
            }),
        }
    }

    /// Resolve `name` to a non-null address in this library
    pub fn resolve(&self, name: &str) -> Result<Symbol, LinkError> {
        let guard = self.inner.library.borrow();
        let library = guard
            .as_ref()
            .ok_or_else(|| LinkError::new("dlsym", name, Some("library closed".to_string())))?;
        // SAFETY: the symbol is only read as an address, never as a typed value.
        let raw = link_call("dlsym", name, unsafe {
            library.get::<*mut c_void>(name.as_bytes())
        })?;
        let address = NonNull::new(*raw).ok_or_else(|| LinkError::new("dlsym", name, None))?;
        debug!(symbol = name, address = ?address, path = %self.inner.path.display(), "resolved symbol");
        Ok(Symbol {
            name: name.to_string(),
            address,
            library: Some(Rc::downgrade(&self.inner)),
        })
    }

    /// Tie an address obtained some other way to this library
    ///
    /// The symbol stops being live when this library closes.
    ///
    /// # Safety
    ///
    /// `address` must lie inside this library's image.
    pub unsafe fn adopt(&self, name: &str, address: *const c_void) -> Result<Symbol, LinkError> {
        let address =
            NonNull::new(address as *mut c_void).ok_or_else(|| LinkError::new("dlsym", name, None))?;
        Ok(Symbol {
            name: name.to_string(),
            address,
            library: Some(Rc::downgrade(&self.inner)),
        })
    }

    /// Close the library now
    ///
    /// Symbols resolved from it stop being live; other clones see it closed.
    pub fn close(self) -> Result<(), LinkError> {
        let shown = self.inner.path.display().to_string();
        let library = self
            .inner
            .library
            .borrow_mut()
            .take()
            .ok_or_else(|| {
                LinkError::new("dlclose", shown.as_str(), Some("library already closed".to_string()))
            })?;
        link_call("dlclose", &shown, library.close())?;
        debug!(path = %shown, "closed library");
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn mode(&self) -> OpenMode {
        self.inner.mode
    }
}

impl fmt::Debug for LibraryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LibraryHandle")
            .field("path", &self.inner.path)
            .field("mode", &self.inner.mode)
            .field("open", &self.is_open())
            .finish()
    }
}

/// A resolved, non-null address
///
/// Holds only a weak reference to the library it came from.
#[derive(Clone)]
pub struct Symbol {
    name: String,
    address: NonNull<c_void>,
    library: Option<Weak<LibraryInner>>,
}

impl Symbol {
    /// Wrap an address that did not come from a [`LibraryHandle`]
    ///
    /// Such symbols are always considered live.
    ///
    /// # Safety
    ///
    /// `address` must stay valid for as long as the symbol is used.
    pub unsafe fn from_raw(name: impl Into<String>, address: *const c_void) -> Result<Self, LinkError> {
        let name = name.into();
        let address =
            NonNull::new(address as *mut c_void).ok_or_else(|| LinkError::new("dlsym", name.as_str(), None))?;
        Ok(Self {
            name,
            address,
            library: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> *mut c_void {
        self.address.as_ptr()
    }

    /// False once the owning library has been closed or dropped
    pub fn is_live(&self) -> bool {
        match &self.library {
            None => true,
            Some(weak) => weak.upgrade().map_or(false, |inner| inner.is_open()),
        }
    }

    /// Read the pointer stored at this data symbol
    ///
    /// # Safety
    ///
    /// The symbol must name a pointer-sized data object and be live.
    pub unsafe fn read_pointer(&self) -> Result<*mut c_void, LinkError> {
        if !self.is_live() {
            return Err(LinkError::new("read", self.name.as_str(), Some("library closed".to_string())));
        }
        Ok(*(self.address.as_ptr() as *const *mut c_void))
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{:p}", self.name, self.address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static DATA_WORD: usize = 0x5a5a;

    #[test]
    fn test_mode_flags() {
        assert_eq!(mode_flags(OpenMode::Lazy), RTLD_LAZY);
        assert_eq!(mode_flags(OpenMode::Now), RTLD_NOW);
    }

    #[test]
    fn test_open_missing_library() {
        let err = unsafe { LibraryHandle::open("/nonexistent/libobjbridge_missing.so", OpenMode::Now) }
            .unwrap_err();
        assert_eq!(err.operation, "dlopen");
        assert_eq!(err.argument, "/nonexistent/libobjbridge_missing.so");
        assert!(err.diagnostic.is_some());
    }

    #[test]
    fn test_link_call_unknown_diagnostic() {
        let err = link_call::<()>("dlsym", "x", Err(libloading::Error::DlSymUnknown)).unwrap_err();
        assert_eq!(err.diagnostic, None);
    }

    #[test]
    fn test_process_handle_resolves_libc() {
        let process = LibraryHandle::open_process();
        let symbol = process.resolve("malloc").unwrap();
        assert_eq!(symbol.name(), "malloc");
        assert!(symbol.is_live());
        assert_eq!(process.path(), Path::new(PROCESS_IMAGE));
    }

    #[test]
    fn test_close_twice_reports_error() {
        let process = LibraryHandle::open_process();
        let clone = process.clone();
        process.close().unwrap();
        let err = clone.close().unwrap_err();
        assert_eq!(err.diagnostic(), "library already closed");
    }

    #[test]
    fn test_symbol_dies_with_library() {
        let process = LibraryHandle::open_process();
        let symbol = process.resolve("malloc").unwrap();
        drop(process);
        assert!(!symbol.is_live());
    }

    #[test]
    fn test_adopted_symbol_follows_library() {
        let process = LibraryHandle::open_process();
        let symbol = unsafe { process.adopt("DATA_WORD", &DATA_WORD as *const usize as *const c_void) }
            .unwrap();
        assert!(symbol.is_live());
        process.close().unwrap();
        assert!(!symbol.is_live());
    }

    #[test]
    fn test_raw_symbol_read_pointer() {
        let slot: *const usize = &DATA_WORD;
        let holder = &slot as *const *const usize as *const c_void;
        let symbol = unsafe { Symbol::from_raw("DATA_WORD", holder) }.unwrap();
        let value = unsafe { symbol.read_pointer() }.unwrap();
        assert_eq!(value as *const usize, slot);
    }

    #[test]
    fn test_raw_symbol_rejects_null() {
        let err = unsafe { Symbol::from_raw("nothing", std::ptr::null()) }.unwrap_err();
        assert_eq!(err.operation, "dlsym");
        assert_eq!(err.diagnostic, None);
    }
}
