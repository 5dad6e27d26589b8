//! A bridge session: the runtime libraries, the dispatcher and everything
//! acquired through them, released together
//!
//! Every library the session opens and every object handed to
//! [`Session::release_on_exit`] is registered on one cleanup stack, so
//! closing or dropping the session releases objects before the libraries
//! they came from.

use crate::error::BridgeResult;
use crate::ffi::loader::LibraryHandle;
use crate::lifetime::CleanupStack;
use crate::objc::dispatch::{MessageDispatcher, ObjectRef};
use crate::objc::runtime::EntryPoints;
use objbridge_config::{BridgeConfig, OpenMode};
use std::collections::HashMap;
use std::path::Path;
use std::rc::Rc;
use tracing::debug;

fn close_library(handle: LibraryHandle) -> BridgeResult<()> {
    handle.close().map_err(Into::into)
}

pub struct Session {
    dispatcher: Rc<MessageDispatcher>,
    config: BridgeConfig,
    objc: LibraryHandle,
    system: LibraryHandle,
    frameworks: HashMap<String, LibraryHandle>,
    stack: CleanupStack,
}

impl Session {
    /// Open the runtime and system libraries and resolve every entry point
    ///
    /// On failure, libraries opened so far are closed before the error is
    /// returned.
    ///
    /// # Safety
    ///
    /// Opening libraries runs their initializers, and the configured
    /// libraries must really export the runtime's entry points with their
    /// usual signatures.
    pub unsafe fn open(config: &BridgeConfig) -> BridgeResult<Self> {
        let mut stack = CleanupStack::new();
        let objc = stack.acquire(
            LibraryHandle::open(&config.objc_library, config.objc_mode)?,
            close_library,
        );
        let system = stack.acquire(
            LibraryHandle::open(&config.system_library, config.system_mode)?,
            close_library,
        );
        let entry = EntryPoints::resolve(&objc, &system, &config.block_marker_symbol)?;
        debug!(
            objc = %config.objc_library.display(),
            system = %config.system_library.display(),
            "session opened"
        );

        Ok(Self::assemble(config, objc, system, entry, stack))
    }

    /// Build a session around libraries that are already open and entry
    /// points resolved some other way
    ///
    /// Both libraries are closed with the session.
    pub fn with_entry_points(
        config: &BridgeConfig,
        objc: LibraryHandle,
        system: LibraryHandle,
        entry: EntryPoints,
    ) -> Self {
        let mut stack = CleanupStack::new();
        let objc = stack.acquire(objc, close_library);
        let system = stack.acquire(system, close_library);
        Self::assemble(config, objc, system, entry, stack)
    }

    fn assemble(
        config: &BridgeConfig,
        objc: LibraryHandle,
        system: LibraryHandle,
        entry: EntryPoints,
        stack: CleanupStack,
    ) -> Self {
        Self {
            dispatcher: Rc::new(MessageDispatcher::new(entry)),
            config: config.clone(),
            objc,
            system,
            frameworks: HashMap::new(),
            stack,
        }
    }

    pub fn dispatcher(&self) -> &MessageDispatcher {
        &self.dispatcher
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn objc_library(&self) -> &LibraryHandle {
        &self.objc
    }

    pub fn system_library(&self) -> &LibraryHandle {
        &self.system
    }

    /// Open another library; it is closed with the session
    ///
    /// # Safety
    ///
    /// See [`LibraryHandle::open`].
    pub unsafe fn open_library(
        &mut self,
        path: impl AsRef<Path>,
        mode: OpenMode,
    ) -> BridgeResult<LibraryHandle> {
        let handle = LibraryHandle::open(path, mode)?;
        Ok(self.stack.acquire(handle, close_library))
    }

    /// Open the framework `name` once and reuse the handle afterwards
    ///
    /// The binary is `<framework root>/<name>.framework/<name>` unless `path`
    /// is given.
    ///
    /// # Safety
    ///
    /// See [`LibraryHandle::open`].
    pub unsafe fn load_framework(
        &mut self,
        name: &str,
        path: Option<&Path>,
    ) -> BridgeResult<LibraryHandle> {
        if let Some(handle) = self.frameworks.get(name) {
            return Ok(handle.clone());
        }
        let binary = match path {
            Some(path) => path.to_path_buf(),
            None => self.config.framework_path(name),
        };
        let handle = self.open_library(&binary, self.config.framework_mode)?;
        self.frameworks.insert(name.to_string(), handle.clone());
        Ok(handle)
    }

    /// Send `release` to `obj` when the session ends
    pub fn release_on_exit(&mut self, obj: ObjectRef) -> ObjectRef {
        let dispatcher = Rc::clone(&self.dispatcher);
        // SAFETY: the caller handed over one reference to `obj`; the session's
        // libraries are closed only after this action runs.
        self.stack
            .acquire(obj, move |obj| unsafe { dispatcher.release(obj) })
    }

    /// Number of frameworks loaded so far
    pub fn framework_count(&self) -> usize {
        self.frameworks.len()
    }

    /// Release everything now, surfacing the first cleanup failure
    pub fn close(mut self) -> BridgeResult<()> {
        self.frameworks.clear();
        std::mem::take(&mut self.stack).close()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("objc", &self.objc)
            .field("system", &self.system)
            .field("frameworks", &self.frameworks.keys().collect::<Vec<_>>())
            .field("pending_cleanup", &self.stack.len())
            .finish()
    }
}
