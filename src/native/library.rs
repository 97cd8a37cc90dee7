//! Dynamic library loading and routine resolution
//!
//! Platform wrapper around dlopen/LoadLibrary, plus an in-process symbol
//! table form that backs virtual libraries: routine tables handed to the
//! executor directly, used by the test suites and embedded executors.

use crate::errors::{Error, Result};
use core::ffi::c_void;
use core::ptr::NonNull;
use std::collections::HashMap;

use std::ffi::CString;

/// One resolved routine: its address and, where the symbol encodes it, the
/// stdcall stack arity (`name@N` decoration on 32-bit targets).
#[derive(Debug, Clone, Copy)]
pub struct RoutineSym {
    pub ptr: *const (),
    pub stdcall_arity: Option<usize>,
}

unsafe impl Send for RoutineSym {}

/// A loaded library, native or in-process
pub enum Library {
    Native(NativeLibrary),
    InProcess(InProcessLibrary),
}

impl Library {
    /// Load a native library by name or path
    pub fn open(path: &str) -> Result<Self> {
        NativeLibrary::open(path).map(Self::Native)
    }

    /// Resolve a routine by name
    pub fn routine(&self, name: &str) -> Result<RoutineSym> {
        match self {
            Self::Native(lib) => lib.symbol(name).map(|ptr| RoutineSym {
                ptr,
                stdcall_arity: None,
            }),
            Self::InProcess(lib) => lib
                .symbols
                .get(name)
                .copied()
                .ok_or_else(|| Error::Symbol { name: name.into() }),
        }
    }
}

/// Routine table served from within the executor process
pub struct InProcessLibrary {
    symbols: HashMap<String, RoutineSym>,
}

impl InProcessLibrary {
    pub fn new() -> Self {
        Self {
            symbols: HashMap::new(),
        }
    }

    /// Add a routine; `arity` mirrors the stdcall argument count the symbol
    /// decoration would carry on a 32-bit target.
    pub fn routine(mut self, name: impl Into<String>, ptr: *const (), arity: usize) -> Self {
        self.symbols.insert(
            name.into(),
            RoutineSym {
                ptr,
                stdcall_arity: Some(arity),
            },
        );
        self
    }

    /// Add a routine with no arity metadata
    pub fn routine_unsized(mut self, name: impl Into<String>, ptr: *const ()) -> Self {
        self.symbols.insert(
            name.into(),
            RoutineSym {
                ptr,
                stdcall_arity: None,
            },
        );
        self
    }
}

impl Default for InProcessLibrary {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl Send for InProcessLibrary {}
unsafe impl Sync for InProcessLibrary {}

/// Handle to a dynamically loaded native library
pub struct NativeLibrary {
    handle: NonNull<c_void>,
}

impl NativeLibrary {
    #[cfg(unix)]
    fn open(name: &str) -> Result<Self> {
        use std::os::raw::c_char;

        extern "C" {
            fn dlopen(filename: *const c_char, flag: i32) -> *mut c_void;
            fn dlerror() -> *const c_char;
        }

        const RTLD_NOW: i32 = 2;

        let cname = CString::new(name).map_err(|_| Error::Load {
            what: format!("invalid library name '{}'", name),
        })?;

        unsafe {
            let handle = dlopen(cname.as_ptr(), RTLD_NOW);
            NonNull::new(handle).map(|handle| Self { handle }).ok_or_else(|| {
                let err = dlerror();
                let what = if err.is_null() {
                    name.to_string()
                } else {
                    std::ffi::CStr::from_ptr(err).to_string_lossy().into_owned()
                };
                Error::Load { what }
            })
        }
    }

    #[cfg(windows)]
    fn open(name: &str) -> Result<Self> {
        use std::ffi::OsStr;
        use std::os::windows::ffi::OsStrExt;

        extern "system" {
            fn LoadLibraryW(filename: *const u16) -> *mut c_void;
            fn GetLastError() -> u32;
        }

        let wide: Vec<u16> = OsStr::new(name).encode_wide().chain(Some(0)).collect();

        unsafe {
            let handle = LoadLibraryW(wide.as_ptr());
            NonNull::new(handle).map(|handle| Self { handle }).ok_or_else(|| {
                Error::Load {
                    what: format!("'{}' (error code {})", name, GetLastError()),
                }
            })
        }
    }

    #[cfg(unix)]
    fn symbol(&self, name: &str) -> Result<*const ()> {
        use std::os::raw::c_char;

        extern "C" {
            fn dlsym(handle: *mut c_void, symbol: *const c_char) -> *mut c_void;
        }

        let cname = CString::new(name).map_err(|_| Error::Symbol { name: name.into() })?;

        unsafe {
            let ptr = dlsym(self.handle.as_ptr(), cname.as_ptr());
            if ptr.is_null() {
                Err(Error::Symbol { name: name.into() })
            } else {
                Ok(ptr as *const ())
            }
        }
    }

    #[cfg(windows)]
    fn symbol(&self, name: &str) -> Result<*const ()> {
        extern "system" {
            fn GetProcAddress(module: *mut c_void, name: *const u8) -> *mut c_void;
        }

        let cname = CString::new(name).map_err(|_| Error::Symbol { name: name.into() })?;

        unsafe {
            let ptr = GetProcAddress(self.handle.as_ptr(), cname.as_ptr() as *const u8);
            if ptr.is_null() {
                Err(Error::Symbol { name: name.into() })
            } else {
                Ok(ptr as *const ())
            }
        }
    }
}

impl Drop for NativeLibrary {
    #[cfg(unix)]
    fn drop(&mut self) {
        extern "C" {
            fn dlclose(handle: *mut c_void) -> i32;
        }
        unsafe {
            dlclose(self.handle.as_ptr());
        }
    }

    #[cfg(windows)]
    fn drop(&mut self) {
        extern "system" {
            fn FreeLibrary(module: *mut c_void) -> i32;
        }
        unsafe {
            FreeLibrary(self.handle.as_ptr());
        }
    }
}

unsafe impl Send for NativeLibrary {}
unsafe impl Sync for NativeLibrary {}
