//! Contains logic for asking the desktop which window currently holds focus.
//! [GenericWindowSource] is the main artifact of this module that abstracts
//! the operations.

#[cfg(feature = "win")]
pub mod win;
#[cfg(feature = "x11")]
pub mod x11;

#[cfg(feature = "win")]
extern crate windows;

#[cfg(feature = "x11")]
extern crate xcb;

use std::{path::Path, sync::Arc};

use anyhow::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForegroundWindow {
    /// Title of the window. For example 'bash in hello' or 'Document 1' or 'Vibing in YouTube -
    /// Google Chrome'
    pub title: Arc<str>,
    /// File name of the owning executable. For example 'nvim' or 'chrome.exe'
    pub executable_name: Arc<str>,
    pub pid: u32,
}

/// Intended to serve as a contract windows and linux systems must implement.
#[cfg_attr(test, mockall::automock)]
pub trait WindowSource: Send {
    /// Returns the focused window, or `None` when nothing usable holds focus (desktop, lock
    /// screen, a window without an owning process).
    fn get_foreground(&mut self) -> Result<Option<ForegroundWindow>>;
}

/// Serves as a cross-compatible WindowSource implementation.
pub struct GenericWindowSource {
    inner: Box<dyn WindowSource>,
}

impl GenericWindowSource {
    pub fn new() -> Result<Self> {
        cfg_if::cfg_if! {
            if #[cfg(feature = "win")] {
                use win::WindowsWindowSource;
                Ok(Self {
                    inner: Box::new(WindowsWindowSource::new()),
                })
            }
            else if #[cfg(feature = "x11")] {
                use x11::X11WindowSource;
                Ok(Self {
                    inner: Box::new(X11WindowSource::new()?),
                })
            }
            else {
                Err(anyhow::anyhow!(
                    "No window source was compiled in. Build with the `win` or `x11` feature"
                ))
            }
        }
    }
}

impl WindowSource for GenericWindowSource {
    fn get_foreground(&mut self) -> Result<Option<ForegroundWindow>> {
        self.inner.get_foreground()
    }
}

/// Reduces a full executable path to its file name.
pub fn executable_file_name(value: &str) -> String {
    Path::new(value)
        .file_name()
        .map(|v| v.to_string_lossy().to_string())
        .unwrap_or_else(|| value.to_string())
}
