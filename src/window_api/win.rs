use anyhow::{Result, anyhow};
use tracing::error;
use windows::{
    Win32::{
        Foundation::{BOOL, CloseHandle, GetLastError, HANDLE, HWND},
        System::{
            Diagnostics::Debug::{
                FORMAT_MESSAGE_FROM_SYSTEM, FORMAT_MESSAGE_IGNORE_INSERTS, FormatMessageW,
            },
            SystemServices::{LANG_ENGLISH, SUBLANG_ENGLISH_US},
            Threading::{
                OpenProcess, PROCESS_NAME_WIN32, PROCESS_QUERY_INFORMATION, PROCESS_VM_READ,
                QueryFullProcessImageNameW,
            },
        },
        UI::WindowsAndMessaging::{GetForegroundWindow, GetWindowTextW, GetWindowThreadProcessId},
    },
    core::PWSTR,
};

use super::{ForegroundWindow, WindowSource, executable_file_name};

fn last_error_message() -> String {
    let err = unsafe { GetLastError() };
    let mut message_buffer = [0u16; 2048];
    let size = unsafe {
        FormatMessageW(
            FORMAT_MESSAGE_FROM_SYSTEM | FORMAT_MESSAGE_IGNORE_INSERTS,
            None,
            err.0,
            LANG_ENGLISH | (SUBLANG_ENGLISH_US << 10),
            PWSTR::from_raw(message_buffer.as_mut_ptr()),
            2048,
            None,
        )
    };
    String::from_utf16_lossy(&message_buffer[0..size as usize])
}

#[tracing::instrument]
pub fn get_foreground() -> Result<Option<ForegroundWindow>> {
    let window = unsafe { GetForegroundWindow() };

    // Happens while the desktop or the lock screen has focus.
    if window.is_invalid() {
        return Ok(None);
    }

    let mut pid = 0u32;
    unsafe { GetWindowThreadProcessId(window, Some(&mut pid)) };
    if pid == 0 {
        return Err(anyhow!("Failed to get window process {}", last_error_message()));
    }

    let process_handle = unsafe {
        OpenProcess(
            PROCESS_QUERY_INFORMATION | PROCESS_VM_READ,
            BOOL::from(false),
            pid,
        )
    }
    .inspect_err(|e| error!("Failed to open process {e:?}"))?;

    let mut text: [u16; 4096] = [0; 4096];
    let process_path = unsafe { get_window_process_path(process_handle, &mut text) }
        .inspect_err(|e| error!("Failed to get window process path {e:?}"));
    let title = unsafe { get_window_title(window, &mut text) };

    unsafe { CloseHandle(process_handle) }
        .inspect_err(|e| error!("Failed to close handle {e:?}"))?;

    Ok(Some(ForegroundWindow {
        title: title.into(),
        executable_name: executable_file_name(&process_path?).into(),
        pid,
    }))
}

unsafe fn get_window_process_path(process_handle: HANDLE, text: &mut [u16]) -> Result<String> {
    unsafe {
        let mut length = text.len() as u32;
        QueryFullProcessImageNameW(
            process_handle,
            PROCESS_NAME_WIN32,
            windows::core::PWSTR(text.as_mut_ptr()),
            &mut length,
        )?;
        Ok(String::from_utf16_lossy(&text[..length as usize]))
    }
}

unsafe fn get_window_title(window_handle: HWND, text: &mut [u16]) -> String {
    let len = unsafe { GetWindowTextW(window_handle, text) };
    String::from_utf16_lossy(&text[..len as usize])
}

pub struct WindowsWindowSource {}

impl WindowsWindowSource {
    pub fn new() -> Self {
        Self {}
    }
}

impl Default for WindowsWindowSource {
    fn default() -> Self {
        Self::new()
    }
}

impl WindowSource for WindowsWindowSource {
    fn get_foreground(&mut self) -> Result<Option<ForegroundWindow>> {
        get_foreground().inspect_err(|e| error!("Failed to get foreground window {e:?}"))
    }
}
