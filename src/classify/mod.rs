//! Pure classification of focus observations.
//!
//!  - [BrowserSet] answers "is this executable a browser".
//!  - [title::TitleCleaner] turns a noisy tab title into a stable aggregate key.
//!  - [categories::CategoryTable] maps cleaned titles onto semantic buckets for reports.
//!
//! Everything here is built once at startup and only read afterwards.

pub mod categories;
pub mod title;

use std::{collections::BTreeSet, env::consts::EXE_SUFFIX};

use anyhow::{Result, ensure};

use crate::window_api::executable_file_name;

const DEFAULT_BROWSERS: &[&str] = &[
    "chrome",
    "firefox",
    "msedge",
    "brave",
    "opera",
    "vivaldi",
    "waterfox",
    "arc",
    "iexplore",
    "safari",
    "whale",
    "yandex",
    "thorium",
    "librewolf",
    "chromium",
    "floorp",
    "zen",
    "google-chrome",
    "google-chrome-stable",
    "chromium-browser",
    "firefox-esr",
    "microsoft-edge",
    "brave-browser",
];

/// Lowercase file name without directories and without a `.exe` suffix. Two executables are the
/// same program when their stems are equal, regardless of the platform they were observed on.
pub fn executable_stem(executable: &str) -> String {
    let name = executable_file_name(executable.trim()).to_lowercase();
    match name.strip_suffix(".exe") {
        Some(stem) => stem.to_string(),
        None => name,
    }
}

/// Canonical spelling of a user supplied executable: lowercase and carrying the platform
/// executable suffix.
pub fn normalize_executable(executable: &str) -> Result<String> {
    let stem = executable_stem(executable);
    ensure!(!stem.is_empty(), "Executable name can't be empty");
    Ok(format!("{stem}{EXE_SUFFIX}"))
}

/// Known browsers plus the ones configured by the user.
#[derive(Debug, Clone)]
pub struct BrowserSet {
    stems: BTreeSet<String>,
}

impl BrowserSet {
    pub fn new<S: AsRef<str>>(custom: &[S]) -> Self {
        let stems = DEFAULT_BROWSERS
            .iter()
            .map(|v| v.to_string())
            .chain(custom.iter().map(|v| executable_stem(v.as_ref())))
            .filter(|v| !v.is_empty())
            .collect();
        Self { stems }
    }

    pub fn is_browser(&self, executable: &str) -> bool {
        self.stems.contains(&executable_stem(executable))
    }

    pub fn is_default_browser(executable: &str) -> bool {
        DEFAULT_BROWSERS.contains(&executable_stem(executable).as_str())
    }

    pub fn defaults() -> &'static [&'static str] {
        DEFAULT_BROWSERS
    }

    pub fn stems(&self) -> impl Iterator<Item = &str> {
        self.stems.iter().map(|v| v.as_str())
    }
}

impl Default for BrowserSet {
    fn default() -> Self {
        Self::new::<&str>(&[])
    }
}

const DISPLAY_NAMES: &[(&str, &str)] = &[
    ("code", "VS Code"),
    ("devenv", "Visual Studio"),
    ("idea64", "IntelliJ IDEA"),
    ("pycharm64", "PyCharm"),
    ("webstorm64", "WebStorm"),
    ("goland64", "GoLand"),
    ("rider64", "Rider"),
    ("notepad++", "Notepad++"),
    ("sublime_text", "Sublime Text"),
    ("explorer", "File Explorer"),
    ("discord", "Discord"),
    ("spotify", "Spotify"),
    ("slack", "Slack"),
    ("teams", "Microsoft Teams"),
    ("zoom", "Zoom"),
    ("winword", "Microsoft Word"),
    ("excel", "Microsoft Excel"),
    ("powerpnt", "PowerPoint"),
    ("outlook", "Outlook"),
    ("windowsterminal", "Windows Terminal"),
    ("wt", "Windows Terminal"),
    ("cmd", "Command Prompt"),
    ("powershell", "PowerShell"),
    ("pwsh", "PowerShell"),
    ("chrome", "Google Chrome"),
    ("msedge", "Microsoft Edge"),
    ("firefox", "Firefox"),
    ("gnome-terminal-server", "GNOME Terminal"),
    ("nautilus", "Files"),
];

/// Human friendly name of an application. Unknown executables get their stem with the first
/// letter capitalised.
pub fn app_display_name(executable: &str) -> String {
    let stem = executable_stem(executable);
    if let Some((_, name)) = DISPLAY_NAMES.iter().find(|(exe, _)| *exe == stem) {
        return name.to_string();
    }

    let file_name = executable_file_name(executable.trim());
    let original_stem = file_name
        .strip_suffix(".exe")
        .or_else(|| file_name.strip_suffix(".EXE"))
        .unwrap_or(&file_name);
    let mut chars = original_stem.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use std::env::consts::EXE_SUFFIX;

    use super::{BrowserSet, app_display_name, executable_stem, normalize_executable};

    #[test]
    fn browser_detection_ignores_case_and_suffix() {
        let browsers = BrowserSet::default();
        assert!(browsers.is_browser("chrome.exe"));
        assert!(browsers.is_browser("Chrome.EXE"));
        assert!(browsers.is_browser("/usr/bin/firefox"));
        assert!(!browsers.is_browser("notepad.exe"));
    }

    #[test]
    fn custom_browsers_extend_defaults() {
        let browsers = BrowserSet::new(&["Mullvad-Browser.exe"]);
        assert!(browsers.is_browser("mullvad-browser"));
        assert!(browsers.is_browser("chrome.exe"));
        assert!(BrowserSet::is_default_browser("MSEDGE.exe"));
        assert!(!BrowserSet::is_default_browser("mullvad-browser"));
    }

    #[test]
    fn normalization_carries_platform_suffix() {
        assert_eq!(normalize_executable("  Slack.EXE ").unwrap(), format!("slack{EXE_SUFFIX}"));
        assert_eq!(normalize_executable("slack").unwrap(), format!("slack{EXE_SUFFIX}"));
        assert!(normalize_executable("   ").is_err());
        assert_eq!(executable_stem("/opt/apps/Code.exe"), "code");
    }

    #[test]
    fn display_names() {
        assert_eq!(app_display_name("Code.exe"), "VS Code");
        assert_eq!(app_display_name("notepad.exe"), "Notepad");
        assert_eq!(app_display_name("alacritty"), "Alacritty");
        assert_eq!(app_display_name(""), "");
    }
}
