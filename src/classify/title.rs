use std::{collections::HashMap, sync::LazyLock};

use anyhow::Result;
use regex::Regex;
use tracing::warn;

use super::{BrowserSet, executable_stem};

/// Key used when nothing is left of a title after cleaning. Aggregate keys are never empty.
pub const EMPTY_TITLE_PLACEHOLDER: &str = "New Tab / Other";

const BROWSER_NAMES: &[&str] = &[
    "Google Chrome",
    "Mozilla Firefox",
    "Microsoft Edge",
    "Brave",
    "Opera",
    "Vivaldi",
    "Thorium",
    "LibreWolf",
    "Chromium",
    "Zen Browser",
    "Arc",
    "Internet Explorer",
    "Personal",
    "Work",
    r"Profile \d+",
];

const SEPARATOR: &str = r"\s*[-–—|]\s*";

static LEADING_BADGES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:\(\d+\+?\)\s*)+").expect("Valid badge pattern"));
static TRAILING_BADGES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:\s*\(\d+\+?\))+\s*$").expect("Valid badge pattern"));
static DISPLAY_SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*[-–—|·]\s*").expect("Valid separator pattern"));

fn executable_suffix_pattern(stem: &str) -> Result<Regex> {
    // A word boundary never matches after a trailing symbol such as the `+` of `notepad++`.
    let ends_in_word = stem
        .chars()
        .last()
        .is_some_and(|c| c.is_alphanumeric() || c == '_');
    let boundary = if ends_in_word { r"\b" } else { "" };
    Ok(Regex::new(&format!(
        r"(?i){SEPARATOR}{}{boundary}.*$",
        regex::escape(stem)
    ))?)
}

/// Strips browser noise from window titles. The patterns for every known browser are compiled
/// once, when the cleaner is built.
#[derive(Debug, Clone)]
pub struct TitleCleaner {
    browser_suffix: Regex,
    executable_suffixes: HashMap<String, Regex>,
}

impl TitleCleaner {
    pub fn new(browsers: &BrowserSet) -> Result<Self> {
        let browser_suffix = Regex::new(&format!(
            r"(?i){SEPARATOR}(?:{})\b.*$",
            BROWSER_NAMES.join("|")
        ))?;
        let executable_suffixes = browsers
            .stems()
            .map(|stem| Ok((stem.to_string(), executable_suffix_pattern(stem)?)))
            .collect::<Result<_>>()?;
        Ok(Self {
            browser_suffix,
            executable_suffixes,
        })
    }

    /// Produces the key a browser session is aggregated under.
    ///
    /// `(3) Inbox - Gmail - Google Chrome` becomes `Inbox - Gmail`. The result never contains
    /// a browser suffix or a notification badge, so cleaning it again is a no-op.
    pub fn clean(&self, raw_title: &str, executable: &str) -> String {
        let mut clean = self.browser_suffix.replace(raw_title, "").into_owned();

        let stem = executable_stem(executable);
        if !stem.is_empty() {
            match self.executable_suffixes.get(&stem) {
                Some(pattern) => clean = pattern.replace(&clean, "").into_owned(),
                None => match executable_suffix_pattern(&stem) {
                    Ok(pattern) => clean = pattern.replace(&clean, "").into_owned(),
                    Err(e) => warn!("Can't build title pattern for {stem}: {e:?}"),
                },
            }
        }

        let clean = LEADING_BADGES.replace(&clean, "");
        let clean = TRAILING_BADGES.replace(&clean, "");
        let clean = clean.trim();

        if clean.is_empty() {
            EMPTY_TITLE_PLACEHOLDER.to_string()
        } else {
            clean.to_string()
        }
    }
}

impl Default for TitleCleaner {
    fn default() -> Self {
        Self::new(&BrowserSet::default()).expect("Default title patterns are valid")
    }
}

/// Short form of a title used when listing members of a category: the first non-empty
/// separator-delimited part.
pub fn display_title(title: &str) -> String {
    let mut parts = DISPLAY_SEPARATOR.split(title);
    let first = parts.next().map(str::trim).unwrap_or_default();
    let cleaned = if first.is_empty() {
        parts.next().map(str::trim).unwrap_or_default()
    } else {
        first
    };

    if cleaned.is_empty() {
        title.to_string()
    } else {
        cleaned.to_string()
    }
}
