//! Language detection heuristics for the two supported languages.
//!
//! Deterministic and local: a Han script range check for Traditional Chinese
//! and a diacritic set (plus a few exact filler tokens) for Vietnamese, with
//! URL exclusions so links and ads never trigger a translation call.
//!
//! Known limitation: when a string contains both scripts, Chinese wins
//! (Vietnamese is only chosen when no Han character is present). Mixed-script
//! strings can therefore be misclassified; this mirrors the deployed behavior
//! and is deliberately left as-is.

use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

/// The two supported languages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lang {
    /// Traditional Chinese.
    Zh,
    /// Vietnamese.
    Vi,
}

impl Lang {
    /// The other supported language.
    pub fn other(self) -> Lang {
        match self {
            Lang::Zh => Lang::Vi,
            Lang::Vi => Lang::Zh,
        }
    }

    /// Short language code used in prompts and logs.
    pub fn code(self) -> &'static str {
        match self {
            Lang::Zh => "zh",
            Lang::Vi => "vi",
        }
    }
}

/// An ordered (from, to) language pair for one translation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Direction {
    pub from: Lang,
    pub to: Lang,
}

impl Direction {
    /// Direction from a detected source language to the other language.
    pub fn from_source(from: Lang) -> Self {
        Direction {
            from,
            to: from.other(),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}→{}", self.from.code(), self.to.code())
    }
}

/// Matches http(s) URLs and bare www. links.
static URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(https?://\S+|www\.\S+)").expect("url regex"));

/// Vietnamese diacritic characters, including đ/Đ.
const VI_DIACRITICS: &str = "ăâđêôơưáàảãạấầẩẫậắằẳẵặéèẻẽẹếềểễệíìỉĩịóòỏõọốồổỗộớờởỡợúùủũụứừửữựýỳỷỹỵ\
ĂÂĐÊÔƠƯÁÀẢÃẠẤẦẨẪẬẮẰẲẴẶÉÈẺẼẸẾỀỂỄỆÍÌỈĨỊÓÒỎÕỌỐỒỔỖỘỚỜỞỠỢÚÙỦŨỤỨỪỬỮỰÝỲỶỸỴ";

/// Short Vietnamese filler tokens the diacritic check alone would miss.
const VI_FILLERS: &[&str] = &["nha", "nhe", "nhé", "dạ", "ừ", "ờ", "vâng"];

/// Returns true if the text contains a URL anywhere.
pub fn contains_url(text: &str) -> bool {
    let s = text.trim();
    !s.is_empty() && URL_RE.is_match(s)
}

/// Returns true if the text is essentially just a URL: stripping URL
/// substrings leaves at most two ASCII alphanumeric characters. Non-Latin
/// text around a link does not count toward the remainder.
pub fn is_mostly_url(text: &str) -> bool {
    let s = text.trim();
    if s.is_empty() || !contains_url(s) {
        return false;
    }

    let stripped = URL_RE.replace_all(s, "");
    let remaining = stripped
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .count();
    remaining <= 2
}

/// Returns true if the text contains a CJK Unified Ideograph.
pub fn looks_chinese(text: &str) -> bool {
    text.chars().any(|c| ('\u{4E00}'..='\u{9FFF}').contains(&c))
}

/// Returns true if the text contains a Vietnamese diacritic character.
pub fn looks_vietnamese(text: &str) -> bool {
    text.chars().any(|c| VI_DIACRITICS.contains(c))
}

/// Classifies text as one of the two supported languages, or `None` when it
/// should not be translated at all (empty, URLs, plain ASCII/numeric/code).
pub fn detect(text: &str) -> Option<Lang> {
    let s = text.trim();
    if s.is_empty() {
        return None;
    }

    // Links and ads are never translated
    if contains_url(s) || is_mostly_url(s) {
        return None;
    }

    let is_filler = VI_FILLERS.contains(&s.to_lowercase().as_str());
    if (looks_vietnamese(s) || is_filler) && !looks_chinese(s) {
        return Some(Lang::Vi);
    }
    if looks_chinese(s) {
        return Some(Lang::Zh);
    }

    None
}
