//! System prompt assembly for translation requests.
//!
//! Embeds the direction-specific glossary pairs and the fixed behavioral
//! rules into one system prompt. Two styles exist: the colloquial family
//! register for allow-listed groups, and a plain direct-translation prompt
//! for everything else.

use crate::glossary::GlossaryEntry;
use crate::lang::{Direction, Lang};

/// Maximum number of glossary pairs embedded in a prompt.
/// Truncation is by stored order, not importance.
pub const MAX_PROMPT_PAIRS: usize = 200;

/// Which register the prompt asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptStyle {
    /// Colloquial Taiwanese-household phrasing, for allow-listed groups.
    Family,
    /// Plain direct translation, for everything else.
    Generic,
}

/// Maps glossary entries to (source, target) pairs for the given direction,
/// keeping only entries with both sides non-empty.
pub fn direction_pairs(direction: Direction, entries: &[GlossaryEntry]) -> Vec<(&str, &str)> {
    entries
        .iter()
        .filter(|e| !e.zh.is_empty() && !e.vi.is_empty())
        .map(|e| match direction.from {
            Lang::Zh => (e.zh.as_str(), e.vi.as_str()),
            Lang::Vi => (e.vi.as_str(), e.zh.as_str()),
        })
        .collect()
}

/// Renders glossary pairs as rule lines, capped at [`MAX_PROMPT_PAIRS`].
fn render_pairs(pairs: &[(&str, &str)]) -> String {
    if pairs.is_empty() {
        return "（目前沒有詞庫規則）".to_string();
    }

    pairs
        .iter()
        .take(MAX_PROMPT_PAIRS)
        .map(|(src, dst)| format!("- \"{}\" => \"{}\"", src, dst))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Builds the system prompt for one translation request.
pub fn build_system_prompt(
    direction: Direction,
    entries: &[GlossaryEntry],
    style: PromptStyle,
) -> String {
    let pairs = direction_pairs(direction, entries);
    let glossary_text = render_pairs(&pairs);

    match style {
        PromptStyle::Family => format!(
            "你是一個只做「家庭日常口語」的精準翻譯器，方向：{direction}\n\
             規則：\n\
             1) 只翻譯使用者原句，不要加戲、不補充、不解釋。\n\
             2) 保留人名、數字、表情符號、標點、語氣詞。\n\
             3) 如果內容不是對話（像是網址、廣告、代碼、亂碼），輸出空字串。\n\
             4) 目標語言要貼近在地家庭口語：\n   \
                - zh：繁體中文、台灣家人聊天口吻\n   \
                - vi：越南家庭口語（自然，不要教材腔）\n\
             5) 必須優先套用詞庫（最重要）。遇到詞庫條目要照規則翻，不要改。\n\
             詞庫規則如下：\n\
             {glossary_text}\n\n\
             只輸出翻譯結果本身，不要輸出其他文字。"
        ),
        PromptStyle::Generic => format!(
            "你是「繁體中文 ↔ 越南文」的翻譯器。\n\
             只做翻譯：方向 {direction}。\n\
             如果聽不清楚或語意不完整，請輸出空字串（不要亂翻）。\n\
             詞庫優先套用：\n\
             {glossary_text}\n\
             只輸出翻譯結果，不要加解釋。"
        ),
    }
}
