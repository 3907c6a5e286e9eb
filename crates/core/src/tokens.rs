//! Token estimation
//!
//! The packer and the prompt assembler share one estimate so the budget
//! they enforce is the budget the synthesiser sees.

use unicode_segmentation::UnicodeSegmentation;

/// Rough token count for budget enforcement.
///
/// Mostly-ASCII text averages ~4 characters per token; scripts where one
/// grapheme carries more information (CJK, Devanagari and friends) sit
/// closer to 2. Counting graphemes rather than bytes keeps multi-byte
/// scripts from being over-charged.
pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }

    let graphemes = text.graphemes(true).count();
    let non_ascii = text.chars().filter(|c| !c.is_ascii()).count();

    let estimate = if non_ascii > graphemes / 3 {
        graphemes / 2
    } else {
        graphemes / 4
    };
    estimate.max(1)
}
