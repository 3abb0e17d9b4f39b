// Heuristic token estimator. Not a tokenizer: counts are for budgeting only.

/// Tokens per character when words are short (< 4 chars on average).
pub const SHORT_WORD_RATIO: f64 = 0.30;
/// Tokens per character when words are long (> 6 chars on average).
pub const LONG_WORD_RATIO: f64 = 0.20;

pub fn estimate_tokens(text: &str) -> usize {
    let chars = text.chars().count();
    let words = text.split_whitespace().count();
    if words == 0 {
        return chars / 4;
    }

    let avg_word_len = chars as f64 / words as f64;
    if avg_word_len < 4.0 {
        (chars as f64 * SHORT_WORD_RATIO) as usize
    } else if avg_word_len > 6.0 {
        (chars as f64 * LONG_WORD_RATIO) as usize
    } else {
        chars / 4
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_and_blank_text_never_fail() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("    \n\t  "), 2);
    }

    #[test]
    fn short_words_cost_more_per_char_than_long_words() {
        let short = "a an to of is it by we do go";
        let long = "internationalization considerations notwithstanding";
        let short_ratio = estimate_tokens(short) as f64 / short.chars().count() as f64;
        let long_ratio = estimate_tokens(long) as f64 / long.chars().count() as f64;
        assert!(short_ratio > long_ratio);
    }

    #[test]
    fn medium_words_use_four_chars_per_token() {
        // avg length 5.8 including separators
        let text = "hello world these words count";
        assert_eq!(estimate_tokens(text), text.chars().count() / 4);
    }

    #[test]
    fn deterministic_and_non_decreasing_when_doubled() {
        let samples = [
            "x",
            "fn main() { println!(\"hi\"); }",
            "The quick brown fox jumps over the lazy dog.",
            "supercalifragilistic expialidocious",
            "ab",
            "日本語のテキスト",
        ];
        for s in samples {
            assert_eq!(estimate_tokens(s), estimate_tokens(s));
            let doubled = format!("{s}{s}");
            assert!(estimate_tokens(s) <= estimate_tokens(&doubled), "{s:?}");
        }
    }

    #[test]
    fn counts_characters_not_bytes() {
        let ascii = "abc de fgh ij";
        let wide = "ébc dé fgé ij";
        assert_eq!(ascii.len() + 3, wide.len());
        assert_eq!(estimate_tokens(ascii), estimate_tokens(wide));
    }
}
