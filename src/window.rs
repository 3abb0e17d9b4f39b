/// Capacity used when no prefix in [`WINDOW_TABLE`] matches.
pub const DEFAULT_WINDOW: usize = 4096;

/// Ordered (prefix, capacity) rules; the first matching prefix wins, so more
/// specific families must come before their shorter prefixes.
const WINDOW_TABLE: &[(&str, usize)] = &[
    ("gpt-4o", 128_000),
    ("gpt-4-turbo", 128_000),
    ("gpt-4", 8_192),
    ("gpt-3.5", 16_384),
    ("claude-3", 200_000),
    ("claude", 100_000),
    ("llama3", 8_192),
];

pub fn window_for(model: &str) -> usize {
    WINDOW_TABLE
        .iter()
        .find(|(prefix, _)| model.starts_with(prefix))
        .map(|(_, size)| *size)
        .unwrap_or(DEFAULT_WINDOW)
}

/// A positive override (e.g. `options.num_ctx` from a model definition) takes
/// precedence over the table.
pub fn resolve_window(model: &str, override_size: Option<usize>) -> usize {
    match override_size {
        Some(n) if n > 0 => n,
        _ => window_for(model),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn specific_prefixes_win_over_shorter_ones() {
        assert_eq!(window_for("gpt-4o-mini"), 128_000);
        assert_eq!(window_for("gpt-4-turbo-preview"), 128_000);
        assert_eq!(window_for("gpt-4-0613"), 8_192);
        assert_eq!(window_for("gpt-3.5-turbo"), 16_384);
        assert_eq!(window_for("claude-3-5-sonnet-latest"), 200_000);
        assert_eq!(window_for("claude-2.1"), 100_000);
    }

    #[test]
    fn unknown_models_fall_back_to_default() {
        for name in ["", "mistral", "GPT-4O", " gpt-4o", "llama2"] {
            assert_eq!(window_for(name), DEFAULT_WINDOW, "{name:?}");
        }
    }

    #[test]
    fn every_capacity_is_at_least_the_default() {
        for (_, size) in WINDOW_TABLE {
            assert!(*size >= DEFAULT_WINDOW);
        }
    }

    #[test]
    fn override_takes_precedence_only_when_positive() {
        assert_eq!(resolve_window("gpt-4o", Some(8192)), 8192);
        assert_eq!(resolve_window("gpt-4o", Some(0)), 128_000);
        assert_eq!(resolve_window("mystery", None), DEFAULT_WINDOW);
    }
}
