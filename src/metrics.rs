use serde::Serialize;
use std::fmt;
use std::time::{Duration, Instant};

use crate::context::ContextStats;

/// Timing and throughput of one streamed or buffered reply.
#[derive(Debug, Clone)]
pub struct PerfMetrics {
    started: Instant,
    words: usize,
    response_time: Duration,
    context: Option<ContextStats>,
}

#[derive(Debug, Serialize)]
struct Report {
    tokens_per_second: f64,
    total_tokens: usize,
    response_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    context_window_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    used_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    remaining_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    window_usage_percentage: Option<f64>,
}

/// Words in `text`, splitting on whitespace and punctuation.
pub fn word_count(text: &str) -> usize {
    text.split(|c: char| c.is_whitespace() || c.is_ascii_punctuation())
        .filter(|w| !w.is_empty())
        .count()
}

impl PerfMetrics {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
            words: 0,
            response_time: Duration::ZERO,
            context: None,
        }
    }

    pub fn add_text(&mut self, text: &str) {
        self.words += word_count(text);
    }

    pub fn set_context(&mut self, stats: ContextStats) {
        self.context = Some(stats).filter(|s| s.window_size > 0);
    }

    pub fn finish(&mut self) {
        self.response_time = self.started.elapsed();
    }

    pub fn total_words(&self) -> usize {
        self.words
    }

    pub fn tokens_per_second(&self) -> f64 {
        let secs = self.response_time.as_secs_f64();
        if secs > 0.0 { self.words as f64 / secs } else { 0.0 }
    }

    fn report(&self) -> Report {
        Report {
            tokens_per_second: self.tokens_per_second(),
            total_tokens: self.words,
            response_time_ms: self.response_time.as_millis() as u64,
            context_window_size: self.context.map(|c| c.window_size),
            used_tokens: self.context.map(|c| c.used_tokens),
            remaining_tokens: self.context.map(|c| c.remaining_tokens),
            window_usage_percentage: self.context.map(|c| c.usage_percent),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.report())
    }
}

impl fmt::Display for PerfMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f)?;
        writeln!(f, "[Performance Metrics]")?;
        writeln!(f, "- Response Time: {}ms", self.response_time.as_millis())?;
        writeln!(f, "- Tokens/Second: {:.2}", self.tokens_per_second())?;
        writeln!(f, "- Response Size: {} tokens", self.words)?;

        if let Some(c) = &self.context {
            writeln!(f)?;
            writeln!(f, "[Context Window]")?;
            writeln!(f, "- Window Size:  {} tokens", c.window_size)?;
            writeln!(f, "- Used:         {} tokens ({:.1}%)", c.used_tokens, c.usage_percent)?;
            writeln!(f, "- Remaining:    {} tokens", c.remaining_tokens)?;
            if c.is_near_full() {
                writeln!(f)?;
                writeln!(f, "Warning: Using {:.1}% of context window", c.usage_percent)?;
            }
        }
        Ok(())
    }
}
