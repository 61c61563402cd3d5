use std::io::Write as _;
use answer_stream::{RenderSink, Source};
use parking_lot::Mutex;

#[derive(Default)]
struct ConsoleState {
    printed: String,
    sources: Vec<Source>,
}

/// Renders one slot to the terminal.
///
/// Every answer update carries the full text; only the part not yet on
/// screen is written. When the text no longer extends what was printed the
/// answer is re-printed on a fresh line.
#[derive(Default)]
pub struct ConsoleSink {
    state: Mutex<ConsoleState>,
}

impl ConsoleSink {
    fn with_state(&self, f: impl FnOnce(&mut ConsoleState)) {
        f(&mut self.state.lock());
    }
}

/// Text to write so the terminal shows `full` after `printed`.
pub(crate) fn pending_output<'a>(printed: &str, full: &'a str) -> (bool, &'a str) {
    match full.strip_prefix(printed) {
        Some(suffix) => (false, suffix),
        None => (true, full),
    }
}

impl RenderSink for ConsoleSink {
    fn on_answer_update(&self, full_text: &str) {
        self.with_state(|state| {
            let (restart, text) = pending_output(&state.printed, full_text);
            let mut out = std::io::stdout().lock();
            if restart {
                let _ = writeln!(out);
            }
            let _ = write!(out, "{text}");
            let _ = out.flush();
            state.printed = full_text.to_string();
        });
    }

    fn on_sources_update(&self, sources: &[Source]) {
        self.with_state(|state| state.sources = sources.to_vec());
    }

    fn on_auxiliary_update(&self, html: &str) {
        tracing::debug!(fragment = html, "auxiliary update");
    }

    fn on_error(&self, message: &str, is_quota_error: bool) {
        self.with_state(|state| {
            if is_quota_error {
                eprintln!("\nnotice: {message}");
            } else {
                eprintln!("\nerror: {message}");
            }
            *state = ConsoleState::default();
        });
    }

    fn on_cancelled(&self) {
        self.with_state(|state| {
            eprintln!("\n[cancelled]");
            *state = ConsoleState::default();
        });
    }

    fn on_completed(&self) {
        self.with_state(|state| {
            let mut out = std::io::stdout().lock();
            let _ = writeln!(out);
            if !state.sources.is_empty() {
                let _ = writeln!(out, "\nSources:");
                for (i, source) in state.sources.iter().enumerate() {
                    let _ = writeln!(out, "  [{}] {} <{}>", i + 1, source.title, source.url);
                }
            }
            *state = ConsoleState::default();
        });
    }
}
