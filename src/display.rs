//! Terminal rendering for the pages
//!
//! Pages print whole lines for events and keep one rewritable status line
//! for values that change several times per second.

use crate::store::{ConnectionBanner, MicStatus};
use std::io::Write;

pub(crate) fn heading(title: &str) {
    println!();
    println!("== {} ==", title);
}

pub(crate) fn line(text: &str) {
    println!("{}", text);
}

/// Single line redrawn in place
#[derive(Debug, Default)]
pub(crate) struct StatusLine {
    last: Option<String>,
}

impl StatusLine {
    /// Redraw if the text changed
    pub(crate) fn show(&mut self, text: String) {
        if self.last.as_deref() == Some(text.as_str()) {
            return;
        }
        let mut stdout = std::io::stdout().lock();
        let _ = write!(stdout, "\r\x1b[2K{}", text);
        let _ = stdout.flush();
        self.last = Some(text);
    }

    /// Move past the status line so the next output starts on a fresh line
    pub(crate) fn finish(&mut self) {
        if self.last.take().is_some() {
            println!();
        }
    }
}

impl Drop for StatusLine {
    fn drop(&mut self) {
        self.finish();
    }
}

pub(crate) fn volume_bar(level: f32, width: usize) -> String {
    let filled = ((level.clamp(0.0, 1.0) * width as f32).round() as usize).min(width);
    format!("[{}{}]", "#".repeat(filled), "-".repeat(width - filled))
}

pub(crate) fn banner_text(banner: &ConnectionBanner) -> Option<String> {
    match banner {
        ConnectionBanner::Hidden => None,
        ConnectionBanner::Connecting => Some("connecting...".into()),
        ConnectionBanner::Reconnecting {
            attempt,
            max_attempts,
        } => Some(format!("reconnecting ({}/{})", attempt, max_attempts)),
        ConnectionBanner::Stale => Some("connection unstable".into()),
        ConnectionBanner::Lost => Some("connection lost".into()),
    }
}

pub(crate) fn mic_text(mic: MicStatus) -> &'static str {
    match mic {
        MicStatus::Unknown => "mic: checking",
        MicStatus::Granted => "mic: ready",
        MicStatus::Denied => "mic: blocked (volume disabled)",
        MicStatus::Unsupported => "mic: none found (volume disabled)",
    }
}
