// src/chat/sink.rs - Render targets for flushed message batches

use log::warn;
use std::io::{self, Write};

use crate::types::RenderedMessage;

/// Whatever displays the chat. The presenter only ever talks to this trait.
pub trait RenderSink: Send {
    /// Append a flushed batch, oldest first
    fn append(&mut self, batch: &[RenderedMessage]);

    /// Remove the `count` oldest displayed messages
    fn evict(&mut self, count: usize);

    /// Drop everything currently displayed
    fn clear(&mut self);
}

/// Prints `[PLATFORM] user: text` lines, wrapped at a fixed column width
pub struct TerminalSink {
    out: Box<dyn Write + Send>,
    max_width: usize,
}

impl TerminalSink {
    pub fn stdout(max_width: u32) -> Self {
        Self::new(Box::new(io::stdout()), max_width)
    }

    pub fn new(out: Box<dyn Write + Send>, max_width: u32) -> Self {
        Self {
            out,
            max_width: max_width.max(1) as usize,
        }
    }

    fn format_line(message: &RenderedMessage) -> String {
        let mut line = String::new();
        if message.show_badge {
            line.push_str(&format!("[{}] ", message.platform.as_str().to_uppercase()));
        }

        let username = strip_controls(&message.username);
        match message.color.as_deref().and_then(parse_hex_color) {
            Some((r, g, b)) => {
                line.push_str(&format!("\x1b[38;2;{};{};{}m{}\x1b[0m", r, g, b, username))
            }
            None => line.push_str(&username),
        }

        line.push_str(": ");
        line.push_str(&strip_controls(&message.plain_text()));
        line
    }

    /// Split on character count, ignoring colour escapes
    fn wrap(&self, line: &str) -> Vec<String> {
        let mut rows = Vec::new();
        let mut current = String::new();
        let mut width = 0;
        let mut in_escape = false;

        for c in line.chars() {
            current.push(c);
            if in_escape {
                in_escape = c != 'm';
                continue;
            }
            if c == '\x1b' {
                in_escape = true;
                continue;
            }

            width += 1;
            if width == self.max_width {
                rows.push(std::mem::take(&mut current));
                width = 0;
            }
        }

        if !current.is_empty() || rows.is_empty() {
            rows.push(current);
        }
        rows
    }
}

impl RenderSink for TerminalSink {
    fn append(&mut self, batch: &[RenderedMessage]) {
        for message in batch {
            let line = Self::format_line(message);
            for row in self.wrap(&line) {
                if let Err(e) = writeln!(self.out, "{}", row) {
                    warn!("Failed to write chat line: {}", e);
                    return;
                }
            }
        }
        let _ = self.out.flush();
    }

    // Printed lines cannot be taken back
    fn evict(&mut self, _count: usize) {}

    fn clear(&mut self) {
        let _ = write!(self.out, "\x1b[2J\x1b[H");
        let _ = self.out.flush();
    }
}

/// Chatters must not be able to drive the terminal. The only escapes that
/// reach the output are the ones this sink writes itself.
fn strip_controls(text: &str) -> String {
    text.chars().filter(|c| !c.is_control()).collect()
}

/// `#rrggbb` to RGB
fn parse_hex_color(color: &str) -> Option<(u8, u8, u8)> {
    let hex = color.strip_prefix('#')?;
    if hex.len() != 6 {
        return None;
    }
    let channel = |i: usize| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok();
    Some((channel(0)?, channel(2)?, channel(4)?))
}

/// In-memory sink for tests: records every call
#[cfg(test)]
#[derive(Clone, Default)]
pub(crate) struct RecordingSink {
    pub(crate) log: std::sync::Arc<std::sync::Mutex<SinkLog>>,
}

#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct SinkLog {
    pub(crate) batches: Vec<Vec<RenderedMessage>>,
    pub(crate) displayed: Vec<RenderedMessage>,
    pub(crate) evicted: usize,
    pub(crate) clears: usize,
}

#[cfg(test)]
impl RenderSink for RecordingSink {
    fn append(&mut self, batch: &[RenderedMessage]) {
        let mut log = self.log.lock().unwrap();
        log.batches.push(batch.to_vec());
        log.displayed.extend_from_slice(batch);
    }

    fn evict(&mut self, count: usize) {
        let mut log = self.log.lock().unwrap();
        log.evicted += count;
        let count = count.min(log.displayed.len());
        log.displayed.drain(..count);
    }

    fn clear(&mut self) {
        let mut log = self.log.lock().unwrap();
        log.clears += 1;
        log.displayed.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Fragment, Platform};
    use std::sync::{Arc, Mutex};

    /// Write handle whose bytes stay readable after the sink takes it
    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuffer {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    fn rendered(text: &str, color: Option<&str>, show_badge: bool) -> RenderedMessage {
        RenderedMessage {
            platform: Platform::Kick,
            username: "bob".to_string(),
            color: color.map(str::to_string),
            fragments: text.split(' ').map(|w| Fragment::Text(w.to_string())).collect(),
            is_system: false,
            show_badge,
        }
    }

    #[test]
    fn test_badge_and_color() {
        let buffer = SharedBuffer::default();
        let mut sink = TerminalSink::new(Box::new(buffer.clone()), 200);

        sink.append(&[
            rendered("hello", None, true),
            rendered("hi there", Some("#FF8000"), false),
        ]);

        let output = buffer.contents();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines[0], "[KICK] bob: hello");
        assert_eq!(lines[1], "\x1b[38;2;255;128;0mbob\x1b[0m: hi there");
    }

    #[test]
    fn test_wraps_at_max_width() {
        let buffer = SharedBuffer::default();
        let mut sink = TerminalSink::new(Box::new(buffer.clone()), 10);

        sink.append(&[rendered("abcdefghijkl", None, false)]);

        let output = buffer.contents();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines, vec!["bob: abcde", "fghijkl"]);
    }

    #[test]
    fn test_color_escape_does_not_count_toward_width() {
        let buffer = SharedBuffer::default();
        let mut sink = TerminalSink::new(Box::new(buffer.clone()), 8);

        sink.append(&[rendered("hey", Some("#00ff00"), false)]);

        assert_eq!(buffer.contents().lines().count(), 1);
    }

    #[test]
    fn test_chat_cannot_inject_terminal_escapes() {
        let buffer = SharedBuffer::default();
        let mut sink = TerminalSink::new(Box::new(buffer.clone()), 200);

        let mut message = rendered("\x1b[2J\x1b[Hcleared", None, false);
        message.username = "evil\x1b]0;pwned\x07".to_string();
        sink.append(&[message]);

        let output = buffer.contents();
        assert!(!output.contains('\x1b'));
        assert!(!output.contains('\x07'));
        assert_eq!(output, "evil]0;pwned: [2J[Hcleared\n");
    }

    #[test]
    fn test_injected_escape_does_not_skew_wrapping() {
        let buffer = SharedBuffer::default();
        let mut sink = TerminalSink::new(Box::new(buffer.clone()), 10);

        // Without stripping, the ESC would swallow "[abcdefghm" as a colour code
        let mut message = rendered("\x1b[abcdefghm", Some("#112233"), false);
        message.username = "bob".to_string();
        sink.append(&[message]);

        let output = buffer.contents();
        let rows: Vec<&str> = output.lines().collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1], "efghm");
    }

    #[test]
    fn test_parse_hex_color() {
        assert_eq!(parse_hex_color("#1E90FF"), Some((0x1e, 0x90, 0xff)));
        assert_eq!(parse_hex_color("1E90FF"), None);
        assert_eq!(parse_hex_color("#fff"), None);
        assert_eq!(parse_hex_color("#zzzzzz"), None);
    }
}
