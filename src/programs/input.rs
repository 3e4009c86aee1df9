//! Keystroke-to-line assembly for the shell.
//!
//! Input arrives as raw bytes inside query frames. The reader buffers them
//! into lines: `\r` or `\n` submits, backspace (`\x08`/`\x7f`) erases one
//! character, `\t` is ignored, and escape sequences (`\x1b[...`) are
//! consumed without effect; a lone escape byte is ignored too. Bytes are
//! decoded as UTF-8 incrementally, so a multi-byte character split across
//! two frames still comes out whole.

use std::collections::VecDeque;

#[derive(Clone, Copy, Debug, PartialEq)]
enum EscState {
    None,
    /// Saw `\x1b`.
    Escape,
    /// Inside a `\x1b[` control sequence.
    Csi,
}

/// Assembles raw keystroke bytes into submitted lines.
#[derive(Debug)]
pub struct LineReader {
    buffer: String,
    partial: Vec<u8>,
    esc: EscState,
    ready: VecDeque<String>,
}

impl Default for LineReader {
    fn default() -> Self {
        LineReader {
            buffer: String::new(),
            partial: Vec::new(),
            esc: EscState::None,
            ready: VecDeque::new(),
        }
    }
}

impl LineReader {
    /// Creates an empty reader.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk of input bytes.
    pub fn feed(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.feed_byte(byte);
        }
    }

    /// Takes the next completed line, if one was submitted.
    pub fn pop_line(&mut self) -> Option<String> {
        self.ready.pop_front()
    }

    /// The not-yet-submitted input.
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    fn feed_byte(&mut self, byte: u8) {
        match self.esc {
            EscState::Escape => {
                if byte == b'[' {
                    self.esc = EscState::Csi;
                    return;
                }
                // A lone escape means nothing here; fall through to the byte.
                self.esc = EscState::None;
            }
            EscState::Csi => {
                // The sequence ends at its final byte.
                if (0x40..=0x7e).contains(&byte) {
                    self.esc = EscState::None;
                }
                return;
            }
            EscState::None => {}
        }

        match byte {
            0x1b => self.esc = EscState::Escape,
            b'\r' | b'\n' => {
                self.flush_partial();
                self.ready.push_back(std::mem::take(&mut self.buffer));
            }
            0x08 | 0x7f => {
                self.flush_partial();
                self.buffer.pop();
            }
            b'\t' => {}
            _ => {
                self.partial.push(byte);
                if let Ok(text) = std::str::from_utf8(&self.partial) {
                    self.buffer.push_str(text);
                    self.partial.clear();
                } else if self.partial.len() >= 4 {
                    // Not a valid sequence; drop it rather than stall.
                    self.partial.clear();
                }
            }
        }
    }

    fn flush_partial(&mut self) {
        if !self.partial.is_empty() {
            self.buffer
                .push_str(&String::from_utf8_lossy(&self.partial));
            self.partial.clear();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn lines_of(input: &[u8]) -> Vec<String> {
        let mut reader = LineReader::new();
        reader.feed(input);
        let mut out = Vec::new();
        while let Some(line) = reader.pop_line() {
            out.push(line);
        }
        out
    }

    #[test]
    fn submit_on_cr_or_lf() {
        assert_eq!(lines_of(b"echo hi\r"), ["echo hi"]);
        assert_eq!(lines_of(b"one\ntwo\n"), ["one", "two"]);
    }

    #[test]
    fn backspace_erases_one_character() {
        assert_eq!(lines_of(b"lsx\x08\r"), ["ls"]);
        assert_eq!(lines_of(b"a\x7f\x7f\r"), [""]);
    }

    #[test]
    fn tab_and_escape_sequences_are_ignored() {
        assert_eq!(lines_of(b"a\tb\r"), ["ab"]);
        assert_eq!(lines_of(b"ls\x1b[A\x1b[D\r"), ["ls"]);
        // A lone escape is dropped, the following byte survives.
        assert_eq!(lines_of(b"\x1bq\r"), ["q"]);
    }

    #[test]
    fn utf8_split_across_feeds() {
        let mut reader = LineReader::new();
        let bytes = "héllo\r".as_bytes();
        let (a, b) = bytes.split_at(2); // splits the two-byte é
        reader.feed(a);
        reader.feed(b);
        assert_eq!(reader.pop_line(), Some("héllo".to_string()));
    }

    #[test]
    fn backspace_pops_whole_characters() {
        assert_eq!(lines_of("né\x08\r".as_bytes()), ["n"]);
    }
}
