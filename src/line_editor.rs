//! Line editor (spec component F).
//!
//! The original reads its channel one byte at a time on a dedicated
//! goroutine; russh hands channel bytes to [`crate::server::SshHandler`] a
//! chunk at a time from an async callback instead. `LineEditor` is the
//! byte-at-a-time state machine that callback drives: it owns the escape
//! sequence parser, the edit buffer, and history navigation, and exposes
//! itself as a plain (non-async) `feed` for everything except tab
//! completion, which needs to round-trip to the backend.

use crate::connector::Connector;
use crate::text;
use russh::ChannelId;

const MAX_HISTORY: usize = 1000;

#[derive(Clone, Copy, PartialEq, Eq)]
enum EscapeState {
    Idle,
    SawEsc,
    SawBracket,
    SawBracket3,
}

pub enum Feed {
    /// Nothing to do yet; more bytes needed or the byte was consumed by an
    /// in-progress escape sequence / redraw.
    Pending,
    /// The user pressed enter; here is the submitted line.
    Submitted(String),
    /// The user pressed tab; the caller must await [`LineEditor::feed_tab`]
    /// since completion needs a backend round-trip `feed` can't make.
    TabRequested,
}

pub struct LineEditor {
    prompt: String,
    buffer: Vec<char>,
    cursor: usize,
    escape: EscapeState,
    history: Vec<String>,
    history_index: Option<usize>,
    temporary_input: Vec<char>,
}

impl LineEditor {
    pub fn new(prompt: String, history: Vec<String>) -> Self {
        Self {
            prompt,
            buffer: Vec::new(),
            cursor: 0,
            escape: EscapeState::Idle,
            history,
            history_index: None,
            temporary_input: Vec::new(),
        }
    }

    pub fn update_prompt(&mut self, prompt: String) {
        self.prompt = prompt;
    }

    pub fn history(&self) -> &[String] {
        &self.history
    }

    /// Clears the edit buffer and draws a fresh prompt; called once before
    /// each line the session wants to read.
    pub fn begin_line(&mut self, out: &mut impl FnMut(&[u8])) {
        self.buffer.clear();
        self.cursor = 0;
        self.history_index = None;
        self.temporary_input.clear();
        out(b"\r\x1b[2K");
        out(self.prompt.as_bytes());
    }

    /// Feeds one input byte. `out` writes raw bytes back to the client
    /// channel; used for every case except tab completion, which needs
    /// network access and is handled by [`Self::feed_tab`].
    pub fn feed(&mut self, byte: u8, out: &mut impl FnMut(&[u8])) -> Feed {
        match self.escape {
            EscapeState::Idle => {}
            EscapeState::SawEsc => {
                self.escape = if byte == b'[' {
                    EscapeState::SawBracket
                } else {
                    EscapeState::Idle
                };
                return Feed::Pending;
            }
            EscapeState::SawBracket => {
                self.escape = EscapeState::Idle;
                match byte {
                    b'A' => self.history_up(out),
                    b'B' => self.history_down(out),
                    b'C' => self.cursor_right(out),
                    b'D' => self.cursor_left(out),
                    b'3' => self.escape = EscapeState::SawBracket3,
                    _ => {}
                }
                return Feed::Pending;
            }
            EscapeState::SawBracket3 => {
                self.escape = EscapeState::Idle;
                if byte == b'~' {
                    self.delete_forward(out);
                }
                return Feed::Pending;
            }
        }

        if byte == 0x1b {
            self.escape = EscapeState::SawEsc;
            return Feed::Pending;
        }

        if byte == b'\n' || byte == b'\r' {
            out(b"\r\n");
            let line: String = self.buffer.iter().collect();
            if !line.is_empty() {
                self.history.push(line.clone());
                if self.history.len() > MAX_HISTORY {
                    self.history.remove(0);
                }
            }
            return Feed::Submitted(line);
        }

        if byte == 0x7f || byte == 0x08 {
            self.backspace(out);
            return Feed::Pending;
        }

        if byte == b'\t' {
            return Feed::TabRequested;
        }

        self.insert_char(byte as char, out);
        Feed::Pending
    }

    /// Tab needs backend round-trips; kept separate from [`Self::feed`] so
    /// that function can stay synchronous for every other key.
    pub async fn feed_tab(
        &mut self,
        connector: &Connector,
        username: &str,
        password: &str,
        out: &mut impl FnMut(&[u8]),
    ) {
        let full_input: String = self.buffer.iter().collect();
        let tokens: Vec<&str> = full_input.split_whitespace().collect();
        let Some(&last_token) = tokens.last() else {
            return;
        };
        let command_with_tab = format!("{full_input}\t");

        let cwd = match connector.replay_cwd_only(username, password, &self.history).await {
            Ok(cwd) => cwd,
            Err(err) => {
                log::debug!("tab completion: failed to replay cwd: {err}");
                return;
            }
        };

        let (command, output_bytes) = match connector
            .execute_with_tab(&cwd, &command_with_tab, username, password)
            .await
        {
            Ok(result) => result,
            Err(err) => {
                log::debug!("tab completion: backend round-trip failed: {err}");
                return;
            }
        };

        let output_clean = text::strip_ansi(&String::from_utf8_lossy(&output_bytes));
        let diff = text::completion_diff(command.trim(), output_clean.trim());
        if diff.is_empty() {
            return;
        }

        let buffer_str: String = self.buffer.iter().collect();
        let Some(token_start) = buffer_str.rfind(last_token) else {
            return;
        };
        let insertion_index = token_start + last_token.chars().count();
        let completion_chars: Vec<char> = diff.chars().collect();

        let tail: Vec<char> = self.buffer[insertion_index..].to_vec();
        self.buffer.truncate(insertion_index);
        self.buffer.extend(completion_chars.iter());
        self.buffer.extend(tail);
        self.cursor = insertion_index + completion_chars.len();
        self.redraw(out);
    }

    fn redraw(&mut self, out: &mut impl FnMut(&[u8])) {
        out(b"\r\x1b[K");
        out(self.prompt.as_bytes());
        let rendered: String = self.buffer.iter().collect();
        out(rendered.as_bytes());
        let back = self.buffer.len() - self.cursor;
        if back > 0 {
            out(format!("\x1b[{back}D").as_bytes());
        }
    }

    fn set_buffer_from_history(&mut self, out: &mut impl FnMut(&[u8])) {
        match self.history_index {
            Some(idx) if idx < self.history.len() => {
                self.buffer = self.history[idx].chars().collect();
                self.cursor = self.buffer.len();
                self.redraw(out);
            }
            None => {
                self.buffer = self.temporary_input.clone();
                self.cursor = self.buffer.len();
                self.redraw(out);
            }
            _ => {}
        }
    }

    fn history_up(&mut self, out: &mut impl FnMut(&[u8])) {
        if self.history.is_empty() {
            return;
        }
        match self.history_index {
            None => {
                self.temporary_input = self.buffer.clone();
                self.history_index = Some(self.history.len() - 1);
            }
            Some(idx) if idx > 0 => self.history_index = Some(idx - 1),
            Some(_) => return,
        }
        self.set_buffer_from_history(out);
    }

    fn history_down(&mut self, out: &mut impl FnMut(&[u8])) {
        let Some(idx) = self.history_index else {
            return;
        };
        if idx < self.history.len() - 1 {
            self.history_index = Some(idx + 1);
            self.set_buffer_from_history(out);
        } else {
            self.history_index = None;
            self.set_buffer_from_history(out);
            self.temporary_input.clear();
        }
    }

    fn cursor_right(&mut self, out: &mut impl FnMut(&[u8])) {
        if self.cursor < self.buffer.len() {
            self.cursor += 1;
            out(b"\x1b[C");
        }
    }

    fn cursor_left(&mut self, out: &mut impl FnMut(&[u8])) {
        if self.cursor > 0 {
            self.cursor -= 1;
            out(b"\x1b[D");
        }
    }

    fn delete_forward(&mut self, out: &mut impl FnMut(&[u8])) {
        if self.cursor >= self.buffer.len() {
            return;
        }
        self.buffer.remove(self.cursor);
        if self.cursor == self.buffer.len() {
            out(b" \x08");
        } else {
            let remainder: String = self.buffer[self.cursor..].iter().collect();
            let mut msg = remainder.clone();
            msg.push(' ');
            out(msg.as_bytes());
            out(format!("\x1b[{}D", remainder.len() + 1).as_bytes());
        }
    }

    fn backspace(&mut self, out: &mut impl FnMut(&[u8])) {
        if self.cursor == 0 {
            return;
        }
        self.buffer.remove(self.cursor - 1);
        self.cursor -= 1;

        if self.cursor == self.buffer.len() {
            out(b"\x08 \x08");
        } else {
            let remainder: String = self.buffer[self.cursor..].iter().collect();
            let mut msg = "\x08".to_string();
            msg.push_str(&remainder);
            msg.push(' ');
            out(msg.as_bytes());
            out(format!("\x1b[{}D", remainder.len() + 1).as_bytes());
        }

        if self.history_index.is_some() {
            self.temporary_input = self.buffer.clone();
        }
    }

    fn insert_char(&mut self, ch: char, out: &mut impl FnMut(&[u8])) {
        self.buffer.insert(self.cursor, ch);
        self.cursor += 1;

        if self.cursor == self.buffer.len() {
            let mut buf = [0u8; 4];
            out(ch.encode_utf8(&mut buf).as_bytes());
        } else {
            let remainder: String = self.buffer[self.cursor - 1..].iter().collect();
            out(remainder.as_bytes());
            out(format!("\x1b[{}D", remainder.chars().count() - 1).as_bytes());
        }

        if self.history_index.is_some() {
            self.temporary_input = self.buffer.clone();
        }
    }
}

/// Resets terminal attributes. Sent once on every session exit path
/// (normal `exit`/`quit`, backend failure, or client disconnect) so a
/// colour or bold attribute left dangling by backend output doesn't leak
/// into the client's own shell after the connection closes.
pub fn reset_terminal(out: &mut impl FnMut(&[u8])) {
    out(b"\x1b[0m");
}

/// Adapts `out: &mut impl FnMut(&[u8])` to write straight to a server
/// channel, for call sites inside [`crate::server::SshHandler`].
pub fn channel_sink<'a>(
    session: &'a mut russh::server::Session,
    channel: ChannelId,
) -> impl FnMut(&[u8]) + 'a {
    move |data: &[u8]| crate::guard::write_channel(session, channel, data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typing_then_enter_submits_line() {
        let mut editor = LineEditor::new("$ ".to_string(), Vec::new());
        let mut captured = String::new();
        let mut out = |data: &[u8]| captured.push_str(&String::from_utf8_lossy(data));

        for b in b"ls -la" {
            assert!(matches!(editor.feed(*b, &mut out), Feed::Pending));
        }
        match editor.feed(b'\r', &mut out) {
            Feed::Submitted(line) => assert_eq!(line, "ls -la"),
            _ => panic!("expected submission"),
        }
        assert_eq!(editor.history(), ["ls -la"]);
    }

    #[test]
    fn backspace_removes_last_char() {
        let mut editor = LineEditor::new("$ ".to_string(), Vec::new());
        let mut out = |_: &[u8]| {};
        for b in b"abc" {
            editor.feed(*b, &mut out);
        }
        editor.feed(0x7f, &mut out);
        match editor.feed(b'\n', &mut out) {
            Feed::Submitted(line) => assert_eq!(line, "ab"),
            _ => panic!("expected submission"),
        }
    }

    #[test]
    fn history_up_then_down_restores_temporary_input() {
        let mut editor = LineEditor::new("$ ".to_string(), vec!["first".to_string()]);
        let mut out = |_: &[u8]| {};
        for b in b"draft" {
            editor.feed(*b, &mut out);
        }
        editor.feed(0x1b, &mut out);
        editor.feed(b'[', &mut out);
        editor.feed(b'A', &mut out);
        assert_eq!(editor.buffer.iter().collect::<String>(), "first");

        editor.feed(0x1b, &mut out);
        editor.feed(b'[', &mut out);
        editor.feed(b'B', &mut out);
        assert_eq!(editor.buffer.iter().collect::<String>(), "draft");
    }

    #[test]
    fn empty_line_is_not_recorded_in_history() {
        let mut editor = LineEditor::new("$ ".to_string(), Vec::new());
        let mut out = |_: &[u8]| {};
        match editor.feed(b'\r', &mut out) {
            Feed::Submitted(line) => assert_eq!(line, ""),
            _ => panic!("expected submission"),
        }
        assert!(editor.history().is_empty());
    }

    #[test]
    fn escape_bracket_c_moves_cursor_right_without_inserting() {
        let mut editor = LineEditor::new("$ ".to_string(), Vec::new());
        let mut out = |_: &[u8]| {};
        for b in b"ab" {
            editor.feed(*b, &mut out);
        }
        editor.cursor = 0;
        editor.feed(0x1b, &mut out);
        editor.feed(b'[', &mut out);
        editor.feed(b'C', &mut out);
        assert_eq!(editor.cursor, 1);
    }
}
