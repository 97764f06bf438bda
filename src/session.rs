//! Session handler (spec component G): the per-channel command loop that
//! sits between the line editor and the backend connector.
//!
//! One [`SessionHandler`] is created the moment a `shell` request is
//! accepted. Window-change requests don't route through here — they land
//! on [`crate::connector::Connector`] directly from
//! [`crate::server::SshHandler`], since terminal size is connector state,
//! not session state (spec's `ConnectorConfig`).

use crate::connector::Connector;
use crate::eventlog::EventLog;
use crate::line_editor::{Feed, LineEditor};
use crate::motd;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

const MOTD_LINE_PACING: Duration = Duration::from_millis(5);

pub enum SessionOutcome {
    Continue,
    Closed,
}

pub struct SessionHandler {
    connector: Arc<Connector>,
    event_log: Arc<EventLog>,
    editor: LineEditor,
    username: String,
    password: String,
    hostname: String,
    cwd: String,
    peer_addr: SocketAddr,
    started_at: Instant,
}

impl SessionHandler {
    pub fn new(
        connector: Arc<Connector>,
        event_log: Arc<EventLog>,
        username: String,
        password: String,
        hostname: String,
        peer_addr: SocketAddr,
    ) -> Self {
        let cwd = "~".to_string();
        let prompt = motd::prompt(&username, &hostname, &cwd);
        Self {
            connector,
            event_log,
            editor: LineEditor::new(prompt, Vec::new()),
            username,
            password,
            hostname,
            cwd,
            peer_addr,
            started_at: Instant::now(),
        }
    }

    /// Writes the opening blank line, the paced MOTD banner, and draws the
    /// first prompt. Called once, right after the shell request lands.
    pub async fn start(&mut self, motd_path: &Path, out: &mut impl FnMut(&[u8])) {
        out(b"\r\n");
        for line in motd::motd_lines(motd_path, &self.hostname) {
            let sent = format!("{}\r\n", line.trim_end_matches('\n'));
            out(sent.as_bytes());
            tokio::time::sleep(MOTD_LINE_PACING).await;
        }
        self.editor.begin_line(out);
    }

    /// Feeds one byte of client input, driving the line editor and, once a
    /// full line is submitted, the backend command loop.
    pub async fn feed_byte(&mut self, byte: u8, out: &mut impl FnMut(&[u8])) -> SessionOutcome {
        match self.editor.feed(byte, out) {
            Feed::Pending => SessionOutcome::Continue,
            Feed::TabRequested => {
                self.editor
                    .feed_tab(&self.connector, &self.username, &self.password, out)
                    .await;
                SessionOutcome::Continue
            }
            Feed::Submitted(line) => self.run_command(line, out).await,
        }
    }

    async fn run_command(&mut self, cmd: String, out: &mut impl FnMut(&[u8])) -> SessionOutcome {
        if cmd.is_empty() {
            self.editor.begin_line(out);
            return SessionOutcome::Continue;
        }

        self.event_log
            .log_command_input(self.peer_addr, &self.username, &cmd, &self.cwd);

        let lowered = cmd.trim_end_matches(';').to_lowercase();
        if lowered == "exit" || lowered == "quit" {
            crate::line_editor::reset_terminal(out);
            self.log_close("Session closed");
            return SessionOutcome::Closed;
        }

        let dir_cmd = build_dir_cmd(&self.cwd);

        match self
            .connector
            .execute_command(&cmd, &self.username, &self.password, &dir_cmd)
            .await
        {
            Ok((output, new_cwd)) => {
                self.cwd = new_cwd;
                let prompt = motd::prompt(&self.username, &self.hostname, &self.cwd);
                self.editor.update_prompt(prompt);
                out(output.as_bytes());
                self.editor.begin_line(out);
                SessionOutcome::Continue
            }
            Err(err) => {
                log::warn!("backend connection lost mid-command: {err}");
                out(b"Connection to backend lost. Session terminated.\r\n");
                crate::line_editor::reset_terminal(out);
                self.log_close("Connection to backend lost");
                SessionOutcome::Closed
            }
        }
    }

    /// Logs the session-close event. Takes `message` rather than hardcoding
    /// it since both the clean exit/quit path and the backend-lost path
    /// report through the same sink with different wording.
    pub fn log_close(&self, message: &str) {
        let duration = self.started_at.elapsed().as_secs_f64();
        self.event_log
            .log_session_close(self.peer_addr, &self.username, duration, message);
    }
}

/// `cd {cwd}` to restore state on the next disposable backend session, or
/// nothing when there's no directory to restore (fresh session, or cwd
/// still at the backend's default).
fn build_dir_cmd(cwd: &str) -> String {
    if cwd.is_empty() || cwd == "~" {
        String::new()
    } else {
        format!("cd {cwd}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_dir_cmd_is_empty_at_home() {
        assert_eq!(build_dir_cmd("~"), "");
        assert_eq!(build_dir_cmd(""), "");
    }

    #[test]
    fn build_dir_cmd_wraps_a_real_path() {
        assert_eq!(build_dir_cmd("/var/log"), "cd /var/log");
    }
}
