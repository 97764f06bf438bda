//! Backend connector (spec component E): opens disposable SSH sessions
//! against the emulation backend, drives an expect-style dialog over a
//! PTY, and reformats the captured output for the attacker's terminal.

use crate::error::ConnectorError;
use crate::guard;
use crate::text;
use async_trait::async_trait;
use regex::Regex;
use russh::client::{self, Msg};
use russh::keys::PublicKey;
use russh::{Channel, ChannelMsg, Pty};
use std::sync::Arc;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const TAB_SETTLE: Duration = Duration::from_millis(200);
const TAB_POLL: Duration = Duration::from_millis(50);
const TAB_TOTAL: Duration = Duration::from_secs(1);
const READ_CHUNK: usize = 1024;
const MIN_LS_COLUMN_WIDTH: usize = 11;

static CWD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@[^:]+:(.*?)[$#] ?").expect("static cwd regex"));

/// Backend target and the terminal size every `connect` picks up, guarded
/// by a read/write lock because reads (every `connect`) vastly outnumber
/// writes (a resize).
pub struct Connector {
    host: String,
    port: u16,
    terminal: RwLock<(u16, u16)>,
}

impl Connector {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        // Deliberately points at a single backend species for the lifetime
        // of the process; swapping targets (e.g. between shell emulators of
        // differing fidelity) is a matter of constructing a second
        // `Connector`, not a runtime knob.
        Self {
            host: host.into(),
            port,
            terminal: RwLock::new((80, 24)),
        }
    }

    pub async fn update_terminal_size(&self, width: u16, height: u16) {
        let mut guard = self.terminal.write().await;
        *guard = (width, height);
    }

    pub async fn get_terminal_width(&self) -> u16 {
        self.terminal.read().await.0
    }

    pub async fn get_terminal_height(&self) -> u16 {
        self.terminal.read().await.1
    }

    /// Observes whether the backend currently accepts `user`/`password`,
    /// without ever exposing the result to the caller. A successful
    /// handshake is the anomalous case and only gets a log line.
    pub async fn record_login(&self, user: &str, password: &str) {
        let handle = match tokio::time::timeout(
            CONNECT_TIMEOUT,
            client::connect(
                Arc::new(client::Config::default()),
                (self.host.as_str(), self.port),
                InsecureHandler,
            ),
        )
        .await
        {
            Ok(Ok(handle)) => handle,
            Ok(Err(err)) => {
                log::debug!("record_login: backend dial/handshake failed: {err}");
                return;
            }
            Err(_) => {
                log::debug!("record_login: timed out dialing backend");
                return;
            }
        };

        match handle.authenticate_password(user, password).await {
            Ok(true) => {
                log::warn!(
                    "record_login: backend accepted probed credentials for user '{user}' (unexpected)"
                );
            }
            Ok(false) => {
                log::debug!("record_login: backend rejected probed credentials (expected)");
            }
            Err(err) => {
                let message = err.to_string();
                if message.contains("unable to authenticate") {
                    log::debug!("record_login: auth rejected as expected");
                } else {
                    log::debug!("record_login: auth probe transport error: {message}");
                }
            }
        }

        guard::close_backend_session::<InsecureHandler>(None, Some(handle)).await;
    }

    /// Replays `history` in order over one fresh session, capturing output
    /// only for the last command.
    ///
    /// Part of spec component E's public interface but, like the original's
    /// `ReplayHistory`, has no call site in this dispatcher: the command
    /// loop restores state with a single `cd {cwd}` via `execute_command`,
    /// and tab completion only needs the `cd` subsequence via
    /// `replay_cwd_only`. Kept (not trimmed) because SPEC_FULL §9 notes
    /// implementers may swap to a full-history-replay continuity model, and
    /// this is the operation that model would call.
    #[allow(dead_code)]
    pub async fn replay_history(
        &self,
        user: &str,
        password: &str,
        history: &[String],
    ) -> Result<(String, String), ConnectorError> {
        let mut dialog = self.connect(user, password).await?;

        let mut output = String::new();
        let mut cwd = "~".to_string();

        for (i, cmd) in history.iter().enumerate() {
            dialog.send_command(cmd).await?;
            if i == history.len() - 1 {
                let turn = dialog.receive_until_prompt(cmd, self.get_terminal_width().await).await?;
                output = turn.output;
                cwd = turn.cwd;
            } else {
                dialog.drain_until_prompt().await?;
            }
        }

        dialog.close().await;
        Ok((output, cwd))
    }

    /// Replays only the `cd` commands from `history`, to reconstruct the
    /// working directory a fresh backend session wouldn't otherwise know
    /// about, without paying for the rest of the history's side effects.
    pub async fn replay_cwd_only(
        &self,
        user: &str,
        password: &str,
        history: &[String],
    ) -> Result<String, ConnectorError> {
        let mut dialog = self.connect(user, password).await?;
        let mut cwd = "~".to_string();

        for cmd in history.iter().filter(|c| c.trim_start().starts_with("cd ")) {
            dialog.send_command(cmd).await?;
            let turn = dialog.receive_until_prompt(cmd, self.get_terminal_width().await).await?;
            cwd = turn.cwd;
        }

        dialog.close().await;
        Ok(cwd)
    }

    /// Runs one command in a fresh backend session, optionally restoring
    /// the working directory first via `dir_cmd`.
    pub async fn execute_command(
        &self,
        command: &str,
        user: &str,
        password: &str,
        dir_cmd: &str,
    ) -> Result<(String, String), ConnectorError> {
        let mut dialog = self.connect(user, password).await?;

        if !dir_cmd.is_empty() {
            dialog.send_command(dir_cmd).await?;
            dialog.wait_for_prompt().await?;
        }

        dialog.send_command(command).await?;
        let turn = dialog.receive_until_prompt(command, self.get_terminal_width().await).await?;
        dialog.close().await;
        Ok((turn.output, turn.cwd))
    }

    /// Drives the literal-tab completion dialog and returns the original
    /// command alongside the raw (ANSI-laden) bytes the backend echoed.
    pub async fn execute_with_tab(
        &self,
        cwd: &str,
        command_with_trailing_tab: &str,
        user: &str,
        password: &str,
    ) -> Result<(String, Vec<u8>), ConnectorError> {
        let mut dialog = self.connect(user, password).await?;

        dialog.send_command(&format!("cd {cwd}")).await?;
        dialog.wait_for_prompt().await?;

        let raw_command = command_with_trailing_tab.replace('\t', "");
        let to_send = format!("{raw_command}\t");
        dialog.write_raw(to_send.as_bytes()).await?;

        tokio::time::sleep(TAB_SETTLE).await;

        let mut output: Vec<u8> = Vec::new();
        let deadline = Instant::now() + TAB_TOTAL;

        while Instant::now() < deadline {
            match tokio::time::timeout(TAB_POLL, dialog.read_chunk()).await {
                Ok(Ok(Some(chunk))) => {
                    output.extend_from_slice(&chunk);
                    let decoded = String::from_utf8_lossy(&output);
                    let cleaned = text::strip_ansi(&decoded);
                    if let Some(idx) = cleaned.rfind(raw_command.as_str()) {
                        if cleaned.len() > idx + raw_command.len() {
                            break;
                        }
                    }
                }
                Ok(Ok(None)) => break,
                Ok(Err(err)) => {
                    dialog.close().await;
                    return Err(err);
                }
                Err(_elapsed) => {
                    tokio::time::sleep(TAB_POLL).await;
                }
            }
        }

        dialog.close().await;
        Ok((command_with_trailing_tab.to_string(), output))
    }

    async fn connect(&self, user: &str, password: &str) -> Result<BackendDialog, ConnectorError> {
        let width = self.get_terminal_width().await;
        let height = self.get_terminal_height().await;

        let mut handle = tokio::time::timeout(
            CONNECT_TIMEOUT,
            client::connect(
                Arc::new(client::Config::default()),
                (self.host.as_str(), self.port),
                InsecureHandler,
            ),
        )
        .await
        .map_err(|_| ConnectorError::Timeout)?
        .map_err(ConnectorError::Handshake)?;

        let authenticated = tokio::time::timeout(
            CONNECT_TIMEOUT,
            handle.authenticate_password(user, password),
        )
        .await
        .map_err(|_| ConnectorError::Timeout)?
        .map_err(ConnectorError::Handshake)?;

        if !authenticated {
            guard::close_backend_session::<InsecureHandler>(None, Some(handle)).await;
            return Err(ConnectorError::Disconnected);
        }

        let mut channel = match handle.channel_open_session().await {
            Ok(channel) => channel,
            Err(err) => {
                guard::close_backend_session::<InsecureHandler>(None, Some(handle)).await;
                return Err(ConnectorError::Channel(err));
            }
        };

        let modes: Vec<(Pty, u32)> = vec![
            (Pty::ECHO, 1),
            (Pty::TTY_OP_ISPEED, 14400),
            (Pty::TTY_OP_OSPEED, 14400),
        ];

        if let Err(err) = channel
            .request_pty(false, "xterm", width as u32, height as u32, 0, 0, &modes)
            .await
        {
            guard::close_backend_session(Some(channel), Some(handle)).await;
            return Err(ConnectorError::Channel(err));
        }

        if let Err(err) = channel.request_shell(false).await {
            guard::close_backend_session(Some(channel), Some(handle)).await;
            return Err(ConnectorError::Channel(err));
        }

        let mut dialog = BackendDialog {
            channel: Some(channel),
            handle: Some(handle),
            rolling: Vec::new(),
        };

        if let Err(err) = dialog.wait_for_prompt().await {
            dialog.close().await;
            return Err(err);
        }

        Ok(dialog)
    }
}

/// Transient, one per backend command invocation.
struct BackendDialog {
    channel: Option<Channel<Msg>>,
    handle: Option<client::Handle<InsecureHandler>>,
    rolling: Vec<u8>,
}

struct Turn {
    output: String,
    cwd: String,
}

impl BackendDialog {
    async fn send_command(&mut self, command: &str) -> Result<(), ConnectorError> {
        self.write_raw(format!("{command}\n").as_bytes()).await
    }

    async fn write_raw(&mut self, data: &[u8]) -> Result<(), ConnectorError> {
        let channel = self.channel.as_mut().ok_or(ConnectorError::Disconnected)?;
        channel.data(data).await.map_err(ConnectorError::Channel)
    }

    /// Reads raw chunks until one containing `"$ "` or `"# "` arrives.
    async fn wait_for_prompt(&mut self) -> Result<(), ConnectorError> {
        loop {
            let chunk = self.read_chunk().await?.ok_or(ConnectorError::Disconnected)?;
            if contains_prompt(&chunk) {
                return Ok(());
            }
        }
    }

    /// Like `wait_for_prompt`, but for turns whose output we don't need.
    async fn drain_until_prompt(&mut self) -> Result<(), ConnectorError> {
        self.wait_for_prompt().await
    }

    /// Accumulates chunks into a rolling buffer and scans the *whole*
    /// buffer for the prompt delimiter on every new chunk, rather than only
    /// the newest read — the original backend dialog only checked the
    /// latest read, which misses a prompt delimiter split across a chunk
    /// boundary.
    async fn receive_until_prompt(
        &mut self,
        sent_command: &str,
        terminal_width: u16,
    ) -> Result<Turn, ConnectorError> {
        self.rolling.clear();
        loop {
            let chunk = self.read_chunk().await?.ok_or(ConnectorError::Disconnected)?;
            self.rolling.extend_from_slice(&chunk);
            if contains_prompt(&self.rolling) {
                break;
            }
        }

        let raw = String::from_utf8_lossy(&self.rolling).into_owned();
        Ok(extract_turn(&raw, sent_command, terminal_width))
    }

    /// Reads one chunk, returning `None` on a clean channel close.
    async fn read_chunk(&mut self) -> Result<Option<Vec<u8>>, ConnectorError> {
        let channel = self.channel.as_mut().ok_or(ConnectorError::Disconnected)?;
        loop {
            match channel.wait().await {
                Some(ChannelMsg::Data { data }) => {
                    let mut buf = Vec::with_capacity(READ_CHUNK.min(data.len()));
                    buf.extend_from_slice(&data);
                    return Ok(Some(buf));
                }
                Some(ChannelMsg::ExtendedData { data, .. }) => {
                    let mut buf = Vec::with_capacity(data.len());
                    buf.extend_from_slice(&data);
                    return Ok(Some(buf));
                }
                Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) => return Ok(None),
                Some(_) => continue,
                None => return Ok(None),
            }
        }
    }

    async fn close(&mut self) {
        guard::close_backend_session(self.channel.take(), self.handle.take()).await;
    }
}

fn contains_prompt(buf: &[u8]) -> bool {
    buf.windows(2).any(|w| w == b"$ " || w == b"# ")
}

/// Splits the backend's raw turn output into the cleaned command output
/// and the working directory sniffed out of the trailing prompt line.
fn extract_turn(raw: &str, sent_command: &str, terminal_width: u16) -> Turn {
    let sent_trimmed = sent_command.trim();
    let lines: Vec<&str> = raw.split('\n').collect();
    let last_index = lines.len().saturating_sub(1);

    let mut cleaned_lines: Vec<String> = Vec::with_capacity(lines.len());
    for (i, line) in lines.iter().enumerate() {
        if line.trim() == sent_trimmed {
            continue;
        }
        if i == last_index {
            cleaned_lines.push(text::remove_prompt(line));
        } else {
            cleaned_lines.push((*line).to_string());
        }
    }

    let mut output = cleaned_lines.join("\n");
    if contains_ls_invocation(sent_trimmed) {
        output = reformat_ls_blocks(&output, sent_trimmed, terminal_width);
    }

    let prompt_line = lines.last().copied().unwrap_or("").trim();
    let cwd = CWD_RE
        .captures(prompt_line)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_else(|| "~".to_string());

    Turn { output, cwd }
}

fn split_compound(command: &str) -> Vec<String> {
    let mut parts = vec![command.to_string()];
    for sep in ["&&", "||", ";", "|"] {
        parts = parts.iter().flat_map(|p| p.split(sep)).map(str::to_string).collect();
    }
    parts
}

fn is_ls_invocation(part: &str) -> bool {
    let trimmed = part.trim();
    match trimmed.strip_prefix("ls") {
        Some(rest) => rest.is_empty() || rest.starts_with(char::is_whitespace),
        None => false,
    }
}

fn contains_ls_invocation(command: &str) -> bool {
    split_compound(command).iter().any(|p| is_ls_invocation(p))
}

/// Re-columns any `ls -la`-shaped block in `output` at `terminal_width`.
fn reformat_ls_blocks(output: &str, command: &str, terminal_width: u16) -> String {
    let ls_commands: Vec<String> = split_compound(command)
        .into_iter()
        .filter(|p| is_ls_invocation(p))
        .map(|p| p.trim().to_string())
        .collect();
    if ls_commands.is_empty() {
        return output.to_string();
    }

    let mut result: Vec<String> = Vec::new();
    let mut in_ls_block = false;
    let mut ls_buffer: Vec<String> = Vec::new();

    for line in output.split('\n') {
        let trimmed = line.trim();

        if !in_ls_block {
            let starts_ls_block = ls_commands.iter().any(|ls_cmd| {
                let head = ls_cmd.split_whitespace().next().unwrap_or("");
                if !trimmed.starts_with(head) {
                    return false;
                }
                matches!(trimmed.split_whitespace().next(), Some(".") | Some(".."))
            });

            if starts_ls_block {
                in_ls_block = true;
                ls_buffer = vec![line.to_string()];
            } else {
                result.push(line.to_string());
            }
        } else if trimmed.is_empty()
            || trimmed.contains("Filesystem")
            || trimmed.contains("rootfs")
            || trimmed.contains("udev")
        {
            result.push(format_ls_output(&ls_buffer.join("\n"), terminal_width).trim_end_matches(['\r', '\n']).to_string());
            result.push(line.to_string());
            in_ls_block = false;
            ls_buffer.clear();
        } else {
            ls_buffer.push(line.to_string());
        }
    }

    if in_ls_block && !ls_buffer.is_empty() {
        result.push(format_ls_output(&ls_buffer.join("\n"), terminal_width).trim_end_matches(['\r', '\n']).to_string());
    }

    result.join("\n")
}

/// Flattens `block` into items and re-wraps them at `terminal_width`,
/// column width `max_item_len + 2` floored at 11 (spec §4.E).
fn format_ls_output(block: &str, terminal_width: u16) -> String {
    let items: Vec<&str> = block
        .split('\n')
        .flat_map(|line| line.trim_end_matches('\r').split_whitespace())
        .collect();

    if items.is_empty() {
        return String::new();
    }

    let max_item_len = items
        .iter()
        .map(|item| text::strip_ansi(item).chars().count())
        .max()
        .unwrap_or(0);
    let column_width = (max_item_len + 2).max(MIN_LS_COLUMN_WIDTH);

    let mut result = String::new();
    let mut current_line_width = 0usize;

    for (i, item) in items.iter().enumerate() {
        let item_width = text::strip_ansi(item).chars().count();

        if current_line_width > 0 && current_line_width + column_width > terminal_width as usize {
            result.push_str("\r\n");
            current_line_width = 0;
        }

        result.push_str(item);
        current_line_width += item_width;

        if i < items.len() - 1 {
            let padding = column_width - item_width;
            result.push_str(&" ".repeat(padding));
            current_line_width += padding;
        }
    }

    result.push_str("\r\n");
    result
}

/// Accepts any backend host key — deliberately insecure, per spec §1.
#[derive(Clone)]
struct InsecureHandler;

#[async_trait]
impl client::Handler for InsecureHandler {
    type Error = russh::Error;

    async fn check_server_key(&mut self, _server_public_key: &PublicKey) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cwd_regex_extracts_path_without_control_chars() {
        let line = "user@box:/tmp$ ";
        let cwd = CWD_RE
            .captures(line)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string());
        assert_eq!(cwd.as_deref(), Some("/tmp"));
    }

    #[test]
    fn extract_turn_drops_echo_and_strips_prompt() {
        let raw = "hello\r\nuser@box:/tmp# ";
        let turn = extract_turn(raw, "echo hello", 80);
        assert_eq!(turn.output, "hello\r\n");
        assert_eq!(turn.cwd, "/tmp");
    }

    #[test]
    fn extract_turn_falls_back_to_tilde_without_match() {
        let raw = "some output\r\nno prompt here";
        let turn = extract_turn(raw, "whoami", 80);
        assert_eq!(turn.cwd, "~");
    }

    #[test]
    fn contains_ls_invocation_detects_plain_and_compound() {
        assert!(contains_ls_invocation("ls -la"));
        assert!(contains_ls_invocation("cd /tmp && ls"));
        assert!(!contains_ls_invocation("lsof -i"));
        assert!(!contains_ls_invocation("cat ls-report.txt"));
    }

    #[test]
    fn format_ls_output_respects_terminal_width_and_min_column() {
        let block = ". .. a bb ccc";
        let out = format_ls_output(block, 40);
        let lines: Vec<&str> = out.trim_end_matches("\r\n").split("\r\n").collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].len() <= 40);
        // column width = max_item_len(3) + 2 = 5, floored at 11
        assert!(lines[0].contains(&" ".repeat(11 - 1)));
    }

    #[test]
    fn contains_prompt_detects_both_prompt_shapes() {
        assert!(contains_prompt(b"root@host:/root# "));
        assert!(contains_prompt(b"user@host:/home/user$ "));
        assert!(!contains_prompt(b"just some text"));
    }
}
