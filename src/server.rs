//! SSH dispatcher (spec component H): the `russh` server `Handler` and
//! `Server` implementations that tie every other module together.
//!
//! PTY and window-change requests arrive from `russh` already parsed
//! (unlike the raw length-prefixed payloads a plain `golang.org/x/crypto/ssh`
//! server has to decode by hand), so this module only has to forward the
//! width/height onto the per-connection [`Connector`]. Everything else —
//! channel-type filtering for non-`session` opens, global request discard —
//! is handled by `russh`'s own default `Handler` methods; we only override
//! what spec component H actually needs to customise.

use crate::auth::Authenticator;
use crate::connector::Connector;
use crate::eventlog::EventLog;
use crate::guard;
use crate::session::{SessionHandler, SessionOutcome};
use async_trait::async_trait;
use russh::server::{self, Auth, Handler, Msg, Session};
use russh::{Channel, ChannelId, Pty};
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

/// Per-connection handler. One of these is constructed per accepted TCP
/// connection by [`SshServerHandler::new_client`].
pub struct SshHandler {
    peer: SocketAddr,
    bind_addr: SocketAddr,
    authenticator: Arc<Authenticator>,
    event_log: Arc<EventLog>,
    backend_host: String,
    backend_port: u16,
    hostname: String,
    motd_path: Arc<PathBuf>,
    username: Option<String>,
    password: Option<String>,
    connector: Option<Arc<Connector>>,
    session: Option<SessionHandler>,
    session_started: bool,
}

#[async_trait]
impl Handler for SshHandler {
    type Error = russh::Error;

    fn auth_password(
        &mut self,
        user: &str,
        password: &str,
    ) -> impl Future<Output = Result<Auth, Self::Error>> + Send {
        async move {
            self.username = Some(user.to_string());
            self.password = Some(password.to_string());

            let connector = Arc::new(Connector::new(self.backend_host.clone(), self.backend_port));
            self.connector = Some(connector.clone());

            let probe_user = user.to_string();
            let probe_password = password.to_string();
            tokio::spawn(async move {
                guard::catch_panic("record_login", async {
                    connector.record_login(&probe_user, &probe_password).await;
                })
                .await;
            });

            let accepted = self.authenticator.authenticate(user, password);
            self.event_log
                .log_login_attempt(self.peer, self.bind_addr, user, password, accepted);

            if accepted {
                log::info!("accepted password auth for '{user}' from {}", self.peer);
                Ok(Auth::Accept)
            } else {
                log::info!("rejected password auth for '{user}' from {}", self.peer);
                Ok(Auth::Reject {
                    proceed_with_methods: None,
                    partial_success: false,
                })
            }
        }
    }

    fn channel_open_session(
        &mut self,
        _channel: Channel<Msg>,
        _session: &mut Session,
    ) -> impl Future<Output = Result<bool, Self::Error>> + Send {
        async move { Ok(true) }
    }

    fn channel_eof(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send {
        async move {
            if let Some(handler) = self.session.take() {
                let mut sink = crate::line_editor::channel_sink(session, channel);
                crate::line_editor::reset_terminal(&mut sink);
                drop(sink);
                handler.log_close("Session closed");
            }
            guard::close_server_channel(session, channel);
            Ok(())
        }
    }

    fn pty_request(
        &mut self,
        channel: ChannelId,
        _term: &str,
        col_width: u32,
        row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(Pty, u32)],
        session: &mut Session,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send {
        async move {
            if let Some(connector) = &self.connector {
                connector
                    .update_terminal_size(col_width as u16, row_height as u16)
                    .await;
            }
            session.channel_success(channel)?;
            Ok(())
        }
    }

    fn window_change_request(
        &mut self,
        _channel: ChannelId,
        col_width: u32,
        row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _session: &mut Session,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send {
        async move {
            if let Some(connector) = &self.connector {
                connector
                    .update_terminal_size(col_width as u16, row_height as u16)
                    .await;
            }
            Ok(())
        }
    }

    fn exec_request(
        &mut self,
        channel: ChannelId,
        _data: &[u8],
        session: &mut Session,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send {
        async move {
            session.channel_success(channel)?;
            Ok(())
        }
    }

    fn shell_request(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send {
        async move {
            session.channel_success(channel)?;

            if self.session_started {
                return Ok(());
            }
            self.session_started = true;

            let (Some(username), Some(password), Some(connector)) =
                (self.username.clone(), self.password.clone(), self.connector.clone())
            else {
                log::warn!("shell request before authentication completed; closing channel");
                guard::close_server_channel(session, channel);
                return Ok(());
            };

            let mut handler = SessionHandler::new(
                connector,
                self.event_log.clone(),
                username,
                password,
                self.hostname.clone(),
                self.peer,
            );

            let mut sink = crate::line_editor::channel_sink(session, channel);
            handler.start(&self.motd_path, &mut sink).await;
            drop(sink);

            self.session = Some(handler);
            Ok(())
        }
    }

    fn data(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send {
        async move {
            if self.session.is_none() {
                return Ok(());
            }

            for &byte in data {
                let Some(handler) = self.session.as_mut() else {
                    break;
                };
                let mut sink = crate::line_editor::channel_sink(session, channel);
                let outcome = handler.feed_byte(byte, &mut sink).await;
                drop(sink);

                if matches!(outcome, SessionOutcome::Closed) {
                    guard::close_server_channel(session, channel);
                    self.session = None;
                    return Err(russh::Error::Disconnect);
                }
            }

            Ok(())
        }
    }
}

/// Implementation of `server::Server`: builds one [`SshHandler`] per
/// accepted connection and owns the configuration every handler shares.
pub struct SshServerHandler {
    authenticator: Arc<Authenticator>,
    event_log: Arc<EventLog>,
    backend_host: String,
    backend_port: u16,
    hostname: String,
    bind_addr: SocketAddr,
    motd_path: Arc<PathBuf>,
}

impl SshServerHandler {
    pub fn new(
        authenticator: Arc<Authenticator>,
        event_log: Arc<EventLog>,
        backend_host: String,
        backend_port: u16,
        hostname: String,
        bind_addr: SocketAddr,
        motd_path: PathBuf,
    ) -> Self {
        Self {
            authenticator,
            event_log,
            backend_host,
            backend_port,
            hostname,
            bind_addr,
            motd_path: Arc::new(motd_path),
        }
    }
}

impl server::Server for SshServerHandler {
    type Handler = SshHandler;

    fn new_client(&mut self, peer_addr: Option<SocketAddr>) -> Self::Handler {
        let peer = peer_addr.unwrap_or(self.bind_addr);
        log::info!("new connection from {peer}");

        SshHandler {
            peer,
            bind_addr: self.bind_addr,
            authenticator: self.authenticator.clone(),
            event_log: self.event_log.clone(),
            backend_host: self.backend_host.clone(),
            backend_port: self.backend_port,
            hostname: self.hostname.clone(),
            motd_path: self.motd_path.clone(),
            username: None,
            password: None,
            connector: None,
            session: None,
            session_started: false,
        }
    }

    fn handle_session_error(&mut self, error: <Self::Handler as Handler>::Error) {
        use russh::Error;
        use std::io::ErrorKind;

        match error {
            Error::Disconnect => {}
            Error::IO(err) => match err.kind() {
                ErrorKind::UnexpectedEof => log::debug!("client dropped TCP without an SSH goodbye"),
                ErrorKind::ConnectionReset => log::debug!("connection reset by peer"),
                _ => log::warn!("I/O session error: {err}"),
            },
            Error::Elapsed(_) => log::warn!("session timed out"),
            Error::InactivityTimeout => log::warn!("session timed out due to inactivity"),
            other => log::warn!("session error: {other}"),
        }
    }
}
