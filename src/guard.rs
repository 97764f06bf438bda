//! Null-safe, panic-proof resource teardown (spec component C).
//!
//! Every helper here tolerates an absent resource and never lets a close
//! failure propagate — session teardown happens from the normal exit path,
//! the error path, and panic recovery alike, and none of those call sites
//! want to juggle a `Result` on the way out the door.

use russh::{ChannelId, CryptoVec};
use std::panic::AssertUnwindSafe;
use futures::FutureExt;

/// Closes a server-facing channel: sends a zero `exit-status` request, then
/// closes it. Both steps are best-effort.
pub fn close_server_channel(session: &mut russh::server::Session, channel: ChannelId) {
    let status: u32 = 0;
    if let Err(err) = session.exit_status_request(channel, status) {
        log::debug!("failed to send exit-status to channel {channel}: {err}");
    }
    if let Err(err) = session.close(channel) {
        log::debug!("failed to close channel {channel}: {err}");
    }
}

/// Closes a backend client channel and its owning client handle, in that
/// order, swallowing any error either step raises.
pub async fn close_backend_session<H: russh::client::Handler>(
    channel: Option<russh::Channel<russh::client::Msg>>,
    handle: Option<russh::client::Handle<H>>,
) {
    if let Some(channel) = channel {
        if let Err(err) = channel.close().await {
            log::debug!("failed to close backend channel: {err}");
        }
    }
    if let Some(handle) = handle {
        if let Err(err) = handle.disconnect(russh::Disconnect::ByApplication, "", "").await {
            log::debug!("failed to disconnect backend client: {err}");
        }
    }
}

/// Runs `fut` and logs-and-swallows a panic instead of propagating it,
/// mirroring the `defer recover()` guard every top-level task in the
/// original carries.
pub async fn catch_panic<F, T>(task_name: &str, fut: F) -> Option<T>
where
    F: std::future::Future<Output = T>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(value) => Some(value),
        Err(panic) => {
            let msg = panic_message(&panic);
            log::error!("recovered from panic in {task_name}: {msg}");
            None
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Writes `data` to a server channel, swallowing (logging) a send failure
/// rather than letting it unwind the caller — every output write in §4.G
/// goes through this.
pub fn write_channel(session: &mut russh::server::Session, channel: ChannelId, data: &[u8]) {
    if let Err(err) = session.data(channel, CryptoVec::from_slice(data)) {
        log::debug!("failed to write {} bytes to channel {channel}: {err}", data.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn catch_panic_swallows_and_returns_none() {
        let result = catch_panic("test-task", async {
            panic!("boom");
            #[allow(unreachable_code)]
            42
        })
        .await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn catch_panic_passes_through_normal_result() {
        let result = catch_panic("test-task", async { 42 }).await;
        assert_eq!(result, Some(42));
    }
}
