use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

#[derive(clap::Parser, Debug)]
#[command(
    version,
    about = "SSH honeypot dispatcher",
    long_about = "Accepts SSH connections, authenticates against a rule file, and relays interactive sessions to a disposable backend shell emulator one command at a time, reformatting its output for the attacker's terminal."
)]
pub struct App {
    /// Address to listen for SSH connections on.
    #[arg(
        short = 'i',
        long = "interface",
        default_value_t = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), 22),
        env = "INTERFACE"
    )]
    pub interface: SocketAddr,

    /// Hostname or address of the backend shell emulator.
    #[arg(short = 'b', long = "backend-host", default_value = "cowrie", env = "BACKEND_HOST")]
    pub backend_host: String,

    /// Port the backend shell emulator's SSH server listens on.
    #[arg(short = 'p', long = "backend-port", default_value_t = 2222, env = "BACKEND_PORT")]
    pub backend_port: u16,

    /// `user:password` rule file; missing file rejects every credential.
    #[arg(short = 'r', long = "rule-file", default_value = "./config/user.txt", env = "RULE_FILE")]
    pub rule_file: PathBuf,

    /// MOTD template shown at the start of every session.
    #[arg(short = 'm', long = "motd-file", default_value = "/config/motd.txt", env = "MOTD_FILE")]
    pub motd_file: PathBuf,

    /// RSA host key, PKCS#1 PEM. Generated and written here if absent.
    #[arg(short = 'k', long = "host-key", default_value = "/certs/ssh_host_rsa_key", env = "HOST_KEY_PATH")]
    pub host_key: PathBuf,

    /// JSON-lines structured event log.
    #[arg(short = 'l', long = "log-file", default_value = "/var/log/gossh/gossh.log", env = "EVENT_LOG_PATH")]
    pub log_file: PathBuf,
}

/// `HOST_NAME` is read directly from the environment (not through clap)
/// since it's part of the attacker-facing prompt, not dispatcher
/// configuration — truncated to 9 characters to match the backend shell's
/// own prompt width, falling back to `"unknown"` when unset.
pub fn hostname() -> String {
    let raw = std::env::var("HOST_NAME").unwrap_or_default();
    if raw.is_empty() {
        return "unknown".to_string();
    }
    raw.chars().take(9).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hostname_truncates_to_nine_chars() {
        std::env::set_var("HOST_NAME", "abcdefghijklmnop");
        assert_eq!(hostname(), "abcdefghi");
        std::env::remove_var("HOST_NAME");
    }

    #[test]
    fn hostname_falls_back_when_unset() {
        std::env::remove_var("HOST_NAME");
        assert_eq!(hostname(), "unknown");
    }
}
