//! Structured JSON-lines event sink (spec §6).
//!
//! Opens and closes the log file once per event rather than holding it
//! open — slower, but a write can never be lost to a process that dies
//! holding a stale file handle. Failures are logged and swallowed; a
//! honeypot must never crash because it couldn't record itself.

use chrono::Utc;
use serde_json::json;
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Clone)]
pub struct EventLog {
    path: PathBuf,
}

impl EventLog {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn log_login_attempt(
        &self,
        src: SocketAddr,
        dest: SocketAddr,
        username: &str,
        password: &str,
        success: bool,
    ) {
        self.write(json!({
            "timestamp": Utc::now().to_rfc3339(),
            "type": "Gossh",
            "eventid": "gossh.login.attempt",
            "src_ip": src.ip().to_string(),
            "src_port": src.port(),
            "dest_ip": dest.ip().to_string(),
            "dest_port": dest.port(),
            "username": username,
            "password": password,
            "protocol": "ssh",
            "success": success,
        }));
    }

    pub fn log_command_input(&self, src: SocketAddr, username: &str, command: &str, cwd: &str) {
        self.write(json!({
            "timestamp": Utc::now().to_rfc3339(),
            "type": "Gossh",
            "eventid": "gossh.command.input",
            "src_ip": src.ip().to_string(),
            "src_port": src.port(),
            "username": username,
            "command": command,
            "cwd": cwd,
            "protocol": "ssh",
        }));
    }

    pub fn log_session_close(
        &self,
        src: SocketAddr,
        username: &str,
        duration_seconds: f64,
        message: &str,
    ) {
        self.write(json!({
            "timestamp": Utc::now().to_rfc3339(),
            "type": "Gossh",
            "eventid": "gossh.session.close",
            "src_ip": src.ip().to_string(),
            "src_port": src.port(),
            "username": username,
            "duration": format!("{duration_seconds:.2}s"),
            "message": message,
            "protocol": "ssh",
        }));
    }

    fn write(&self, value: serde_json::Value) {
        use std::io::Write;

        let line = match serde_json::to_string(&value) {
            Ok(line) => line,
            Err(err) => {
                log::error!("failed to marshal event log entry: {err}");
                return;
            }
        };

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path);

        match file {
            Ok(mut file) => {
                if let Err(err) = writeln!(file, "{line}") {
                    log::error!("failed to write event log entry to {}: {}", self.path.display(), err);
                }
            }
            Err(err) => {
                log::error!("failed to open event log {}: {}", self.path.display(), err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), port)
    }

    #[test]
    fn writes_one_valid_json_object_per_line() {
        let path = std::env::temp_dir().join(format!("gossh-eventlog-test-{}", std::process::id()));
        let _ = std::fs::remove_file(&path);
        let log = EventLog::new(path.clone());

        log.log_login_attempt(addr(4000), addr(22), "root", "toor", false);
        log.log_command_input(addr(4000), "root", "ls -la", "/tmp");
        log.log_session_close(addr(4000), "root", 12.345, "Session closed");

        let contents = std::fs::read_to_string(&path).unwrap();
        let _ = std::fs::remove_file(&path);
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);

        for line in &lines {
            let value: serde_json::Value = serde_json::from_str(line).unwrap();
            assert_eq!(value["type"], "Gossh");
            let ts = value["timestamp"].as_str().unwrap();
            assert!(chrono::DateTime::parse_from_rfc3339(ts).is_ok());
        }

        let close: serde_json::Value = serde_json::from_str(lines[2]).unwrap();
        assert_eq!(close["duration"], "12.35s");
        assert_eq!(close["eventid"], "gossh.session.close");
    }
}
