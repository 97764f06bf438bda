//! Prompt string and MOTD banner formatting (spec component B).

use chrono::Utc;
use std::path::Path;

/// Builds the synthetic shell prompt shown after every command.
pub fn prompt(user: &str, host: &str, cwd: &str) -> String {
    format!("{user}@{host}:{cwd}# ")
}

const FALLBACK_HOST: &str = "192.168.100.3";
const MOTD_TIME_FORMAT: &str = "%a %b %d %H:%M:%S UTC %Y";

/// Reads the MOTD template and substitutes `{now}`/`{hostname}` in each line.
///
/// Falls back to a single generic banner line when the template can't be
/// read, per spec §4.B — this is a cosmetic failure, never fatal.
pub fn motd_lines(path: &Path, hostname: &str) -> Vec<String> {
    let now = Utc::now().format(MOTD_TIME_FORMAT).to_string();

    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) => {
            log::warn!("failed to read motd file {}: {}", path.display(), err);
            return vec![format!("Welcome. (Host: {FALLBACK_HOST} Time: {now})")];
        }
    };

    let formatted_hostname = format!("{:<10}", format!("{hostname}:"));

    raw.lines()
        .map(|line| {
            line.replace("{now}", &now)
                .replace("{hostname}", &formatted_hostname)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_matches_expected_shape() {
        assert_eq!(prompt("root", "box", "/tmp"), "root@box:/tmp# ");
    }

    #[test]
    fn motd_falls_back_when_file_missing() {
        let lines = motd_lines(Path::new("/nonexistent/path/to/motd.txt"), "myhost");
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("Welcome. (Host: 192.168.100.3 Time: "));
    }

    #[test]
    fn motd_substitutes_placeholders() {
        let dir = std::env::temp_dir().join(format!("gossh-motd-test-{}", std::process::id()));
        std::fs::write(&dir, "Welcome to {hostname}\nTime is {now}\n").unwrap();
        let lines = motd_lines(&dir, "box");
        let _ = std::fs::remove_file(&dir);

        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("Welcome to box:"));
        assert!(lines[1].starts_with("Time is "));
        assert!(!lines[1].contains("{now}"));
    }
}
