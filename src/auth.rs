//! Rule-file authenticator (spec component D).

use std::path::Path;

/// One `user:password` rule. `"*"` is a wildcard in either field; a `"!"`
/// prefix on the password negates exact-match equality.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthRule {
    pub user_pattern: String,
    pub password_pattern: String,
}

/// Immutable, in-order list of rules loaded once at startup.
#[derive(Debug, Default)]
pub struct Authenticator {
    rules: Vec<AuthRule>,
}

impl Authenticator {
    /// Loads rules from `path`. A missing file yields an authenticator with
    /// no rules (every credential is rejected) rather than an error — the
    /// rule file is a soft dependency per spec §4.D.
    pub fn load(path: &Path) -> Self {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) => {
                log::warn!("rule file {} not found: {}", path.display(), err);
                return Self::default();
            }
        };

        let rules = contents
            .lines()
            .filter_map(|line| {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    return None;
                }
                let (user, pass) = line.split_once(':')?;
                Some(AuthRule {
                    user_pattern: user.to_string(),
                    password_pattern: pass.to_string(),
                })
            })
            .collect();

        Self { rules }
    }

    /// Walks rules in order; the first matching rule decides the verdict.
    pub fn authenticate(&self, user: &str, password: &str) -> bool {
        for rule in &self.rules {
            if rule.user_pattern == user || rule.user_pattern == "*" {
                return if rule.password_pattern == "*" {
                    true
                } else if let Some(negated) = rule.password_pattern.strip_prefix('!') {
                    password != negated
                } else {
                    password == rule.password_pattern
                };
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules(pairs: &[(&str, &str)]) -> Authenticator {
        Authenticator {
            rules: pairs
                .iter()
                .map(|(u, p)| AuthRule {
                    user_pattern: u.to_string(),
                    password_pattern: p.to_string(),
                })
                .collect(),
        }
    }

    #[test]
    fn wildcard_user_matches_exact_password() {
        let a = rules(&[("*", "hunter2")]);
        assert!(a.authenticate("anyone", "hunter2"));
        assert!(!a.authenticate("anyone", "wrong"));
    }

    #[test]
    fn wildcard_password_accepts_anything() {
        let a = rules(&[("admin", "*")]);
        assert!(a.authenticate("admin", "literally-anything"));
    }

    #[test]
    fn negated_password_rejects_only_exact_value() {
        let a = rules(&[("*", "!blocked")]);
        assert!(!a.authenticate("root", "blocked"));
        assert!(a.authenticate("root", "ok"));
    }

    #[test]
    fn first_match_wins() {
        let a = rules(&[("admin", "*"), ("*", "!blocked")]);
        assert!(a.authenticate("admin", "x"));
        assert!(!a.authenticate("root", "blocked"));
        assert!(a.authenticate("root", "ok"));
    }

    #[test]
    fn no_match_rejects() {
        let a = rules(&[("admin", "*")]);
        assert!(!a.authenticate("someone-else", "x"));
    }

    #[test]
    fn missing_rule_file_rejects_everything() {
        let a = Authenticator::load(Path::new("/nonexistent/path/to/rules.txt"));
        assert!(!a.authenticate("admin", "admin"));
    }

    #[test]
    fn load_skips_blank_and_comment_and_malformed_lines() {
        let dir = std::env::temp_dir().join(format!("gossh-auth-test-{}", std::process::id()));
        std::fs::write(
            &dir,
            "# a comment\n\nadmin:*\nmalformed-no-colon\n*:!blocked\n",
        )
        .unwrap();
        let a = Authenticator::load(&dir);
        let _ = std::fs::remove_file(&dir);

        assert_eq!(a.rules.len(), 2);
        assert!(a.authenticate("admin", "whatever"));
        assert!(!a.authenticate("root", "blocked"));
    }
}
