use regex::Regex;

const REDACTED: &str = "[REDACTED]";

/// Scrubs identity that leaks through message text (mentions, e-mails, tokens).
/// Field-level identity is handled by the sanitiser's allow-list.
pub struct Redactor {
    patterns: Vec<(&'static str, Regex)>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Redaction {
    pub text: String,
    pub labels: Vec<&'static str>,
}

impl Redaction {
    pub fn changed(&self) -> bool {
        !self.labels.is_empty()
    }
}

impl Redactor {
    pub fn new() -> Self {
        let patterns = vec![
            (
                "email",
                Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap(),
            ),
            ("discord_mention", Regex::new(r"<@[!&]?\d{5,}>").unwrap()),
            ("reddit_user", Regex::new(r"\b/?u/[A-Za-z0-9_-]{3,20}\b").unwrap()),
            ("api_key", Regex::new(r"sk-[a-zA-Z0-9_-]{20,}").unwrap()),
            (
                "github_token",
                Regex::new(r"gh[pousr]_[a-zA-Z0-9]{20,}").unwrap(),
            ),
            (
                "discord_token",
                Regex::new(r"[MN][A-Za-z\d]{23,25}\.[\w-]{6}\.[\w-]{27,38}").unwrap(),
            ),
        ];
        Self { patterns }
    }

    pub fn redact(&self, content: &str) -> Redaction {
        let mut text = content.to_string();
        let mut labels = Vec::new();

        for (label, pattern) in &self.patterns {
            if pattern.is_match(&text) {
                text = pattern.replace_all(&text, REDACTED).into_owned();
                labels.push(*label);
            }
        }
        Redaction { text, labels }
    }
}

impl Default for Redactor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn redactor() -> Redactor {
        Redactor::new()
    }

    #[test]
    fn clean_text_passes_through() {
        let out = redactor().redact("Run the Arbalest with shatter traits.");
        assert_eq!(out.text, "Run the Arbalest with shatter traits.");
        assert!(!out.changed());
    }

    #[test]
    fn redacts_email() {
        let out = redactor().redact("mail me at player.one@example.com for the sheet");
        assert!(out.text.contains(REDACTED));
        assert!(!out.text.contains("example.com"));
        assert_eq!(out.labels, vec!["email"]);
    }

    #[test]
    fn redacts_platform_mentions() {
        let out = redactor().redact("<@123456789012> asked, and u/zombie_fan agreed");
        assert!(!out.text.contains("123456789012"));
        assert!(!out.text.contains("zombie_fan"));
        assert!(out.labels.contains(&"discord_mention"));
        assert!(out.labels.contains(&"reddit_user"));
    }

    #[test]
    fn redacts_tokens() {
        let out = redactor().redact("key sk-abcdefghijklmnopqrstuvwxyz and ghp_abcdefghijklmnopqrstuvwxyz");
        assert_eq!(out.text.matches(REDACTED).count(), 2);
    }
}
