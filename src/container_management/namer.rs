use regex::Regex;

use crate::error_handling::types::DirectorError;

/// Longest identity handed out, matching the usual hostname label limit.
pub const MAX_NAME_LEN: usize = 63;

const HOST_PLACEHOLDER: &str = "{host}";

/// Derives a container identity from an attacker host.
///
/// The result only depends on the template and the host, so repeated calls
/// for one host always land on the same registry key.
#[derive(Debug, Clone)]
pub struct Namer {
    template: String,
    max_len: usize,
    unsafe_chars: Regex,
}

impl Namer {
    /// `template` is either a prefix (`"miel"` gives `miel-<host>`) or
    /// contains a `{host}` placeholder.
    pub fn new(template: &str) -> Result<Self, DirectorError> {
        let allowed = Regex::new(r"^[A-Za-z0-9._-]*(\{host\}[A-Za-z0-9._-]*)?$")
            .map_err(|e| DirectorError::InvalidConfig(e.to_string()))?;
        if !allowed.is_match(template) {
            return Err(DirectorError::InvalidConfig(format!(
                "naming template {:?} may only hold [A-Za-z0-9._-] and one {}",
                template, HOST_PLACEHOLDER
            )));
        }

        let unsafe_chars = Regex::new(r"[^A-Za-z0-9.-]")
            .map_err(|e| DirectorError::InvalidConfig(e.to_string()))?;

        Ok(Namer {
            template: template.to_string(),
            max_len: MAX_NAME_LEN,
            unsafe_chars,
        })
    }

    pub fn with_max_len(mut self, max_len: usize) -> Self {
        self.max_len = max_len.max(1);
        self
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn name(&self, host: &str) -> String {
        let host = self.unsafe_chars.replace_all(host, "-");

        let mut name = if self.template.contains(HOST_PLACEHOLDER) {
            self.template.replace(HOST_PLACEHOLDER, &host)
        } else if self.template.is_empty() {
            host.into_owned()
        } else {
            format!("{}-{}", self.template, host)
        };

        // Every char is ASCII at this point.
        name.truncate(self.max_len);
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_template() {
        let namer = Namer::new("miel").unwrap();
        assert_eq!(namer.name("10.0.0.1"), "miel-10.0.0.1");
    }

    #[test]
    fn placeholder_template() {
        let namer = Namer::new("ssh-{host}-box").unwrap();
        assert_eq!(namer.name("10.0.0.1"), "ssh-10.0.0.1-box");
    }

    #[test]
    fn empty_template_is_bare_host() {
        let namer = Namer::new("").unwrap();
        assert_eq!(namer.name("attacker.example"), "attacker.example");
    }

    #[test]
    fn names_are_stable_and_distinct() {
        let namer = Namer::new("miel").unwrap();
        assert_eq!(namer.name("10.0.0.1"), namer.name("10.0.0.1"));
        assert_ne!(namer.name("10.0.0.1"), namer.name("10.0.0.2"));
        assert_ne!(namer.name("2001:db8::1"), namer.name("2001:db8:1"));
    }

    #[test]
    fn ipv6_hosts_are_sanitized() {
        let namer = Namer::new("miel").unwrap();
        assert_eq!(namer.name("2001:db8::1"), "miel-2001-db8--1");
    }

    #[test]
    fn long_names_are_truncated_from_the_tail() {
        let namer = Namer::new("miel").unwrap().with_max_len(10);
        assert_eq!(namer.name("192.168.100.200"), "miel-192.1");

        let default = Namer::new("miel").unwrap();
        let long_host = "a".repeat(200);
        let name = default.name(&long_host);
        assert_eq!(name.len(), MAX_NAME_LEN);
        assert!(name.starts_with("miel-aaa"));
    }

    #[test]
    fn invalid_templates_are_rejected() {
        for template in ["miel/{host}", "{host}{host}", "a b", "{name}"] {
            assert!(
                matches!(Namer::new(template), Err(DirectorError::InvalidConfig(_))),
                "{} should be rejected",
                template
            );
        }
    }
}
