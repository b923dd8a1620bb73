use serde::{Deserialize, Serialize};

/// How seriously a command failure is taken.
///
/// Start failures and cancellation always fail the call. A non-zero exit
/// status only fails it at [`CriticalLevel::RedAlert`]; lower levels log it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CriticalLevel {
    #[default]
    Normal,
    Warning,
    RedAlert,
}

impl CriticalLevel {
    /// Whether a non-zero exit status should be escalated as an error.
    pub fn escalates_exit_status(self) -> bool {
        self == CriticalLevel::RedAlert
    }

    /// Whether failures are logged with full detail.
    pub fn is_verbose(self) -> bool {
        self > CriticalLevel::Normal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_red_alert_escalates() {
        assert!(!CriticalLevel::Normal.escalates_exit_status());
        assert!(!CriticalLevel::Warning.escalates_exit_status());
        assert!(CriticalLevel::RedAlert.escalates_exit_status());
        assert_eq!(CriticalLevel::default(), CriticalLevel::Normal);
    }

    #[test]
    fn levels_decode_from_snake_case() {
        #[derive(Deserialize)]
        struct Wrapper {
            level: CriticalLevel,
        }
        let w: Wrapper = toml::from_str("level = \"red_alert\"").unwrap();
        assert_eq!(w.level, CriticalLevel::RedAlert);
    }
}
