use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

/// Kernel bus the supervisor creates activation descriptors on.
///
/// A system instance supervises names on the system bus; a per-user instance
/// supervises names on that user's session bus.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    Deserialize,
    Serialize,
    PartialEq,
    Eq,
    Hash,
    EnumString,
    Display,
    IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum BusScope {
    /// The machine-wide system bus.
    #[default]
    System,
    /// The calling user's bus.
    User,
}

impl BusScope {
    /// Label used when naming the kernel bus endpoint.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        self.into()
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("system", BusScope::System)]
    #[case("USER", BusScope::User)]
    #[case(" user ", BusScope::User)]
    fn parses_scope_labels(#[case] input: &str, #[case] expected: BusScope) {
        assert_eq!(BusScope::from_str(input.trim()).ok(), Some(expected));
    }

    #[rstest]
    fn rejects_unknown_scope() {
        assert!(BusScope::from_str("session").is_err());
    }
}
