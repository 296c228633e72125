use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

/// How the supervisor renders its log lines on stderr.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    Deserialize,
    Serialize,
    PartialEq,
    Eq,
    EnumString,
    Display,
    IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogFormat {
    /// One JSON object per event with fields flattened to the top level.
    #[default]
    Json,
    /// Single-line text for operators reading a terminal.
    Compact,
}

impl LogFormat {
    /// Label used on the command line and in configuration files.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        self.into()
    }

    /// Whether entity identities are emitted as machine-readable fields.
    #[must_use]
    pub const fn is_structured(self) -> bool {
        matches!(self, Self::Json)
    }
}

/// Parse failure for `--log-format` and `WARDEN_LOG_FORMAT`.
pub type LogFormatParseError = strum::ParseError;
