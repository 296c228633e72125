use camino::Utf8PathBuf;
use std::env;

#[cfg(unix)]
use libc::geteuid;

#[cfg(unix)]
use dirs::runtime_dir;

/// Default log filter expression used by the supervisor.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// File name of the serialized supervisor state inside the runtime directory.
pub const STATE_FILE_NAME: &str = "state";

/// Default log filter expression used by the supervisor.
#[must_use]
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
#[must_use]
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_string()
}

/// Default logging format for the supervisor.
#[must_use]
pub fn default_log_format() -> crate::logging::LogFormat {
    crate::logging::LogFormat::Json
}

/// Computes the default location of the serialized state file.
#[must_use]
pub fn default_state_file() -> Utf8PathBuf {
    default_state_file_inner()
}

#[cfg(unix)]
fn default_state_file_inner() -> Utf8PathBuf {
    let (mut base, apply_namespace) = match runtime_base_directory() {
        Some(dir) => (dir, false),
        None => (fallback_base_directory(), true),
    };

    base.push("warden");
    if apply_namespace {
        base.push(user_namespace());
    }

    base.join(STATE_FILE_NAME)
}

#[cfg(unix)]
fn runtime_base_directory() -> Option<Utf8PathBuf> {
    runtime_dir().and_then(|path| Utf8PathBuf::from_path_buf(path).ok())
}

#[cfg(unix)]
fn fallback_base_directory() -> Utf8PathBuf {
    let candidate = env::temp_dir();
    Utf8PathBuf::from_path_buf(candidate).unwrap_or_else(|_| Utf8PathBuf::from("/tmp"))
}

#[cfg(unix)]
fn user_namespace() -> String {
    let uid = unsafe { geteuid() };
    format!("uid-{uid}")
}

#[cfg(not(unix))]
fn default_state_file_inner() -> Utf8PathBuf {
    let base = Utf8PathBuf::from_path_buf(env::temp_dir())
        .unwrap_or_else(|_| Utf8PathBuf::from("."));
    base.join("warden").join(STATE_FILE_NAME)
}
