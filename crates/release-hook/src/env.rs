//! Environment access behind a trait so configuration can be tested without
//! touching the process environment.
//!
//! | Concern | Production | Test |
//! |---------|------------|------|
//! | Env vars | [`SystemEnv`] | `InMemoryEnv` (`#[cfg(test)]`) |
//!
//! The XDG helpers resolve the per-user and system-wide configuration roots
//! used by the layered config lookup.

use std::env;
use std::path::PathBuf;

/// # Thread Safety
///
/// Does **not** require `Send + Sync`. Add the bounds at your call site.
pub trait ReadEnv {
    fn var(&self, key: &str) -> Result<String, env::VarError>;
}

/// Reads the process environment.
pub struct SystemEnv;

impl ReadEnv for SystemEnv {
    #[inline]
    fn var(&self, key: &str) -> Result<String, env::VarError> {
        env::var(key)
    }
}

fn non_empty_var<E: ReadEnv>(env: &E, key: &str) -> Option<String> {
    env.var(key).ok().filter(|v| !v.is_empty())
}

pub fn home_dir<E: ReadEnv>(env: &E) -> Option<PathBuf> {
    if cfg!(target_os = "windows") {
        non_empty_var(env, "USERPROFILE").map(PathBuf::from)
    } else {
        non_empty_var(env, "HOME").map(PathBuf::from)
    }
}

/// `$XDG_CONFIG_HOME`, falling back to `~/.config`.
pub fn user_config_dir<E: ReadEnv>(env: &E) -> Option<PathBuf> {
    non_empty_var(env, "XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| home_dir(env).map(|h| h.join(".config")))
}

/// First entry of `$XDG_CONFIG_DIRS`, falling back to `/etc/xdg`.
pub fn system_config_dir<E: ReadEnv>(env: &E) -> PathBuf {
    non_empty_var(env, "XDG_CONFIG_DIRS")
        .and_then(|dirs| env::split_paths(&dirs).find(|p| !p.as_os_str().is_empty()))
        .map(|p| expand_home(env, &p.to_string_lossy()))
        .unwrap_or_else(|| PathBuf::from("/etc/xdg"))
}

/// Expands a leading `~` to the home directory. Other paths are returned as-is.
pub fn expand_home<E: ReadEnv>(env: &E, path: &str) -> PathBuf {
    match (path.strip_prefix('~'), home_dir(env)) {
        (Some(rest), Some(home)) => home.join(rest.trim_start_matches('/')),
        _ => PathBuf::from(path),
    }
}

#[cfg(test)]
pub use in_memory::InMemoryEnv;
