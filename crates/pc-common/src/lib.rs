//! Platform CLI shared utilities.
//!
//! Logging setup and the per-user directory layout used by configuration and
//! the token stores.

use std::path::PathBuf;

pub mod logging;

/// Name of the per-user directory under `$HOME`.
pub const HOME_DIR_NAME: &str = ".pc";

/// Per-user directory holding configuration and token store files (`~/.pc`).
///
/// `PC_HOME` overrides the location. Returns `None` when no home directory can
/// be determined and no override is set.
pub fn pc_home() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var("PC_HOME") {
        if !dir.trim().is_empty() {
            return Some(PathBuf::from(dir));
        }
    }
    dirs::home_dir().map(|home| home.join(HOME_DIR_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pc_home_ends_with_dir_name_or_override() {
        if std::env::var("PC_HOME").is_ok() {
            return;
        }
        if let Some(path) = pc_home() {
            assert!(path.ends_with(HOME_DIR_NAME));
        }
    }
}
