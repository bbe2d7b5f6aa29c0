use std::path::PathBuf;

use directories::BaseDirs;

/// The caller's home directory, if the platform can tell us.
pub fn home_dir() -> Option<PathBuf> {
    BaseDirs::new().map(|dirs| dirs.home_dir().to_path_buf())
}

/// Directory holding the executable copies and side-car configs that the
/// Windows backend installs.
pub fn serviceman_opt(home: &std::path::Path) -> PathBuf {
    home.join(".local").join("opt").join("serviceman")
}
