use dirs::home_dir;
use std::{
    env, fs, io,
    path::{Path, PathBuf},
};

const DEFAULT_DIR_NAME: &str = ".tradebook";
const CONFIG_DIR: &str = "config";
const CONFIG_BACKUP_DIR: &str = "backups";
const STORE_FILE: &str = "store.json";
const TMP_SUFFIX: &str = "tmp";

/// Returns the application-specific data directory, defaulting to `~/.tradebook`.
pub fn app_data_dir() -> PathBuf {
    if let Some(custom) = env::var_os("TRADEBOOK_HOME") {
        return PathBuf::from(custom);
    }
    home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(DEFAULT_DIR_NAME)
}

/// Path to the local JSON document store.
pub fn store_file() -> PathBuf {
    app_data_dir().join(STORE_FILE)
}

pub fn config_dir_in(base: &Path) -> PathBuf {
    base.join(CONFIG_DIR)
}

pub fn config_backup_dir_in(base: &Path) -> PathBuf {
    config_dir_in(base).join(CONFIG_BACKUP_DIR)
}

pub fn ensure_dir(path: &Path) -> io::Result<()> {
    fs::create_dir_all(path)
}

/// Sibling path a file is staged at before being renamed over `path`.
pub fn staging_path(path: &Path) -> PathBuf {
    let suffix = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map_or_else(|| TMP_SUFFIX.to_string(), |ext| format!("{ext}.{TMP_SUFFIX}"));
    path.with_extension(suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staging_path_keeps_original_extension() {
        assert_eq!(staging_path(Path::new("/data/store.json")), PathBuf::from("/data/store.json.tmp"));
        assert_eq!(staging_path(Path::new("/data/store")), PathBuf::from("/data/store.tmp"));
    }
}
