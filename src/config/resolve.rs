//! Config file discovery: try a fixed list of candidate paths in order and
//! return the first that exists, falling back to the first candidate (even
//! if absent) so the caller gets a sensible "not found" error naming where
//! it looked.

use std::path::{Path, PathBuf};

pub const CONFIG_FILENAME: &str = "mcvisor.json";

/// Candidate paths, in priority order: an explicit `argv[1]`, then
/// `./mcvisor.json`, then `<exe-dir>/mcvisor.json`.
fn search_path(cli_arg: Option<&Path>) -> Vec<PathBuf> {
    let mut candidates = Vec::with_capacity(3);
    if let Some(arg) = cli_arg {
        candidates.push(arg.to_path_buf());
    }
    if let Ok(cwd) = std::env::current_dir() {
        candidates.push(cwd.join(CONFIG_FILENAME));
    }
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            candidates.push(dir.join(CONFIG_FILENAME));
        }
    }
    candidates
}

/// First candidate that is a regular file, falling back to a directory
/// candidate joined with [`CONFIG_FILENAME`] (mirrors the Go `FindConfigFile`
/// behavior of accepting a directory and appending the default filename).
pub fn find_config_file(cli_arg: Option<&Path>) -> Option<PathBuf> {
    for candidate in search_path(cli_arg) {
        if candidate.is_file() {
            return Some(candidate);
        }
        if candidate.is_dir() {
            let joined = candidate.join(CONFIG_FILENAME);
            if joined.is_file() {
                return Some(joined);
            }
        }
    }
    None
}

/// Resolve the config path to load, or the path a fresh default config
/// should be written to if none of the candidates exist yet.
pub fn resolve_config_path(cli_arg: Option<&Path>) -> PathBuf {
    find_config_file(cli_arg).unwrap_or_else(|| {
        search_path(cli_arg)
            .into_iter()
            .next()
            .unwrap_or_else(|| PathBuf::from(CONFIG_FILENAME))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn explicit_argument_wins_when_present() {
        let tmp = TempDir::new().unwrap();
        let explicit = tmp.path().join("custom.json");
        fs::write(&explicit, "{}").unwrap();

        let found = find_config_file(Some(&explicit));
        assert_eq!(found, Some(explicit));
    }

    #[test]
    fn missing_explicit_argument_falls_back_to_cwd() {
        let tmp = TempDir::new().unwrap();
        let cwd_config = tmp.path().join(CONFIG_FILENAME);
        fs::write(&cwd_config, "{}").unwrap();

        let original_cwd = std::env::current_dir().unwrap();
        std::env::set_current_dir(tmp.path()).unwrap();
        let found = find_config_file(Some(Path::new("does-not-exist.json")));
        std::env::set_current_dir(original_cwd).unwrap();

        assert_eq!(found, Some(cwd_config));
    }

    #[test]
    fn nothing_found_returns_none() {
        let tmp = TempDir::new().unwrap();
        let original_cwd = std::env::current_dir().unwrap();
        std::env::set_current_dir(tmp.path()).unwrap();
        let found = find_config_file(None);
        std::env::set_current_dir(original_cwd).unwrap();

        // The test binary's own directory might coincidentally contain a
        // mcvisor.json; assert only that we didn't find one in `tmp`.
        if let Some(path) = found {
            assert!(!path.starts_with(tmp.path()));
        }
    }

    #[test]
    fn resolve_config_path_falls_back_to_first_candidate_when_absent() {
        let tmp = TempDir::new().unwrap();
        let explicit = tmp.path().join("not-there.json");
        let resolved = resolve_config_path(Some(&explicit));
        assert_eq!(resolved, explicit);
    }
}
