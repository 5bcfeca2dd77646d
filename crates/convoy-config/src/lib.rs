pub mod error;
pub mod settings;

pub use error::*;
pub use settings::{AwsSettings, Settings, SshKeys, SshSettings};

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Locate the env file to load, if any.
///
/// Search order:
/// 1. `CONVOY_ENV_FILE` (direct path)
/// 2. `./.env`
/// 3. `~/.config/convoy/convoy.env`
pub fn find_env_file() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("CONVOY_ENV_FILE") {
        let path = PathBuf::from(path);
        if path.exists() {
            return Some(path);
        }
        tracing::warn!(path = %path.display(), "CONVOY_ENV_FILE points to a missing file");
    }

    if let Ok(current_dir) = std::env::current_dir() {
        let local = current_dir.join(".env");
        if local.exists() {
            return Some(local);
        }
    }

    let global = dirs::config_dir()?.join("convoy").join("convoy.env");
    global.exists().then_some(global)
}

/// Read `KEY=VALUE` pairs from a dotenv file without touching the process
/// environment.
pub fn load_env_file(path: &Path) -> Result<BTreeMap<String, String>> {
    let mut vars = BTreeMap::new();
    for item in dotenv::from_path_iter(path).map_err(|e| env_file_error(path, e))? {
        let (key, value) = item.map_err(|e| env_file_error(path, e))?;
        vars.insert(key, value);
    }
    tracing::debug!(path = %path.display(), count = vars.len(), "loaded env file");
    Ok(vars)
}

fn env_file_error(path: &Path, err: dotenv::Error) -> ConfigError {
    match err {
        dotenv::Error::Io(e) => ConfigError::Io(e),
        dotenv::Error::LineParse(text, _) => ConfigError::EnvFileSyntax {
            path: path.to_path_buf(),
            text,
        },
        other => ConfigError::EnvFileSyntax {
            path: path.to_path_buf(),
            text: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;

    fn write_env(content: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn test_load_env_file() {
        let (_dir, path) = write_env(
            r#"
# credentials
AWS_DEFAULT_REGION=eu-west-1
export SSH_KEY_NAME = convoy-key
MONGO_PASSWORD="s3cr3t #1"
DOMAIN='chat.example.com'
WORKERHA=true # enable HA
EMPTY=
"#,
        );
        let vars = load_env_file(&path).unwrap();
        assert_eq!(vars["AWS_DEFAULT_REGION"], "eu-west-1");
        assert_eq!(vars["SSH_KEY_NAME"], "convoy-key");
        assert_eq!(vars["MONGO_PASSWORD"], "s3cr3t #1");
        assert_eq!(vars["DOMAIN"], "chat.example.com");
        assert_eq!(vars["WORKERHA"], "true");
        assert_eq!(vars["EMPTY"], "");
    }

    #[test]
    fn test_quoted_value_with_trailing_comment() {
        let (_dir, path) = write_env("MONGO_PASSWORD=\"s3cr3t\" # prod\nREPLSET_NAME='rs0' # primary set\n");
        let vars = load_env_file(&path).unwrap();
        assert_eq!(vars["MONGO_PASSWORD"], "s3cr3t");
        assert_eq!(vars["REPLSET_NAME"], "rs0");
    }

    #[test]
    fn test_load_env_file_leaves_process_env_alone() {
        let (_dir, path) = write_env("CONVOY_TEST_ONLY_IN_FILE=1\n");
        load_env_file(&path).unwrap();
        assert!(std::env::var("CONVOY_TEST_ONLY_IN_FILE").is_err());
    }

    #[test]
    fn test_load_env_file_rejects_garbage() {
        let (_dir, path) = write_env("OK=1\nthis is not an assignment\n");
        let err = load_env_file(&path).unwrap_err();
        match err {
            ConfigError::EnvFileSyntax { path: reported, .. } => assert_eq!(reported, path),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_load_env_file_missing() {
        let err = load_env_file(Path::new("/nonexistent/convoy.env")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    #[serial]
    fn test_find_env_file_explicit_path() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("custom.env");
        fs::write(&path, "DOMAIN=x.example.com\n").unwrap();

        temp_env::with_var("CONVOY_ENV_FILE", Some(path.to_str().unwrap()), || {
            assert_eq!(find_env_file(), Some(path.clone()));
        });
    }

    #[test]
    #[serial]
    fn test_find_env_file_in_current_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let original_dir = std::env::current_dir().unwrap();
        fs::write(temp_dir.path().join(".env"), "DOMAIN=x.example.com\n").unwrap();

        std::env::set_current_dir(&temp_dir).unwrap();
        let found = temp_env::with_var_unset("CONVOY_ENV_FILE", find_env_file);
        std::env::set_current_dir(original_dir).unwrap();

        assert!(found.unwrap().ends_with(".env"));
    }
}
