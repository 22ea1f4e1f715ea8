use std::env;
use std::path::PathBuf;

/// Environment variable that overrides the data directory.
pub const DATA_DIR_ENV: &str = "PAIRGATE_HOME";

/// Return the user's home directory path.
///
/// Uses HOME on Unix-like systems and USERPROFILE on Windows.
pub fn get_home_dir() -> Result<String, String> {
    if let Ok(home) = env::var("HOME") {
        if !home.is_empty() {
            return Ok(home);
        }
    }

    if let Ok(profile) = env::var("USERPROFILE") {
        if !profile.is_empty() {
            return Ok(profile);
        }
    }

    Err("Home directory not set".to_string())
}

/// Directory holding credential directories, uploads and transcripts.
///
/// `PAIRGATE_HOME` wins; otherwise `~/.pairgate`.
pub fn data_dir() -> Result<PathBuf, String> {
    if let Ok(dir) = env::var(DATA_DIR_ENV) {
        if !dir.is_empty() {
            return Ok(PathBuf::from(dir));
        }
    }
    get_home_dir().map(|home| PathBuf::from(home).join(".pairgate"))
}

#[cfg(test)]
mod tests {
    use super::{data_dir, get_home_dir, DATA_DIR_ENV};
    use std::env;
    use std::path::PathBuf;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn with_env<F: FnOnce()>(vars: &[(&str, Option<&str>)], f: F) {
        let _guard = ENV_LOCK.lock().unwrap();
        let previous: Vec<(String, Option<String>)> = vars
            .iter()
            .map(|(key, _)| (key.to_string(), env::var(key).ok()))
            .collect();

        for (key, value) in vars {
            match value {
                Some(value) => env::set_var(key, value),
                None => env::remove_var(key),
            }
        }

        f();

        for (key, value) in previous {
            match value {
                Some(value) => env::set_var(&key, value),
                None => env::remove_var(&key),
            }
        }
    }

    #[test]
    fn get_home_dir_prefers_home() {
        with_env(
            &[("HOME", Some("/tmp/home")), ("USERPROFILE", Some("/tmp/profile"))],
            || {
                assert_eq!(get_home_dir().unwrap(), "/tmp/home");
            },
        );
    }

    #[test]
    fn get_home_dir_falls_back_to_userprofile() {
        with_env(&[("HOME", None), ("USERPROFILE", Some("/tmp/profile"))], || {
            assert_eq!(get_home_dir().unwrap(), "/tmp/profile");
        });
    }

    #[test]
    fn data_dir_prefers_override() {
        with_env(
            &[(DATA_DIR_ENV, Some("/srv/pairgate")), ("HOME", Some("/tmp/home"))],
            || {
                assert_eq!(data_dir().unwrap(), PathBuf::from("/srv/pairgate"));
            },
        );
    }

    #[test]
    fn data_dir_defaults_under_home() {
        with_env(&[(DATA_DIR_ENV, None), ("HOME", Some("/tmp/home"))], || {
            assert_eq!(data_dir().unwrap(), PathBuf::from("/tmp/home/.pairgate"));
        });
    }
}
