use std::{
    env, io,
    path::{Path, PathBuf},
};

use futures::future::BoxFuture;
use tokio::fs;

use crate::{AdfsConfig, AdfsConfigSource};

const AWS_CONFIG_FILE: &str = "AWS_CONFIG_FILE";
const AWS_CONFIG_FILE_DEFAULT: &[&str] = &[".aws", "config"];

const AWS_PROFILE: &str = "AWS_PROFILE";
const AWS_PROFILE_DEFAULT: &str = "default";

const ADFS_HOST: &str = "adfs_host";
const ADFS_USER: &str = "adfs_user";

/// A reference to a profile in AWS shared configuration.
///
/// The profile must set `adfs_host` and `adfs_user`:
///
/// ```ini
/// [profile work]
/// adfs_host = https://sso.example.com
/// adfs_user = CORP\bob
/// ```
///
/// The default profile source uses the `AWS_CONFIG_FILE` and `AWS_PROFILE` environment variables,
/// but this can be overridden with [`with_config_file`](Self::with_config_file) and
/// [`with_profile`](Self::with_profile).
///
/// # Example
///
/// ```no_run
/// # #[tokio::main] async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// use adfs_duo_flow::{AdfsFlow, ProfileSource};
///
/// let my_profile = ProfileSource::default()
///     .with_config_file(".myconfig")
///     .with_profile("work");
///
/// let flow = AdfsFlow::builder("hunter2")
///     .config(my_profile)
///     .build()
///     .await?;
/// # Ok(()) }
/// ```
#[allow(clippy::module_name_repetitions)]
#[derive(Clone, Debug, Default)]
pub struct ProfileSource {
    config_file: Option<PathBuf>,
    profile: Option<String>,
}

impl ProfileSource {
    /// Set the location of the AWS shared config file.
    #[must_use]
    pub fn with_config_file(self, path: impl Into<PathBuf>) -> Self {
        Self {
            config_file: Some(path.into()),
            ..self
        }
    }

    /// Set the profile.
    #[must_use]
    pub fn with_profile(self, name: impl Into<String>) -> Self {
        Self {
            profile: Some(name.into()),
            ..self
        }
    }
}

impl AdfsConfigSource for ProfileSource {
    type Future = BoxFuture<'static, Result<AdfsConfig, Self::Error>>;

    type Error = ProfileError;

    fn load(self) -> Self::Future {
        Box::pin(async move {
            let path = self.config_file.map_or_else(get_config_file_from_env, Ok)?;
            let profile = self.profile.map_or_else(get_profile_from_env, Ok)?;

            let config = read_file(&path).await.map_err(|error| {
                ProfileError::new(format!(
                    "unable to read config file {}: {error}",
                    path.display()
                ))
            })?;
            tracing::debug!(path = %path.display(), %profile, "loading ADFS profile");

            parse_profile(&config, &path, &profile)
        })
    }
}

/// An error indicating missing or invalid ADFS configuration.
///
/// The error message should be sufficient to aid end-user debugging.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct ProfileError(String);

impl ProfileError {
    fn new(error: impl Into<String>) -> Self {
        Self(error.into())
    }
}

fn get_config_file_from_env() -> Result<PathBuf, ProfileError> {
    match read_env(AWS_CONFIG_FILE) {
        Ok(Some(path)) => Ok(PathBuf::from(path)),
        Ok(None) => {
            let mut path = dirs_next::home_dir()
                .ok_or_else(|| ProfileError::new("could not determine home directory"))?;
            path.extend(AWS_CONFIG_FILE_DEFAULT);
            Ok(path)
        }
        Err(error) => Err(ProfileError::new(format!(
            "invalid path in environment variable {AWS_CONFIG_FILE}: {error}",
        ))),
    }
}

fn get_profile_from_env() -> Result<String, ProfileError> {
    Ok(read_env(AWS_PROFILE)
        .map_err(|error| {
            ProfileError::new(format!(
                "invalid profile name in environment variable {AWS_PROFILE}: {error}",
            ))
        })?
        .unwrap_or_else(|| AWS_PROFILE_DEFAULT.to_string()))
}

fn read_env(name: &str) -> Result<Option<String>, String> {
    env::var(name).map(Some).or_else(|error| match error {
        env::VarError::NotPresent => Ok(None),
        env::VarError::NotUnicode(data) => Err(format!("{data:?} contains invalid UTF-8")),
    })
}

fn parse_profile_name(line: &str) -> Option<&str> {
    line.trim().strip_suffix(']').and_then(|line| {
        line.strip_prefix("[profile ")
            .or_else(|| line.strip_prefix('['))
            .map(str::trim)
    })
}

fn parse_profile(config: &str, path: &Path, profile: &str) -> Result<AdfsConfig, ProfileError> {
    let mut in_profile = false;
    let mut found = false;
    let mut adfs_host = None;
    let mut username = None;

    for line in config.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }

        if let Some(next_profile) = parse_profile_name(line) {
            if in_profile {
                break;
            }
            in_profile = next_profile == profile;
            found |= in_profile;
        } else if in_profile {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            match key.trim() {
                ADFS_HOST => adfs_host = Some(value.to_string()),
                ADFS_USER => username = Some(value.to_string()),
                _ => {}
            }
        }
    }

    if !found {
        return Err(ProfileError::new(format!(
            "profile {profile} is not defined in config file {}",
            path.display(),
        )));
    }

    match (adfs_host, username) {
        (Some(adfs_host), Some(username)) => Ok(AdfsConfig {
            adfs_host,
            username,
        }),
        (adfs_host, username) => {
            let missing: Vec<_> = adfs_host
                .map_or(Some(ADFS_HOST), |_| None)
                .into_iter()
                .chain(username.map_or(Some(ADFS_USER), |_| None))
                .collect();
            Err(ProfileError::new(format!(
                "incomplete ADFS configuration in profile {profile}; missing: {}",
                missing.join(", ")
            )))
        }
    }
}

async fn read_file(path: &Path) -> Result<String, io::Error> {
    let meta = fs::metadata(path).await?;
    if !meta.is_file() {
        return Err(io::Error::new(io::ErrorKind::Other, "not a file"));
    }

    fs::read_to_string(path).await
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const CONFIG: &str = "
[default]
region = eu-west-1

# work account
[profile work]
adfs_host = https://sso.test.com
adfs_user = CORP\\bob
region = us-east-1

[profile partial]
adfs_host=https://sso.test.com
adfs_user =

[profile other]
adfs_user = alice
";

    fn parse(profile: &str) -> Result<AdfsConfig, ProfileError> {
        parse_profile(CONFIG, Path::new("config"), profile)
    }

    #[test]
    fn reads_adfs_keys_from_the_profile() {
        assert_eq!(
            parse("work").expect("config"),
            AdfsConfig {
                adfs_host: "https://sso.test.com".to_string(),
                username: "CORP\\bob".to_string(),
            }
        );
    }

    #[test]
    fn missing_keys_are_named() {
        assert_eq!(
            parse("partial").expect_err("partial").to_string(),
            "incomplete ADFS configuration in profile partial; missing: adfs_user"
        );
        assert_eq!(
            parse("default").expect_err("default").to_string(),
            "incomplete ADFS configuration in profile default; missing: adfs_host, adfs_user"
        );
    }

    #[test]
    fn undefined_profile() {
        assert_eq!(
            parse("missing").expect_err("missing").to_string(),
            "profile missing is not defined in config file config"
        );
    }

    #[test]
    fn profile_headers() {
        assert_eq!(parse_profile_name("[profile work]"), Some("work"));
        assert_eq!(parse_profile_name(" [default] "), Some("default"));
        assert_eq!(parse_profile_name("adfs_host = x"), None);
    }

    #[tokio::test]
    async fn loads_from_an_explicit_file() {
        let path = env::temp_dir().join(format!("adfs_duo_flow-{}.config", std::process::id()));
        std::fs::write(&path, CONFIG).expect("write config");

        let config = ProfileSource::default()
            .with_config_file(&path)
            .with_profile("work")
            .load()
            .await;
        std::fs::remove_file(&path).expect("remove config");

        assert_eq!(config.expect("config").username, "CORP\\bob");
    }

    #[tokio::test]
    async fn unreadable_file() {
        let error = ProfileSource::default()
            .with_config_file(env::temp_dir())
            .with_profile("work")
            .load()
            .await
            .expect_err("directory");

        assert!(error.to_string().starts_with("unable to read config file"));
    }
}
