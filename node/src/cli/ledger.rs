use anyhow::{bail, Context};
use figment::providers::{Format, Json, Serialized, Toml, Yaml};
use figment::Figment;
use sc_ledger::{LedgerConfig, LockConfig, ScriptDirectory, StoreConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration file picked up from the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "strata.toml";

/// Ledger settings given on the command line or through `STRATA_*` variables. Unset values fall back to the
/// configuration file, then to [`LedgerSettings::default`].
#[derive(Clone, Debug, Default, clap::Args, Deserialize, Serialize)]
pub struct LedgerParams {
    /// Directory holding the `versions/` revision files.
    #[clap(env = "STRATA_SCRIPT_LOCATION", long, global = true, value_name = "PATH")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script_location: Option<PathBuf>,

    /// Directory of the ledger store.
    #[clap(env = "STRATA_DB_PATH", long, global = true, value_name = "PATH")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_path: Option<PathBuf>,

    /// How long to wait for another migration run to release the ledger lock. 0 fails immediately.
    #[clap(env = "STRATA_LOCK_TIMEOUT_MS", long, global = true, value_name = "MILLIS")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock_timeout_ms: Option<u64>,

    /// Age after which a lock file is considered left over by a crashed run and removed.
    #[clap(env = "STRATA_STALE_LOCK_AFTER_SECS", long, global = true, value_name = "SECS")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stale_lock_after_secs: Option<u64>,

    /// Fsync the store on every commit.
    #[clap(env = "STRATA_FSYNC", long, global = true, value_name = "BOOL")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fsync: Option<bool>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct LedgerSettings {
    pub script_location: PathBuf,
    pub db_path: PathBuf,
    pub lock_timeout_ms: u64,
    pub stale_lock_after_secs: u64,
    pub fsync: bool,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            script_location: "migrations".into(),
            db_path: ".strata/db".into(),
            lock_timeout_ms: 0,
            stale_lock_after_secs: 24 * 60 * 60,
            fsync: false,
        }
    }
}

fn merge_file(config: Figment, path: &Path) -> anyhow::Result<Figment> {
    Ok(match path.extension().and_then(|ext| ext.to_str()) {
        Some("toml") => config.merge(Toml::file(path)),
        Some("json") => config.merge(Json::file(path)),
        Some("yaml" | "yml") => config.merge(Yaml::file(path)),
        _ => bail!("Unsupported file type for config file {path:?}."),
    })
}

impl LedgerSettings {
    /// Layers, lowest priority first: defaults, the configuration file, then `params`.
    pub fn load(config_file: Option<&Path>, params: &LedgerParams) -> anyhow::Result<Self> {
        let mut config = Figment::new().merge(Serialized::defaults(LedgerSettings::default()));

        match config_file {
            Some(path) => {
                if !path.exists() {
                    bail!("Config file {path:?} does not exist");
                }
                config = merge_file(config, path)?;
            }
            None => {
                let path = Path::new(DEFAULT_CONFIG_FILE);
                if path.exists() {
                    config = merge_file(config, path)?;
                }
            }
        }

        config = config.merge(Serialized::defaults(params));
        config.extract().context("Invalid ledger configuration")
    }

    pub fn ledger_config(&self) -> LedgerConfig {
        LedgerConfig {
            db_path: self.db_path.clone(),
            store: StoreConfig { fsync: self.fsync },
            lock: LockConfig {
                timeout: Duration::from_millis(self.lock_timeout_ms),
                stale_after: Duration::from_secs(self.stale_lock_after_secs),
            },
        }
    }

    pub fn scripts(&self) -> ScriptDirectory {
        ScriptDirectory::new(&self.script_location)
    }

    /// Serializes the settings in the format matching the extension of `path`. Paths that are not valid UTF-8 are an
    /// error.
    pub fn render(&self, path: &Path) -> anyhow::Result<String> {
        Ok(match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => toml::to_string_pretty(self)?,
            Some("json") => serde_json::to_string_pretty(self)? + "\n",
            Some("yaml" | "yml") => serde_yaml::to_string(self)?,
            _ => bail!("Unsupported file type for config file {path:?}."),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("strata.toml")]
    #[case("strata.json")]
    #[case("strata.yaml")]
    fn test_rendered_file_loads_back(#[case] name: &str) {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join(name);
        let settings = LedgerSettings {
            script_location: dir.path().join("migrations"),
            db_path: dir.path().join("db"),
            lock_timeout_ms: 500,
            stale_lock_after_secs: 60,
            fsync: true,
        };
        std::fs::write(&path, settings.render(&path).unwrap()).unwrap();

        assert_eq!(LedgerSettings::load(Some(&path), &LedgerParams::default()).unwrap(), settings);
    }

    #[cfg(unix)]
    #[rstest]
    #[case("strata.toml")]
    #[case("strata.json")]
    #[case("strata.yaml")]
    fn test_non_utf8_path_is_not_rendered(#[case] name: &str) {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let settings =
            LedgerSettings { script_location: PathBuf::from(OsStr::from_bytes(b"mig\xffrations")), ..Default::default() };
        assert!(settings.render(Path::new(name)).is_err());
    }

    #[test]
    fn test_params_override_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("strata.toml");
        std::fs::write(&path, "db_path = \"from-file\"\nlock_timeout_ms = 100\n").unwrap();

        let params = LedgerParams { lock_timeout_ms: Some(2000), ..Default::default() };
        let settings = LedgerSettings::load(Some(&path), &params).unwrap();
        assert_eq!(settings.db_path, PathBuf::from("from-file"));
        assert_eq!(settings.lock_timeout_ms, 2000);
        assert_eq!(settings.script_location, PathBuf::from("migrations"));
        assert_eq!(settings.ledger_config().lock.timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_missing_or_unsupported_config_file() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(LedgerSettings::load(Some(&dir.path().join("absent.toml")), &LedgerParams::default()).is_err());

        let ini = dir.path().join("strata.ini");
        std::fs::write(&ini, "").unwrap();
        assert!(LedgerSettings::load(Some(&ini), &LedgerParams::default()).is_err());
    }
}
