//! Layered settings loader

use std::path::{Path, PathBuf};

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File, FileFormat};

use crate::config::environment::Environment as AppEnvironment;
use crate::config::error::ConfigError;
use crate::config::settings::Settings;

const CONFIG_DIR_ENV: &str = "TRIBUTARY_CONFIG_DIR";

const CONFIG_FILE_ENV: &str = "TRIBUTARY_CONFIG_FILE";

const DEFAULT_CONFIG_DIR: &str = "config";

const ENV_PREFIX: &str = "TRIBUTARY";

/// `TRIBUTARY_ENGINE__EXECUTOR__POOL_SIZE` -> `engine.executor.pool_size`
const ENV_SEPARATOR: &str = "__";

/// Loads [`Settings`] from files and `TRIBUTARY_*` variables.
///
/// In directory mode `default.toml` is required and `{environment}.toml` and
/// `local.toml` are layered on top when present. In single-file mode only
/// that file is read. Environment variables always win.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    config_dir: PathBuf,
    config_file: Option<PathBuf>,
    environment: AppEnvironment,
}

impl ConfigLoader {
    /// Resolve sources from `TRIBUTARY_CONFIG_DIR`, `TRIBUTARY_CONFIG_FILE`
    /// and `TRIBUTARY_APP_ENV`.
    ///
    /// # Errors
    ///
    /// Setting both `TRIBUTARY_CONFIG_DIR` and `TRIBUTARY_CONFIG_FILE` is
    /// rejected.
    pub fn new() -> Result<Self, ConfigError> {
        let config_dir = std::env::var(CONFIG_DIR_ENV).ok().map(PathBuf::from);
        let config_file = std::env::var(CONFIG_FILE_ENV).ok().map(PathBuf::from);

        if config_dir.is_some() && config_file.is_some() {
            return Err(ConfigError::mutual_exclusivity(format!(
                "{} and {} cannot both be set; use the directory for layered \
                 configuration or the file for a single configuration file",
                CONFIG_DIR_ENV, CONFIG_FILE_ENV
            )));
        }

        Ok(Self {
            config_dir: config_dir.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_DIR)),
            config_file,
            environment: AppEnvironment::from_env(),
        })
    }

    /// Read only `path`, ignoring the configuration directory.
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_file = Some(path.into());
        self
    }

    pub fn with_environment(mut self, environment: AppEnvironment) -> Self {
        self.environment = environment;
        self
    }

    pub fn environment(&self) -> AppEnvironment {
        self.environment
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn config_file(&self) -> Option<&Path> {
        self.config_file.as_deref()
    }

    /// Merge every source, deserialize and validate.
    pub fn load(&self) -> Result<Settings, ConfigError> {
        let config = self.build_config()?;
        let settings: Settings = config.try_deserialize().map_err(|e| {
            ConfigError::ParseError(format!("failed to deserialize configuration: {}", e))
        })?;

        settings.validate()?;
        Ok(settings)
    }

    fn build_config(&self) -> Result<Config, ConfigError> {
        let builder = Config::builder();

        let builder = match &self.config_file {
            Some(file) => Self::add_file_source(builder, file, true)?,
            None => self.add_layered_sources(builder)?,
        };

        Self::add_env_source(builder).build().map_err(ConfigError::from)
    }

    fn add_layered_sources(
        &self,
        builder: ConfigBuilder<DefaultState>,
    ) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        let builder =
            Self::add_file_source(builder, &self.config_dir.join("default.toml"), true)?;
        let builder = Self::add_file_source(
            builder,
            &self.config_dir.join(self.environment.file_name()),
            false,
        )?;
        Self::add_file_source(builder, &self.config_dir.join("local.toml"), false)
    }

    fn add_file_source(
        builder: ConfigBuilder<DefaultState>,
        path: &Path,
        required: bool,
    ) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        if required && !path.is_file() {
            return Err(ConfigError::file_not_found(path.display().to_string()));
        }

        let name = path.to_str().ok_or_else(|| {
            ConfigError::ParseError(format!("non UTF-8 configuration path: {}", path.display()))
        })?;
        Ok(builder.add_source(File::new(name, FileFormat::Toml).required(required)))
    }

    fn add_env_source(builder: ConfigBuilder<DefaultState>) -> ConfigBuilder<DefaultState> {
        builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator(ENV_SEPARATOR)
                .ignore_empty(true)
                .try_parsing(true),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::settings::StateStoreBackend;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    // Tests touching process environment variables run one at a time.
    static TEST_MUTEX: Mutex<()> = Mutex::new(());

    const MANAGED_VARS: &[&str] = &[
        CONFIG_DIR_ENV,
        CONFIG_FILE_ENV,
        AppEnvironment::ENV_VAR,
        "TRIBUTARY_ENGINE__EXECUTOR__POOL_SIZE",
        "TRIBUTARY_LOGGER__LEVEL",
    ];

    /// Restores every managed variable on drop.
    struct EnvGuard {
        saved: Vec<(&'static str, Option<String>)>,
    }

    impl EnvGuard {
        fn clean() -> Self {
            let saved = MANAGED_VARS
                .iter()
                .map(|key| (*key, std::env::var(key).ok()))
                .collect();
            for key in MANAGED_VARS {
                unsafe { std::env::remove_var(key) };
            }
            Self { saved }
        }

        fn set(&self, key: &str, value: &str) {
            unsafe { std::env::set_var(key, value) };
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in &self.saved {
                unsafe {
                    match value {
                        Some(value) => std::env::set_var(key, value),
                        None => std::env::remove_var(key),
                    }
                }
            }
        }
    }

    fn config_dir(files: &[(&str, &str)]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for (name, content) in files {
            fs::write(dir.path().join(name), content).unwrap();
        }
        dir
    }

    const DEFAULT_TOML: &str = r#"
[application]
name = "tributary-test"

[engine.executor]
pool_size = 4
queue_capacity = 16

[state_store]
backend = "fs"
directory = "/var/lib/tributary"
"#;

    #[test]
    fn test_defaults_without_env() {
        let _lock = TEST_MUTEX.lock().unwrap();
        let _env = EnvGuard::clean();

        let loader = ConfigLoader::new().unwrap();
        assert_eq!(loader.config_dir(), Path::new("config"));
        assert!(loader.config_file().is_none());
        assert_eq!(loader.environment(), AppEnvironment::Development);
    }

    #[test]
    fn test_dir_and_file_are_mutually_exclusive() {
        let _lock = TEST_MUTEX.lock().unwrap();
        let env = EnvGuard::clean();
        env.set(CONFIG_DIR_ENV, "/etc/tributary");
        env.set(CONFIG_FILE_ENV, "/etc/tributary.toml");

        match ConfigLoader::new() {
            Err(ConfigError::MutualExclusivityError(msg)) => {
                assert!(msg.contains(CONFIG_DIR_ENV));
                assert!(msg.contains(CONFIG_FILE_ENV));
            }
            other => panic!("expected a mutual exclusivity error, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_default_toml() {
        let _lock = TEST_MUTEX.lock().unwrap();
        let env = EnvGuard::clean();
        let dir = config_dir(&[]);
        env.set(CONFIG_DIR_ENV, dir.path().to_str().unwrap());

        match ConfigLoader::new().unwrap().load() {
            Err(ConfigError::FileNotFound(path)) => assert!(path.ends_with("default.toml")),
            other => panic!("expected FileNotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_layers_apply_in_order() {
        let _lock = TEST_MUTEX.lock().unwrap();
        let env = EnvGuard::clean();
        let dir = config_dir(&[
            ("default.toml", DEFAULT_TOML),
            ("production.toml", "[engine.executor]\npool_size = 8\n"),
            ("local.toml", "[engine.executor]\nqueue_capacity = 32\n"),
        ]);
        env.set(CONFIG_DIR_ENV, dir.path().to_str().unwrap());
        env.set(AppEnvironment::ENV_VAR, "production");

        let settings = ConfigLoader::new().unwrap().load().unwrap();
        assert_eq!(settings.application.name, "tributary-test");
        assert_eq!(settings.engine.executor.pool_size, 8);
        assert_eq!(settings.engine.executor.queue_capacity, 32);
        assert_eq!(settings.state_store.backend, StateStoreBackend::Fs);
    }

    #[test]
    fn test_env_vars_override_files() {
        let _lock = TEST_MUTEX.lock().unwrap();
        let env = EnvGuard::clean();
        let dir = config_dir(&[("default.toml", DEFAULT_TOML)]);
        env.set(CONFIG_DIR_ENV, dir.path().to_str().unwrap());
        env.set("TRIBUTARY_ENGINE__EXECUTOR__POOL_SIZE", "2");
        env.set("TRIBUTARY_LOGGER__LEVEL", "debug");

        let settings = ConfigLoader::new().unwrap().load().unwrap();
        assert_eq!(settings.engine.executor.pool_size, 2);
        assert_eq!(settings.logger.level, "debug");
    }

    #[test]
    fn test_single_file_mode_skips_directory() {
        let _lock = TEST_MUTEX.lock().unwrap();
        let _env = EnvGuard::clean();
        let dir = config_dir(&[
            ("custom.toml", "[state_store]\nbackend = \"memory\"\n"),
            ("local.toml", "[state_store]\nbackend = \"fs\"\n"),
        ]);

        let settings = ConfigLoader::new()
            .unwrap()
            .with_file(dir.path().join("custom.toml"))
            .load()
            .unwrap();
        assert_eq!(settings.state_store.backend, StateStoreBackend::Memory);
    }

    #[test]
    fn test_invalid_values_fail_validation() {
        let _lock = TEST_MUTEX.lock().unwrap();
        let _env = EnvGuard::clean();
        let dir = config_dir(&[("bad.toml", "[engine.executor]\npool_size = 0\n")]);

        let err = ConfigLoader::new()
            .unwrap()
            .with_file(dir.path().join("bad.toml"))
            .load()
            .unwrap_err();
        assert_eq!(err.field(), Some("engine.executor.pool_size"));
    }
}
