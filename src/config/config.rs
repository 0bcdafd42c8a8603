use compio::{fs::File, io::AsyncReadExt, io::BufReader};
use hashlink::LinkedHashMap;
use saphyr::{LoadableYamlNode, Scalar, Yaml};
use snafu::prelude::*;
use std::{
    borrow::Cow,
    io::{Cursor, ErrorKind},
    path::{Path, PathBuf},
};
use tracing::{debug, info};

use crate::{
    content_store::{BaseContent, DirectoryStore, GitStore},
    ext::BestEffortPathExt,
    operations::DiffGranularity,
    patches::StoreSettings,
};

const CONFIG_FILE_NAME: &str = "patchtree.yaml";
const DEFAULT_WORKSPACE: &str = "workspace";
const DEFAULT_BASE_PATH: &str = "base_code";

fn get_config_file_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE_NAME)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, derive_more::Display)]
pub enum BaseKind {
    #[display("git")]
    Git,
    #[default]
    #[display("directory")]
    Directory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseConfig {
    pub kind: BaseKind,
    pub path: PathBuf,
    pub branch: Option<String>,
}

/// Settings of one patch workspace, read from `patchtree.yaml` in the root directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceConfig {
    pub workspace: PathBuf,
    pub base: BaseConfig,
    pub granularity: DiffGranularity,
    pub identity_cache_capacity: usize,
    pub diff_context: usize,
}

impl WorkspaceConfig {
    pub fn defaults(root: &Path) -> Self {
        let settings = StoreSettings::default();
        Self {
            workspace: root.join(DEFAULT_WORKSPACE),
            base: BaseConfig {
                kind: BaseKind::default(),
                path: root.join(DEFAULT_BASE_PATH),
                branch: settings.branch,
            },
            granularity: settings.granularity,
            identity_cache_capacity: settings.identity_cache_capacity,
            diff_context: settings.diff_context,
        }
    }

    /// Reads the config of `root`. A missing file means all defaults.
    pub async fn read(root: &Path) -> Result<Self, ConfigError> {
        let path = get_config_file_path(root);
        debug!("Opening config file: {}", path.best_effort_path_display());
        let file = match File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!(
                    "No {} found in {}, using defaults",
                    CONFIG_FILE_NAME,
                    root.best_effort_path_display()
                );
                return Ok(Self::defaults(root));
            }
            Err(e) => {
                return Err(e).context(ReadSnafu {
                    file_path: path.best_effort_path_display(),
                });
            }
        };

        debug!("Reading config file");
        let cursor = Cursor::new(file);
        let mut reader = BufReader::new(cursor);
        let res = reader.read_to_string(String::new()).await;
        match res.0 {
            Ok(n) => debug!("Successfully read config file: {n} bytes"),
            _ => {
                res.0.context(ReadSnafu {
                    file_path: path.best_effort_path_display(),
                })?;
            }
        }
        Self::from_yaml(root, &res.1)
    }

    /// Parses config `contents`, resolving relative paths against `root`.
    pub fn from_yaml(root: &Path, contents: &str) -> Result<Self, ConfigError> {
        let documents = Yaml::load_from_str(contents).context(ParseSnafu)?;
        let mut config = Self::defaults(root);
        let Some(document) = documents.first() else {
            return Ok(config);
        };
        if matches!(document, Yaml::Value(Scalar::Null)) {
            return Ok(config);
        }
        let top_level = document.as_mapping().context(TopLevelNotMapSnafu)?;

        if let Some(workspace) = string_value(top_level, "workspace")? {
            config.workspace = root.join(&*workspace);
        }

        if let Some(base) = lookup(top_level, "base") {
            let base = base.as_mapping().context(NotAMapSnafu { key: "base" })?;
            if let Some(kind) = string_value(base, "kind")? {
                config.base.kind = match &*kind {
                    "git" => BaseKind::Git,
                    "directory" => BaseKind::Directory,
                    other => {
                        return UnknownValueSnafu {
                            key: "base.kind",
                            value: other,
                        }
                        .fail();
                    }
                };
            }
            if let Some(path) = string_value(base, "path")? {
                config.base.path = root.join(&*path);
            }
            if let Some(branch) = string_value(base, "branch")? {
                config.base.branch = Some(branch.to_string());
            }
        }

        if let Some(granularity) = string_value(top_level, "diff_granularity")? {
            config.granularity = DiffGranularity::parse(&granularity).context(UnknownValueSnafu {
                key: "diff_granularity",
                value: &*granularity,
            })?;
        }

        if let Some(capacity) = integer_value(top_level, "identity_cache_capacity")? {
            ensure!(capacity > 0, ZeroCapacitySnafu);
            config.identity_cache_capacity = capacity;
        }

        if let Some(context) = integer_value(top_level, "diff_context")? {
            config.diff_context = context;
        }

        Ok(config)
    }

    pub fn store_settings(&self) -> StoreSettings {
        StoreSettings {
            branch: self.base.branch.clone(),
            granularity: self.granularity,
            identity_cache_capacity: self.identity_cache_capacity,
            diff_context: self.diff_context,
        }
    }

    pub fn base_content(&self) -> BaseContent {
        match self.base.kind {
            BaseKind::Git => BaseContent::Git(GitStore::new(&self.base.path)),
            BaseKind::Directory => BaseContent::Directory(DirectoryStore::new(&self.base.path)),
        }
    }
}

fn lookup<'a, 'b>(
    map: &'a LinkedHashMap<Yaml<'b>, Yaml<'b>>,
    key: &'static str,
) -> Option<&'a Yaml<'b>> {
    map.get(&Yaml::Value(Scalar::String(Cow::Borrowed(key))))
        .filter(|value| !matches!(value, Yaml::Value(Scalar::Null)))
}

fn string_value<'a>(
    map: &'a LinkedHashMap<Yaml<'_>, Yaml<'_>>,
    key: &'static str,
) -> Result<Option<Cow<'a, str>>, ConfigError> {
    match lookup(map, key) {
        None => Ok(None),
        Some(Yaml::Value(Scalar::String(value))) => Ok(Some(Cow::Borrowed(&**value))),
        Some(Yaml::Value(Scalar::Integer(value))) => Ok(Some(Cow::Owned(value.to_string()))),
        Some(_) => NotAStringSnafu { key }.fail(),
    }
}

fn integer_value(
    map: &LinkedHashMap<Yaml<'_>, Yaml<'_>>,
    key: &'static str,
) -> Result<Option<usize>, ConfigError> {
    match lookup(map, key) {
        None => Ok(None),
        Some(Yaml::Value(Scalar::Integer(value))) => usize::try_from(*value)
            .ok()
            .map(Some)
            .context(NotAnIntegerSnafu { key }),
        Some(_) => NotAnIntegerSnafu { key }.fail(),
    }
}

#[derive(Debug, Snafu)]
pub enum ConfigError {
    #[snafu(display("Failed to read the config file: {}", file_path))]
    Read {
        file_path: String,
        source: std::io::Error,
    },
    #[snafu(display("Failed to parse the config file"))]
    Parse { source: saphyr::ScanError },
    #[snafu(display("Top level of config should be a map"))]
    TopLevelNotMap,
    #[snafu(display("'{}' should be a map", key))]
    NotAMap { key: &'static str },
    #[snafu(display("'{}' should be a string", key))]
    NotAString { key: &'static str },
    #[snafu(display("'{}' should be a non-negative integer", key))]
    NotAnInteger { key: &'static str },
    #[snafu(display("'{}' is not a valid value for '{}'", value, key))]
    UnknownValue { key: &'static str, value: String },
    #[snafu(display("identity_cache_capacity must be greater than zero"))]
    ZeroCapacity,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(contents: &str) -> Result<WorkspaceConfig, ConfigError> {
        WorkspaceConfig::from_yaml(Path::new("/project"), contents)
    }

    #[compio::test]
    async fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = WorkspaceConfig::read(dir.path()).await.unwrap();
        assert_eq!(config, WorkspaceConfig::defaults(dir.path()));
        assert_eq!(config.workspace, dir.path().join("workspace"));
        assert_eq!(config.base.kind, BaseKind::Directory);
        assert_eq!(config.identity_cache_capacity, 256);
    }

    #[compio::test]
    async fn reads_the_file_from_the_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "workspace: patches\ndiff_context: 3\n",
        )
        .unwrap();
        let config = WorkspaceConfig::read(dir.path()).await.unwrap();
        assert_eq!(config.workspace, dir.path().join("patches"));
        assert_eq!(config.diff_context, 3);
    }

    #[test]
    fn empty_file_gives_defaults() {
        assert_eq!(parse("").unwrap(), WorkspaceConfig::defaults(Path::new("/project")));
    }

    #[test]
    fn full_config_is_parsed() {
        let config = parse(
            r#"
workspace: /var/patches
base:
  kind: git
  path: repo
  branch: main
diff_granularity: lines
identity_cache_capacity: 16
diff_context: 2
"#,
        )
        .unwrap();

        assert_eq!(config.workspace, PathBuf::from("/var/patches"));
        assert_eq!(
            config.base,
            BaseConfig {
                kind: BaseKind::Git,
                path: PathBuf::from("/project/repo"),
                branch: Some("main".to_string()),
            }
        );
        assert_eq!(config.granularity, DiffGranularity::Lines);
        assert_eq!(config.identity_cache_capacity, 16);
        assert_eq!(config.diff_context, 2);

        let settings = config.store_settings();
        assert_eq!(settings.branch.as_deref(), Some("main"));
        assert!(matches!(config.base_content(), BaseContent::Git(_)));
    }

    #[test]
    fn invalid_yaml_is_rejected() {
        assert!(matches!(
            parse("invalid: yaml: content: [unclosed"),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn top_level_must_be_a_map() {
        assert!(matches!(
            parse("- item1\n- item2"),
            Err(ConfigError::TopLevelNotMap)
        ));
        assert!(matches!(
            parse("just a string"),
            Err(ConfigError::TopLevelNotMap)
        ));
    }

    #[test]
    fn base_must_be_a_map() {
        assert!(matches!(
            parse("base: git"),
            Err(ConfigError::NotAMap { key: "base" })
        ));
    }

    #[test]
    fn unknown_values_are_rejected() {
        assert!(matches!(
            parse("base:\n  kind: svn"),
            Err(ConfigError::UnknownValue { key: "base.kind", .. })
        ));
        assert!(matches!(
            parse("diff_granularity: sentences"),
            Err(ConfigError::UnknownValue { key: "diff_granularity", .. })
        ));
    }

    #[test]
    fn capacity_must_be_positive() {
        assert!(matches!(
            parse("identity_cache_capacity: 0"),
            Err(ConfigError::ZeroCapacity)
        ));
        assert!(matches!(
            parse("identity_cache_capacity: -3"),
            Err(ConfigError::NotAnInteger { .. })
        ));
        assert!(matches!(
            parse("identity_cache_capacity: many"),
            Err(ConfigError::NotAnInteger { .. })
        ));
    }

    #[test]
    fn workspace_must_be_a_string() {
        assert!(matches!(
            parse("workspace:\n  - a\n  - b"),
            Err(ConfigError::NotAString { key: "workspace" })
        ));
    }

    #[test]
    fn null_values_keep_defaults() {
        let config = parse("workspace:\nbase:\n").unwrap();
        assert_eq!(config, WorkspaceConfig::defaults(Path::new("/project")));
    }

    #[test]
    fn unrelated_keys_are_ignored() {
        assert!(parse("other_config: value").is_ok());
    }
}
