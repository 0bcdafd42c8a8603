use snafu::Snafu;
use snafu::prelude::*;
use tracing::{debug, error, warn};

use crate::application::RuntimeConfig;
use crate::cli::init_color;
use crate::config::{ConfigError, WorkspaceConfig};
use crate::content_store::ContentStore;
use crate::ext::BestEffortPathExt;
use crate::management::{Journal, JournalError, ManagementError};
use crate::patches::{PatchStore, StoreError};

pub struct Application;

impl Application {
    pub async fn run(app_config: impl Into<RuntimeConfig>) -> Result<(), ApplicationError> {
        let app_config: RuntimeConfig = app_config.into();
        let config = WorkspaceConfig::read(&app_config.root)
            .await
            .context(ConfigSnafu)?;
        debug!("Loaded config: {:?}", config);

        let store = PatchStore::open(
            &config.workspace,
            config.base_content(),
            config.store_settings(),
        )
        .await
        .context(OpenSnafu {
            path: config.workspace.best_effort_path_display(),
        })?;
        report_pending_journal(&store).await;

        init_color();
        app_config.command.execute(&store).await
    }
}

/// An unfinished restructuring means the tree may be half rewritten.
async fn report_pending_journal<S: ContentStore>(store: &PatchStore<S>) {
    let journal = Journal::new(store.workspace());
    match journal.read().await {
        Ok(Some(entry)) => error!(
            "Found an unfinished restructuring in {}, the workspace may be inconsistent:\n{}",
            journal.path().best_effort_path_display(),
            entry
        ),
        Ok(None) => {}
        Err(e) => warn!("Could not read the recovery journal: {}", e),
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ApplicationError {
    #[snafu(display("Critical failure encountered during configuration stage"))]
    ConfigError { source: ConfigError },
    #[snafu(display("Failed to open the workspace at {}", path))]
    OpenError { path: String, source: StoreError },
    #[snafu(display("Failed to {}", action))]
    StoreCommandError {
        action: String,
        source: StoreError,
    },
    #[snafu(display("Failed to restructure the patch tree"))]
    TreeMutationError { source: ManagementError },
    #[snafu(display("Failed to read the recovery journal"))]
    JournalError { source: JournalError },
    #[snafu(display("Failed to read the new content from {}", from))]
    InputError {
        from: String,
        source: std::io::Error,
    },
    #[snafu(display("The new content from {} is not UTF-8 text", from))]
    InputNotUtf8Error {
        from: String,
        source: std::string::FromUtf8Error,
    },
    #[snafu(display(
        "'{}' still changes {}; use --force to delete it anyway",
        id,
        paths.join(", ")
    ))]
    NotDeletedError { id: String, paths: Vec<String> },
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use tempfile::TempDir;

    use super::*;
    use crate::cli::Command;
    use crate::content_store::DirectoryStore;
    use crate::patches::StoreSettings;

    fn project(files: &[(&str, &str)]) -> TempDir {
        let dir = TempDir::new().unwrap();
        let base = dir.path().join("base_code");
        std::fs::create_dir_all(&base).unwrap();
        for (path, content) in files {
            std::fs::write(base.join(path), content).unwrap();
        }
        dir
    }

    async fn run(root: &Path, command: Command) -> Result<(), ApplicationError> {
        Application::run(RuntimeConfig {
            root: root.to_path_buf(),
            command,
        })
        .await
    }

    async fn open(root: &Path) -> PatchStore<DirectoryStore> {
        PatchStore::open(
            root.join("workspace"),
            DirectoryStore::new(root.join("base_code")),
            StoreSettings::default(),
        )
        .await
        .unwrap()
    }

    #[compio::test]
    async fn commands_edit_the_default_workspace() {
        let dir = project(&[("a.txt", "hello world")]);
        let input = dir.path().join("input.txt");
        std::fs::write(&input, "hello there world").unwrap();

        run(
            dir.path(),
            Command::New {
                parent: "root".into(),
                name: Some("P1".into()),
            },
        )
        .await
        .unwrap();
        run(
            dir.path(),
            Command::Write {
                id: "P1".into(),
                path: "a.txt".into(),
                from: Some(input),
            },
        )
        .await
        .unwrap();
        run(
            dir.path(),
            Command::Note {
                id: "P1".into(),
                text: "greeting".into(),
            },
        )
        .await
        .unwrap();

        let store = open(dir.path()).await;
        let node = store.load("P1").await.unwrap();
        assert_eq!(node.metadata.notes, "greeting");
        assert_eq!(
            store
                .get_path_content(&node, "a.txt", false)
                .await
                .unwrap()
                .current,
            "hello there world"
        );
    }

    #[compio::test]
    async fn write_refuses_input_that_is_not_utf8() {
        let dir = project(&[("a.txt", "hello")]);
        let input = dir.path().join("input.bin");
        std::fs::write(&input, b"hel\xfflo").unwrap();
        run(
            dir.path(),
            Command::New {
                parent: "root".into(),
                name: Some("P1".into()),
            },
        )
        .await
        .unwrap();

        let result = run(
            dir.path(),
            Command::Write {
                id: "P1".into(),
                path: "a.txt".into(),
                from: Some(input),
            },
        )
        .await;
        assert!(matches!(result, Err(ApplicationError::InputNotUtf8Error { .. })));

        let store = open(dir.path()).await;
        assert!(store.load("P1").await.unwrap().changes.is_empty());
    }

    #[compio::test]
    async fn delete_refuses_modified_nodes_without_force() {
        let dir = project(&[("a.txt", "hello")]);
        let store = open(dir.path()).await;
        let root = store.root().await.unwrap();
        let node = store.create_child(&root, Some("P1")).await.unwrap();
        store
            .write_path_content(&node, "a.txt", "bye", crate::patches::WriteGuard::Checked)
            .await
            .unwrap();
        drop(store);

        let result = run(
            dir.path(),
            Command::Delete {
                id: "P1".into(),
                force: false,
            },
        )
        .await;
        assert!(matches!(
            result,
            Err(ApplicationError::NotDeletedError { ref paths, .. }) if paths == &["a.txt"]
        ));

        run(
            dir.path(),
            Command::Delete {
                id: "P1".into(),
                force: true,
            },
        )
        .await
        .unwrap();
        assert!(!dir.path().join("workspace").join("P1").exists());
    }

    #[compio::test]
    async fn restructuring_errors_are_reported() {
        let dir = project(&[]);
        run(
            dir.path(),
            Command::New {
                parent: "root".into(),
                name: None,
            },
        )
        .await
        .unwrap();

        let result = run(
            dir.path(),
            Command::MergeUp {
                id: "NewPatch".into(),
            },
        )
        .await;
        assert!(matches!(
            result,
            Err(ApplicationError::TreeMutationError {
                source: ManagementError::MergeIntoRoot
            })
        ));
    }

    #[compio::test]
    async fn bad_config_stops_early() {
        let dir = project(&[]);
        std::fs::write(dir.path().join("patchtree.yaml"), "- not a map").unwrap();
        assert!(matches!(
            run(dir.path(), Command::Tree).await,
            Err(ApplicationError::ConfigError { .. })
        ));
        assert!(!dir.path().join("workspace").exists());
    }
}
