use std::path::{Component, Path, PathBuf};

/// Canonical form of `path` when it exists, otherwise an absolute, lexically normalized form.
/// Only meant for log and error messages.
pub fn best_effort_path_display(path: &Path) -> String {
    if let Ok(canonical) = path.canonicalize() {
        return canonical.display().to_string();
    }

    let absolute = match std::env::current_dir() {
        Ok(current_dir) if path.is_relative() => current_dir.join(path),
        _ => path.to_path_buf(),
    };
    normalize_path(&absolute).display().to_string()
}

fn normalize_path(path: &Path) -> PathBuf {
    let mut components: Vec<Component> = Vec::new();

    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if matches!(components.last(), Some(Component::Normal(_))) {
                    components.pop();
                }
            }
            other => components.push(other),
        }
    }

    components.iter().collect()
}

pub trait BestEffortPathExt {
    fn best_effort_path_display(&self) -> String;
}

impl<P: AsRef<Path> + ?Sized> BestEffortPathExt for P {
    fn best_effort_path_display(&self) -> String {
        best_effort_path_display(self.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_missing_paths() {
        let shown = Path::new("/no/such/dir/../file.txt").best_effort_path_display();
        assert_eq!(shown, "/no/such/file.txt");
    }

    #[test]
    fn never_pops_the_root() {
        assert_eq!(normalize_path(Path::new("/../a")), PathBuf::from("/a"));
    }
}
