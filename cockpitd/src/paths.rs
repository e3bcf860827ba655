//! Cross-platform application paths

use std::fs;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum PathsError {
    #[error("could not determine the platform data directory")]
    NoDataDir,
    #[error("failed to create data directory {path:?}: {source}")]
    Create {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct AppPaths {
    data_dir: PathBuf,
}

impl AppPaths {
    /// Resolve `<data dir>/cockpit` and make sure it exists.
    pub fn new() -> Result<Self, PathsError> {
        let base = dirs::data_dir().ok_or(PathsError::NoDataDir)?;
        Self::create(base.join("cockpit"))
    }

    fn create(data_dir: PathBuf) -> Result<Self, PathsError> {
        fs::create_dir_all(&data_dir).map_err(|source| PathsError::Create {
            path: data_dir.clone(),
            source,
        })?;
        Ok(Self { data_dir })
    }

    #[cfg(test)]
    pub fn at(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }

    pub fn data_dir(&self) -> &PathBuf {
        &self.data_dir
    }

    pub fn config_file(&self) -> PathBuf {
        self.data_dir.join("config.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_makes_the_directory() {
        let dir = std::env::temp_dir()
            .join(format!("cockpitd-paths-{}", std::process::id()))
            .join("nested");
        let paths = AppPaths::create(dir.clone()).unwrap();
        assert!(dir.is_dir());
        assert_eq!(paths.config_file(), dir.join("config.json"));
        std::fs::remove_dir_all(dir.parent().unwrap()).unwrap();
    }

    #[test]
    fn create_reports_a_blocked_path() {
        let file = std::env::temp_dir().join(format!("cockpitd-paths-file-{}", std::process::id()));
        std::fs::write(&file, "x").unwrap();
        assert!(matches!(
            AppPaths::create(file.join("sub")),
            Err(PathsError::Create { .. })
        ));
        std::fs::remove_file(file).unwrap();
    }
}
