use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MediumError {
    #[error("failed to read store '{name}': {source}")]
    Read {
        name: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write store '{name}': {source}")]
    Write {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// A named durable key-value blob medium. Blobs are JSON text; the medium
/// itself is schema-agnostic.
pub trait StorageMedium: Send + Sync {
    /// Read a blob. `Ok(None)` means "nothing stored under this name".
    fn read(&self, name: &str) -> Result<Option<String>, MediumError>;
    fn write(&self, name: &str, json: &str) -> Result<(), MediumError>;
    fn remove(&self, name: &str) -> Result<(), MediumError>;
}

/// Stores each blob as `<dir>/<name>.json`.
pub struct FileMedium {
    dir: PathBuf,
}

impl FileMedium {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.json", name))
    }
}

impl StorageMedium for FileMedium {
    fn read(&self, name: &str) -> Result<Option<String>, MediumError> {
        match std::fs::read_to_string(self.path(name)) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(MediumError::Read {
                name: name.to_string(),
                source: e,
            }),
        }
    }

    fn write(&self, name: &str, json: &str) -> Result<(), MediumError> {
        if let Some(parent) = self.path(name).parent() {
            std::fs::create_dir_all(parent).map_err(|e| MediumError::Write {
                name: name.to_string(),
                source: e,
            })?;
        }
        std::fs::write(self.path(name), json).map_err(|e| MediumError::Write {
            name: name.to_string(),
            source: e,
        })
    }

    fn remove(&self, name: &str) -> Result<(), MediumError> {
        match std::fs::remove_file(self.path(name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(MediumError::Write {
                name: name.to_string(),
                source: e,
            }),
        }
    }
}

/// The "no durable medium" environment (e.g. server-side render): reads see
/// nothing, writes vanish, nothing ever errors.
pub struct NullMedium;

impl StorageMedium for NullMedium {
    fn read(&self, _name: &str) -> Result<Option<String>, MediumError> {
        Ok(None)
    }

    fn write(&self, _name: &str, _json: &str) -> Result<(), MediumError> {
        Ok(())
    }

    fn remove(&self, _name: &str) -> Result<(), MediumError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_medium_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let medium = FileMedium::new(dir.path().to_path_buf());
        assert!(medium.read("sessions").unwrap().is_none());
        medium.write("sessions", r#"{"a":1}"#).unwrap();
        assert_eq!(medium.read("sessions").unwrap().as_deref(), Some(r#"{"a":1}"#));
        medium.remove("sessions").unwrap();
        assert!(medium.read("sessions").unwrap().is_none());
    }

    #[test]
    fn remove_missing_blob_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let medium = FileMedium::new(dir.path().to_path_buf());
        medium.remove("never-written").unwrap();
    }

    #[test]
    fn null_medium_swallows_everything() {
        let medium = NullMedium;
        medium.write("x", "{}").unwrap();
        assert!(medium.read("x").unwrap().is_none());
    }
}
