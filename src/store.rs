//! Per-machine state kept between CLI invocations.
//!
//! Each machine owns `<root>/machines/<name>/`, holding its SSH key pair and
//! `config.json`, the serialised [`MachineRecord`].

use std::net::IpAddr;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::files;
use crate::incus::DriverSettings;

const MACHINES_DIR: &str = "machines";
const RECORD_FILE: &str = "config.json";
const SSH_KEY_FILE: &str = "id_rsa";

/// Errors raised while reading or writing machine state.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum StoreError {
    /// Raised when the machine has no stored record.
    #[error("machine {name} does not exist")]
    Missing {
        /// Machine name.
        name: String,
    },
    /// Raised when the machine name cannot be used as a directory name.
    #[error("invalid machine name `{name}`")]
    InvalidName {
        /// Rejected name.
        name: String,
    },
    /// Raised when file system operations fail.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path that could not be accessed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when a stored record cannot be parsed or rendered.
    #[error("invalid machine record {path}: {message}")]
    Record {
        /// Record path.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
}

/// Everything needed to rebuild a driver for an existing machine.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct MachineRecord {
    /// Machine name.
    pub name: String,
    /// Name of the driver that created the machine.
    pub driver: String,
    /// Settings the machine was created with.
    pub settings: DriverSettings,
    /// Address recorded after creation.
    #[serde(default)]
    pub ip_address: Option<IpAddr>,
}

/// Directory tree holding every machine's state.
#[derive(Clone, Debug)]
pub struct MachineStore {
    root: Utf8PathBuf,
}

impl MachineStore {
    /// Store rooted at `root`. A leading `~/` expands to the home directory.
    #[must_use]
    pub fn new(root: &str) -> Self {
        Self {
            root: files::expand_tilde(root),
        }
    }

    /// Root directory.
    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Directory owned by machine `name`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidName`] when `name` is empty or contains
    /// path separators.
    pub fn machine_dir(&self, name: &str) -> Result<Utf8PathBuf, StoreError> {
        let trimmed = name.trim();
        if trimmed.is_empty() || trimmed != name || name.contains(['/', '\\']) || name == ".." {
            return Err(StoreError::InvalidName {
                name: name.to_owned(),
            });
        }
        Ok(self.root.join(MACHINES_DIR).join(name))
    }

    /// Private SSH key path for machine `name`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidName`] for unusable names.
    pub fn ssh_key_path(&self, name: &str) -> Result<Utf8PathBuf, StoreError> {
        Ok(self.machine_dir(name)?.join(SSH_KEY_FILE))
    }

    fn record_path(&self, name: &str) -> Result<Utf8PathBuf, StoreError> {
        Ok(self.machine_dir(name)?.join(RECORD_FILE))
    }

    /// Writes `record`, replacing any earlier record for the same machine.
    /// The file is created readable by its owner only.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the record cannot be rendered or written.
    pub fn save(&self, record: &MachineRecord) -> Result<(), StoreError> {
        let path = self.record_path(&record.name)?;
        let json = serde_json::to_string_pretty(record).map_err(|err| StoreError::Record {
            path: path.clone(),
            message: err.to_string(),
        })?;
        files::write(&path, &json).map_err(|err| StoreError::Io {
            path: path.clone(),
            message: err.to_string(),
        })
    }

    /// Reads the record for machine `name`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Missing`] when no record exists and other
    /// [`StoreError`] variants when it cannot be read or parsed.
    pub fn load(&self, name: &str) -> Result<MachineRecord, StoreError> {
        let path = self.record_path(name)?;
        let exists = files::exists(&path).map_err(|err| StoreError::Io {
            path: path.clone(),
            message: err.to_string(),
        })?;
        if !exists {
            return Err(StoreError::Missing {
                name: name.to_owned(),
            });
        }
        let json = files::read_to_string(&path).map_err(|err| StoreError::Io {
            path: path.clone(),
            message: err.to_string(),
        })?;
        serde_json::from_str(&json).map_err(|err| StoreError::Record {
            path,
            message: err.to_string(),
        })
    }

    /// Deletes everything stored for machine `name`. Absent machines succeed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] when the directory cannot be removed.
    pub fn remove(&self, name: &str) -> Result<(), StoreError> {
        let dir = self.machine_dir(name)?;
        files::remove_dir_all(&dir).map_err(|err| StoreError::Io {
            path: dir,
            message: err.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    #[fixture]
    fn store() -> (TempDir, MachineStore) {
        let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let root = tmp
            .path()
            .to_str()
            .unwrap_or_else(|| panic!("temp dir should be utf8: {}", tmp.path().display()))
            .to_owned();
        (tmp, MachineStore::new(&root))
    }

    fn record(name: &str) -> MachineRecord {
        MachineRecord {
            name: name.to_owned(),
            driver: String::from("incus"),
            settings: DriverSettings {
                url: String::from("https://incus.example.com:8443"),
                image_name: String::from("debian/12"),
                ..DriverSettings::default()
            },
            ip_address: Some(IpAddr::from([10, 0, 0, 5])),
        }
    }

    #[rstest]
    fn save_then_load_returns_the_record(store: (TempDir, MachineStore)) {
        let (_tmp, machines) = store;
        machines
            .save(&record("vm1"))
            .unwrap_or_else(|err| panic!("save: {err}"));
        let loaded = machines
            .load("vm1")
            .unwrap_or_else(|err| panic!("load: {err}"));
        assert_eq!(loaded, record("vm1"));
    }

    #[cfg(unix)]
    #[rstest]
    fn saved_records_are_private(store: (TempDir, MachineStore)) {
        use std::os::unix::fs::PermissionsExt;

        let (_tmp, machines) = store;
        machines
            .save(&record("vm1"))
            .unwrap_or_else(|err| panic!("save: {err}"));
        let path = machines
            .machine_dir("vm1")
            .unwrap_or_else(|err| panic!("machine dir: {err}"))
            .join("config.json");
        let mode = std::fs::metadata(&path)
            .unwrap_or_else(|err| panic!("metadata: {err}"))
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600, "{path} should be owner-only");
    }

    #[rstest]
    fn load_reports_missing_machines(store: (TempDir, MachineStore)) {
        let (_tmp, machines) = store;
        assert_eq!(
            machines.load("ghost"),
            Err(StoreError::Missing {
                name: String::from("ghost")
            })
        );
    }

    #[rstest]
    fn remove_deletes_the_machine_directory(store: (TempDir, MachineStore)) {
        let (_tmp, machines) = store;
        machines
            .save(&record("vm1"))
            .unwrap_or_else(|err| panic!("save: {err}"));
        machines
            .remove("vm1")
            .unwrap_or_else(|err| panic!("remove: {err}"));
        assert!(matches!(machines.load("vm1"), Err(StoreError::Missing { .. })));
        machines
            .remove("vm1")
            .unwrap_or_else(|err| panic!("second remove: {err}"));
    }

    #[rstest]
    #[case("")]
    #[case("../escape")]
    #[case("a/b")]
    #[case(" padded")]
    #[case("..")]
    fn rejects_unusable_names(store: (TempDir, MachineStore), #[case] name: &str) {
        let (_tmp, machines) = store;
        assert!(matches!(
            machines.machine_dir(name),
            Err(StoreError::InvalidName { .. })
        ));
    }

    #[rstest]
    fn ssh_key_lives_in_the_machine_directory(store: (TempDir, MachineStore)) {
        let (_tmp, machines) = store;
        let key = machines
            .ssh_key_path("vm1")
            .unwrap_or_else(|err| panic!("key path: {err}"));
        assert_eq!(key, machines.root().join("machines").join("vm1").join("id_rsa"));
    }
}
