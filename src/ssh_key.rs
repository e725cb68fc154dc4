//! SSH key material for the managed instance.
//!
//! The driver only needs two capabilities: make sure a key pair exists at a
//! given path, and read back the public half so it can be injected into the
//! instance's cloud-init vendor data.

use std::ffi::OsString;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;
use tracing::info;

use crate::command::{CommandRunner, ProcessCommandRunner};
use crate::files;

/// Default program used to generate key pairs.
pub const DEFAULT_SSH_KEYGEN_BIN: &str = "ssh-keygen";

const KEY_COMMENT: &str = "incus-machine";

/// Errors raised while generating or reading SSH keys.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum KeyError {
    /// Raised when the key pair cannot be generated.
    #[error("failed to generate SSH key at {path}: {message}")]
    Generate {
        /// Private key path that was requested.
        path: Utf8PathBuf,
        /// Underlying failure.
        message: String,
    },
    /// Raised when the public key cannot be read.
    #[error("failed to read SSH public key {path}: {message}")]
    Read {
        /// Public key path that was read.
        path: Utf8PathBuf,
        /// Underlying failure.
        message: String,
    },
}

/// Provides SSH key material for a machine.
pub trait KeyProvider {
    /// Creates a key pair at `path` (private) and `path.pub` (public).
    /// Does nothing when the private key already exists.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::Generate`] when the key pair cannot be created.
    fn generate_key_pair(&self, path: &Utf8Path) -> Result<(), KeyError>;

    /// Reads the public key that belongs to the private key at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::Read`] when the public key file cannot be read.
    fn read_public_key(&self, path: &Utf8Path) -> Result<String, KeyError>;
}

/// Returns the public key path paired with the private key at `path`.
#[must_use]
pub fn public_key_path(path: &Utf8Path) -> Utf8PathBuf {
    Utf8PathBuf::from(format!("{path}.pub"))
}

/// Key provider backed by the system `ssh-keygen` binary.
#[derive(Clone, Debug)]
pub struct SshKeygen<R: CommandRunner = ProcessCommandRunner> {
    runner: R,
    program: String,
}

impl SshKeygen<ProcessCommandRunner> {
    /// Creates a provider that runs `ssh-keygen` from `PATH`.
    #[must_use]
    pub fn with_process_runner() -> Self {
        Self::new(ProcessCommandRunner, DEFAULT_SSH_KEYGEN_BIN)
    }
}

impl<R: CommandRunner> SshKeygen<R> {
    /// Creates a provider using `runner` to invoke `program`.
    #[must_use]
    pub fn new(runner: R, program: impl Into<String>) -> Self {
        Self {
            runner,
            program: program.into(),
        }
    }

    fn keygen_args(path: &Utf8Path) -> Vec<OsString> {
        vec![
            OsString::from("-t"),
            OsString::from("rsa"),
            OsString::from("-b"),
            OsString::from("2048"),
            OsString::from("-N"),
            OsString::new(),
            OsString::from("-C"),
            OsString::from(KEY_COMMENT),
            OsString::from("-q"),
            OsString::from("-f"),
            OsString::from(path.as_str()),
        ]
    }
}

impl<R: CommandRunner> KeyProvider for SshKeygen<R> {
    fn generate_key_pair(&self, path: &Utf8Path) -> Result<(), KeyError> {
        let generate_error = |message: String| KeyError::Generate {
            path: path.to_path_buf(),
            message,
        };

        if files::exists(path).map_err(|err| generate_error(err.to_string()))? {
            return Ok(());
        }

        if let Some(parent) = path.parent().filter(|parent| !parent.as_str().is_empty()) {
            files::create_dir_all(parent).map_err(|err| generate_error(err.to_string()))?;
        }

        info!(path = %path, "generating SSH key");
        let output = self
            .runner
            .run(&self.program, &Self::keygen_args(path))
            .map_err(|err| generate_error(err.to_string()))?;
        if output.is_success() {
            return Ok(());
        }

        let status = output
            .code
            .map_or_else(|| String::from("unknown"), |code| code.to_string());
        Err(generate_error(format!(
            "{} exited with status {status}: {}",
            self.program,
            output.stderr.trim()
        )))
    }

    fn read_public_key(&self, path: &Utf8Path) -> Result<String, KeyError> {
        let public = public_key_path(path);
        files::read_to_string(&public).map_err(|err| KeyError::Read {
            path: public.clone(),
            message: err.to_string(),
        })
    }
}
