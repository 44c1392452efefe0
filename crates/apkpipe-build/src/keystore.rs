use std::{
    fs::{self, OpenOptions},
    io,
    path::{Path, PathBuf},
};

use apkpipe_toolchain::{CommandRunner, LogSink, RunError};
use fs2::FileExt;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

pub const DEBUG_KEYSTORE_FILE: &str = "debug.keystore";
pub const DEBUG_STORE_PASSWORD: &str = "android";
pub const DEBUG_KEY_ALIAS: &str = "androiddebugkey";
pub const DEBUG_KEY_PASSWORD: &str = "android";
pub const DEBUG_DNAME: &str = "CN=Android Debug,O=Android,C=US";
pub const DEBUG_KEY_ALGORITHM: &str = "RSA";
pub const DEBUG_KEY_SIZE: u32 = 2048;
pub const DEBUG_VALIDITY_DAYS: u32 = 10000;

/// Keystore file plus the credentials used to open it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Keystore {
    pub path: PathBuf,
    pub store_password: String,
    pub key_alias: Option<String>,
    pub key_password: Option<String>,
}

#[derive(Debug, Error)]
pub enum KeystoreError {
    #[error("keytool not found; cannot create debug keystore at {}", path.display())]
    KeytoolMissing { path: PathBuf },
    #[error("debug keystore generation failed: {0}")]
    Generation(#[from] RunError),
    #[error("keytool finished but {} was not created", .0.display())]
    NotCreated(PathBuf),
    #[error("debug keystore setup failed: {0}")]
    Io(#[from] io::Error),
}

/// Owns the debug keystore shared by every project of one base install.
/// Creation happens at most once; later calls reuse the file untouched.
#[derive(Debug)]
pub struct KeystoreManager {
    path: PathBuf,
    guard: Mutex<()>,
}

impl KeystoreManager {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            guard: Mutex::new(()),
        }
    }

    pub fn for_base_dir(base_dir: &Path) -> Self {
        Self::new(base_dir.join(DEBUG_KEYSTORE_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn debug_keystore(&self) -> Keystore {
        Keystore {
            path: self.path.clone(),
            store_password: DEBUG_STORE_PASSWORD.to_string(),
            key_alias: None,
            key_password: None,
        }
    }

    pub async fn ensure(
        &self,
        keytool: Option<&Path>,
        sink: &dyn LogSink,
    ) -> Result<Keystore, KeystoreError> {
        let _guard = self.guard.lock().await;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Other processes sharing the base install serialize on this lock, so
        // a keystore keytool is still writing is never picked up.
        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.lock_path())?;
        let lock_file = tokio::task::spawn_blocking(move || {
            FileExt::lock_exclusive(&lock_file).map(|()| lock_file)
        })
        .await
        .map_err(io::Error::other)??;

        if self.path.is_file() {
            debug!("reusing debug keystore {}", self.path.display());
            return Ok(self.debug_keystore());
        }

        let keytool = keytool.ok_or_else(|| KeystoreError::KeytoolMissing {
            path: self.path.clone(),
        })?;
        sink.info("Generating debug keystore...");
        let generated = CommandRunner::new(sink)
            .run(&genkey_command(keytool, &self.path))
            .await;
        drop(lock_file);
        generated?;

        if !self.path.is_file() {
            return Err(KeystoreError::NotCreated(self.path.clone()));
        }
        Ok(self.debug_keystore())
    }

    fn lock_path(&self) -> PathBuf {
        self.path.with_extension("keystore.lock")
    }
}

fn genkey_command(keytool: &Path, keystore: &Path) -> Vec<String> {
    vec![
        keytool.to_string_lossy().to_string(),
        "-genkeypair".into(),
        "-v".into(),
        "-keystore".into(),
        keystore.to_string_lossy().to_string(),
        "-storepass".into(),
        DEBUG_STORE_PASSWORD.into(),
        "-alias".into(),
        DEBUG_KEY_ALIAS.into(),
        "-keypass".into(),
        DEBUG_KEY_PASSWORD.into(),
        "-keyalg".into(),
        DEBUG_KEY_ALGORITHM.into(),
        "-keysize".into(),
        DEBUG_KEY_SIZE.to_string(),
        "-validity".into(),
        DEBUG_VALIDITY_DAYS.to_string(),
        "-dname".into(),
        DEBUG_DNAME.into(),
    ]
}
