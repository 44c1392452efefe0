use std::path::{Path, PathBuf};

use apkpipe_toolchain::runner::SECRET_PREFIX;
use serde::Serialize;
use thiserror::Error;

use crate::config::{SigningConfig, Variant};
use crate::keystore::Keystore;

/// Why a requested custom keystore could not be used. Never fatal: the build
/// falls back to the debug keystore.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum SigningConfigIncomplete {
    #[error("custom signing requested but no custom keystore provided")]
    NotConfigured,
    #[error("custom keystore path is empty")]
    MissingPath,
    #[error("custom keystore not found at {}", .0.display())]
    KeystoreNotFound(PathBuf),
    #[error("custom keystore key alias is empty")]
    MissingAlias,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum KeystoreKind {
    Debug,
    Custom,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KeystoreChoice {
    Custom(Keystore),
    Debug {
        fallback: Option<SigningConfigIncomplete>,
    },
}

impl KeystoreChoice {
    pub fn kind(&self) -> KeystoreKind {
        match self {
            KeystoreChoice::Custom(_) => KeystoreKind::Custom,
            KeystoreChoice::Debug { .. } => KeystoreKind::Debug,
        }
    }
}

/// Picks the keystore for a run. `exists` is the only filesystem access.
pub fn select_keystore(
    variant: Variant,
    config: &SigningConfig,
    exists: impl Fn(&Path) -> bool,
) -> KeystoreChoice {
    let wants_custom = variant == Variant::Release || !config.auto_sign;
    if !wants_custom {
        return KeystoreChoice::Debug { fallback: None };
    }

    let Some(custom) = config.custom_keystore.as_ref() else {
        return KeystoreChoice::Debug {
            fallback: Some(SigningConfigIncomplete::NotConfigured),
        };
    };

    let raw_path = custom.path.trim();
    let path = apkpipe_util::expand_user(raw_path);
    let alias = custom.key_alias.trim();
    let reason = if raw_path.is_empty() {
        Some(SigningConfigIncomplete::MissingPath)
    } else if !exists(&path) {
        Some(SigningConfigIncomplete::KeystoreNotFound(path.clone()))
    } else if alias.is_empty() {
        Some(SigningConfigIncomplete::MissingAlias)
    } else {
        None
    };

    match reason {
        Some(reason) => KeystoreChoice::Debug {
            fallback: Some(reason),
        },
        None => {
            let key_password = if custom.key_password.is_empty() {
                custom.store_password.clone()
            } else {
                custom.key_password.clone()
            };
            KeystoreChoice::Custom(Keystore {
                path,
                store_password: custom.store_password.clone(),
                key_alias: Some(alias.to_string()),
                key_password: Some(key_password),
            })
        }
    }
}

/// Arguments for `apksigner sign`.
pub fn signer_args(keystore: &Keystore, output: &Path, input: &Path) -> Vec<String> {
    let mut args = vec![
        "sign".to_string(),
        "--ks".to_string(),
        keystore.path.to_string_lossy().to_string(),
        "--ks-pass".to_string(),
        format!("{SECRET_PREFIX}{}", keystore.store_password),
    ];
    if let Some(alias) = keystore.key_alias.as_ref() {
        args.push("--ks-key-alias".into());
        args.push(alias.clone());
        args.push("--key-pass".into());
        args.push(format!(
            "{SECRET_PREFIX}{}",
            keystore
                .key_password
                .as_deref()
                .unwrap_or(&keystore.store_password)
        ));
    }
    args.push("--out".into());
    args.push(output.to_string_lossy().to_string());
    args.push(input.to_string_lossy().to_string());
    args
}
