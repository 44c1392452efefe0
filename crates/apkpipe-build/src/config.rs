use std::{
    fmt, io,
    path::{Path, PathBuf},
    str::FromStr,
};

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Variant {
    #[default]
    Debug,
    Release,
}

impl Variant {
    pub fn label(self) -> &'static str {
        match self {
            Variant::Debug => "Debug",
            Variant::Release => "Release",
        }
    }

    pub fn lowercase(self) -> &'static str {
        match self {
            Variant::Debug => "debug",
            Variant::Release => "release",
        }
    }

    pub fn output_file_name(self) -> String {
        format!("output_{}.apk", self.lowercase())
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Variant {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "debug" => Ok(Variant::Debug),
            "release" => Ok(Variant::Release),
            other => Err(format!("unknown build variant: {other} (expected debug or release)")),
        }
    }
}

/// User-supplied keystore. Empty strings count as "not provided".
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CustomKeystore {
    pub path: String,
    #[serde(rename = "pass")]
    pub store_password: String,
    #[serde(rename = "alias")]
    pub key_alias: String,
    #[serde(rename = "key_pass")]
    pub key_password: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SigningConfig {
    pub auto_sign: bool,
    #[serde(rename = "custom_ks", skip_serializing_if = "Option::is_none")]
    pub custom_keystore: Option<CustomKeystore>,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            auto_sign: true,
            custom_keystore: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuildRequest {
    pub project_root: PathBuf,
    pub variant: Variant,
    pub signing: SigningConfig,
}

impl BuildRequest {
    pub fn new(project_root: impl Into<PathBuf>, variant: Variant) -> Self {
        Self {
            project_root: project_root.into(),
            variant,
            signing: SigningConfig::default(),
        }
    }

    pub fn with_signing(mut self, signing: SigningConfig) -> Self {
        self.signing = signing;
        self
    }

    pub fn final_package_path(&self) -> PathBuf {
        self.project_root.join(self.variant.output_file_name())
    }
}

/// Saved project settings; field names stay compatible with project files
/// written by the desktop front end.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    #[serde(alias = "output_dir")]
    pub project_path: String,
    pub app_title: String,
    pub package_name: String,
    pub build_variant: Variant,
    #[serde(flatten)]
    pub signing: SigningConfig,
}

impl ProjectConfig {
    pub fn load(path: &Path) -> io::Result<Self> {
        let data = std::fs::read_to_string(path)?;
        serde_json::from_str(&data).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    pub fn save(&self, path: &Path) -> io::Result<()> {
        apkpipe_util::write_json_atomic(path, self)
    }

    pub fn to_request(&self) -> BuildRequest {
        BuildRequest::new(
            apkpipe_util::expand_user(&self.project_path),
            self.build_variant,
        )
        .with_signing(self.signing.clone())
    }
}
