//! Local deployment state.
//!
//! Secrets, SSH keys, and TLS material live under a fixed local
//! directory keyed by deployment key name. The secret and SSH key are
//! written by provisioning tooling before bootstrap starts; TLS
//! material is generated here on first use.

use std::path::{Path, PathBuf};

use thiserror::Error;
use time::macros::datetime;
use tracing::info;

use crate::layout::NodeRoleInfo;

/// Directory name under the home directory holding deployment state.
const STATE_DIR: &str = ".plinth";

#[derive(Debug, Error)]
pub enum LocalStateError {
    #[error("cannot determine home directory")]
    NoHome,

    #[error("deployment secret not found at {}", path.display())]
    MissingSecret { path: PathBuf },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("TLS material generation failed: {0}")]
    Tls(String),
}

/// Fixed local paths keyed by deployment key name.
#[derive(Debug, Clone)]
pub struct LocalState {
    base_dir: PathBuf,
}

impl LocalState {
    /// State rooted at `~/.plinth`.
    pub fn new() -> Result<Self, LocalStateError> {
        let dirs = directories::BaseDirs::new().ok_or(LocalStateError::NoHome)?;
        Ok(Self {
            base_dir: dirs.home_dir().join(STATE_DIR),
        })
    }

    /// State rooted at an explicit directory.
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn secret_path(&self, keyname: &str) -> PathBuf {
        self.base_dir.join(format!("{keyname}.secret"))
    }

    pub fn ssh_key_path(&self, keyname: &str) -> PathBuf {
        self.base_dir.join(format!("{keyname}.key"))
    }

    pub fn cert_path(&self, keyname: &str) -> PathBuf {
        self.base_dir.join(format!("{keyname}-cert.pem"))
    }

    pub fn tls_key_path(&self, keyname: &str) -> PathBuf {
        self.base_dir.join(format!("{keyname}-key.pem"))
    }

    pub fn locations_path(&self, keyname: &str) -> PathBuf {
        self.base_dir.join(format!("locations-{keyname}.json"))
    }

    fn descriptor_path(&self, keyname: &str) -> PathBuf {
        self.base_dir.join(format!("{keyname}-controller.conf"))
    }

    /// Read the shared secret for a deployment. Write-once, read-many.
    pub async fn read_secret(&self, keyname: &str) -> Result<String, LocalStateError> {
        let path = self.secret_path(keyname);
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => Ok(contents.trim().to_string()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(LocalStateError::MissingSecret { path })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Render the controller supervision descriptor to a local file
    /// ready for upload.
    pub async fn write_controller_descriptor(
        &self,
        keyname: &str,
        contents: &str,
    ) -> Result<PathBuf, LocalStateError> {
        tokio::fs::create_dir_all(&self.base_dir).await?;
        let path = self.descriptor_path(keyname);
        tokio::fs::write(&path, contents).await?;
        Ok(path)
    }

    /// Serialize the cluster's role info to the locations metadata file.
    pub async fn write_locations(
        &self,
        keyname: &str,
        role_info: &[NodeRoleInfo],
    ) -> Result<PathBuf, LocalStateError> {
        tokio::fs::create_dir_all(&self.base_dir).await?;
        let path = self.locations_path(keyname);
        let contents = serde_json::to_vec_pretty(role_info)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        tokio::fs::write(&path, contents).await?;
        Ok(path)
    }

    /// True when both halves of the TLS pair exist locally.
    pub fn has_tls_material(&self, keyname: &str) -> bool {
        self.cert_path(keyname).exists() && self.tls_key_path(keyname).exists()
    }

    /// Generate the deployment's self-signed TLS pair if absent.
    ///
    /// Subject fields are deterministic and the validity window is
    /// fixed, so regenerating on another workstation produces an
    /// equivalent certificate. Returns true when a new pair was
    /// written.
    pub async fn ensure_tls_material(&self, keyname: &str) -> Result<bool, LocalStateError> {
        if self.has_tls_material(keyname) {
            return Ok(false);
        }

        let key_pair =
            rcgen::KeyPair::generate().map_err(|e| LocalStateError::Tls(e.to_string()))?;

        let mut params = rcgen::CertificateParams::new(vec!["plinth".to_string()])
            .map_err(|e| LocalStateError::Tls(e.to_string()))?;
        let mut dn = rcgen::DistinguishedName::new();
        dn.push(rcgen::DnType::CommonName, "plinth deployment");
        dn.push(rcgen::DnType::OrganizationName, "plinth");
        params.distinguished_name = dn;
        params.not_before = datetime!(2024-01-01 0:00 UTC);
        params.not_after = datetime!(2034-01-01 0:00 UTC);

        let cert = params
            .self_signed(&key_pair)
            .map_err(|e| LocalStateError::Tls(e.to_string()))?;

        tokio::fs::create_dir_all(&self.base_dir).await?;
        let cert_path = self.cert_path(keyname);
        let key_path = self.tls_key_path(keyname);
        tokio::fs::write(&cert_path, cert.pem()).await?;
        tokio::fs::write(&key_path, key_pair.serialize_pem()).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&key_path, std::fs::Permissions::from_mode(0o600)).await?;
        }

        info!(
            keyname = %keyname,
            cert = %cert_path.display(),
            "Generated self-signed TLS pair"
        );
        Ok(true)
    }
}
