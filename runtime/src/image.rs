use crate::archive;
use crate::error::{Error, Result};
use crate::host::{Host, IMAGES_DIR};
use brig_core::{ImageHash, ImageManifest, RuntimeApp, RuntimeImage};
use brig_dataset::{Dataset, Snapshot};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

/// Snapshot tag marking a sealed image's frozen rootfs, the clone
/// source for pods and child layers.
pub(crate) const SEAL_SNAPSHOT: &str = "seal";

/// Annotation tying a runtime app back to the image record it came from.
pub const IMAGE_UUID_ANNOTATION: &str = "brig/image-uuid";

/// One image record: manifest plus import metadata, backed by a dataset
/// holding the unpacked rootfs. Open (hash-less, mutable) while being
/// imported or built; sealed (hashed, read-only) forever after.
#[derive(Clone)]
pub struct Image {
    pub(crate) host: Arc<Host>,
    pub uuid: Uuid,
    pub manifest: ImageManifest,
    pub hash: Option<ImageHash>,
    pub timestamp: DateTime<Utc>,
    pub origin: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct ImageMetadata {
    hash: Option<ImageHash>,
    timestamp: DateTime<Utc>,
    origin: Option<String>,
}

impl Image {
    pub(crate) async fn load(host: &Arc<Host>, uuid: Uuid) -> Result<Image> {
        let dir = host.path(format!("{}/{}", IMAGES_DIR, uuid));

        let manifest_bytes = match tokio::fs::read(dir.join("manifest")).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(format!("image {}", uuid)));
            }
            Err(e) => return Err(e.into()),
        };
        let manifest: ImageManifest = serde_json::from_slice(&manifest_bytes)?;

        let metadata: ImageMetadata =
            serde_json::from_slice(&tokio::fs::read(dir.join("metadata")).await?)?;

        Ok(Image {
            host: host.clone(),
            uuid,
            manifest,
            hash: metadata.hash,
            timestamp: metadata.timestamp,
            origin: metadata.origin,
        })
    }

    pub fn path(&self) -> PathBuf {
        self.host.path(format!("{}/{}", IMAGES_DIR, self.uuid))
    }

    pub fn path_join(&self, rel: impl AsRef<Path>) -> PathBuf {
        self.path().join(rel)
    }

    pub fn is_sealed(&self) -> bool {
        self.hash.is_some()
    }

    pub(crate) async fn rootfs_dataset(&self) -> Result<Dataset> {
        Ok(self
            .host
            .dataset
            .get_child(&format!("{}/{}", IMAGES_DIR, self.uuid))
            .await?)
    }

    pub(crate) async fn seal_snapshot(&self) -> Result<Snapshot> {
        Ok(self.rootfs_dataset().await?.get_snapshot(SEAL_SNAPSHOT).await?)
    }

    /// Clones the sealed rootfs as a new copy-on-write dataset at
    /// `mountpoint`.
    pub async fn clone_rootfs(&self, dest: &str, mountpoint: &Path) -> Result<Dataset> {
        Ok(self.seal_snapshot().await?.clone(dest, Some(mountpoint)).await?)
    }

    pub(crate) async fn save_manifest(&self) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(&self.manifest)?;
        tokio::fs::write(self.path_join("manifest"), bytes).await?;
        Ok(())
    }

    /// Freezes the image: metadata record, hash index link, `@seal`
    /// snapshot, dataset made read-only. The record is immutable from
    /// here on.
    pub(crate) async fn seal(&self) -> Result<()> {
        let hash = self.hash.as_ref().ok_or_else(|| {
            Error::InconsistentState("tried to seal an image without a hash".to_string())
        })?;

        let metadata = ImageMetadata {
            hash: self.hash.clone(),
            timestamp: self.timestamp,
            origin: self.origin.clone(),
        };
        tokio::fs::write(
            self.path_join("metadata"),
            serde_json::to_vec_pretty(&metadata)?,
        )
        .await?;

        let link = self.host.path(format!("{}/{}", IMAGES_DIR, hash));
        match std::os::unix::fs::symlink(self.uuid.to_string(), &link) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(Error::UsageError(format!(
                    "an image with hash {} is already present",
                    hash.short()
                )));
            }
            Err(e) => return Err(e.into()),
        }

        let ds = self.rootfs_dataset().await?;
        ds.snapshot(SEAL_SNAPSHOT).await?;
        ds.set("readonly", "on").await?;
        Ok(())
    }

    /// Exports as a flat archive: dependencies and whitelist stripped,
    /// full rootfs included. Returns the archive's content hash (which
    /// differs from this image's own hash when the image was built
    /// incrementally).
    pub async fn export(&self, out: &Path) -> Result<ImageHash> {
        let mut manifest = self.manifest.clone();
        manifest.dependencies.clear();
        manifest.path_whitelist.clear();
        let manifest_bytes = serde_json::to_vec_pretty(&manifest)?;

        let tar = archive::build_tar(&self.path(), &manifest_bytes, None)?;
        archive::write_archive_file(&tar, out, self.host.config.images.compression)?;
        Ok(archive::content_hash(&tar))
    }

    /// Builds the canonical incremental archive (manifest as written to
    /// disk, plus the packing list) and returns its content hash.
    pub(crate) async fn write_incremental_archive(
        &self,
        packlist: &[String],
        out: Option<&Path>,
    ) -> Result<ImageHash> {
        let manifest_bytes = tokio::fs::read(self.path_join("manifest")).await?;
        let tar = archive::build_tar(&self.path(), &manifest_bytes, Some(packlist))?;
        if let Some(out) = out {
            archive::write_archive_file(&tar, out, self.host.config.images.compression)?;
        }
        Ok(archive::content_hash(&tar))
    }

    /// Runtime-app stanza binding a pod app to this image.
    pub fn runtime_app(&self) -> RuntimeApp {
        let mut annotations = BTreeMap::new();
        annotations.insert(IMAGE_UUID_ANNOTATION.to_string(), self.uuid.to_string());
        RuntimeApp {
            name: self.manifest.name.clone(),
            image: RuntimeImage {
                name: Some(self.manifest.name.clone()),
                id: self.hash.clone(),
                labels: BTreeMap::new(),
            },
            app: None,
            mounts: Vec::new(),
            annotations,
        }
    }
}

impl fmt::Display for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.hash {
            Some(hash) => write!(f, "{} ({})", self.manifest.name, hash.short()),
            None => write!(f, "{} (open, {})", self.manifest.name, self.uuid),
        }
    }
}
