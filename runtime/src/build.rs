use crate::error::{Error, Result};
use crate::host::{IMAGES_DIR, PODS_DIR};
use crate::image::Image;
use crate::pod::{PARENT_SNAPSHOT, Pod};
use brig_core::{
    ANNOTATION_TIMESTAMP, App, Dependency, INHERITED_LABELS, ImageManifest,
    JAIL_CONF_ANNOTATION_PREFIX, Name, PodManifest,
};
use brig_dataset::DiffEntry;
use brig_runner::Command;
use chrono::Utc;
use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

const WORK_DIR_PREFIX: &str = ".build";

/// Manifest fragment the build command must leave in its work dir.
const BUILD_MANIFEST: &str = "manifest.json";

const CP: &str = "/bin/cp";

impl Image {
    /// Builds a child image by running `exec` in a disposable pod
    /// cloned from this image, then packaging what changed. The child
    /// depends on this image by hash; only changed paths are archived.
    pub async fn build(
        &self,
        build_dir: &Path,
        add_files: &[PathBuf],
        exec: Vec<String>,
    ) -> Result<Image> {
        let rootfs = self.rootfs_dataset().await?;
        let pod_manifest = self.build_pod_manifest(exec, &rootfs.mountpoint);
        let work_dir = pod_manifest.apps[0]
            .app
            .as_ref()
            .expect("build pod has an app descriptor")
            .working_directory
            .clone();

        tracing::info!(image = %self, "preparing build pod");
        let build_pod = self.host.create_pod(pod_manifest).await?;
        let pod_uuid = build_pod.uuid;

        match self
            .run_build(build_pod, build_dir, add_files, &work_dir)
            .await
        {
            Ok(child) => Ok(child),
            Err(e) => {
                // Disposable state: tear down whatever stage we died in.
                if let Ok(pod) = self.host.pod(pod_uuid).await
                    && let Err(cleanup) = pod.destroy().await
                {
                    tracing::warn!(pod = %pod_uuid, error = %cleanup, "cleanup of build pod failed");
                }
                if let Err(cleanup) = self.host.destroy_image_record(pod_uuid, None).await {
                    tracing::warn!(image = %pod_uuid, error = %cleanup, "cleanup of partial build image failed");
                }
                Err(e)
            }
        }
    }

    /// Single-app pod manifest for a build: runs `exec` as root in a
    /// work dir probed to not exist in this image's rootfs.
    fn build_pod_manifest(&self, exec: Vec<String>, rootfs: &Path) -> PodManifest {
        let mut work_dir = format!("{}.", WORK_DIR_PREFIX);
        while rootfs.join(&work_dir).exists() {
            work_dir = format!("{}.{}", WORK_DIR_PREFIX, Uuid::new_v4());
        }

        let mut rtapp = self.runtime_app();
        rtapp.name = Name::parse("build").expect("static name");
        let mut app = App::new(exec);
        app.user = "0".to_string();
        app.group = "0".to_string();
        app.working_directory = format!("/{}", work_dir);
        rtapp.app = Some(app);

        let mut manifest = PodManifest::new();
        manifest.apps.push(rtapp);
        // freebsd-update and friends need chflags inside the builder.
        manifest.annotations.insert(
            format!("{}allow.chflags", JAIL_CONF_ANNOTATION_PREFIX),
            "true".to_string(),
        );
        manifest.annotations.insert(
            format!("{}securelevel", JAIL_CONF_ANNOTATION_PREFIX),
            "0".to_string(),
        );
        manifest
    }

    async fn run_build(
        &self,
        build_pod: Pod,
        build_dir: &Path,
        add_files: &[PathBuf],
        work_dir: &str,
    ) -> Result<Image> {
        let host = &self.host;
        let app_name = build_pod.manifest.apps[0].name.clone();

        let mut ds = host
            .dataset
            .get_child(&format!("{}/{}/rootfs.0", PODS_DIR, build_pod.uuid))
            .await?;

        let full_work_dir = ds.path(work_dir);
        tokio::fs::create_dir(&full_work_dir).await?;
        tokio::fs::set_permissions(&full_work_dir, std::fs::Permissions::from_mode(0o700))
            .await?;

        // Trailing slash: cp copies the directory's contents.
        let mut build_dir_arg = build_dir.display().to_string();
        if !build_dir_arg.ends_with('/') {
            build_dir_arg.push('/');
        }
        let mut cp = Command::new(CP).arg("-R").arg(build_dir_arg);
        for file in add_files {
            cp = cp.arg_path(file);
        }
        cp.arg_path(&full_work_dir).run().await?;

        tracing::info!(pod = %build_pod.uuid, "running the build");
        build_pod.run_app(&app_name).await?;
        build_pod.kill().await?;

        tracing::debug!("reading new image manifest");
        let fragment = tokio::fs::read(full_work_dir.join(BUILD_MANIFEST)).await?;
        let mut manifest: ImageManifest = serde_json::from_slice(&fragment)?;

        tokio::fs::remove_dir_all(&full_work_dir).await?;
        if let Err(e) = tokio::fs::remove_file(ds.path("etc/resolv.conf")).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            return Err(e.into());
        }

        // Repurpose the build rootfs in place as the child image's
        // dataset instead of copying the tree.
        tracing::info!(pod = %build_pod.uuid, "pivoting build pod into new image");
        let child_uuid = build_pod.uuid;
        let image_dir = host.path(format!("{}/{}", IMAGES_DIR, child_uuid));
        tokio::fs::create_dir_all(&image_dir).await?;
        ds.set(
            "mountpoint",
            &image_dir.join("rootfs").display().to_string(),
        )
        .await?;
        ds.rename(&host.dataset.child_name(&format!("{}/{}", IMAGES_DIR, child_uuid)))
            .await?;

        build_pod.destroy().await?;

        if !manifest.annotations.contains_key(ANNOTATION_TIMESTAMP) {
            manifest
                .annotations
                .insert(ANNOTATION_TIMESTAMP.to_string(), Utc::now().to_rfc3339());
        }

        // os/arch come from the parent unless the child sets them; an
        // explicitly empty value removes the label.
        for label in INHERITED_LABELS {
            match manifest.labels.get(*label) {
                None => {
                    if let Some(value) = self.manifest.labels.get(*label) {
                        manifest.labels.insert((*label).to_string(), value.clone());
                    }
                }
                Some(value) if value.is_empty() => {
                    manifest.labels.remove(*label);
                }
                Some(_) => {}
            }
        }

        manifest.dependencies.insert(
            0,
            Dependency {
                name: self.manifest.name.clone(),
                id: self.hash.clone(),
                labels: self.manifest.labels.clone(),
            },
        );

        tracing::debug!("generating incremental packing list");
        let parent = ds.get_snapshot(PARENT_SNAPSHOT).await?;
        let diffs = ds.diff(&parent).await?;
        let build_diff = compute_build_diff(&diffs, &ds.mountpoint)?;

        if build_diff.have_deletions {
            tracing::debug!("files were deleted, recording path whitelist");
            let mut whitelist: Vec<String> = crate::archive::walk_sorted(&ds.mountpoint)?
                .iter()
                .map(|rel| format!("/{}", rel.display()))
                .collect();
            whitelist.sort();
            manifest.path_whitelist = whitelist;
        }

        let mut child = Image {
            host: host.clone(),
            uuid: child_uuid,
            manifest,
            hash: None,
            timestamp: Utc::now(),
            origin: Some(format!("built from {}", self)),
        };
        child.save_manifest().await?;

        let archive_out = host
            .config
            .images
            .store_archives
            .then(|| child.path_join("archive"));
        let hash = child
            .write_incremental_archive(&build_diff.packlist, archive_out.as_deref())
            .await?;
        child.hash = Some(hash);
        child.seal().await?;

        tracing::info!(image = %child, "build finished");
        Ok(child)
    }
}

pub(crate) struct BuildDiff {
    /// Archive entries ("rootfs/<path>") for everything the build
    /// added, changed, or renamed into place.
    pub packlist: Vec<String>,
    pub have_deletions: bool,
}

/// Folds a dataset diff into a packing list and a deletion flag. A
/// path that was deleted and later re-added counts as present: an
/// addition always overrides a deletion, never the other way around.
pub(crate) fn compute_build_diff(diffs: &[DiffEntry], mountpoint: &Path) -> Result<BuildDiff> {
    let mut packlist = Vec::new();
    let mut deletion_map: HashMap<String, bool> = HashMap::new();

    let rel = |path: &Path| -> Result<String> {
        path.strip_prefix(mountpoint)
            .map(|r| r.to_string_lossy().into_owned())
            .map_err(|_| {
                Error::InconsistentState(format!(
                    "diff path {} is outside the dataset",
                    path.display()
                ))
            })
    };
    let pack_entry = |rel: &str| {
        if rel.is_empty() {
            "rootfs".to_string()
        } else {
            format!("rootfs/{}", rel)
        }
    };

    for diff in diffs {
        match diff {
            DiffEntry::Added(path) | DiffEntry::Modified(path) => {
                let r = rel(path)?;
                packlist.push(pack_entry(&r));
                deletion_map.insert(r, false);
            }
            DiffEntry::Renamed { from, to } => {
                let to = rel(to)?;
                packlist.push(pack_entry(&to));
                deletion_map.insert(to, false);
                deletion_map.entry(rel(from)?).or_insert(true);
            }
            DiffEntry::Removed(path) => {
                deletion_map.entry(rel(path)?).or_insert(true);
            }
        }
    }

    let have_deletions = deletion_map.values().any(|deleted| *deleted);
    Ok(BuildDiff {
        packlist,
        have_deletions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mp() -> PathBuf {
        PathBuf::from("/brig/images/x/rootfs")
    }

    fn p(rel: &str) -> PathBuf {
        mp().join(rel)
    }

    #[test]
    fn test_additions_and_modifications() {
        let diffs = vec![
            DiffEntry::Added(p("usr/local/bin/tool")),
            DiffEntry::Modified(p("etc/rc.conf")),
        ];
        let diff = compute_build_diff(&diffs, &mp()).unwrap();
        assert_eq!(
            diff.packlist,
            vec!["rootfs/usr/local/bin/tool", "rootfs/etc/rc.conf"]
        );
        assert!(!diff.have_deletions);
    }

    #[test]
    fn test_deletion_sets_flag() {
        let diffs = vec![
            DiffEntry::Added(p("new")),
            DiffEntry::Removed(p("old")),
        ];
        let diff = compute_build_diff(&diffs, &mp()).unwrap();
        assert_eq!(diff.packlist, vec!["rootfs/new"]);
        assert!(diff.have_deletions);
    }

    #[test]
    fn test_readded_path_is_not_a_deletion() {
        let diffs = vec![
            DiffEntry::Removed(p("rebuilt")),
            DiffEntry::Added(p("rebuilt")),
        ];
        let diff = compute_build_diff(&diffs, &mp()).unwrap();
        assert!(!diff.have_deletions);
    }

    #[test]
    fn test_rename_packs_target_and_deletes_source() {
        let diffs = vec![DiffEntry::Renamed {
            from: p("tool.old"),
            to: p("tool"),
        }];
        let diff = compute_build_diff(&diffs, &mp()).unwrap();
        assert_eq!(diff.packlist, vec!["rootfs/tool"]);
        assert!(diff.have_deletions);
    }

    #[test]
    fn test_rename_onto_previously_deleted_path() {
        // `old` deleted, then `tmp` renamed onto `old`: `old` is present.
        let diffs = vec![
            DiffEntry::Removed(p("old")),
            DiffEntry::Renamed {
                from: p("tmp"),
                to: p("old"),
            },
        ];
        let diff = compute_build_diff(&diffs, &mp()).unwrap();
        assert_eq!(diff.packlist, vec!["rootfs/old"]);
        // `tmp` was never in the parent snapshot's tree as far as this
        // fold knows, so its deletion marker still raises the flag.
        assert!(diff.have_deletions);
    }

    #[test]
    fn test_paths_outside_dataset_are_rejected() {
        let diffs = vec![DiffEntry::Added(PathBuf::from("/elsewhere/file"))];
        assert!(compute_build_diff(&diffs, &mp()).is_err());
    }
}
