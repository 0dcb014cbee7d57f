use crate::config::HostConfig;
use crate::error::{Error, Result};
use crate::host::{Host, PODS_DIR};
use crate::jail;
use brig_core::{
    ANNOTATION_HOSTNAME, ANNOTATION_IP, Dependency, JAIL_CONF_ANNOTATION_PREFIX, Mount,
    PodManifest, Volume, VolumeKind,
};
use brig_dataset::{Dataset, DatasetError};
use brig_runner::Command;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const JAIL: &str = "/usr/sbin/jail";

/// Snapshot of each app rootfs taken right after the clone, before
/// anything ran inside it. The build pipeline diffs against it.
pub(crate) const PARENT_SNAPSHOT: &str = "parent";

const POLL_INTERVAL: Duration = Duration::from_millis(250);
const START_POLL_LIMIT: u32 = 40;
const KILL_POLL_LIMIT: u32 = 240;

/// Derived pod state. `stopped`: no jail id exists; `dying`: the kernel
/// is tearing the jail down; `running` otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodStatus {
    Stopped,
    Dying,
    Running,
}

impl fmt::Display for PodStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PodStatus::Stopped => "stopped",
            PodStatus::Dying => "dying",
            PodStatus::Running => "running",
        })
    }
}

/// One pod: a sealed manifest plus the dataset subtree instantiated
/// from it. Everything mutable about a pod (jail id, dying flag) is
/// derived from the kernel, never stored.
pub struct Pod {
    pub(crate) host: Arc<Host>,
    pub uuid: Uuid,
    pub manifest: PodManifest,
}

impl Pod {
    pub(crate) async fn load(host: &Arc<Host>, uuid: Uuid) -> Result<Pod> {
        let dir = host.path(format!("{}/{}", PODS_DIR, uuid));
        let bytes = match tokio::fs::read(dir.join("manifest")).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(format!("pod {}", uuid)));
            }
            Err(e) => return Err(e.into()),
        };
        let manifest: PodManifest = serde_json::from_slice(&bytes)?;
        if manifest.apps.is_empty() {
            return Err(Error::InconsistentState(format!(
                "pod {} record has no apps",
                uuid
            )));
        }
        Ok(Pod {
            host: host.clone(),
            uuid,
            manifest,
        })
    }

    /// Creates the pod's on-disk state from a reified manifest: dataset
    /// subtree, volumes, per-app rootfs clones, allocated address,
    /// persisted manifest/fstab/jail.conf. Any failure destroys the
    /// partial subtree before the error is returned.
    pub(crate) async fn create(host: &Arc<Host>, manifest: PodManifest) -> Result<Pod> {
        if manifest.apps.is_empty() {
            return Err(Error::UsageError("pod manifest has no apps".to_string()));
        }

        let uuid = Uuid::new_v4();
        tracing::info!(pod = %uuid, "creating pod");
        let ds = host
            .dataset
            .create_child(&format!("{}/{}", PODS_DIR, uuid), &[])
            .await?;

        let mut pod = Pod {
            host: host.clone(),
            uuid,
            manifest,
        };
        match pod.populate(&ds).await {
            Ok(()) => Ok(pod),
            Err(e) => {
                if let Err(cleanup) = ds.destroy().await {
                    tracing::warn!(pod = %uuid, error = %cleanup, "cleanup of partial pod dataset failed");
                }
                if let Err(cleanup) = tokio::fs::remove_dir_all(&ds.mountpoint).await
                    && cleanup.kind() != std::io::ErrorKind::NotFound
                {
                    tracing::warn!(pod = %uuid, error = %cleanup, "cleanup of partial pod record failed");
                }
                Err(e)
            }
        }
    }

    async fn populate(&mut self, ds: &Dataset) -> Result<()> {
        tokio::fs::create_dir_all(ds.path("rootfs")).await?;

        let volumes = self.manifest.volumes.clone();
        for (i, volume) in volumes.iter().enumerate() {
            if volume.kind == VolumeKind::Empty {
                tracing::debug!(pod = %self.uuid, volume = %volume.name, index = i, "creating volume dataset");
                tokio::fs::create_dir_all(ds.path("volumes")).await?;
                let mountpoint = ds.path(format!("volumes/{}", i)).display().to_string();
                let volume_ds = ds
                    .create_child(&format!("volume.{}", i), &[("mountpoint", mountpoint.as_str())])
                    .await?;
                volume_ds.set("brig:name", &volume.name).await?;
            }
        }

        let apps = self.manifest.apps.clone();
        for (i, rtapp) in apps.iter().enumerate() {
            let Some(id) = &rtapp.image.id else {
                return Err(Error::UsageError(format!(
                    "app {} has no image hash; reify the manifest first",
                    rtapp.name
                )));
            };
            let image = self.host.image_by_hash(id).await?;
            tracing::debug!(pod = %self.uuid, app = %rtapp.name, image = %image, "cloning rootfs");

            let root_ds = image
                .clone_rootfs(
                    &ds.child_name(&format!("rootfs.{}", i)),
                    &ds.path(format!("rootfs/{}", i)),
                )
                .await?;
            root_ds.set("brig:name", rtapp.name.as_str()).await?;
            root_ds.snapshot(PARENT_SNAPSHOT).await?;

            // By-name alias for the numbered rootfs, e.g.
            // rootfs/app/worker/rootfs -> ../../0
            let app_dir = ds.path(format!("rootfs/app/{}", rtapp.name));
            tokio::fs::create_dir_all(&app_dir).await?;
            let depth = rtapp.name.as_str().split('/').count() + 1;
            let mut target = PathBuf::new();
            for _ in 0..depth {
                target.push("..");
            }
            target.push(i.to_string());
            std::os::unix::fs::symlink(&target, app_dir.join("rootfs"))?;

            if let Some(app) = rtapp.app.as_ref().or(image.manifest.app.as_ref()) {
                for mount_point in &app.mount_points {
                    tokio::fs::create_dir_all(root_ds.path(&mount_point.path)).await?;
                }
            }
            if image.manifest.labels.get("os").map(String::as_str) == Some("linux") {
                for dir in ["sys", "proc"] {
                    tokio::fs::create_dir_all(root_ds.path(dir)).await?;
                }
            }
        }

        let ip = self.host.next_ip().await?;
        tracing::debug!(pod = %self.uuid, %ip, "allocated address");
        self.manifest
            .annotations
            .insert(ANNOTATION_IP.to_string(), ip.to_string());

        tokio::fs::write(
            ds.path("manifest"),
            serde_json::to_vec_pretty(&self.manifest)?,
        )
        .await?;
        self.prep_jail().await?;
        Ok(())
    }

    pub fn path(&self) -> PathBuf {
        self.host.path(format!("{}/{}", PODS_DIR, self.uuid))
    }

    pub fn path_join(&self, rel: impl AsRef<Path>) -> PathBuf {
        self.path().join(rel)
    }

    pub fn jail_name(&self) -> String {
        format!("{}{}", self.host.config.jail_name_prefix, self.uuid)
    }

    // Status
    //////////////////////////////////////////////////////////////////////

    pub async fn status(&self) -> Result<PodStatus> {
        self.status_refreshed(false).await
    }

    pub(crate) async fn status_refreshed(&self, refresh: bool) -> Result<PodStatus> {
        Ok(
            match self.host.jail_status(&self.jail_name(), refresh).await? {
                None => PodStatus::Stopped,
                Some(status) if status.dying => PodStatus::Dying,
                Some(_) => PodStatus::Running,
            },
        )
    }

    pub async fn jid(&self) -> Result<i32> {
        self.jid_refreshed(false).await
    }

    async fn jid_refreshed(&self, refresh: bool) -> Result<i32> {
        Ok(self
            .host
            .jail_status(&self.jail_name(), refresh)
            .await?
            .map(|status| status.jid)
            .unwrap_or(0))
    }

    // Jail lifecycle
    //////////////////////////////////////////////////////////////////////

    /// Writes the fstab, per-app resolv.conf, and jail.conf.
    pub(crate) async fn prep_jail(&self) -> Result<()> {
        let mut fstab = String::new();

        for (i, rtapp) in self.manifest.apps.iter().enumerate() {
            let root = self.path_join(format!("rootfs/{}", i));
            fstab.push_str(&format!(
                ". {} devfs ruleset=4 0 0\n",
                root.join("dev").display()
            ));

            let Some(id) = &rtapp.image.id else {
                return Err(Error::UsageError(format!(
                    "app {} has no image hash",
                    rtapp.name
                )));
            };
            let image = self.host.image_by_hash(id).await?;

            if image.manifest.labels.get("os").map(String::as_str) == Some("linux") {
                fstab.push_str(&format!(
                    "linsys {} linsysfs rw 0 0\n",
                    root.join("sys").display()
                ));
                fstab.push_str(&format!(
                    "linproc {} linprocfs rw 0 0\n",
                    root.join("proc").display()
                ));
            }

            self.write_resolv_conf(&root).await?;
            tokio::fs::create_dir_all(root.join("dev")).await?;

            let Some(app) = rtapp.app.as_ref().or(image.manifest.app.as_ref()) else {
                if !rtapp.mounts.is_empty() {
                    return Err(Error::UsageError(format!(
                        "app {} declares mounts but has no app descriptor",
                        rtapp.name
                    )));
                }
                continue;
            };

            let mut fulfilled: HashSet<&str> = HashSet::new();
            for mount in &rtapp.mounts {
                let Some((volume_index, volume)) = self.manifest.volume(&mount.volume) else {
                    return Err(Error::NotFound(format!(
                        "volume {} (wanted by app {})",
                        mount.volume, rtapp.name
                    )));
                };
                let Some(mount_point) = app
                    .mount_points
                    .iter()
                    .find(|mp| mp.name == mount.mount_point)
                else {
                    return Err(Error::NotFound(format!(
                        "mount point {} in app {}",
                        mount.mount_point, rtapp.name
                    )));
                };
                fulfilled.insert(mount_point.name.as_str());

                let pod_path = join_abs(&root, &mount_point.path);
                let host_path = match &volume.kind {
                    VolumeKind::Host { source } => source.clone(),
                    VolumeKind::Empty => {
                        let volume_path = self.path_join(format!("volumes/{}", volume_index));
                        // Carry the image's mount point mode over to the
                        // fresh volume.
                        if let Ok(meta) = tokio::fs::metadata(&pod_path).await {
                            let _ =
                                tokio::fs::set_permissions(&volume_path, meta.permissions()).await;
                        }
                        volume_path
                    }
                };
                let read_only = volume.read_only || mount_point.read_only;
                fstab.push_str(&nullfs_line(&host_path, &pod_path, read_only));
            }

            let unfulfilled: Vec<&str> = app
                .mount_points
                .iter()
                .filter(|mp| !fulfilled.contains(mp.name.as_str()))
                .map(|mp| mp.name.as_str())
                .collect();
            if !unfulfilled.is_empty() {
                return Err(Error::UsageError(format!(
                    "unfulfilled mount points for {}: {}",
                    image.manifest.name,
                    unfulfilled.join(", ")
                )));
            }
        }

        tokio::fs::write(self.path_join("fstab"), fstab).await?;

        let params = jail_parameters(
            &self.uuid,
            &self.host.config,
            &self.manifest.annotations,
            &self.path_join("rootfs"),
            &self.path_join("fstab"),
        )?;
        let conf = jail::render_jail_conf(&self.jail_name(), &params);
        tokio::fs::write(self.path_join("jail.conf"), conf).await?;
        Ok(())
    }

    async fn write_resolv_conf(&self, root: &Path) -> Result<()> {
        tokio::fs::create_dir_all(root.join("etc")).await?;
        let content = match &self.host.config.dns_servers {
            Some(servers) => servers
                .split_whitespace()
                .map(|server| format!("nameserver {}\n", server))
                .collect::<String>()
                .into_bytes(),
            None => tokio::fs::read("/etc/resolv.conf").await?,
        };
        tokio::fs::write(root.join("etc/resolv.conf"), content).await?;
        Ok(())
    }

    async fn run_jail(&self, op: &str) -> Result<()> {
        self.prep_jail().await?;
        Command::new(JAIL)
            .arg("-f")
            .arg_path(self.path_join("jail.conf"))
            .arg("-q")
            .arg(op)
            .arg(self.jail_name())
            .run()
            .await?;
        Ok(())
    }

    /// Ensures the jail exists, polling until a jail id appears.
    pub async fn start(&self) -> Result<i32> {
        let jid = self.jid().await?;
        if jid != 0 {
            return Ok(jid);
        }

        tracing::info!(pod = %self.uuid, "starting jail");
        self.run_jail("-c").await?;

        for _ in 0..START_POLL_LIMIT {
            let jid = self.jid_refreshed(true).await?;
            if jid != 0 {
                return Ok(jid);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        Err(Error::InconsistentState(format!(
            "jail {} did not come up",
            self.jail_name()
        )))
    }

    /// Idempotent shutdown: a stopped pod returns immediately, a running
    /// jail is removed, a dying one is waited out. Status is re-read
    /// from the kernel every iteration; the cache is never trusted here.
    pub async fn kill(&self) -> Result<()> {
        tracing::info!(pod = %self.uuid, "shutting down");
        let mut iterations = 0;
        loop {
            match self.status_refreshed(true).await? {
                PodStatus::Stopped => return Ok(()),
                PodStatus::Running => self.run_jail("-r").await?,
                PodStatus::Dying => tokio::time::sleep(POLL_INTERVAL).await,
            }
            iterations += 1;
            if iterations > KILL_POLL_LIMIT {
                return Err(Error::InconsistentState(format!(
                    "jail {} refuses to die",
                    self.jail_name()
                )));
            }
        }
    }

    /// Kills the pod if its jail is live, then removes its dataset
    /// subtree and on-disk record. Cleanup continues past errors; the
    /// first one is reported.
    pub async fn destroy(self) -> Result<()> {
        tracing::info!(pod = %self.uuid, "destroying");
        let mut first_error: Option<Error> = None;

        match self.jid_refreshed(true).await {
            Ok(0) => {}
            Ok(_) => {
                if let Err(e) = self.kill().await {
                    first_error.get_or_insert(e);
                }
            }
            Err(e) => {
                first_error.get_or_insert(e);
            }
        }

        match self
            .host
            .dataset
            .get_child(&format!("{}/{}", PODS_DIR, self.uuid))
            .await
        {
            Ok(ds) => {
                if let Err(e) = ds.destroy().await {
                    first_error.get_or_insert(e.into());
                }
            }
            Err(DatasetError::NotFound(_)) => {}
            Err(e) => {
                first_error.get_or_insert(e.into());
            }
        }

        if let Err(e) = tokio::fs::remove_dir_all(self.path()).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            first_error.get_or_insert(e.into());
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// The jail.conf parameter set for one pod: fixed isolation parameters,
/// configured defaults, then annotation-sourced overrides, later layers
/// winning.
pub(crate) fn jail_parameters(
    uuid: &Uuid,
    config: &HostConfig,
    annotations: &BTreeMap<String, String>,
    rootfs: &Path,
    fstab: &Path,
) -> Result<BTreeMap<String, String>> {
    let mut params = BTreeMap::new();
    params.insert("exec.clean".to_string(), "true".to_string());
    params.insert("persist".to_string(), "true".to_string());
    params.insert("host.hostuuid".to_string(), uuid.to_string());
    params.insert("interface".to_string(), config.jail_interface.clone());
    params.insert("path".to_string(), rootfs.display().to_string());
    params.insert("mount.fstab".to_string(), fstab.display().to_string());

    for (key, value) in &config.jail_parameters {
        params.insert(key.clone(), value.clone());
    }

    let hostname = annotations
        .get(ANNOTATION_HOSTNAME)
        .cloned()
        .unwrap_or_else(|| uuid.to_string());
    params.insert("host.hostname".to_string(), hostname);

    let ip = annotations.get(ANNOTATION_IP).ok_or_else(|| {
        Error::InconsistentState(format!("pod {} has no recorded address", uuid))
    })?;
    params.insert("ip4.addr".to_string(), ip.clone());

    for (key, value) in annotations {
        if let Some(param) = key.strip_prefix(JAIL_CONF_ANNOTATION_PREFIX) {
            params.insert(param.replace('-', "_"), value.clone());
        }
    }

    Ok(params)
}

fn nullfs_line(host_path: &Path, pod_path: &Path, read_only: bool) -> String {
    format!(
        "{} {} nullfs {} 0 0\n",
        host_path.display(),
        pod_path.display(),
        if read_only { "ro" } else { "rw" }
    )
}

/// Joins an in-image absolute path under an app rootfs.
fn join_abs(root: &Path, rel: &str) -> PathBuf {
    root.join(rel.trim_start_matches('/'))
}

/// Resolves each app's image reference to a hash and inserts omitted
/// mounts and volumes for the image's declared mount points, so the
/// manifest that gets sealed is fully explicit.
pub(crate) async fn reify(host: &Arc<Host>, manifest: &mut PodManifest) -> Result<()> {
    for i in 0..manifest.apps.len() {
        let rtapp = manifest.apps[i].clone();
        let dep = Dependency {
            name: rtapp.image.name.clone().unwrap_or_else(|| rtapp.name.clone()),
            id: rtapp.image.id.clone(),
            labels: rtapp.image.labels.clone(),
        };
        let image = host.resolve_dependency(&dep).await?;
        manifest.apps[i].image.id = image.hash.clone();
        manifest.apps[i].image.name = Some(image.manifest.name.clone());

        let Some(app) = rtapp.app.clone().or_else(|| image.manifest.app.clone()) else {
            if !rtapp.mounts.is_empty() {
                return Err(Error::UsageError(format!(
                    "app {} declares mounts but has no app descriptor",
                    rtapp.name
                )));
            }
            continue;
        };

        for mount_point in &app.mount_points {
            let existing = manifest.apps[i]
                .mounts
                .iter()
                .find(|m| m.mount_point == mount_point.name)
                .cloned();
            let mount = match existing {
                Some(mount) => mount,
                None => {
                    tracing::info!(
                        app = %rtapp.name,
                        mount_point = %mount_point.name,
                        "inserting implicit mount"
                    );
                    let mount = Mount {
                        volume: mount_point.name.clone(),
                        mount_point: mount_point.name.clone(),
                    };
                    manifest.apps[i].mounts.push(mount.clone());
                    mount
                }
            };
            if manifest.volume(&mount.volume).is_none() {
                tracing::info!(volume = %mount.volume, "inserting implicit empty volume");
                manifest.volumes.push(Volume {
                    name: mount.volume.clone(),
                    kind: VolumeKind::Empty,
                    read_only: false,
                });
            }
        }
    }
    Ok(())
}
