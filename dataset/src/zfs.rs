use crate::diff::{DiffEntry, parse_diff_line};
use crate::error::DatasetError;
use brig_runner::{Command, RunnerError};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const ZFS: &str = "/sbin/zfs";

/// Handle on a ZFS dataset: a versioned, copy-on-write subtree mapped to
/// a filesystem mountpoint. All operations shell out to `zfs`; atomicity
/// across invocations is whatever the individual zfs operations provide.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub name: String,
    pub mountpoint: PathBuf,
}

/// Read-only snapshot of a dataset, the clone source for new layers.
/// `clone` here is the ZFS verb, not `Clone::clone`.
#[derive(Debug)]
pub struct Snapshot {
    pub dataset: String,
    pub tag: String,
}

fn is_not_found(err: &RunnerError) -> bool {
    matches!(err, RunnerError::Failed { stderr, .. } if stderr.contains("does not exist"))
}

fn zfs_error(name: &str, err: RunnerError) -> DatasetError {
    if is_not_found(&err) {
        DatasetError::NotFound(name.to_string())
    } else {
        DatasetError::Command(err)
    }
}

pub(crate) fn parse_properties(output: &str) -> Result<BTreeMap<String, String>, DatasetError> {
    let mut props = BTreeMap::new();
    for line in output.lines() {
        let (key, value) = line
            .split_once('\t')
            .ok_or_else(|| DatasetError::Parse(line.to_string()))?;
        props.insert(key.to_string(), value.to_string());
    }
    Ok(props)
}

impl Dataset {
    pub async fn get(name: &str) -> Result<Self, DatasetError> {
        let out = Command::new(ZFS)
            .args(["get", "-Hp", "-o", "property,value", "type,mountpoint", name])
            .output_string()
            .await
            .map_err(|e| zfs_error(name, e))?;
        let props = parse_properties(&out)?;
        let mountpoint = props
            .get("mountpoint")
            .ok_or_else(|| DatasetError::Parse(out.clone()))?;
        Ok(Dataset {
            name: name.to_string(),
            mountpoint: PathBuf::from(mountpoint),
        })
    }

    pub async fn create(name: &str, options: &[(&str, &str)]) -> Result<Self, DatasetError> {
        let mut cmd = Command::new(ZFS).args(["create", "-p"]);
        for (key, value) in options {
            cmd = cmd.arg("-o").arg(format!("{}={}", key, value));
        }
        cmd.arg(name).run().await?;
        Self::get(name).await
    }

    pub fn child_name(&self, rel: &str) -> String {
        format!("{}/{}", self.name, rel)
    }

    /// Joins `rel` under the mountpoint. A leading `/` on `rel` is
    /// stripped, so in-image absolute paths land inside the dataset.
    pub fn path(&self, rel: impl AsRef<Path>) -> PathBuf {
        let rel = rel.as_ref();
        match rel.strip_prefix("/") {
            Ok(stripped) => self.mountpoint.join(stripped),
            Err(_) => self.mountpoint.join(rel),
        }
    }

    pub async fn create_child(
        &self,
        rel: &str,
        options: &[(&str, &str)],
    ) -> Result<Self, DatasetError> {
        Self::create(&self.child_name(rel), options).await
    }

    pub async fn get_child(&self, rel: &str) -> Result<Self, DatasetError> {
        Self::get(&self.child_name(rel)).await
    }

    pub async fn set(&self, property: &str, value: &str) -> Result<(), DatasetError> {
        Command::new(ZFS)
            .arg("set")
            .arg(format!("{}={}", property, value))
            .arg(self.name.as_str())
            .run()
            .await
            .map_err(|e| zfs_error(&self.name, e))
    }

    pub async fn get_property(&self, property: &str) -> Result<String, DatasetError> {
        Command::new(ZFS)
            .args(["get", "-Hp", "-o", "value"])
            .arg(property)
            .arg(self.name.as_str())
            .output_string()
            .await
            .map_err(|e| zfs_error(&self.name, e))
    }

    pub async fn snapshot(&self, tag: &str) -> Result<Snapshot, DatasetError> {
        let snapshot = Snapshot {
            dataset: self.name.clone(),
            tag: tag.to_string(),
        };
        Command::new(ZFS)
            .arg("snapshot")
            .arg(snapshot.full_name())
            .run()
            .await
            .map_err(|e| zfs_error(&self.name, e))?;
        Ok(snapshot)
    }

    pub async fn get_snapshot(&self, tag: &str) -> Result<Snapshot, DatasetError> {
        let snapshot = Snapshot {
            dataset: self.name.clone(),
            tag: tag.to_string(),
        };
        let full = snapshot.full_name();
        Command::new(ZFS)
            .args(["get", "-Hp", "-o", "value", "type"])
            .arg(full.as_str())
            .output_string()
            .await
            .map_err(|e| zfs_error(&full, e))?;
        Ok(snapshot)
    }

    /// Renames the dataset in place and reloads its mountpoint.
    pub async fn rename(&mut self, new_name: &str) -> Result<(), DatasetError> {
        Command::new(ZFS)
            .arg("rename")
            .arg(self.name.as_str())
            .arg(new_name)
            .run()
            .await
            .map_err(|e| zfs_error(&self.name, e))?;
        let reloaded = Self::get(new_name).await?;
        self.name = reloaded.name;
        self.mountpoint = reloaded.mountpoint;
        Ok(())
    }

    /// Recursive destroy of the dataset, its snapshots and children.
    pub async fn destroy(&self) -> Result<(), DatasetError> {
        tracing::debug!(dataset = %self.name, "destroying dataset");
        Command::new(ZFS)
            .args(["destroy", "-r"])
            .arg(self.name.as_str())
            .run()
            .await
            .map_err(|e| zfs_error(&self.name, e))
    }

    /// Changes between `snapshot` and the live dataset.
    pub async fn diff(&self, snapshot: &Snapshot) -> Result<Vec<DiffEntry>, DatasetError> {
        let lines = Command::new(ZFS)
            .args(["diff", "-H"])
            .arg(snapshot.full_name())
            .output_lines()
            .await
            .map_err(|e| zfs_error(&self.name, e))?;
        lines.iter().map(|l| parse_diff_line(l)).collect()
    }
}

impl Snapshot {
    pub fn full_name(&self) -> String {
        format!("{}@{}", self.dataset, self.tag)
    }

    /// Clones the snapshot into a new dataset, optionally forcing its
    /// mountpoint.
    pub async fn clone(
        &self,
        dest: &str,
        mountpoint: Option<&Path>,
    ) -> Result<Dataset, DatasetError> {
        let mut cmd = Command::new(ZFS).arg("clone");
        if let Some(mp) = mountpoint {
            cmd = cmd
                .arg("-o")
                .arg(format!("mountpoint={}", mp.display()));
        }
        cmd.arg(self.full_name())
            .arg(dest)
            .run()
            .await
            .map_err(|e| zfs_error(&self.full_name(), e))?;
        Dataset::get(dest).await
    }

    pub async fn destroy(&self) -> Result<(), DatasetError> {
        Command::new(ZFS)
            .arg("destroy")
            .arg(self.full_name())
            .run()
            .await
            .map_err(|e| zfs_error(&self.full_name(), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Dataset {
        Dataset {
            name: "zroot/brig/pods/abc".to_string(),
            mountpoint: PathBuf::from("/brig/pods/abc"),
        }
    }

    #[test]
    fn test_child_name() {
        assert_eq!(sample().child_name("rootfs.0"), "zroot/brig/pods/abc/rootfs.0");
    }

    #[test]
    fn test_path_joins_under_mountpoint() {
        let ds = sample();
        assert_eq!(ds.path("manifest"), PathBuf::from("/brig/pods/abc/manifest"));
        assert_eq!(
            ds.path("/etc/resolv.conf"),
            PathBuf::from("/brig/pods/abc/etc/resolv.conf")
        );
    }

    #[test]
    fn test_snapshot_full_name() {
        let snap = Snapshot {
            dataset: "zroot/brig/images/xyz".to_string(),
            tag: "seal".to_string(),
        };
        assert_eq!(snap.full_name(), "zroot/brig/images/xyz@seal");
    }

    #[test]
    fn test_parse_properties() {
        let props =
            parse_properties("type\tfilesystem\nmountpoint\t/brig/images/xyz").unwrap();
        assert_eq!(props["type"], "filesystem");
        assert_eq!(props["mountpoint"], "/brig/images/xyz");
        assert!(parse_properties("no-tab-here").is_err());
    }

    #[test]
    fn test_not_found_detection() {
        let err = RunnerError::Failed {
            command: "/sbin/zfs get".into(),
            status: 1,
            stderr: "cannot open 'zroot/nope': dataset does not exist".into(),
        };
        assert!(is_not_found(&err));

        let err = RunnerError::Failed {
            command: "/sbin/zfs get".into(),
            status: 1,
            stderr: "permission denied".into(),
        };
        assert!(!is_not_found(&err));
    }
}
