use crate::hash::ImageHash;
use crate::manifest::App;
use crate::name::Name;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Pod manifest: the ordered app list, declared volumes and annotations
/// of one pod. Sealed to disk at creation and never mutated afterwards;
/// live status (jail id, dying flag) is always re-derived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodManifest {
    pub apps: Vec<RuntimeApp>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl PodManifest {
    pub fn new() -> Self {
        PodManifest {
            apps: Vec::new(),
            volumes: Vec::new(),
            annotations: BTreeMap::new(),
        }
    }

    pub fn app(&self, name: &Name) -> Option<&RuntimeApp> {
        self.apps.iter().find(|a| &a.name == name)
    }

    pub fn volume(&self, name: &str) -> Option<(usize, &Volume)> {
        self.volumes
            .iter()
            .enumerate()
            .find(|(_, v)| v.name == name)
    }
}

impl Default for PodManifest {
    fn default() -> Self {
        Self::new()
    }
}

/// One app instance in a pod, bound to an image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeApp {
    pub name: Name,
    pub image: RuntimeImage,

    /// Overrides the image manifest's app descriptor when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<App>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mounts: Vec<Mount>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// Image reference as recorded in a pod manifest. After reification the
/// `id` is always populated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeImage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<Name>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ImageHash>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

/// Binding of a declared volume to one of the image's mount points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mount {
    pub volume: String,
    pub mount_point: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    pub name: String,

    #[serde(flatten)]
    pub kind: VolumeKind,

    #[serde(default)]
    pub read_only: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum VolumeKind {
    /// Fresh writable dataset created with the pod, destroyed with it.
    Empty,
    /// Bind of an existing host path.
    Host { source: PathBuf },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volume_kind_tagging() {
        let empty = Volume {
            name: "work".into(),
            kind: VolumeKind::Empty,
            read_only: false,
        };
        let json = serde_json::to_value(&empty).unwrap();
        assert_eq!(json["kind"], "empty");

        let host = Volume {
            name: "src".into(),
            kind: VolumeKind::Host {
                source: PathBuf::from("/usr/src"),
            },
            read_only: true,
        };
        let json = serde_json::to_value(&host).unwrap();
        assert_eq!(json["kind"], "host");
        assert_eq!(json["source"], "/usr/src");

        let back: Volume = serde_json::from_value(json).unwrap();
        assert_eq!(back, host);
    }

    #[test]
    fn test_pod_manifest_round_trip() {
        let mut pm = PodManifest::new();
        pm.apps.push(RuntimeApp {
            name: Name::parse("worker").unwrap(),
            image: RuntimeImage {
                name: Some(Name::parse("example.com/worker").unwrap()),
                id: Some(ImageHash::from_digest_hex(&"cd".repeat(64)).unwrap()),
                labels: BTreeMap::new(),
            },
            app: None,
            mounts: vec![Mount {
                volume: "spool".into(),
                mount_point: "spool".into(),
            }],
            annotations: BTreeMap::new(),
        });
        pm.volumes.push(Volume {
            name: "spool".into(),
            kind: VolumeKind::Empty,
            read_only: false,
        });
        pm.annotations
            .insert(crate::ANNOTATION_IP.into(), "172.23.0.2".into());

        let json = serde_json::to_string(&pm).unwrap();
        let back: PodManifest = serde_json::from_str(&json).unwrap();
        assert_eq!(pm, back);

        let worker = Name::parse("worker").unwrap();
        assert!(back.app(&worker).is_some());
        assert_eq!(back.volume("spool").unwrap().0, 0);
    }
}
