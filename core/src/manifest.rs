use crate::hash::ImageHash;
use crate::name::Name;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Image manifest: the declared identity and runnable surface of an
/// image. Written once during import or build, immutable after seal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageManifest {
    pub name: Name,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<Dependency>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<App>,

    /// When non-empty, the exhaustive list of paths present in this
    /// image's rootfs. Anything in a parent layer but absent here was
    /// deleted by this layer.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub path_whitelist: Vec<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl ImageManifest {
    pub fn new(name: Name) -> Self {
        ImageManifest {
            name,
            labels: BTreeMap::new(),
            dependencies: Vec::new(),
            app: None,
            path_whitelist: Vec::new(),
            annotations: BTreeMap::new(),
        }
    }
}

/// Reference to another image this image is layered on: by name plus
/// label constraints, optionally pinned to an exact hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dependency {
    pub name: Name,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ImageHash>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

/// The single runnable app an image may declare.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct App {
    pub exec: Vec<String>,

    #[serde(default)]
    pub user: String,

    #[serde(default)]
    pub group: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub working_directory: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mount_points: Vec<MountPoint>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub event_handlers: Vec<EventHandler>,
}

impl App {
    pub fn new(exec: Vec<String>) -> Self {
        App {
            exec,
            user: String::new(),
            group: String::new(),
            working_directory: String::new(),
            environment: BTreeMap::new(),
            mount_points: Vec::new(),
            event_handlers: Vec::new(),
        }
    }

    pub fn handler(&self, kind: HandlerKind) -> Option<&EventHandler> {
        self.event_handlers.iter().find(|eh| eh.name == kind)
    }
}

/// Mount location an image expects to have fulfilled by a pod volume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MountPoint {
    pub name: String,
    pub path: String,

    #[serde(default)]
    pub read_only: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventHandler {
    pub name: HandlerKind,
    pub exec: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HandlerKind {
    #[serde(rename = "pre-start")]
    PreStart,
    #[serde(rename = "post-stop")]
    PostStop,
}

/// Label-subset match: every requested label must be present in `actual`
/// with the same value. An empty request matches anything.
pub fn labels_match(
    requested: &BTreeMap<String, String>,
    actual: &BTreeMap<String, String>,
) -> bool {
    requested
        .iter()
        .all(|(k, v)| actual.get(k).is_some_and(|a| a == v))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_labels_match() {
        let actual = labels(&[("os", "freebsd"), ("arch", "amd64"), ("version", "1.2")]);

        assert!(labels_match(&labels(&[]), &actual));
        assert!(labels_match(&labels(&[("os", "freebsd")]), &actual));
        assert!(labels_match(
            &labels(&[("os", "freebsd"), ("arch", "amd64")]),
            &actual
        ));
        assert!(!labels_match(&labels(&[("os", "linux")]), &actual));
        assert!(!labels_match(&labels(&[("channel", "stable")]), &actual));
    }

    #[test]
    fn test_manifest_round_trip() {
        let mut manifest = ImageManifest::new(Name::parse("example.com/worker").unwrap());
        manifest.labels = labels(&[("os", "freebsd"), ("arch", "amd64")]);
        manifest.dependencies.push(Dependency {
            name: Name::parse("example.com/base").unwrap(),
            id: Some(ImageHash::from_digest_hex(&"ab".repeat(64)).unwrap()),
            labels: labels(&[("os", "freebsd")]),
        });
        let mut app = App::new(vec!["/usr/local/bin/worker".into(), "-f".into()]);
        app.user = "worker".into();
        app.event_handlers.push(EventHandler {
            name: HandlerKind::PostStop,
            exec: vec!["/bin/sh".into(), "-c".into(), "cleanup".into()],
        });
        app.mount_points.push(MountPoint {
            name: "spool".into(),
            path: "/var/spool/worker".into(),
            read_only: false,
        });
        manifest.app = Some(app);

        let json = serde_json::to_string(&manifest).unwrap();
        let back: ImageManifest = serde_json::from_str(&json).unwrap();
        assert_eq!(manifest, back);
    }

    #[test]
    fn test_manifest_defaults() {
        let manifest: ImageManifest =
            serde_json::from_str(r#"{"name": "example.com/minimal"}"#).unwrap();
        assert!(manifest.dependencies.is_empty());
        assert!(manifest.app.is_none());
        assert!(manifest.path_whitelist.is_empty());
    }

    #[test]
    fn test_handler_lookup() {
        let mut app = App::new(vec!["/bin/true".into()]);
        app.event_handlers.push(EventHandler {
            name: HandlerKind::PreStart,
            exec: vec!["/bin/echo".into(), "hi".into()],
        });
        assert!(app.handler(HandlerKind::PreStart).is_some());
        assert!(app.handler(HandlerKind::PostStop).is_none());
    }
}
