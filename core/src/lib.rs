mod error;
mod hash;
mod manifest;
mod name;
mod pod;

pub use error::SchemaError;
pub use hash::ImageHash;
pub use manifest::{
    App, Dependency, EventHandler, HandlerKind, ImageManifest, MountPoint, labels_match,
};
pub use name::Name;
pub use pod::{Mount, PodManifest, RuntimeApp, RuntimeImage, Volume, VolumeKind};

/// Annotation carrying a pod's allocated address.
pub const ANNOTATION_IP: &str = "ip-address";

/// Annotation overriding the jail hostname (defaults to the pod UUID).
pub const ANNOTATION_HOSTNAME: &str = "hostname";

/// Annotation recording an image's build time.
pub const ANNOTATION_TIMESTAMP: &str = "timestamp";

/// Annotations with this prefix are passed through verbatim as jail.conf
/// parameters, with `-` mapped to `_` in the parameter name.
pub const JAIL_CONF_ANNOTATION_PREFIX: &str = "brig/jail.conf/";

/// Label names inherited from a parent image during a build unless the
/// child manifest sets (or explicitly empties) them.
pub const INHERITED_LABELS: &[&str] = &["os", "arch"];
