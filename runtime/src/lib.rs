mod app;
mod archive;
mod build;
mod config;
mod error;
mod host;
mod image;
mod jail;
mod mds;
mod passwd;
mod pod;

pub use app::AppHandle;
pub use config::{Compression, HostConfig, ImagesConfig, MdsConfig};
pub use error::{Error, Result};
pub use host::Host;
pub use image::Image;
pub use jail::JailStatus;
pub use pod::{Pod, PodStatus};
