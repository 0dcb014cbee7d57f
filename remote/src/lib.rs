mod client;
mod discovery;
mod error;
mod location;

pub use client::FetchClient;
pub use discovery::{
    DEFAULT_ARCHIVE_TEMPLATE, DEFAULT_KEY_TEMPLATE, DiscoveredImage, discover, key_location,
};
pub use error::RemoteError;
pub use location::Location;
