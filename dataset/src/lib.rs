mod diff;
mod error;
mod zfs;

pub use diff::DiffEntry;
pub use error::DatasetError;
pub use zfs::{Dataset, Snapshot};
