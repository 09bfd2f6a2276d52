//! Archive streaming between host paths and exec backends.

mod chunk;
mod tar;

pub use self::chunk::stream_bytes;
pub use self::tar::{Placement, SingleEntry, pack_file_bytes, pack_path, read_single_entry, unpack};

use std::path::PathBuf;

use dockhand_shared::errors::TransferDirection;
use serde::{Deserialize, Serialize};

/// A completed copy between host and container.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyDescriptor {
    /// Host path for uploads, container path for downloads.
    pub source: String,
    pub destination: String,
    pub direction: TransferDirection,
    pub is_dir: bool,
}

impl CopyDescriptor {
    /// Host side of the copy.
    pub fn host_path(&self) -> PathBuf {
        match self.direction {
            TransferDirection::HostToContainer => PathBuf::from(&self.source),
            TransferDirection::ContainerToHost => PathBuf::from(&self.destination),
        }
    }

    /// Container side of the copy.
    pub fn container_path(&self) -> &str {
        match self.direction {
            TransferDirection::HostToContainer => &self.destination,
            TransferDirection::ContainerToHost => &self.source,
        }
    }
}
