use std::time::Duration;

use serde::{Deserialize, Serialize};
use stow_store::FormatOptions;

/// Configuration for opening a [`crate::StructuredStorage`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Format version written into new image files.
    pub format_version: u32,
    /// Sector size recorded in new image files.
    pub sector_size: u32,
    /// When set, a child open that fails with access-denied is retried
    /// exactly once after this delay.
    pub sharing_retry: Option<Duration>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            format_version: 1,
            sector_size: 4096,
            sharing_retry: None,
        }
    }
}

impl StorageConfig {
    /// Default configuration with the single sharing retry enabled.
    pub fn with_sharing_retry(delay: Duration) -> Self {
        Self {
            sharing_retry: Some(delay),
            ..Default::default()
        }
    }

    pub(crate) fn format_options(&self) -> FormatOptions {
        FormatOptions {
            version: self.format_version,
            sector_size: self.sector_size,
        }
    }
}
