// Construction-time failures. Per-step errors never surface here: a
// misbehaving peripheral or a failed disk access is confined to that
// component's own register state.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmulatorError {
    #[error("SDRAM size {requested} bytes exceeds the 32 MiB PP5021C window")]
    SdramTooLarge { requested: usize },

    #[error("IRAM image of {size} bytes does not fit in the 128 KiB IRAM region")]
    IramImageTooLarge { size: usize },

    #[error("SDRAM image of {size} bytes does not fit in the configured {sdram_size} byte SDRAM region")]
    SdramImageTooLarge { size: usize, sdram_size: usize },

    #[error("failed to read firmware image {path}: {source}")]
    FirmwareRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to open disk image {path}: {source}")]
    DiskOpen {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, EmulatorError>;
