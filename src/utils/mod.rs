pub mod error;
pub mod formats;
pub mod fs;

pub use error::{BatchError, MigratorError, MigratorResult, PartialRun, SampleError};
pub use formats::{MediaKind, kind_from_path};
pub use fs::{dir_exists, ensure_parent_dir, get_file_size, scan_media};
