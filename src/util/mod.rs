pub mod concurrency;
pub mod path;
pub mod sidecar;
pub mod tempdir;

pub use concurrency::bounded_map;
pub use path::safe_join;
pub use sidecar::sidecar_path;
pub use tempdir::ScopedTempDir;
