//! File pipeline
//!
//! Mill application, dedup, encryption, object-store insertion, and
//! directory DAG assembly.

pub mod dag;
pub mod mill;
pub mod pipeline;

pub use dag::{
    add_node_from_dirs, add_node_from_files, file_data, looks_like_file_node, target_node_keys,
    FileDir, Keys, DATA_LINK, FILE_LINK,
};
pub use mill::{
    detect_media, BlobMill, ImageExifMill, ImageResizeMill, Mill, MillOpts, MillResult, SchemaMill,
};
pub use pipeline::{add_file, AddFileConfig};
