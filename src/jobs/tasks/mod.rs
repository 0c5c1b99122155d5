//! Built-in connectors: a file list source and a staged file pipeline.

pub mod file_list;
pub mod file_transform;

pub use file_list::FileListSource;
pub use file_transform::{FileTransformPipeline, Transform};

/// Work unit and task state property keys shared by the file connectors.
pub mod props {
    pub const SOURCE_FILES: &str = "source.files";
    pub const SOURCE_INCREMENTAL: &str = "source.incremental";
    pub const SOURCE_FILE: &str = "source.file";
    pub const SOURCE_FILE_MTIME: &str = "source.file.mtime";
    pub const FILE_NAME: &str = "file.name";
    pub const WRITER_PREFIX: &str = "writer.";
    pub const WRITER_STAGING_DIR: &str = "writer.staging.dir";
    pub const WRITER_OUTPUT_DIR: &str = "writer.output.dir";
    pub const WRITER_STAGED_FILE: &str = "writer.staged.file";
    pub const WRITER_OUTPUT_FILE: &str = "writer.output.file";
    pub const TRANSFORM_TYPE: &str = "transform.type";
}
