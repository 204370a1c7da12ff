//! 上传模块
//!
//! - `source.rs`: 上传数据源
//! - `naming.rs`: 文件夹上传的显示名
//! - `pipeline.rs`: 单文件与文件夹上传

mod naming;
mod pipeline;
mod source;

pub use naming::{directory_display_name, FALLBACK_UPLOAD_NAME};
pub use pipeline::{
    DirectoryUploadFile, DirectoryUploadReport, DirectoryUploadRequest, FailurePolicy,
    UploadOptions, UploadPipeline, UploadRequest,
};
pub use source::{OpenedSource, UploadSource};
