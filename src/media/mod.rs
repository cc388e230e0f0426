pub mod services;
pub mod staging;

pub use services::{remove, upload, UploadedMedia};
pub use staging::{read_form, MultipartForm, StagedFile};
