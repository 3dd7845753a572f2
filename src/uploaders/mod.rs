mod file;
mod tree;

pub use file::{UploadFile, UploadFileOptions};
pub use tree::{TreeOptions, UploadFileTree};
