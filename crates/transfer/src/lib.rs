//! File descriptors, selection validation, the upload transport seam and
//! progress formatting.

mod progress;
mod simulator;
mod types;
mod validation;

pub use progress::{calculate_eta, format_file_size, format_upload_speed};
pub use simulator::{
    NETWORK_ERROR_MESSAGE, SimulatorConfig, UploadError, UploadSimulator, UploadTransport,
};
pub use types::{
    ChunkProgress, FileContents, FileDescriptor, IMAGE_EXTENSIONS, UploadReceipt, file_extension,
    is_image_file, mime_from_extension,
};
pub use validation::{
    FileValidator, Rejection, ValidationConstraints, ValidationError, ValidationOutcome, validate,
};
