use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Image extensions eligible for thumbnail generation.
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "svg", "bmp", "webp"];

/// Where a file's bytes can be read from.
#[derive(Debug, Clone)]
pub enum FileContents {
    /// File on local disk.
    Path(PathBuf),
    /// Bytes already held in memory.
    Memory(Arc<[u8]>),
    /// Metadata only, no readable contents.
    Detached,
}

/// A user-selected file handed to the validator, thumbnailer and transport.
#[derive(Debug, Clone)]
pub struct FileDescriptor {
    pub name: String,
    pub size: u64,
    pub mime_type: String,
    pub contents: FileContents,
}

impl FileDescriptor {
    /// Descriptor without readable contents.
    pub fn detached(name: impl Into<String>, size: u64, mime_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size,
            mime_type: mime_type.into(),
            contents: FileContents::Detached,
        }
    }

    /// Descriptor backed by in-memory bytes. The MIME type is derived from
    /// the extension.
    pub fn from_bytes(name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        let name = name.into();
        let bytes: Arc<[u8]> = bytes.into();
        Self {
            mime_type: mime_from_extension(&file_extension(&name)),
            size: bytes.len() as u64,
            name,
            contents: FileContents::Memory(bytes),
        }
    }

    /// Descriptor for a file on disk, sized from its metadata.
    pub async fn from_path(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let meta = tokio::fs::metadata(path).await?;
        if !meta.is_file() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("not a regular file: {}", path.display()),
            ));
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self {
            mime_type: mime_from_extension(&file_extension(&name)),
            size: meta.len(),
            name,
            contents: FileContents::Path(path.to_path_buf()),
        })
    }

    /// Lowercased extension of the file name.
    pub fn extension(&self) -> String {
        file_extension(&self.name)
    }

    pub fn is_image(&self) -> bool {
        is_image_file(&self.name)
    }
}

/// Returns the lowercased text after the last `.`.
///
/// Empty when there is no dot, or when the only dot is the first character
/// (`.bashrc`).
pub fn file_extension(name: &str) -> String {
    match name.rfind('.') {
        Some(idx) if idx > 0 => name[idx + 1..].to_lowercase(),
        _ => String::new(),
    }
}

pub fn is_image_file(name: &str) -> bool {
    let ext = file_extension(name);
    IMAGE_EXTENSIONS.contains(&ext.as_str())
}

/// Best-effort MIME type for a lowercased extension.
pub fn mime_from_extension(ext: &str) -> String {
    if ext.is_empty() {
        return mime_guess::mime::APPLICATION_OCTET_STREAM.to_string();
    }
    mime_guess::from_ext(ext).first_or_octet_stream().to_string()
}

/// Progress report for one acknowledged chunk.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChunkProgress {
    /// Rounded percentage, 0-100.
    pub progress: u8,
    /// Bytes per second.
    pub speed: f64,
    pub uploaded_bytes: u64,
}

/// Result of a completed transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_edge_cases() {
        assert_eq!(file_extension("photo.PNG"), "png");
        assert_eq!(file_extension("archive.tar.gz"), "gz");
        assert_eq!(file_extension("README"), "");
        assert_eq!(file_extension(".bashrc"), "");
        assert_eq!(file_extension("trailing."), "");
        assert_eq!(file_extension(""), "");
    }

    #[test]
    fn image_detection() {
        assert!(is_image_file("a.JPG"));
        assert!(is_image_file("vector.svg"));
        assert!(!is_image_file("doc.pdf"));
        assert!(!is_image_file("png"));
    }

    #[test]
    fn mime_lookup() {
        assert_eq!(mime_from_extension("png"), "image/png");
        assert_eq!(mime_from_extension("pdf"), "application/pdf");
        assert_eq!(mime_from_extension("svg"), "image/svg+xml");
        assert_eq!(
            mime_from_extension("docx"),
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
        );
        assert_eq!(mime_from_extension("nosuchext"), "application/octet-stream");
        assert_eq!(mime_from_extension(""), "application/octet-stream");
    }

    #[test]
    fn from_bytes_infers_mime_and_size() {
        let f = FileDescriptor::from_bytes("notes.txt", b"hello".to_vec());
        assert_eq!(f.size, 5);
        assert_eq!(f.mime_type, "text/plain");
        assert!(matches!(f.contents, FileContents::Memory(_)));
    }

    #[tokio::test]
    async fn from_path_reads_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pic.png");
        std::fs::write(&path, [0u8; 42]).unwrap();

        let f = FileDescriptor::from_path(&path).await.unwrap();
        assert_eq!(f.name, "pic.png");
        assert_eq!(f.size, 42);
        assert_eq!(f.mime_type, "image/png");
        assert!(f.is_image());
    }

    #[tokio::test]
    async fn from_path_rejects_directories() {
        let dir = tempfile::tempdir().unwrap();
        assert!(FileDescriptor::from_path(dir.path()).await.is_err());
    }
}
