//! Avatar file intake and cleanup.
//!
//! Uploaded avatars are written to a single directory under generated names
//! of the form `<field>-<unix millis><.ext>`.

use actix_web::web::Bytes;
use futures_util::{Stream, StreamExt};
use std::fmt::Display;
use std::io;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Multipart field carrying the avatar file
pub const AVATAR_FIELD: &str = "avatar";

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Multipart error: {0}")]
    Multipart(String),

    #[error("Failed to store avatar: {0}")]
    Io(#[from] io::Error),

    #[error("No avatar file was uploaded")]
    MissingFile,

    #[error("Unexpected file field: {0}")]
    UnexpectedField(String),

    #[error("Field {0} exceeds the maximum length")]
    FieldTooLong(String),
}

pub struct AvatarStorage {
    dir: PathBuf,
}

impl AvatarStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn ensure_dir(&self) -> io::Result<()> {
        fs::create_dir_all(&self.dir).await
    }

    /// Resolve a stored avatar name to its path. Anything other than a bare
    /// file name is refused.
    pub fn path_of(&self, filename: &str) -> Option<PathBuf> {
        let mut components = Path::new(filename).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(name)), None) if name == filename => {
                Some(self.dir.join(filename))
            }
            _ => None,
        }
    }

    /// Stream an uploaded file to disk and return its generated name.
    ///
    /// The file is created exclusively; on a name clash the timestamp is
    /// bumped by one millisecond and the create retried. A failed stream
    /// removes the partial file.
    pub async fn save<S, E>(
        &self,
        field_name: &str,
        original_filename: Option<&str>,
        chunks: S,
    ) -> Result<String, UploadError>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: Display,
    {
        let mut timestamp = chrono::Utc::now().timestamp_millis();
        let (filename, mut file) = loop {
            let candidate = generated_name(field_name, timestamp, original_filename);
            let open = fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(self.dir.join(&candidate))
                .await;
            match open {
                Ok(file) => break (candidate, file),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => timestamp += 1,
                Err(e) => return Err(e.into()),
            }
        };

        let mut chunks = std::pin::pin!(chunks);
        let written = async {
            while let Some(chunk) = chunks.next().await {
                let chunk = chunk.map_err(|e| UploadError::Multipart(e.to_string()))?;
                file.write_all(&chunk).await?;
            }
            file.flush().await?;
            Ok::<(), UploadError>(())
        }
        .await;

        if let Err(e) = written {
            drop(file);
            if let Err(remove_err) = fs::remove_file(self.dir.join(&filename)).await {
                log::warn!("Failed to remove partial avatar {}: {}", filename, remove_err);
            }
            return Err(e);
        }

        log::debug!("Stored avatar {}", filename);
        Ok(filename)
    }

    pub async fn remove(&self, filename: &str) -> io::Result<()> {
        let path = self.path_of(filename).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("not a stored avatar name: {}", filename),
            )
        })?;
        fs::remove_file(path).await
    }
}

/// Build `<field>-<millis><.ext>` keeping the original extension only when
/// it is plain ASCII alphanumerics.
pub fn generated_name(field_name: &str, timestamp_millis: i64, original: Option<&str>) -> String {
    let extension = original
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .filter(|ext| ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|ext| format!(".{}", ext))
        .unwrap_or_default();
    format!("{}-{}{}", field_name, timestamp_millis, extension)
}
