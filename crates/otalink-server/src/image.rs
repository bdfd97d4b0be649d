//! Firmware image receiver.
//!
//! Each transfer streams into its own `<image>.<id>.part` next to the final
//! path and renames it over the image only once every declared byte has
//! been written and synced, so readers of the image path never see a
//! partial file. Concurrent transfers never share a part file; the last one
//! to finish wins.
//!
//! The receiver moves the phase to `Downloading` before reading. Reporting
//! the outcome (`TransferComplete` / `TransferFailed`) is left to the caller.

use std::ffi::OsString;
use std::fmt::Display;
use std::path::{Path, PathBuf};

use futures::{Stream, StreamExt};
use thiserror::Error;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use otalink_core::{Command, CommandError, UpdateStateMachine};

/// Errors that can occur while receiving an image.
#[derive(Debug, Error)]
pub enum ImageError {
    /// Writing to storage failed.
    #[error("Storage error: {0}")]
    Io(#[from] std::io::Error),

    /// The request body stream broke off.
    #[error("Transfer interrupted: {0}")]
    Stream(String),

    /// Fewer bytes arrived than were declared.
    #[error("Image truncated: declared {declared} bytes, received {received}")]
    Truncated { declared: u64, received: u64 },

    /// More bytes arrived than were declared.
    #[error("Image longer than the declared {declared} bytes")]
    Overrun { declared: u64 },

    /// The image exceeds the configured limit.
    #[error("Image exceeds the {limit} byte limit")]
    TooLarge { limit: u64 },

    /// The state machine refused to start a transfer.
    #[error(transparent)]
    Rejected(#[from] CommandError),
}

impl ImageError {
    /// Whether the failure was caused by the request rather than the device.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, ImageError::Io(_))
    }
}

/// Receives firmware images into durable storage.
#[derive(Debug, Clone)]
pub struct ImageReceiver {
    machine: UpdateStateMachine,
    image_path: PathBuf,
    max_bytes: u64,
}

impl ImageReceiver {
    pub fn new(machine: UpdateStateMachine, image_path: impl Into<PathBuf>, max_bytes: u64) -> Self {
        Self {
            machine,
            image_path: image_path.into(),
            max_bytes,
        }
    }

    pub fn image_path(&self) -> &Path {
        &self.image_path
    }

    /// Receive an image from `body`, returning the number of bytes stored.
    ///
    /// If `declared_len` is given, exactly that many bytes must arrive.
    pub async fn receive<S, B, E>(&self, body: S, declared_len: Option<u64>) -> Result<u64, ImageError>
    where
        S: Stream<Item = Result<B, E>>,
        B: AsRef<[u8]>,
        E: Display,
    {
        self.machine.apply_command(Command::BeginTransfer)?;

        let part = part_path(&self.image_path, Uuid::new_v4());
        match self.write_part(&part, body, declared_len).await {
            Ok(written) => {
                info!(
                    "Stored {} byte image at {}",
                    written,
                    self.image_path.display()
                );
                Ok(written)
            }
            Err(e) => {
                warn!("Image transfer failed: {}", e);
                if let Err(rm) = fs::remove_file(&part).await {
                    debug!("Could not remove {}: {}", part.display(), rm);
                }
                Err(e)
            }
        }
    }

    async fn write_part<S, B, E>(
        &self,
        part: &Path,
        body: S,
        declared_len: Option<u64>,
    ) -> Result<u64, ImageError>
    where
        S: Stream<Item = Result<B, E>>,
        B: AsRef<[u8]>,
        E: Display,
    {
        if let Some(declared) = declared_len {
            if declared > self.max_bytes {
                return Err(ImageError::TooLarge {
                    limit: self.max_bytes,
                });
            }
        }

        if let Some(parent) = part.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        let mut file = File::create(part).await?;
        let mut written: u64 = 0;

        futures::pin_mut!(body);
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| ImageError::Stream(e.to_string()))?;
            let bytes = chunk.as_ref();
            written += bytes.len() as u64;

            if written > self.max_bytes {
                return Err(ImageError::TooLarge {
                    limit: self.max_bytes,
                });
            }
            if let Some(declared) = declared_len {
                if written > declared {
                    return Err(ImageError::Overrun { declared });
                }
            }
            file.write_all(bytes).await?;
        }

        if let Some(declared) = declared_len {
            if written < declared {
                return Err(ImageError::Truncated {
                    declared,
                    received: written,
                });
            }
        }

        file.flush().await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(part, &self.image_path).await?;
        Ok(written)
    }
}

/// `firmware.bin` -> `firmware.bin.<id>.part`
fn part_path(path: &Path, id: Uuid) -> PathBuf {
    let mut name: OsString = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| OsString::from("image"));
    name.push(format!(".{}.part", id.simple()));
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_part_path() {
        let id = Uuid::nil();
        assert_eq!(
            part_path(Path::new("/data/firmware.bin"), id),
            PathBuf::from("/data/firmware.bin.00000000000000000000000000000000.part")
        );
        assert_eq!(
            part_path(Path::new("fw"), id),
            PathBuf::from("fw.00000000000000000000000000000000.part")
        );
    }

    #[test]
    fn test_part_paths_are_unique() {
        let image = Path::new("/data/firmware.bin");
        assert_ne!(
            part_path(image, Uuid::new_v4()),
            part_path(image, Uuid::new_v4())
        );
    }

    #[test]
    fn test_client_error_classification() {
        assert!(ImageError::Truncated {
            declared: 10,
            received: 5
        }
        .is_client_error());
        assert!(ImageError::TooLarge { limit: 1 }.is_client_error());
        assert!(!ImageError::Io(std::io::Error::other("disk full")).is_client_error());
    }
}
