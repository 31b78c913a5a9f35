//! Native storage for photo previews.
//!
//! Encoded previews are far larger than the rest of a form record and would
//! quickly exhaust the durable KV quota on mobile. On native runtimes they are
//! written to the file tier instead, one file per preview, and the record only
//! keeps [`PhotoPreviewRef`] tokens.
//!
//! A token is the relative path of its file:
//! `checkout-photo/<sanitized-key>/<index>-<crc32>.txt`. The checksum is
//! verified on load so a truncated or corrupted file reads as missing.

use std::sync::Arc;

use crate::key::StorageKey;
use crate::logging::{debug, trace, warn};
use crate::record::{PhotoPreview, PhotoPreviewRef};
use crate::tier::{FileStore, FileStoreError};

/// Relocates preview payloads into the native file tier.
#[derive(Clone)]
pub struct PhotoPreviewStore {
    files: Option<Arc<dyn FileStore>>,
}

impl PhotoPreviewStore {
    /// `files` is `None` on platforms without native file storage.
    pub fn new(files: Option<Arc<dyn FileStore>>) -> Self {
        Self { files }
    }

    pub fn is_available(&self) -> bool {
        self.files.is_some()
    }

    /// Write `previews` for `key` and return one ref per preview, in order.
    ///
    /// Previously saved previews for the key are replaced. Returns an empty
    /// list when native storage is unavailable.
    pub async fn save_previews(
        &self,
        key: &StorageKey,
        previews: &[PhotoPreview],
    ) -> Result<Vec<PhotoPreviewRef>, FileStoreError> {
        let Some(files) = &self.files else {
            return Ok(Vec::new());
        };

        let dir = key.native_photo_dir();
        files.remove_dir(&dir).await?;

        let mut refs = Vec::with_capacity(previews.len());
        for (index, preview) in previews.iter().enumerate() {
            let checksum = crc32fast::hash(preview.as_str().as_bytes());
            let path = format!("{}/{}-{:08x}.txt", dir, index, checksum);
            files.write_file(&path, preview.as_str()).await?;
            trace!(key = %key, path = %path, bytes = preview.len(), "preview written");
            refs.push(PhotoPreviewRef::new(path));
        }

        debug!(key = %key, count = refs.len(), "previews saved to native storage");
        Ok(refs)
    }

    /// Read back the previews named by `refs`.
    ///
    /// Missing, unreadable, or corrupted files are skipped, so the result may
    /// be shorter than `refs`.
    pub async fn load_previews(&self, refs: &[PhotoPreviewRef]) -> Vec<PhotoPreview> {
        let Some(files) = &self.files else {
            return Vec::new();
        };

        let mut previews = Vec::with_capacity(refs.len());
        for preview_ref in refs {
            match files.read_file(preview_ref.as_str()).await {
                Ok(contents) => {
                    if checksum_matches(preview_ref, &contents) {
                        previews.push(PhotoPreview::new(contents));
                    } else {
                        warn!(path = %preview_ref.as_str(), "preview checksum mismatch, skipping");
                    }
                }
                Err(e) if e.is_not_found() => {
                    debug!(path = %preview_ref.as_str(), "preview file missing, skipping");
                }
                Err(e) => {
                    warn!(path = %preview_ref.as_str(), error = %e, "preview unreadable, skipping");
                }
            }
        }
        previews
    }

    /// Delete every preview file stored for `key`. Idempotent.
    pub async fn clear_previews(&self, key: &StorageKey) -> Result<(), FileStoreError> {
        let Some(files) = &self.files else {
            return Ok(());
        };
        files.remove_dir(&key.native_photo_dir()).await
    }
}

/// Compare file contents with the checksum embedded in the token.
///
/// Tokens without a parseable checksum are accepted as-is.
fn checksum_matches(preview_ref: &PhotoPreviewRef, contents: &str) -> bool {
    let Some(expected) = embedded_checksum(preview_ref.as_str()) else {
        return true;
    };
    crc32fast::hash(contents.as_bytes()) == expected
}

fn embedded_checksum(path: &str) -> Option<u32> {
    let file = path.rsplit('/').next()?;
    let stem = file.strip_suffix(".txt")?;
    let (_, hex) = stem.split_once('-')?;
    u32::from_str_radix(hex, 16).ok()
}
