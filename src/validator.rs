//! Checks that an upload is a real image before anything is sent to the
//! model, and packages it for the inference call

use crate::error::{Result, ServiceError};
use actix_web::web::Bytes;
use image::io::Reader as ImageReader;
use std::fmt::Debug;
use std::io::{BufRead, Cursor, Seek, SeekFrom};
use tracing::debug;

/// An image as it arrived in the request: raw bytes plus the content type
/// the client declared for them
pub struct UploadedImage {
    pub data: Bytes,
    pub content_type: String,
}

impl UploadedImage {
    pub fn new(data: impl Into<Bytes>, content_type: impl Into<String>) -> Self {
        UploadedImage {
            data: data.into(),
            content_type: content_type.into(),
        }
    }
}

/// A validated image, ready to be attached to an inference request. `data`
/// is exactly what the client uploaded.
#[derive(Clone, PartialEq)]
pub struct PackagedImageUnit {
    pub mime_type: String,
    pub data: Bytes,
}

impl Debug for PackagedImageUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "PackagedImageUnit {{ mime_type: {:?}, data: <{} bytes> }}",
            self.mime_type,
            self.data.len()
        )
    }
}

/// Validate an upload and package it. The declared content type is trusted
/// as-is; only decodability is checked.
pub fn validate(upload: UploadedImage) -> Result<PackagedImageUnit> {
    let UploadedImage { data, content_type } = upload;

    let mut cursor = Cursor::new(data);
    check_decodes(&mut cursor)?;

    let unit = PackagedImageUnit {
        mime_type: content_type,
        data: cursor.into_inner(),
    };
    debug!("validated upload: {unit:?}");

    Ok(unit)
}

/// Decode the image at the reader's current position, then seek back there
/// so the same bytes can be read again. The decoded pixels are dropped.
pub fn check_decodes<R: BufRead + Seek>(reader: &mut R) -> Result<()> {
    let start = reader
        .stream_position()
        .map_err(|e| ServiceError::InvalidImage(e.to_string()))?;

    let decoded = ImageReader::new(&mut *reader)
        .with_guessed_format()
        .map_err(|e| ServiceError::InvalidImage(e.to_string()))?
        .decode()
        .map_err(|e| ServiceError::InvalidImage(e.to_string()))?;

    debug!(
        "decoded {}x{} image",
        decoded.width(),
        decoded.height()
    );

    reader
        .seek(SeekFrom::Start(start))
        .map_err(|e| ServiceError::InvalidImage(e.to_string()))?;

    Ok(())
}
