//! Embedding extraction collaborator and image payload decoding.
//!
//! Extraction itself is a black box: given a frame, return zero or more face
//! regions each with a fixed-length embedding. An empty list is a valid
//! terminal outcome (no face in frame), never an error.

use std::io::Write;
use std::process::{Command, Stdio};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::DynamicImage;
use rollcall_core::Embedding;
use serde::Deserialize;
use thiserror::Error;

/// Client-facing input errors: rejected synchronously, never a crash.
#[derive(Error, Debug)]
pub enum InputError {
    #[error("invalid image payload format")]
    MalformedPayload,
    #[error("base64 decode failed: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("image decode failed: {0}")]
    Image(#[from] image::ImageError),
}

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("extractor process failed: {0}")]
    Process(#[from] std::io::Error),
    #[error("extractor exited with status {0}")]
    NonZeroExit(i32),
    #[error("extractor output unparsable: {0}")]
    BadOutput(#[from] serde_json::Error),
    #[error("extractor returned a face with no embedding")]
    EmptyEmbedding,
    #[error("frame encode failed: {0}")]
    FrameEncode(image::ImageError),
}

/// A face region found in a frame, with its embedding.
#[derive(Debug, Clone, Deserialize)]
pub struct DetectedFace {
    /// [x, y, width, height] in frame pixels.
    pub bbox: [f32; 4],
    pub embedding: Vec<f32>,
}

impl DetectedFace {
    pub fn embedding(&self) -> Embedding {
        Embedding::new(self.embedding.clone())
    }
}

/// Black-box extraction capability. Implementations must return faces in
/// their own defined order; callers use only the first.
pub trait FaceExtractor: Send {
    fn extract(&mut self, frame: &DynamicImage) -> Result<Vec<DetectedFace>, ExtractError>;
}

/// Extractor that delegates to an external command: the frame is piped to
/// stdin as PNG, detected faces come back as a JSON array on stdout.
pub struct CommandExtractor {
    command: String,
}

impl CommandExtractor {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

impl FaceExtractor for CommandExtractor {
    fn extract(&mut self, frame: &DynamicImage) -> Result<Vec<DetectedFace>, ExtractError> {
        let mut png = Vec::new();
        frame
            .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
            .map_err(ExtractError::FrameEncode)?;

        let mut child = Command::new(&self.command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;
        if let Some(stdin) = child.stdin.take() {
            let mut stdin = stdin;
            stdin.write_all(&png)?;
        }
        let output = child.wait_with_output()?;
        if !output.status.success() {
            return Err(ExtractError::NonZeroExit(output.status.code().unwrap_or(-1)));
        }

        let faces: Vec<DetectedFace> = serde_json::from_slice(&output.stdout)?;
        tracing::debug!(faces = faces.len(), "extractor returned");
        Ok(faces)
    }
}

/// Decode a browser-style data URI (`data:image/png;base64,<payload>`) into
/// a frame. The payload must contain the comma separator; anything the image
/// decoder rejects surfaces as a structured input error.
pub fn decode_image_payload(data_uri: &str) -> Result<DynamicImage, InputError> {
    let (_, encoded) = data_uri
        .split_once(',')
        .ok_or(InputError::MalformedPayload)?;
    let bytes = BASE64.decode(encoded.trim())?;
    Ok(image::load_from_memory(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png_data_uri() -> String {
        let img = DynamicImage::new_rgb8(2, 2);
        let mut png = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();
        format!("data:image/png;base64,{}", BASE64.encode(&png))
    }

    #[test]
    fn test_decode_valid_payload() {
        let frame = decode_image_payload(&png_data_uri()).unwrap();
        assert_eq!(frame.width(), 2);
        assert_eq!(frame.height(), 2);
    }

    #[test]
    fn test_missing_comma_is_malformed() {
        assert!(matches!(
            decode_image_payload("no-separator-here"),
            Err(InputError::MalformedPayload)
        ));
    }

    #[test]
    fn test_bad_base64_is_structured_error() {
        assert!(matches!(
            decode_image_payload("data:image/png;base64,!!!not-base64!!!"),
            Err(InputError::Base64(_))
        ));
    }

    #[test]
    fn test_undecodable_image_is_structured_error() {
        let garbage = format!("data:image/png;base64,{}", BASE64.encode(b"not a png"));
        assert!(matches!(
            decode_image_payload(&garbage),
            Err(InputError::Image(_))
        ));
    }
}
