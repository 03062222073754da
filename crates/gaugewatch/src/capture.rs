//! Frame to still-image conversion shared by export and inspection.

use crate::error::FeedError;
use crate::media::Frame;
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder};

/// MIME type of every still this crate produces.
pub const STILL_MIME_TYPE: &str = "image/png";

/// Encode an RGBA frame as PNG.
pub fn encode_png(frame: &Frame) -> Result<Vec<u8>, FeedError> {
    let expected = frame.width as usize * frame.height as usize * 4;
    if frame.width == 0 || frame.height == 0 || frame.data.len() != expected {
        return Err(FeedError::Encode(format!(
            "frame buffer of {} bytes does not match {}x{} RGBA",
            frame.data.len(),
            frame.width,
            frame.height
        )));
    }

    let mut png = Vec::new();
    PngEncoder::new(&mut png)
        .write_image(
            &frame.data,
            frame.width,
            frame.height,
            ExtendedColorType::Rgba8,
        )
        .map_err(|e| FeedError::Encode(e.to_string()))?;
    Ok(png)
}

/// PNG-encode and base64 the frame for the recognition request.
pub fn encode_base64_png(frame: &Frame) -> Result<String, FeedError> {
    encode_png(frame).map(|png| BASE64_STANDARD.encode(png))
}

/// Download name for a still of the given feed, e.g. `Inlet_Pressure_capture.png`.
pub fn export_name(label: &str) -> String {
    let stem: String = label
        .chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .collect();
    format!("{stem}_capture.png")
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];

    fn frame(width: u32, height: u32) -> Frame {
        Frame {
            width,
            height,
            data: vec![0x7f; (width * height * 4) as usize],
        }
    }

    #[test]
    fn encodes_png() {
        let png = encode_png(&frame(4, 3)).unwrap();
        assert_eq!(&png[..8], &PNG_SIGNATURE);
    }

    #[test]
    fn rejects_mismatched_buffer() {
        let mut bad = frame(4, 3);
        bad.data.truncate(10);
        assert!(matches!(encode_png(&bad), Err(FeedError::Encode(_))));
        assert!(encode_png(&frame(0, 0)).is_err());
    }

    #[test]
    fn base64_payload_decodes_to_png() {
        let encoded = encode_base64_png(&frame(2, 2)).unwrap();
        let decoded = BASE64_STANDARD.decode(encoded).unwrap();
        assert_eq!(&decoded[..8], &PNG_SIGNATURE);
    }

    #[test]
    fn export_name_replaces_whitespace() {
        assert_eq!(export_name("Inlet Pressure"), "Inlet_Pressure_capture.png");
        assert_eq!(export_name("Tank\t2 gauge"), "Tank_2_gauge_capture.png");
        assert_eq!(export_name("Camera 3"), "Camera_3_capture.png");
    }
}
