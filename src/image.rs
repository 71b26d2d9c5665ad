//! Image Heuristic Soil Classifier
//!
//! A cheap color heuristic over a small thumbnail: pale bright frames read
//! as sandy, reddish dark frames as clay, greenish balanced frames as
//! loamy. It stands in for a real vision model and is only ever one vote
//! in the evidence chain, never a verification on its own.
//!
//! Decoding raw bytes into pixels is a capability supplied by the caller;
//! when no decoder is available the classifier simply reports no evidence.

/// Thumbnail edge length the decoder is asked for. Mean color statistics
/// are stable at this size and decoding stays cheap.
pub const THUMBNAIL_EDGE: u32 = 64;

/// Decodes an encoded image into RGB8 pixels of a small thumbnail.
///
/// Implementations live outside the core (an image codec, a remote
/// service). Any failure is reported as `None`.
pub trait ImageDecoder: Send + Sync {
    fn decode_thumbnail(&self, bytes: &[u8], edge: u32) -> Option<Vec<[u8; 3]>>;
}

/// Mean channel intensities of a decoded frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelSummary {
    pub red: f64,
    pub green: f64,
    pub blue: f64,
}

impl PixelSummary {
    /// Mean of the three channel means.
    pub fn brightness(&self) -> f64 {
        (self.red + self.green + self.blue) / 3.0
    }

    /// Red-to-green ratio, offset so a black frame stays finite.
    pub fn red_green_ratio(&self) -> f64 {
        (self.red + 1.0) / (self.green + 1.0)
    }
}

/// Average the channels of an RGB8 pixel buffer. Empty input yields None.
pub fn summarize_pixels(pixels: &[[u8; 3]]) -> Option<PixelSummary> {
    if pixels.is_empty() {
        return None;
    }
    let mut sums = [0.0f64; 3];
    for px in pixels {
        sums[0] += px[0] as f64;
        sums[1] += px[1] as f64;
        sums[2] += px[2] as f64;
    }
    let n = pixels.len() as f64;
    Some(PixelSummary {
        red: sums[0] / n,
        green: sums[1] / n,
        blue: sums[2] / n,
    })
}

/// Color rules, first match wins.
pub fn classify_pixels(summary: &PixelSummary) -> &'static str {
    let brightness = summary.brightness();

    // Bright and pale reads as sand
    if brightness > 170.0 && summary.red_green_ratio() < 1.1 {
        return "Sandy";
    }
    // Reddish and darker reads as clay
    if summary.red > summary.green * 1.1 && brightness < 160.0 {
        return "Clay";
    }
    // Greenish or balanced reads as organic loam
    if summary.green >= summary.red && summary.green >= summary.blue {
        return "Loamy";
    }
    if brightness < 120.0 {
        return "Clay";
    }
    "Loamy"
}

/// Classify raw image bytes, if a decoder is available and the bytes
/// decode. Returns `None` for empty input, decode failure, or when no
/// decoding capability was supplied.
pub fn classify_soil_image(
    bytes: &[u8],
    decoder: Option<&dyn ImageDecoder>,
) -> Option<&'static str> {
    if bytes.is_empty() {
        return None;
    }
    let decoder = decoder?;
    let pixels = decoder.decode_thumbnail(bytes, THUMBNAIL_EDGE)?;
    let summary = summarize_pixels(&pixels)?;
    Some(classify_pixels(&summary))
}
