mod parse;
mod preprocess;
mod tesseract;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

use crate::geometry::Size;

pub use tesseract::{
    SPARSE_TEXT_PSM, TesseractRecognizer, list_tesseract_languages, ocr_languages_for,
    resolve_ocr_languages,
};

/// Recognizer granularity, coarse to fine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Block,
    Paragraph,
    Line,
    Word,
}

impl Tier {
    pub const PREFERENCE: [Tier; 4] = [Tier::Block, Tier::Paragraph, Tier::Line, Tier::Word];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Block => "block",
            Tier::Paragraph => "paragraph",
            Tier::Line => "line",
            Tier::Word => "word",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl BBox {
    pub fn width(&self) -> f32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f32 {
        self.y1 - self.y0
    }

    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    fn normalized(self) -> Option<BBox> {
        let values = [self.x0, self.y0, self.x1, self.y1];
        if values.iter().any(|value| !value.is_finite()) {
            return None;
        }
        Some(BBox {
            x0: self.x0.min(self.x1),
            y0: self.y0.min(self.y1),
            x1: self.x0.max(self.x1),
            y1: self.y0.max(self.y1),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawRegion {
    pub bbox: Option<BBox>,
    pub text: String,
    pub confidence: f32,
    pub tier: Tier,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionResult {
    pub text: String,
    pub confidence: f32,
    pub image_size: Option<Size>,
    tiers: Vec<(Tier, Vec<RawRegion>)>,
}

impl RecognitionResult {
    pub fn new(text: impl Into<String>, confidence: f32, image_size: Option<Size>) -> Self {
        Self {
            text: text.into(),
            confidence: clamp_confidence(confidence),
            image_size: image_size.filter(Size::is_positive),
            tiers: Vec::new(),
        }
    }

    pub fn with_tier(mut self, tier: Tier, regions: Vec<RawRegion>) -> Self {
        let regions = regions
            .into_iter()
            .map(|region| RawRegion {
                bbox: region.bbox.and_then(BBox::normalized),
                confidence: clamp_confidence(region.confidence),
                tier,
                text: region.text,
            })
            .collect::<Vec<_>>();
        match self.tiers.iter_mut().find(|(existing, _)| *existing == tier) {
            Some((_, existing)) => existing.extend(regions),
            None => self.tiers.push((tier, regions)),
        }
        self
    }

    pub fn tier(&self, tier: Tier) -> &[RawRegion] {
        self.tiers
            .iter()
            .find(|(existing, _)| *existing == tier)
            .map(|(_, regions)| regions.as_slice())
            .unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.tiers.iter().all(|(_, regions)| regions.is_empty())
    }

    /// Builds a result from the loosely typed JSON shape recognizers emit.
    pub fn from_payload(payload: RecognitionPayload) -> Self {
        let mut result = Self::new(
            payload.text.unwrap_or_default(),
            payload.confidence.unwrap_or(0.0),
            payload.image_size,
        );
        let tiers = [
            (Tier::Block, payload.blocks),
            (Tier::Paragraph, payload.paragraphs),
            (Tier::Line, payload.lines),
            (Tier::Word, payload.words),
        ];
        for (tier, raw) in tiers {
            let regions = raw
                .into_iter()
                .map(|region| RawRegion {
                    bbox: region.bbox,
                    text: region.text.unwrap_or_default(),
                    confidence: region.confidence.unwrap_or(0.0),
                    tier,
                })
                .collect();
            result = result.with_tier(tier, regions);
        }
        result
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RecognitionPayload {
    pub text: Option<String>,
    pub confidence: Option<f32>,
    pub image_size: Option<Size>,
    pub blocks: Vec<RegionPayload>,
    pub paragraphs: Vec<RegionPayload>,
    pub lines: Vec<RegionPayload>,
    pub words: Vec<RegionPayload>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RegionPayload {
    pub bbox: Option<BBox>,
    pub text: Option<String>,
    pub confidence: Option<f32>,
}

fn clamp_confidence(value: f32) -> f32 {
    if value.is_finite() {
        value.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

/// Where the recognizer should read pixels from.
#[derive(Debug, Clone)]
pub enum ImageSource {
    Bytes(Vec<u8>),
    Url(String),
}

impl ImageSource {
    pub fn describe(&self) -> String {
        match self {
            ImageSource::Bytes(bytes) => format!("{} bytes", bytes.len()),
            ImageSource::Url(url) => url.clone(),
        }
    }
}

pub type RecognizeFuture<'a> = Pin<Box<dyn Future<Output = Result<RecognitionResult>> + Send + 'a>>;

/// Text recognition engine. Implementations must detect sparse text without
/// auto-rotating the page so boxes stay aligned with the source image.
pub trait Recognizer: Send + Sync {
    fn recognize<'a>(&'a self, source: &'a ImageSource, language_hint: &'a str)
    -> RecognizeFuture<'a>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_is_normalized_once() {
        let payload: RecognitionPayload = serde_json::from_value(serde_json::json!({
            "text": "こんにちは",
            "confidence": 140.0,
            "imageSize": {"width": 500.0, "height": 500.0},
            "blocks": [
                {"bbox": {"x0": 110.0, "y0": 60.0, "x1": 10.0, "y1": 10.0}, "text": "こんにちは", "confidence": 90.0},
                {"text": "no box"}
            ]
        }))
        .unwrap();
        let result = RecognitionResult::from_payload(payload);
        assert_eq!(result.confidence, 100.0);
        assert_eq!(result.image_size, Some(Size::new(500.0, 500.0)));
        let blocks = result.tier(Tier::Block);
        assert_eq!(blocks.len(), 2);
        assert_eq!(
            blocks[0].bbox,
            Some(BBox {
                x0: 10.0,
                y0: 10.0,
                x1: 110.0,
                y1: 60.0
            })
        );
        assert_eq!(blocks[1].bbox, None);
        assert_eq!(blocks[1].confidence, 0.0);
        assert!(result.tier(Tier::Word).is_empty());
    }

    #[test]
    fn empty_result_is_detected() {
        assert!(RecognitionResult::new("  ", 0.0, None).is_empty());
        let with_words = RecognitionResult::new("", 0.0, None).with_tier(
            Tier::Word,
            vec![RawRegion {
                bbox: None,
                text: "a".to_string(),
                confidence: 50.0,
                tier: Tier::Word,
            }],
        );
        assert!(!with_words.is_empty());
    }
}
