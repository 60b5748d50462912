use tracing::debug;

use crate::filter::{is_garbage, normalize_text};
use crate::geometry::Size;
use crate::recognition::{BBox, RawRegion, RecognitionResult, Tier};

#[derive(Debug, Clone)]
pub struct ExtractConfig {
    pub min_confidence: f32,
    pub whole_image_min_confidence: f32,
    pub max_area_ratio: f32,
    pub min_aspect: f32,
    pub max_aspect: f32,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            min_confidence: 40.0,
            whole_image_min_confidence: 30.0,
            max_area_ratio: 0.8,
            min_aspect: 0.02,
            max_aspect: 60.0,
        }
    }
}

/// A recognized region that passed every quality gate.
#[derive(Debug, Clone, PartialEq)]
pub struct QualifiedRegion {
    bbox: BBox,
    text: String,
    confidence: f32,
    tier: Tier,
}

impl QualifiedRegion {
    pub fn bbox(&self) -> &BBox {
        &self.bbox
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }
}

/// Returns the qualified regions of the coarsest tier that has any.
///
/// Tiers are never merged; the recognizer's order within the chosen tier is kept.
pub fn extract_regions(
    result: &RecognitionResult,
    image: Size,
    config: &ExtractConfig,
) -> Vec<QualifiedRegion> {
    for tier in Tier::PREFERENCE {
        let regions = result
            .tier(tier)
            .iter()
            .filter_map(|region| qualify(region, image, config))
            .collect::<Vec<_>>();
        if !regions.is_empty() {
            debug!("using {} tier with {} region(s)", tier.as_str(), regions.len());
            return regions;
        }
    }
    Vec::new()
}

/// Single region spanning the image, used when no tier produced anything.
///
/// Gated harder than regular regions because the whole-page text is usually noisier.
pub fn whole_image_region(
    result: &RecognitionResult,
    image: Size,
    config: &ExtractConfig,
) -> Option<QualifiedRegion> {
    let text = normalize_text(&result.text);
    if text.is_empty() || result.confidence < config.whole_image_min_confidence {
        return None;
    }
    if is_garbage(&text) {
        return None;
    }
    Some(QualifiedRegion {
        bbox: BBox {
            x0: 0.0,
            y0: 0.0,
            x1: image.width,
            y1: image.height,
        },
        text,
        confidence: result.confidence,
        tier: Tier::Block,
    })
}

fn qualify(region: &RawRegion, image: Size, config: &ExtractConfig) -> Option<QualifiedRegion> {
    let text = normalize_text(&region.text);
    let bbox = region.bbox?;
    if text.is_empty() {
        return None;
    }
    if region.confidence < config.min_confidence {
        return None;
    }
    if is_garbage(&text) {
        return None;
    }
    if image.is_positive() && bbox.area() > image.area() * config.max_area_ratio {
        return None;
    }
    let (width, height) = (bbox.width(), bbox.height());
    if width <= 0.0 || height <= 0.0 {
        return None;
    }
    let aspect = width / height;
    if aspect < config.min_aspect || aspect > config.max_aspect {
        return None;
    }
    Some(QualifiedRegion {
        bbox,
        text,
        confidence: region.confidence,
        tier: region.tier,
    })
}
