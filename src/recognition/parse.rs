use anyhow::{Result, anyhow};
use std::collections::HashMap;

use crate::geometry::Size;

use super::{BBox, RawRegion, RecognitionResult, Tier};

type GroupKey = (Tier, i32, i32, i32, i32);

struct Group {
    tier: Tier,
    bbox: BBox,
    text: String,
    last_token: String,
    conf_sum: f32,
    len_sum: f32,
}

impl Group {
    fn new(tier: Tier, bbox: BBox) -> Self {
        Self {
            tier,
            bbox,
            text: String::new(),
            last_token: String::new(),
            conf_sum: 0.0,
            len_sum: 0.0,
        }
    }

    fn push_word(&mut self, word: &str, conf: f32) {
        if !self.text.is_empty() && needs_space(&self.last_token, word) {
            self.text.push(' ');
        }
        self.text.push_str(word);
        self.last_token = word.to_string();
        let weight = word.chars().count().max(1) as f32;
        self.conf_sum += conf * weight;
        self.len_sum += weight;
    }

    fn into_region(self) -> Option<RawRegion> {
        let text = self.text.trim();
        if text.is_empty() {
            return None;
        }
        Some(RawRegion {
            bbox: Some(self.bbox),
            text: text.to_string(),
            confidence: if self.len_sum > 0.0 {
                self.conf_sum / self.len_sum
            } else {
                0.0
            },
            tier: self.tier,
        })
    }
}

/// Parses `tesseract ... tsv` output into the block/paragraph/line/word tiers.
///
/// Structural rows (levels 2-4) carry the box; their text and confidence are
/// rebuilt from the word rows nested under them.
pub(super) fn parse_tsv(tsv: &str, decoded_size: Option<Size>) -> Result<RecognitionResult> {
    let mut page_size = None;
    let mut order: Vec<GroupKey> = Vec::new();
    let mut groups: HashMap<GroupKey, Group> = HashMap::new();
    let mut words = Vec::new();
    let mut saw_header = false;

    for row in tsv.lines() {
        if !saw_header {
            saw_header = true;
            if row.starts_with("level") {
                continue;
            }
        }
        let cols = row.split('\t').collect::<Vec<_>>();
        if cols.len() < 11 {
            continue;
        }
        let level: i32 = cols[0].parse().unwrap_or(0);
        let block: i32 = cols[2].parse().unwrap_or(0);
        let par: i32 = cols[3].parse().unwrap_or(0);
        let line: i32 = cols[4].parse().unwrap_or(0);
        let left: f32 = cols[6].parse().unwrap_or(0.0);
        let top: f32 = cols[7].parse().unwrap_or(0.0);
        let width: f32 = cols[8].parse().unwrap_or(0.0);
        let height: f32 = cols[9].parse().unwrap_or(0.0);
        let conf: f32 = cols[10].trim().parse().unwrap_or(-1.0);
        let text = cols.get(11).map(|value| value.trim()).unwrap_or("");
        let bbox = BBox {
            x0: left,
            y0: top,
            x1: left + width,
            y1: top + height,
        };

        let tier = match level {
            1 => {
                page_size = Some(Size::new(width, height));
                continue;
            }
            2 => Tier::Block,
            3 => Tier::Paragraph,
            4 => Tier::Line,
            5 => Tier::Word,
            _ => continue,
        };

        if tier != Tier::Word {
            let key = group_key(tier, block, par, line);
            if !groups.contains_key(&key) {
                order.push(key);
            }
            groups.insert(key, Group::new(tier, bbox));
            continue;
        }

        if text.is_empty() || conf < 0.0 {
            continue;
        }
        for parent in [Tier::Block, Tier::Paragraph, Tier::Line] {
            if let Some(group) = groups.get_mut(&group_key(parent, block, par, line)) {
                group.push_word(text, conf);
            }
        }
        words.push(RawRegion {
            bbox: Some(bbox),
            text: text.to_string(),
            confidence: conf,
            tier: Tier::Word,
        });
    }

    if page_size.is_none() && words.is_empty() && order.is_empty() && !tsv.trim().is_empty() {
        return Err(anyhow!("tesseract output is not TSV"));
    }

    let mut by_tier: HashMap<Tier, Vec<RawRegion>> = HashMap::new();
    for key in order {
        if let Some(region) = groups.remove(&key).and_then(Group::into_region) {
            by_tier.entry(region.tier).or_default().push(region);
        }
    }

    let lines = by_tier.get(&Tier::Line).cloned().unwrap_or_default();
    let full_text = lines
        .iter()
        .map(|line| line.text.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    let (conf_sum, len_sum) = words.iter().fold((0.0f32, 0.0f32), |(sum, len), word| {
        let weight = word.text.chars().count().max(1) as f32;
        (sum + word.confidence * weight, len + weight)
    });
    let confidence = if len_sum > 0.0 { conf_sum / len_sum } else { 0.0 };

    let mut result = RecognitionResult::new(full_text, confidence, decoded_size.or(page_size));
    for tier in [Tier::Block, Tier::Paragraph, Tier::Line] {
        result = result.with_tier(tier, by_tier.remove(&tier).unwrap_or_default());
    }
    Ok(result.with_tier(Tier::Word, words))
}

fn group_key(tier: Tier, block: i32, par: i32, line: i32) -> GroupKey {
    match tier {
        Tier::Block => (tier, block, 0, 0, 0),
        Tier::Paragraph => (tier, block, par, 0, 0),
        Tier::Line | Tier::Word => (tier, block, par, line, 0),
    }
}

fn needs_space(left: &str, right: &str) -> bool {
    let last = left.chars().rev().find(|ch| !ch.is_whitespace());
    let first = right.chars().find(|ch| !ch.is_whitespace());
    match (last, first) {
        (Some(a), Some(b)) => {
            let cjk = crate::filter::is_cjk(a) || crate::filter::is_cjk(b);
            !cjk && (a.is_alphanumeric() || a.is_ascii_punctuation()) && b.is_alphanumeric()
        }
        _ => false,
    }
}
