use anyhow::{Context, Result, anyhow};
use image::GenericImageView;
use std::io::Write;
use std::process::Command;
use tracing::{debug, warn};

use crate::geometry::Size;
use crate::translate::normalize_lang_tag;

use super::parse::parse_tsv;
use super::preprocess::prepare_for_ocr;
use super::{ImageSource, RecognitionResult, RecognizeFuture, Recognizer};

/// Page segmentation mode 11: sparse text, no orientation detection.
pub const SPARSE_TEXT_PSM: u32 = 11;

const FALLBACK_OCR_LANGUAGES: &str = "eng";

#[derive(Debug, Clone)]
pub struct TesseractRecognizer {
    languages: Option<String>,
    psm: u32,
    client: reqwest::Client,
}

impl Default for TesseractRecognizer {
    fn default() -> Self {
        Self::new()
    }
}

impl TesseractRecognizer {
    pub fn new() -> Self {
        Self {
            languages: None,
            psm: SPARSE_TEXT_PSM,
            client: reqwest::Client::new(),
        }
    }

    /// Fixed traineddata list; overrides the per-request language hint.
    pub fn with_languages(mut self, languages: Option<String>) -> Self {
        self.languages = languages.filter(|value| !value.trim().is_empty());
        self
    }

    pub fn with_psm(mut self, psm: u32) -> Self {
        self.psm = psm;
        self
    }
}

impl Recognizer for TesseractRecognizer {
    fn recognize<'a>(
        &'a self,
        source: &'a ImageSource,
        language_hint: &'a str,
    ) -> RecognizeFuture<'a> {
        Box::pin(async move {
            let bytes = match source {
                ImageSource::Bytes(bytes) => bytes.clone(),
                ImageSource::Url(url) => download(&self.client, url).await?,
            };
            let languages = resolve_ocr_languages(self.languages.as_deref(), language_hint);
            let psm = self.psm;
            tokio::task::spawn_blocking(move || recognize_blocking(&bytes, &languages, psm))
                .await
                .with_context(|| "tesseract task failed")?
        })
    }
}

async fn download(client: &reqwest::Client, url: &str) -> Result<Vec<u8>> {
    let response = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("failed to download image: {}", url))?;
    let status = response.status();
    if !status.is_success() {
        return Err(anyhow!("image download failed ({}): {}", status, url));
    }
    Ok(response.bytes().await?.to_vec())
}

fn recognize_blocking(bytes: &[u8], languages: &str, psm: u32) -> Result<RecognitionResult> {
    let image = image::load_from_memory(bytes).with_context(|| "failed to decode image for OCR")?;
    let (width, height) = image.dimensions();
    let languages = normalize_ocr_languages(languages)?;

    let mut tmp = tempfile::Builder::new()
        .suffix(".png")
        .tempfile()
        .with_context(|| "failed to create temp file for OCR")?;
    prepare_for_ocr(image)
        .write_to(&mut tmp, image::ImageFormat::Png)
        .with_context(|| "failed to write temp image for OCR")?;
    tmp.flush().ok();

    let tsv = run_tesseract_tsv(tmp.path(), &languages, psm)?;
    let result = parse_tsv(&tsv, Some(Size::new(width as f32, height as f32)))?;
    debug!(
        "tesseract recognized {} chars at confidence {:.1}",
        result.text.chars().count(),
        result.confidence
    );
    Ok(result)
}

/// Maps a page language tag to the tesseract traineddata to load.
pub fn ocr_languages_for(tag: &str) -> Option<&'static str> {
    match normalize_lang_tag(tag).as_str() {
        "ja" => Some("jpn+jpn_vert"),
        "zh" => Some("chi_sim+chi_tra"),
        "ko" => Some("kor"),
        "en" => Some("eng"),
        "fr" => Some("fra"),
        "de" => Some("deu"),
        "es" => Some("spa"),
        _ => None,
    }
}

/// Configured languages win; otherwise the hint picks them, then English.
pub fn resolve_ocr_languages(configured: Option<&str>, language_hint: &str) -> String {
    configured
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .or_else(|| ocr_languages_for(language_hint))
        .unwrap_or(FALLBACK_OCR_LANGUAGES)
        .to_string()
}

pub fn list_tesseract_languages() -> Result<Vec<String>> {
    let output = Command::new("tesseract")
        .arg("--list-langs")
        .output()
        .with_context(|| "failed to run tesseract --list-langs")?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!("tesseract --list-langs failed: {}", stderr.trim()));
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(stdout
        .lines()
        .skip(1)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .collect())
}

fn normalize_ocr_languages(requested: &str) -> Result<String> {
    let trimmed = requested.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("ocr languages is empty"));
    }

    let available = match list_tesseract_languages() {
        Ok(list) => list,
        Err(_) => return Ok(trimmed.to_string()),
    };

    let (chosen, missing): (Vec<&str>, Vec<&str>) = trimmed
        .split(['+', ',', ' '])
        .map(str::trim)
        .filter(|lang| !lang.is_empty())
        .partition(|lang| available.iter().any(|value| value == lang));

    if chosen.is_empty() {
        return Err(anyhow!(
            "ocr language(s) not available: {} (available: {})",
            missing.join(", "),
            available.join(", ")
        ));
    }
    if !missing.is_empty() {
        warn!(
            "ocr language(s) not available: {} (available: {})",
            missing.join(", "),
            available.join(", ")
        );
    }

    Ok(chosen.join("+"))
}

fn run_tesseract_tsv(path: &std::path::Path, languages: &str, psm: u32) -> Result<String> {
    let output = Command::new("tesseract")
        .arg(path)
        .arg("stdout")
        .arg("-l")
        .arg(languages)
        .arg("--oem")
        .arg("1")
        .arg("--psm")
        .arg(psm.to_string())
        .arg("tsv")
        .output()
        .with_context(|| "failed to run tesseract (is it installed?)")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!("tesseract failed: {}", stderr.trim()));
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_page_languages_to_traineddata() {
        assert_eq!(ocr_languages_for("ja"), Some("jpn+jpn_vert"));
        assert_eq!(ocr_languages_for("jpn"), Some("jpn+jpn_vert"));
        assert_eq!(ocr_languages_for("zh-Hant"), Some("chi_sim+chi_tra"));
        assert_eq!(ocr_languages_for("auto"), None);
    }

    #[test]
    fn configured_languages_override_the_hint() {
        assert_eq!(
            resolve_ocr_languages(Some("jpn+jpn_vert+eng"), "jpn"),
            "jpn+jpn_vert+eng"
        );
        assert_eq!(resolve_ocr_languages(Some("  "), "jpn"), "jpn+jpn_vert");
        assert_eq!(resolve_ocr_languages(None, "ko"), "kor");
        assert_eq!(resolve_ocr_languages(None, "auto"), "eng");
        let recognizer = TesseractRecognizer::new().with_languages(Some(String::new()));
        assert_eq!(recognizer.languages, None);
    }
}
