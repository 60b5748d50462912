use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::delivery::DeliveryConfig;
use crate::extract::ExtractConfig;
use crate::overlay::OverlayStyle;
use crate::page::ProcessorConfig;
use crate::recognition::SPARSE_TEXT_PSM;

const DEFAULT_SETTINGS_TOML: &str = include_str!("../settings.toml");

#[derive(Debug, Clone)]
pub struct Settings {
    pub extract: ExtractConfig,
    pub remote_url: Option<String>,
    pub remote_timeout: Duration,
    pub max_concurrent_translations: usize,
    pub load_timeout: Duration,
    pub layout_timeout: Duration,
    pub delivery: DeliveryConfig,
    pub style: OverlayStyle,
    pub ocr_languages: Option<String>,
    pub ocr_psm: u32,
}

impl Default for Settings {
    fn default() -> Self {
        let processor = ProcessorConfig::default();
        Self {
            extract: processor.extract,
            remote_url: None,
            remote_timeout: Duration::from_secs(15),
            max_concurrent_translations: processor.max_concurrent_translations,
            load_timeout: processor.load_timeout,
            layout_timeout: processor.layout_timeout,
            delivery: DeliveryConfig::default(),
            style: processor.style,
            ocr_languages: None,
            ocr_psm: SPARSE_TEXT_PSM,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    extract: Option<ExtractSettings>,
    translate: Option<TranslateSettings>,
    layout: Option<LayoutSettings>,
    delivery: Option<DeliverySettings>,
    overlay: Option<OverlaySettings>,
    ocr: Option<OcrSettings>,
}

#[derive(Debug, Default, Deserialize)]
struct ExtractSettings {
    min_confidence: Option<f32>,
    whole_image_min_confidence: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
struct TranslateSettings {
    remote_url: Option<String>,
    remote_timeout_ms: Option<u64>,
    max_concurrent_translations: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct LayoutSettings {
    load_timeout_ms: Option<u64>,
    layout_timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct DeliverySettings {
    max_attempts: Option<usize>,
    inject_delay_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct OverlaySettings {
    fill_color: Option<String>,
    text_color: Option<String>,
    stroke_color: Option<String>,
    failure_color: Option<String>,
    font_size: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
struct OcrSettings {
    languages: Option<String>,
    psm: Option<u32>,
}

/// Loads the embedded defaults, then every settings file that exists, later
/// layers overriding earlier ones.
pub fn load_settings(extra_path: Option<&Path>) -> Result<Settings> {
    ensure_home_settings_file()?;

    let mut ordered_paths = vec![
        PathBuf::from("settings.toml"),
        PathBuf::from("settings.local.toml"),
    ];
    if let Some(home) = home_dir() {
        ordered_paths.push(home.join("settings.toml"));
    }
    if let Some(extra) = extra_path {
        if !extra.exists() {
            return Err(anyhow!("settings file not found: {}", extra.display()));
        }
        ordered_paths.push(extra.to_path_buf());
    }
    load_layers(&ordered_paths)
}

fn load_layers(paths: &[PathBuf]) -> Result<Settings> {
    let mut settings = Settings::default();
    let defaults: SettingsFile =
        toml::from_str(DEFAULT_SETTINGS_TOML).with_context(|| "failed to parse default settings")?;
    settings.merge(defaults);

    for path in paths {
        if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("failed to read settings: {}", path.display()))?;
            let parsed: SettingsFile = toml::from_str(&content)
                .with_context(|| format!("failed to parse settings: {}", path.display()))?;
            settings.merge(parsed);
        }
    }
    Ok(settings)
}

impl Settings {
    pub fn processor_config(&self) -> ProcessorConfig {
        ProcessorConfig {
            extract: self.extract.clone(),
            style: self.style.clone(),
            load_timeout: self.load_timeout,
            layout_timeout: self.layout_timeout,
            max_concurrent_translations: self.max_concurrent_translations,
        }
    }

    fn merge(&mut self, incoming: SettingsFile) {
        if let Some(extract) = incoming.extract {
            if let Some(value) = extract.min_confidence.filter(|v| (0.0..=100.0).contains(v)) {
                self.extract.min_confidence = value;
            }
            if let Some(value) = extract
                .whole_image_min_confidence
                .filter(|v| (0.0..=100.0).contains(v))
            {
                self.extract.whole_image_min_confidence = value;
            }
        }
        if let Some(translate) = incoming.translate {
            if let Some(url) = translate.remote_url {
                self.remote_url = Some(url).filter(|url| !url.trim().is_empty());
            }
            if let Some(ms) = translate.remote_timeout_ms.filter(|ms| *ms > 0) {
                self.remote_timeout = Duration::from_millis(ms);
            }
            if let Some(limit) = translate.max_concurrent_translations.filter(|n| *n > 0) {
                self.max_concurrent_translations = limit;
            }
        }
        if let Some(layout) = incoming.layout {
            if let Some(ms) = layout.load_timeout_ms.filter(|ms| *ms > 0) {
                self.load_timeout = Duration::from_millis(ms);
            }
            if let Some(ms) = layout.layout_timeout_ms.filter(|ms| *ms > 0) {
                self.layout_timeout = Duration::from_millis(ms);
            }
        }
        if let Some(delivery) = incoming.delivery {
            if let Some(attempts) = delivery.max_attempts.filter(|n| *n > 0) {
                self.delivery.max_attempts = attempts;
            }
            if let Some(ms) = delivery.inject_delay_ms {
                self.delivery.inject_delay = Duration::from_millis(ms);
            }
        }
        if let Some(overlay) = incoming.overlay {
            merge_color(&mut self.style.fill_color, overlay.fill_color);
            merge_color(&mut self.style.text_color, overlay.text_color);
            merge_color(&mut self.style.stroke_color, overlay.stroke_color);
            merge_color(&mut self.style.failure_color, overlay.failure_color);
            if let Some(size) = overlay.font_size.filter(|size| *size > 0.0) {
                self.style.font_size = Some(size);
            }
        }
        if let Some(ocr) = incoming.ocr {
            if let Some(languages) = ocr.languages.filter(|l| !l.trim().is_empty()) {
                self.ocr_languages = Some(languages);
            }
            if let Some(psm) = ocr.psm {
                self.ocr_psm = psm;
            }
        }
    }
}

fn merge_color(slot: &mut String, value: Option<String>) {
    if let Some(color) = value {
        if !color.trim().is_empty() {
            *slot = color;
        }
    }
}

fn ensure_home_settings_file() -> Result<()> {
    let Some(home) = home_dir() else {
        return Ok(());
    };
    fs::create_dir_all(&home)
        .with_context(|| format!("failed to create settings directory: {}", home.display()))?;
    let path = home.join("settings.toml");
    if !path.exists() {
        fs::write(&path, DEFAULT_SETTINGS_TOML)
            .with_context(|| format!("failed to write settings: {}", path.display()))?;
    }
    Ok(())
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().and_then(|home| {
        let home = home.trim();
        if home.is_empty() {
            None
        } else {
            Some(Path::new(home).join(".overlay-translator-rust"))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_defaults_parse() {
        let settings = load_layers(&[]).unwrap();
        assert_eq!(settings.extract.min_confidence, 40.0);
        assert_eq!(settings.max_concurrent_translations, 4);
        assert_eq!(settings.delivery.max_attempts, 3);
        assert_eq!(settings.delivery.inject_delay, Duration::from_millis(500));
        assert_eq!(settings.ocr_psm, 11);
        assert_eq!(settings.ocr_languages, None);
        assert!(settings.remote_url.is_some());
    }

    #[test]
    fn later_layers_override_earlier_ones() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first.toml");
        let second = dir.path().join("second.toml");
        fs::write(
            &first,
            "[translate]\nmax_concurrent_translations = 2\n[overlay]\nfill_color = \"#000000\"\n",
        )
        .unwrap();
        fs::write(
            &second,
            "[translate]\nmax_concurrent_translations = 8\n[overlay]\ntext_color = \"  \"\n[layout]\nlayout_timeout_ms = 0\n[ocr]\nlanguages = \"jpn+eng\"\n",
        )
        .unwrap();
        let missing = dir.path().join("missing.toml");

        let settings = load_layers(&[first, missing, second]).unwrap();
        assert_eq!(settings.max_concurrent_translations, 8);
        assert_eq!(settings.style.fill_color, "#000000");
        assert_eq!(settings.style.text_color, "#111111");
        assert_eq!(settings.layout_timeout, Duration::from_secs(3));
        assert_eq!(settings.ocr_languages.as_deref(), Some("jpn+eng"));
        assert_eq!(settings.processor_config().max_concurrent_translations, 8);
    }

    #[test]
    fn malformed_files_name_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        fs::write(&path, "[translate\n").unwrap();
        let err = load_layers(&[path]).unwrap_err();
        assert!(format!("{:#}", err).contains("broken.toml"));
    }
}
