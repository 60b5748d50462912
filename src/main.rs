use anyhow::{Result, anyhow};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "overlay-translator-rust",
    version,
    about = "Overlay machine-translated text onto the text regions of an image"
)]
struct Cli {
    /// Image to translate (png/jpeg/webp/bmp/gif/tiff)
    #[arg(short = 'i', long = "image")]
    image: Option<String>,

    /// Target language (default: en)
    #[arg(short = 'l', long = "lang", default_value = "en")]
    lang: String,

    /// Source language (ISO 639-1/2/3), also picks the OCR language pack
    #[arg(short = 'L', long = "source-lang", default_value = "jpn")]
    source_lang: String,

    /// Output path; .svg writes the overlay document, anything else a raster image
    #[arg(short = 'o', long = "out")]
    out: Option<String>,

    /// Read extra settings from a local TOML file
    #[arg(short = 'r', long = "read-settings")]
    read_settings: Option<String>,

    /// Print the debug log stream after the run
    #[arg(long = "show-log")]
    show_log: bool,

    /// Show installed tesseract language packs and exit
    #[arg(long = "show-ocr-languages")]
    show_ocr_languages: bool,

    /// Enable verbose logging
    #[arg(long = "verbose")]
    verbose: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    overlay_translator_rust::logging::init(cli.verbose)?;

    if cli.show_ocr_languages {
        let languages = overlay_translator_rust::recognition::list_tesseract_languages()?;
        println!("{}", languages.join("\n"));
        return Ok(());
    }

    let image = cli
        .image
        .ok_or_else(|| anyhow!("--image is required"))?;
    let output = overlay_translator_rust::run(overlay_translator_rust::Config {
        image_path: image,
        lang: cli.lang,
        source_lang: cli.source_lang,
        out: cli.out,
        settings_path: cli.read_settings,
        show_log: cli.show_log,
    })
    .await?;

    println!("{}", output);
    Ok(())
}
