use anyhow::{Context, Result, anyhow};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use resvg::render;
use std::io::Cursor;
use std::sync::Arc;
use tiny_skia::Pixmap;
use usvg::{Options, Tree, fontdb};

use crate::geometry::Size;

use super::layout::LINE_HEIGHT_RATIO;
use super::{OverlayBox, OverlayStyle};

/// Composes the image and its overlay boxes into one SVG document.
///
/// Boxes are in overlay space (`overlay`); the document is in image pixels.
pub fn render_svg(
    image_bytes: &[u8],
    image_mime: &str,
    image: Size,
    overlay: Size,
    boxes: &[OverlayBox],
    style: &OverlayStyle,
) -> String {
    let encoded = BASE64.encode(image_bytes);
    let data_uri = format!("data:{};base64,{}", image_mime, encoded);
    let scale_x = image.width / overlay.width.max(1.0);
    let scale_y = image.height / overlay.height.max(1.0);

    let mut svg = String::new();
    svg.push_str(&format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" xmlns:xlink="http://www.w3.org/1999/xlink" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#,
        w = image.width,
        h = image.height
    ));
    svg.push_str(&format!(
        r#"<image href="{uri}" xlink:href="{uri}" x="0" y="0" width="{w}" height="{h}" preserveAspectRatio="none"/>"#,
        uri = data_uri,
        w = image.width,
        h = image.height
    ));

    for (idx, overlay_box) in boxes.iter().enumerate() {
        let x = overlay_box.rect.x * scale_x;
        let y = overlay_box.rect.y * scale_y;
        let w = overlay_box.rect.width * scale_x;
        let h = overlay_box.rect.height * scale_y;
        let font_size = overlay_box.font_size * scale_y;
        let line_height = font_size * LINE_HEIGHT_RATIO;
        let padding = (w.min(h) * 0.12).max(1.0);

        svg.push_str(&format!(
            r##"<rect x="{x}" y="{y}" width="{w}" height="{h}" rx="4" fill="{fill}" stroke="{stroke}" stroke-width="2"/>"##,
            fill = &style.fill_color,
            stroke = &style.stroke_color
        ));
        let clip_id = format!("clip-{}", idx);
        svg.push_str(&format!(
            r#"<clipPath id="{id}"><rect x="{x}" y="{y}" width="{w}" height="{h}"/></clipPath>"#,
            id = clip_id
        ));

        let block_height = overlay_box.lines.len() as f32 * line_height;
        let top = y + ((h - block_height) * 0.5).max(padding);
        let center_x = x + w * 0.5;
        svg.push_str(&format!(
            r#"<text x="{cx}" y="{ty}" font-size="{size}" fill="{color}" text-anchor="middle" clip-path="url(#{clip})">"#,
            cx = center_x,
            ty = top + font_size,
            size = font_size,
            color = &style.text_color,
            clip = clip_id
        ));
        for (line_idx, line) in overlay_box.lines.iter().enumerate() {
            let escaped = escape_xml(line);
            if line_idx == 0 {
                svg.push_str(&escaped);
            } else {
                svg.push_str(&format!(
                    r#"<tspan x="{cx}" dy="{dy}">{text}</tspan>"#,
                    cx = center_x,
                    dy = line_height,
                    text = escaped
                ));
            }
        }
        svg.push_str("</text>");
    }

    svg.push_str("</svg>");
    svg
}

pub fn render_svg_bytes(svg: &str, output_mime: &str) -> Result<Vec<u8>> {
    let mut db = fontdb::Database::new();
    db.load_system_fonts();
    let options = Options {
        fontdb: Arc::new(db),
        ..Options::default()
    };
    let tree = Tree::from_str(svg, &options).with_context(|| "failed to parse SVG")?;
    let size = tree.size().to_int_size();
    let mut pixmap =
        Pixmap::new(size.width(), size.height()).ok_or_else(|| anyhow!("empty SVG size"))?;
    let mut pixmap_mut = pixmap.as_mut();
    render(&tree, tiny_skia::Transform::identity(), &mut pixmap_mut);
    let image = image::RgbaImage::from_raw(size.width(), size.height(), pixmap.data().to_vec())
        .ok_or_else(|| anyhow!("failed to build image buffer from SVG"))?;
    let format = image_format_from_mime(output_mime)
        .ok_or_else(|| anyhow!("unsupported output image mime '{}'", output_mime))?;
    let mut bytes = Vec::new();
    let mut cursor = Cursor::new(&mut bytes);
    image::DynamicImage::ImageRgba8(image)
        .write_to(&mut cursor, format)
        .with_context(|| "failed to encode rendered overlay")?;
    Ok(bytes)
}

pub(crate) fn image_format_from_mime(mime: &str) -> Option<image::ImageFormat> {
    match mime {
        "image/png" => Some(image::ImageFormat::Png),
        "image/jpeg" | "image/jpg" => Some(image::ImageFormat::Jpeg),
        "image/gif" => Some(image::ImageFormat::Gif),
        "image/webp" => Some(image::ImageFormat::WebP),
        "image/bmp" => Some(image::ImageFormat::Bmp),
        "image/tiff" => Some(image::ImageFormat::Tiff),
        _ => None,
    }
}

fn escape_xml(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Rect;

    fn overlay_box() -> OverlayBox {
        OverlayBox {
            rect: Rect::new(2.0, 2.0, 56.0, 31.0),
            text: "Fish & <Chips>".to_string(),
            font_size: 12.0,
            lines: vec!["Fish & <Chips>".to_string()],
        }
    }

    #[test]
    fn scales_boxes_into_image_pixels() {
        let svg = render_svg(
            b"png",
            "image/png",
            Size::new(500.0, 500.0),
            Size::new(250.0, 250.0),
            &[overlay_box()],
            &OverlayStyle::default(),
        );
        assert!(svg.starts_with("<svg"));
        assert!(svg.contains(r#"<rect x="4" y="4" width="112" height="62""#));
        assert!(svg.contains("Fish &amp; &lt;Chips&gt;"));
        assert!(svg.contains("data:image/png;base64,"));
    }

    #[test]
    fn rasterizes_to_png() {
        let svg = r##"<svg xmlns="http://www.w3.org/2000/svg" width="4" height="3"><rect width="4" height="3" fill="#ff0000"/></svg>"##;
        let bytes = render_svg_bytes(svg, "image/png").unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (4, 3));
    }

    #[test]
    fn rejects_unknown_output_mime() {
        assert!(image_format_from_mime("image/svg+xml").is_none());
    }
}
