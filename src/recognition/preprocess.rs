use image::DynamicImage;

/// Flattens alpha onto white, converts to luma and stretches contrast.
///
/// The image is never resized or rotated, so recognizer boxes stay in the
/// source pixel space.
pub(super) fn prepare_for_ocr(image: DynamicImage) -> DynamicImage {
    let rgba = image.to_rgba8();
    let (width, height) = rgba.dimensions();
    let mut luma = image::GrayImage::new(width, height);

    for (x, y, pixel) in rgba.enumerate_pixels() {
        let [r, g, b, a] = pixel.0;
        let alpha = a as f32 / 255.0;
        let r = (r as f32 * alpha + 255.0 * (1.0 - alpha)).round() as u8;
        let g = (g as f32 * alpha + 255.0 * (1.0 - alpha)).round() as u8;
        let b = (b as f32 * alpha + 255.0 * (1.0 - alpha)).round() as u8;
        let value = (0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32).round() as u8;
        luma.put_pixel(x, y, image::Luma([value]));
    }

    DynamicImage::ImageLuma8(contrast_stretch(&luma))
}

fn contrast_stretch(image: &image::GrayImage) -> image::GrayImage {
    let (min, max) = image
        .pixels()
        .fold((255u8, 0u8), |(min, max), pixel| (min.min(pixel[0]), max.max(pixel[0])));
    if max <= min {
        return image.clone();
    }

    let scale = 255.0 / (max as f32 - min as f32);
    let mut output = image.clone();
    for pixel in output.pixels_mut() {
        pixel[0] = ((pixel[0].saturating_sub(min)) as f32 * scale).round() as u8;
    }
    output
}
