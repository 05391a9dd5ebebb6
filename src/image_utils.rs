use image::{GrayImage, Luma, Rgb};
use imageproc::rect::Rect;

pub const WHITE: Luma<u8> = Luma([u8::MAX]);
pub const BLACK: Luma<u8> = Luma([u8::MIN]);

/// Ink pixels in a binary mask.
pub const FOREGROUND: Luma<u8> = WHITE;
/// Paper pixels in a binary mask.
pub const BACKGROUND: Luma<u8> = BLACK;

pub const RED: Rgb<u8> = Rgb([255, 0, 0]);
pub const GREEN: Rgb<u8> = Rgb([0, 255, 0]);
pub const BLUE: Rgb<u8> = Rgb([0, 0, 255]);
pub const CYAN: Rgb<u8> = Rgb([0, 255, 255]);
pub const ORANGE: Rgb<u8> = Rgb([255, 165, 0]);
pub const PINK: Rgb<u8> = Rgb([255, 0, 255]);
pub const DARK_BLUE: Rgb<u8> = Rgb([0, 0, 128]);

/// Determines the number of pixels in an image that match the given luma.
pub fn count_pixels(img: &GrayImage, luma: &Luma<u8>) -> u32 {
    img.pixels().filter(|p| *p == luma).count() as u32
}

/// Determines the number of pixels inside `rect` that match the given luma.
/// Parts of the rect outside the image are ignored.
pub fn count_pixels_in_rect(img: &GrayImage, rect: &Rect, luma: &Luma<u8>) -> u32 {
    let Some(rect) = clip_rect(rect, img.width(), img.height()) else {
        return 0;
    };

    let mut count = 0;
    for y in rect.top()..=rect.bottom() {
        for x in rect.left()..=rect.right() {
            if img.get_pixel(x as u32, y as u32) == luma {
                count += 1;
            }
        }
    }
    count
}

/// Intersects `rect` with the bounds of a `width`×`height` image.
pub fn clip_rect(rect: &Rect, width: u32, height: u32) -> Option<Rect> {
    if width == 0 || height == 0 {
        return None;
    }
    Rect::at(0, 0).of_size(width, height).intersect(*rect)
}

/// Surrounds the image with `padding` pixels of `luma` on every side.
pub fn pad(img: &GrayImage, padding: u32, luma: Luma<u8>) -> GrayImage {
    let mut out = GrayImage::from_pixel(
        img.width() + 2 * padding,
        img.height() + 2 * padding,
        luma,
    );
    for (x, y, pixel) in img.enumerate_pixels() {
        out.put_pixel(x + padding, y + padding, *pixel);
    }
    out
}
