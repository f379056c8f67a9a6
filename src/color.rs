//! Color helpers: dominant color extraction and gradient construction.
//!
//! Everything here is a pure function over bytes and colors so it can be
//! tested without a display.

use image::imageops::FilterType;
use serde::{Deserialize, Serialize};

use crate::error::ColorError;

/// Symmetric gradient, outer edge to outer edge
pub const STOP_COUNT: usize = 7;
pub type GradientStops = [Rgb; STOP_COUNT];

/// Neutral gradient used with no artwork and during resets
pub const DEFAULT_GRADIENT: GradientStops = [
    Rgb::from_rgb(0x1e, 0x29, 0x3b),
    Rgb::from_rgb(0x25, 0x63, 0xeb),
    Rgb::from_rgb(0x81, 0x8c, 0xf8),
    Rgb::from_rgb(0xf4, 0x72, 0xb6),
    Rgb::from_rgb(0x81, 0x8c, 0xf8),
    Rgb::from_rgb(0x25, 0x63, 0xeb),
    Rgb::from_rgb(0x1e, 0x29, 0x3b),
];

/// Accent colors, bucketed by hue (orange, pink, yellow, purple, cyan, teal)
pub const ACCENT_PALETTE: [Rgb; 6] = [
    Rgb::from_rgb(0xf9, 0x73, 0x16),
    Rgb::from_rgb(0xec, 0x48, 0x99),
    Rgb::from_rgb(0xfd, 0xe0, 0x47),
    Rgb::from_rgb(0xa8, 0x55, 0xf7),
    Rgb::from_rgb(0x22, 0xd3, 0xee),
    Rgb::from_rgb(0x14, 0xb8, 0xa6),
];

/// Below this saturation a color has no meaningful hue
const GRAY_SATURATION: f32 = 0.05;

const DARK_LUMINANCE: f32 = 100.0;
const TARGET_LIGHTNESS: f32 = 0.65;
const LIGHTEN_AMOUNT: f32 = 0.6;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const WHITE: Self = Self::from_rgb(255, 255, 255);
    pub const BLACK: Self = Self::from_rgb(0, 0, 0);

    pub const fn from_rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Linear interpolation per channel, rounded
    pub fn lerp(self, other: Self, t: f32) -> Self {
        let t = t.clamp(0.0, 1.0);
        let channel = |a: u8, b: u8| (a as f32 + (b as f32 - a as f32) * t).round().clamp(0.0, 255.0) as u8;
        Self {
            r: channel(self.r, other.r),
            g: channel(self.g, other.g),
            b: channel(self.b, other.b),
        }
    }

    pub fn to_hex(self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }

    /// Perceived brightness on a 0-255 scale
    pub fn luminance(self) -> f32 {
        0.299 * self.r as f32 + 0.587 * self.g as f32 + 0.114 * self.b as f32
    }

    /// (hue degrees, saturation 0-1, lightness 0-1)
    pub fn to_hsl(self) -> (f32, f32, f32) {
        let r = self.r as f32 / 255.0;
        let g = self.g as f32 / 255.0;
        let b = self.b as f32 / 255.0;

        let max = r.max(g).max(b);
        let min = r.min(g).min(b);
        let delta = max - min;
        let l = (max + min) / 2.0;

        if delta == 0.0 {
            return (0.0, 0.0, l);
        }

        let s = delta / (1.0 - (2.0 * l - 1.0).abs());
        let sector = if max == r {
            ((g - b) / delta) % 6.0
        } else if max == g {
            (b - r) / delta + 2.0
        } else {
            (r - g) / delta + 4.0
        };

        let mut h = sector * 60.0;

        if h < 0.0 {
            h += 360.0;
        }
        (h, s, l)
    }

    pub fn from_hsl(h: f32, s: f32, l: f32) -> Self {
        let c = (1.0 - (2.0 * l - 1.0).abs()) * s;
        let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
        let m = l - c / 2.0;

        let (r, g, b) = match h {
            h if (0.0..60.0).contains(&h) => (c, x, 0.0),
            h if (60.0..120.0).contains(&h) => (x, c, 0.0),
            h if (120.0..180.0).contains(&h) => (0.0, c, x),
            h if (180.0..240.0).contains(&h) => (0.0, x, c),
            h if (240.0..300.0).contains(&h) => (x, 0.0, c),
            _ => (c, 0.0, x),
        };

        let channel = |v: f32| ((v + m) * 255.0).round().clamp(0.0, 255.0) as u8;
        Self::from_rgb(channel(r), channel(g), channel(b))
    }
}

/// Alpha-weighted average color of raw RGBA pixels.
/// `None` when every pixel is fully transparent.
pub fn average_rgba(pixels: &[u8]) -> Option<Rgb> {
    let mut total = 0.0f64;
    let (mut r, mut g, mut b) = (0.0f64, 0.0f64, 0.0f64);

    for px in pixels.chunks_exact(4) {
        let alpha = px[3] as f64 / 255.0;
        if alpha == 0.0 {
            continue;
        }
        r += px[0] as f64 * alpha;
        g += px[1] as f64 * alpha;
        b += px[2] as f64 * alpha;
        total += alpha;
    }

    if total == 0.0 {
        return None;
    }

    Some(Rgb::from_rgb(
        (r / total).round() as u8,
        (g / total).round() as u8,
        (b / total).round() as u8,
    ))
}

/// Decode artwork, downscale to `sample_size` square and average it
pub fn dominant_color(image_bytes: &[u8], sample_size: u32) -> Result<Option<Rgb>, ColorError> {
    let image = image::load_from_memory(image_bytes)?;
    let size = sample_size.max(1);
    let sample = image.resize_exact(size, size, FilterType::Triangle).to_rgba8();
    Ok(average_rgba(sample.as_raw()))
}

/// Accent color for a base color, bucketed by hue
pub fn accent_for(color: Rgb) -> Rgb {
    let (h, s, _) = color.to_hsl();
    if !h.is_finite() || s < GRAY_SATURATION {
        return ACCENT_PALETTE[0];
    }

    let hue = h.clamp(0.0, 359.0);
    let index = ((hue / 360.0) * ACCENT_PALETTE.len() as f32).floor() as usize;
    ACCENT_PALETTE[index.min(ACCENT_PALETTE.len() - 1)]
}

/// Seven stops: outer edge, edge, near center, center, near center, edge, outer edge
pub fn gradient_for(color: Option<Rgb>) -> GradientStops {
    let color = match color {
        Some(c) => c,
        None => return DEFAULT_GRADIENT,
    };

    let center = color.lerp(Rgb::WHITE, 0.05);
    let near_center = color.lerp(Rgb::WHITE, 0.02);
    let edge = color.lerp(accent_for(color), 0.08);
    let outer_edge = edge.lerp(Rgb::BLACK, 0.06);

    [outer_edge, edge, near_center, center, near_center, edge, outer_edge]
}

pub fn interpolate_stops(from: &GradientStops, to: &GradientStops, progress: f32) -> GradientStops {
    let mut stops = *from;
    for (stop, target) in stops.iter_mut().zip(to.iter()) {
        *stop = stop.lerp(*target, progress);
    }
    stops
}

/// Raise the lightness of dark colors so they stay readable on a dark UI
pub fn lighten_dark(color: Rgb) -> Rgb {
    if color.luminance() >= DARK_LUMINANCE {
        return color;
    }

    let (h, s, l) = color.to_hsl();
    let lightness = TARGET_LIGHTNESS.min(l + (TARGET_LIGHTNESS - l) * LIGHTEN_AMOUNT);
    Rgb::from_hsl(h, s, lightness)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, ImageOutputFormat, Rgba};
    use std::io::Cursor;

    fn png_bytes(width: u32, height: u32, pixel: impl Fn(u32, u32) -> Rgba<u8>) -> Vec<u8> {
        let img = ImageBuffer::from_fn(width, height, pixel);
        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut bytes), ImageOutputFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn test_lerp_boundaries() {
        let black = Rgb::BLACK;
        let white = Rgb::WHITE;
        assert_eq!(black.lerp(white, 0.0), black);
        assert_eq!(black.lerp(white, 1.0), white);
        assert_eq!(black.lerp(white, -0.1), black);
        assert_eq!(black.lerp(white, 1.1), white);
        assert_eq!(black.lerp(white, 0.5), Rgb::from_rgb(128, 128, 128));
    }

    #[test]
    fn test_to_hex() {
        assert_eq!(Rgb::from_rgb(0x1e, 0x29, 0x3b).to_hex(), "#1e293b");
        assert_eq!(Rgb::from_rgb(0xf9, 0x73, 0x16).to_hex(), "#f97316");
    }

    #[test]
    fn test_average_ignores_transparent_pixels() {
        let pixels = [255, 0, 0, 255, 0, 0, 255, 0];
        assert_eq!(average_rgba(&pixels), Some(Rgb::from_rgb(255, 0, 0)));
        assert_eq!(average_rgba(&[1, 2, 3, 0]), None);
    }

    #[test]
    fn test_average_is_alpha_weighted() {
        // Opaque red plus mostly transparent blue
        let pixels = [255, 0, 0, 255, 0, 0, 255, 85];
        let mixed = average_rgba(&pixels).unwrap();
        assert!(mixed.r > mixed.b);
        assert!(mixed.b > 0);
    }

    #[test]
    fn test_dominant_color_of_solid_png() {
        let bytes = png_bytes(64, 48, |_, _| Rgba([30, 120, 200, 255]));
        assert_eq!(dominant_color(&bytes, 32).unwrap(), Some(Rgb::from_rgb(30, 120, 200)));
    }

    #[test]
    fn test_dominant_color_rejects_garbage() {
        assert!(matches!(dominant_color(b"not an image", 32), Err(ColorError::Decode(_))));
    }

    #[test]
    fn test_accent_buckets() {
        // Gray has no hue
        assert_eq!(accent_for(Rgb::from_rgb(120, 120, 120)), ACCENT_PALETTE[0]);
        // Pure red, hue 0
        assert_eq!(accent_for(Rgb::from_rgb(255, 0, 0)), ACCENT_PALETTE[0]);
        // Pure green, hue 120 -> bucket 2
        assert_eq!(accent_for(Rgb::from_rgb(0, 255, 0)), ACCENT_PALETTE[2]);
        // Pure blue, hue 240 -> bucket 4
        assert_eq!(accent_for(Rgb::from_rgb(0, 0, 255)), ACCENT_PALETTE[4]);
    }

    #[test]
    fn test_gradient_is_symmetric() {
        let stops = gradient_for(Some(Rgb::from_rgb(40, 90, 160)));
        for i in 0..STOP_COUNT / 2 {
            assert_eq!(stops[i], stops[STOP_COUNT - 1 - i]);
        }
        assert_eq!(gradient_for(None), DEFAULT_GRADIENT);
    }

    #[test]
    fn test_interpolate_stops_endpoints() {
        let target = gradient_for(Some(Rgb::from_rgb(200, 30, 30)));
        assert_eq!(interpolate_stops(&DEFAULT_GRADIENT, &target, 0.0), DEFAULT_GRADIENT);
        assert_eq!(interpolate_stops(&DEFAULT_GRADIENT, &target, 1.0), target);
    }

    #[test]
    fn test_hsl_round_trip() {
        for color in [
            Rgb::from_rgb(255, 0, 0),
            Rgb::from_rgb(12, 200, 90),
            Rgb::from_rgb(30, 41, 59),
            Rgb::from_rgb(250, 250, 250),
        ] {
            let (h, s, l) = color.to_hsl();
            assert_eq!(Rgb::from_hsl(h, s, l), color);
        }
    }

    #[test]
    fn test_lighten_dark_only_touches_dark_colors() {
        let bright = Rgb::from_rgb(240, 200, 120);
        assert_eq!(lighten_dark(bright), bright);

        let dark = Rgb::from_rgb(20, 30, 60);
        let lighter = lighten_dark(dark);
        assert!(lighter.luminance() > dark.luminance());
        assert!(lighter.to_hsl().2 <= TARGET_LIGHTNESS + 0.01);
    }
}
