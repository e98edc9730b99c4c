use serde::{Deserialize, Serialize};

/// Packed values below this are too dim to see and are treated as off.
pub const MIN_VISIBLE_BGR: u32 = 0x01_01_01;

/// 8-bit RGB triple. All colour math stays in this space; packing into a wire
/// format happens only at the endpoint boundary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColorRgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl ColorRgb {
    pub const BLACK: Self = Self::new(0, 0, 0);
    pub const WHITE: Self = Self::new(255, 255, 255);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub fn is_off(self) -> bool {
        self == Self::BLACK
    }

    /// Multiplies each channel by `factor`, rounding down.
    pub fn scaled(self, factor: f64) -> Self {
        let channel = |c: u8| (f64::from(c) * factor).floor().clamp(0.0, 255.0) as u8;
        Self::new(channel(self.r), channel(self.g), channel(self.b))
    }

    /// Packs into the `0xBBGGRR` layout used by the lighting endpoint.
    pub fn to_bgr(self) -> u32 {
        (u32::from(self.b) << 16) | (u32::from(self.g) << 8) | u32::from(self.r)
    }

    pub fn from_bgr(packed: u32) -> Self {
        Self::new(
            (packed & 0xFF) as u8,
            ((packed >> 8) & 0xFF) as u8,
            ((packed >> 16) & 0xFF) as u8,
        )
    }

    /// True when the packed value falls under [`MIN_VISIBLE_BGR`].
    pub fn is_below_visible(self) -> bool {
        self.to_bgr() < MIN_VISIBLE_BGR
    }

    /// Linear interpolation towards `other`; `t` is clamped to [0, 1].
    pub fn mix(self, other: Self, t: f32) -> Self {
        let t = t.clamp(0.0, 1.0);
        let lerp = |a: u8, b: u8| (f32::from(a) * (1.0 - t) + f32::from(b) * t).round() as u8;
        Self::new(
            lerp(self.r, other.r),
            lerp(self.g, other.g),
            lerp(self.b, other.b),
        )
    }

    /// Converts HSL (hue in degrees, saturation and lightness in [0, 1]).
    pub fn from_hsl(hue: f32, saturation: f32, lightness: f32) -> Self {
        let h = hue.rem_euclid(360.0) / 60.0;
        let s = saturation.clamp(0.0, 1.0);
        let l = lightness.clamp(0.0, 1.0);

        let chroma = (1.0 - (2.0 * l - 1.0).abs()) * s;
        let x = chroma * (1.0 - (h % 2.0 - 1.0).abs());
        let (r, g, b) = match h as u32 {
            0 => (chroma, x, 0.0),
            1 => (x, chroma, 0.0),
            2 => (0.0, chroma, x),
            3 => (0.0, x, chroma),
            4 => (x, 0.0, chroma),
            _ => (chroma, 0.0, x),
        };
        let m = l - chroma / 2.0;
        let to_u8 = |v: f32| ((v + m) * 255.0).round().clamp(0.0, 255.0) as u8;
        Self::new(to_u8(r), to_u8(g), to_u8(b))
    }
}

/// A colour paired with an opacity in [0, 1], as handed to the render surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorRgba {
    pub rgb: ColorRgb,
    pub alpha: f32,
}

impl ColorRgba {
    pub fn new(rgb: ColorRgb, alpha: f32) -> Self {
        Self {
            rgb,
            alpha: alpha.clamp(0.0, 1.0),
        }
    }

    /// Composites this colour over an opaque background.
    pub fn over(self, background: ColorRgb) -> ColorRgb {
        background.mix(self.rgb, self.alpha)
    }
}
