//! Color model
//!
//! [Color] stores floating point RGB channels. Channels may leave the 0..=255 range while
//! layers are being composed; they are only rounded and saturated when converted to a
//! [DeviceColor] for the wire.

use std::ops::Add;

use palette::Srgb;
use serde_derive::{Deserialize, Serialize};

use crate::models;

mod blackbody;
pub use blackbody::blackbody;

/// 8-bit color, as transmitted to a device
pub type DeviceColor = Srgb<u8>;

/// Default alpha channel value
pub const DEFAULT_ALPHA: f64 = 100.0;

/// Hue (degrees), saturation (percent) and value (percent)
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Hsv {
    pub hue: f64,
    pub saturation: f64,
    pub value: f64,
}

impl Hsv {
    pub const fn new(hue: f64, saturation: f64, value: f64) -> Self {
        Self {
            hue,
            saturation,
            value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub red: f64,
    pub green: f64,
    pub blue: f64,
    #[serde(default = "default_alpha")]
    pub alpha: f64,
}

fn default_alpha() -> f64 {
    DEFAULT_ALPHA
}

impl Default for Color {
    fn default() -> Self {
        Self::BLACK
    }
}

impl Color {
    pub const BLACK: Color = Color::new(0.0, 0.0, 0.0);

    pub const fn new(red: f64, green: f64, blue: f64) -> Self {
        Self::new_rgba(red, green, blue, DEFAULT_ALPHA)
    }

    pub const fn new_rgba(red: f64, green: f64, blue: f64, alpha: f64) -> Self {
        Self {
            red,
            green,
            blue,
            alpha,
        }
    }

    pub fn from_hsv(hsv: Hsv) -> Self {
        Self::from_hsva(hsv, DEFAULT_ALPHA)
    }

    /// Build a color from HSV components
    ///
    /// The hue is normalized into [0, 360) first, so 360 is red again and negative hues wrap
    /// around. A non-finite hue is treated as 0.
    pub fn from_hsva(hsv: Hsv, alpha: f64) -> Self {
        let hue = normalize_hue(hsv.hue);
        let s = hsv.saturation / 100.0;
        let v = hsv.value / 100.0;

        let k = v * s;
        let x = k * (1.0 - (((hue / 60.0) % 2.0) - 1.0).abs());
        let m = v - k;

        let (r, g, b) = match (hue / 60.0) as u8 {
            0 => (k, x, 0.0),
            1 => (x, k, 0.0),
            2 => (0.0, k, x),
            3 => (0.0, x, k),
            4 => (x, 0.0, k),
            _ => (k, 0.0, x),
        };

        Self::new_rgba((r + m) * 255.0, (g + m) * 255.0, (b + m) * 255.0, alpha)
    }

    pub fn to_hsv(&self) -> Hsv {
        Hsv::new(self.hue(), self.saturation(), self.brightness())
    }

    fn max_channel(&self) -> f64 {
        self.red.max(self.green).max(self.blue)
    }

    fn min_channel(&self) -> f64 {
        self.red.min(self.green).min(self.blue)
    }

    /// Hue in degrees, 0 for grays
    pub fn hue(&self) -> f64 {
        let max = self.max_channel();
        let difference = max - self.min_channel();

        if difference == 0.0 {
            0.0
        } else if self.red == max {
            ((60.0 * (self.green - self.blue) / difference) + 360.0) % 360.0
        } else if self.green == max {
            ((60.0 * (self.blue - self.red) / difference) + 120.0) % 360.0
        } else {
            ((60.0 * (self.red - self.green) / difference) + 240.0) % 360.0
        }
    }

    /// Saturation in percent, 0 for black
    pub fn saturation(&self) -> f64 {
        let max = self.max_channel();

        if max == 0.0 {
            0.0
        } else {
            (max - self.min_channel()) * 100.0 / max
        }
    }

    /// Brightness (HSV value) in percent
    pub fn brightness(&self) -> f64 {
        self.max_channel() * 100.0 / 255.0
    }

    /// Recompute RGB from the given hue and the saturation and brightness derived from the
    /// current channels
    pub fn with_hue(self, hue: f64) -> Self {
        let hsv = self.to_hsv();
        Self::from_hsva(Hsv { hue, ..hsv }, self.alpha)
    }

    pub fn with_saturation(self, saturation: f64) -> Self {
        let hsv = self.to_hsv();
        Self::from_hsva(Hsv { saturation, ..hsv }, self.alpha)
    }

    pub fn with_brightness(self, value: f64) -> Self {
        let hsv = self.to_hsv();
        Self::from_hsva(Hsv { value, ..hsv }, self.alpha)
    }

    pub fn set_hue(&mut self, hue: f64) {
        *self = self.with_hue(hue);
    }

    pub fn set_saturation(&mut self, saturation: f64) {
        *self = self.with_saturation(saturation);
    }

    pub fn set_brightness(&mut self, brightness: f64) {
        *self = self.with_brightness(brightness);
    }

    pub fn set_rgb(&mut self, red: f64, green: f64, blue: f64) {
        self.red = red;
        self.green = green;
        self.blue = blue;
    }

    pub fn set_rgba(&mut self, red: f64, green: f64, blue: f64, alpha: f64) {
        self.set_rgb(red, green, blue);
        self.alpha = alpha;
    }

    /// Multiply all color channels by `k`
    pub fn scaled(&self, k: f64) -> Self {
        Self::new_rgba(self.red * k, self.green * k, self.blue * k, self.alpha)
    }

    /// Apply a per-channel power law: `255 * (channel / 255) ^ exponent`
    pub fn lut_corrected(&self, correction: &Correction) -> Self {
        Self::new_rgba(
            (self.red / 255.0).powf(correction.red) * 255.0,
            (self.green / 255.0).powf(correction.green) * 255.0,
            (self.blue / 255.0).powf(correction.blue) * 255.0,
            self.alpha,
        )
    }

    /// Round and saturate the channels into 8-bit values
    pub fn to_device(&self) -> DeviceColor {
        DeviceColor::new(
            channel_to_u8(self.red),
            channel_to_u8(self.green),
            channel_to_u8(self.blue),
        )
    }
}

/// Channel-wise addition, without clamping. The alpha of the left operand is kept.
impl Add for Color {
    type Output = Color;

    fn add(self, rhs: Color) -> Self::Output {
        Self::new_rgba(
            self.red + rhs.red,
            self.green + rhs.green,
            self.blue + rhs.blue,
            self.alpha,
        )
    }
}

impl From<DeviceColor> for Color {
    fn from(color: DeviceColor) -> Self {
        let (r, g, b) = color.into_components();
        Self::new(r as f64, g as f64, b as f64)
    }
}

fn normalize_hue(hue: f64) -> f64 {
    if !hue.is_finite() {
        return 0.0;
    }

    let hue = hue.rem_euclid(360.0);
    if hue >= 360.0 {
        0.0
    } else {
        hue
    }
}

fn channel_to_u8(value: f64) -> u8 {
    if value.is_nan() {
        0
    } else {
        value.round().clamp(0.0, 255.0) as u8
    }
}

/// Per-channel exponents for [Color::lut_corrected]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Correction {
    pub red: f64,
    pub green: f64,
    pub blue: f64,
}

impl Correction {
    pub const IDENTITY: Correction = Correction::new(1.0, 1.0, 1.0);

    pub const fn new(red: f64, green: f64, blue: f64) -> Self {
        Self { red, green, blue }
    }
}

impl Default for Correction {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl From<&models::ColorCorrection> for Correction {
    fn from(settings: &models::ColorCorrection) -> Self {
        Self::new(
            settings.gamma_red as f64,
            settings.gamma_green as f64,
            settings.gamma_blue as f64,
        )
    }
}
