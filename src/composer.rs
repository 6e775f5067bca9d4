//! Layer composition
//!
//! A [LightComposer] holds the state of the main, rainbow and circadian layers of one strip
//! and blends them into the color sent to the device.

use std::time::Duration;

use crate::{
    color::{Color, Correction, Hsv},
    solar::Daylight,
};

/// Degrees per millisecond for a one second cycle
const HUE_RATE: f64 = 0.36;

/// The main layer keeps its components apart, so a hue chosen while the color is gray or
/// dark is still there once saturation or brightness come back.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MainLayer {
    pub on: bool,
    pub hsv: Hsv,
}

impl MainLayer {
    pub fn color(&self) -> Color {
        Color::from_hsv(self.hsv)
    }
}

impl Default for MainLayer {
    fn default() -> Self {
        Self {
            on: false,
            hsv: Hsv::new(0., 0., 100.),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RainbowLayer {
    pub on: bool,
    pub color: Color,
    /// Speed modifier in [0, 1]
    pub speed: f64,
    started: bool,
}

impl Default for RainbowLayer {
    fn default() -> Self {
        Self {
            on: false,
            color: Color::new(255., 0., 0.),
            speed: 1.0,
            started: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CircadianLayer {
    pub on: bool,
    /// Intensity in [0, 100]
    pub intensity: f64,
}

impl Default for CircadianLayer {
    fn default() -> Self {
        Self {
            on: false,
            intensity: 100.0,
        }
    }
}

pub struct LightComposer {
    main: MainLayer,
    rainbow: RainbowLayer,
    circadian: CircadianLayer,
    correction: Correction,
    cycle_time: Duration,
    daylight: Box<dyn Daylight>,
}

impl LightComposer {
    pub fn new(cycle_time: Duration, correction: Correction, daylight: Box<dyn Daylight>) -> Self {
        Self {
            main: MainLayer::default(),
            rainbow: RainbowLayer::default(),
            circadian: CircadianLayer::default(),
            correction,
            cycle_time,
            daylight,
        }
    }

    pub fn main(&self) -> &MainLayer {
        &self.main
    }

    pub fn rainbow(&self) -> &RainbowLayer {
        &self.rainbow
    }

    pub fn circadian(&self) -> &CircadianLayer {
        &self.circadian
    }

    /// Current color of the daylight source, before intensity scaling
    pub fn daylight(&self) -> Color {
        self.daylight.color()
    }

    pub fn set_main_on(&mut self, on: bool) {
        self.main.on = on;
    }

    pub fn set_main_hue(&mut self, hue: f64) {
        self.main.hsv.hue = hue;
    }

    pub fn set_main_saturation(&mut self, saturation: f64) {
        self.main.hsv.saturation = saturation;
    }

    pub fn set_main_brightness(&mut self, brightness: f64) {
        self.main.hsv.value = brightness;
    }

    /// Toggle the rainbow layer. The first activation starts the rainbow from a copy of the
    /// main color.
    pub fn set_rainbow_on(&mut self, on: bool) {
        if on && !self.rainbow.started {
            self.rainbow.color = self.main.color();
            self.rainbow.started = true;
        }

        self.rainbow.on = on;
    }

    pub fn set_rainbow_hue(&mut self, hue: f64) {
        self.rainbow.color.set_hue(hue);
    }

    pub fn set_rainbow_saturation(&mut self, saturation: f64) {
        self.rainbow.color.set_saturation(saturation);
    }

    /// Set the rainbow speed, in percent of the nominal cycle speed
    pub fn set_rainbow_speed(&mut self, percent: f64) {
        self.rainbow.speed = if percent.is_nan() {
            0.0
        } else {
            (percent / 100.0).clamp(0.0, 1.0)
        };
    }

    pub fn set_circadian_on(&mut self, on: bool) {
        self.circadian.on = on;
    }

    pub fn set_circadian_intensity(&mut self, intensity: f64) {
        self.circadian.intensity = intensity;
    }

    /// Advance the rainbow animation by `elapsed`
    pub fn tick(&mut self, elapsed: Duration) {
        if !self.rainbow.on {
            return;
        }

        let cycle = self.cycle_time.as_secs_f64();
        let delta = if cycle > 0.0 {
            HUE_RATE * elapsed.as_secs_f64() * 1000.0 * self.rainbow.speed / cycle
        } else {
            0.0
        };

        let hsv = self.rainbow.color.to_hsv();

        // A black rainbow would never show its hue again
        let value = if hsv.value > 0.0 { hsv.value } else { 100.0 };

        self.rainbow.color = Color::from_hsva(
            Hsv::new((hsv.hue + delta).rem_euclid(360.0), 100.0, value),
            self.rainbow.color.alpha,
        );
    }

    /// Blend the active layers, without device correction
    pub fn composite(&self) -> Color {
        let base = if !self.main.on {
            Color::BLACK
        } else if self.rainbow.on {
            let hsv = self.rainbow.color.to_hsv();
            Color::from_hsva(
                Hsv::new(hsv.hue, hsv.saturation, self.main.hsv.value),
                self.rainbow.color.alpha,
            )
        } else {
            self.main.color()
        };

        if !self.circadian.on {
            return base;
        }

        let daylight = self.daylight.color();
        let brightness = (daylight.brightness() * self.circadian.intensity / 100.0)
            .min(100.0 - base.brightness())
            .max(0.0);

        base + daylight.with_brightness(brightness)
    }

    /// Final color for the device
    pub fn render(&self) -> Color {
        self.composite().lut_corrected(&self.correction)
    }
}

impl std::fmt::Debug for LightComposer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LightComposer")
            .field("main", &self.main)
            .field("rainbow", &self.rainbow)
            .field("circadian", &self.circadian)
            .field("correction", &self.correction)
            .field("cycle_time", &self.cycle_time)
            .finish()
    }
}
