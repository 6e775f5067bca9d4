use super::Color;

/// Approximate the color of a black body at the given temperature
///
/// Uses Tanner Helland's curve fit, valid between 1000K and 40000K. Channels are clamped
/// into 0..=255.
pub fn blackbody(kelvin: f64) -> Color {
    let temperature = kelvin / 100.0;

    let red = if temperature <= 66.0 {
        255.0
    } else {
        329.698727446 * (temperature - 60.0).powf(-0.1332047592)
    };

    let green = if temperature <= 66.0 {
        99.4708025861 * temperature.ln() - 161.1195681661
    } else {
        288.1221695283 * (temperature - 60.0).powf(-0.0755148492)
    };

    let blue = if temperature >= 66.0 {
        255.0
    } else if temperature <= 19.0 {
        0.0
    } else {
        138.5177312231 * (temperature - 10.0).ln() - 305.0447927307
    };

    Color::new(clamp(red), clamp(green), clamp(blue))
}

fn clamp(channel: f64) -> f64 {
    if channel.is_nan() {
        0.0
    } else {
        channel.clamp(0.0, 255.0)
    }
}
