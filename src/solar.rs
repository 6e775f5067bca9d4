//! Solar clock
//!
//! Derives a daylight color from the position of the sun at a given location: a black-body
//! color whose temperature follows a parabola between sunrise and sunset, scaled by an
//! intensity curve that peaks at solar noon.

use std::{f64::consts::PI, sync::Arc};

use chrono::{DateTime, Datelike, FixedOffset, Local, NaiveDate, TimeZone, Timelike, Utc};

use crate::{
    color::{blackbody, Color},
    models::Location,
};

/// Source of sunrise and sunset instants
pub trait Ephemeris: Send + Sync {
    /// Sunrise and sunset for the given date and location, or `None` if the sun does not rise
    /// or does not set on that day
    fn sun_times(
        &self,
        date: NaiveDate,
        location: &Location,
    ) -> Option<(DateTime<Utc>, DateTime<Utc>)>;
}

/// [Ephemeris] backed by the `sunrise` crate
#[derive(Debug, Default, Clone, Copy)]
pub struct SunriseEphemeris;

impl Ephemeris for SunriseEphemeris {
    fn sun_times(
        &self,
        date: NaiveDate,
        location: &Location,
    ) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let (sunrise, sunset) = sunrise::sunrise_sunset(
            location.latitude,
            location.longitude,
            date.year(),
            date.month(),
            date.day(),
        );

        let sunrise = Utc.timestamp_opt(sunrise, 0).single()?;
        let sunset = Utc.timestamp_opt(sunset, 0).single()?;

        // Polar day and night yield degenerate timestamps
        if sunset > sunrise {
            Some((sunrise, sunset))
        } else {
            None
        }
    }
}

/// Something that provides the current daylight color
pub trait Daylight: Send {
    fn color(&self) -> Color;
}

/// Normalize an hour that went at most one day out of [0, 24)
pub fn wrap_hour(hour: f64) -> f64 {
    if hour < 0.0 {
        hour + 24.0
    } else if hour >= 24.0 {
        hour - 24.0
    } else {
        hour
    }
}

fn decimal_hour<Tz: TimeZone>(instant: &DateTime<Tz>) -> f64 {
    instant.hour() as f64 + instant.minute() as f64 / 60.0 + instant.second() as f64 / 3600.0
}

/// Convert an instant to a local decimal hour using the given offset
fn local_hour(instant: &DateTime<Utc>, offset: &FixedOffset) -> f64 {
    wrap_hour(decimal_hour(instant) + offset.local_minus_utc() as f64 / 3600.0)
}

/// Sun position at one instant, as local decimal hours
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolarSample {
    pub time: f64,
    /// Sunrise and sunset, `None` during polar day or night
    pub daylight: Option<(f64, f64)>,
}

impl SolarSample {
    pub fn sunrise(&self) -> Option<f64> {
        self.daylight.map(|(sunrise, _)| sunrise)
    }

    pub fn sunset(&self) -> Option<f64> {
        self.daylight.map(|(_, sunset)| sunset)
    }

    /// Position of the current time in the daylight window: 0 at sunrise, 1 at sunset, `None`
    /// outside of it
    pub fn daylight_phase(&self) -> Option<f64> {
        let (sunrise, mut sunset) = self.daylight?;
        let mut time = self.time;

        // The window crosses midnight once shifted to local time
        if sunset < sunrise {
            sunset += 24.0;
            if time < sunrise {
                time += 24.0;
            }
        }

        if sunset <= sunrise || time < sunrise || time > sunset {
            None
        } else {
            Some((time - sunrise) / (sunset - sunrise))
        }
    }

    /// Correlated color temperature in Kelvin
    pub fn temperature(&self) -> f64 {
        let t = self
            .daylight_phase()
            .map(|phase| 2.0 * phase - 1.0)
            .unwrap_or(1.0);

        ((0.839 * (1.0 - t * t).max(0.0).sqrt() + 0.348) * 6000.0).clamp(0.0, 10000.0)
    }

    /// Light intensity in [0, 1]
    pub fn intensity(&self) -> f64 {
        match self.daylight_phase() {
            Some(phase) => {
                let intensity = (phase * PI).sin().powf(1.0 / 10.0);

                if intensity.is_nan() {
                    0.0
                } else {
                    intensity.clamp(0.0, 1.0)
                }
            }
            None => 0.0,
        }
    }

    /// Daylight color, black outside of [sunrise, sunset]
    pub fn color(&self) -> Color {
        if self.daylight_phase().is_some() {
            blackbody(self.temperature()).scaled(self.intensity())
        } else {
            Color::BLACK
        }
    }
}

#[derive(Clone)]
pub struct SolarClock {
    location: Location,
    ephemeris: Arc<dyn Ephemeris>,
}

impl SolarClock {
    pub fn new(location: Location) -> Self {
        Self::with_ephemeris(location, Arc::new(SunriseEphemeris))
    }

    pub fn with_ephemeris(location: Location, ephemeris: Arc<dyn Ephemeris>) -> Self {
        Self {
            location,
            ephemeris,
        }
    }

    pub fn sample_at(&self, now: DateTime<FixedOffset>) -> SolarSample {
        let offset = *now.offset();
        let daylight = self
            .ephemeris
            .sun_times(now.date_naive(), &self.location)
            .map(|(sunrise, sunset)| (local_hour(&sunrise, &offset), local_hour(&sunset, &offset)));

        SolarSample {
            time: local_hour(&now.with_timezone(&Utc), &offset),
            daylight,
        }
    }

    pub fn sample(&self) -> SolarSample {
        self.sample_at(Local::now().fixed_offset())
    }

    /// Current local time, in decimal hours
    pub fn time(&self) -> f64 {
        self.sample().time
    }

    /// Today's local sunrise, in decimal hours
    pub fn sunrise(&self) -> Option<f64> {
        self.sample().sunrise()
    }

    /// Today's local sunset, in decimal hours
    pub fn sunset(&self) -> Option<f64> {
        self.sample().sunset()
    }

    pub fn color(&self) -> Color {
        self.sample().color()
    }
}

impl Daylight for SolarClock {
    fn color(&self) -> Color {
        SolarClock::color(self)
    }
}

impl std::fmt::Debug for SolarClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SolarClock")
            .field("location", &self.location)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveTime;

    use super::*;

    /// Sun rises and sets at fixed UTC times every day
    struct FixedEphemeris {
        sunrise: NaiveTime,
        sunset: NaiveTime,
    }

    impl Ephemeris for FixedEphemeris {
        fn sun_times(
            &self,
            date: NaiveDate,
            _location: &Location,
        ) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
            Some((
                Utc.from_utc_datetime(&date.and_time(self.sunrise)),
                Utc.from_utc_datetime(&date.and_time(self.sunset)),
            ))
        }
    }

    struct PolarNight;

    impl Ephemeris for PolarNight {
        fn sun_times(
            &self,
            _date: NaiveDate,
            _location: &Location,
        ) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
            None
        }
    }

    const BRUSSELS: Location = Location {
        longitude: 4.35,
        latitude: 50.85,
    };

    fn clock(sunrise: (u32, u32), sunset: (u32, u32)) -> SolarClock {
        SolarClock::with_ephemeris(
            BRUSSELS,
            Arc::new(FixedEphemeris {
                sunrise: NaiveTime::from_hms_opt(sunrise.0, sunrise.1, 0).unwrap(),
                sunset: NaiveTime::from_hms_opt(sunset.0, sunset.1, 0).unwrap(),
            }),
        )
    }

    fn at(offset_hours: i32, hour: u32, minute: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(offset_hours * 3600)
            .unwrap()
            .with_ymd_and_hms(2024, 6, 21, hour, minute, 0)
            .unwrap()
    }

    #[test]
    fn test_wrap_hour() {
        assert_eq!(wrap_hour(-1.5), 22.5);
        assert_eq!(wrap_hour(24.0), 0.0);
        assert_eq!(wrap_hour(25.25), 1.25);
        assert_eq!(wrap_hour(12.0), 12.0);
    }

    #[test]
    fn test_local_hours() {
        let clock = clock((5, 0), (19, 30));
        let sample = clock.sample_at(at(2, 14, 15));

        assert_eq!(sample.time, 14.25);
        assert_eq!(sample.sunrise(), Some(7.0));
        assert_eq!(sample.sunset(), Some(21.5));
    }

    #[test]
    fn test_sunrise_wraps_past_midnight() {
        let clock = clock((21, 0), (9, 0));
        let sample = clock.sample_at(at(10, 12, 0));

        assert_eq!(sample.sunrise(), Some(7.0));
        assert_eq!(sample.sunset(), Some(19.0));
    }

    #[test]
    fn test_intensity_curve() {
        let clock = clock((5, 0), (19, 0));

        assert_eq!(clock.sample_at(at(0, 4, 0)).intensity(), 0.0);
        assert_eq!(clock.sample_at(at(0, 5, 0)).intensity(), 0.0);
        assert_eq!(clock.sample_at(at(0, 20, 0)).intensity(), 0.0);

        let midpoint = clock.sample_at(at(0, 12, 0)).intensity();
        assert!((midpoint - 1.0).abs() < 1e-12);

        for hour in 6..19 {
            for minute in [0, 30] {
                let intensity = clock.sample_at(at(0, hour, minute)).intensity();
                assert!(intensity > 0.0, "{}:{}", hour, minute);
                assert!(intensity <= midpoint, "{}:{}", hour, minute);
            }
        }
    }

    #[test]
    fn test_temperature_peaks_at_noon() {
        let clock = clock((5, 0), (19, 0));

        let noon = clock.sample_at(at(0, 12, 0)).temperature();
        assert!((noon - 7122.0).abs() < 1e-6);

        let morning = clock.sample_at(at(0, 7, 0)).temperature();
        let evening = clock.sample_at(at(0, 17, 0)).temperature();
        assert!(morning < noon);
        assert!((morning - evening).abs() < 1e-6);

        let night = clock.sample_at(at(0, 23, 0)).temperature();
        assert!((night - 2088.0).abs() < 1e-6);
    }

    #[test]
    fn test_color_is_black_at_night() {
        let clock = clock((5, 0), (19, 0));

        assert_eq!(clock.sample_at(at(0, 2, 0)).color(), Color::BLACK);
        assert_eq!(clock.sample_at(at(0, 5, 0)).color().brightness(), 0.0);

        let noon = clock.sample_at(at(0, 12, 0)).color();
        assert!(noon.brightness() > 99.0);
    }

    #[test]
    fn test_daylight_across_midnight() {
        let clock = clock((20, 0), (8, 0));
        let sample = clock.sample_at(at(0, 2, 0));

        assert_eq!(sample.daylight_phase(), Some(0.5));
        assert!((sample.intensity() - 1.0).abs() < 1e-12);
        assert_eq!(clock.sample_at(at(0, 12, 0)).daylight_phase(), None);
    }

    #[test]
    fn test_polar_night() {
        let clock = SolarClock::with_ephemeris(BRUSSELS, Arc::new(PolarNight));
        let sample = clock.sample_at(at(0, 12, 0));

        assert_eq!(sample.sunrise(), None);
        assert_eq!(sample.intensity(), 0.0);
        assert_eq!(sample.color(), Color::BLACK);
    }
}
