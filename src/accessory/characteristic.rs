use serde_derive::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};
use thiserror::Error;

use crate::composer::LightComposer;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    Main,
    Rainbow,
    Circadian,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CharacteristicKind {
    On,
    Hue,
    Saturation,
    Brightness,
}

/// Characteristic value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Number(f64),
}

impl Value {
    fn as_bool(self) -> Result<bool, CharacteristicError> {
        match self {
            Self::Bool(value) => Ok(value),
            Self::Number(_) => Err(CharacteristicError::ExpectedBool),
        }
    }

    fn as_number(self) -> Result<f64, CharacteristicError> {
        match self {
            Self::Number(value) => Ok(value),
            Self::Bool(_) => Err(CharacteristicError::ExpectedNumber),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CharacteristicError {
    #[error("expected a boolean value")]
    ExpectedBool,
    #[error("expected a numeric value")]
    ExpectedNumber,
    #[error("{service}.{characteristic} is read-only")]
    ReadOnly {
        service: ServiceKind,
        characteristic: CharacteristicKind,
    },
}

/// Value-changed notification for one characteristic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacteristicUpdate {
    pub accessory: String,
    pub service: ServiceKind,
    pub characteristic: CharacteristicKind,
    pub value: Value,
}

/// Read the last known value of a characteristic
pub fn get(
    composer: &LightComposer,
    service: ServiceKind,
    characteristic: CharacteristicKind,
) -> Value {
    use CharacteristicKind::*;

    match service {
        ServiceKind::Main => {
            let main = composer.main();
            match characteristic {
                On => main.on.into(),
                Hue => main.hsv.hue.into(),
                Saturation => main.hsv.saturation.into(),
                Brightness => main.hsv.value.into(),
            }
        }
        ServiceKind::Rainbow => {
            let rainbow = composer.rainbow();
            match characteristic {
                On => rainbow.on.into(),
                Hue => rainbow.color.hue().into(),
                Saturation => rainbow.color.saturation().into(),
                Brightness => (rainbow.speed * 100.0).into(),
            }
        }
        ServiceKind::Circadian => {
            let circadian = composer.circadian();
            match characteristic {
                On => circadian.on.into(),
                Hue => composer.daylight().hue().into(),
                Saturation => composer.daylight().saturation().into(),
                Brightness => circadian.intensity.into(),
            }
        }
    }
}

/// Apply a characteristic write to the composer state
///
/// Returns the characteristics whose value changed: the written one first, then any other
/// characteristic the write switched. Picking a main hue or saturation leaves rainbow mode.
pub fn set(
    composer: &mut LightComposer,
    service: ServiceKind,
    characteristic: CharacteristicKind,
    value: Value,
) -> Result<Vec<(ServiceKind, CharacteristicKind)>, CharacteristicError> {
    use CharacteristicKind::*;

    let mut changed = vec![(service, characteristic)];

    match (service, characteristic) {
        (ServiceKind::Main, On) => composer.set_main_on(value.as_bool()?),
        (ServiceKind::Main, Hue) | (ServiceKind::Main, Saturation) => {
            let value = value.as_number()?;
            if characteristic == Hue {
                composer.set_main_hue(value);
            } else {
                composer.set_main_saturation(value);
            }

            if composer.rainbow().on {
                composer.set_rainbow_on(false);
                changed.push((ServiceKind::Rainbow, On));
            }
        }
        (ServiceKind::Main, Brightness) => composer.set_main_brightness(value.as_number()?),

        (ServiceKind::Rainbow, On) => composer.set_rainbow_on(value.as_bool()?),
        (ServiceKind::Rainbow, Hue) => composer.set_rainbow_hue(value.as_number()?),
        (ServiceKind::Rainbow, Saturation) => composer.set_rainbow_saturation(value.as_number()?),
        (ServiceKind::Rainbow, Brightness) => composer.set_rainbow_speed(value.as_number()?),

        (ServiceKind::Circadian, On) => composer.set_circadian_on(value.as_bool()?),
        (ServiceKind::Circadian, Brightness) => {
            composer.set_circadian_intensity(value.as_number()?)
        }
        (ServiceKind::Circadian, characteristic) => {
            return Err(CharacteristicError::ReadOnly {
                service,
                characteristic,
            })
        }
    }

    Ok(changed)
}

/// Characteristics whose value changes without being set: the rainbow hue and saturation
/// while it animates, the solar color while the circadian layer is on
pub fn animated(composer: &LightComposer) -> Vec<(ServiceKind, CharacteristicKind)> {
    let mut animated = Vec::new();

    if composer.rainbow().on {
        animated.push((ServiceKind::Rainbow, CharacteristicKind::Hue));
        animated.push((ServiceKind::Rainbow, CharacteristicKind::Saturation));
    }

    if composer.circadian().on {
        animated.push((ServiceKind::Circadian, CharacteristicKind::Hue));
        animated.push((ServiceKind::Circadian, CharacteristicKind::Saturation));
    }

    animated
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use strum::IntoEnumIterator;

    use super::*;
    use crate::{
        color::{Color, Correction},
        solar::Daylight,
    };

    struct Noon;

    impl Daylight for Noon {
        fn color(&self) -> Color {
            Color::new(255., 240., 220.)
        }
    }

    fn composer() -> LightComposer {
        LightComposer::new(Duration::from_secs(15), Correction::IDENTITY, Box::new(Noon))
    }

    #[test]
    fn test_names() {
        assert_eq!(ServiceKind::Circadian.to_string(), "circadian");
        assert_eq!("brightness".parse(), Ok(CharacteristicKind::Brightness));
        assert!("color".parse::<CharacteristicKind>().is_err());
    }

    #[test]
    fn test_value_json() {
        assert_eq!(serde_json::to_string(&Value::Bool(true)).unwrap(), "true");
        assert_eq!(serde_json::from_str::<Value>("42").unwrap(), Value::Number(42.));
        assert_eq!(serde_json::from_str::<Value>("false").unwrap(), Value::Bool(false));
    }

    #[test]
    fn test_get_set_main() {
        let mut composer = composer();

        set(&mut composer, ServiceKind::Main, CharacteristicKind::On, true.into()).unwrap();
        set(&mut composer, ServiceKind::Main, CharacteristicKind::Saturation, 100.0.into()).unwrap();
        set(&mut composer, ServiceKind::Main, CharacteristicKind::Hue, 240.0.into()).unwrap();
        set(&mut composer, ServiceKind::Main, CharacteristicKind::Brightness, 25.0.into()).unwrap();

        assert_eq!(
            get(&composer, ServiceKind::Main, CharacteristicKind::On),
            Value::Bool(true)
        );
        assert_eq!(composer.main().color(), Color::new(0., 0., 63.75));
        assert_eq!(
            get(&composer, ServiceKind::Main, CharacteristicKind::Hue),
            Value::Number(240.)
        );
    }

    #[test]
    fn test_main_color_leaves_rainbow() {
        let mut composer = composer();
        set(&mut composer, ServiceKind::Rainbow, CharacteristicKind::On, true.into()).unwrap();

        assert_eq!(
            set(&mut composer, ServiceKind::Main, CharacteristicKind::Hue, 120.0.into()),
            Ok(vec![
                (ServiceKind::Main, CharacteristicKind::Hue),
                (ServiceKind::Rainbow, CharacteristicKind::On),
            ])
        );
        assert_eq!(
            get(&composer, ServiceKind::Rainbow, CharacteristicKind::On),
            Value::Bool(false)
        );

        // Already off: nothing else changes
        assert_eq!(
            set(&mut composer, ServiceKind::Main, CharacteristicKind::Saturation, 80.0.into()),
            Ok(vec![(ServiceKind::Main, CharacteristicKind::Saturation)])
        );

        // Brightness keeps the rainbow running
        set(&mut composer, ServiceKind::Rainbow, CharacteristicKind::On, true.into()).unwrap();
        set(&mut composer, ServiceKind::Main, CharacteristicKind::Brightness, 20.0.into()).unwrap();
        assert!(composer.rainbow().on);
    }

    #[test]
    fn test_rainbow_speed_as_brightness() {
        let mut composer = composer();

        set(&mut composer, ServiceKind::Rainbow, CharacteristicKind::Brightness, 40.0.into())
            .unwrap();
        assert_eq!(
            get(&composer, ServiceKind::Rainbow, CharacteristicKind::Brightness),
            Value::Number(40.)
        );
        assert!((composer.rainbow().speed - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_circadian_color_is_read_only() {
        let mut composer = composer();

        assert_eq!(
            set(&mut composer, ServiceKind::Circadian, CharacteristicKind::Hue, 10.0.into()),
            Err(CharacteristicError::ReadOnly {
                service: ServiceKind::Circadian,
                characteristic: CharacteristicKind::Hue,
            })
        );

        let hue = get(&composer, ServiceKind::Circadian, CharacteristicKind::Hue);
        assert_eq!(hue, Value::Number(Color::new(255., 240., 220.).hue()));
    }

    #[test]
    fn test_type_mismatch() {
        let mut composer = composer();

        for service in ServiceKind::iter() {
            assert_eq!(
                set(&mut composer, service, CharacteristicKind::On, 1.0.into()),
                Err(CharacteristicError::ExpectedBool)
            );
        }

        assert_eq!(
            set(&mut composer, ServiceKind::Main, CharacteristicKind::Hue, true.into()),
            Err(CharacteristicError::ExpectedNumber)
        );
    }

    #[test]
    fn test_animated_follows_layers() {
        let mut composer = composer();
        assert!(animated(&composer).is_empty());

        composer.set_rainbow_on(true);
        composer.set_circadian_on(true);
        assert_eq!(animated(&composer).len(), 4);
    }
}
