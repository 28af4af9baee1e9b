use embedded_graphics::prelude::*;

use crate::frame::Frame;
use crate::layout::rgb;

/// Condition classes the 10x8 glyphs can tell apart.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WeatherIcon {
    #[default]
    Clear,
    PartlyCloudy,
    Overcast,
    Fog,
    Drizzle,
    Rain,
    Snow,
    Thunderstorm,
}

pub const ICON_W: i32 = 10;
pub const ICON_H: i32 = 8;

/// WMO weather interpretation code (Open-Meteo `weather_code`) to icon.
pub fn icon_for_wmo_code(code: i32) -> WeatherIcon {
    match code {
        0 => WeatherIcon::Clear,
        1 | 2 => WeatherIcon::PartlyCloudy,
        3 => WeatherIcon::Overcast,
        45 | 48 => WeatherIcon::Fog,
        51..=57 => WeatherIcon::Drizzle,
        61..=67 | 80..=82 => WeatherIcon::Rain,
        71..=77 | 85 | 86 => WeatherIcon::Snow,
        95..=99 => WeatherIcon::Thunderstorm,
        _ => WeatherIcon::PartlyCloudy,
    }
}

pub fn condition_short(code: i32) -> &'static str {
    match code {
        0 => "Clear",
        1 => "Mostly Clear",
        2 => "Partly Cloudy",
        3 => "Overcast",
        45 | 48 => "Fog",
        51..=55 => "Drizzle",
        56 | 57 => "Frz Drizzle",
        61..=65 => "Rain",
        66 | 67 => "Frz Rain",
        71..=75 | 77 => "Snow",
        80..=82 => "Showers",
        85 | 86 => "Snow Showers",
        95 => "Storm",
        96 | 99 => "Hail Storm",
        _ => "Unknown",
    }
}

const SUN: u32 = 0xFFD60A;
const CLOUD: u32 = 0xC8CDD2;
const DARK_CLOUD: u32 = 0x7A828C;
const RAIN: u32 = 0x3A8DFF;
const SNOW: u32 = 0xFFFFFF;
const BOLT: u32 = 0xFFE14D;

/// Draw the glyph with its top-left corner at `origin`.
pub fn draw_icon(frame: &mut Frame, icon: WeatherIcon, origin: Point) {
    let at = |dx: i32, dy: i32| origin + Point::new(dx, dy);
    let cloud = |frame: &mut Frame, color: u32| {
        frame.fill(at(2, 1), Size::new(5, 2), rgb(color));
        frame.fill(at(0, 3), Size::new(10, 3), rgb(color));
    };
    match icon {
        WeatherIcon::Clear => {
            frame.circle(at(2, 1), 6, rgb(SUN));
        }
        WeatherIcon::PartlyCloudy => {
            frame.circle(at(4, 0), 5, rgb(SUN));
            frame.fill(at(0, 4), Size::new(8, 3), rgb(CLOUD));
        }
        WeatherIcon::Overcast => cloud(frame, CLOUD),
        WeatherIcon::Fog => {
            for row in [1, 4, 7] {
                frame.fill(at(0, row), Size::new(10, 1), rgb(CLOUD));
            }
        }
        WeatherIcon::Drizzle => {
            cloud(frame, CLOUD);
            for x in [2, 6] {
                frame.fill(at(x, 7), Size::new(1, 1), rgb(RAIN));
            }
        }
        WeatherIcon::Rain => {
            cloud(frame, DARK_CLOUD);
            for x in [1, 4, 7] {
                frame.fill(at(x, 6), Size::new(1, 2), rgb(RAIN));
            }
        }
        WeatherIcon::Snow => {
            cloud(frame, CLOUD);
            for x in [1, 4, 7] {
                frame.fill(at(x, 7), Size::new(1, 1), rgb(SNOW));
            }
        }
        WeatherIcon::Thunderstorm => {
            cloud(frame, DARK_CLOUD);
            frame.fill(at(5, 5), Size::new(1, 2), rgb(BOLT));
            frame.fill(at(4, 7), Size::new(1, 1), rgb(BOLT));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wmo_codes_map_to_icons() {
        assert_eq!(icon_for_wmo_code(0), WeatherIcon::Clear);
        assert_eq!(icon_for_wmo_code(63), WeatherIcon::Rain);
        assert_eq!(icon_for_wmo_code(81), WeatherIcon::Rain);
        assert_eq!(icon_for_wmo_code(75), WeatherIcon::Snow);
        assert_eq!(icon_for_wmo_code(99), WeatherIcon::Thunderstorm);
        assert_eq!(icon_for_wmo_code(1234), WeatherIcon::PartlyCloudy);
        assert_eq!(condition_short(45), "Fog");
    }

    #[test]
    fn every_icon_draws_something() {
        for icon in [
            WeatherIcon::Clear,
            WeatherIcon::PartlyCloudy,
            WeatherIcon::Overcast,
            WeatherIcon::Fog,
            WeatherIcon::Drizzle,
            WeatherIcon::Rain,
            WeatherIcon::Snow,
            WeatherIcon::Thunderstorm,
        ] {
            let mut frame = Frame::default();
            draw_icon(&mut frame, icon, Point::new(0, 0));
            assert!(!frame.items.is_empty(), "{:?}", icon);
        }
    }
}
