//! Two active-low buttons and the brightness potentiometer.

use anyhow::Result;
use esp_idf_hal::adc::attenuation::DB_11;
use esp_idf_hal::adc::oneshot::config::AdcChannelConfig;
use esp_idf_hal::adc::oneshot::{AdcChannelDriver, AdcDriver};
use esp_idf_hal::adc::ADC1;
use esp_idf_hal::gpio::{AnyIOPin, Gpio1, Input, PinDriver, Pull};
use log::warn;

use crate::buttons::ButtonLevels;
use crate::scheduler::InputSource;

type Knob = AdcChannelDriver<'static, Gpio1, AdcDriver<'static, ADC1>>;

pub struct BoardInputs {
    button1: PinDriver<'static, AnyIOPin, Input>,
    button2: PinDriver<'static, AnyIOPin, Input>,
    knob: Option<Knob>,
}

fn input_pin(pin: AnyIOPin) -> Result<PinDriver<'static, AnyIOPin, Input>> {
    let mut driver = PinDriver::input(pin)?;
    driver.set_pull(Pull::Up)?;
    Ok(driver)
}

impl BoardInputs {
    pub fn new(button1: AnyIOPin, button2: AnyIOPin, adc: ADC1, knob_pin: Gpio1) -> Result<Self> {
        let knob = match AdcDriver::new(adc).and_then(|adc| {
            let config = AdcChannelConfig {
                attenuation: DB_11,
                ..Default::default()
            };
            AdcChannelDriver::new(adc, knob_pin, &config)
        }) {
            Ok(knob) => Some(knob),
            Err(e) => {
                warn!("Brightness knob unavailable: {}", e);
                None
            }
        };
        Ok(Self {
            button1: input_pin(button1)?,
            button2: input_pin(button2)?,
            knob,
        })
    }
}

impl InputSource for BoardInputs {
    fn buttons(&mut self) -> ButtonLevels {
        ButtonLevels {
            button1: Some(self.button1.is_low()),
            button2: Some(self.button2.is_low()),
        }
    }

    fn knob(&mut self) -> Option<u16> {
        let knob = self.knob.as_mut()?;
        match knob.read_raw() {
            // 12-bit sample widened to the 16-bit range the knob filter expects.
            Ok(raw) => Some(raw.min(4095) << 4),
            Err(e) => {
                warn!("Knob read failed: {}", e);
                None
            }
        }
    }
}
