use super::{Reading, SensorSource};

/// ADC reference voltage, full scale of a 12-bit conversion.
const ADC_VREF: f32 = 3.3;
const ADC_STEPS: f32 = 4096.0;
/// Sensor voltage at 27 °C and its slope, from the RP2040 datasheet.
const VBE_AT_27C: f32 = 0.706;
const VBE_SLOPE_V_PER_C: f32 = 0.001721;

/// A single ADC input that returns raw 12-bit conversions.
pub trait AdcChannel {
    fn read_raw(&mut self) -> u16;
}

/// Convert a raw 12-bit sample of the on-die temperature diode to °C.
pub fn raw_to_celsius(raw: u16) -> f32 {
    let volts = raw as f32 * (ADC_VREF / ADC_STEPS);
    27.0 - (volts - VBE_AT_27C) / VBE_SLOPE_V_PER_C
}

/// The microcontroller's on-die temperature sensor.
pub struct OnboardTemperature<A> {
    adc: A,
}

impl<A: AdcChannel> OnboardTemperature<A> {
    pub const fn new(adc: A) -> Self {
        Self { adc }
    }

    pub fn adc_mut(&mut self) -> &mut A {
        &mut self.adc
    }
}

impl<A: AdcChannel> SensorSource for OnboardTemperature<A> {
    fn read(&mut self) -> Reading {
        Reading::new(raw_to_celsius(self.adc.read_raw()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedAdc(u16);

    impl AdcChannel for FixedAdc {
        fn read_raw(&mut self) -> u16 {
            self.0
        }
    }

    #[test]
    fn test_reference_point_is_27c() {
        // 0.706 V ≈ 876 counts
        let celsius = raw_to_celsius(876);
        assert!((celsius - 27.0).abs() < 0.5, "got {celsius}");
    }

    #[test]
    fn test_higher_voltage_is_colder() {
        assert!(raw_to_celsius(900) < raw_to_celsius(850));
    }

    #[test]
    fn test_sensor_reads_through_adc() {
        let mut sensor = OnboardTemperature::new(FixedAdc(876));
        let reading = sensor.read();
        assert!((reading.celsius - 27.0).abs() < 0.5);

        sensor.adc_mut().0 = 0;
        assert!(sensor.read().celsius > 400.0);
    }
}
