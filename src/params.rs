//! Sensor parameter tuning
//!
//! [`CameraParameters`] holds edited values and only touches the device on an
//! explicit [`CameraParameters::apply`]. It reaches the camera through the
//! narrow [`ParameterAccess`] capability instead of owning a camera reference.

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::capture::mode::{CameraMode, DeviceParam, EXPOSURE_PER_SECOND_RANGE};
use crate::error::{Error, Result};

/// What the parameter component may do with the camera that owns the device.
pub trait ParameterAccess {
    fn is_started(&self) -> bool;

    fn current_mode(&self) -> Option<CameraMode>;

    fn param(&self, param: DeviceParam) -> Result<i32>;

    fn set_param(&mut self, param: DeviceParam, value: i32) -> Result<()>;

    fn set_exposure_per_second(&mut self, rate: i32) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraParameters {
    /// Push these values on start instead of reading the device's.
    pub set_at_start: bool,
    exposure: i32,
    exposures_per_second: i32,
    gain: i32,
    black_light_compensation: i32,
    white_balance_auto: bool,
    white_balance_red: i32,
    white_balance_green: i32,
    white_balance_blue: i32,
}

impl Default for CameraParameters {
    fn default() -> Self {
        Self {
            set_at_start: false,
            exposure: 12960,
            exposures_per_second: *EXPOSURE_PER_SECOND_RANGE.start(),
            gain: 8,
            black_light_compensation: 32,
            white_balance_auto: true,
            white_balance_red: 1474,
            white_balance_green: 1024,
            white_balance_blue: 1738,
        }
    }
}

const CHANNELS: [DeviceParam; 3] = [
    DeviceParam::WhiteBalanceRed,
    DeviceParam::WhiteBalanceGreen,
    DeviceParam::WhiteBalanceBlue,
];

impl CameraParameters {
    pub fn exposure(&self) -> i32 {
        self.exposure
    }

    pub fn set_exposure(&mut self, value: i32) {
        self.exposure = DeviceParam::Exposure.clamp(value);
    }

    pub fn exposures_per_second(&self) -> i32 {
        self.exposures_per_second
    }

    pub fn set_exposures_per_second(&mut self, value: i32) {
        self.exposures_per_second = value.clamp(
            *EXPOSURE_PER_SECOND_RANGE.start(),
            *EXPOSURE_PER_SECOND_RANGE.end(),
        );
    }

    pub fn gain(&self) -> i32 {
        self.gain
    }

    pub fn set_gain(&mut self, value: i32) {
        self.gain = DeviceParam::Gain.clamp(value);
    }

    pub fn black_light_compensation(&self) -> i32 {
        self.black_light_compensation
    }

    pub fn set_black_light_compensation(&mut self, value: i32) {
        self.black_light_compensation = DeviceParam::BlackLightCompensation.clamp(value);
    }

    pub fn white_balance_auto(&self) -> bool {
        self.white_balance_auto
    }

    pub fn set_white_balance_auto(&mut self, value: bool) {
        self.white_balance_auto = value;
    }

    /// Red, green and blue white-balance gains.
    pub fn white_balance(&self) -> [i32; 3] {
        [
            self.white_balance_red,
            self.white_balance_green,
            self.white_balance_blue,
        ]
    }

    pub fn set_white_balance(&mut self, [red, green, blue]: [i32; 3]) {
        self.white_balance_red = DeviceParam::WhiteBalanceRed.clamp(red);
        self.white_balance_green = DeviceParam::WhiteBalanceGreen.clamp(green);
        self.white_balance_blue = DeviceParam::WhiteBalanceBlue.clamp(blue);
    }

    /// Reads every parameter back from the camera. No-op unless started.
    #[instrument(skip_all)]
    pub fn pull(&mut self, access: &impl ParameterAccess) -> Result<()> {
        if !access.is_started() {
            return Ok(());
        }

        if let Some(exposure) = read(access, DeviceParam::Exposure)? {
            self.exposure = exposure;
            if let (Some(mode), true) = (access.current_mode(), exposure > 0) {
                self.exposures_per_second = mode.exposure_factor() / exposure;
            }
        }
        if let Some(gain) = read(access, DeviceParam::Gain)? {
            self.gain = gain;
        }
        if let Some(blc) = read(access, DeviceParam::BlackLightCompensation)? {
            self.black_light_compensation = blc;
        }
        if let Some(auto) = read(access, DeviceParam::WhiteBalanceAuto)? {
            self.white_balance_auto = auto != 0;
        }
        let mut channels = self.white_balance();
        for (value, param) in channels.iter_mut().zip(CHANNELS) {
            if let Some(device_value) = read(access, param)? {
                *value = device_value;
            }
        }
        [
            self.white_balance_red,
            self.white_balance_green,
            self.white_balance_blue,
        ] = channels;
        Ok(())
    }

    /// Writes the edited values to the camera, then reads them back.
    ///
    /// A changed exposure wins over a changed exposure rate. No-op unless
    /// started.
    #[instrument(skip_all)]
    pub fn apply(&mut self, access: &mut impl ParameterAccess) -> Result<()> {
        if !access.is_started() {
            return Ok(());
        }

        let current_exposure = access.param(DeviceParam::Exposure)?;
        let current_rate = match (access.current_mode(), self.exposure > 0) {
            (Some(mode), true) => mode.exposure_factor() / self.exposure,
            _ => self.exposures_per_second,
        };
        if self.exposure != current_exposure {
            access.set_param(DeviceParam::Exposure, self.exposure)?;
        } else if current_rate != self.exposures_per_second {
            access.set_exposure_per_second(self.exposures_per_second)?;
        }

        write(access, DeviceParam::Gain, self.gain)?;
        write(
            access,
            DeviceParam::BlackLightCompensation,
            self.black_light_compensation,
        )?;
        write(
            access,
            DeviceParam::WhiteBalanceAuto,
            self.white_balance_auto as i32,
        )?;
        for (value, param) in self.white_balance().into_iter().zip(CHANNELS) {
            write(access, param, value)?;
        }

        self.pull(&*access)
    }

    /// Called once the owning camera reports it started.
    pub fn on_started(&mut self, access: &mut impl ParameterAccess) -> Result<()> {
        if self.set_at_start {
            self.apply(access)
        } else {
            self.pull(&*access)
        }
    }
}

fn read(access: &impl ParameterAccess, param: DeviceParam) -> Result<Option<i32>> {
    match access.param(param) {
        Ok(value) => Ok(Some(value)),
        Err(Error::UnsupportedParameter(_)) => {
            debug!(?param, "Parameter not supported, keeping local value");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

fn write(access: &mut impl ParameterAccess, param: DeviceParam, value: i32) -> Result<()> {
    match access.set_param(param, value) {
        Err(Error::UnsupportedParameter(_)) => {
            debug!(?param, "Parameter not supported, skipped");
            Ok(())
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeCamera {
        started: bool,
        values: HashMap<DeviceParam, i32>,
        writes: Vec<(DeviceParam, i32)>,
        rate_writes: Vec<i32>,
    }

    impl FakeCamera {
        fn started() -> Self {
            let mut camera = FakeCamera {
                started: true,
                ..Default::default()
            };
            camera.values.insert(DeviceParam::Exposure, 10000);
            camera.values.insert(DeviceParam::Gain, 4);
            camera.values.insert(DeviceParam::BlackLightCompensation, 100);
            camera.values.insert(DeviceParam::WhiteBalanceAuto, 0);
            camera.values.insert(DeviceParam::WhiteBalanceRed, 1000);
            camera.values.insert(DeviceParam::WhiteBalanceBlue, 2000);
            camera
        }
    }

    impl ParameterAccess for FakeCamera {
        fn is_started(&self) -> bool {
            self.started
        }

        fn current_mode(&self) -> Option<CameraMode> {
            self.started.then_some(CameraMode::Vr960x950At60)
        }

        fn param(&self, param: DeviceParam) -> Result<i32> {
            self.values
                .get(&param)
                .copied()
                .ok_or(Error::UnsupportedParameter(param))
        }

        fn set_param(&mut self, param: DeviceParam, value: i32) -> Result<()> {
            if !self.values.contains_key(&param) {
                return Err(Error::UnsupportedParameter(param));
            }
            self.writes.push((param, value));
            self.values.insert(param, value);
            Ok(())
        }

        fn set_exposure_per_second(&mut self, rate: i32) -> Result<()> {
            self.rate_writes.push(rate);
            let exposure = CameraMode::Vr960x950At60.exposure_factor() / rate;
            self.values.insert(DeviceParam::Exposure, exposure);
            Ok(())
        }
    }

    #[test]
    fn setters_clamp() {
        let mut params = CameraParameters::default();
        params.set_gain(48);
        params.set_exposure(40000);
        params.set_exposures_per_second(10);
        params.set_white_balance([-1, 5000, 12]);
        assert_eq!(params.gain(), 47);
        assert_eq!(params.exposure(), 32767);
        assert_eq!(params.exposures_per_second(), 25);
        assert_eq!(params.white_balance(), [0, 4095, 12]);
    }

    #[test]
    fn edits_do_not_touch_device_until_apply() {
        let mut camera = FakeCamera::started();
        let mut params = CameraParameters::default();
        params.set_gain(20);
        assert!(camera.writes.is_empty());

        params.apply(&mut camera).unwrap();
        assert_eq!(camera.values[&DeviceParam::Gain], 20);
    }

    #[test]
    fn pull_derives_exposure_rate_and_keeps_unsupported_values() {
        let camera = FakeCamera::started();
        let mut params = CameraParameters::default();
        params.pull(&camera).unwrap();

        assert_eq!(params.exposure(), 10000);
        assert_eq!(params.exposures_per_second(), 937_157 / 10000);
        assert_eq!(params.gain(), 4);
        assert!(!params.white_balance_auto());
        // Green is unsupported by the fake, so the default stays.
        assert_eq!(params.white_balance(), [1000, 1024, 2000]);
    }

    #[test]
    fn changed_exposure_wins_over_rate() {
        let mut camera = FakeCamera::started();
        let mut params = CameraParameters::default();
        params.pull(&camera).unwrap();

        params.set_exposure(5000);
        params.set_exposures_per_second(200);
        params.apply(&mut camera).unwrap();
        assert!(camera.writes.contains(&(DeviceParam::Exposure, 5000)));
        assert!(camera.rate_writes.is_empty());
    }

    #[test]
    fn unchanged_exposure_applies_rate() {
        let mut camera = FakeCamera::started();
        let mut params = CameraParameters::default();
        params.pull(&camera).unwrap();

        params.set_exposures_per_second(200);
        params.apply(&mut camera).unwrap();
        assert_eq!(camera.rate_writes, vec![200]);
        assert_eq!(params.exposure(), 937_157 / 200);
    }

    #[test]
    fn stopped_camera_is_left_alone() {
        let mut camera = FakeCamera::default();
        let mut params = CameraParameters::default();
        params.set_at_start = true;
        params.on_started(&mut camera).unwrap();
        assert!(camera.writes.is_empty());
        assert_eq!(params, {
            let mut expected = CameraParameters::default();
            expected.set_at_start = true;
            expected
        });
    }
}
