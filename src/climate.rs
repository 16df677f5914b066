use std::sync::{Mutex, PoisonError, RwLock, RwLockReadGuard};
use std::time::Duration;

use tracing::debug;

use crate::config::ClimateConfig;
use crate::coordinator::Coordinator;
use crate::normalize::{decode_numeric, encode_numeric};
use crate::overlay::{PendingOverlay, DEFAULT_OVERLAY_TTL};
use crate::types::*;
use crate::{Error, Result};

/// Data point some thermostats use to report an active heating relay.
const HEATING_STATE_CODE: &str = "Heating_state";

/// Refreshes requested after a successful write: a quick confirmation
/// and a later safety net.
pub const DEFAULT_FOLLOW_UP_DELAYS: [Duration; 2] = [Duration::from_secs(2), Duration::from_secs(15)];

#[derive(Debug)]
struct DeviceModel {
    setpoint_scale: Scale,
    current_scale: Option<Scale>,
    step_raw: i64,
    min_raw: i64,
    max_raw: i64,
    hvac_modes: Vec<HvacMode>,
    capabilities: Option<CapabilityMap>,
}

impl Default for DeviceModel {
    fn default() -> Self {
        Self {
            setpoint_scale: Scale(1),
            current_scale: None,
            step_raw: 1,
            min_raw: 5,
            max_raw: 700,
            hvac_modes: vec![HvacMode::Off, HvacMode::Heat, HvacMode::Auto],
            capabilities: None,
        }
    }
}

/// Host-facing thermostat backed by a [`Coordinator`].
///
/// Reads consult the pending-write overlay before the polled snapshot.
/// Writes go through the coordinator and, once acknowledged, land in the
/// overlay and schedule follow-up refreshes.
pub struct ClimateEntity {
    coordinator: Coordinator,
    config: ClimateConfig,
    overlay: Mutex<PendingOverlay>,
    model: RwLock<DeviceModel>,
    overlay_ttl: Duration,
    follow_ups: Vec<Duration>,
}

impl ClimateEntity {
    pub fn new(coordinator: Coordinator, config: ClimateConfig) -> Self {
        Self {
            coordinator,
            config,
            overlay: Mutex::new(PendingOverlay::new()),
            model: RwLock::new(DeviceModel::default()),
            overlay_ttl: DEFAULT_OVERLAY_TTL,
            follow_ups: DEFAULT_FOLLOW_UP_DELAYS.to_vec(),
        }
    }

    pub fn overlay_ttl(mut self, ttl: Duration) -> Self {
        self.overlay_ttl = ttl;
        self
    }

    pub fn follow_up_delays(mut self, delays: impl IntoIterator<Item = Duration>) -> Self {
        self.follow_ups = delays.into_iter().collect();
        self
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    pub fn unique_id(&self) -> String {
        format!("tuya_cloud_dp_{}", self.coordinator.device_id())
    }

    pub fn name(&self) -> String {
        let id = self.coordinator.device_id();
        let tail = id
            .char_indices()
            .rev()
            .nth(5)
            .map_or(id, |(i, _)| &id[i..]);
        format!("Tuya Climate {tail}")
    }

    /// Refine scaling, limits and supported modes from the device's
    /// capability descriptor.
    pub async fn load_capabilities(&self) -> Result<()> {
        let caps = self.coordinator.fetch_capabilities().await?;
        let mut model = DeviceModel::default();

        if let Some(Constraints::Numeric(range)) =
            caps.get(&self.config.setpoint_code).map(|c| &c.constraints)
        {
            model.setpoint_scale = range.scale;
            model.step_raw = range.step;
            if range.max > range.min {
                model.min_raw = range.min;
                model.max_raw = range.max;
            }
        }
        model.current_scale = self
            .config
            .current_temp_code
            .as_ref()
            .and_then(|code| caps.get(code))
            .and_then(Capability::scale);

        let range = self
            .config
            .mode_code
            .as_ref()
            .and_then(|code| caps.get(code))
            .map(|c| c.enum_range().to_vec())
            .unwrap_or_default();
        let has = |token: &str| range.iter().any(|r| r == token);
        let mut modes = vec![HvacMode::Off];
        if has("Manual") || self.config.power_code.is_some() {
            modes.push(HvacMode::Heat);
        }
        if has("Program") || has("TempProg") {
            modes.push(HvacMode::Auto);
        }
        model.hvac_modes = modes;

        debug!(
            device = self.coordinator.device_id(),
            scale = model.setpoint_scale.0,
            step = model.step_raw,
            modes = ?model.hvac_modes,
            "capabilities loaded"
        );
        model.capabilities = Some(caps);
        *self.model.write().unwrap_or_else(PoisonError::into_inner) = model;
        Ok(())
    }

    // -- State --

    /// Pending written value if still live, else the polled one.
    pub fn effective(&self, code: &str) -> Option<DpValue> {
        let mut overlay = self.overlay.lock().unwrap_or_else(PoisonError::into_inner);
        overlay.get(code).or_else(|| self.coordinator.value(code))
    }

    pub fn available(&self) -> bool {
        self.coordinator.last_update_success()
    }

    pub fn current_temperature(&self) -> Option<f64> {
        let code = self.config.current_temp_code.as_deref()?;
        let scale = {
            let model = self.model();
            model.current_scale.unwrap_or(model.setpoint_scale)
        };
        decode_numeric(&self.effective(code)?, scale)
    }

    pub fn target_temperature(&self) -> Option<f64> {
        let raw = self.effective(&self.config.setpoint_code)?;
        decode_numeric(&raw, self.model().setpoint_scale)
    }

    /// Without a power data point the device is considered always on.
    pub fn is_on(&self) -> bool {
        match self.config.power_code.as_deref() {
            Some(code) => self.effective(code).and_then(|v| v.as_bool()) != Some(false),
            None => true,
        }
    }

    pub fn hvac_mode(&self) -> HvacMode {
        if !self.is_on() {
            return HvacMode::Off;
        }
        self.config
            .mode_code
            .as_deref()
            .and_then(|code| self.effective(code))
            .and_then(|v| v.as_str().map(HvacMode::from_mode_token))
            .unwrap_or(HvacMode::Heat)
    }

    pub fn hvac_action(&self) -> HvacAction {
        if !self.is_on() {
            return HvacAction::Off;
        }
        match self.effective(HEATING_STATE_CODE).and_then(|v| v.as_bool()) {
            Some(true) => HvacAction::Heating,
            _ => HvacAction::Idle,
        }
    }

    pub fn hvac_modes(&self) -> Vec<HvacMode> {
        self.model().hvac_modes.clone()
    }

    pub fn min_temp(&self) -> f64 {
        let model = self.model();
        self.config
            .min_temp
            .unwrap_or_else(|| model.setpoint_scale.decode(model.min_raw as f64))
    }

    pub fn max_temp(&self) -> f64 {
        let model = self.model();
        self.config
            .max_temp
            .unwrap_or_else(|| model.setpoint_scale.decode(model.max_raw as f64))
    }

    pub fn target_temperature_step(&self) -> f64 {
        let model = self.model();
        model.setpoint_scale.decode(model.step_raw as f64)
    }

    /// Display precision: 0.1, 0.5 or 1.0, derived from the step unless overridden.
    pub fn precision(&self) -> f64 {
        if let Some(p) = self.config.precision {
            return p;
        }
        match self.target_temperature_step() {
            s if s <= 0.1 => 0.1,
            s if s <= 0.5 => 0.5,
            _ => 1.0,
        }
    }

    // -- Commands --

    pub async fn set_target_temperature(&self, celsius: f64) -> Result<()> {
        let (min, max) = (self.min_temp(), self.max_temp());
        if !(min..=max).contains(&celsius) {
            return Err(Error::InvalidSetpoint {
                value: celsius,
                min,
                max,
            });
        }
        let raw = {
            let model = self.model();
            snap_to_step(
                encode_numeric(celsius, model.setpoint_scale),
                model.min_raw,
                model.max_raw,
                model.step_raw,
            )
        };
        self.submit(&self.config.setpoint_code, DpValue::Integer(raw))
            .await?;
        self.schedule_follow_ups();
        Ok(())
    }

    pub async fn set_hvac_mode(&self, mode: HvacMode) -> Result<()> {
        if !self.hvac_modes().contains(&mode) {
            return Err(Error::UnsupportedMode(mode));
        }
        if mode == HvacMode::Off {
            return self.turn_off().await;
        }
        if self.config.power_code.is_none() && self.config.mode_code.is_none() {
            return Err(Error::UnsupportedMode(mode));
        }
        if let Some(code) = self.config.power_code.as_deref() {
            self.submit(code, DpValue::Bool(true)).await?;
        }
        if let Some(code) = self.config.mode_code.as_deref()
            && let Err(e) = self.submit(code, DpValue::from(mode.as_mode_token())).await
        {
            // Power was already acknowledged and sits in the overlay.
            if self.config.power_code.is_some() {
                self.schedule_follow_ups();
            }
            return Err(e);
        }
        self.schedule_follow_ups();
        Ok(())
    }

    pub async fn turn_on(&self) -> Result<()> {
        if let Some(code) = self.config.power_code.as_deref() {
            self.submit(code, DpValue::Bool(true)).await?;
        } else if let Some(code) = self.config.mode_code.as_deref() {
            self.submit(code, DpValue::from(HvacMode::Heat.as_mode_token())).await?;
        } else {
            return Err(Error::UnsupportedMode(HvacMode::Heat));
        }
        self.schedule_follow_ups();
        Ok(())
    }

    pub async fn turn_off(&self) -> Result<()> {
        if let Some(code) = self.config.power_code.as_deref() {
            self.submit(code, DpValue::Bool(false)).await?;
        } else if let Some(code) = self.config.mode_code.as_deref() {
            self.submit(code, DpValue::from(HvacMode::Off.as_mode_token())).await?;
        } else {
            return Err(Error::UnsupportedMode(HvacMode::Off));
        }
        self.schedule_follow_ups();
        Ok(())
    }

    /// Send one write; on acknowledgement make it visible through the overlay.
    async fn submit(&self, code: &str, value: DpValue) -> Result<()> {
        self.ensure_writable(code)?;
        self.coordinator
            .submit_commands(&[Command::new(code, value.clone())])
            .await?;
        debug!(device = self.coordinator.device_id(), code, value = %value, "command acknowledged");
        self.overlay
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .set_pending(code, value, self.overlay_ttl);
        Ok(())
    }

    fn schedule_follow_ups(&self) {
        for delay in &self.follow_ups {
            self.coordinator.schedule_refresh(*delay);
        }
    }

    fn ensure_writable(&self, code: &str) -> Result<()> {
        match self
            .model()
            .capabilities.as_ref().and_then(|caps| caps.get(code)) {
            Some(cap) if !cap.writable => Err(Error::NotWritable(code.to_string())),
            _ => Ok(()),
        }
    }

    fn model(&self) -> RwLockReadGuard<'_, DeviceModel> {
        self.model.read().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Nearest point on the device grid `min + k * step` that lies within
/// `[min, max]`.
fn snap_to_step(raw: i64, min: i64, max: i64, step: i64) -> i64 {
    let step = step.max(1);
    let top = min + (max - min).max(0) / step * step;
    let snapped = if step == 1 {
        raw
    } else {
        min + ((raw - min) as f64 / step as f64).round() as i64 * step
    };
    snapped.clamp(min, top)
}
