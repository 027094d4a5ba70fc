//! Buggy module: a two-motor chassis with light sensors, line tracers,
//! obstacle sensors, two LEDs and a buzzer.
//!
//! Tracer channels 1–5 map to sensors t1–t5.

use async_trait::async_trait;
use wonderbits_client::Session;
use wonderbits_types::{Value, WbError};

use crate::module::{ModuleRef, Peripheral, check_range, rgb_args};

pub struct Buggy {
    module: ModuleRef,
    session: Session,
}

impl Buggy {
    pub fn new(session: Session, index: u32) -> Result<Self, WbError> {
        Ok(Self {
            module: ModuleRef::new("buggy", index)?,
            session,
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Readings
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn battery_value(&self) -> Result<Value, WbError> {
        self.read("get_battery_value", "").await
    }

    /// Light level seen by sensor S1.
    pub async fn s1(&self) -> Result<Value, WbError> {
        self.read("get_s1", "").await
    }

    /// Light level seen by sensor S2.
    pub async fn s2(&self) -> Result<Value, WbError> {
        self.read("get_s2", "").await
    }

    pub async fn tracer_all_black_state(&self) -> Result<Value, WbError> {
        self.read("get_tracer_all_black_state", "").await
    }

    pub async fn tracer_all_white_state(&self) -> Result<Value, WbError> {
        self.read("get_tracer_all_white_state", "").await
    }

    pub async fn is_tracer_check_black(&self, channel: u8) -> Result<Value, WbError> {
        check_tracer_channel(channel)?;
        self.read("is_tracer_check_black", &channel.to_string()).await
    }

    pub async fn tracer_value(&self, channel: u8) -> Result<Value, WbError> {
        check_tracer_channel(channel)?;
        self.read("get_tracer_value", &channel.to_string()).await
    }

    pub async fn is_t6_check_unobstructed(&self) -> Result<Value, WbError> {
        self.read("is_t6_check_unobstructed", "").await
    }

    pub async fn is_t7_check_unobstructed(&self) -> Result<Value, WbError> {
        self.read("is_t7_check_unobstructed", "").await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Actions
    // ─────────────────────────────────────────────────────────────────────────

    /// Wheel speeds, -100 to 100 each; the sign gives the direction.
    pub async fn set_motors(&self, left: i32, right: i32) -> Result<String, WbError> {
        check_range("left speed", left.into(), -100, 100)?;
        check_range("right speed", right.into(), -100, 100)?;
        self.run("set_motors", &format!("{left},{right}")).await
    }

    /// Buzzer frequency in Hz (0–20000); 0 silences it.
    pub async fn set_buzzer(&self, frequency: u32) -> Result<String, WbError> {
        check_range("frequency", frequency.into(), 0, 20_000)?;
        self.run("set_buzzer", &frequency.to_string()).await
    }

    pub async fn set_led1(&self, r: u8, g: u8, b: u8) -> Result<String, WbError> {
        self.run("set_led1", &rgb_args(r, g, b)).await
    }

    pub async fn set_led2(&self, r: u8, g: u8, b: u8) -> Result<String, WbError> {
        self.run("set_led2", &rgb_args(r, g, b)).await
    }

    /// Tracer threshold as a percentage (0–100) between the calibrated white
    /// and black readings.
    pub async fn set_calibration_percentage(&self, percent: u32) -> Result<String, WbError> {
        check_range("percentage", percent.into(), 0, 100)?;
        self.run("set_calibration_percentage", &percent.to_string())
            .await
    }

    pub async fn calibration_black(&self) -> Result<String, WbError> {
        self.run("calibration_black", "").await
    }

    pub async fn calibration_white(&self) -> Result<String, WbError> {
        self.run("calibration_white", "").await
    }

    async fn read(&self, method: &str, args: &str) -> Result<Value, WbError> {
        self.session.query(&self.module.command(method, args)).await
    }

    async fn run(&self, method: &str, args: &str) -> Result<String, WbError> {
        self.session.command(&self.module.command(method, args)).await
    }
}

fn check_tracer_channel(channel: u8) -> Result<(), WbError> {
    check_range("tracer channel", channel.into(), 1, 5)
}

#[async_trait]
impl Peripheral for Buggy {
    const SIGNALS: &'static [&'static str] = &["battery_value", "s1", "s2", "tracer_state"];

    fn module(&self) -> &ModuleRef {
        &self.module
    }

    fn session(&self) -> &Session {
        &self.session
    }
}
