//! Control module: two push buttons, a toggle (SW3), a four-position
//! selector (SW4) and two touch contacts (M1/M2).

use async_trait::async_trait;
use wonderbits_client::Session;
use wonderbits_types::{Value, WbError};

use crate::module::{ModuleRef, Peripheral, check_range};

pub struct Control {
    module: ModuleRef,
    session: Session,
}

impl Control {
    pub fn new(session: Session, index: u32) -> Result<Self, WbError> {
        Ok(Self {
            module: ModuleRef::new("control", index)?,
            session,
        })
    }

    pub async fn is_sw1_pressed(&self) -> Result<Value, WbError> {
        self.read("is_sw1_pressed").await
    }

    pub async fn is_sw2_pressed(&self) -> Result<Value, WbError> {
        self.read("is_sw2_pressed").await
    }

    /// Whether SW3 sits at the position printed `1`.
    pub async fn is_sw3_at_1(&self) -> Result<Value, WbError> {
        self.read("is_sw3_at_1").await
    }

    pub async fn sw4(&self) -> Result<Value, WbError> {
        self.read("get_sw4").await
    }

    pub async fn is_m1_connected(&self) -> Result<Value, WbError> {
        self.read("is_m1_connected").await
    }

    pub async fn is_m2_connected(&self) -> Result<Value, WbError> {
        self.read("is_m2_connected").await
    }

    /// Touch sensitivity (0–100) of M1 and M2. Higher values report contact
    /// sooner.
    pub async fn set_m1_m2_sensitivity(&self, limit: u32) -> Result<String, WbError> {
        check_range("sensitivity", limit.into(), 0, 100)?;
        let command = self
            .module
            .command("set_m1_m2_sensitivity", &limit.to_string());
        self.session.command(&command).await
    }

    pub async fn m1_value(&self) -> Result<Value, WbError> {
        self.read("get_m1_value").await
    }

    pub async fn m2_value(&self) -> Result<Value, WbError> {
        self.read("get_m2_value").await
    }

    async fn read(&self, method: &str) -> Result<Value, WbError> {
        self.session.query(&self.module.command(method, "")).await
    }
}

#[async_trait]
impl Peripheral for Control {
    const SIGNALS: &'static [&'static str] =
        &["sw1", "sw2", "sw3", "sw4", "m1", "m2", "m1_value", "m2_value"];

    fn module(&self) -> &ModuleRef {
        &self.module
    }

    fn session(&self) -> &Session {
        &self.session
    }
}
