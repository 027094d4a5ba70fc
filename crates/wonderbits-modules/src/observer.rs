//! Observer module: temperature, humidity, light and sound sensors.

use async_trait::async_trait;
use wonderbits_client::Session;
use wonderbits_types::{Value, WbError};

use crate::module::{ModuleRef, Peripheral};

pub struct Observer {
    module: ModuleRef,
    session: Session,
}

impl Observer {
    pub fn new(session: Session, index: u32) -> Result<Self, WbError> {
        Ok(Self {
            module: ModuleRef::new("observer", index)?,
            session,
        })
    }

    /// Temperature in °C.
    pub async fn temperature(&self) -> Result<Value, WbError> {
        self.read("get_temperature").await
    }

    /// Relative humidity in %RH.
    pub async fn humidity(&self) -> Result<Value, WbError> {
        self.read("get_humidity").await
    }

    /// Relative light level.
    pub async fn light(&self) -> Result<Value, WbError> {
        self.read("get_light").await
    }

    /// Relative sound level.
    pub async fn volume(&self) -> Result<Value, WbError> {
        self.read("get_volume").await
    }

    async fn read(&self, method: &str) -> Result<Value, WbError> {
        self.session.query(&self.module.command(method, "")).await
    }
}

#[async_trait]
impl Peripheral for Observer {
    const SIGNALS: &'static [&'static str] = &["temperature", "humidity", "light", "volume"];

    fn module(&self) -> &ModuleRef {
        &self.module
    }

    fn session(&self) -> &Session {
        &self.session
    }
}
