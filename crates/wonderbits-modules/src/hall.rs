//! Hall module: magnetic field sensor.

use async_trait::async_trait;
use wonderbits_client::Session;
use wonderbits_types::{Value, WbError};

use crate::module::{ModuleRef, Peripheral, block_arg};

pub struct Hall {
    module: ModuleRef,
    session: Session,
}

impl Hall {
    pub fn new(session: Session, index: u32) -> Result<Self, WbError> {
        Ok(Self {
            module: ModuleRef::new("hall", index)?,
            session,
        })
    }

    /// Field strength, -100 to 100; the sign gives the polarity.
    pub async fn magnetic(&self) -> Result<Value, WbError> {
        self.session
            .query(&self.module.command("get_magnetic", ""))
            .await
    }

    /// Re-zero the sensor. Keep magnets away while the status LED is yellow.
    pub async fn calibrate(&self, block: bool) -> Result<String, WbError> {
        self.session
            .command(&self.module.command("calibrate", block_arg(block)))
            .await
    }
}

#[async_trait]
impl Peripheral for Hall {
    const SIGNALS: &'static [&'static str] = &["magnetic"];

    fn module(&self) -> &ModuleRef {
        &self.module
    }

    fn session(&self) -> &Session {
        &self.session
    }
}
