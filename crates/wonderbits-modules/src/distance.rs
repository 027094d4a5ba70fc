//! Distance module: laser range finder.

use async_trait::async_trait;
use wonderbits_client::Session;
use wonderbits_types::{Value, WbError};

use crate::module::{ModuleRef, Peripheral};

pub struct Distance {
    module: ModuleRef,
    session: Session,
}

impl Distance {
    pub fn new(session: Session, index: u32) -> Result<Self, WbError> {
        Ok(Self {
            module: ModuleRef::new("distance", index)?,
            session,
        })
    }

    /// Measured distance in cm (0–100).
    pub async fn distance(&self) -> Result<Value, WbError> {
        self.session
            .query(&self.module.command("get_distance", ""))
            .await
    }
}

#[async_trait]
impl Peripheral for Distance {
    const SIGNALS: &'static [&'static str] = &["distance"];

    fn module(&self) -> &ModuleRef {
        &self.module
    }

    fn session(&self) -> &Session {
        &self.session
    }
}
