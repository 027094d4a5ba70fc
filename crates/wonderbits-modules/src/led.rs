//! LED module: a single colour light with fades.

use async_trait::async_trait;
use wonderbits_client::Session;
use wonderbits_types::WbError;

use crate::module::{ModuleRef, Peripheral, block_arg, check_range, rgb_args};

/// Fade steps used by the firmware when none are given.
pub const DEFAULT_FADE_STEPS: u32 = 50;

pub struct Led {
    module: ModuleRef,
    session: Session,
}

impl Led {
    pub fn new(session: Session, index: u32) -> Result<Self, WbError> {
        Ok(Self {
            module: ModuleRef::new("led", index)?,
            session,
        })
    }

    pub async fn set_rgb(&self, r: u8, g: u8, b: u8) -> Result<String, WbError> {
        let command = self.module.command("set_rgb", &rgb_args(r, g, b));
        self.session.command(&command).await
    }

    /// Fade from the current colour to `r,g,b` over `duration_ms`
    /// (0–60000) in `steps` increments.
    pub async fn fade_to_rgb(
        &self,
        (r, g, b): (u8, u8, u8),
        duration_ms: u32,
        steps: u32,
        block: bool,
    ) -> Result<String, WbError> {
        check_range("duration", duration_ms.into(), 0, 60_000)?;
        check_range("steps", steps.into(), 1, i64::from(u32::MAX))?;
        let args = format!(
            "{},{duration_ms},{steps},{}",
            rgb_args(r, g, b),
            block_arg(block)
        );
        self.session
            .command(&self.module.command("fade_to_rgb", &args))
            .await
    }
}

#[async_trait]
impl Peripheral for Led {
    const SIGNALS: &'static [&'static str] = &[];

    fn module(&self) -> &ModuleRef {
        &self.module
    }

    fn session(&self) -> &Session {
        &self.session
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::echo_session;

    #[tokio::test]
    async fn fade_renders_block_flag() {
        let (session, peer) = echo_session();
        let led = Led::new(session, 2).unwrap();
        led.set_rgb(0, 0, 0).await.unwrap();
        led.fade_to_rgb((10, 20, 30), 1000, DEFAULT_FADE_STEPS, false)
            .await
            .unwrap();
        assert_eq!(
            peer.sent(),
            vec!["led2.set_rgb(0,0,0)", "led2.fade_to_rgb(10,20,30,1000,50,False)"]
        );
    }

    #[tokio::test]
    async fn fade_validates_duration_and_steps() {
        let (session, peer) = echo_session();
        let led = Led::new(session, 1).unwrap();
        assert!(led.fade_to_rgb((1, 1, 1), 60_001, 10, false).await.is_err());
        assert!(led.fade_to_rgb((1, 1, 1), 100, 0, false).await.is_err());
        assert!(peer.sent().is_empty());
    }
}
