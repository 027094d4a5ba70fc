//! Signal module: RGB light, buzzer and vibration motor.

use async_trait::async_trait;
use wonderbits_client::Session;
use wonderbits_types::WbError;

use crate::module::{ModuleRef, Peripheral, block_arg, check_range, rgb_args};

pub struct Signal {
    module: ModuleRef,
    session: Session,
}

impl Signal {
    pub fn new(session: Session, index: u32) -> Result<Self, WbError> {
        Ok(Self {
            module: ModuleRef::new("signal", index)?,
            session,
        })
    }

    /// Light colour; all zero switches it off.
    pub async fn set_rgb(&self, r: u8, g: u8, b: u8) -> Result<String, WbError> {
        self.run("set_rgb", &rgb_args(r, g, b)).await
    }

    /// Buzzer frequency in Hz (0–20000); 0 silences it.
    pub async fn set_buzzer(&self, frequency: u32) -> Result<String, WbError> {
        check_range("frequency", frequency.into(), 0, 20_000)?;
        self.run("set_buzzer", &frequency.to_string()).await
    }

    /// Vibration strength (0–100); 0 stops it.
    pub async fn set_vibration(&self, strength: u32) -> Result<String, WbError> {
        check_range("strength", strength.into(), 0, 100)?;
        self.run("set_vibration", &strength.to_string()).await
    }

    /// Sound `frequency` Hz (20–20000) for `duration_ms` (50–60000), then
    /// silence. With `block` the module finishes the note before it answers.
    pub async fn play_a_note(
        &self,
        frequency: u32,
        duration_ms: u32,
        block: bool,
    ) -> Result<String, WbError> {
        check_range("frequency", frequency.into(), 20, 20_000)?;
        check_range("duration", duration_ms.into(), 50, 60_000)?;
        let args = format!("{frequency},{duration_ms},{}", block_arg(block));
        self.run("play_a_note", &args).await
    }

    async fn run(&self, method: &str, args: &str) -> Result<String, WbError> {
        self.session.command(&self.module.command(method, args)).await
    }
}

#[async_trait]
impl Peripheral for Signal {
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
    use crate::module::OnboardColor;
    use crate::test_support::echo_session;
    use wonderbits_types::{EventOptions, Value};

    #[tokio::test]
    async fn commands_are_formatted() {
        let (session, peer) = echo_session();
        let signal = Signal::new(session, 1).unwrap();
        signal.set_rgb(255, 0, 10).await.unwrap();
        signal.set_buzzer(440).await.unwrap();
        signal.set_vibration(30).await.unwrap();
        signal.play_a_note(523, 500, true).await.unwrap();
        signal.set_onboard_rgb(OnboardColor::Yellow).await.unwrap();
        assert_eq!(
            peer.sent(),
            vec![
                "signal1.set_rgb(255,0,10)",
                "signal1.set_buzzer(440)",
                "signal1.set_vibration(30)",
                "signal1.play_a_note(523,500,True)",
                "signal1.set_onboard_rgb(5)",
            ]
        );
    }

    #[tokio::test]
    async fn out_of_range_arguments_are_not_sent() {
        let (session, peer) = echo_session();
        let signal = Signal::new(session, 1).unwrap();
        assert!(matches!(
            signal.set_vibration(101).await,
            Err(WbError::InvalidArgument(_))
        ));
        assert!(signal.play_a_note(10, 500, false).await.is_err());
        assert!(signal.play_a_note(440, 10, false).await.is_err());
        assert!(peer.sent().is_empty());
    }

    #[tokio::test]
    async fn firmware_version_is_queried() {
        let (session, peer) = echo_session();
        peer.answer("signal3.get_firmware_version()", "2");
        let signal = Signal::new(session, 3).unwrap();
        assert_eq!(signal.firmware_version().await.unwrap(), Value::Number(2.0));
    }

    #[tokio::test]
    async fn signal_module_reports_no_events() {
        let (session, _peer) = echo_session();
        let signal = Signal::new(session, 1).unwrap();
        assert!(matches!(
            signal.on_signal("volume", EventOptions::default(), |_| {}),
            Err(WbError::InvalidArgument(_))
        ));
    }
}
