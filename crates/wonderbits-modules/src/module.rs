//! Addressing and operations shared by every wonderbits module.

use std::fmt;

use async_trait::async_trait;
use tracing::debug;
use wonderbits_client::{Session, SubscriptionHandle};
use wonderbits_types::{EventOptions, ModuleEvent, Value, WbError, wire_bool};

/// A module instance as the companion process names it: kind plus 1-based
/// index, rendered as `signal1`, `buggy2`, …
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModuleRef {
    kind: &'static str,
    index: u32,
}

impl ModuleRef {
    /// # Errors
    ///
    /// Returns [`WbError::InvalidArgument`] for index 0.
    pub fn new(kind: &'static str, index: u32) -> Result<Self, WbError> {
        if index == 0 {
            return Err(WbError::InvalidArgument(format!(
                "{kind} module index starts at 1"
            )));
        }
        Ok(Self { kind, index })
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    /// `<module>.<method>(<args>)`
    pub fn command(&self, method: &str, args: &str) -> String {
        format!("{self}.{method}({args})")
    }
}

impl fmt::Display for ModuleRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind, self.index)
    }
}

/// Palette of the status LED every module carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OnboardColor {
    Red = 1,
    Green = 2,
    Blue = 3,
    LightBlue = 4,
    Yellow = 5,
    Purple = 6,
    White = 7,
    Off = 8,
}

impl OnboardColor {
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for OnboardColor {
    type Error = WbError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Ok(match code {
            1 => OnboardColor::Red,
            2 => OnboardColor::Green,
            3 => OnboardColor::Blue,
            4 => OnboardColor::LightBlue,
            5 => OnboardColor::Yellow,
            6 => OnboardColor::Purple,
            7 => OnboardColor::White,
            8 => OnboardColor::Off,
            other => {
                return Err(WbError::InvalidArgument(format!(
                    "onboard colour {other} out of range 1-8"
                )));
            }
        })
    }
}

/// Reject `value` outside `min..=max`.
pub(crate) fn check_range(name: &str, value: i64, min: i64, max: i64) -> Result<(), WbError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        debug!(name, value, min, max, "argument rejected before send");
        Err(WbError::InvalidArgument(format!(
            "{name} {value} out of range {min}-{max}"
        )))
    }
}

/// `r,g,b` argument list.
pub(crate) fn rgb_args(r: u8, g: u8, b: u8) -> String {
    format!("{r},{g},{b}")
}

pub(crate) fn block_arg(block: bool) -> &'static str {
    wire_bool(block)
}

/// Operations every module supports.
///
/// Implementors only provide their address, their session, and the names of
/// the signals they can report.
#[async_trait]
pub trait Peripheral: Send + Sync {
    /// Signal names this module can report as events.
    const SIGNALS: &'static [&'static str];

    fn module(&self) -> &ModuleRef;

    fn session(&self) -> &Session;

    /// Firmware version of the module.
    async fn firmware_version(&self) -> Result<Value, WbError> {
        let command = self.module().command("get_firmware_version", "");
        self.session().query(&command).await
    }

    /// Set the status LED.
    async fn set_onboard_rgb(&self, color: OnboardColor) -> Result<String, WbError> {
        let command = self
            .module()
            .command("set_onboard_rgb", &color.code().to_string());
        self.session().command(&command).await
    }

    /// Subscribe to one of [`Peripheral::SIGNALS`].
    ///
    /// # Errors
    ///
    /// [`WbError::InvalidArgument`] for a signal this module does not report,
    /// otherwise whatever [`Session::register_event`] returns.
    fn on_signal(
        &self,
        signal: &str,
        options: EventOptions,
        callback: impl Fn(ModuleEvent) + Send + Sync + 'static,
    ) -> Result<SubscriptionHandle, WbError> {
        ensure_signal::<Self>(self.module(), signal)?;
        self.session()
            .register_event(&self.module().to_string(), signal, options, callback)
    }

    /// Stop every subscription to `signal` on this module.
    fn off_signal(&self, signal: &str) -> Result<(), WbError> {
        ensure_signal::<Self>(self.module(), signal)?;
        self.session()
            .unregister_event(&self.module().to_string(), signal)
    }
}

fn ensure_signal<P: Peripheral + ?Sized>(module: &ModuleRef, signal: &str) -> Result<(), WbError> {
    if P::SIGNALS.contains(&signal) {
        Ok(())
    } else {
        Err(WbError::InvalidArgument(format!(
            "{module} does not report `{signal}`"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_ref_renders_kind_and_index() {
        let module = ModuleRef::new("signal", 2).unwrap();
        assert_eq!(module.to_string(), "signal2");
        assert_eq!(module.command("set_buzzer", "440"), "signal2.set_buzzer(440)");
        assert_eq!(module.command("get_firmware_version", ""), "signal2.get_firmware_version()");
    }

    #[test]
    fn module_index_zero_is_rejected() {
        assert!(matches!(
            ModuleRef::new("buggy", 0),
            Err(WbError::InvalidArgument(_))
        ));
    }

    #[test]
    fn onboard_colour_codes() {
        assert_eq!(OnboardColor::Red.code(), 1);
        assert_eq!(OnboardColor::Off.code(), 8);
        assert_eq!(OnboardColor::try_from(4).unwrap(), OnboardColor::LightBlue);
        assert!(OnboardColor::try_from(0).is_err());
        assert!(OnboardColor::try_from(9).is_err());
    }

    #[test]
    fn range_check_is_inclusive() {
        assert!(check_range("speed", -100, -100, 100).is_ok());
        assert!(check_range("speed", 100, -100, 100).is_ok());
        assert!(check_range("speed", 101, -100, 100).is_err());
    }
}
