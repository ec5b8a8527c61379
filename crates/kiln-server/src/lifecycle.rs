use crate::RegistryError;
use std::fmt;

/// Stage of a build or boot record, independent of how it is spelled on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    Running,
    Done,
    Error,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Done | Phase::Error)
    }
}

/// Implemented by the status enums of build and boot records.
pub trait Lifecycle: Copy + fmt::Display {
    fn phase(self) -> Phase;

    fn is_terminal(self) -> bool {
        self.phase().is_terminal()
    }
}

/// `Init -> Running -> Done | Error`. `Init -> Error` covers records that
/// fail before their task starts.
pub fn validate_transition<S: Lifecycle>(from: S, to: S) -> Result<(), RegistryError> {
    let valid = matches!(
        (from.phase(), to.phase()),
        (Phase::Init, Phase::Running | Phase::Error) | (Phase::Running, Phase::Done | Phase::Error)
    );

    if valid {
        Ok(())
    } else {
        Err(RegistryError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}
