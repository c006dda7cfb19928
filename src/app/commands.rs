//! Inbound commands, written by the client to a command characteristic.
//!
//! | Payload      | Command                       |
//! |--------------|-------------------------------|
//! | `00`         | pause streaming               |
//! | `01`         | resume streaming              |
//! | `02 rr`      | set range, `rr` in g (2/4/8/16) |

use core::fmt;

use crate::sensors::accel::AccelRange;

pub const OP_PAUSE: u8 = 0x00;
pub const OP_RESUME: u8 = 0x01;
pub const OP_SET_RANGE: u8 = 0x02;

/// Commands that the client can send into the telemetry core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppCommand {
    PauseStreaming,
    ResumeStreaming,
    SetRange(AccelRange),
}

/// Why a command payload was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandError {
    Empty,
    UnknownOpcode(u8),
    /// Opcode needs an argument byte that was not written.
    MissingArgument(u8),
    InvalidArgument { opcode: u8, arg: u8 },
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "empty command"),
            Self::UnknownOpcode(op) => write!(f, "unknown opcode 0x{:02X}", op),
            Self::MissingArgument(op) => write!(f, "opcode 0x{:02X} needs an argument", op),
            Self::InvalidArgument { opcode, arg } => {
                write!(f, "opcode 0x{:02X}: invalid argument {}", opcode, arg)
            }
        }
    }
}

impl AppCommand {
    /// Decode a command characteristic payload. Trailing bytes are ignored.
    pub fn parse(bytes: &[u8]) -> Result<Self, CommandError> {
        let (&opcode, rest) = bytes.split_first().ok_or(CommandError::Empty)?;
        match opcode {
            OP_PAUSE => Ok(Self::PauseStreaming),
            OP_RESUME => Ok(Self::ResumeStreaming),
            OP_SET_RANGE => {
                let &arg = rest.first().ok_or(CommandError::MissingArgument(opcode))?;
                AccelRange::from_g(arg)
                    .map(Self::SetRange)
                    .ok_or(CommandError::InvalidArgument { opcode, arg })
            }
            other => Err(CommandError::UnknownOpcode(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_streaming_commands() {
        assert_eq!(AppCommand::parse(&[0x00]), Ok(AppCommand::PauseStreaming));
        assert_eq!(AppCommand::parse(&[0x01, 0xFF]), Ok(AppCommand::ResumeStreaming));
    }

    #[test]
    fn parses_range() {
        assert_eq!(AppCommand::parse(&[0x02, 8]), Ok(AppCommand::SetRange(AccelRange::G8)));
        assert_eq!(
            AppCommand::parse(&[0x02, 3]),
            Err(CommandError::InvalidArgument { opcode: 0x02, arg: 3 })
        );
        assert_eq!(AppCommand::parse(&[0x02]), Err(CommandError::MissingArgument(0x02)));
    }

    #[test]
    fn rejects_empty_and_unknown() {
        assert_eq!(AppCommand::parse(&[]), Err(CommandError::Empty));
        assert_eq!(AppCommand::parse(&[0x05]), Err(CommandError::UnknownOpcode(0x05)));
    }
}
