//! Diagnostic control channel.
//!
//! Commands are one code byte followed by free-form arguments:
//!
//! ```text
//!  0        1 .. n
//! ┌────────┬──────────────┐
//! │  code  │  arguments   │
//! └────────┴──────────────┘
//! ```
//!
//! The transport only parses and dispatches.  What a command means is up to
//! the [`CommandHandler`] the node installs.  A reply starts with the code it
//! answers, or with [`CommandCode::Error`] followed by the offending byte.

use crate::error::ControlError;

/// Command identifiers understood on the control channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CommandCode {
    Ping = 0,
    NeighborDump = 1,
    LinkStateDump = 2,
    RouteTableDump = 3,
    TestClient = 4,
    TestServer = 5,
    Kill = 6,
    Error = 9,
}

impl TryFrom<u8> for CommandCode {
    type Error = ControlError;

    fn try_from(code: u8) -> Result<Self, ControlError> {
        Ok(match code {
            0 => Self::Ping,
            1 => Self::NeighborDump,
            2 => Self::LinkStateDump,
            3 => Self::RouteTableDump,
            4 => Self::TestClient,
            5 => Self::TestServer,
            6 => Self::Kill,
            9 => Self::Error,
            other => return Err(ControlError::UnknownCode(other)),
        })
    }
}

/// A parsed control command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub code: CommandCode,
    pub args: Vec<u8>,
}

impl Command {
    pub fn new(code: CommandCode, args: &[u8]) -> Self {
        Self {
            code,
            args: args.to_vec(),
        }
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, ControlError> {
        let (&code, args) = bytes.split_first().ok_or(ControlError::Empty)?;
        Ok(Self {
            code: CommandCode::try_from(code)?,
            args: args.to_vec(),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + self.args.len());
        out.push(self.code as u8);
        out.extend_from_slice(&self.args);
        out
    }
}

/// Application hook that executes control commands.
pub trait CommandHandler {
    /// Run `cmd` and return the reply body (without the leading code byte).
    fn handle(&mut self, cmd: &Command) -> Vec<u8>;
}

/// Answers `Ping` by echoing its arguments and everything else with an
/// empty body.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoHandler;

impl CommandHandler for EchoHandler {
    fn handle(&mut self, cmd: &Command) -> Vec<u8> {
        match cmd.code {
            CommandCode::Ping => cmd.args.clone(),
            _ => Vec::new(),
        }
    }
}

/// Parse `bytes`, run the command through `handler` and build the reply.
pub fn dispatch(handler: &mut dyn CommandHandler, bytes: &[u8]) -> Vec<u8> {
    match Command::parse(bytes) {
        Ok(cmd) => {
            log::debug!("[ctl] {:?} ({} arg bytes)", cmd.code, cmd.args.len());
            let mut reply = vec![cmd.code as u8];
            reply.extend(handler.handle(&cmd));
            reply
        }
        Err(e) => {
            log::warn!("[ctl] {e}");
            let offending = bytes.first().copied().unwrap_or_default();
            vec![CommandCode::Error as u8, offending]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_splits_code_and_args() {
        let cmd = Command::parse(&[3, 7, 8]).unwrap();
        assert_eq!(cmd.code, CommandCode::RouteTableDump);
        assert_eq!(cmd.args, vec![7, 8]);
        assert_eq!(cmd.encode(), vec![3, 7, 8]);
    }

    #[test]
    fn parse_rejects_empty_and_unknown() {
        assert_eq!(Command::parse(&[]), Err(ControlError::Empty));
        assert_eq!(Command::parse(&[7]), Err(ControlError::UnknownCode(7)));
    }

    #[test]
    fn ping_is_echoed() {
        let reply = dispatch(&mut EchoHandler, &[0, b'h', b'i']);
        assert_eq!(reply, vec![0, b'h', b'i']);
    }

    #[test]
    fn unknown_code_gets_error_reply() {
        assert_eq!(dispatch(&mut EchoHandler, &[42]), vec![9, 42]);
    }

    #[test]
    fn custom_handler_sees_arguments() {
        struct Routes;
        impl CommandHandler for Routes {
            fn handle(&mut self, cmd: &Command) -> Vec<u8> {
                assert_eq!(cmd.code, CommandCode::RouteTableDump);
                b"1->2 via 3".to_vec()
            }
        }
        let reply = dispatch(&mut Routes, &[3]);
        assert_eq!(&reply[1..], b"1->2 via 3");
    }
}
