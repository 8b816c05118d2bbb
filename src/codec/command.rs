//! CSAFE command and response framing
//!
//! ## Frame Structure
//!
//! ```text
//! 0xF1 | contents... | checksum | 0xF2
//! ```
//!
//! - `checksum` is the XOR of every (unstuffed) content byte
//! - content and checksum bytes in `0xF0..=0xF3` are stuffed as `0xF3, byte - 0xF0`
//! - the unstuffed frame may not exceed 120 bytes
//!
//! Command contents are a sequence of commands. Opcodes below `0x80` are long
//! commands (`opcode | length | params...`); opcodes from `0x80` up are short
//! commands with no parameters.
//!
//! Response contents start with a status byte followed by one entry per
//! answered command, each `opcode | count | data...` regardless of opcode.

use tracing::trace;

use crate::{Pm5Error, Result};

pub const START_FLAG: u8 = 0xF1;
pub const STOP_FLAG: u8 = 0xF2;
const STUFF_FLAG: u8 = 0xF3;
const EXTENDED_START_FLAG: u8 = 0xF0;

/// Largest frame the monitor accepts, flags and checksum included
pub const MAX_FRAME_LEN: usize = 120;

/// Opcodes at or above this value carry no parameters
const SHORT_COMMAND_MIN: u8 = 0x80;

/// Status byte plus checksum
const MIN_RESPONSE_CONTENTS: usize = 2;

/// CSAFE unit specifier for meters
const UNIT_METERS: u8 = 0x24;
/// CSAFE unit specifier for watts
const UNIT_WATTS: u8 = 0x58;

/// Well-known CSAFE opcodes
pub mod opcodes {
    pub const GET_STATUS: u8 = 0x80;
    pub const RESET: u8 = 0x81;
    pub const GO_IDLE: u8 = 0x82;
    pub const GO_HAVE_ID: u8 = 0x83;
    pub const GO_IN_USE: u8 = 0x85;
    pub const GO_FINISHED: u8 = 0x86;
    pub const GO_READY: u8 = 0x87;
    pub const GET_VERSION: u8 = 0x91;
    pub const GET_SERIAL: u8 = 0x94;
    pub const GET_ODOMETER: u8 = 0x9B;
    pub const GET_WORK_TIME: u8 = 0xA0;
    pub const GET_HORIZONTAL: u8 = 0xA1;
    pub const GET_PACE: u8 = 0xA6;
    pub const GET_CADENCE: u8 = 0xA7;
    pub const GET_HEART_RATE: u8 = 0xB0;
    pub const SET_WORK_TIME: u8 = 0x20;
    pub const SET_HORIZONTAL: u8 = 0x21;
    pub const SET_PROGRAM: u8 = 0x24;
    pub const SET_POWER: u8 = 0x34;
}

/// One command: opcode plus parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub opcode: u8,
    pub params: Vec<u8>,
}

impl Command {
    /// Command without parameters
    pub fn short(opcode: u8) -> Self {
        Self { opcode, params: Vec::new() }
    }

    /// Command carrying a length-prefixed parameter block
    pub fn long(opcode: u8, params: impl Into<Vec<u8>>) -> Self {
        Self { opcode, params: params.into() }
    }

    pub fn is_short(&self) -> bool {
        self.opcode >= SHORT_COMMAND_MIN
    }

    pub fn get_status() -> Self {
        Self::short(opcodes::GET_STATUS)
    }

    pub fn reset() -> Self {
        Self::short(opcodes::RESET)
    }

    pub fn go_idle() -> Self {
        Self::short(opcodes::GO_IDLE)
    }

    pub fn go_have_id() -> Self {
        Self::short(opcodes::GO_HAVE_ID)
    }

    pub fn go_in_use() -> Self {
        Self::short(opcodes::GO_IN_USE)
    }

    pub fn go_finished() -> Self {
        Self::short(opcodes::GO_FINISHED)
    }

    pub fn go_ready() -> Self {
        Self::short(opcodes::GO_READY)
    }

    pub fn get_version() -> Self {
        Self::short(opcodes::GET_VERSION)
    }

    pub fn get_serial() -> Self {
        Self::short(opcodes::GET_SERIAL)
    }

    pub fn get_odometer() -> Self {
        Self::short(opcodes::GET_ODOMETER)
    }

    pub fn get_work_time() -> Self {
        Self::short(opcodes::GET_WORK_TIME)
    }

    pub fn get_horizontal() -> Self {
        Self::short(opcodes::GET_HORIZONTAL)
    }

    pub fn get_pace() -> Self {
        Self::short(opcodes::GET_PACE)
    }

    pub fn get_cadence() -> Self {
        Self::short(opcodes::GET_CADENCE)
    }

    pub fn get_heart_rate() -> Self {
        Self::short(opcodes::GET_HEART_RATE)
    }

    /// Program a timed workout
    pub fn set_work_time(hours: u8, minutes: u8, seconds: u8) -> Self {
        Self::long(opcodes::SET_WORK_TIME, [hours, minutes, seconds])
    }

    /// Program a distance workout in meters
    pub fn set_horizontal(meters: u16) -> Self {
        let [lsb, msb] = meters.to_le_bytes();
        Self::long(opcodes::SET_HORIZONTAL, [lsb, msb, UNIT_METERS])
    }

    /// Select a preset workout program
    pub fn set_program(program: u8) -> Self {
        Self::long(opcodes::SET_PROGRAM, [program, 0x00])
    }

    /// Target power in watts
    pub fn set_power(watts: u16) -> Self {
        let [lsb, msb] = watts.to_le_bytes();
        Self::long(opcodes::SET_POWER, [lsb, msb, UNIT_WATTS])
    }

    fn encode_into(&self, contents: &mut Vec<u8>) -> Result<()> {
        if self.is_short() {
            if !self.params.is_empty() {
                return Err(Pm5Error::InvalidCommand {
                    details: format!(
                        "short opcode {:#04x} cannot carry {} parameter bytes",
                        self.opcode,
                        self.params.len()
                    ),
                });
            }
            contents.push(self.opcode);
            return Ok(());
        }

        let len = u8::try_from(self.params.len()).map_err(|_| Pm5Error::InvalidCommand {
            details: format!(
                "opcode {:#04x} has {} parameter bytes, limit is 255",
                self.opcode,
                self.params.len()
            ),
        })?;
        contents.push(self.opcode);
        contents.push(len);
        contents.extend_from_slice(&self.params);
        Ok(())
    }
}

/// An ordered batch of commands sent in one frame
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandFrame {
    pub commands: Vec<Command>,
}

impl CommandFrame {
    pub fn new(commands: Vec<Command>) -> Self {
        Self { commands }
    }

    pub fn single(command: Command) -> Self {
        Self { commands: vec![command] }
    }

    /// Encode into the bytes written to the control characteristic
    pub fn encode(&self) -> Result<Vec<u8>> {
        if self.commands.is_empty() {
            return Err(Pm5Error::InvalidCommand { details: "frame has no commands".to_string() });
        }

        let mut contents = Vec::new();
        for command in &self.commands {
            command.encode_into(&mut contents)?;
        }

        // Flags and checksum count towards the limit
        let unstuffed_len = contents.len() + 3;
        if unstuffed_len > MAX_FRAME_LEN {
            return Err(Pm5Error::InvalidCommand {
                details: format!(
                    "frame is {} bytes, limit is {}",
                    unstuffed_len, MAX_FRAME_LEN
                ),
            });
        }

        let checksum = checksum(&contents);
        contents.push(checksum);

        let frame = wrap(&contents);
        trace!("Encoded {} commands into {} bytes", self.commands.len(), frame.len());
        Ok(frame)
    }

    /// Parse a transmitted command frame back into its commands
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let contents = unwrap_checked(bytes, "command frame")?;

        let mut commands = Vec::new();
        let mut cursor = 0;
        while cursor < contents.len() {
            let opcode = contents[cursor];
            cursor += 1;

            if opcode >= SHORT_COMMAND_MIN {
                commands.push(Command::short(opcode));
                continue;
            }

            let Some(&len) = contents.get(cursor) else {
                return Err(Pm5Error::format("command frame", cursor + 1, contents.len()));
            };
            cursor += 1;
            let end = cursor + len as usize;
            if end > contents.len() {
                return Err(Pm5Error::format("command frame", end, contents.len()));
            }
            commands.push(Command::long(opcode, &contents[cursor..end]));
            cursor = end;
        }

        Ok(Self { commands })
    }
}

/// One answered command inside a response frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResponse {
    pub opcode: u8,
    pub data: Vec<u8>,
}

/// Parsed response from the control channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseFrame {
    pub status: u8,
    pub responses: Vec<CommandResponse>,
}

impl ResponseFrame {
    /// Decode bytes read from the response characteristic
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let contents = unwrap_checked(bytes, "response frame")?;

        let status = contents[0];
        let mut responses = Vec::new();
        let mut cursor = 1;
        while cursor < contents.len() {
            if cursor + 2 > contents.len() {
                return Err(Pm5Error::format("response frame", cursor + 2, contents.len()));
            }
            let opcode = contents[cursor];
            let count = contents[cursor + 1] as usize;
            let start = cursor + 2;
            let end = start + count;
            if end > contents.len() {
                return Err(Pm5Error::format("response frame", end, contents.len()));
            }
            responses.push(CommandResponse { opcode, data: contents[start..end].to_vec() });
            cursor = end;
        }

        Ok(Self { status, responses })
    }

    /// Encode a response; the monitor side of the exchange
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut contents = vec![self.status];
        for response in &self.responses {
            let count = u8::try_from(response.data.len()).map_err(|_| {
                Pm5Error::InvalidCommand {
                    details: format!("response to {:#04x} exceeds 255 bytes", response.opcode),
                }
            })?;
            contents.push(response.opcode);
            contents.push(count);
            contents.extend_from_slice(&response.data);
        }
        let checksum = checksum(&contents);
        contents.push(checksum);
        Ok(wrap(&contents))
    }

    /// Toggles on every new frame the monitor sends
    pub fn frame_toggle(&self) -> bool {
        self.status & 0x80 != 0
    }

    /// Outcome of the previous frame: 0 ok, 1 rejected, 2 bad, 3 not ready
    pub fn previous_frame_status(&self) -> u8 {
        (self.status >> 4) & 0x03
    }

    /// CSAFE state machine state of the monitor
    pub fn server_state(&self) -> u8 {
        self.status & 0x0F
    }

    pub fn response(&self, opcode: u8) -> Option<&CommandResponse> {
        self.responses.iter().find(|r| r.opcode == opcode)
    }
}

/// XOR of all bytes
pub fn checksum(contents: &[u8]) -> u8 {
    contents.iter().fold(0, |acc, b| acc ^ b)
}

fn wrap(contents: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(contents.len() + 2);
    frame.push(START_FLAG);
    for &byte in contents {
        if (EXTENDED_START_FLAG..=STUFF_FLAG).contains(&byte) {
            frame.push(STUFF_FLAG);
            frame.push(byte - EXTENDED_START_FLAG);
        } else {
            frame.push(byte);
        }
    }
    frame.push(STOP_FLAG);
    frame
}

/// Strip flags, unstuff, verify the checksum; returns contents without checksum
fn unwrap_checked(bytes: &[u8], context: &'static str) -> Result<Vec<u8>> {
    // Start flag, two content bytes, stop flag
    if bytes.len() < MIN_RESPONSE_CONTENTS + 2 {
        return Err(Pm5Error::format(context, MIN_RESPONSE_CONTENTS + 2, bytes.len()));
    }
    if bytes[0] != START_FLAG {
        return Err(Pm5Error::Protocol {
            context,
            details: format!("expected start flag {:#04x}, got {:#04x}", START_FLAG, bytes[0]),
        });
    }
    let last = bytes[bytes.len() - 1];
    if last != STOP_FLAG {
        return Err(Pm5Error::Protocol {
            context,
            details: format!("expected stop flag {:#04x}, got {:#04x}", STOP_FLAG, last),
        });
    }

    let mut contents = Vec::with_capacity(bytes.len());
    let mut stuffed = bytes[1..bytes.len() - 1].iter();
    while let Some(&byte) = stuffed.next() {
        match byte {
            STUFF_FLAG => match stuffed.next() {
                Some(&escaped) if escaped <= 0x03 => contents.push(EXTENDED_START_FLAG + escaped),
                Some(&escaped) => {
                    return Err(Pm5Error::Protocol {
                        context,
                        details: format!("invalid stuffed byte {:#04x}", escaped),
                    });
                }
                None => {
                    return Err(Pm5Error::Protocol {
                        context,
                        details: "frame ends inside a stuffing escape".to_string(),
                    });
                }
            },
            EXTENDED_START_FLAG | START_FLAG | STOP_FLAG => {
                return Err(Pm5Error::Protocol {
                    context,
                    details: format!("unescaped flag {:#04x} inside frame", byte),
                });
            }
            _ => contents.push(byte),
        }
    }

    if contents.len() < MIN_RESPONSE_CONTENTS {
        return Err(Pm5Error::format(context, MIN_RESPONSE_CONTENTS, contents.len()));
    }

    let Some(received) = contents.pop() else {
        return Err(Pm5Error::format(context, MIN_RESPONSE_CONTENTS, 0));
    };
    let computed = checksum(&contents);
    if received != computed {
        return Err(Pm5Error::Checksum { expected: received, actual: computed });
    }

    Ok(contents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn short_command_frame_layout() {
        let frame = CommandFrame::single(Command::get_status()).encode().unwrap();
        assert_eq!(frame, vec![0xF1, 0x80, 0x80, 0xF2]);
    }

    #[test]
    fn long_command_is_length_prefixed() {
        let frame = CommandFrame::single(Command::set_horizontal(2000)).encode().unwrap();
        // 2000 = 0x07D0, unit 0x24; checksum 0x21 ^ 0x03 ^ 0xD0 ^ 0x07 ^ 0x24
        assert_eq!(frame, vec![0xF1, 0x21, 0x03, 0xD0, 0x07, 0x24, 0xD1, 0xF2]);
    }

    #[test]
    fn reserved_bytes_are_stuffed() {
        let frame = CommandFrame::single(Command::long(0x10, [0xF0, 0xF3])).encode().unwrap();
        assert_eq!(&frame[..7], &[0xF1, 0x10, 0x02, 0xF3, 0x00, 0xF3, 0x03]);
        assert_eq!(CommandFrame::decode(&frame).unwrap().commands[0].params, vec![0xF0, 0xF3]);
    }

    #[test]
    fn short_commands_reject_parameters() {
        let result = CommandFrame::single(Command::long(0x80, [1])).encode();
        assert!(matches!(result, Err(Pm5Error::InvalidCommand { .. })));
    }

    #[test]
    fn oversized_frames_are_rejected() {
        let result = CommandFrame::single(Command::long(0x01, vec![0u8; 200])).encode();
        assert!(matches!(result, Err(Pm5Error::InvalidCommand { .. })));

        let result = CommandFrame::single(Command::long(0x01, vec![0u8; 300])).encode();
        assert!(matches!(result, Err(Pm5Error::InvalidCommand { .. })));

        assert!(CommandFrame::default().encode().is_err());
    }

    #[test]
    fn response_decodes_entries_and_status() {
        let response = ResponseFrame {
            status: 0x81,
            responses: vec![
                CommandResponse { opcode: opcodes::GET_SERIAL, data: b"430123456".to_vec() },
                CommandResponse { opcode: opcodes::GET_CADENCE, data: vec![0x1C, 0x00, 0x54] },
            ],
        };
        let bytes = response.encode().unwrap();
        let decoded = ResponseFrame::decode(&bytes).unwrap();

        assert_eq!(decoded, response);
        assert!(decoded.frame_toggle());
        assert_eq!(decoded.server_state(), 0x01);
        assert_eq!(decoded.previous_frame_status(), 0);
        assert_eq!(decoded.response(opcodes::GET_CADENCE).unwrap().data[0], 0x1C);
        assert!(decoded.response(opcodes::GET_PACE).is_none());
    }

    #[test]
    fn truncated_response_is_a_format_error() {
        // Entry claims 4 data bytes, only 1 present
        let contents = [0x01, 0xA7, 0x04, 0x1C];
        let mut bytes = vec![START_FLAG];
        bytes.extend_from_slice(&contents);
        bytes.push(checksum(&contents));
        bytes.push(STOP_FLAG);

        match ResponseFrame::decode(&bytes) {
            Err(Pm5Error::Format { expected, actual, .. }) => {
                assert_eq!(expected, 7);
                assert_eq!(actual, 4);
            }
            other => panic!("Expected Format error, got {:?}", other),
        }

        assert!(matches!(
            ResponseFrame::decode(&[START_FLAG, STOP_FLAG]),
            Err(Pm5Error::Format { expected: 4, actual: 2, .. })
        ));
    }

    #[test]
    fn corrupt_responses_are_rejected() {
        let mut bytes = ResponseFrame { status: 0x01, responses: vec![] }.encode().unwrap();
        let checksum_index = bytes.len() - 2;
        bytes[checksum_index] ^= 0x55;
        assert!(matches!(ResponseFrame::decode(&bytes), Err(Pm5Error::Checksum { .. })));

        assert!(matches!(
            ResponseFrame::decode(&[0x00, 0x01, 0x01, STOP_FLAG]),
            Err(Pm5Error::Protocol { .. })
        ));
        assert!(matches!(
            ResponseFrame::decode(&[START_FLAG, 0x01, 0xF3, 0x09, 0x01, STOP_FLAG]),
            Err(Pm5Error::Protocol { .. })
        ));
    }

    fn arb_command() -> impl Strategy<Value = Command> {
        prop_oneof![
            (0x80u8..=0xFF).prop_map(Command::short),
            (0x00u8..0x80, prop::collection::vec(any::<u8>(), 0..24))
                .prop_map(|(opcode, params)| Command::long(opcode, params)),
        ]
    }

    proptest! {
        #[test]
        fn command_frames_round_trip(commands in prop::collection::vec(arb_command(), 1..4)) {
            let frame = CommandFrame::new(commands);
            let bytes = frame.encode().unwrap();

            prop_assert_eq!(bytes[0], START_FLAG);
            prop_assert_eq!(*bytes.last().unwrap(), STOP_FLAG);
            prop_assert_eq!(CommandFrame::decode(&bytes).unwrap(), frame);
        }

        #[test]
        fn stuffed_frames_never_contain_bare_flags(
            params in prop::collection::vec(0xF0u8..=0xF3, 1..16)
        ) {
            let bytes = CommandFrame::single(Command::long(0x01, params)).encode().unwrap();
            let body = &bytes[1..bytes.len() - 1];
            prop_assert!(!body.iter().any(|&b| matches!(b, 0xF0..=0xF2)));
        }
    }
}
