// Wire encodings
//
// One implementation per command mode, selected once per connection:
// - HumanReadable: "<name> <args...>\n" request, one text line reply
// - HighSpeedBinary: [CommandId, big-endian payload], fixed-size reply
// - SimpleFocPassthrough: raw text lines forwarded to the board's commander

use super::command::{Command, CommandMode, FullState, PidGains, Reply};
use super::error::{ProtocolError, Result};
use super::fixed_point;

/// Token that starts a full-state reply
const FULL_STATE_TOKEN: &str = "full_state";

/// How much to read for one reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyUnit {
    /// One '\n'-terminated line
    Line,
    /// Exactly this many bytes
    Bytes(usize),
}

/// A wire format for requests and replies
pub trait Encoding: Send {
    fn mode(&self) -> CommandMode;

    /// Serialize a request; fails with `NotSupportedInMode` before any I/O
    fn encode_request(&self, command: &Command) -> Result<Vec<u8>>;

    fn reply_unit(&self, command: &Command) -> ReplyUnit;

    fn decode_reply(&self, command: &Command, raw: &[u8]) -> Result<Reply>;
}

/// Strategy for a mode
pub fn for_mode(mode: CommandMode) -> Box<dyn Encoding> {
    match mode {
        CommandMode::HumanReadable => Box::new(HumanReadable),
        CommandMode::HighSpeedBinary => Box::new(HighSpeedBinary),
        CommandMode::SimpleFocPassthrough => Box::new(SimpleFocPassthrough),
    }
}

// === Human readable ===

#[derive(Debug, Clone, Copy, Default)]
pub struct HumanReadable;

impl Encoding for HumanReadable {
    fn mode(&self) -> CommandMode {
        CommandMode::HumanReadable
    }

    fn encode_request(&self, command: &Command) -> Result<Vec<u8>> {
        Ok(format!("{}\n", command).into_bytes())
    }

    fn reply_unit(&self, _command: &Command) -> ReplyUnit {
        ReplyUnit::Line
    }

    fn decode_reply(&self, command: &Command, raw: &[u8]) -> Result<Reply> {
        let name = command.name();
        let text = reply_text(name, raw)?;

        match command {
            Command::Enable | Command::Disable | Command::ResetPosition | Command::SaveConfig => {
                if text == name {
                    Ok(Reply::Ack)
                } else {
                    Err(ProtocolError::decode(
                        name,
                        format!("expected {:?}, got {:?}", name, text),
                    ))
                }
            }

            // Any non-empty line counts; recalibration output is drained by the client
            Command::Home
            | Command::Stop
            | Command::SetCommandMode(_)
            | Command::RecalibrateSensors => Ok(Reply::Ack),

            Command::Raw(_) => Ok(Reply::Text(text.to_string())),

            Command::SetPosition(_)
            | Command::SetVelocity(_)
            | Command::SetTorque(_)
            | Command::SetMinAngle(_)
            | Command::SetMaxAngle(_)
            | Command::SetBroadcast(_) => {
                parse_float(name, echoed_value(name, text)?).map(Reply::Float)
            }

            Command::SetDownsample(_)
            | Command::SetPolePairs(_)
            | Command::SetTorqueController(_)
            | Command::SetFocModulation(_) => {
                parse_int(name, echoed_value(name, text)?).map(Reply::Int)
            }

            Command::SetPid(..) => parse_pid(name, echoed_value(name, text)?).map(Reply::Pid),

            Command::GetPosition
            | Command::GetVelocity
            | Command::GetTorque
            | Command::GetTemperature
            | Command::GetBusVoltage
            | Command::GetInternalTemperature
            | Command::GetCurrent(_)
            | Command::GetMinAngle
            | Command::GetMaxAngle => {
                parse_float(name, without_echo(name, text)).map(Reply::Float)
            }

            Command::GetDownsample
            | Command::GetPolePairs
            | Command::GetTorqueController
            | Command::GetFocModulation => {
                parse_int(name, without_echo(name, text)).map(Reply::Int)
            }

            Command::GetPid(_) => parse_pid(name, without_echo(name, text)).map(Reply::Pid),

            Command::GetFullState => {
                let body = without_echo(FULL_STATE_TOKEN, without_echo(name, text));
                let fields = parse_fields(name, body)?;
                FullState::from_fields(&fields)
                    .map(Reply::FullState)
                    .ok_or_else(|| {
                        ProtocolError::decode(
                            name,
                            format!(
                                "expected {} fields, got {}",
                                FullState::FIELD_COUNT,
                                fields.len()
                            ),
                        )
                    })
            }
        }
    }
}

/// UTF-8 decode and trim; an empty line is a failed exchange
fn reply_text<'a>(name: &str, raw: &'a [u8]) -> Result<&'a str> {
    let text = std::str::from_utf8(raw)
        .map_err(|_| ProtocolError::decode(name, "reply is not valid UTF-8"))?
        .trim();
    if text.is_empty() {
        return Err(ProtocolError::decode(name, "empty reply"));
    }
    Ok(text)
}

/// Value part of a mandatory "<name> <value>" echo
fn echoed_value<'a>(name: &str, text: &'a str) -> Result<&'a str> {
    text.strip_prefix(name)
        .and_then(|rest| rest.strip_prefix(' '))
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| {
            ProtocolError::decode(name, format!("expected \"{} <value>\", got {:?}", name, text))
        })
}

/// Strip an optional "<token> " prefix, getters reply either way
fn without_echo<'a>(token: &str, text: &'a str) -> &'a str {
    match text.strip_prefix(token) {
        Some(rest) if rest.starts_with(' ') => rest.trim(),
        _ => text,
    }
}

fn parse_float(name: &str, value: &str) -> Result<f32> {
    value
        .parse::<f32>()
        .map_err(|_| ProtocolError::decode(name, format!("{:?} is not a number", value)))
}

fn parse_int(name: &str, value: &str) -> Result<i32> {
    value
        .parse::<i32>()
        .map_err(|_| ProtocolError::decode(name, format!("{:?} is not an integer", value)))
}

fn parse_fields(name: &str, body: &str) -> Result<Vec<f32>> {
    body.split_whitespace().map(|v| parse_float(name, v)).collect()
}

fn parse_pid(name: &str, body: &str) -> Result<PidGains> {
    match parse_fields(name, body)?.as_slice() {
        &[p, i, d] => Ok(PidGains::new(p, i, d)),
        other => Err(ProtocolError::decode(
            name,
            format!("expected 3 gains, got {}", other.len()),
        )),
    }
}

// === High speed binary ===

#[derive(Debug, Clone, Copy, Default)]
pub struct HighSpeedBinary;

impl HighSpeedBinary {
    /// Reply length, `None` when the firmware has no binary form
    fn reply_len(command: &Command) -> Option<usize> {
        match command {
            Command::GetPosition | Command::GetVelocity | Command::GetTorque => Some(2),
            Command::GetCurrent(_) => Some(4),
            Command::SetPosition(_)
            | Command::SetVelocity(_)
            | Command::SetTorque(_)
            | Command::Enable
            | Command::Disable
            | Command::Home
            | Command::Stop
            | Command::ResetPosition
            | Command::SetCommandMode(_)
            | Command::SetBroadcast(_) => Some(1),
            _ => None,
        }
    }
}

impl Encoding for HighSpeedBinary {
    fn mode(&self) -> CommandMode {
        CommandMode::HighSpeedBinary
    }

    fn encode_request(&self, command: &Command) -> Result<Vec<u8>> {
        if Self::reply_len(command).is_none() {
            return Err(ProtocolError::not_supported(command.name(), self.mode()));
        }

        let mut packet = Vec::with_capacity(3);
        packet.push(command.id() as u8);
        match command {
            Command::SetPosition(v)
            | Command::SetVelocity(v)
            | Command::SetTorque(v)
            | Command::SetBroadcast(v) => packet.extend_from_slice(&fixed_point::encode_be(*v)),
            Command::SetCommandMode(mode) => {
                packet.extend_from_slice(&(mode.value() as i16).to_be_bytes())
            }
            _ => {}
        }
        Ok(packet)
    }

    fn reply_unit(&self, command: &Command) -> ReplyUnit {
        ReplyUnit::Bytes(Self::reply_len(command).unwrap_or(1))
    }

    fn decode_reply(&self, command: &Command, raw: &[u8]) -> Result<Reply> {
        let name = command.name();
        let expected = Self::reply_len(command)
            .ok_or_else(|| ProtocolError::not_supported(name, self.mode()))?;

        if raw.len() != expected {
            return Err(ProtocolError::decode(
                name,
                format!("expected {} bytes, got {}", expected, raw.len()),
            ));
        }

        match *raw {
            [_] => Ok(Reply::Ack),
            [hi, lo] => Ok(Reply::Float(fixed_point::decode_be([hi, lo]))),
            [a, b, c, d] => Ok(Reply::Float(f32::from_be_bytes([a, b, c, d]))),
            _ => Err(ProtocolError::decode(name, "unexpected reply length")),
        }
    }
}

// === SimpleFOC passthrough ===

/// Mode selector kept for compatibility; only raw lines and mode switches pass
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleFocPassthrough;

impl Encoding for SimpleFocPassthrough {
    fn mode(&self) -> CommandMode {
        CommandMode::SimpleFocPassthrough
    }

    fn encode_request(&self, command: &Command) -> Result<Vec<u8>> {
        match command {
            Command::Raw(_) | Command::SetCommandMode(_) => {
                Ok(format!("{}\n", command).into_bytes())
            }
            _ => Err(ProtocolError::not_supported(command.name(), self.mode())),
        }
    }

    fn reply_unit(&self, _command: &Command) -> ReplyUnit {
        ReplyUnit::Line
    }

    fn decode_reply(&self, command: &Command, raw: &[u8]) -> Result<Reply> {
        let name = command.name();
        match command {
            Command::Raw(_) => Ok(Reply::Text(reply_text(name, raw)?.to_string())),
            Command::SetCommandMode(_) => reply_text(name, raw).map(|_| Reply::Ack),
            _ => Err(ProtocolError::not_supported(name, self.mode())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::command::{Phase, PidLoop};

    fn decode_text(command: Command, line: &str) -> Result<Reply> {
        HumanReadable.decode_reply(&command, line.as_bytes())
    }

    #[test]
    fn test_text_request_format() {
        let bytes = HumanReadable
            .encode_request(&Command::SetVelocity(42.0))
            .unwrap();
        assert_eq!(bytes, b"set_velocity 42.0\n");
        let bytes = HumanReadable.encode_request(&Command::GetPosition).unwrap();
        assert_eq!(bytes, b"get_position\n");
    }

    #[test]
    fn test_set_requires_value_echo() {
        assert_eq!(
            decode_text(Command::SetVelocity(42.0), "set_velocity 42.0\r\n").unwrap(),
            Reply::Float(42.0)
        );
        assert!(matches!(
            decode_text(Command::SetVelocity(42.0), "set_velocity"),
            Err(ProtocolError::Decode { .. })
        ));
        assert!(decode_text(Command::SetVelocity(42.0), "42.0").is_err());
        assert!(decode_text(Command::SetVelocity(42.0), "set_position 42.0").is_err());
        assert!(decode_text(Command::SetVelocity(42.0), "").is_err());
    }

    #[test]
    fn test_get_accepts_bare_or_echoed() {
        assert_eq!(
            decode_text(Command::GetPosition, "get_position 12.5").unwrap(),
            Reply::Float(12.5)
        );
        assert_eq!(
            decode_text(Command::GetPosition, "12.5").unwrap(),
            Reply::Float(12.5)
        );
        assert!(decode_text(Command::GetPosition, "get_position").is_err());
        assert_eq!(
            decode_text(Command::GetPolePairs, "get_pole_pairs 7").unwrap(),
            Reply::Int(7)
        );
        assert_eq!(
            decode_text(Command::GetCurrent(Phase::B), "get_current_b -0.25").unwrap(),
            Reply::Float(-0.25)
        );
    }

    #[test]
    fn test_exact_echo_commands() {
        assert_eq!(decode_text(Command::Enable, "enable").unwrap(), Reply::Ack);
        assert!(decode_text(Command::Enable, "disable").is_err());
        assert!(decode_text(Command::SaveConfig, "error").is_err());
        assert_eq!(decode_text(Command::Home, "homing...").unwrap(), Reply::Ack);
        assert!(decode_text(Command::Stop, "  ").is_err());
    }

    #[test]
    fn test_pid_replies() {
        let gains = PidGains::new(0.5, 10.0, 0.0);
        assert_eq!(
            decode_text(Command::GetPid(PidLoop::Velocity), "get_velocity_pid 0.5 10 0").unwrap(),
            Reply::Pid(gains)
        );
        assert_eq!(
            decode_text(
                Command::SetPid(PidLoop::Angle, gains),
                "set_angle_pid 0.5 10.0 0.0"
            )
            .unwrap(),
            Reply::Pid(gains)
        );
        assert!(decode_text(Command::GetPid(PidLoop::Angle), "get_angle_pid 0.5 10").is_err());
    }

    #[test]
    fn test_full_state_reply() {
        let reply = decode_text(
            Command::GetFullState,
            "full_state 10.0 5.0 1.2 25.0 12.1 30.0 0.1 0.2 0.3\n",
        )
        .unwrap();
        assert_eq!(
            reply,
            Reply::FullState(FullState {
                position: 10.0,
                velocity: 5.0,
                torque: 1.2,
                temperature: 25.0,
                bus_voltage: 12.1,
                internal_temperature: 30.0,
                current_a: 0.1,
                current_b: 0.2,
                current_c: 0.3,
            })
        );

        assert!(matches!(
            decode_text(Command::GetFullState, "full_state 10.0 5.0 1.2 25.0 12.1 30.0 0.1 0.2"),
            Err(ProtocolError::Decode { .. })
        ));
        assert!(decode_text(Command::GetFullState, "full_state 1 2 3 4 5 6 7 8 x").is_err());
    }

    #[test]
    fn test_binary_requests() {
        let enc = HighSpeedBinary;
        assert_eq!(
            enc.encode_request(&Command::SetVelocity(-0.5)).unwrap(),
            vec![0x02, 0xFF, 0x80]
        );
        assert_eq!(enc.encode_request(&Command::GetPosition).unwrap(), vec![0x04]);
        assert_eq!(
            enc.encode_request(&Command::SetCommandMode(CommandMode::HumanReadable))
                .unwrap(),
            vec![0xAB, 0x00, 0x01]
        );
        assert_eq!(
            enc.encode_request(&Command::SetBroadcast(100.0)).unwrap(),
            vec![0xAC, 0x64, 0x00]
        );
    }

    #[test]
    fn test_binary_unsupported_fails_fast() {
        let enc = HighSpeedBinary;
        for command in [
            Command::GetPid(PidLoop::Velocity),
            Command::SetPid(PidLoop::Current, PidGains::default()),
            Command::SaveConfig,
            Command::SetDownsample(2),
            Command::GetTemperature,
            Command::GetFullState,
            Command::RecalibrateSensors,
        ] {
            assert!(matches!(
                enc.encode_request(&command),
                Err(ProtocolError::NotSupportedInMode { .. })
            ));
        }
    }

    #[test]
    fn test_binary_replies() {
        let enc = HighSpeedBinary;
        assert_eq!(enc.reply_unit(&Command::GetTorque), ReplyUnit::Bytes(2));
        assert_eq!(
            enc.decode_reply(&Command::GetTorque, &[0xFF, 0x80]).unwrap(),
            Reply::Float(-0.5)
        );
        assert_eq!(
            enc.decode_reply(&Command::GetCurrent(Phase::A), &1.25f32.to_be_bytes())
                .unwrap(),
            Reply::Float(1.25)
        );
        assert_eq!(enc.decode_reply(&Command::Enable, &[0x00]).unwrap(), Reply::Ack);
        assert!(enc.decode_reply(&Command::Enable, &[]).is_err());
        assert!(enc.decode_reply(&Command::GetPosition, &[0x01]).is_err());
    }

    #[test]
    fn test_passthrough_only_forwards_raw() {
        let enc = SimpleFocPassthrough;
        assert_eq!(enc.encode_request(&Command::Raw("MV".into())).unwrap(), b"MV\n");
        assert!(matches!(
            enc.encode_request(&Command::GetPosition),
            Err(ProtocolError::NotSupportedInMode { .. })
        ));
        assert_eq!(
            enc.decode_reply(&Command::Raw("MV".into()), b"12.3\n").unwrap(),
            Reply::Text("12.3".into())
        );
    }

    #[test]
    fn test_for_mode_selects_strategy() {
        for mode in [
            CommandMode::HumanReadable,
            CommandMode::HighSpeedBinary,
            CommandMode::SimpleFocPassthrough,
        ] {
            assert_eq!(for_mode(mode).mode(), mode);
        }
    }
}
