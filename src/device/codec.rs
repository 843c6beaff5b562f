use std::fmt;

use crate::device::constants::{EFFECTS, FRAME_HEADER, FRAME_LENGTH, FRAME_TRAILER, MAX_LEVEL};
use crate::error::DeviceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    PowerOn,
    PowerOff,
    SetColor { red: u8, green: u8, blue: u8 },
    SetBrightness { level: u8 },
    SetEffect { mode: u8, speed: u8 },
}

impl Command {
    pub fn power(on: bool) -> Command {
        if on { Command::PowerOn } else { Command::PowerOff }
    }

    /// Builds a color command from wider integers, rejecting components outside `0..=255`
    /// instead of truncating them.
    pub fn color(red: u32, green: u32, blue: u32) -> Result<Command, DeviceError> {
        let component = |name: &str, value: u32| {
            u8::try_from(value)
                .map_err(|_| DeviceError::invalid_command(format!("{} component {} is out of range 0..=255", name, value)))
        };

        Ok(Command::SetColor {
            red: component("red", red)?,
            green: component("green", green)?,
            blue: component("blue", blue)?,
        })
    }

    pub fn effect(effect: Effect, speed: u8) -> Command {
        Command::SetEffect { mode: effect.id(), speed }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Effect(u8);

impl Effect {
    pub fn from_id(id: u8) -> Option<Effect> {
        EFFECTS.iter().find(|(_, effect_id)| *effect_id == id).map(|(_, id)| Effect(*id))
    }

    pub fn from_name(name: &str) -> Option<Effect> {
        let name = name.trim();
        EFFECTS
            .iter()
            .find(|(effect_name, _)| effect_name.eq_ignore_ascii_case(name))
            .map(|(_, id)| Effect(*id))
    }

    pub fn all() -> Vec<Effect> {
        EFFECTS.iter().map(|(_, id)| Effect(*id)).collect()
    }

    pub fn id(&self) -> u8 {
        self.0
    }

    pub fn name(&self) -> &'static str {
        EFFECTS
            .iter()
            .find(|(_, id)| *id == self.0)
            .map(|(name, _)| *name)
            .unwrap_or("unknown")
    }
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:02x})", self.name(), self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame([u8; FRAME_LENGTH]);

impl Frame {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl AsRef<[u8]> for Frame {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

fn check_level(name: &str, value: u8) -> Result<u8, DeviceError> {
    if value > MAX_LEVEL {
        return Err(DeviceError::invalid_command(format!("{} {} is out of range 0..={}", name, value, MAX_LEVEL)));
    }
    Ok(value)
}

pub fn encode(command: &Command) -> Result<Frame, DeviceError> {
    let body: [u8; FRAME_LENGTH - 2] = match *command {
        Command::PowerOn => [0x07, 0x04, 0xff, 0x00, 0x01, 0x02, 0x01],
        Command::PowerOff => [0x07, 0x04, 0x00, 0x00, 0x00, 0x02, 0x01],
        Command::SetColor { red, green, blue } => [0x07, 0x05, 0x03, red, green, blue, 0x10],
        Command::SetBrightness { level } => {
            let level = check_level("brightness", level)?;
            [0x04, 0x01, level, 0x01, 0xff, 0x02, 0x01]
        },
        Command::SetEffect { mode, speed } => {
            let effect = Effect::from_id(mode)
                .ok_or_else(|| DeviceError::invalid_command(format!("unknown effect id 0x{:02x}", mode)))?;
            let speed = check_level("effect speed", speed)?;
            [0x07, 0x06, 0x03, effect.id(), 0x03, speed, 0x10]
        },
    };

    let mut frame = [0u8; FRAME_LENGTH];
    frame[0] = FRAME_HEADER;
    frame[1..FRAME_LENGTH - 1].copy_from_slice(&body);
    frame[FRAME_LENGTH - 1] = FRAME_TRAILER;
    Ok(Frame(frame))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn hex(command: Command) -> String {
        encode(&command).unwrap().to_string()
    }

    #[test]
    fn power_frames() {
        assert_eq!(hex(Command::PowerOn), "7e0704ff00010201ef");
        assert_eq!(hex(Command::PowerOff), "7e07040000000201ef");
        assert_eq!(Command::power(true), Command::PowerOn);
    }

    #[test]
    fn color_frame_places_components_in_order() {
        assert_eq!(hex(Command::SetColor { red: 255, green: 0, blue: 0 }), "7e070503ff000010ef");
        assert_eq!(hex(Command::SetColor { red: 0x12, green: 0x34, blue: 0x56 }), "7e07050312345610ef");
    }

    #[test]
    fn wide_color_components_are_rejected() {
        let err = Command::color(256, 0, 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidCommand);
        assert_eq!(Command::color(1, 2, 3).unwrap(), Command::SetColor { red: 1, green: 2, blue: 3 });
    }

    #[test]
    fn brightness_bounds() {
        assert_eq!(hex(Command::SetBrightness { level: 0 }), "7e04010001ff0201ef");
        assert_eq!(hex(Command::SetBrightness { level: 100 }), "7e04016401ff0201ef");

        let err = encode(&Command::SetBrightness { level: 101 }).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidCommand);
    }

    #[test]
    fn effect_frame() {
        let command = Command::effect(Effect::from_name("Red Fade").unwrap(), 50);
        assert_eq!(hex(command), "7e0706038b033210ef");
    }

    #[test]
    fn effect_validation() {
        let unknown = encode(&Command::SetEffect { mode: 0x20, speed: 10 }).unwrap_err();
        assert_eq!(unknown.kind(), ErrorKind::InvalidCommand);

        let too_fast = encode(&Command::SetEffect { mode: 0x87, speed: 101 }).unwrap_err();
        assert_eq!(too_fast.kind(), ErrorKind::InvalidCommand);

        assert!(encode(&Command::SetEffect { mode: 0x9c, speed: 100 }).is_ok());
    }

    #[test]
    fn frames_are_framed_and_deterministic() {
        let commands = [
            Command::PowerOn,
            Command::PowerOff,
            Command::SetColor { red: 9, green: 8, blue: 7 },
            Command::SetBrightness { level: 42 },
            Command::SetEffect { mode: 0x95, speed: 0 },
        ];

        for command in commands {
            let first = encode(&command).unwrap();
            let second = encode(&command).unwrap();
            assert_eq!(first, second);
            assert_eq!(first.as_bytes().len(), FRAME_LENGTH);
            assert_eq!(first.as_bytes()[0], 0x7e);
            assert_eq!(first.as_bytes()[FRAME_LENGTH - 1], 0xef);
        }
    }

    #[test]
    fn effect_catalogue_lookup() {
        assert_eq!(Effect::all().len(), 22);
        assert_eq!(Effect::from_id(0x9c).unwrap().name(), "white strobe flash");
        assert!(Effect::from_id(0x86).is_none());
        assert!(Effect::from_name("disco").is_none());
    }
}
