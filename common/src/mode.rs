use serde::{Deserialize, Serialize};

/// Locomotion mode of an agent
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MoveMode {
    /// No movement at all; velocity and pending forces are zeroed
    None,
    #[default]
    Walking,
    Falling,
    Swimming,
    Flying,
    /// Host-defined mode the simulation leaves alone
    Custom(u8),
}

impl MoveMode {
    /// Packed form used on the wire
    pub fn to_byte(self) -> u8 {
        match self {
            MoveMode::None => 0,
            MoveMode::Walking => 1,
            MoveMode::Falling => 2,
            MoveMode::Swimming => 3,
            MoveMode::Flying => 4,
            MoveMode::Custom(n) => 0x10 | (n & 0x0F),
        }
    }

    /// Inverse of [`to_byte`](Self::to_byte); unknown values decode to
    /// `None` rather than failing
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0 => MoveMode::None,
            1 => MoveMode::Walking,
            2 => MoveMode::Falling,
            3 => MoveMode::Swimming,
            4 => MoveMode::Flying,
            b if b & 0x10 != 0 => MoveMode::Custom(b & 0x0F),
            _ => MoveMode::None,
        }
    }

    pub fn is_grounded(&self) -> bool { matches!(self, MoveMode::Walking) }

    pub fn is_airborne(&self) -> bool { matches!(self, MoveMode::Falling) }

    pub fn in_fluid(&self) -> bool { matches!(self, MoveMode::Swimming) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_round_trip() {
        for mode in [
            MoveMode::None,
            MoveMode::Walking,
            MoveMode::Falling,
            MoveMode::Swimming,
            MoveMode::Flying,
            MoveMode::Custom(7),
        ] {
            assert_eq!(MoveMode::from_byte(mode.to_byte()), mode);
        }
    }

    #[test]
    fn unknown_bytes_decode_to_none() {
        assert_eq!(MoveMode::from_byte(9), MoveMode::None);
    }
}
