use common::{state::BaseRef, GravityConfig, Ori};
use serde::{Deserialize, Serialize};
use vek::*;

const PACKED_COMPONENT_SCALE: f32 = std::f32::consts::SQRT_2 * i16::MAX as f32;

/// Unit quaternion packed smallest-three into three signed 16 bit lanes
///
/// The largest component is dropped and rebuilt from the unit constraint
/// on decode; the other three fit in `[-1/sqrt(2), 1/sqrt(2)]` and are
/// scaled to use the full lane range.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactOri {
    largest: u8,
    packed: [i16; 3],
}

impl From<Ori> for CompactOri {
    fn from(ori: Ori) -> Self {
        let q = ori.to_quat().into_vec4();
        let mut largest = 0;
        for i in 1..4 {
            if q[i].abs() > q[largest].abs() {
                largest = i;
            }
        }
        // Negating the whole quaternion keeps the rotation identical, so
        // the dropped component can always be stored as positive
        let sign = if q[largest] < 0.0 { -1.0 } else { 1.0 };
        let mut packed = [0i16; 3];
        let mut slot = 0;
        for i in 0..4 {
            if i != largest {
                packed[slot] = (q[i] * sign * PACKED_COMPONENT_SCALE)
                    .round()
                    .clamp(i16::MIN as f32, i16::MAX as f32) as i16;
                slot += 1;
            }
        }
        Self {
            largest: largest as u8,
            packed,
        }
    }
}

impl From<CompactOri> for Ori {
    fn from(compact: CompactOri) -> Self {
        let largest = (compact.largest as usize).min(3);
        let mut q = Vec4::zero();
        let mut slot = 0;
        let mut sum_sq = 0.0;
        for i in 0..4 {
            if i != largest {
                let v = compact.packed[slot] as f32 / PACKED_COMPONENT_SCALE;
                q[i] = v;
                sum_sq += v * v;
                slot += 1;
            }
        }
        q[largest] = (1.0 - sum_sq).max(0.0).sqrt();
        Ori::new(Quaternion::from_vec4(q).normalized())
    }
}

/// Authoritative animation state attached to a correction when the
/// rejected move was driven by root motion
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RootMotionCorrection {
    /// Montage playback position in seconds
    pub track_position: f32,
    pub rotation: CompactOri,
}

/// The server accepted the client's claimed state for this move
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveAck {
    /// Id of the newest move covered by this ack
    pub id: u64,
}

/// Authoritative state replacing a rejected client move
///
/// The client rewinds to this state and replays every move after `id`.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServerCorrection {
    /// Id of the move this correction supersedes
    pub id: u64,
    /// Capsule center; relative to the base transform when `relative`
    pub pos: Vec3<f32>,
    pub vel: Vec3<f32>,
    /// Movement mode packed through `MoveMode::to_byte`
    pub mode: u8,
    pub base: Option<BaseRef>,
    /// Whether `pos` is expressed in the base's local frame
    pub relative: bool,
    /// Orientation sync; `None` leaves the client's orientation alone
    pub ori: Option<Ori>,
    pub gravity: Option<GravityConfig>,
    /// Present when the corrected move was animation driven
    pub root_motion: Option<RootMotionCorrection>,
}

/// Replicated gravity field change, outside the correction stream
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GravityUpdate {
    pub config: GravityConfig,
}

/// Movement traffic from server to client
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ServerMsg {
    Ack(MoveAck),
    Correction(ServerCorrection),
    Gravity(GravityUpdate),
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::util::Dir;
    use approx::assert_relative_eq;

    #[test]
    fn compact_rotation_survives_packing() {
        let oris = [
            Ori::default(),
            Ori::default().with_up(Dir::new(Vec3::unit_x())),
            Ori::default().with_up(Dir::new(Vec3::new(0.6, 0.0, 0.8))),
            Ori::default().with_up(Dir::new(Vec3::new(-0.48, 0.6, -0.64))),
            Ori::default()
                .with_up(Dir::new(Vec3::unit_y()))
                .rotated(Quaternion::rotation_z(1.3)),
        ];
        for ori in oris {
            let unpacked: Ori = CompactOri::from(ori).into();
            // q and -q are the same rotation
            let agreement = ori
                .to_quat()
                .into_vec4()
                .dot(unpacked.to_quat().into_vec4())
                .abs();
            assert_relative_eq!(agreement, 1.0, epsilon = 1e-4);
        }
    }

    #[test]
    fn compact_rotation_identity_is_exact_enough() {
        let unpacked: Ori = CompactOri::from(Ori::default()).into();
        assert_relative_eq!(unpacked.up().dot(*Dir::up()), 1.0, epsilon = 1e-6);
    }
}
