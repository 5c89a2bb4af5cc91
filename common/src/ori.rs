use crate::util::{Dir, Plane, Projection};
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;
use tracing::warn;
use vek::{Quaternion, Vec3};

/// Orientation of an agent as a validated unit quaternion
///
/// With no rotation applied the up axis is +z, forward is +y and right is
/// +x.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(into = "SerdeOri")]
#[serde(from = "SerdeOri")]
pub struct Ori(Quaternion<f32>);

impl Default for Ori {
    /// Returns the default orientation (no rotation)
    fn default() -> Self { Self(Quaternion::identity()) }
}

impl Ori {
    pub fn new(quat: Quaternion<f32>) -> Self {
        #[cfg(debug_assertions)]
        {
            let v4 = quat.into_vec4();
            debug_assert!(v4.map(f32::is_finite).reduce_and());
            debug_assert!(v4.is_normalized());
        }
        Self(quat)
    }

    pub fn to_quat(self) -> Quaternion<f32> {
        debug_assert!(self.is_normalized());
        self.0
    }

    pub fn up(&self) -> Dir { self.to_quat() * Dir::up() }

    pub fn down(&self) -> Dir { -self.up() }

    pub fn forward(&self) -> Dir { self.to_quat() * Dir::forward() }

    pub fn right(&self) -> Dir { self.to_quat() * Dir::right() }

    pub fn slerp(ori1: Self, ori2: Self, s: f32) -> Self {
        Self(Quaternion::slerp(ori1.0, ori2.0, s).normalized())
    }

    pub fn slerped_towards(self, ori: Ori, s: f32) -> Self { Self::slerp(self, ori, s) }

    /// Multiply rotation quaternion by `q`
    /// (the rotations are in local vector space)
    pub fn rotated(self, q: Quaternion<f32>) -> Self {
        Self((self.to_quat() * q.normalized()).normalized())
    }

    /// Premultiply rotation quaternion by `q`
    /// (the rotations are in global vector space)
    pub fn prerotated(self, q: Quaternion<f32>) -> Self {
        Self((q.normalized() * self.to_quat()).normalized())
    }

    /// Take `global` into this Ori's local vector space
    pub fn global_to_local<T>(&self, global: T) -> <Quaternion<f32> as std::ops::Mul<T>>::Output
    where
        Quaternion<f32>: std::ops::Mul<T>,
    {
        self.to_quat().inverse() * global
    }

    /// Take `local` into the global vector space
    pub fn local_to_global<T>(&self, local: T) -> <Quaternion<f32> as std::ops::Mul<T>>::Output
    where
        Quaternion<f32>: std::ops::Mul<T>,
    {
        self.to_quat() * local
    }

    /// The shortest-arc rotation that would take this orientation's up axis
    /// onto `up`
    pub fn rotation_to_up(&self, up: Dir) -> Quaternion<f32> { self.up().rotation_between(up) }

    /// Reorients so the up axis becomes `up` while disturbing the forward
    /// axis as little as possible
    ///
    /// When the new up is almost exactly opposite the current one the
    /// shortest arc is ambiguous; the orientation is instead flipped half a
    /// turn around its right axis, which keeps right intact and reverses
    /// forward.
    ///
    /// ```
    /// use gravwalk_common::{ori::Ori, util::Dir};
    /// use vek::Vec3;
    ///
    /// let tipped = Ori::default().with_up(Dir::new(Vec3::unit_y()));
    /// approx::assert_relative_eq!(tipped.up().dot(Vec3::unit_y()), 1.0, epsilon = 1e-6);
    /// ```
    #[must_use]
    pub fn with_up(self, up: Dir) -> Self {
        let current = self.up();
        let dot = current.dot(*up);
        if dot >= 1.0 - 1e-6 {
            self
        } else if dot <= -0.999 {
            let flipped = self.prerotated(Quaternion::rotation_3d(PI, *self.right()));
            let residual = flipped.up().rotation_between(up);
            flipped.prerotated(residual)
        } else {
            self.prerotated(current.rotation_between(up))
        }
    }

    fn is_normalized(&self) -> bool { self.0.into_vec4().is_normalized() }
}

impl From<Dir> for Ori {
    fn from(up: Dir) -> Self { Self::default().with_up(up) }
}

impl From<Quaternion<f32>> for Ori {
    fn from(quat: Quaternion<f32>) -> Self { Self::new(quat) }
}

impl From<Ori> for Quaternion<f32> {
    fn from(Ori(q): Ori) -> Self { q }
}

// Validate at Deserialization
#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
struct SerdeOri(Quaternion<f32>);

impl From<SerdeOri> for Ori {
    fn from(ori: SerdeOri) -> Self {
        let quat = ori.0;
        if quat.into_vec4().map(f32::is_nan).reduce_or() {
            warn!(
                ?quat,
                "Deserialized rotation quaternion containing NaNs, replacing with default"
            );
            Default::default()
        } else if !Self(quat).is_normalized() {
            warn!(
                ?quat,
                "Deserialized unnormalized rotation quaternion, replacing with default"
            );
            Default::default()
        } else {
            Self(quat)
        }
    }
}

impl From<Ori> for SerdeOri {
    fn from(ori: Ori) -> Self { Self(ori.to_quat()) }
}

/// Where the capsule rotates around when its up axis changes
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RotatePivot {
    /// Pivot on the center of the bottom hemisphere, keeping the feet in
    /// place
    #[default]
    BottomSphere,
    /// Pivot on the capsule center
    Center,
}

/// Velocity carried through an up-axis change by rotating it with the same
/// shortest arc
pub fn rotate_velocity(vel: Vec3<f32>, old_up: Dir, new_up: Dir) -> Vec3<f32> {
    old_up.rotation_between(new_up) * vel
}

/// Keeps a direction orthogonal to `up`, renormalizing its projection onto
/// the plane; `None` when the direction is parallel to `up`
pub fn level_dir(dir: Dir, up: Dir) -> Option<Dir> { dir.projected(&Plane::from(up)) }

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn assert_unit(ori: Ori) {
        assert_relative_eq!(ori.to_quat().into_vec4().magnitude(), 1.0, epsilon = 1e-5);
    }

    #[test]
    fn with_up_reaches_target() {
        let targets = [
            Dir::up(),
            Dir::down(),
            Dir::right(),
            Dir::new(Vec3::new(0.6, 0.0, 0.8)),
            Dir::new(Vec3::new(-0.48, 0.6, -0.64)),
        ];
        for up in targets {
            let ori = Ori::default().with_up(up);
            assert_unit(ori);
            assert_relative_eq!(ori.up().dot(*up), 1.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn with_up_preserves_forward_for_small_tilts() {
        let ori = Ori::default();
        let up = Dir::new(Quaternion::rotation_x(0.2) * Vec3::unit_z());
        let tipped = ori.with_up(up);
        // Forward may pitch but must not yaw
        assert_relative_eq!(tipped.forward().dot(*Dir::right()), 0.0, epsilon = 1e-5);
        assert!(tipped.forward().dot(*Dir::forward()) > 0.9);
    }

    #[test]
    fn with_up_opposite_keeps_right() {
        let ori = Ori::default();
        let flipped = ori.with_up(Dir::down());
        assert_unit(flipped);
        assert_relative_eq!(flipped.up().dot(*Dir::down()), 1.0, epsilon = 1e-5);
        assert_relative_eq!(flipped.right().dot(*ori.right()), 1.0, epsilon = 1e-5);
    }

    #[test]
    fn velocity_rotation_preserves_magnitude() {
        let vel = Vec3::new(3.0, -4.0, 12.0);
        let rotated = rotate_velocity(vel, Dir::up(), Dir::new(Vec3::unit_x()));
        assert_relative_eq!(rotated.magnitude(), vel.magnitude(), epsilon = 1e-4);
    }

    #[test]
    fn level_dir_rejects_parallel() {
        assert!(level_dir(Dir::up(), Dir::up()).is_none());
        let levelled = level_dir(Dir::new(Vec3::new(0.0, 0.6, 0.8)), Dir::up()).unwrap();
        assert_relative_eq!(levelled.dot(Vec3::unit_y()), 1.0, epsilon = 1e-6);
    }
}
