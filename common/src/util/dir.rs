use super::{Plane, Projection};
use serde::{Deserialize, Serialize};
use tracing::warn;
use vek::*;

/// Cosine of the default angle under which two unit vectors count as
/// parallel (1 degree)
pub const THRESH_PARALLEL_COS: f32 = 0.999_847_7;
/// Cosine of the angle above which two unit vectors count as orthogonal
/// (89 degrees)
pub const THRESH_ORTHOGONAL_COS: f32 = 0.017_452_4;

/// Type representing a direction using Vec3 that is normalized and NaN free
/// These properties are enforced actively via panics when `debug_assertions`
/// is enabled
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(into = "SerdeDir")]
#[serde(from = "SerdeDir")]
pub struct Dir(Vec3<f32>);
impl Default for Dir {
    fn default() -> Self { Self::up() }
}

// Validate at Deserialization
#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
struct SerdeDir(Vec3<f32>);
impl From<SerdeDir> for Dir {
    fn from(dir: SerdeDir) -> Self {
        let dir = dir.0;
        if dir.map(f32::is_nan).reduce_or() {
            warn!(
                ?dir,
                "Deserialized dir containing NaNs, replacing with default"
            );
            Default::default()
        } else if !dir.is_normalized() {
            warn!(
                ?dir,
                "Deserialized unnormalized dir, replacing with default"
            );
            Default::default()
        } else {
            Self(dir)
        }
    }
}

impl From<Dir> for SerdeDir {
    fn from(other: Dir) -> SerdeDir { SerdeDir(*other) }
}

impl Dir {
    pub fn new(dir: Vec3<f32>) -> Self {
        debug_assert!(!dir.map(f32::is_nan).reduce_or());
        debug_assert!(dir.is_normalized());
        Self(dir)
    }

    pub fn from_unnormalized(dirs: Vec3<f32>) -> Option<Self> {
        dirs.try_normalized().map(|dir| {
            #[cfg(debug_assertions)]
            {
                if dir.map(f32::is_nan).reduce_or() {
                    panic!("{} => {}", dirs, dir);
                }
            }
            Self(dir)
        })
    }

    pub fn slerp(from: Self, to: Self, factor: f32) -> Self {
        Self(slerp_normalized(from.0, to.0, factor))
    }

    #[must_use]
    pub fn slerped_to(self, to: Self, factor: f32) -> Self {
        Self(slerp_normalized(self.0, to.0, factor))
    }

    pub fn rotation_between(&self, to: Self) -> Quaternion<f32> {
        Quaternion::<f32>::rotation_from_to_3d(self.0, to.0)
    }

    pub fn is_valid(&self) -> bool { !self.0.map(f32::is_nan).reduce_or() && self.is_normalized() }

    /// Whether `other` points the same way within `thresh_cos` (cosine of
    /// the tolerance angle)
    pub fn coincident(&self, other: Self, thresh_cos: f32) -> bool {
        self.dot(*other) >= thresh_cos
    }

    /// Whether `other` points the opposite way within `thresh_cos`
    pub fn opposite(&self, other: Self, thresh_cos: f32) -> bool {
        self.dot(*other) <= -thresh_cos
    }

    /// Whether `other` is parallel to this direction, either way round
    pub fn parallel(&self, other: Self, thresh_cos: f32) -> bool {
        self.dot(*other).abs() >= thresh_cos
    }

    /// Whether `other` is at right angles to this direction
    pub fn orthogonal(&self, other: Self) -> bool {
        self.dot(*other).abs() <= THRESH_ORTHOGONAL_COS
    }

    pub fn up() -> Self { Dir(Vec3::<f32>::unit_z()) }

    pub fn down() -> Self { Dir(-Vec3::<f32>::unit_z()) }

    pub fn right() -> Self { Dir(Vec3::<f32>::unit_x()) }

    pub fn forward() -> Self { Dir(Vec3::<f32>::unit_y()) }

    pub fn vec(&self) -> &Vec3<f32> { &self.0 }

    pub fn to_vec(self) -> Vec3<f32> { self.0 }

    /// An arbitrary unit vector orthogonal to this one
    pub fn orthonormal(self) -> Self {
        let candidate = if self.0.z.abs() > 0.999 {
            self.0.cross(Vec3::unit_x())
        } else {
            self.0.cross(Vec3::unit_z())
        };
        // Unreachable fallback, candidate can't be degenerate here
        Self::from_unnormalized(candidate).unwrap_or_else(Self::right)
    }
}

impl std::ops::Deref for Dir {
    type Target = Vec3<f32>;

    fn deref(&self) -> &Vec3<f32> { &self.0 }
}

impl From<Dir> for Vec3<f32> {
    fn from(dir: Dir) -> Self { *dir }
}

impl Projection<Plane> for Dir {
    type Output = Option<Self>;

    fn projected(self, plane: &Plane) -> Self::Output {
        Dir::from_unnormalized(plane.projection(*self))
    }
}

impl Projection<Dir> for Vec3<f32> {
    type Output = Vec3<f32>;

    fn projected(self, dir: &Dir) -> Self::Output {
        let dir = **dir;
        self.dot(dir) * dir
    }
}

impl std::ops::Mul<Dir> for Quaternion<f32> {
    type Output = Dir;

    fn mul(self, dir: Dir) -> Self::Output { Dir((self * *dir).normalized()) }
}

impl std::ops::Neg for Dir {
    type Output = Dir;

    fn neg(self) -> Dir { Dir::new(-self.0) }
}

/// Slerp two `Vec3`s skipping the slerp if their directions are very close
/// This avoids a case where `vek`s slerp produces NaN's
/// Additionally, it avoids unnecessary calculations if they are near
/// identical
/// Assumes `from` and `to` are normalized and returns a normalized vector
#[inline(always)]
fn slerp_normalized(from: Vec3<f32>, to: Vec3<f32>, factor: f32) -> Vec3<f32> {
    debug_assert!(!to.map(f32::is_nan).reduce_or());
    debug_assert!(!from.map(f32::is_nan).reduce_or());

    let dot = from.dot(to);
    if dot >= 1.0 - 1E-6 {
        // Close together, just use to
        return to;
    }

    let (from, to, factor) = if dot < -0.999 {
        // Not linearly independent (slerp will fail since it doesn't check for this)
        // Instead we will choose a midpoint and slerp from or to that depending on
        // the factor
        let mid_dir = if from.z.abs() > 0.999 {
            // If vec's lie along the z-axis default to (1, 0, 0) as midpoint
            Vec3::unit_x()
        } else {
            // Default to picking midpoint in the xy plane
            Vec3::new(from.y, -from.x, 0.0).normalized()
        };

        if factor > 0.5 {
            (mid_dir, to, factor * 2.0 - 1.0)
        } else {
            (from, mid_dir, factor * 2.0)
        }
    } else {
        (from, to, factor)
    };

    let slerped = Vec3::slerp(from, to, factor);
    slerped.normalized()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn default_is_up() {
        assert_relative_eq!(Dir::default().dot(Vec3::unit_z()), 1.0);
    }

    #[test]
    fn classification_thresholds() {
        let up = Dir::up();
        let tilted = Dir::new(Quaternion::rotation_x(0.5_f32.to_radians()) * Vec3::unit_z());
        assert!(up.coincident(tilted, THRESH_PARALLEL_COS));
        assert!(up.parallel(-tilted, THRESH_PARALLEL_COS));
        assert!(up.opposite(-tilted, THRESH_PARALLEL_COS));
        assert!(up.orthogonal(Dir::right()));
        assert!(!up.orthogonal(tilted));
    }

    #[test]
    fn orthonormal_is_orthogonal() {
        for dir in [Dir::up(), Dir::down(), Dir::right(), Dir::forward()] {
            let ortho = dir.orthonormal();
            assert!(ortho.is_valid());
            assert_relative_eq!(dir.dot(*ortho), 0.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn antiparallel_slerp_is_finite() {
        let half = Dir::slerp(Dir::up(), Dir::down(), 0.5);
        assert!(half.is_valid());
        assert_relative_eq!(half.dot(Vec3::unit_z()), 0.0, epsilon = 1e-5);
    }
}
