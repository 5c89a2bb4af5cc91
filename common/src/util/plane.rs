use super::{Dir, Projection};
use serde::{Deserialize, Serialize};
use vek::*;

// Plane defined by its normal and signed distance from the origin
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Plane {
    pub normal: Dir,
    /// Distance from origin in the direction of normal
    pub d: f32,
}

impl Plane {
    pub fn new(dir: Dir) -> Self { Self::from(dir) }

    pub fn through(normal: Dir, point: Vec3<f32>) -> Self {
        Plane {
            normal,
            d: normal.dot(point),
        }
    }

    pub fn distance(&self, to: Vec3<f32>) -> f32 { self.normal.dot(to) - self.d }

    pub fn projection(&self, v: Vec3<f32>) -> Vec3<f32> { v - *self.normal * self.distance(v) }

    /// Closest point of the plane to `v`
    pub fn closest_point(&self, v: Vec3<f32>) -> Vec3<f32> { self.projection(v) }
}

impl From<Dir> for Plane {
    fn from(dir: Dir) -> Self {
        Plane {
            normal: dir,
            d: 0.0,
        }
    }
}

impl Projection<Plane> for Vec3<f32> {
    type Output = Vec3<f32>;

    fn projected(self, plane: &Plane) -> Self::Output { plane.projection(self) }
}
