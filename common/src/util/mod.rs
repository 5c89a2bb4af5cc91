mod dir;
mod plane;
mod projection;

pub use dir::{Dir, THRESH_ORTHOGONAL_COS, THRESH_PARALLEL_COS};
pub use plane::Plane;
pub use projection::Projection;
