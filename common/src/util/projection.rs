/// Projection onto linear types and shapes
///
/// Implemented by the geometric primitives in this module; `Output` is
/// an `Option` where the projection can degenerate.
pub trait Projection<T> {
    type Output;

    fn projected(self, onto: &T) -> Self::Output;
}
