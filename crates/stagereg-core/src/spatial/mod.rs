//! Spatial types for representing points, vectors, spacing, direction matrices
//! and axis-aligned bounding boxes.
//!
//! All types are thin wrappers over nalgebra and use `f64` physical coordinates.

pub mod point;
pub mod vector;
pub mod spacing;
pub mod direction;
pub mod bounds;

pub use point::Point;
pub use vector::Vector;
pub use spacing::Spacing;
pub use direction::Direction;
pub use bounds::BoundingBox;

// Common type aliases for 2D and 3D
pub type Point2 = Point<2>;
pub type Point3 = Point<3>;
pub type Vector2 = Vector<2>;
pub type Vector3 = Vector<3>;
pub type Spacing2 = Spacing<2>;
pub type Spacing3 = Spacing<3>;
pub type Direction2 = Direction<2>;
pub type Direction3 = Direction<3>;
