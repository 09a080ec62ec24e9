//! Axis-aligned bounding boxes in physical space.

use burn::tensor::backend::Backend;
use serde::{Deserialize, Serialize};
use super::{Point, Vector};
use crate::image::Image;

/// Axis-aligned box `[min, max]` in physical coordinates (bounds inclusive).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox<const D: usize> {
    pub min: Point<D>,
    pub max: Point<D>,
}

impl<const D: usize> BoundingBox<D> {
    /// Create a box from two opposite corners, in any order.
    pub fn new(a: Point<D>, b: Point<D>) -> Self {
        let mut min = a;
        let mut max = b;
        for i in 0..D {
            if min[i] > max[i] {
                std::mem::swap(&mut min[i], &mut max[i]);
            }
        }
        Self { min, max }
    }

    /// Box spanned by an image's voxel centres.
    pub fn from_image<B: Backend>(image: &Image<B, D>) -> Self {
        image.physical_bounds()
    }

    /// Smallest box containing every point, `None` for an empty iterator.
    pub fn enclosing<I: IntoIterator<Item = Point<D>>>(points: I) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let mut bounds = Self { min: first, max: first };
        for p in iter {
            for i in 0..D {
                bounds.min[i] = bounds.min[i].min(p[i]);
                bounds.max[i] = bounds.max[i].max(p[i]);
            }
        }
        Some(bounds)
    }

    /// True when `point` lies inside or on the boundary.
    pub fn contains(&self, point: &Point<D>) -> bool {
        (0..D).all(|i| point[i] >= self.min[i] && point[i] <= self.max[i])
    }

    /// Intersection with another box, `None` when they do not overlap.
    pub fn intersection(&self, other: &Self) -> Option<Self> {
        let mut min = Point::origin();
        let mut max = Point::origin();
        for i in 0..D {
            min[i] = self.min[i].max(other.min[i]);
            max[i] = self.max[i].min(other.max[i]);
            if min[i] > max[i] {
                return None;
            }
        }
        Some(Self { min, max })
    }

    /// Edge lengths.
    pub fn extent(&self) -> Vector<D> {
        self.max - self.min
    }

    /// Geometric center.
    pub fn center(&self) -> Point<D> {
        self.min + self.extent() / 2.0
    }

    /// Corners of the box (`2^D` points).
    pub fn corners(&self) -> Vec<Point<D>> {
        (0..(1usize << D))
            .map(|mask| {
                let mut p = self.min;
                for i in 0..D {
                    if mask & (1 << i) != 0 {
                        p[i] = self.max[i];
                    }
                }
                p
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_orders_corners() {
        let b = BoundingBox::new(Point::new([4.0, 0.0]), Point::new([1.0, 3.0]));
        assert_eq!(b.min, Point::new([1.0, 0.0]));
        assert_eq!(b.max, Point::new([4.0, 3.0]));
        assert_eq!(b.center(), Point::new([2.5, 1.5]));
    }

    #[test]
    fn test_intersection() {
        let a = BoundingBox::new(Point::new([0.0, 0.0, 0.0]), Point::new([10.0, 10.0, 10.0]));
        let b = BoundingBox::new(Point::new([5.0, -5.0, 2.0]), Point::new([15.0, 5.0, 8.0]));
        let i = a.intersection(&b).unwrap();
        assert_eq!(i.min, Point::new([5.0, 0.0, 2.0]));
        assert_eq!(i.max, Point::new([10.0, 5.0, 8.0]));

        let far = BoundingBox::new(Point::new([20.0, 20.0, 20.0]), Point::new([30.0, 30.0, 30.0]));
        assert!(a.intersection(&far).is_none());
    }

    #[test]
    fn test_enclosing_and_contains() {
        let b = BoundingBox::enclosing(vec![
            Point::new([1.0, 5.0]),
            Point::new([-2.0, 3.0]),
            Point::new([0.0, 7.0]),
        ])
        .unwrap();
        assert!(b.contains(&Point::new([0.0, 4.0])));
        assert!(!b.contains(&Point::new([2.0, 4.0])));
        assert_eq!(b.corners().len(), 4);
        assert!(BoundingBox::<2>::enclosing(Vec::new()).is_none());
    }
}
