use imageproc::geometric_transformations::Projection;
use imageproc::point::Point;

use crate::{geometry::polygon_area, types::Size};

/// Quads smaller than this (in square pixels) do not define a usable
/// projective map.
const MIN_QUAD_AREA: f32 = 1.0;

/// A projective map between four source points and four destination points,
/// together with its inverse.
#[derive(Debug, Clone, Copy)]
pub struct Homography {
    forward: Projection,
    inverse: Projection,
}

impl Homography {
    /// Computes the map sending `src[i]` to `dst[i]`. Returns `None` when
    /// either quad is degenerate.
    pub fn from_correspondences(src: &[Point<f32>; 4], dst: &[Point<f32>; 4]) -> Option<Self> {
        if polygon_area(src) < MIN_QUAD_AREA || polygon_area(dst) < MIN_QUAD_AREA {
            return None;
        }
        let forward = Projection::from_control_points(to_tuples(src), to_tuples(dst))?;
        Some(Self {
            forward,
            inverse: forward.invert(),
        })
    }

    /// Computes the map sending TL/TR/BR/BL points to the corners of a
    /// canonical rectangle of the given size.
    pub fn to_canonical(ordered: &[Point<f32>; 4], size: Size<u32>) -> Option<Self> {
        Self::from_correspondences(ordered, &canonical_corners(size))
    }

    pub fn map(&self, p: Point<f32>) -> Point<f32> {
        let (x, y) = self.forward * (p.x, p.y);
        Point::new(x, y)
    }

    pub fn map_inverse(&self, p: Point<f32>) -> Point<f32> {
        let (x, y) = self.inverse * (p.x, p.y);
        Point::new(x, y)
    }

    /// The source-to-destination transform, as used for warping.
    pub fn projection(&self) -> &Projection {
        &self.forward
    }
}

/// Corner pixel centres of a `size` rectangle in TL, TR, BR, BL order.
pub fn canonical_corners(size: Size<u32>) -> [Point<f32>; 4] {
    let right = size.width.saturating_sub(1) as f32;
    let bottom = size.height.saturating_sub(1) as f32;
    [
        Point::new(0.0, 0.0),
        Point::new(right, 0.0),
        Point::new(right, bottom),
        Point::new(0.0, bottom),
    ]
}

fn to_tuples(points: &[Point<f32>; 4]) -> [(f32, f32); 4] {
    [
        (points[0].x, points[0].y),
        (points[1].x, points[1].y),
        (points[2].x, points[2].y),
        (points[3].x, points[3].y),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIZE: Size<u32> = Size {
        width: 1000,
        height: 1414,
    };

    fn skewed_quad() -> [Point<f32>; 4] {
        [
            Point::new(112.0, 87.5),
            Point::new(1650.0, 140.0),
            Point::new(1580.0, 2210.0),
            Point::new(60.0, 2120.0),
        ]
    }

    #[test]
    fn maps_source_corners_onto_canonical_corners() {
        let h = Homography::to_canonical(&skewed_quad(), SIZE).unwrap();
        for (src, dst) in skewed_quad().iter().zip(canonical_corners(SIZE).iter()) {
            let mapped = h.map(*src);
            assert!((mapped.x - dst.x).abs() < 0.5, "{:?} -> {:?}", src, mapped);
            assert!((mapped.y - dst.y).abs() < 0.5, "{:?} -> {:?}", src, mapped);
        }
    }

    #[test]
    fn inverse_reproduces_marker_centroids() {
        let h = Homography::to_canonical(&skewed_quad(), SIZE).unwrap();
        for (src, corner) in skewed_quad().iter().zip(canonical_corners(SIZE).iter()) {
            let back = h.map_inverse(*corner);
            assert!((back.x - src.x).abs() < 0.5, "{:?} -> {:?}", corner, back);
            assert!((back.y - src.y).abs() < 0.5, "{:?} -> {:?}", corner, back);
        }
    }

    #[test]
    fn rejects_collapsed_quad() {
        let p = Point::new(10.0, 10.0);
        assert!(Homography::to_canonical(&[p, p, p, p], SIZE).is_none());
    }

    #[test]
    fn canonical_corners_are_pixel_centres() {
        let corners = canonical_corners(SIZE);
        assert_eq!((corners[2].x, corners[2].y), (999.0, 1413.0));
    }
}
