use imageproc::point::Point;
use imageproc::rect::Rect;

/// Signed area of a closed polygon (shoelace formula). Positive when the
/// vertices run clockwise on screen, i.e. with y pointing down.
pub fn signed_polygon_area(points: &[Point<f32>]) -> f32 {
    if points.len() < 3 {
        return 0.0;
    }
    let mut twice_area = 0.0;
    for (i, p) in points.iter().enumerate() {
        let q = points[(i + 1) % points.len()];
        twice_area += p.x * q.y - q.x * p.y;
    }
    twice_area / 2.0
}

pub fn polygon_area(points: &[Point<f32>]) -> f32 {
    signed_polygon_area(points).abs()
}

/// Area-weighted centroid of a closed polygon. Falls back to the mean of the
/// vertices for degenerate (zero-area) polygons.
pub fn polygon_centroid(points: &[Point<f32>]) -> Option<Point<f32>> {
    if points.is_empty() {
        return None;
    }

    let area = signed_polygon_area(points);
    if area.abs() < f32::EPSILON {
        let n = points.len() as f32;
        let (sx, sy) = points
            .iter()
            .fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
        return Some(Point::new(sx / n, sy / n));
    }

    let mut cx = 0.0;
    let mut cy = 0.0;
    for (i, p) in points.iter().enumerate() {
        let q = points[(i + 1) % points.len()];
        let cross = p.x * q.y - q.x * p.y;
        cx += (p.x + q.x) * cross;
        cy += (p.y + q.y) * cross;
    }
    Some(Point::new(cx / (6.0 * area), cy / (6.0 * area)))
}

/// Smallest rect containing every point.
pub fn bounding_rect(points: &[Point<i32>]) -> Option<Rect> {
    let first = points.first()?;
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
    for p in points {
        min_x = min_x.min(p.x);
        min_y = min_y.min(p.y);
        max_x = max_x.max(p.x);
        max_y = max_y.max(p.y);
    }
    Some(Rect::at(min_x, min_y).of_size((max_x - min_x + 1) as u32, (max_y - min_y + 1) as u32))
}

pub fn to_f32_points(points: &[Point<i32>]) -> Vec<Point<f32>> {
    points
        .iter()
        .map(|p| Point::new(p.x as f32, p.y as f32))
        .collect()
}

/// Width over height.
pub fn aspect_ratio(rect: &Rect) -> f32 {
    rect.width() as f32 / rect.height() as f32
}

/// Shrinks a rect by `fraction` of its size on each side. Returns the rect
/// unchanged if shrinking would leave nothing.
pub fn inset_rect(rect: &Rect, fraction: f32) -> Rect {
    let margin_w = (rect.width() as f32 * fraction) as u32;
    let margin_h = (rect.height() as f32 * fraction) as u32;
    if rect.width() <= margin_w * 2 || rect.height() <= margin_h * 2 {
        return *rect;
    }
    Rect::at(rect.left() + margin_w as i32, rect.top() + margin_h as i32)
        .of_size(rect.width() - margin_w * 2, rect.height() - margin_h * 2)
}
