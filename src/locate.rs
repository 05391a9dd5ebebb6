use image::GrayImage;
use imageproc::{
    contours::{find_contours, BorderType},
    geometric_transformations::{warp_into, Interpolation},
    geometry::{approximate_polygon_dp, arc_length},
    point::Point,
    rect::Rect,
};
use log::{debug, trace};
use logging_timer::time;

use crate::{
    config::LocatorConfig,
    geometry::{aspect_ratio, bounding_rect, polygon_area, polygon_centroid, to_f32_points},
    homography::Homography,
    image_utils::{pad, BACKGROUND},
    types::{BinaryMask, CanonicalSheet, Size, Zone},
};

/// A solid square printed at a sheet corner, as found in a mask.
#[derive(Debug, Clone, PartialEq)]
pub struct FiducialMarker {
    /// Approximated outline, in mask coordinates.
    pub polygon: Vec<Point<i32>>,
    pub centroid: Point<f32>,
    pub bounds: Rect,
    pub area: f32,
    pub zone: Zone,
}

/// A sheet rectified into the canonical frame, plus how it got there.
#[derive(Debug, Clone)]
pub struct LocatedSheet {
    pub sheet: CanonicalSheet,
    /// The chosen marker for each zone, in TL, TR, BR, BL order.
    pub markers: [FiducialMarker; 4],
    /// Marker centroids in TL, TR, BR, BL order as mapped to the canonical
    /// corners.
    pub corners: [Point<f32>; 4],
    pub homography: Homography,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum LocateError {
    #[error("corner marker not found in zone(s): {}", format_zones(.missing))]
    MarkerNotFound { missing: Vec<Zone> },
    #[error("corner markers do not form a usable quadrilateral: {corners:?}")]
    DegenerateQuad { corners: [Point<f32>; 4] },
}

fn format_zones(zones: &[Zone]) -> String {
    zones
        .iter()
        .map(|z| z.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Finds marker candidates and warps the mask into the canonical frame.
#[time]
pub fn locate_sheet(
    mask: &BinaryMask,
    config: &LocatorConfig,
    size: Size<u32>,
) -> Result<LocatedSheet, LocateError> {
    let candidates = find_marker_candidates(mask, config);
    locate_from_candidates(mask, candidates, size)
}

/// Picks one marker per corner from `candidates` and warps the mask.
pub fn locate_from_candidates(
    mask: &BinaryMask,
    candidates: Vec<FiducialMarker>,
    size: Size<u32>,
) -> Result<LocatedSheet, LocateError> {
    let markers = select_corner_markers(candidates)?;
    let corners = order_corners([
        markers[0].centroid,
        markers[1].centroid,
        markers[2].centroid,
        markers[3].centroid,
    ]);
    debug!("ordered marker centroids: {:?}", corners);

    let homography =
        Homography::to_canonical(&corners, size).ok_or(LocateError::DegenerateQuad { corners })?;
    let sheet = warp_to_canonical(mask, &homography, size);

    Ok(LocatedSheet {
        sheet,
        markers,
        corners,
        homography,
    })
}

/// Finds every contour in the mask that could be a corner marker: big
/// enough, not too big, roughly square, and close to a corner of the image.
#[time]
pub fn find_marker_candidates(mask: &BinaryMask, config: &LocatorConfig) -> Vec<FiducialMarker> {
    let (width, height) = mask.dimensions();
    if width == 0 || height == 0 {
        return vec![];
    }

    // Padding keeps shapes touching the image edge from being clipped.
    let padded = pad(mask.as_image(), config.padding, BACKGROUND);
    let offset = config.padding as i32;
    let contours = find_contours::<i32>(&padded);

    let max_area = width as f32 * height as f32 * config.max_area_fraction;
    let mid_x = width as f32 / 2.0;
    let mid_y = height as f32 / 2.0;

    let candidates = contours
        .iter()
        .filter(|contour| contour.border_type == BorderType::Outer && contour.parent.is_none())
        .filter_map(|contour| {
            let points = contour
                .points
                .iter()
                .map(|p| Point::new(p.x - offset, p.y - offset))
                .collect::<Vec<Point<i32>>>();

            let area = polygon_area(&to_f32_points(&points));
            if area < config.min_marker_area || area > max_area {
                return None;
            }

            let bounds = bounding_rect(&points)?;
            let polygon = approximate_outline(&points, config.approx_epsilon)?;
            if polygon.len() < config.min_vertices || polygon.len() > config.max_vertices {
                trace!(
                    "rejecting contour at {:?}: {} vertices",
                    bounds,
                    polygon.len()
                );
                return None;
            }

            let aspect = aspect_ratio(&bounds);
            if aspect < config.min_aspect || aspect > config.max_aspect {
                trace!("rejecting contour at {:?}: aspect {:.2}", bounds, aspect);
                return None;
            }

            if !is_near_corner(&bounds, width, height, config.corner_proximity) {
                trace!("rejecting contour at {:?}: not near a corner", bounds);
                return None;
            }

            let centroid = polygon_centroid(&to_f32_points(&points))?;
            Some(FiducialMarker {
                polygon,
                centroid,
                bounds,
                area,
                zone: Zone::for_point(centroid.x, centroid.y, mid_x, mid_y),
            })
        })
        .collect::<Vec<FiducialMarker>>();

    debug!(
        "{} of {} contours could be corner markers",
        candidates.len(),
        contours.len()
    );
    candidates
}

fn approximate_outline(points: &[Point<i32>], epsilon_fraction: f64) -> Option<Vec<Point<i32>>> {
    let perimeter = arc_length(points, true);
    if !(perimeter > 0.0) {
        return None;
    }
    Some(approximate_polygon_dp(points, epsilon_fraction * perimeter, true))
}

/// Whether `bounds` lies within `proximity` (a fraction of each dimension) of
/// two adjoining edges of a `width`×`height` image.
pub fn is_near_corner(bounds: &Rect, width: u32, height: u32, proximity: f32) -> bool {
    let margin_x = width as f32 * proximity;
    let margin_y = height as f32 * proximity;
    let near_left = bounds.left() as f32 <= margin_x;
    let near_right = bounds.right() as f32 >= width as f32 - 1.0 - margin_x;
    let near_top = bounds.top() as f32 <= margin_y;
    let near_bottom = bounds.bottom() as f32 >= height as f32 - 1.0 - margin_y;
    (near_left || near_right) && (near_top || near_bottom)
}

/// Keeps the largest candidate in each zone. Fails naming every zone with
/// no candidate at all.
pub fn select_corner_markers(
    candidates: Vec<FiducialMarker>,
) -> Result<[FiducialMarker; 4], LocateError> {
    let mut best: [Option<FiducialMarker>; 4] = Default::default();
    for candidate in candidates {
        let slot = &mut best[candidate.zone.index()];
        if slot.as_ref().map_or(true, |b| candidate.area > b.area) {
            *slot = Some(candidate);
        }
    }

    match best {
        [Some(tl), Some(tr), Some(br), Some(bl)] => Ok([tl, tr, br, bl]),
        best => {
            let missing = Zone::ALL
                .iter()
                .filter(|zone| best[zone.index()].is_none())
                .copied()
                .collect::<Vec<Zone>>();
            debug!("missing corner markers: {}", format_zones(&missing));
            Err(LocateError::MarkerNotFound { missing })
        }
    }
}

/// Orders four points as TL, TR, BR, BL of the frame they appear in.
///
/// The smallest `x + y` is top-left and the largest is bottom-right; of the
/// two left over, the smaller `y - x` is top-right. This holds for any
/// rotation within ±45° of upright, and for mirrored captures.
pub fn order_corners(points: [Point<f32>; 4]) -> [Point<f32>; 4] {
    let sum = |p: &Point<f32>| p.x + p.y;
    let diff = |p: &Point<f32>| p.y - p.x;

    let mut by_sum = points;
    by_sum.sort_by(|a, b| sum(a).total_cmp(&sum(b)));

    let (top_right, bottom_left) = if diff(&by_sum[1]) <= diff(&by_sum[2]) {
        (by_sum[1], by_sum[2])
    } else {
        (by_sum[2], by_sum[1])
    };

    [by_sum[0], top_right, by_sum[3], bottom_left]
}

/// Warps the mask through `homography` into a `size` canonical sheet. Areas
/// outside the source become background.
pub fn warp_to_canonical(
    mask: &BinaryMask,
    homography: &Homography,
    size: Size<u32>,
) -> CanonicalSheet {
    let mut out = GrayImage::new(size.width, size.height);
    warp_into(
        mask.as_image(),
        homography.projection(),
        Interpolation::Nearest,
        BACKGROUND,
        &mut out,
    );
    CanonicalSheet::from_warped(BinaryMask::from_image(out))
}
