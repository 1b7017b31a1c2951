//! Geometric normalization of photographed answer sheets
//!
//! Finds the sheet boundary, removes perspective distortion and resamples
//! the sheet onto a fixed canonical frame so template regions can be read
//! at fixed coordinates. When no boundary is found the whole photo is
//! resized instead; the output size is the same either way.

use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, Rgb, RgbImage};
use imageproc::contours::{find_contours, BorderType, Contour};
use imageproc::edges::canny;
use imageproc::filter::gaussian_blur_f32;
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};
use imageproc::geometry::{approximate_polygon_dp, arc_length};
use imageproc::point::Point;
use std::fmt;
use tracing::{debug, info};

use crate::config::NormalizerSettings;

/// A 2D point in image coordinates
pub type Corner = (f32, f32);

/// Why boundary detection fell back to a plain resize
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackReason {
    /// Edge map produced no external contour
    NoContours,
    /// Largest contour did not simplify to four vertices
    NotQuadrilateral { vertices: usize },
    /// Corners collapse to a zero-width or zero-height sheet
    DegenerateQuad,
    /// Corners admit no projective transform
    TransformFailed,
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackReason::NoContours => f.write_str("no contours found"),
            FallbackReason::NotQuadrilateral { vertices } => {
                write!(f, "largest contour has {} vertices, expected 4", vertices)
            }
            FallbackReason::DegenerateQuad => f.write_str("sheet corners are degenerate"),
            FallbackReason::TransformFailed => f.write_str("no perspective transform for corners"),
        }
    }
}

/// Outcome of sheet boundary detection
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SheetBoundary {
    /// Corners ordered top-left, top-right, bottom-right, bottom-left
    Detected { corners: [Corner; 4] },
    /// The uncropped photo was resized
    NotFound(FallbackReason),
}

impl SheetBoundary {
    pub fn is_detected(&self) -> bool {
        matches!(self, SheetBoundary::Detected { .. })
    }
}

/// Perspective-corrected sheet at the canonical size
#[derive(Debug, Clone)]
pub struct CanonicalImage {
    /// Always exactly the configured width x height
    pub image: RgbImage,
    /// How the image was produced
    pub boundary: SheetBoundary,
}

/// Detects the sheet and maps it onto the canonical frame
#[derive(Debug, Clone)]
pub struct SheetNormalizer {
    target_width: u32,
    target_height: u32,
    settings: NormalizerSettings,
}

impl SheetNormalizer {
    pub fn new(target_width: u32, target_height: u32, settings: NormalizerSettings) -> Self {
        Self {
            target_width: target_width.max(1),
            target_height: target_height.max(1),
            settings,
        }
    }

    /// Produce the canonical image for a photo. Never fails.
    pub fn normalize(&self, image: &DynamicImage) -> CanonicalImage {
        let rgb = image.to_rgb8();

        let boundary = match self.find_sheet_corners(&image.to_luma8()) {
            Ok(corners) => match warp_sheet(&rgb, corners) {
                Ok(warped) => {
                    info!(
                        "Sheet boundary detected, warped to {}x{}",
                        warped.width(),
                        warped.height()
                    );
                    let image = resize_area(&warped, self.target_width, self.target_height);
                    return CanonicalImage {
                        image,
                        boundary: SheetBoundary::Detected { corners },
                    };
                }
                Err(reason) => reason,
            },
            Err(reason) => reason,
        };

        debug!("No usable sheet boundary ({}), resizing the uncropped photo", boundary);
        CanonicalImage {
            image: resize_area(&rgb, self.target_width, self.target_height),
            boundary: SheetBoundary::NotFound(boundary),
        }
    }

    /// Find the four sheet corners in a grayscale photo
    fn find_sheet_corners(&self, gray: &GrayImage) -> Result<[Corner; 4], FallbackReason> {
        let blurred = gaussian_blur_f32(gray, self.settings.blur_sigma);
        let edges = canny(&blurred, self.settings.canny_low, self.settings.canny_high);

        let contours = find_contours::<i32>(&edges);
        let sheet = contours
            .iter()
            .filter(|c| is_external(c) && c.points.len() >= 3)
            .map(|c| (c, polygon_area(&c.points)))
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(c, _)| c)
            .ok_or(FallbackReason::NoContours)?;

        let perimeter = arc_length(&sheet.points, true);
        if perimeter <= 0.0 {
            return Err(FallbackReason::DegenerateQuad);
        }
        let approx = dedup_closed(approximate_polygon_dp(
            &sheet.points,
            self.settings.epsilon_ratio * perimeter,
            true,
        ));
        debug!(
            "Largest contour: {} points, perimeter {:.1}, simplified to {} vertices",
            sheet.points.len(),
            perimeter,
            approx.len()
        );

        let &[a, b, c, d] = approx.as_slice() else {
            return Err(FallbackReason::NotQuadrilateral {
                vertices: approx.len(),
            });
        };
        Ok(order_points([a, b, c, d].map(|p| (p.x as f32, p.y as f32))))
    }
}

/// Order four corners as top-left, top-right, bottom-right, bottom-left.
///
/// Top-left has the smallest `x + y`, bottom-right the largest; top-right
/// has the smallest `y - x`, bottom-left the largest. Ties are broken on
/// the coordinates themselves so any permutation of the same points gives
/// the same result.
pub fn order_points(points: [Corner; 4]) -> [Corner; 4] {
    let pick = |key: fn(&Corner) -> f32, largest: bool| -> Corner {
        let cmp = |a: &&Corner, b: &&Corner| {
            key(a)
                .total_cmp(&key(b))
                .then(a.0.total_cmp(&b.0))
                .then(a.1.total_cmp(&b.1))
        };
        let found = if largest {
            points.iter().max_by(cmp)
        } else {
            points.iter().min_by(cmp)
        };
        // The array always has four entries
        found.copied().unwrap_or(points[0])
    };

    let sum = |p: &Corner| p.0 + p.1;
    let diff = |p: &Corner| p.1 - p.0;

    [
        pick(sum, false),
        pick(diff, false),
        pick(sum, true),
        pick(diff, true),
    ]
}

/// Size of the rectified sheet: the longer of each pair of opposite edges
pub fn destination_size(corners: &[Corner; 4]) -> (f32, f32) {
    let [tl, tr, br, bl] = *corners;
    let width = distance(tl, tr).max(distance(br, bl));
    let height = distance(tr, br).max(distance(bl, tl));
    (width, height)
}

/// Warp the ordered quadrilateral onto an axis-aligned rectangle
fn warp_sheet(rgb: &RgbImage, corners: [Corner; 4]) -> Result<RgbImage, FallbackReason> {
    let (width, height) = destination_size(&corners);
    let (out_w, out_h) = (width as u32, height as u32);
    if out_w == 0 || out_h == 0 {
        return Err(FallbackReason::DegenerateQuad);
    }

    let dest = [(0.0, 0.0), (width, 0.0), (width, height), (0.0, height)];
    let projection =
        Projection::from_control_points(corners, dest).ok_or(FallbackReason::TransformFailed)?;

    let mut output = RgbImage::new(out_w, out_h);
    warp_into(rgb, &projection, Interpolation::Bilinear, Rgb([255, 255, 255]), &mut output);
    Ok(output)
}

/// Area-averaging resize when shrinking, bilinear when enlarging
pub fn resize_area(image: &RgbImage, width: u32, height: u32) -> RgbImage {
    if image.dimensions() == (width, height) {
        return image.clone();
    }
    if width <= image.width() && height <= image.height() {
        imageops::thumbnail(image, width, height)
    } else {
        imageops::resize(image, width, height, FilterType::Triangle)
    }
}

/// Top-level outer borders only, like an external-contour retrieval
fn is_external(contour: &Contour<i32>) -> bool {
    contour.border_type == BorderType::Outer && contour.parent.is_none()
}

/// Enclosed area of a closed polygon (shoelace formula)
fn polygon_area(points: &[Point<i32>]) -> f64 {
    let n = points.len();
    let twice: f64 = (0..n)
        .map(|i| {
            let p = points[i];
            let q = points[(i + 1) % n];
            p.x as f64 * q.y as f64 - q.x as f64 * p.y as f64
        })
        .sum();
    twice.abs() / 2.0
}

/// Drop repeated vertices, including a closing vertex equal to the first
fn dedup_closed(mut points: Vec<Point<i32>>) -> Vec<Point<i32>> {
    points.dedup();
    while points.len() > 1 && points.first() == points.last() {
        points.pop();
    }
    points
}

fn distance(a: Corner, b: Corner) -> f32 {
    ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;
    use imageproc::drawing::{draw_filled_circle_mut, draw_polygon_mut};

    fn normalizer(width: u32, height: u32) -> SheetNormalizer {
        SheetNormalizer::new(width, height, NormalizerSettings::default())
    }

    /// Dark table with a bright, slightly keystoned sheet on it
    fn photo_with_sheet(corners: [Point<i32>; 4]) -> DynamicImage {
        let mut img = RgbImage::from_pixel(480, 360, Rgb([40, 40, 40]));
        draw_polygon_mut(&mut img, &corners, Rgb([235, 235, 235]));
        DynamicImage::ImageRgb8(img)
    }

    fn near(a: Corner, b: Corner, tol: f32) -> bool {
        (a.0 - b.0).abs() <= tol && (a.1 - b.1).abs() <= tol
    }

    #[test]
    fn test_order_points_basic() {
        let ordered = order_points([(90.0, 10.0), (10.0, 95.0), (5.0, 5.0), (100.0, 100.0)]);
        assert_eq!(
            ordered,
            [(5.0, 5.0), (90.0, 10.0), (100.0, 100.0), (10.0, 95.0)]
        );
    }

    #[test]
    fn test_order_points_permutation_invariant() {
        let pts = [(52.0, 31.0), (410.0, 44.0), (430.0, 322.0), (37.0, 300.0)];
        let expected = order_points(pts);
        assert_eq!(expected, pts);

        let mut idx = [0usize, 1, 2, 3];
        // Heap's algorithm over all 24 orderings
        let mut c = [0usize; 4];
        let mut i = 0;
        assert_eq!(order_points(idx.map(|k| pts[k])), expected);
        while i < 4 {
            if c[i] < i {
                if i % 2 == 0 {
                    idx.swap(0, i);
                } else {
                    idx.swap(c[i], i);
                }
                assert_eq!(order_points(idx.map(|k| pts[k])), expected);
                c[i] += 1;
                i = 0;
            } else {
                c[i] = 0;
                i += 1;
            }
        }
    }

    #[test]
    fn test_order_points_ties_are_stable() {
        // A diamond ties on x + y for two corners
        let a = order_points([(50.0, 0.0), (100.0, 50.0), (50.0, 100.0), (0.0, 50.0)]);
        let b = order_points([(0.0, 50.0), (50.0, 100.0), (100.0, 50.0), (50.0, 0.0)]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_destination_size_takes_longer_edges() {
        let corners = [(0.0, 0.0), (100.0, 0.0), (90.0, 50.0), (10.0, 50.0)];
        let (w, h) = destination_size(&corners);
        assert!((w - 100.0).abs() < 1e-4);
        assert!((h - (10.0f32 * 10.0 + 50.0 * 50.0).sqrt()).abs() < 1e-4);
    }

    #[test]
    fn test_detected_sheet_is_rectified() {
        let corners = [
            Point::new(60, 40),
            Point::new(420, 55),
            Point::new(400, 320),
            Point::new(75, 305),
        ];
        let canonical = normalizer(200, 250).normalize(&photo_with_sheet(corners));

        assert_eq!(canonical.image.dimensions(), (200, 250));
        let SheetBoundary::Detected { corners: found } = canonical.boundary else {
            panic!("expected a detected boundary, got {:?}", canonical.boundary);
        };
        let expected = [(60.0, 40.0), (420.0, 55.0), (400.0, 320.0), (75.0, 305.0)];
        for (f, e) in found.iter().zip(expected) {
            assert!(near(*f, e, 6.0), "corner {:?} too far from {:?}", f, e);
        }

        // Background is cropped away: the interior and near-corner pixels are the sheet
        assert!(canonical.image.get_pixel(100, 125)[0] > 200);
        assert!(canonical.image.get_pixel(15, 15)[0] > 150);
        assert!(canonical.image.get_pixel(185, 235)[0] > 150);
    }

    #[test]
    fn test_blank_photo_falls_back_to_resize() {
        let blank = DynamicImage::ImageRgb8(RgbImage::from_pixel(300, 200, Rgb([128, 128, 128])));
        let canonical = normalizer(80, 100).normalize(&blank);

        assert_eq!(canonical.image.dimensions(), (80, 100));
        assert_eq!(
            canonical.boundary,
            SheetBoundary::NotFound(FallbackReason::NoContours)
        );
    }

    #[test]
    fn test_round_shape_is_not_a_sheet() {
        let mut img = RgbImage::from_pixel(300, 300, Rgb([20, 20, 20]));
        draw_filled_circle_mut(&mut img, (150, 150), 100, Rgb([240, 240, 240]));
        let canonical = normalizer(120, 90).normalize(&DynamicImage::ImageRgb8(img));

        assert_eq!(canonical.image.dimensions(), (120, 90));
        assert!(matches!(
            canonical.boundary,
            SheetBoundary::NotFound(FallbackReason::NotQuadrilateral { .. })
        ));
    }

    #[test]
    fn test_output_size_fixed_for_any_input_size() {
        let n = normalizer(64, 48);
        for (w, h) in [(10, 10), (64, 48), (500, 20), (33, 700)] {
            let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(w, h, Luma([200])));
            assert_eq!(n.normalize(&img).image.dimensions(), (64, 48));
        }
    }

    #[test]
    fn test_polygon_area_and_dedup() {
        let square = [
            Point::new(0, 0),
            Point::new(10, 0),
            Point::new(10, 10),
            Point::new(0, 10),
        ];
        assert!((polygon_area(&square) - 100.0).abs() < 1e-9);

        let closed = vec![square[0], square[1], square[1], square[2], square[3], square[0]];
        assert_eq!(dedup_closed(closed), square.to_vec());
    }

    #[test]
    fn test_resize_area_shrinks_by_averaging() {
        let img = RgbImage::from_fn(4, 4, |x, _| {
            if x % 2 == 0 {
                Rgb([0, 0, 0])
            } else {
                Rgb([200, 200, 200])
            }
        });
        let small = resize_area(&img, 2, 2);
        assert_eq!(small.dimensions(), (2, 2));
        let v = small.get_pixel(0, 0)[0];
        assert!((80..=120).contains(&v), "expected an averaged value, got {}", v);
    }
}
