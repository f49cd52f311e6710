use crate::cv::Frame;
use opencv::core::{bitwise_or, in_range, Point, Point2f, Scalar, Size, BORDER_CONSTANT, CV_8UC1, CV_8UC3};
use opencv::imgproc::{
    contour_area, cvt_color, find_contours, get_structuring_element, min_enclosing_circle, moments,
    morphology_default_border_value, morphology_ex, CHAIN_APPROX_SIMPLE, COLOR_BGR2HSV, MORPH_CLOSE,
    MORPH_OPEN, MORPH_RECT, RETR_EXTERNAL,
};
use opencv::prelude::{Mat, MatTraitConst};
use opencv::types::{VectorOfPoint, VectorOfVectorOfPoint};
use std::fmt::{Display, Formatter};
use tracing::trace;

pub const MIN_BLOB_AREA: f64 = 100.0;
pub const KERNEL_SIZE: i32 = 5;

const NEG_POINT: Point = Point::new(-1, -1);

/// Inclusive (H, S, V) bounds on OpenCV's 0..=180 hue scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HsvBand {
    pub lower: (u8, u8, u8),
    pub upper: (u8, u8, u8),
}

impl HsvBand {
    pub const fn new(lower: (u8, u8, u8), upper: (u8, u8, u8)) -> Self {
        Self { lower, upper }
    }

    fn select(&self, hsv: &Mat) -> crate::Result<Mat> {
        let lower = bound(self.lower)?;
        let upper = bound(self.upper)?;

        let mut mask = Mat::default();
        in_range(hsv, &lower, &upper, &mut mask)?;
        Ok(mask)
    }
}

fn bound((h, s, v): (u8, u8, u8)) -> crate::Result<Mat> {
    let px = Scalar::new(h as f64, s as f64, v as f64, 0.);
    Ok(Mat::new_rows_cols_with_default(1, 1, CV_8UC3, px)?)
}

/// How a blob's contour is reduced to a single aiming point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    /// Centre of the minimum enclosing circle; stable when a ring marker is
    /// partly covered.
    EnclosingCircle,
    /// Area centroid.
    Centroid,
}

#[derive(Debug, Clone, Copy)]
pub struct ColorClass {
    pub name: &'static str,
    /// Union of hue sub-bands, so a class can straddle the 180 wrap.
    pub bands: &'static [HsvBand],
    pub anchor: Anchor,
}

pub const RED: ColorClass = ColorClass {
    name: "red",
    bands: &[
        HsvBand::new((0, 100, 100), (10, 255, 255)),
        HsvBand::new((170, 100, 100), (180, 255, 255)),
    ],
    anchor: Anchor::EnclosingCircle,
};

pub const YELLOW: ColorClass = ColorClass {
    name: "yellow",
    bands: &[HsvBand::new((20, 100, 100), (30, 255, 255))],
    anchor: Anchor::Centroid,
};

/// Largest matching region of one color class in one frame.
#[derive(Debug, Clone)]
pub struct Blob {
    /// `None` when the region has area but no usable moments.
    pub position: Option<Point>,
    pub outline: Vec<Point>,
    pub area: f64,
}

impl Blob {
    pub fn from_contour(contour: &VectorOfPoint, area: f64, anchor: Anchor) -> crate::Result<Self> {
        let m = moments(contour, false)?;

        // Checked for both anchors on purpose: a contour without interior
        // gives no point worth aiming at, even if a circle could enclose it.
        let position = if m.m00 == 0.0 {
            None
        } else {
            match anchor {
                Anchor::Centroid => Some(Point::new(
                    (m.m10 / m.m00) as i32,
                    (m.m01 / m.m00) as i32,
                )),
                Anchor::EnclosingCircle => {
                    let mut center = Point2f::default();
                    let mut radius = 0f32;
                    min_enclosing_circle(contour, &mut center, &mut radius)?;
                    Some(Point::new(center.x as i32, center.y as i32))
                }
            }
        };

        Ok(Self {
            position,
            outline: contour.to_vec(),
            area,
        })
    }
}

impl Display for Blob {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.position {
            Some(p) => write!(f, "{}, {} :: {}", p.x, p.y, self.area),
            None => write!(f, "-, - :: {}", self.area),
        }
    }
}

pub struct Vision {
    kernel: i32,
    min_area: f64,
}

impl Default for Vision {
    fn default() -> Self {
        Self {
            kernel: KERNEL_SIZE,
            min_area: MIN_BLOB_AREA,
        }
    }
}

impl Vision {
    /// Returns the cleaned binary mask of `class` in `frame`.
    pub fn filter_color(&self, frame: &Frame, class: &ColorClass) -> crate::Result<Mat> {
        let src = frame.mat();
        let mut hsv_frame = Mat::default();
        cvt_color(src, &mut hsv_frame, COLOR_BGR2HSV, 0)?;

        let mut mask =
            Mat::new_rows_cols_with_default(src.rows(), src.cols(), CV_8UC1, Scalar::all(0.))?;
        for band in class.bands {
            let part = band.select(&hsv_frame)?;
            let mut joined = Mat::default();
            bitwise_or(&mask, &part, &mut joined, &Mat::default())?;
            mask = joined;
        }

        let kernel = get_structuring_element(MORPH_RECT, Size::new(self.kernel, self.kernel), NEG_POINT)?;

        let mut morph_open = Mat::default();
        morphology_ex(
            &mask,
            &mut morph_open,
            MORPH_OPEN,
            &kernel,
            NEG_POINT,
            1,
            BORDER_CONSTANT,
            morphology_default_border_value()?,
        )?;

        let mut morph_close = Mat::default();
        morphology_ex(
            &morph_open,
            &mut morph_close,
            MORPH_CLOSE,
            &kernel,
            NEG_POINT,
            1,
            BORDER_CONSTANT,
            morphology_default_border_value()?,
        )?;

        Ok(morph_close)
    }

    pub fn get_contours(&self, gray_mat: &Mat) -> crate::Result<VectorOfVectorOfPoint> {
        let mut contours = VectorOfVectorOfPoint::new();
        find_contours(
            gray_mat,
            &mut contours,
            RETR_EXTERNAL,
            CHAIN_APPROX_SIMPLE,
            Point::default(),
        )?;

        Ok(contours)
    }

    pub fn locate(&self, frame: &Frame, class: &ColorClass) -> crate::Result<Option<Blob>> {
        let mask = self.filter_color(frame, class)?;

        // First of equally large contours wins.
        let mut largest: Option<(VectorOfPoint, f64)> = None;
        for c in &self.get_contours(&mask)? {
            let area = contour_area(&c, false)?;
            if largest.as_ref().map_or(true, |(_, best)| area > *best) {
                largest = Some((c, area));
            }
        }

        let Some((contour, area)) = largest else {
            return Ok(None);
        };
        if area < self.min_area {
            trace!(class = class.name, area, "blob below minimum area");
            return Ok(None);
        }

        let blob = Blob::from_contour(&contour, area, class.anchor)?;
        trace!(class = class.name, blob = %blob, "located");
        Ok(Some(blob))
    }
}
