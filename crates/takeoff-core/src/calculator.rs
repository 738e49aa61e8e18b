//! 工程量计算器
//!
//! 纯函数：几何 + 比例 (+ 深度) → 计算结果。
//!
//! 单位换算：
//! - 英尺 = 像素 / 每英尺像素数
//! - 平方英尺 = 像素面积 / 每英尺像素数²
//! - 立方码 = 平方英尺 · (深度英寸 / 12) / 27

use crate::geometry::{Geometry, GeometryError, GeometryKind};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 页面比例：每真实英尺对应的像素数
///
/// 由外部比例识别模块提供，保证为正的有限数。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct ScaleFactor(f64);

impl ScaleFactor {
    pub fn new(pixels_per_foot: f64) -> Result<Self, GeometryError> {
        if pixels_per_foot.is_finite() && pixels_per_foot > 0.0 {
            Ok(Self(pixels_per_foot))
        } else {
            Err(GeometryError::InvalidScale(pixels_per_foot))
        }
    }

    pub fn pixels_per_foot(&self) -> f64 {
        self.0
    }

    /// 像素长度 → 英尺
    pub fn to_feet(&self, pixels: f64) -> f64 {
        pixels / self.0
    }

    /// 像素面积 → 平方英尺
    pub fn to_square_feet(&self, pixel_area: f64) -> f64 {
        pixel_area / (self.0 * self.0)
    }
}

impl TryFrom<f64> for ScaleFactor {
    type Error = GeometryError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ScaleFactor> for f64 {
    fn from(scale: ScaleFactor) -> Self {
        scale.0
    }
}

/// 多段线的单段长度
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentLength {
    pub index: usize,
    pub pixel_length: f64,
    pub length_feet: f64,
}

/// 计算结果
///
/// 不适用于当前几何类型（或未给深度）的字段为 `None`，
/// 以区分“未计算”与“计算结果为零”。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalculationResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pixel_length: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pixel_area: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pixel_perimeter: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length_feet: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub area_sf: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub perimeter_lf: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_cy: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth_inches: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segments: Option<Vec<SegmentLength>>,
}

/// 计量类型，决定取计算结果的哪个字段作为工程量
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasurementType {
    Linear,
    Area,
    Volume,
    Count,
}

impl MeasurementType {
    /// 工程量单位
    pub fn unit(&self) -> &'static str {
        match self {
            MeasurementType::Linear => "LF",
            MeasurementType::Area => "SF",
            MeasurementType::Volume => "CY",
            MeasurementType::Count => "EA",
        }
    }

    /// 从计算结果提取工程量
    ///
    /// 线性类型在没有 `length_feet` 时回退到 `perimeter_lf`，
    /// 因此闭合图形也能计入线性条件。
    /// 计数类型：批量识别结果使用其隐含数量，否则每个点测量计 1，
    /// 其他几何没有计数。
    pub fn extract_quantity(
        &self,
        kind: GeometryKind,
        result: &CalculationResult,
        detected_count: Option<u32>,
    ) -> Option<f64> {
        match self {
            MeasurementType::Linear => result.length_feet.or(result.perimeter_lf),
            MeasurementType::Area => result.area_sf,
            MeasurementType::Volume => result.volume_cy,
            MeasurementType::Count => match (detected_count, kind) {
                (Some(count), _) => Some(f64::from(count)),
                (None, GeometryKind::Point) => Some(1.0),
                (None, _) => None,
            },
        }
    }
}

impl fmt::Display for MeasurementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MeasurementType::Linear => "linear",
            MeasurementType::Area => "area",
            MeasurementType::Volume => "volume",
            MeasurementType::Count => "count",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for MeasurementType {
    type Err = GeometryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "linear" => Ok(MeasurementType::Linear),
            "area" => Ok(MeasurementType::Area),
            "volume" => Ok(MeasurementType::Volume),
            "count" => Ok(MeasurementType::Count),
            other => Err(GeometryError::InvalidParameter(format!(
                "unknown measurement type '{}'",
                other
            ))),
        }
    }
}

/// 几何计算器
///
/// 无状态，进程内构造一个实例后按引用共享即可。
#[derive(Debug, Clone, Copy, Default)]
pub struct GeometryCalculator;

impl GeometryCalculator {
    pub fn new() -> Self {
        Self
    }

    /// 计算单个几何的工程量
    pub fn calculate(
        &self,
        geometry: &Geometry,
        scale: ScaleFactor,
        depth: Option<f64>,
    ) -> CalculationResult {
        let mut result = CalculationResult::default();

        match geometry {
            Geometry::Point(_) => {}
            Geometry::Line(line) => {
                let px = line.length();
                result.pixel_length = Some(px);
                result.length_feet = Some(scale.to_feet(px));
            }
            Geometry::Polyline(polyline) => {
                let segments: Vec<SegmentLength> = polyline
                    .segment_lengths()
                    .into_iter()
                    .enumerate()
                    .map(|(index, px)| SegmentLength {
                        index,
                        pixel_length: px,
                        length_feet: scale.to_feet(px),
                    })
                    .collect();
                let px: f64 = segments.iter().map(|s| s.pixel_length).sum();

                result.pixel_length = Some(px);
                result.length_feet = Some(scale.to_feet(px));
                result.segments = Some(segments);
            }
            Geometry::Polygon(polygon) => {
                Self::fill_closed(&mut result, polygon.area(), polygon.perimeter(), scale, depth);
            }
            Geometry::Rectangle(rect) => {
                Self::fill_closed(&mut result, rect.area(), rect.perimeter(), scale, depth);
            }
            Geometry::Circle(circle) => {
                Self::fill_closed(
                    &mut result,
                    circle.area(),
                    circle.circumference(),
                    scale,
                    depth,
                );
            }
        }

        tracing::trace!(
            kind = %geometry.kind(),
            pixels_per_foot = scale.pixels_per_foot(),
            ?depth,
            "calculated quantities"
        );

        result
    }

    /// 批量计算（用于批量导入的识别结果），输出顺序与输入一致
    pub fn calculate_batch(
        &self,
        geometries: &[Geometry],
        scale: ScaleFactor,
        depth: Option<f64>,
    ) -> Vec<CalculationResult> {
        geometries
            .par_iter()
            .map(|g| self.calculate(g, scale, depth))
            .collect()
    }

    /// 闭合图形：面积、周长，以及有深度时的体积
    fn fill_closed(
        result: &mut CalculationResult,
        pixel_area: f64,
        pixel_perimeter: f64,
        scale: ScaleFactor,
        depth: Option<f64>,
    ) {
        let area_sf = scale.to_square_feet(pixel_area);

        result.pixel_area = Some(pixel_area);
        result.pixel_perimeter = Some(pixel_perimeter);
        result.area_sf = Some(area_sf);
        result.perimeter_lf = Some(scale.to_feet(pixel_perimeter));

        if let Some(depth_inches) = depth.filter(|d| *d != 0.0) {
            result.volume_cy = Some(area_sf * (depth_inches / 12.0) / 27.0);
            result.depth_inches = Some(depth_inches);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Circle, Line, Point, Polygon, Polyline, Rectangle};
    use crate::math::Point2;

    fn scale(px: f64) -> ScaleFactor {
        ScaleFactor::new(px).unwrap()
    }

    #[test]
    fn test_scale_factor_rejects_non_positive() {
        assert!(ScaleFactor::new(0.0).is_err());
        assert!(ScaleFactor::new(-3.0).is_err());
        assert!(ScaleFactor::new(f64::INFINITY).is_err());
        assert!(ScaleFactor::new(48.0).is_ok());
    }

    #[test]
    fn test_line_length_feet() {
        let line = Geometry::Line(Line::new(Point2::new(0.0, 0.0), Point2::new(100.0, 0.0)));
        let r = GeometryCalculator::new().calculate(&line, scale(10.0), None);

        assert_eq!(r.pixel_length, Some(100.0));
        assert_eq!(r.length_feet, Some(10.0));
        assert!(r.area_sf.is_none());
        assert!(r.perimeter_lf.is_none());
    }

    #[test]
    fn test_polyline_segments() {
        let pl = Geometry::Polyline(
            Polyline::new(vec![
                Point2::new(0.0, 0.0),
                Point2::new(30.0, 0.0),
                Point2::new(30.0, 40.0),
            ])
            .unwrap(),
        );
        let r = GeometryCalculator::new().calculate(&pl, scale(10.0), None);

        assert_eq!(r.pixel_length, Some(70.0));
        assert_eq!(r.length_feet, Some(7.0));
        let segments = r.segments.unwrap();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[1].index, 1);
        assert_eq!(segments[1].length_feet, 4.0);
    }

    #[test]
    fn test_rectangle_area_and_volume() {
        let rect = Geometry::Rectangle(Rectangle::new(0.0, 0.0, 100.0, 100.0));
        let calc = GeometryCalculator::new();

        let r = calc.calculate(&rect, scale(10.0), None);
        assert_eq!(r.area_sf, Some(100.0));
        assert_eq!(r.perimeter_lf, Some(40.0));
        assert!(r.volume_cy.is_none());
        assert!(r.depth_inches.is_none());

        let r = calc.calculate(&rect, scale(10.0), Some(4.0));
        let expected = 100.0 * (4.0 / 12.0) / 27.0;
        assert!((r.volume_cy.unwrap() - expected).abs() < 1e-12);
        assert_eq!(r.depth_inches, Some(4.0));
    }

    #[test]
    fn test_zero_depth_skips_volume() {
        let rect = Geometry::Rectangle(Rectangle::new(0.0, 0.0, 10.0, 10.0));
        let r = GeometryCalculator::new().calculate(&rect, scale(1.0), Some(0.0));
        assert!(r.volume_cy.is_none());
    }

    #[test]
    fn test_triangle_area() {
        let tri = Geometry::Polygon(
            Polygon::new(vec![
                Point2::new(0.0, 0.0),
                Point2::new(100.0, 0.0),
                Point2::new(50.0, 100.0),
            ])
            .unwrap(),
        );
        let r = GeometryCalculator::new().calculate(&tri, scale(10.0), None);
        assert!((r.area_sf.unwrap() - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_circle_area() {
        let c = Geometry::Circle(Circle::new(Point2::new(200.0, 200.0), 50.0));
        let r = GeometryCalculator::new().calculate(&c, scale(10.0), None);
        assert!((r.area_sf.unwrap() - 78.5398).abs() < 1e-3);
        assert!((r.perimeter_lf.unwrap() - 31.4159).abs() < 1e-3);
    }

    #[test]
    fn test_point_has_no_fields() {
        let p = Geometry::Point(Point::new(1.0, 2.0));
        let r = GeometryCalculator::new().calculate(&p, scale(10.0), Some(4.0));
        assert_eq!(r, CalculationResult::default());
    }

    #[test]
    fn test_degenerate_geometry_is_zero_not_error() {
        let p = Point2::new(5.0, 5.0);
        let line = Geometry::Line(Line::new(p, p));
        let r = GeometryCalculator::new().calculate(&line, scale(10.0), None);
        assert_eq!(r.length_feet, Some(0.0));
    }

    #[test]
    fn test_extract_quantity_policy() {
        let calc = GeometryCalculator::new();
        let square = Geometry::Rectangle(Rectangle::new(0.0, 0.0, 100.0, 100.0));
        let r = calc.calculate(&square, scale(10.0), Some(4.0));

        let rect = GeometryKind::Rectangle;

        // 线性条件回退到周长
        assert_eq!(MeasurementType::Linear.extract_quantity(rect, &r, None), Some(40.0));
        assert_eq!(MeasurementType::Area.extract_quantity(rect, &r, None), Some(100.0));
        assert!(MeasurementType::Volume.extract_quantity(rect, &r, None).is_some());
        assert_eq!(MeasurementType::Count.extract_quantity(rect, &r, Some(6)), Some(6.0));

        let line = Geometry::Line(Line::new(Point2::origin(), Point2::new(50.0, 0.0)));
        let r = calc.calculate(&line, scale(10.0), None);
        assert_eq!(
            MeasurementType::Area.extract_quantity(GeometryKind::Line, &r, None),
            None
        );
    }

    #[test]
    fn test_count_only_points_without_detected_count() {
        let calc = GeometryCalculator::new();
        let point = Geometry::Point(crate::geometry::Point::new(5.0, 5.0));
        let r = calc.calculate(&point, scale(10.0), None);
        assert_eq!(
            MeasurementType::Count.extract_quantity(GeometryKind::Point, &r, None),
            Some(1.0)
        );

        let square = Geometry::Rectangle(Rectangle::new(0.0, 0.0, 10.0, 10.0));
        let r = calc.calculate(&square, scale(10.0), None);
        assert_eq!(
            MeasurementType::Count.extract_quantity(GeometryKind::Rectangle, &r, None),
            None
        );
    }

    #[test]
    fn test_absent_fields_not_serialized() {
        let line = Geometry::Line(Line::new(Point2::origin(), Point2::new(50.0, 0.0)));
        let r = GeometryCalculator::new().calculate(&line, scale(10.0), None);
        let value = serde_json::to_value(&r).unwrap();

        assert!(value.get("length_feet").is_some());
        assert!(value.get("area_sf").is_none());
        assert!(value.get("volume_cy").is_none());
    }

    #[test]
    fn test_batch_preserves_order() {
        let geometries: Vec<Geometry> = (1..=20)
            .map(|i| {
                Geometry::Line(Line::new(Point2::origin(), Point2::new(i as f64 * 10.0, 0.0)))
            })
            .collect();
        let results = GeometryCalculator::new().calculate_batch(&geometries, scale(10.0), None);

        assert_eq!(results.len(), 20);
        for (i, r) in results.iter().enumerate() {
            assert_eq!(r.length_feet, Some((i + 1) as f64));
        }
    }
}
