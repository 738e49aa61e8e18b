//! 几何图元定义
//!
//! 支持的图元（页面像素坐标）：
//! - 点 (Point)
//! - 线段 (Line)
//! - 多段线 (Polyline)
//! - 多边形 (Polygon)
//! - 矩形 (Rectangle)
//! - 圆 (Circle)
//!
//! 退化几何（零长度、零面积）是合法输入，计算结果为零而不是错误。

use crate::math::{distance, Point2, Vector2, EPSILON};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 几何错误
///
/// 表示输入参数不合法或操作不适用于该几何类型，调用方应按“请求被拒绝”处理。
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GeometryError {
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("invalid scale factor {0}: expected a positive, finite pixels-per-foot value")]
    InvalidScale(f64),

    #[error("{operation} is not applicable to {kind} geometry")]
    UnsupportedKind {
        operation: &'static str,
        kind: GeometryKind,
    },

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

/// 几何类型标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeometryKind {
    Point,
    Line,
    Polyline,
    Polygon,
    Rectangle,
    Circle,
}

impl GeometryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GeometryKind::Point => "point",
            GeometryKind::Line => "line",
            GeometryKind::Polyline => "polyline",
            GeometryKind::Polygon => "polygon",
            GeometryKind::Rectangle => "rectangle",
            GeometryKind::Circle => "circle",
        }
    }
}

impl fmt::Display for GeometryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for GeometryKind {
    type Err = GeometryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "point" => Ok(GeometryKind::Point),
            "line" => Ok(GeometryKind::Line),
            "polyline" => Ok(GeometryKind::Polyline),
            "polygon" => Ok(GeometryKind::Polygon),
            "rectangle" => Ok(GeometryKind::Rectangle),
            "circle" => Ok(GeometryKind::Circle),
            other => Err(GeometryError::InvalidGeometry(format!(
                "unknown geometry type '{}'",
                other
            ))),
        }
    }
}

/// 几何类型枚举
///
/// 序列化格式见 [`crate::wire`]，反序列化时即完成校验。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "crate::wire::WireGeometry", try_from = "crate::wire::WireGeometry")]
pub enum Geometry {
    Point(Point),
    Line(Line),
    Polyline(Polyline),
    Polygon(Polygon),
    Rectangle(Rectangle),
    Circle(Circle),
}

impl Geometry {
    pub fn kind(&self) -> GeometryKind {
        match self {
            Geometry::Point(_) => GeometryKind::Point,
            Geometry::Line(_) => GeometryKind::Line,
            Geometry::Polyline(_) => GeometryKind::Polyline,
            Geometry::Polygon(_) => GeometryKind::Polygon,
            Geometry::Rectangle(_) => GeometryKind::Rectangle,
            Geometry::Circle(_) => GeometryKind::Circle,
        }
    }

    /// 获取几何的类型名称
    pub fn type_name(&self) -> &'static str {
        match self {
            Geometry::Point(_) => "Point",
            Geometry::Line(_) => "Line",
            Geometry::Polyline(_) => "Polyline",
            Geometry::Polygon(_) => "Polygon",
            Geometry::Rectangle(_) => "Rectangle",
            Geometry::Circle(_) => "Circle",
        }
    }

    /// 开放顶点链（仅线段和多段线）
    pub fn vertices(&self) -> Option<Vec<Point2>> {
        match self {
            Geometry::Line(l) => Some(vec![l.start, l.end]),
            Geometry::Polyline(pl) => Some(pl.points().to_vec()),
            _ => None,
        }
    }

    /// 由开放顶点链构造几何：两个点为线段，更多点为多段线
    pub fn from_chain(points: Vec<Point2>) -> Result<Self, GeometryError> {
        match points.len() {
            2 => Ok(Geometry::Line(Line::new(points[0], points[1]))),
            _ => Ok(Geometry::Polyline(Polyline::new(points)?)),
        }
    }

    /// 边界校验：坐标必须有限，尺寸不得为负
    pub fn validate(&self) -> Result<(), GeometryError> {
        let finite = |p: &Point2| p.x.is_finite() && p.y.is_finite();

        let ok = match self {
            Geometry::Point(p) => finite(&p.position),
            Geometry::Line(l) => finite(&l.start) && finite(&l.end),
            Geometry::Polyline(pl) => pl.points().iter().all(finite),
            Geometry::Polygon(pg) => pg.points().iter().all(finite),
            Geometry::Rectangle(r) => {
                if r.width < 0.0 || r.height < 0.0 {
                    return Err(GeometryError::InvalidGeometry(
                        "rectangle width and height must not be negative".to_string(),
                    ));
                }
                [r.x, r.y, r.width, r.height].iter().all(|v| v.is_finite())
            }
            Geometry::Circle(c) => {
                if c.radius < 0.0 {
                    return Err(GeometryError::InvalidGeometry(
                        "circle radius must not be negative".to_string(),
                    ));
                }
                finite(&c.center) && c.radius.is_finite()
            }
        };

        if ok {
            Ok(())
        } else {
            Err(GeometryError::InvalidGeometry(format!(
                "{} contains non-finite coordinates",
                self.kind()
            )))
        }
    }
}

/// 点
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub position: Point2,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self {
            position: Point2::new(x, y),
        }
    }

    pub fn from_point2(position: Point2) -> Self {
        Self { position }
    }
}

/// 线段
#[derive(Debug, Clone, PartialEq)]
pub struct Line {
    pub start: Point2,
    pub end: Point2,
}

impl Line {
    pub fn new(start: Point2, end: Point2) -> Self {
        Self { start, end }
    }

    /// 计算线段长度
    pub fn length(&self) -> f64 {
        distance(&self.start, &self.end)
    }

    /// 计算线段方向向量（单位向量），零长度返回 None
    pub fn direction(&self) -> Option<Vector2> {
        let v = self.end - self.start;
        let len = v.norm();
        if len < EPSILON {
            None
        } else {
            Some(v / len)
        }
    }

    /// 计算线段中点
    pub fn midpoint(&self) -> Point2 {
        Point2::new(
            (self.start.x + self.end.x) / 2.0,
            (self.start.y + self.end.y) / 2.0,
        )
    }
}

/// 多段线（至少两个点）
#[derive(Debug, Clone, PartialEq)]
pub struct Polyline {
    points: Vec<Point2>,
}

impl Polyline {
    pub fn new(points: Vec<Point2>) -> Result<Self, GeometryError> {
        if points.len() < 2 {
            return Err(GeometryError::InvalidGeometry(format!(
                "polyline needs at least 2 points, got {}",
                points.len()
            )));
        }
        Ok(Self { points })
    }

    pub fn points(&self) -> &[Point2] {
        &self.points
    }

    pub fn into_points(self) -> Vec<Point2> {
        self.points
    }

    /// 逐点变换，点数不变
    pub fn map_points(&self, f: impl Fn(&Point2) -> Point2) -> Self {
        Self {
            points: self.points.iter().map(f).collect(),
        }
    }

    /// 线段数量
    pub fn segment_count(&self) -> usize {
        self.points.len() - 1
    }

    /// 各段长度
    pub fn segment_lengths(&self) -> Vec<f64> {
        self.points
            .windows(2)
            .map(|w| distance(&w[0], &w[1]))
            .collect()
    }

    /// 计算总长度
    pub fn length(&self) -> f64 {
        self.segment_lengths().iter().sum()
    }
}

/// 多边形（至少三个点，隐式闭合）
#[derive(Debug, Clone, PartialEq)]
pub struct Polygon {
    points: Vec<Point2>,
}

impl Polygon {
    pub fn new(points: Vec<Point2>) -> Result<Self, GeometryError> {
        if points.len() < 3 {
            return Err(GeometryError::InvalidGeometry(format!(
                "polygon needs at least 3 points, got {}",
                points.len()
            )));
        }
        Ok(Self { points })
    }

    pub fn points(&self) -> &[Point2] {
        &self.points
    }

    pub fn into_points(self) -> Vec<Point2> {
        self.points
    }

    pub fn map_points(&self, f: impl Fn(&Point2) -> Point2) -> Self {
        Self {
            points: self.points.iter().map(f).collect(),
        }
    }

    /// 鞋带公式有向面积的两倍：Σ(xᵢ·yᵢ₊₁ − xᵢ₊₁·yᵢ)
    pub fn shoelace_sum(&self) -> f64 {
        let n = self.points.len();
        (0..n)
            .map(|i| {
                let a = &self.points[i];
                let b = &self.points[(i + 1) % n];
                a.x * b.y - b.x * a.y
            })
            .sum()
    }

    /// 面积（绝对值）
    pub fn area(&self) -> f64 {
        self.shoelace_sum().abs() / 2.0
    }

    /// 周长：各边长度加上闭合边
    pub fn perimeter(&self) -> f64 {
        let n = self.points.len();
        (0..n)
            .map(|i| distance(&self.points[i], &self.points[(i + 1) % n]))
            .sum()
    }
}

/// 矩形（左上角 + 宽高）
#[derive(Debug, Clone, PartialEq)]
pub struct Rectangle {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rectangle {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn area(&self) -> f64 {
        self.width * self.height
    }

    pub fn perimeter(&self) -> f64 {
        2.0 * (self.width + self.height)
    }
}

/// 圆
#[derive(Debug, Clone, PartialEq)]
pub struct Circle {
    pub center: Point2,
    pub radius: f64,
}

impl Circle {
    pub fn new(center: Point2, radius: f64) -> Self {
        Self { center, radius }
    }

    /// 计算周长
    pub fn circumference(&self) -> f64 {
        2.0 * std::f64::consts::PI * self.radius
    }

    /// 计算面积
    pub fn area(&self) -> f64 {
        std::f64::consts::PI * self.radius * self.radius
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_length() {
        let line = Line::new(Point2::new(0.0, 0.0), Point2::new(3.0, 4.0));
        assert!((line.length() - 5.0).abs() < EPSILON);
    }

    #[test]
    fn test_zero_length_line_has_no_direction() {
        let p = Point2::new(2.0, 2.0);
        assert!(Line::new(p, p).direction().is_none());
    }

    #[test]
    fn test_polyline_requires_two_points() {
        assert!(Polyline::new(vec![Point2::origin()]).is_err());
        assert!(Polyline::new(vec![Point2::origin(), Point2::new(1.0, 0.0)]).is_ok());
    }

    #[test]
    fn test_polygon_requires_three_points() {
        let err = Polygon::new(vec![Point2::origin(), Point2::new(1.0, 0.0)]).unwrap_err();
        assert!(matches!(err, GeometryError::InvalidGeometry(_)));
    }

    #[test]
    fn test_polygon_area_and_perimeter() {
        let square = Polygon::new(vec![
            Point2::new(0.0, 0.0),
            Point2::new(10.0, 0.0),
            Point2::new(10.0, 10.0),
            Point2::new(0.0, 10.0),
        ])
        .unwrap();

        assert!((square.area() - 100.0).abs() < EPSILON);
        assert!((square.perimeter() - 40.0).abs() < EPSILON);
    }

    #[test]
    fn test_polygon_area_ignores_winding() {
        let cw = Polygon::new(vec![
            Point2::new(0.0, 0.0),
            Point2::new(0.0, 10.0),
            Point2::new(10.0, 10.0),
            Point2::new(10.0, 0.0),
        ])
        .unwrap();
        assert!(cw.shoelace_sum() < 0.0);
        assert!((cw.area() - 100.0).abs() < EPSILON);
    }

    #[test]
    fn test_circle_area() {
        let circle = Circle::new(Point2::origin(), 1.0);
        assert!((circle.area() - std::f64::consts::PI).abs() < EPSILON);
    }

    #[test]
    fn test_from_chain_picks_kind() {
        let line = Geometry::from_chain(vec![Point2::origin(), Point2::new(1.0, 1.0)]).unwrap();
        assert_eq!(line.kind(), GeometryKind::Line);

        let pl = Geometry::from_chain(vec![
            Point2::origin(),
            Point2::new(1.0, 1.0),
            Point2::new(2.0, 0.0),
        ])
        .unwrap();
        assert_eq!(pl.kind(), GeometryKind::Polyline);
    }

    #[test]
    fn test_validate_rejects_negative_radius() {
        let circle = Geometry::Circle(Circle::new(Point2::origin(), -1.0));
        assert!(circle.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_nan() {
        let point = Geometry::Point(Point::new(f64::NAN, 0.0));
        assert!(point.validate().is_err());
    }

    #[test]
    fn test_kind_from_str() {
        assert_eq!("Polygon".parse::<GeometryKind>().unwrap(), GeometryKind::Polygon);
        assert!("spline".parse::<GeometryKind>().is_err());
    }
}
