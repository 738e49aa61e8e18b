//! 几何线格式
//!
//! 与存储层/API 层交换的 JSON 形状：
//! - 点: `{"x":f,"y":f}`
//! - 线段: `{"start":{x,y},"end":{x,y}}`
//! - 多段线/多边形: `{"points":[{x,y},...]}`
//! - 矩形: `{"x","y","width","height"}`
//! - 圆: `{"center":{x,y},"radius":f}`
//!
//! 带类型标签的编码在上述形状上增加 `"type"` 字段；
//! 类型单独存放时使用 [`Geometry::from_shape`] / [`Geometry::to_shape`]。

use crate::geometry::{
    Circle, Geometry, GeometryError, GeometryKind, Line, Point, Polygon, Polyline, Rectangle,
};
use crate::math::Point2;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WirePoint {
    pub x: f64,
    pub y: f64,
}

impl From<Point2> for WirePoint {
    fn from(p: Point2) -> Self {
        Self { x: p.x, y: p.y }
    }
}

impl From<WirePoint> for Point2 {
    fn from(p: WirePoint) -> Self {
        Point2::new(p.x, p.y)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineShape {
    pub start: WirePoint,
    pub end: WirePoint,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointsShape {
    pub points: Vec<WirePoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RectangleShape {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircleShape {
    pub center: WirePoint,
    pub radius: f64,
}

/// 带类型标签的线格式
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireGeometry {
    Point(WirePoint),
    Line(LineShape),
    Polyline(PointsShape),
    Polygon(PointsShape),
    Rectangle(RectangleShape),
    Circle(CircleShape),
}

fn to_points(points: Vec<WirePoint>) -> Vec<Point2> {
    points.into_iter().map(Point2::from).collect()
}

fn to_wire_points(points: &[Point2]) -> Vec<WirePoint> {
    points.iter().copied().map(WirePoint::from).collect()
}

impl TryFrom<WireGeometry> for Geometry {
    type Error = GeometryError;

    fn try_from(wire: WireGeometry) -> Result<Self, Self::Error> {
        let geometry = match wire {
            WireGeometry::Point(p) => Geometry::Point(Point::new(p.x, p.y)),
            WireGeometry::Line(l) => Geometry::Line(Line::new(l.start.into(), l.end.into())),
            WireGeometry::Polyline(s) => Geometry::Polyline(Polyline::new(to_points(s.points))?),
            WireGeometry::Polygon(s) => Geometry::Polygon(Polygon::new(to_points(s.points))?),
            WireGeometry::Rectangle(r) => {
                Geometry::Rectangle(Rectangle::new(r.x, r.y, r.width, r.height))
            }
            WireGeometry::Circle(c) => Geometry::Circle(Circle::new(c.center.into(), c.radius)),
        };
        geometry.validate()?;
        Ok(geometry)
    }
}

impl From<Geometry> for WireGeometry {
    fn from(geometry: Geometry) -> Self {
        match geometry {
            Geometry::Point(p) => WireGeometry::Point(p.position.into()),
            Geometry::Line(l) => WireGeometry::Line(LineShape {
                start: l.start.into(),
                end: l.end.into(),
            }),
            Geometry::Polyline(pl) => WireGeometry::Polyline(PointsShape {
                points: to_wire_points(pl.points()),
            }),
            Geometry::Polygon(pg) => WireGeometry::Polygon(PointsShape {
                points: to_wire_points(pg.points()),
            }),
            Geometry::Rectangle(r) => WireGeometry::Rectangle(RectangleShape {
                x: r.x,
                y: r.y,
                width: r.width,
                height: r.height,
            }),
            Geometry::Circle(c) => WireGeometry::Circle(CircleShape {
                center: c.center.into(),
                radius: c.radius,
            }),
        }
    }
}

fn shape_error(kind: GeometryKind, e: serde_json::Error) -> GeometryError {
    GeometryError::InvalidGeometry(format!("malformed {} shape: {}", kind, e))
}

impl Geometry {
    /// 从不带标签的形状解析（类型由调用方给出）
    pub fn from_shape(kind: GeometryKind, shape: &Value) -> Result<Self, GeometryError> {
        let wire = match kind {
            GeometryKind::Point => WireGeometry::Point(
                serde_json::from_value(shape.clone()).map_err(|e| shape_error(kind, e))?,
            ),
            GeometryKind::Line => WireGeometry::Line(
                serde_json::from_value(shape.clone()).map_err(|e| shape_error(kind, e))?,
            ),
            GeometryKind::Polyline => WireGeometry::Polyline(
                serde_json::from_value(shape.clone()).map_err(|e| shape_error(kind, e))?,
            ),
            GeometryKind::Polygon => WireGeometry::Polygon(
                serde_json::from_value(shape.clone()).map_err(|e| shape_error(kind, e))?,
            ),
            GeometryKind::Rectangle => WireGeometry::Rectangle(
                serde_json::from_value(shape.clone()).map_err(|e| shape_error(kind, e))?,
            ),
            GeometryKind::Circle => WireGeometry::Circle(
                serde_json::from_value(shape.clone()).map_err(|e| shape_error(kind, e))?,
            ),
        };
        Geometry::try_from(wire)
    }

    /// 输出不带标签的形状
    pub fn to_shape(&self) -> Value {
        let shape = match WireGeometry::from(self.clone()) {
            WireGeometry::Point(p) => serde_json::to_value(p),
            WireGeometry::Line(l) => serde_json::to_value(l),
            WireGeometry::Polyline(s) | WireGeometry::Polygon(s) => serde_json::to_value(s),
            WireGeometry::Rectangle(r) => serde_json::to_value(r),
            WireGeometry::Circle(c) => serde_json::to_value(c),
        };
        // 纯数值结构序列化不会失败
        shape.unwrap_or(Value::Null)
    }
}
