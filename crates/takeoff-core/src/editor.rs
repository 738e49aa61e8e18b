//! 几何编辑
//!
//! 所有操作都是纯函数：`(几何, 参数) → 新几何`。
//!
//! | 操作 | 适用类型 |
//! |------|----------|
//! | 微移 (nudge) | 全部 |
//! | 网格吸附 (snap_to_grid) | 全部 |
//! | 延伸 (extend) | 线段、多段线 |
//! | 修剪 (trim) | 线段、多段线 |
//! | 偏移 (offset) | 多边形、矩形 |
//! | 打断 (split) | 线段、多段线 |
//! | 合并 (join) | 线段/多段线两两之间 |
//!
//! 参数不适用（类型不支持、参数非法）返回 [`GeometryError`]；
//! 结构合法但无法满足的编辑（打断点离端点太近、端点超出容差）
//! 返回 [`EditOutcome::Rejected`]，不算系统错误。

use crate::geometry::{
    Circle, Geometry, GeometryError, GeometryKind, Line, Point, Polygon, Polyline, Rectangle,
};
use crate::math::{distance, project_onto_segment, round_to_grid, Point2, Vector2, EPSILON};
use crate::wire::WirePoint;
use serde::{Deserialize, Serialize};

/// 编辑器配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorConfig {
    /// 合并时端点匹配容差（像素）
    pub join_tolerance: f64,
    /// 打断点与端点的最小距离（像素）
    pub split_endpoint_margin: f64,
    /// 斜接长度上限（偏移距离的倍数），超过则改为倒角
    pub miter_limit: f64,
    /// 矩形偏移后的最小宽高（像素）
    pub min_rectangle_size: f64,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            join_tolerance: 15.0,
            split_endpoint_margin: 1.0,
            miter_limit: 4.0,
            min_rectangle_size: 1.0,
        }
    }
}

/// 微移方向（y 轴向下）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NudgeDirection {
    Up,
    Down,
    Left,
    Right,
}

impl NudgeDirection {
    fn delta(&self, distance: f64) -> Vector2 {
        match self {
            NudgeDirection::Up => Vector2::new(0.0, -distance),
            NudgeDirection::Down => Vector2::new(0.0, distance),
            NudgeDirection::Left => Vector2::new(-distance, 0.0),
            NudgeDirection::Right => Vector2::new(distance, 0.0),
        }
    }
}

/// 延伸的端点
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Endpoint {
    Start,
    End,
    Both,
}

/// 编辑请求
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum EditOperation {
    Nudge {
        direction: NudgeDirection,
        distance: f64,
    },
    SnapToGrid {
        grid_size: f64,
    },
    Extend {
        endpoint: Endpoint,
        distance: f64,
    },
    Trim {
        trim_point: WirePoint,
    },
    Offset {
        distance: f64,
    },
    Split {
        split_point: WirePoint,
    },
    Join {
        other: Geometry,
        #[serde(default)]
        tolerance: Option<f64>,
    },
}

impl EditOperation {
    pub fn name(&self) -> &'static str {
        match self {
            EditOperation::Nudge { .. } => "nudge",
            EditOperation::SnapToGrid { .. } => "snap_to_grid",
            EditOperation::Extend { .. } => "extend",
            EditOperation::Trim { .. } => "trim",
            EditOperation::Offset { .. } => "offset",
            EditOperation::Split { .. } => "split",
            EditOperation::Join { .. } => "join",
        }
    }

    /// 从 JSON 请求解析；缺少或类型错误的参数视为参数错误
    pub fn from_json(value: &serde_json::Value) -> Result<Self, GeometryError> {
        serde_json::from_value(value.clone())
            .map_err(|e| GeometryError::InvalidParameter(e.to_string()))
    }
}

/// 编辑被拒绝的原因
#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectReason {
    #[error("split point is {distance:.2}px from an endpoint (minimum {margin:.2}px)")]
    SplitNearEndpoint { distance: f64, margin: f64 },

    #[error("closest endpoints are {nearest:.2}px apart (tolerance {tolerance:.2}px)")]
    EndpointsOutOfTolerance { nearest: f64, tolerance: f64 },
}

/// 编辑结果：成功，或“不适用”
#[derive(Debug, Clone, PartialEq)]
pub enum EditOutcome<T> {
    Applied(T),
    Rejected(RejectReason),
}

impl<T> EditOutcome<T> {
    pub fn is_applied(&self) -> bool {
        matches!(self, EditOutcome::Applied(_))
    }

    pub fn applied(self) -> Option<T> {
        match self {
            EditOutcome::Applied(value) => Some(value),
            EditOutcome::Rejected(_) => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> EditOutcome<U> {
        match self {
            EditOutcome::Applied(value) => EditOutcome::Applied(f(value)),
            EditOutcome::Rejected(reason) => EditOutcome::Rejected(reason),
        }
    }

    pub fn into_result(self) -> Result<T, RejectReason> {
        match self {
            EditOutcome::Applied(value) => Ok(value),
            EditOutcome::Rejected(reason) => Err(reason),
        }
    }
}

/// 编辑产物：单个几何，或打断得到的两段
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EditProduct {
    Single(Geometry),
    Pair(Geometry, Geometry),
}

/// 点到顶点链的最近投影
#[derive(Debug, Clone, Copy)]
struct ChainProjection {
    /// 所在线段的起始顶点索引
    segment: usize,
    point: Point2,
}

fn nearest_projection(points: &[Point2], target: &Point2) -> ChainProjection {
    let mut best = ChainProjection {
        segment: 0,
        point: points[0],
    };
    let mut best_dist = f64::MAX;

    for (i, w) in points.windows(2).enumerate() {
        let (p, _) = project_onto_segment(target, &w[0], &w[1]);
        let d = distance(&p, target);
        if d < best_dist {
            best_dist = d;
            best = ChainProjection {
                segment: i,
                point: p,
            };
        }
    }

    best
}

/// 在投影点处把顶点链分成两段，投影点同时作为两段的边界顶点
fn split_chain(points: &[Point2], at: &ChainProjection) -> (Vec<Point2>, Vec<Point2>) {
    let mut head = points[..=at.segment].to_vec();
    head.push(at.point);

    let mut tail = vec![at.point];
    tail.extend_from_slice(&points[at.segment + 1..]);

    (dedup_chain(head), dedup_chain(tail))
}

/// 去掉相邻重复顶点，至少保留两个点
fn dedup_chain(points: Vec<Point2>) -> Vec<Point2> {
    let mut out: Vec<Point2> = Vec::with_capacity(points.len());
    for p in points {
        if out.last().map_or(true, |q| distance(q, &p) > EPSILON) {
            out.push(p);
        }
    }
    if out.len() == 1 {
        out.push(out[0]);
    }
    out
}

fn chain_length(points: &[Point2]) -> f64 {
    points.windows(2).map(|w| distance(&w[0], &w[1])).sum()
}

/// 按原类型重建：线段保持线段，多段线保持多段线
fn rebuild_like(original: GeometryKind, points: Vec<Point2>) -> Result<Geometry, GeometryError> {
    match original {
        GeometryKind::Line => Ok(Geometry::Line(Line::new(points[0], points[points.len() - 1]))),
        _ => Ok(Geometry::Polyline(Polyline::new(points)?)),
    }
}

fn require_finite(name: &str, value: f64) -> Result<(), GeometryError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(GeometryError::InvalidParameter(format!(
            "{} must be a finite number, got {}",
            name, value
        )))
    }
}

/// 几何编辑器
///
/// 无内部可变状态，可在线程间共享。
#[derive(Debug, Clone, Default)]
pub struct GeometryEditor {
    config: EditorConfig,
}

impl GeometryEditor {
    pub fn new(config: EditorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EditorConfig {
        &self.config
    }

    /// 按请求分派编辑操作
    pub fn apply(
        &self,
        geometry: &Geometry,
        operation: &EditOperation,
    ) -> Result<EditOutcome<EditProduct>, GeometryError> {
        let outcome = match operation {
            EditOperation::Nudge {
                direction,
                distance,
            } => EditOutcome::Applied(EditProduct::Single(
                self.nudge(geometry, *direction, *distance)?,
            )),
            EditOperation::SnapToGrid { grid_size } => EditOutcome::Applied(EditProduct::Single(
                self.snap_to_grid(geometry, *grid_size),
            )),
            EditOperation::Extend { endpoint, distance } => EditOutcome::Applied(
                EditProduct::Single(self.extend(geometry, *endpoint, *distance)?),
            ),
            EditOperation::Trim { trim_point } => EditOutcome::Applied(EditProduct::Single(
                self.trim(geometry, (*trim_point).into())?,
            )),
            EditOperation::Offset { distance } => {
                EditOutcome::Applied(EditProduct::Single(self.offset(geometry, *distance)?))
            }
            EditOperation::Split { split_point } => self
                .split(geometry, (*split_point).into())?
                .map(|(a, b)| EditProduct::Pair(a, b)),
            EditOperation::Join { other, tolerance } => self
                .join(geometry, other, *tolerance)?
                .map(EditProduct::Single),
        };

        tracing::debug!(
            operation = operation.name(),
            kind = %geometry.kind(),
            applied = outcome.is_applied(),
            "geometry edit"
        );

        Ok(outcome)
    }

    /// 微移：整体平移
    pub fn nudge(
        &self,
        geometry: &Geometry,
        direction: NudgeDirection,
        distance: f64,
    ) -> Result<Geometry, GeometryError> {
        require_finite("distance", distance)?;
        let delta = direction.delta(distance);

        Ok(match geometry {
            Geometry::Point(p) => Geometry::Point(Point::from_point2(p.position + delta)),
            Geometry::Line(l) => Geometry::Line(Line::new(l.start + delta, l.end + delta)),
            Geometry::Polyline(pl) => Geometry::Polyline(pl.map_points(|p| *p + delta)),
            Geometry::Polygon(pg) => Geometry::Polygon(pg.map_points(|p| *p + delta)),
            Geometry::Rectangle(r) => Geometry::Rectangle(Rectangle::new(
                r.x + delta.x,
                r.y + delta.y,
                r.width,
                r.height,
            )),
            Geometry::Circle(c) => Geometry::Circle(Circle::new(c.center + delta, c.radius)),
        })
    }

    /// 网格吸附：坐标及矩形/圆的尺寸取整到网格，`grid_size <= 0` 时不变
    pub fn snap_to_grid(&self, geometry: &Geometry, grid_size: f64) -> Geometry {
        if !(grid_size > 0.0 && grid_size.is_finite()) {
            return geometry.clone();
        }

        let snap = |v: f64| round_to_grid(v, grid_size);
        let snap_point = |p: &Point2| Point2::new(snap(p.x), snap(p.y));

        match geometry {
            Geometry::Point(p) => Geometry::Point(Point::from_point2(snap_point(&p.position))),
            Geometry::Line(l) => Geometry::Line(Line::new(snap_point(&l.start), snap_point(&l.end))),
            Geometry::Polyline(pl) => Geometry::Polyline(pl.map_points(snap_point)),
            Geometry::Polygon(pg) => Geometry::Polygon(pg.map_points(snap_point)),
            Geometry::Rectangle(r) => Geometry::Rectangle(Rectangle::new(
                snap(r.x),
                snap(r.y),
                snap(r.width),
                snap(r.height),
            )),
            Geometry::Circle(c) => {
                Geometry::Circle(Circle::new(snap_point(&c.center), snap(c.radius)))
            }
        }
    }

    /// 延伸：沿端部线段方向加长，端部线段长度约为零时该端不变
    pub fn extend(
        &self,
        geometry: &Geometry,
        endpoint: Endpoint,
        distance: f64,
    ) -> Result<Geometry, GeometryError> {
        require_finite("distance", distance)?;
        let mut points = geometry
            .vertices()
            .ok_or(GeometryError::UnsupportedKind {
                operation: "extend",
                kind: geometry.kind(),
            })?;
        let n = points.len();

        if matches!(endpoint, Endpoint::End | Endpoint::Both) {
            if let Some(dir) = Line::new(points[n - 2], points[n - 1]).direction() {
                points[n - 1] += dir * distance;
            }
        }
        if matches!(endpoint, Endpoint::Start | Endpoint::Both) {
            if let Some(dir) = Line::new(points[1], points[0]).direction() {
                points[0] += dir * distance;
            }
        }

        rebuild_like(geometry.kind(), points)
    }

    /// 修剪：在最近线段上的投影点处分开，保留较长的一侧
    pub fn trim(&self, geometry: &Geometry, trim_point: Point2) -> Result<Geometry, GeometryError> {
        let points = geometry.vertices().ok_or(GeometryError::UnsupportedKind {
            operation: "trim",
            kind: geometry.kind(),
        })?;

        let at = nearest_projection(&points, &trim_point);
        let (head, tail) = split_chain(&points, &at);

        let keep = if chain_length(&head) >= chain_length(&tail) {
            head
        } else {
            tail
        };

        rebuild_like(geometry.kind(), keep)
    }

    /// 偏移：正值向外，负值向内
    pub fn offset(&self, geometry: &Geometry, distance: f64) -> Result<Geometry, GeometryError> {
        require_finite("distance", distance)?;

        match geometry {
            Geometry::Rectangle(r) => {
                let min = self.config.min_rectangle_size;
                let width = (r.width + 2.0 * distance).max(min);
                let height = (r.height + 2.0 * distance).max(min);
                let cx = r.x + r.width / 2.0;
                let cy = r.y + r.height / 2.0;

                Ok(Geometry::Rectangle(Rectangle::new(
                    cx - width / 2.0,
                    cy - height / 2.0,
                    width,
                    height,
                )))
            }
            Geometry::Polygon(pg) => {
                let points = self.offset_contour(pg.points(), pg.shoelace_sum(), distance);
                Ok(Geometry::Polygon(Polygon::new(points)?))
            }
            other => Err(GeometryError::UnsupportedKind {
                operation: "offset",
                kind: other.kind(),
            }),
        }
    }

    /// 多边形平行轮廓
    ///
    /// 每个顶点取相邻两边外法线的平均方向；斜接长度不超过
    /// `miter_limit × |distance|` 时输出一个斜接顶点，否则按两边各自法线输出两个倒角顶点。
    fn offset_contour(&self, points: &[Point2], shoelace_sum: f64, distance: f64) -> Vec<Point2> {
        let n = points.len();
        let orientation = if shoelace_sum >= 0.0 { 1.0 } else { -1.0 };

        let outward = |a: &Point2, b: &Point2| -> Option<Vector2> {
            let d = b - a;
            let len = d.norm();
            if len < EPSILON {
                None
            } else {
                Some(Vector2::new(d.y, -d.x) * (orientation / len))
            }
        };

        let mut result = Vec::with_capacity(n * 2);

        for i in 0..n {
            let prev = &points[(i + n - 1) % n];
            let curr = &points[i];
            let next = &points[(i + 1) % n];

            match (outward(prev, curr), outward(curr, next)) {
                (None, None) => result.push(*curr),
                (Some(normal), None) | (None, Some(normal)) => {
                    result.push(*curr + normal * distance)
                }
                (Some(n1), Some(n2)) => {
                    let sum = n1 + n2;
                    let sum_len = sum.norm();
                    let cos_half = if sum_len < EPSILON {
                        0.0
                    } else {
                        (sum / sum_len).dot(&n1)
                    };

                    let miter_ok = cos_half > EPSILON && 1.0 / cos_half <= self.config.miter_limit;

                    if miter_ok {
                        let bisector = sum / sum_len;
                        result.push(*curr + bisector * (distance / cos_half));
                    } else {
                        result.push(*curr + n1 * distance);
                        result.push(*curr + n2 * distance);
                    }
                }
            }
        }

        result
    }

    /// 打断：投影点距任一端点小于边距时拒绝
    pub fn split(
        &self,
        geometry: &Geometry,
        split_point: Point2,
    ) -> Result<EditOutcome<(Geometry, Geometry)>, GeometryError> {
        let points = geometry.vertices().ok_or(GeometryError::UnsupportedKind {
            operation: "split",
            kind: geometry.kind(),
        })?;

        let at = nearest_projection(&points, &split_point);
        let first = points[0];
        let last = points[points.len() - 1];
        let nearest_end = distance(&at.point, &first).min(distance(&at.point, &last));

        let margin = self.config.split_endpoint_margin;
        if nearest_end < margin {
            return Ok(EditOutcome::Rejected(RejectReason::SplitNearEndpoint {
                distance: nearest_end,
                margin,
            }));
        }

        let (head, tail) = split_chain(&points, &at);
        Ok(EditOutcome::Applied((
            Geometry::from_chain(head)?,
            Geometry::from_chain(tail)?,
        )))
    }

    /// 合并：按固定优先级寻找容差内的端点对
    ///
    /// 1. A 终点 ↔ B 起点
    /// 2. A 终点 ↔ B 终点
    /// 3. A 起点 ↔ B 终点
    /// 4. A 起点 ↔ B 起点
    ///
    /// 接缝处保留 A 的顶点。
    pub fn join(
        &self,
        a: &Geometry,
        b: &Geometry,
        tolerance: Option<f64>,
    ) -> Result<EditOutcome<Geometry>, GeometryError> {
        let a_pts = a.vertices().ok_or(GeometryError::UnsupportedKind {
            operation: "join",
            kind: a.kind(),
        })?;
        let b_pts = b.vertices().ok_or(GeometryError::UnsupportedKind {
            operation: "join",
            kind: b.kind(),
        })?;

        let tolerance = tolerance.unwrap_or(self.config.join_tolerance);
        if !(tolerance >= 0.0 && tolerance.is_finite()) {
            return Err(GeometryError::InvalidParameter(format!(
                "join tolerance must be a non-negative number, got {}",
                tolerance
            )));
        }

        let a_start = a_pts[0];
        let a_end = a_pts[a_pts.len() - 1];
        let b_start = b_pts[0];
        let b_end = b_pts[b_pts.len() - 1];

        let b_reversed: Vec<Point2> = b_pts.iter().rev().copied().collect();
        let m = b_pts.len();

        let gaps = [
            distance(&a_end, &b_start),
            distance(&a_end, &b_end),
            distance(&a_start, &b_end),
            distance(&a_start, &b_start),
        ];

        let merged: Vec<Point2> = match gaps.iter().position(|gap| *gap <= tolerance) {
            Some(0) => a_pts.iter().chain(&b_pts[1..]).copied().collect(),
            Some(1) => a_pts.iter().chain(&b_reversed[1..]).copied().collect(),
            Some(2) => b_pts[..m - 1].iter().chain(&a_pts).copied().collect(),
            Some(_) => b_reversed[..m - 1].iter().chain(&a_pts).copied().collect(),
            None => {
                let nearest = gaps.iter().copied().fold(f64::MAX, f64::min);
                return Ok(EditOutcome::Rejected(RejectReason::EndpointsOutOfTolerance {
                    nearest,
                    tolerance,
                }));
            }
        };

        Ok(EditOutcome::Applied(Geometry::from_chain(merged)?))
    }
}
