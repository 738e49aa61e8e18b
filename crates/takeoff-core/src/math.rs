//! 数学基础类型
//!
//! 所有坐标都位于页面图像的像素空间：原点在左上角，y 轴向下。

pub type Point2 = nalgebra::Point2<f64>;
pub type Vector2 = nalgebra::Vector2<f64>;

/// 判断长度/面积是否“约等于零”的容差
pub const EPSILON: f64 = 1e-9;

/// 两点间欧氏距离
#[inline]
pub fn distance(a: &Point2, b: &Point2) -> f64 {
    (b - a).norm()
}

/// 点在线段上的夹紧投影
///
/// 返回投影点以及参数 `t ∈ [0, 1]`。零长度线段投影到起点。
pub fn project_onto_segment(point: &Point2, start: &Point2, end: &Point2) -> (Point2, f64) {
    let v = end - start;
    let w = point - start;

    let c2 = v.dot(&v);
    if c2 < EPSILON {
        return (*start, 0.0);
    }

    let t = (w.dot(&v) / c2).clamp(0.0, 1.0);
    (start + v * t, t)
}

/// 按网格间距取整
#[inline]
pub fn round_to_grid(value: f64, grid_size: f64) -> f64 {
    (value / grid_size).round() * grid_size
}
