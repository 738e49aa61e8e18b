//! 几何计量核心
//!
//! 把图纸页面上绘制的几何（像素坐标）换算为工程量，并提供几何编辑、
//! 公式求值和按条件汇总。
//!
//! # 组成
//!
//! - [`calculator::GeometryCalculator`]: 几何 + 比例 → 长度/面积/周长/体积
//! - [`editor::GeometryEditor`]: 微移、吸附、延伸、修剪、偏移、打断、合并
//! - [`formula::FormulaEngine`]: 受限算术公式求值
//! - [`aggregate::QuantityAggregator`]: 条件合计；[`aggregate::ConditionLedger`] 负责加锁与持久化顺序
//!
//! # 示例
//!
//! ```rust
//! use takeoff_core::prelude::*;
//!
//! let line = Geometry::Line(Line::new(Point2::new(0.0, 0.0), Point2::new(100.0, 0.0)));
//! let scale = ScaleFactor::new(10.0).unwrap();
//!
//! let result = GeometryCalculator::new().calculate(&line, scale, None);
//! assert_eq!(result.length_feet, Some(10.0));
//! ```

pub mod aggregate;
pub mod calculator;
pub mod config;
pub mod editor;
pub mod error;
pub mod formula;
pub mod geometry;
pub mod math;
pub mod measurement;
pub mod wire;

pub mod prelude {
    //! 常用类型的便捷导入
    pub use crate::aggregate::{
        ConditionLedger, ConditionTotals, Detection, EventBus, QuantityAggregator, TakeoffEvent,
    };
    pub use crate::calculator::{CalculationResult, GeometryCalculator, MeasurementType, ScaleFactor};
    pub use crate::config::EngineConfig;
    pub use crate::editor::{
        EditOperation, EditOutcome, EditProduct, EditorConfig, Endpoint, GeometryEditor,
        NudgeDirection, RejectReason,
    };
    pub use crate::error::{ErrorKind, TakeoffError};
    pub use crate::formula::{FormulaConfig, FormulaContext, FormulaEngine, FormulaError};
    pub use crate::geometry::{
        Circle, Geometry, GeometryError, GeometryKind, Line, Point, Polygon, Polyline, Rectangle,
    };
    pub use crate::math::{Point2, Vector2};
    pub use crate::measurement::{
        Condition, ConditionAttributes, ConditionId, Measurement, MeasurementId,
    };
}
