//! 错误定义
//!
//! 调用方按 [`ErrorKind`] 分类处理，不解析错误文本。

use crate::editor::RejectReason;
use crate::formula::FormulaError;
use crate::geometry::GeometryError;
use crate::measurement::{ConditionId, MeasurementId};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TakeoffError {
    #[error("invalid formula: {0}")]
    Formula(#[from] FormulaError),

    #[error("operation not applicable: {0}")]
    Geometry(#[from] GeometryError),

    #[error("edit not applicable: {0}")]
    EditRejected(#[from] RejectReason),

    #[error("Condition not found: {0}")]
    ConditionNotFound(ConditionId),

    #[error("Measurement not found: {0}")]
    MeasurementNotFound(MeasurementId),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// 错误类别，只在最外层映射为传输层状态（如进程退出码）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidFormula,
    NotApplicable,
    EditRejected,
    NotFound,
    InvalidInput,
    Io,
}

impl TakeoffError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TakeoffError::Formula(_) => ErrorKind::InvalidFormula,
            TakeoffError::Geometry(_) => ErrorKind::NotApplicable,
            TakeoffError::EditRejected(_) => ErrorKind::EditRejected,
            TakeoffError::ConditionNotFound(_) | TakeoffError::MeasurementNotFound(_) => {
                ErrorKind::NotFound
            }
            TakeoffError::Json(_) => ErrorKind::InvalidInput,
            TakeoffError::Io(_) => ErrorKind::Io,
        }
    }
}

pub type Result<T> = std::result::Result<T, TakeoffError>;
