//! Value 模块 - 常量值类型系统
//!
//! - 核心类型定义 (`types.rs`)
//! - 比较逻辑 (`comparison.rs`)
//! - JSON 转换 (`conversion.rs`)

pub mod comparison;
pub mod conversion;
pub mod types;

pub use types::{TypeTag, Value};
