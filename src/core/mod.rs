pub mod error;
pub mod value;

// 错误和结果类型
pub use error::{
    AbtError, AbtResult, CompileError, CompileResult, ExecError, ExecResult, LoweringError,
    LoweringResult, MetadataError, MetadataResult, OptimizerError, OptimizerResult,
    TranslateError, TranslateResult,
};

// 核心数据类型
pub use value::{TypeTag, Value};
