//! ABT（代数化树）表示
//!
//! 统一标量表达式、字段导航路径和关系操作符的封闭中间表示，
//! 是元数据、索引翻译、优化器和降级各组件之间的共同语言

pub mod explain;
pub mod expr;
pub mod node;
pub mod path;
pub mod reference;
pub mod syntax;
pub mod tree;

pub use explain::{DelegatorResolver, ExplainGenerator};
pub use reference::VariableEnvironment;
pub use syntax::{
    CollationOp, DistributionType, FieldProjectionMap, GroupId, GroupNodeType, IndexReqTarget,
    JoinType, MemoPhysicalNodeId, Operations, ProjectionName, SyntaxSort,
};
pub use tree::{Abt, AbtNode};
