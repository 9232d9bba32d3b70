//! 查询翻译层
//!
//! - 目录协作方接口 (`catalog`)
//! - 索引与集合元数据翻译 (`index`)
//! - 过滤文档翻译 (`match_expr`)
//! - 过滤路径与区间需求之间的转换 (`requirements`)
//! - 聚合管道翻译 (`pipeline`)

pub mod catalog;
pub mod index;
pub mod match_expr;
pub mod pipeline;
pub mod requirements;

pub use catalog::{
    Catalog, CatalogSnapshot, CollectionHandle, InMemoryCatalog, IndexCatalogEntry, IndexDescriptor,
    Namespace,
};
pub use index::{
    build_index_definition, build_index_specs, build_metadata, build_scan_definition, ExclusionReason,
    IndexTranslation, MetadataTranslation,
};
pub use match_expr::translate_filter;
pub use pipeline::{translate_pipeline, Pipeline, Stage};
pub use requirements::{convert_to_requirements, requirements_to_filter, PartialSchemaReqConversion};
