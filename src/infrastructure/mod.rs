//! 基础设施层
//!
//! 持有稀缺资源（HTTP 客户端、存储），只暴露能力

pub mod http_executor;
pub mod store;

pub use http_executor::HttpExecutor;
pub use store::{JsonFileStore, MemoryUserStore, RecordTransaction, UserRecordStore};
