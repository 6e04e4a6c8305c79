//! 自然语言查询服务
//!
//! 提供以下功能：
//! - 按用户保存数据库连接配置（密码仅保存在内存中）
//! - 表结构加载与缓存
//! - 自然语言问题解析为只读 SQL 并执行
//! - 会话级最近一次查询结果

pub mod catalog;
pub mod driver;
pub mod executor;
pub mod handlers;
pub mod pool_manager;
pub mod registry;
pub mod routes;
pub mod service;
pub mod session;
pub mod state;

#[cfg(test)]
mod testing;

pub use routes::{create_router, ApiDoc};
pub use state::AppState;
