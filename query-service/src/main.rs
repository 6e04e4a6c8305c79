//! 自然语言查询服务入口

use std::sync::Arc;

use anyhow::Context;
use common::config::AppConfig;
use query_service::pool_manager::PoolManager;
use query_service::registry::{ConnectionStore, InMemoryStore, MySqlStore};
use query_service::{create_router, AppState};
use sqlx::mysql::MySqlPoolOptions;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const SERVICE_NAME: &str = "query-service";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志追踪
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // 加载配置（包含 .env）
    let config = AppConfig::load_with_service(SERVICE_NAME);

    // 连接元数据存储：配置了 DATABASE_URL 时使用 MySQL，否则保存在内存中
    let store: Arc<dyn ConnectionStore> = match &config.database_url {
        Some(url) => {
            let pool = MySqlPoolOptions::new()
                .max_connections(config.max_connections)
                .acquire_timeout(config.connect_timeout())
                .connect(url)
                .await
                .context("连接元数据库失败，请检查 DATABASE_URL")?;
            info!("使用 MySQL 元数据存储");
            Arc::new(MySqlStore::new(pool).await?)
        }
        None => {
            info!("未配置 DATABASE_URL，连接配置仅保存在内存中");
            Arc::new(InMemoryStore::new())
        }
    };

    let driver = Arc::new(PoolManager::new(&config));
    let state = AppState::new(config.clone(), driver, store);

    // 创建路由
    let app = create_router(state);

    // 启动服务
    let addr = config.bind_addr();
    info!(service = SERVICE_NAME, address = %addr, "启动服务");

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("绑定地址失败: {addr}"))?;
    axum::serve(listener, app).await.context("服务启动失败")?;
    Ok(())
}
