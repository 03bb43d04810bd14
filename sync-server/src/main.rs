use sync_server::{print_banner, setup_environment, Config, SyncServer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. 设置环境 (dotenv, 日志)
    setup_environment();

    // 打印横幅
    print_banner();

    tracing::info!("Fleet sync server starting...");

    // 2. 加载配置
    let config = Config::from_env();

    // 3. 初始化组件并启动
    let server = SyncServer::new(config)?;
    let running = server.start();

    // 4. 等待终止信号，优雅关闭
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");
    running.shutdown().await;

    Ok(())
}
