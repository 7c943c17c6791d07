use mock_service::MockConfig;
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::time::Duration;
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    FmtSubscriber::builder()
        .with_env_filter("mock_service=info,tower_http=info")
        .init();

    let port: u16 = env_or("PORT", 3000)?;
    let config = MockConfig {
        max_rps: NonZeroU32::new(env_or("MAX_RPS", 0)?),
        delay: Duration::from_millis(env_or("DELAY_MS", 0)?),
    };

    mock_service::run(SocketAddr::from(([0, 0, 0, 0], port)), config).await
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(v) => Ok(v.parse()?),
        Err(_) => Ok(default),
    }
}
