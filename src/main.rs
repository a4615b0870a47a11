use std::io::Write;
use tokio::task;
use log::{info, error};
use chathub::hub::config::HubConfig;
use chathub::hub::init;

fn init_logger() {
    env_logger::Builder::from_default_env()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}:{}] {} - {}",
                buf.timestamp_millis(),
                record.module_path().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.level(),
                record.args()
            )
        })
        .init();
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    init_logger();

    info!("Chathub starting up");

    let path = std::env::args().nth(1).unwrap_or_else(|| "config.toml".to_string());
    let config = match HubConfig::from_toml_file(&path) {
        Ok(config) => {
            info!("Configuration loaded from {}", path);
            config
        },
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()));
        }
    };

    let server = task::spawn(async move {
        info!("Starting hub {}", config.id);
        if let Err(e) = init(config).await {
            error!("Error in hub: {e}");
        }
    });

    // Wait until the hub is done (or crashes)
    let _ = tokio::join!(server);

    Ok(())
}
