//! Connects to one device over the cloud MQTT bus, issues a single RPC, and
//! prints the decoded result. Demonstrates `devlink-device` end to end; not
//! part of the library surface.

use clap::Parser;
use devlink_device::{AccountCredentials, Cache, Config, DeviceDescriptor, DeviceId, DeviceManager, JsonCacheCodec, apply_credentials};
use devlink_transport::Session;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "devlink-local-session", about = "Send one RPC to a device and print its response")]
struct Cli {
    /// MQTT broker host for the cloud bus.
    #[arg(long)]
    broker: String,
    /// Account username; used in the per-device topic pair.
    #[arg(long)]
    user: String,
    /// rriot_u credential; used to derive the MQTT client id and username.
    #[arg(long)]
    rriot_u: String,
    /// rriot_s credential; used to derive the MQTT password.
    #[arg(long)]
    rriot_s: String,
    /// rriot_k credential; used to derive the MQTT client id and password.
    #[arg(long)]
    rriot_k: String,
    /// Device id (duid).
    #[arg(long)]
    duid: String,
    /// 16-byte device-local shared secret, as a UTF-8 string.
    #[arg(long)]
    local_key: String,
    /// RPC method to send.
    #[arg(long, default_value = "get_status")]
    method: String,
    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    let credentials = AccountCredentials {
        user: cli.user,
        rriot_u: cli.rriot_u,
        rriot_s: cli.rriot_s,
        rriot_k: cli.rriot_k,
    };

    let mut opts = rumqttc::MqttOptions::new("devlink-demo", cli.broker, 8883);
    opts.set_keep_alive(std::time::Duration::from_secs(30));
    apply_credentials(&mut opts, &credentials);
    let session = Session::connect(opts);
    session.wait_ready().await;

    let config = Config::default();
    let manager = std::sync::Arc::new(DeviceManager::new(
        session,
        std::sync::Arc::new(Cache::new(Box::new(JsonCacheCodec))),
        config.v1,
    ));
    let descriptor = DeviceDescriptor {
        duid: DeviceId::new(cli.duid.clone()),
        local_key: cli.local_key,
        product_model: "unknown".into(),
        product_family: "v1".into(),
    };

    let devices = manager.sync_devices(&credentials, std::slice::from_ref(&descriptor));
    let device = devices.into_iter().next().expect("sync_devices returns one device per descriptor");
    device.start();

    let result = device.send_command(&cli.method, serde_json::Value::Array(Vec::new())).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);

    device.close().await;
    Ok(())
}
