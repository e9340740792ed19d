use blockscout_service_launcher::launcher::ConfigSettings;
use hub_transfers_server::Settings;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let settings = Settings::build().expect("failed to read config");
    hub_transfers_server::run(settings).await
}
