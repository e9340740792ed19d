use crate::{config::load_chains_from_file, settings::Settings};
use actix_web::{web, App, HttpResponse, HttpServer};
use hub_transfers_logic::{
    lcd::LcdClient,
    price::{AssetPriceProvider, HttpPriceProvider, NoPrices},
    requeue::RequeueClient,
    BatchProcessor, DocumentStore, HubIndexer, SearchIndexStore,
};
use prometheus::{Encoder, TextEncoder};
use serde_json::json;
use std::{net::SocketAddr, sync::Arc, time::Duration};

const SERVICE_NAME: &str = "hub_transfers";

async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "status": "SERVING" }))
}

async fn metrics() -> HttpResponse {
    let encoder = TextEncoder::new();
    let mut buffer = vec![];
    match encoder.encode(&prometheus::gather(), &mut buffer) {
        Ok(()) => HttpResponse::Ok()
            .content_type(encoder.format_type())
            .body(buffer),
        Err(err) => HttpResponse::InternalServerError().body(err.to_string()),
    }
}

fn serve<F>(addr: SocketAddr, configure: F) -> Result<actix_web::dev::Server, anyhow::Error>
where
    F: Fn(&mut web::ServiceConfig) + Clone + Send + 'static,
{
    tracing::info!(%addr, "starting http server");
    Ok(HttpServer::new(move || App::new().configure(configure.clone()))
        .bind(addr)?
        .run())
}

/// Restarts the indexer after `restart_delay` whenever it stops.
async fn supervise(indexer: HubIndexer, restart_delay: Duration) {
    loop {
        tracing::info!(height = indexer.next_height(), "starting hub indexer");
        match indexer.run().await {
            Ok(()) => tracing::warn!("hub indexer stopped"),
            Err(err) => tracing::error!(err = ?err, "hub indexer failed"),
        }
        tokio::time::sleep(restart_delay).await;
    }
}

fn build_indexer(settings: &Settings) -> Result<HubIndexer, anyhow::Error> {
    let chains = Arc::new(load_chains_from_file(&settings.chains_config)?);
    let store: Arc<dyn DocumentStore> = Arc::new(SearchIndexStore::new(settings.store.clone())?);
    let lcd = LcdClient::new(settings.lcd.clone())?;
    let prices: Arc<dyn AssetPriceProvider> = match &settings.price.url {
        Some(url) => Arc::new(HttpPriceProvider::new(url.clone(), &settings.price)?),
        None => Arc::new(NoPrices),
    };
    let requeue = settings
        .indexer
        .requeue_api_url
        .clone()
        .map(|url| RequeueClient::new(url, settings.lcd.timeout))
        .transpose()?;

    let processor = BatchProcessor::builder(chains, store, Arc::new(lcd.clone()))
        .settings(settings.indexer.processor.clone())
        .prices(prices)
        .requeue(requeue)
        .build();

    Ok(HubIndexer::new(
        lcd,
        Arc::new(processor),
        settings.indexer.clone(),
    ))
}

pub async fn run(settings: Settings) -> Result<(), anyhow::Error> {
    blockscout_service_launcher::tracing::init_logs(
        SERVICE_NAME,
        &settings.tracing,
        &settings.jaeger,
    )?;

    let indexer = build_indexer(&settings)?;
    let restart_delay = settings.indexer.restart_delay;
    let mut futures = vec![tokio::spawn(async move {
        supervise(indexer, restart_delay).await;
        Ok::<_, anyhow::Error>(())
    })];

    if settings.server.http.enabled {
        let server = serve(settings.server.http.addr, |config| {
            config.route("/health", web::get().to(health));
        })?;
        futures.push(tokio::spawn(async move { Ok::<_, anyhow::Error>(server.await?) }));
    }
    if settings.metrics.enabled {
        let route = settings.metrics.route.clone();
        let server = serve(settings.metrics.addr, move |config| {
            config.route(&route, web::get().to(metrics));
        })?;
        futures.push(tokio::spawn(async move { Ok::<_, anyhow::Error>(server.await?) }));
    }

    let (result, _, others) = futures::future::select_all(futures).await;
    for future in others {
        future.abort();
    }
    result?
}
