use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::oneshot;
use tracing::{info, warn};
use url::Url;

use gating_engine::{
	api::{self, ApiContext},
	discord::rest::DiscordRestClient,
	lock::CycleLock,
	logging,
	price::PriceCache,
	settings::{CommandLineOptions, Settings},
	sol::HoldingsClient,
	store::Store,
	verify::{TokenCodec, VerifyService},
	worker::{Worker, WorkerConfig},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let settings = Settings::new(&CommandLineOptions::parse()).context("reading settings")?;
	logging::init(settings.node_env.is_development());
	info!("Starting gating engine on port {}", settings.port);

	let pool = PgPoolOptions::new()
		.max_connections(settings.database.max_connections)
		.connect(&settings.database.url)
		.await
		.context("connecting to the database")?;
	sqlx::migrate!("./migrations").run(&pool).await.context("running migrations")?;

	let store = Store::new(pool.clone());
	let http = reqwest::Client::builder().build().context("building HTTP client")?;

	let discord = Arc::new(DiscordRestClient::new(http.clone(), &settings.discord)?);
	let holdings = HoldingsClient::new(
		http.clone(),
		Url::parse(&settings.solana.rpc_http_endpoint).context("solana.rpc_http_endpoint")?,
		Url::parse(&settings.solana.das_http_endpoint).context("solana.das_http_endpoint")?,
	);
	let prices = PriceCache::new(
		store.clone(),
		http,
		Url::parse(&settings.price.base_url).context("price.base_url")?,
	);

	let worker = Arc::new(Worker::new(
		store.clone(),
		discord,
		holdings,
		prices,
		CycleLock::new(pool),
		WorkerConfig::from_settings(&settings.worker),
	));
	let (recheck, tasks) = worker.start();

	let verify = Arc::new(VerifyService::new(
		store,
		TokenCodec::new(&settings.verify.token_hmac_secret),
		settings.verify.public_base_url.clone(),
		recheck.clone(),
	));
	let ctx = Arc::new(ApiContext {
		verify,
		recheck: recheck.clone(),
		internal_api_secret: settings.verify.internal_api_secret.clone(),
	});

	let (shutdown_sender, shutdown_receiver) = oneshot::channel();
	let api_task = tokio::spawn(api::serve(ctx, settings.port, shutdown_receiver));

	wait_for_shutdown_signal().await;
	info!("Shutting down: closing HTTP surface and draining the recheck queue");

	let _ = shutdown_sender.send(());
	if let Err(error) = api_task.await {
		warn!("HTTP task ended abnormally: {error}");
	}

	// Stop scheduling new work, then let the queue finish its current item.
	tasks.cycle_tick.abort();
	tasks.cleanup_tick.abort();
	drop(recheck);
	if tokio::time::timeout(std::time::Duration::from_secs(30), tasks.queue).await.is_err() {
		warn!("Recheck queue did not drain within 30s; exiting anyway");
	}

	info!("Shutdown complete");
	Ok(())
}

async fn wait_for_shutdown_signal() {
	use tokio::signal::unix::{signal, SignalKind};

	match signal(SignalKind::terminate()) {
		Ok(mut sigterm) => {
			tokio::select! {
				_ = tokio::signal::ctrl_c() => {},
				_ = sigterm.recv() => {},
			}
		},
		Err(error) => {
			warn!("Failed to install SIGTERM handler: {error}");
			let _ = tokio::signal::ctrl_c().await;
		},
	}
}
