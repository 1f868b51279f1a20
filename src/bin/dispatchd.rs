//! Dispatch core daemon: offer store, protocol engine, bus relay, expiry
//! sweeper, and realtime gateway in one process.
//!
//! The porter directory and the connection authenticator wired here are the
//! in-memory implementations; a deployment embeds this crate and substitutes
//! its own projections of the platform's user records.

use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;
use tracing::info;

use dispatch_core::config::ConfigLoader;
use dispatch_core::dispatch::{
    DispatchBroadcaster, InMemoryPorterDirectory, ProximityRatingPolicy,
};
use dispatch_core::events::EventPublisher;
use dispatch_core::gateway::{RealtimeGateway, StaticCredentialAuthenticator};
use dispatch_core::messaging::{EventRelay, PgmqOfferBus};
use dispatch_core::offers::OfferManager;
use dispatch_core::presence::{InMemoryPresenceRegistry, PresenceRegistry};
use dispatch_core::store::PgOfferStore;
use dispatch_core::sweeper::ExpirySweeper;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dispatch_core::logging::init_structured_logging();

    let config = ConfigLoader::load()?;
    info!(bind = %config.gateway.bind_address, "starting dispatch core daemon");

    let pool = PgPoolOptions::new()
        .max_connections(config.database.pool_size)
        .acquire_timeout(Duration::from_secs(config.database.connect_timeout_seconds))
        .connect(&config.database.url)
        .await?;

    let publisher = EventPublisher::default();
    let store = Arc::new(PgOfferStore::new(pool.clone()));
    let manager = OfferManager::new(store, publisher.clone(), config.offers.clone());

    let presence: Arc<dyn PresenceRegistry> = Arc::new(InMemoryPresenceRegistry::new(
        config.presence.heartbeat_timeout(),
    ));
    let directory = Arc::new(InMemoryPorterDirectory::new());
    let broadcaster = Arc::new(DispatchBroadcaster::new(
        manager.clone(),
        presence.clone(),
        directory,
        Arc::new(ProximityRatingPolicy),
        config.dispatch.clone(),
    ));

    let bus = Arc::new(PgmqOfferBus::new_with_pool(pool, config.messaging.clone()).await);
    bus.ensure_queue().await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let relay = Arc::new(EventRelay::new(
        bus,
        publisher.clone(),
        config.messaging.clone(),
    ));
    {
        let relay = relay.clone();
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { relay.run_outbound(shutdown).await });
    }
    {
        let relay = relay.clone();
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { relay.run_inbound(shutdown).await });
    }

    let sweeper = ExpirySweeper::new(
        manager.clone(),
        broadcaster.clone(),
        config.offers.sweep_interval(),
    );
    {
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { sweeper.run(shutdown).await });
    }

    // Presence staleness sweep is owned by the gateway process.
    {
        let presence = presence.clone();
        let mut shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(10));
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = ticker.tick() => {
                        let _ = presence.sweep_stale(chrono::Utc::now()).await;
                    }
                }
            }
        });
    }

    broadcaster.clone().spawn_settlement_watch(shutdown_rx.clone());

    let authenticator = Arc::new(StaticCredentialAuthenticator::new());
    let gateway = RealtimeGateway::new(
        manager,
        presence,
        broadcaster,
        authenticator,
        Duration::from_secs(config.presence.heartbeat_timeout_seconds),
    );

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    gateway
        .serve(&config.gateway.bind_address, shutdown_rx)
        .await?;
    Ok(())
}
