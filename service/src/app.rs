//! Process wiring: stores, bus, services and background consumers.

use crate::config::ServiceConfig;
use crate::notifier::TracingNotifier;
use anyhow::Context;
use rsvp_core::event_bus::EventBus;
use rsvp_postgres::{PostgresAttendanceStore, PostgresEventDetails};
use rsvp_projections::postgres::DEFAULT_TABLE;
use rsvp_projections::{
    ConsumerError, CrossServiceEventConsumer, GroupRoleSubscriber, GroupRoleSubscription,
    PostgresSecondaryEventStore, RoleRegistry,
};
use rsvp_redpanda::RedpandaEventBus;
use rsvp_runtime::{EventMutationPublisher, EventService, ParticipationService};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// The running service.
///
/// Owns the request-facing services and the background consumers.
pub struct App {
    /// Attendance operations.
    pub participation: ParticipationService<PostgresAttendanceStore>,
    /// Event catalog operations.
    pub events: EventService<PostgresAttendanceStore>,
    roles: RoleRegistry,
    consumer_shutdown: watch::Sender<bool>,
    consumer: JoinHandle<Result<(), ConsumerError>>,
    subscription: GroupRoleSubscription,
}

impl App {
    /// Connect to Postgres and the bus, run migrations and start consumers.
    ///
    /// # Errors
    ///
    /// Fails if the database, migrations, bus or subscriptions are unavailable.
    pub async fn start(config: &ServiceConfig) -> anyhow::Result<Self> {
        tracing::info!("Connecting to attendance database...");
        let store = Arc::new(
            PostgresAttendanceStore::connect(&config.database.url, config.database.max_connections)
                .await
                .context("connecting to attendance database")?,
        );
        store.migrate().await.context("running attendance migrations")?;
        let details = Arc::new(PostgresEventDetails::new(
            store.pool().clone(),
            config.image_base_url.clone(),
        ));
        tracing::info!("Attendance database ready");

        tracing::info!("Connecting to Redpanda event bus...");
        let event_bus: Arc<dyn EventBus> = Arc::new(
            RedpandaEventBus::builder()
                .brokers(&config.redpanda.brokers)
                .consumer_group(&config.redpanda.consumer_group)
                .build()
                .context("building event bus")?,
        );
        tracing::info!("Event bus connected");

        let publisher = EventMutationPublisher::new(
            Arc::clone(&event_bus),
            details,
            config.redpanda.event_topic.clone(),
        );
        let participation = ParticipationService::new(
            Arc::clone(&store),
            publisher.clone(),
            Arc::new(TracingNotifier),
        );
        let events = EventService::new(Arc::clone(&store), publisher);

        let secondary = Arc::new(PostgresSecondaryEventStore::new(
            store.pool().clone(),
            DEFAULT_TABLE.to_string(),
        ));
        secondary
            .migrate()
            .await
            .context("running secondary event migrations")?;

        let (mut consumer, consumer_shutdown) = CrossServiceEventConsumer::new(
            secondary,
            Arc::clone(&event_bus),
            config.redpanda.event_topic.clone(),
            config.redpanda.consumer_group.clone(),
        );
        let consumer = tokio::spawn(async move { consumer.start().await });

        let subscription =
            GroupRoleSubscriber::subscribe(Arc::clone(&event_bus), config.redpanda.group_topic.clone())
                .await
                .context("subscribing to group mutations")?;
        let roles = subscription.registry();

        tracing::info!(
            event_topic = %config.redpanda.event_topic,
            group_topic = %config.redpanda.group_topic,
            "Consumers started"
        );

        Ok(Self {
            participation,
            events,
            roles,
            consumer_shutdown,
            consumer,
            subscription,
        })
    }

    /// Live user to role mappings learned from the group channel.
    #[must_use]
    pub fn roles(&self) -> &RoleRegistry {
        &self.roles
    }

    /// Stop the consumers and wait up to `timeout` for them to settle.
    ///
    /// # Errors
    ///
    /// Fails if the consumers do not stop in time or the event consumer
    /// ended with an error.
    pub async fn shutdown(self, timeout: Duration) -> anyhow::Result<()> {
        tracing::info!("Stopping consumers...");
        let _ = self.consumer_shutdown.send(true);

        let consumer = self.consumer;
        let subscription = self.subscription;
        let stopped = tokio::time::timeout(timeout, async move {
            let (consumed, ()) = tokio::join!(consumer, subscription.stop());
            consumed
        })
        .await
        .context("consumers did not stop in time")?;

        stopped
            .context("event consumer task panicked")?
            .context("event consumer failed")?;
        tracing::info!("Consumers stopped");
        Ok(())
    }
}
