//! Distribution hub
//!
//! Fans state snapshots and spike alerts out to subscribers under the tier
//! cadence rules, and across instances through the broker.
//!
//! The policy lives in a pure `HubCore`: a registry of subscriber slots,
//! each holding a depth-1 pending snapshot (last value wins) and an
//! unbounded pending-alert queue (alerts are never shed here). The async
//! `DistributionHub` shell owns the tick loop, the per-subscriber outbound
//! channels and the broker client, and nothing else touches either.
//!
//! Subscriber lifecycle: connecting → live on first successful delivery;
//! live ↔ reconnecting as the outbound queue fills and drains; closed on
//! disconnect, releasing the slot immediately.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};
use types::ids::ConnectionId;
use types::tier::Tier;

use crate::broker::{Broker, BrokerEvent, DistributionMode};
use crate::config::HubConfig;
use crate::detector::SpikeAlert;
use crate::metrics::PipelineMetrics;
use crate::protocol::{self, Envelope};
use crate::store::SymbolState;
use crate::tiers::TierScheduler;

/// Subscriber connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriberPhase {
    /// Registered, no delivery completed yet.
    Connecting,
    /// Healthy; deliveries flow on cadence.
    Live,
    /// Outbound queue filled; deliveries pause while the client catches up.
    Reconnecting,
}

/// Hub-owned view of one client connection.
#[derive(Debug, Clone)]
pub struct Subscriber {
    pub connection_id: ConnectionId,
    pub tier: Tier,
    /// Client-requested refresh interval; can only slow the tier cadence.
    pub desired_cadence_ms: Option<i64>,
    pub last_delivered_at_ms: Option<i64>,
    pub phase: SubscriberPhase,
}

/// Pending work for one subscriber.
struct SubscriberSlot {
    subscriber: Subscriber,
    /// Depth-1 snapshot queue; a newer snapshot replaces an undelivered one.
    pending_snapshot: Option<Arc<Vec<SymbolState>>>,
    /// Alerts awaiting delivery, oldest first.
    pending_alerts: VecDeque<SpikeAlert>,
}

/// What one tick decided to send to one subscriber.
#[derive(Debug)]
pub struct Delivery {
    pub connection_id: ConnectionId,
    pub tier: Tier,
    pub snapshot: Option<Arc<Vec<SymbolState>>>,
    pub alerts: Vec<SpikeAlert>,
}

/// Pure subscriber registry and queueing policy.
pub struct HubCore {
    scheduler: TierScheduler,
    slots: BTreeMap<ConnectionId, SubscriberSlot>,
}

impl HubCore {
    pub fn new(scheduler: TierScheduler) -> Self {
        Self {
            scheduler,
            slots: BTreeMap::new(),
        }
    }

    /// Register a subscriber in the connecting phase.
    pub fn subscribe(&mut self, tier: Tier, desired_cadence_ms: Option<i64>) -> ConnectionId {
        let connection_id = ConnectionId::new();
        self.slots.insert(
            connection_id,
            SubscriberSlot {
                subscriber: Subscriber {
                    connection_id,
                    tier,
                    desired_cadence_ms,
                    last_delivered_at_ms: None,
                    phase: SubscriberPhase::Connecting,
                },
                pending_snapshot: None,
                pending_alerts: VecDeque::new(),
            },
        );
        connection_id
    }

    /// Remove a subscriber; the terminal state frees everything at once.
    pub fn close(&mut self, connection_id: ConnectionId) -> bool {
        self.slots.remove(&connection_id).is_some()
    }

    pub fn set_phase(&mut self, connection_id: ConnectionId, phase: SubscriberPhase) {
        if let Some(slot) = self.slots.get_mut(&connection_id) {
            slot.subscriber.phase = phase;
        }
    }

    pub fn phase(&self, connection_id: ConnectionId) -> Option<SubscriberPhase> {
        self.slots
            .get(&connection_id)
            .map(|slot| slot.subscriber.phase)
    }

    /// Queue a snapshot for every subscriber, replacing any undelivered
    /// one. Returns how many pending snapshots were overwritten.
    pub fn queue_snapshot(&mut self, rows: &Arc<Vec<SymbolState>>) -> usize {
        let mut coalesced = 0;
        for slot in self.slots.values_mut() {
            if slot.pending_snapshot.replace(Arc::clone(rows)).is_some() {
                coalesced += 1;
            }
        }
        coalesced
    }

    /// Queue a snapshot for one subscriber (the welcome snapshot on
    /// connect).
    pub fn queue_snapshot_for(
        &mut self,
        connection_id: ConnectionId,
        rows: Arc<Vec<SymbolState>>,
    ) -> bool {
        match self.slots.get_mut(&connection_id) {
            Some(slot) => {
                slot.pending_snapshot = Some(rows);
                true
            }
            None => false,
        }
    }

    /// Queue an alert for every subscriber. Returns how many queues it
    /// reached.
    pub fn queue_alert(&mut self, alert: &SpikeAlert) -> usize {
        for slot in self.slots.values_mut() {
            slot.pending_alerts.push_back(alert.clone());
        }
        self.slots.len()
    }

    /// Put alerts a failed dispatch could not send back at the head of the
    /// queue, preserving their order.
    pub fn requeue_alerts(&mut self, connection_id: ConnectionId, alerts: Vec<SpikeAlert>) {
        if let Some(slot) = self.slots.get_mut(&connection_id) {
            for alert in alerts.into_iter().rev() {
                slot.pending_alerts.push_front(alert);
            }
        }
    }

    /// Decide what is due now.
    ///
    /// A subscriber whose cadence has elapsed gets its pending snapshot
    /// and all queued alerts in one delivery, which stamps
    /// `last_delivered_at_ms`. Nothing pending leaves the stamp alone, so
    /// the next data flows as soon as it arrives. Reconnecting
    /// subscribers are skipped and keep accumulating (their snapshot
    /// still coalesces).
    pub fn tick(&mut self, now_ms: i64) -> Vec<Delivery> {
        let mut deliveries = Vec::new();
        for slot in self.slots.values_mut() {
            if slot.subscriber.phase == SubscriberPhase::Reconnecting {
                continue;
            }
            if !self.scheduler.should_deliver(
                slot.subscriber.tier,
                slot.subscriber.desired_cadence_ms,
                slot.subscriber.last_delivered_at_ms,
                now_ms,
            ) {
                continue;
            }

            let snapshot = slot.pending_snapshot.take();
            let alerts: Vec<SpikeAlert> = slot.pending_alerts.drain(..).collect();
            if snapshot.is_none() && alerts.is_empty() {
                continue;
            }
            slot.subscriber.last_delivered_at_ms = Some(now_ms);
            deliveries.push(Delivery {
                connection_id: slot.subscriber.connection_id,
                tier: slot.subscriber.tier,
                snapshot,
                alerts,
            });
        }
        deliveries
    }

    pub fn subscriber(&self, connection_id: ConnectionId) -> Option<Subscriber> {
        self.slots
            .get(&connection_id)
            .map(|slot| slot.subscriber.clone())
    }

    pub fn subscribers(&self) -> Vec<Subscriber> {
        self.slots
            .values()
            .map(|slot| slot.subscriber.clone())
            .collect()
    }

    pub fn subscriber_count(&self) -> usize {
        self.slots.len()
    }
}

/// Async shell around `HubCore`.
///
/// Owns the outbound channel per subscriber and the broker client; the
/// tick loop renders due deliveries into protocol envelopes and pushes
/// them without ever blocking on a slow client.
pub struct DistributionHub {
    config: HubConfig,
    core: Mutex<HubCore>,
    senders: Mutex<BTreeMap<ConnectionId, mpsc::Sender<Envelope>>>,
    broker: Broker,
    metrics: Arc<PipelineMetrics>,
}

impl DistributionHub {
    pub fn new(config: HubConfig, broker: Broker, metrics: Arc<PipelineMetrics>) -> Self {
        let scheduler = TierScheduler::new(config.elite_debounce_ms);
        Self {
            config,
            core: Mutex::new(HubCore::new(scheduler)),
            senders: Mutex::new(BTreeMap::new()),
            broker,
            metrics,
        }
    }

    /// Register a connection; the receiver side belongs to its transport
    /// task.
    pub fn subscribe(
        &self,
        tier: Tier,
        desired_cadence_ms: Option<i64>,
    ) -> (ConnectionId, mpsc::Receiver<Envelope>) {
        let (tx, rx) = mpsc::channel(self.config.outbound_channel_depth);
        let connection_id = {
            let mut core = self.core.lock().unwrap_or_else(|e| e.into_inner());
            core.subscribe(tier, desired_cadence_ms)
        };
        let count = {
            let mut senders = self.senders.lock().unwrap_or_else(|e| e.into_inner());
            senders.insert(connection_id, tx);
            senders.len()
        };
        self.metrics.set_connected_subscribers(count as u64);
        info!(connection_id = %connection_id, tier = %tier, "Subscriber connected");
        (connection_id, rx)
    }

    /// Disconnect: frees the slot and the outbound channel immediately.
    pub fn unsubscribe(&self, connection_id: ConnectionId) {
        let existed = {
            let mut core = self.core.lock().unwrap_or_else(|e| e.into_inner());
            core.close(connection_id)
        };
        let count = {
            let mut senders = self.senders.lock().unwrap_or_else(|e| e.into_inner());
            senders.remove(&connection_id);
            senders.len()
        };
        self.metrics.set_connected_subscribers(count as u64);
        if existed {
            info!(connection_id = %connection_id, "Subscriber closed");
        }
    }

    /// Queue the current table for one just-connected subscriber so it
    /// gets data on its first tick instead of waiting a full cadence.
    pub fn seed_snapshot(&self, connection_id: ConnectionId, rows: Vec<SymbolState>) {
        let mut core = self.core.lock().unwrap_or_else(|e| e.into_inner());
        core.queue_snapshot_for(connection_id, Arc::new(rows));
    }

    /// Publish a fresh snapshot locally and to the other instances.
    pub async fn publish_snapshot(&self, rows: Vec<SymbolState>) {
        let rows = Arc::new(rows);
        let coalesced = {
            let mut core = self.core.lock().unwrap_or_else(|e| e.into_inner());
            core.queue_snapshot(&rows)
        };
        if coalesced > 0 {
            self.metrics.add_snapshots_coalesced(coalesced as u64);
        }
        self.broker_publish(BrokerEvent::Snapshot {
            rows: rows.as_ref().clone(),
        })
        .await;
    }

    /// Publish an alert locally and to the other instances.
    pub async fn publish_alert(&self, alert: SpikeAlert) {
        {
            let mut core = self.core.lock().unwrap_or_else(|e| e.into_inner());
            core.queue_alert(&alert);
        }
        self.broker_publish(BrokerEvent::Alert { alert }).await;
    }

    /// Apply an event published by another instance: local queues only,
    /// never re-published.
    pub fn apply_remote(&self, event: BrokerEvent) {
        let mut core = self.core.lock().unwrap_or_else(|e| e.into_inner());
        match event {
            BrokerEvent::Snapshot { rows } => {
                debug!(rows = rows.len(), "Applying remote snapshot");
                let rows = Arc::new(rows);
                let coalesced = core.queue_snapshot(&rows);
                if coalesced > 0 {
                    self.metrics.add_snapshots_coalesced(coalesced as u64);
                }
            }
            BrokerEvent::Alert { alert } => {
                debug!(symbol = %alert.symbol, "Applying remote alert");
                core.queue_alert(&alert);
            }
        }
    }

    pub fn distribution_mode(&self) -> DistributionMode {
        self.broker.mode()
    }

    pub fn subscriber_count(&self) -> usize {
        let core = self.core.lock().unwrap_or_else(|e| e.into_inner());
        core.subscriber_count()
    }

    pub fn subscriber_phase(&self, connection_id: ConnectionId) -> Option<SubscriberPhase> {
        let core = self.core.lock().unwrap_or_else(|e| e.into_inner());
        core.phase(connection_id)
    }

    /// Run the delivery loop forever. Spawns the broker listener feeding
    /// `apply_remote`.
    pub async fn run(self: Arc<Self>) {
        let (tx, mut rx) = mpsc::channel(256);
        self.broker.spawn_listener(tx);
        let hub = Arc::clone(&self);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                hub.apply_remote(event);
            }
        });

        let mut interval = Duration::from_millis(self.config.tick_interval_ms);
        if interval.is_zero() {
            interval = Duration::from_millis(1);
        }
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            self.run_tick(crate::now_ms());
        }
    }

    /// One delivery evaluation pass. Split from `run` so tests can drive
    /// the clock explicitly.
    pub fn run_tick(&self, now_ms: i64) {
        self.recover_reconnecting();
        let deliveries = {
            let mut core = self.core.lock().unwrap_or_else(|e| e.into_inner());
            core.tick(now_ms)
        };
        for delivery in deliveries {
            self.dispatch(delivery, now_ms);
        }
    }

    /// Move reconnecting subscribers back to live once their outbound
    /// queue has drained to half depth.
    fn recover_reconnecting(&self) {
        let threshold = (self.config.outbound_channel_depth / 2).max(1);
        let mut core = self.core.lock().unwrap_or_else(|e| e.into_inner());
        let senders = self.senders.lock().unwrap_or_else(|e| e.into_inner());
        let recovered: Vec<ConnectionId> = core
            .subscribers()
            .into_iter()
            .filter(|sub| sub.phase == SubscriberPhase::Reconnecting)
            .filter(|sub| {
                senders
                    .get(&sub.connection_id)
                    .map(|tx| tx.capacity() >= threshold)
                    .unwrap_or(false)
            })
            .map(|sub| sub.connection_id)
            .collect();
        for connection_id in recovered {
            debug!(connection_id = %connection_id, "Subscriber recovered");
            core.set_phase(connection_id, SubscriberPhase::Live);
        }
    }

    /// Render and push one delivery without blocking.
    ///
    /// A full queue marks the subscriber reconnecting: the snapshot is
    /// shed (a newer one will be queued), unsent alerts go back to the
    /// head of the queue. A closed queue means the transport died without
    /// an unsubscribe, so the slot is released here.
    fn dispatch(&self, delivery: Delivery, now_ms: i64) {
        let sender = {
            let senders = self.senders.lock().unwrap_or_else(|e| e.into_inner());
            senders.get(&delivery.connection_id).cloned()
        };
        let Some(sender) = sender else {
            let mut core = self.core.lock().unwrap_or_else(|e| e.into_inner());
            core.close(delivery.connection_id);
            return;
        };
        let connection_id = delivery.connection_id;
        let tier = delivery.tier;
        let mut stalled = false;

        if let Some(rows) = delivery.snapshot {
            let envelope = protocol::render_snapshot(tier, &rows, now_ms);
            match sender.try_send(envelope) {
                Ok(()) => self.metrics.record_snapshot_delivered(),
                Err(TrySendError::Full(_)) => {
                    self.metrics.add_snapshots_coalesced(1);
                    stalled = true;
                }
                Err(TrySendError::Closed(_)) => {
                    self.drop_dead_transport(connection_id);
                    return;
                }
            }
        }

        let mut delivered = 0u64;
        let mut alerts = delivery.alerts.into_iter();
        if !stalled {
            while let Some(alert) = alerts.next() {
                let envelope = protocol::render_alert(tier, &alert, now_ms);
                match sender.try_send(envelope) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        let mut rest = vec![alert];
                        rest.extend(alerts.by_ref());
                        let mut core = self.core.lock().unwrap_or_else(|e| e.into_inner());
                        core.requeue_alerts(connection_id, rest);
                        stalled = true;
                        break;
                    }
                    Err(TrySendError::Closed(_)) => {
                        self.drop_dead_transport(connection_id);
                        return;
                    }
                }
            }
        } else {
            let rest: Vec<SpikeAlert> = alerts.collect();
            if !rest.is_empty() {
                let mut core = self.core.lock().unwrap_or_else(|e| e.into_inner());
                core.requeue_alerts(connection_id, rest);
            }
        }
        if delivered > 0 {
            self.metrics.add_alerts_delivered(delivered);
        }

        let mut core = self.core.lock().unwrap_or_else(|e| e.into_inner());
        if stalled {
            warn!(connection_id = %connection_id, "Subscriber queue full; pausing deliveries");
            core.set_phase(connection_id, SubscriberPhase::Reconnecting);
        } else if core.phase(connection_id) == Some(SubscriberPhase::Connecting) {
            core.set_phase(connection_id, SubscriberPhase::Live);
        }
    }

    fn drop_dead_transport(&self, connection_id: ConnectionId) {
        warn!(connection_id = %connection_id, "Subscriber transport closed; releasing slot");
        self.unsubscribe(connection_id);
    }

    async fn broker_publish(&self, event: BrokerEvent) {
        if self.broker.mode() != DistributionMode::Brokered {
            return;
        }
        match self.broker.publish(&event).await {
            Ok(()) => self.metrics.record_broker_publish(),
            Err(e) => {
                warn!(error = %e, "Broker publish failed");
                self.metrics.record_broker_publish_failure();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use types::symbol::Symbol;

    fn make_core() -> HubCore {
        HubCore::new(TierScheduler::new(200))
    }

    fn make_rows(price: i64) -> Arc<Vec<SymbolState>> {
        Arc::new(vec![SymbolState {
            symbol: Symbol::new("BTCUSDT"),
            last_price: Decimal::from(price),
            quote_volume_24h: Decimal::from(2_000_000_000_i64),
            price_change_pct: Decimal::ZERO,
            funding_rate: None,
            mark_price: None,
            open_interest_usd: None,
            updated_at: 0,
        }])
    }

    fn make_alert(n: i64) -> SpikeAlert {
        SpikeAlert::new(
            Symbol::new("BTCUSDT"),
            n,
            8_000_000_000.0,
            2_000_000_000.0,
            4.0,
        )
    }

    #[test]
    fn test_subscribe_starts_connecting() {
        let mut core = make_core();
        let id = core.subscribe(Tier::Pro, None);
        assert_eq!(core.phase(id), Some(SubscriberPhase::Connecting));
        assert_eq!(core.subscriber_count(), 1);
    }

    #[test]
    fn test_snapshot_queue_is_last_value_wins() {
        let mut core = make_core();
        let id = core.subscribe(Tier::Elite, None);

        let mut coalesced = 0;
        for price in 1..=100 {
            coalesced += core.queue_snapshot(&make_rows(price));
        }
        assert_eq!(coalesced, 99, "99 of 100 snapshots overwritten");

        let deliveries = core.tick(1_000);
        assert_eq!(deliveries.len(), 1);
        let rows = deliveries[0].snapshot.as_ref().unwrap();
        assert_eq!(rows[0].last_price, Decimal::from(100), "latest wins");
        assert_eq!(core.subscriber(id).unwrap().last_delivered_at_ms, Some(1_000));
    }

    #[test]
    fn test_alerts_all_delivered_in_order() {
        let mut core = make_core();
        core.subscribe(Tier::Free, None);
        for n in 1..=3 {
            core.queue_alert(&make_alert(n));
        }

        let deliveries = core.tick(0);
        assert_eq!(deliveries.len(), 1);
        let stamps: Vec<i64> = deliveries[0].alerts.iter().map(|a| a.timestamp_ms).collect();
        assert_eq!(stamps, vec![1, 2, 3]);
    }

    #[test]
    fn test_pro_delivery_waits_for_cadence() {
        let mut core = make_core();
        let id = core.subscribe(Tier::Pro, None);

        // First delivery is always due.
        core.queue_snapshot(&make_rows(1));
        assert_eq!(core.tick(0).len(), 1);

        // Inside the 300s cadence nothing moves, alerts included.
        core.queue_snapshot(&make_rows(2));
        core.queue_alert(&make_alert(7));
        assert!(core.tick(1_000).is_empty());

        // Cadence boundary: held snapshot and queued alert go out together.
        let deliveries = core.tick(300_000);
        assert_eq!(deliveries.len(), 1);
        assert!(deliveries[0].snapshot.is_some());
        assert_eq!(deliveries[0].alerts.len(), 1);
        assert_eq!(core.subscriber(id).unwrap().last_delivered_at_ms, Some(300_000));
    }

    #[test]
    fn test_elite_debounce_between_pushes() {
        let mut core = make_core();
        core.subscribe(Tier::Elite, None);

        core.queue_snapshot(&make_rows(1));
        assert_eq!(core.tick(1_000).len(), 1);

        core.queue_snapshot(&make_rows(2));
        assert!(core.tick(1_100).is_empty(), "inside the 200ms floor");
        assert_eq!(core.tick(1_200).len(), 1, "floor reached");
    }

    #[test]
    fn test_reconnecting_accumulates_until_live() {
        let mut core = make_core();
        let id = core.subscribe(Tier::Elite, None);
        core.set_phase(id, SubscriberPhase::Reconnecting);

        core.queue_alert(&make_alert(1));
        core.queue_alert(&make_alert(2));
        core.queue_snapshot(&make_rows(5));
        assert!(core.tick(1_000).is_empty());

        core.set_phase(id, SubscriberPhase::Live);
        let deliveries = core.tick(2_000);
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].alerts.len(), 2);
        assert!(deliveries[0].snapshot.is_some());
    }

    #[test]
    fn test_requeued_alerts_go_first() {
        let mut core = make_core();
        let id = core.subscribe(Tier::Free, None);
        core.queue_alert(&make_alert(3));
        core.requeue_alerts(id, vec![make_alert(1), make_alert(2)]);

        let deliveries = core.tick(0);
        let stamps: Vec<i64> = deliveries[0].alerts.iter().map(|a| a.timestamp_ms).collect();
        assert_eq!(stamps, vec![1, 2, 3]);
    }

    #[test]
    fn test_close_releases_slot() {
        let mut core = make_core();
        let id = core.subscribe(Tier::Pro, None);
        assert!(core.close(id));
        assert_eq!(core.subscriber_count(), 0);
        assert_eq!(core.queue_alert(&make_alert(1)), 0);
    }

    mod shell {
        use super::*;
        use crate::broker::Broker;

        fn make_hub(depth: usize) -> Arc<DistributionHub> {
            let config = HubConfig {
                outbound_channel_depth: depth,
                ..HubConfig::default()
            };
            Arc::new(DistributionHub::new(
                config,
                Broker::local_only(),
                Arc::new(PipelineMetrics::new()),
            ))
        }

        #[tokio::test]
        async fn test_seeded_subscriber_gets_snapshot_and_goes_live() {
            let hub = make_hub(8);
            let (id, mut rx) = hub.subscribe(Tier::Elite, None);
            hub.seed_snapshot(id, make_rows(64_000).as_ref().clone());

            hub.run_tick(1_000);
            let envelope = rx.recv().await.unwrap();
            match envelope {
                Envelope::Snapshot { tier, payload, server_timestamp } => {
                    assert_eq!(tier, Tier::Elite);
                    assert_eq!(server_timestamp, 1_000);
                    assert_eq!(payload.rows.len(), 1);
                }
                other => panic!("expected snapshot, got {other:?}"),
            }
            assert_eq!(hub.subscriber_phase(id), Some(SubscriberPhase::Live));
        }

        #[tokio::test]
        async fn test_alert_published_and_delivered() {
            let hub = make_hub(8);
            let (_id, mut rx) = hub.subscribe(Tier::Pro, None);

            hub.publish_alert(make_alert(5)).await;
            hub.run_tick(2_000);

            let envelope = rx.recv().await.unwrap();
            match envelope {
                Envelope::Alert { tier, payload, .. } => {
                    assert_eq!(tier, Tier::Pro);
                    assert_eq!(payload.multiplier, 4.0);
                }
                other => panic!("expected alert, got {other:?}"),
            }
        }

        #[tokio::test]
        async fn test_dead_transport_releases_subscriber() {
            let hub = make_hub(8);
            let (_id, rx) = hub.subscribe(Tier::Free, None);
            drop(rx);

            hub.publish_alert(make_alert(1)).await;
            hub.run_tick(1_000);
            assert_eq!(hub.subscriber_count(), 0);
        }

        #[tokio::test]
        async fn test_full_queue_pauses_then_recovers() {
            let hub = make_hub(1);
            let (id, mut rx) = hub.subscribe(Tier::Elite, None);

            hub.publish_alert(make_alert(1)).await;
            hub.publish_alert(make_alert(2)).await;
            hub.run_tick(1_000);

            // First alert filled the depth-1 queue, second was requeued.
            assert_eq!(hub.subscriber_phase(id), Some(SubscriberPhase::Reconnecting));

            // Client drains; next tick recovers and sends the rest.
            let first = rx.recv().await.unwrap();
            assert!(matches!(first, Envelope::Alert { .. }));
            hub.run_tick(2_000);
            assert_eq!(hub.subscriber_phase(id), Some(SubscriberPhase::Live));
            let second = rx.recv().await.unwrap();
            match second {
                Envelope::Alert { payload, .. } => assert_eq!(payload.timestamp_ms, 2),
                other => panic!("expected alert, got {other:?}"),
            }
        }

        #[tokio::test]
        async fn test_remote_events_fan_out_locally() {
            let hub = make_hub(8);
            let (_id, mut rx) = hub.subscribe(Tier::Elite, None);

            hub.apply_remote(BrokerEvent::Alert { alert: make_alert(9) });
            hub.run_tick(1_000);

            let envelope = rx.recv().await.unwrap();
            assert!(matches!(envelope, Envelope::Alert { .. }));
        }
    }
}
