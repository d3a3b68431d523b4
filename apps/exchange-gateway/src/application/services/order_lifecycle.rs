//! Order Lifecycle Coordinator
//!
//! Single owner of the `cl_ord_id -> OrderStateInfo` table. Outbound order
//! instructions go through the venue's [`OrderGatewayPort`] behind the
//! resilience registry; venue answers come back as canonical order events
//! and move the table through [`OrderStateMachine`]. After a reconnect the
//! venue's REST snapshots are replayed through the same event path.
//!
//! The table lock is held for state mutation only, never across a network
//! call or a publish.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use crate::application::ports::{
    EventPublisherPort, OrderGatewayPort, ReconciliationPort, SessionEvent, SnapshotKind,
    SnapshotProtocol,
};
use crate::domain::canonical::{CanonicalEvent, OrderEvent};
use crate::domain::order_execution::{
    Order, OrderError, OrderEventKind, OrderRequest, OrderSide, OrderState, OrderStateInfo,
    OrderStateMachine, OrderType, Transition,
};
use crate::domain::shared::{ClOrdId, Venue, now_micros};
use crate::error::{GatewayError, GatewayResult};
use crate::observability::metrics;
use crate::resilience::ResilienceManager;

/// Default capacity of the in-process update broadcast.
pub const DEFAULT_UPDATE_CAPACITY: usize = 1024;

/// Collaborators for one venue.
#[derive(Clone)]
pub struct VenueLink {
    /// Outbound order entry.
    pub orders: Arc<dyn OrderGatewayPort>,
    /// REST executor used for reconciliation.
    pub rest: Arc<dyn ReconciliationPort>,
    /// Venue snapshot queries and decoding.
    pub snapshots: Arc<dyn SnapshotProtocol>,
}

impl fmt::Debug for VenueLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VenueLink")
            .field("venue", &self.orders.venue())
            .finish_non_exhaustive()
    }
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconciliationReport {
    /// Venue reconciled.
    pub venue: Venue,
    /// Open orders the venue listed.
    pub open_orders: usize,
    /// Positions published.
    pub positions: usize,
    /// Balances published.
    pub balances: usize,
    /// Locally open orders the venue no longer lists.
    pub missing_at_venue: Vec<ClOrdId>,
    /// Snapshot failures, one per kind.
    pub errors: Vec<String>,
}

impl ReconciliationReport {
    fn new(venue: Venue) -> Self {
        Self {
            venue,
            open_orders: 0,
            positions: 0,
            balances: 0,
            missing_at_venue: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Number of discrepancies found.
    #[must_use]
    pub fn mismatches(&self) -> usize {
        self.missing_at_venue.len()
    }

    /// Check if every snapshot loaded and nothing diverged.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.missing_at_venue.is_empty() && self.errors.is_empty()
    }
}

/// Result of applying one order event to the table.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderUpdate {
    /// State before the event.
    pub previous: OrderState,
    /// State after the event.
    pub state: OrderState,
    /// Transitions attempted, in order.
    pub transitions: Vec<Transition>,
    /// Quantity the event added to the fill.
    pub fill_delta: f64,
    /// Whether the entry was created from the event.
    pub synthesized: bool,
}

impl OrderUpdate {
    /// Check if the event changed anything.
    #[must_use]
    pub fn changed(&self) -> bool {
        self.synthesized || self.fill_delta > 0.0 || self.transitions.iter().any(Transition::is_applied)
    }
}

/// Coordinates order state across venues.
pub struct OrderLifecycleCoordinator {
    orders: Mutex<HashMap<ClOrdId, OrderStateInfo>>,
    venues: RwLock<HashMap<Venue, VenueLink>>,
    resilience: Arc<ResilienceManager>,
    publisher: Arc<dyn EventPublisherPort>,
    updates: broadcast::Sender<CanonicalEvent>,
}

impl OrderLifecycleCoordinator {
    /// Create a coordinator with no venues registered.
    #[must_use]
    pub fn new(resilience: Arc<ResilienceManager>, publisher: Arc<dyn EventPublisherPort>) -> Self {
        Self::with_capacity(resilience, publisher, DEFAULT_UPDATE_CAPACITY)
    }

    /// Create with a custom broadcast capacity.
    #[must_use]
    pub fn with_capacity(
        resilience: Arc<ResilienceManager>,
        publisher: Arc<dyn EventPublisherPort>,
        capacity: usize,
    ) -> Self {
        let (updates, _) = broadcast::channel(capacity.max(1));
        Self {
            orders: Mutex::new(HashMap::new()),
            venues: RwLock::new(HashMap::new()),
            resilience,
            publisher,
            updates,
        }
    }

    /// Attach a venue's collaborators, replacing any previous link.
    pub fn register_venue(&self, venue: Venue, link: VenueLink) {
        tracing::info!(venue = %venue, "Venue registered with order coordinator");
        self.venues.write().insert(venue, link);
    }

    /// Venues with a registered link.
    #[must_use]
    pub fn venues(&self) -> Vec<Venue> {
        let mut venues: Vec<_> = self.venues.read().keys().copied().collect();
        venues.sort_by_key(Venue::as_str);
        venues
    }

    /// Receive every event the coordinator applied or forwarded.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<CanonicalEvent> {
        self.updates.subscribe()
    }

    fn link(&self, venue: Venue) -> GatewayResult<VenueLink> {
        self.venues.read().get(&venue).cloned().ok_or_else(|| {
            GatewayError::validation(format!("venue {venue} is not configured"))
                .with_context("venue", venue.as_str())
        })
    }

    fn order_service(venue: Venue) -> String {
        format!("{venue}.orders")
    }

    fn rest_service(venue: Venue) -> String {
        format!("{venue}.rest")
    }

    // ------------------------------------------------------------------
    // Outbound
    // ------------------------------------------------------------------

    /// Submit a new order.
    ///
    /// Returns once the venue accepted the request for processing; the
    /// order's fate arrives later as order events.
    ///
    /// # Errors
    ///
    /// Validation errors for bad parameters, an unknown venue or a reused
    /// `cl_ord_id`; a rate-limit error when the venue budget is spent; the
    /// final transport error otherwise, after the order has been rejected.
    pub async fn send_order(&self, request: OrderRequest) -> GatewayResult<()> {
        request.validate()?;
        let link = self.link(request.venue)?;
        if self.orders.lock().contains_key(&request.cl_ord_id) {
            return Err(duplicate(&request.cl_ord_id).into());
        }

        let venue = request.venue;
        let service = Self::order_service(venue);
        self.resilience.check_rate_limit(&service)?;

        {
            let mut orders = self.orders.lock();
            if orders.contains_key(&request.cl_ord_id) {
                return Err(duplicate(&request.cl_ord_id).into());
            }
            let order = Order::from_request(request.clone(), now_micros());
            orders.insert(request.cl_ord_id.clone(), OrderStateInfo::new(order));
        }
        self.refresh_open_gauge(venue);

        tracing::info!(
            venue = %venue,
            cl_ord_id = %request.cl_ord_id,
            symbol = %request.symbol,
            side = %request.side,
            order_type = %request.order_type,
            quantity = request.quantity,
            price = request.price,
            "Sending order"
        );

        let payload = serde_json::to_string(&request).ok();
        let started = Instant::now();
        let (result, attempts) = self
            .resilience
            .execute_counted(&service, "send_order", payload, || {
                link.orders.send_order(&request)
            })
            .await;
        self.note_attempts(&request.cl_ord_id, attempts);
        record_request(venue, "send_order", &result, started);

        if let Err(err) = &result {
            tracing::error!(
                venue = %venue,
                cl_ord_id = %request.cl_ord_id,
                attempts,
                error = %err,
                "Order send failed, rejecting locally"
            );
            let mut reject = OrderEvent::new(
                venue,
                request.cl_ord_id.clone(),
                request.symbol.clone(),
                OrderEventKind::Reject,
                now_micros(),
            );
            reject.side = Some(request.side);
            reject.order_qty = Some(request.quantity);
            reject.order_price = Some(request.price);
            reject.reason = Some(err.to_string());
            self.on_order_event(reject).await;
        }
        result
    }

    /// Cancel a live order.
    ///
    /// # Errors
    ///
    /// Validation errors for unknown or terminal orders; rate-limit and
    /// transport errors from the venue call.
    pub async fn cancel_order(&self, cl_ord_id: &ClOrdId) -> GatewayResult<()> {
        let order = self.live_order(cl_ord_id)?;
        let venue = order.venue;
        let link = self.link(venue)?;
        let service = Self::order_service(venue);
        self.resilience.check_rate_limit(&service)?;

        tracing::info!(venue = %venue, cl_ord_id = %cl_ord_id, "Cancelling order");

        let started = Instant::now();
        let (result, attempts) = self
            .resilience
            .execute_counted(&service, "cancel_order", Some(cl_ord_id.to_string()), || {
                link.orders.cancel_order(&order)
            })
            .await;
        self.note_attempts(cl_ord_id, attempts);
        record_request(venue, "cancel_order", &result, started);
        result
    }

    /// Amend quantity and optionally price of a live order.
    ///
    /// # Errors
    ///
    /// Validation errors for bad parameters, unknown or terminal orders;
    /// rate-limit and transport errors from the venue call.
    pub async fn modify_order(
        &self,
        cl_ord_id: &ClOrdId,
        new_quantity: f64,
        new_price: Option<f64>,
    ) -> GatewayResult<()> {
        if !new_quantity.is_finite() || new_quantity <= 0.0 {
            return Err(OrderError::invalid("quantity", "must be positive").into());
        }
        let order = self.live_order(cl_ord_id)?;
        if let Some(price) = new_price {
            if !price.is_finite() || price < 0.0 {
                return Err(OrderError::invalid("price", "must not be negative").into());
            }
            if order.order_type.requires_limit_price() && price <= 0.0 {
                return Err(OrderError::invalid(
                    "price",
                    format!("{} orders require a price", order.order_type),
                )
                .into());
            }
        }

        let venue = order.venue;
        let link = self.link(venue)?;
        let service = Self::order_service(venue);
        self.resilience.check_rate_limit(&service)?;

        tracing::info!(
            venue = %venue,
            cl_ord_id = %cl_ord_id,
            new_quantity,
            new_price = ?new_price,
            "Modifying order"
        );

        let started = Instant::now();
        let (result, attempts) = self
            .resilience
            .execute_counted(&service, "modify_order", Some(cl_ord_id.to_string()), || {
                link.orders.modify_order(&order, new_quantity, new_price)
            })
            .await;
        self.note_attempts(cl_ord_id, attempts);
        record_request(venue, "modify_order", &result, started);
        result
    }

    fn live_order(&self, cl_ord_id: &ClOrdId) -> GatewayResult<Order> {
        let orders = self.orders.lock();
        let info = orders.get(cl_ord_id).ok_or_else(|| OrderError::NotFound {
            cl_ord_id: cl_ord_id.to_string(),
        })?;
        if info.state.is_terminal() {
            return Err(OrderError::AlreadyTerminal {
                cl_ord_id: cl_ord_id.to_string(),
                state: info.state,
            }
            .into());
        }
        Ok(info.order.clone())
    }

    fn note_attempts(&self, cl_ord_id: &ClOrdId, attempts: u32) {
        if let Some(info) = self.orders.lock().get_mut(cl_ord_id) {
            info.retry_count += attempts.saturating_sub(1);
        }
    }

    // ------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------

    /// Route a canonical record from a session.
    pub async fn handle_event(&self, event: CanonicalEvent) {
        match event {
            CanonicalEvent::Order(order) => {
                self.on_order_event(order).await;
            }
            other => self.forward(other).await,
        }
    }

    /// Apply a venue order event to the table, then publish it.
    pub async fn on_order_event(&self, event: OrderEvent) -> OrderUpdate {
        metrics::record_order_event(event.venue.as_str(), event.kind.as_str());

        let update = {
            let mut orders = self.orders.lock();
            let mut synthesized = false;
            let info = orders.entry(event.cl_ord_id.clone()).or_insert_with(|| {
                synthesized = true;
                OrderStateInfo::new(synthesize_order(&event))
            });
            apply_event(info, &event, now_micros(), synthesized)
        };

        if update.synthesized {
            tracing::info!(
                venue = %event.venue,
                cl_ord_id = %event.cl_ord_id,
                symbol = %event.symbol,
                "Tracking order first seen on venue stream"
            );
        }
        for transition in &update.transitions {
            match *transition {
                Transition::Applied { from, to } => tracing::debug!(
                    venue = %event.venue,
                    cl_ord_id = %event.cl_ord_id,
                    from = %from,
                    to = %to,
                    "Order state changed"
                ),
                Transition::Ignored { state, kind } if is_redundant(state, kind) => {
                    tracing::debug!(
                        venue = %event.venue,
                        cl_ord_id = %event.cl_ord_id,
                        state = %state,
                        "Redundant acknowledgement"
                    );
                }
                Transition::Ignored { state, kind } => {
                    tracing::warn!(
                        venue = %event.venue,
                        cl_ord_id = %event.cl_ord_id,
                        state = %state,
                        event = kind.as_str(),
                        "Ignoring order event invalid in current state"
                    );
                    metrics::record_ignored_transition(
                        event.venue.as_str(),
                        state.as_str(),
                        kind.as_str(),
                    );
                }
            }
        }
        self.refresh_open_gauge(event.venue);

        let changed = update.changed();
        let canonical = CanonicalEvent::Order(event);
        if let Err(err) = self.publisher.publish_event(canonical.clone()).await {
            tracing::warn!(error = %err, "Failed to publish order event");
        }
        if changed {
            let _ = self.updates.send(canonical);
        }
        update
    }

    async fn forward(&self, event: CanonicalEvent) {
        if let Err(err) = self.publisher.publish_event(event.clone()).await {
            tracing::warn!(
                venue = %event.venue(),
                kind = event.kind(),
                error = %err,
                "Failed to publish event"
            );
        }
        let _ = self.updates.send(event);
    }

    fn refresh_open_gauge(&self, venue: Venue) {
        let open = self
            .orders
            .lock()
            .values()
            .filter(|info| info.order.venue == venue && info.state.is_open())
            .count();
        metrics::update_open_orders(venue.as_str(), open);
    }

    // ------------------------------------------------------------------
    // Reconciliation
    // ------------------------------------------------------------------

    /// Resynchronize with the venue's REST snapshots.
    ///
    /// Open orders go through the normal event path, positions and balances
    /// are published, and locally working orders the venue no longer lists
    /// are reported. A failing snapshot is recorded in the report and the
    /// others still run.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the venue is not registered.
    pub async fn reconcile(&self, venue: Venue) -> GatewayResult<ReconciliationReport> {
        let link = self.link(venue)?;
        let service = Self::rest_service(venue);
        let mut report = ReconciliationReport::new(venue);

        tracing::info!(venue = %venue, "Starting reconciliation");

        for kind in SnapshotKind::ALL {
            let query = link.snapshots.snapshot_query(kind);
            let body = self
                .resilience
                .execute(&service, kind.as_str(), None, || link.rest.request(&query))
                .await;
            let events = match body.and_then(|body| link.snapshots.decode_snapshot(kind, &body)) {
                Ok(events) => events,
                Err(err) => {
                    tracing::warn!(
                        venue = %venue,
                        snapshot = kind.as_str(),
                        error = %err,
                        "Reconciliation snapshot failed"
                    );
                    report.errors.push(format!("{}: {err}", kind.as_str()));
                    continue;
                }
            };

            match kind {
                SnapshotKind::OpenOrders => {
                    let mut listed = HashSet::new();
                    for event in events {
                        if let CanonicalEvent::Order(order) = event {
                            listed.insert(order.cl_ord_id.clone());
                            self.on_order_event(order).await;
                        }
                    }
                    report.open_orders = listed.len();
                    report.missing_at_venue = self.unlisted_orders(venue, &listed);
                }
                SnapshotKind::Positions | SnapshotKind::Balances => {
                    let count = events.len();
                    for event in events {
                        self.forward(event).await;
                    }
                    if kind == SnapshotKind::Positions {
                        report.positions = count;
                    } else {
                        report.balances = count;
                    }
                }
            }
        }

        for cl_ord_id in &report.missing_at_venue {
            tracing::warn!(
                venue = %venue,
                cl_ord_id = %cl_ord_id,
                "Order open locally but not listed by venue"
            );
        }
        metrics::record_reconciliation(venue.as_str(), report.mismatches());
        tracing::info!(
            venue = %venue,
            open_orders = report.open_orders,
            positions = report.positions,
            balances = report.balances,
            mismatches = report.mismatches(),
            errors = report.errors.len(),
            "Reconciliation complete"
        );
        Ok(report)
    }

    /// Reconcile `venue`, logging instead of returning a failure.
    ///
    /// Run when a venue comes up and after every reconnect so orders that
    /// went live while the gateway was not listening are tracked.
    pub async fn resync(&self, venue: Venue) -> Option<ReconciliationReport> {
        match self.reconcile(venue).await {
            Ok(report) => Some(report),
            Err(err) => {
                tracing::error!(venue = %venue, error = %err, "Reconciliation failed");
                None
            }
        }
    }

    fn unlisted_orders(&self, venue: Venue, listed: &HashSet<ClOrdId>) -> Vec<ClOrdId> {
        let mut missing: Vec<_> = self
            .orders
            .lock()
            .values()
            .filter(|info| {
                info.order.venue == venue
                    && matches!(
                        info.state,
                        OrderState::Acknowledged | OrderState::PartiallyFilled
                    )
                    && !listed.contains(&info.order.cl_ord_id)
            })
            .map(|info| info.order.cl_ord_id.clone())
            .collect();
        missing.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        missing
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Current state of one order.
    #[must_use]
    pub fn query_order(&self, cl_ord_id: &ClOrdId) -> Option<OrderStateInfo> {
        self.orders.lock().get(cl_ord_id).cloned()
    }

    /// Every tracked order, oldest first.
    #[must_use]
    pub fn orders(&self) -> Vec<OrderStateInfo> {
        let mut all: Vec<_> = self.orders.lock().values().cloned().collect();
        all.sort_by_key(|info| info.order.created_at_us);
        all
    }

    /// Orders not yet in a terminal state, oldest first.
    #[must_use]
    pub fn open_orders(&self) -> Vec<OrderStateInfo> {
        let mut open: Vec<_> = self
            .orders
            .lock()
            .values()
            .filter(|info| info.state.is_open())
            .cloned()
            .collect();
        open.sort_by_key(|info| info.order.created_at_us);
        open
    }

    // ------------------------------------------------------------------
    // Session pump
    // ------------------------------------------------------------------

    /// Consume session notifications until cancelled or every sender is gone.
    ///
    /// Records are applied in receipt order. Each reconnect triggers a
    /// reconciliation pass on its own task so the stream keeps draining.
    pub async fn run(
        self: Arc<Self>,
        mut events: mpsc::Receiver<SessionEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::info!("Order coordinator stopping");
                    break;
                }
                next = events.recv() => {
                    let Some(event) = next else {
                        tracing::info!("Session channel closed, order coordinator stopping");
                        break;
                    };
                    self.on_session_event(event).await;
                }
            }
        }
    }

    async fn on_session_event(self: &Arc<Self>, event: SessionEvent) {
        match event {
            SessionEvent::Record { event, .. } => self.handle_event(event).await,
            SessionEvent::Reconnected {
                venue,
                channel,
                attempts,
            } => {
                tracing::info!(
                    venue = %venue,
                    channel = %channel,
                    attempts,
                    "Session reconnected, reconciling"
                );
                let coordinator = Arc::clone(self);
                tokio::spawn(async move {
                    coordinator.resync(venue).await;
                });
            }
            SessionEvent::Connected { venue, channel } => {
                tracing::info!(venue = %venue, channel = %channel, "Session connected");
            }
            SessionEvent::ConnectFailed {
                venue,
                channel,
                error,
            } => {
                tracing::error!(venue = %venue, channel = %channel, error = %error, "Session connect failed");
            }
            SessionEvent::Disconnected {
                venue,
                channel,
                reason,
            } => {
                tracing::warn!(venue = %venue, channel = %channel, reason = %reason, "Session disconnected");
            }
            SessionEvent::GaveUp {
                venue,
                channel,
                attempts,
            } => {
                tracing::error!(
                    venue = %venue,
                    channel = %channel,
                    attempts,
                    "Session gave up reconnecting"
                );
            }
        }
    }
}

impl fmt::Debug for OrderLifecycleCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderLifecycleCoordinator")
            .field("orders", &self.orders.lock().len())
            .field("venues", &self.venues())
            .finish_non_exhaustive()
    }
}

fn duplicate(cl_ord_id: &ClOrdId) -> OrderError {
    OrderError::DuplicateClOrdId {
        cl_ord_id: cl_ord_id.to_string(),
    }
}

fn record_request(venue: Venue, operation: &str, result: &GatewayResult<()>, started: Instant) {
    let status = if result.is_ok() { "ok" } else { "error" };
    metrics::record_order_request(
        venue.as_str(),
        operation,
        status,
        started.elapsed().as_secs_f64(),
    );
}

/// An ACK for an order already past `PENDING`: replays and amend acks.
const fn is_redundant(state: OrderState, kind: OrderEventKind) -> bool {
    matches!(kind, OrderEventKind::Ack)
        && matches!(state, OrderState::Acknowledged | OrderState::PartiallyFilled)
}

fn synthesize_order(event: &OrderEvent) -> Order {
    let price = event.order_price.filter(|p| *p > 0.0).unwrap_or(0.0);
    Order {
        cl_ord_id: event.cl_ord_id.clone(),
        venue_order_id: event.venue_order_id.clone(),
        venue: event.venue,
        symbol: event.symbol.clone(),
        side: event.side.unwrap_or(OrderSide::Buy),
        quantity: event.order_qty.filter(|q| *q > 0.0).unwrap_or(0.0),
        price,
        order_type: if price > 0.0 {
            OrderType::Limit
        } else {
            OrderType::Market
        },
        created_at_us: event.timestamp_us,
        updated_at_us: event.timestamp_us,
    }
}

fn step(info: &mut OrderStateInfo, kind: OrderEventKind, now_us: i64) -> Transition {
    let transition = OrderStateMachine::apply(info.state, kind);
    if let Transition::Applied { to, .. } = transition {
        info.state = to;
        info.touch(now_us);
    }
    transition
}

/// Apply `event` to `info`.
///
/// FILL on a `PENDING` order first applies the implied ACK. A fill moves
/// `ACKNOWLEDGED` to `PARTIALLY_FILLED`, and completing the quantity walks
/// on to `FILLED`. Duplicate cumulative fills change nothing.
fn apply_event(
    info: &mut OrderStateInfo,
    event: &OrderEvent,
    now_us: i64,
    synthesized: bool,
) -> OrderUpdate {
    let previous = info.state;
    let mut transitions = Vec::with_capacity(2);
    let mut fill_delta = 0.0;

    if info.order.venue_order_id.is_none() {
        info.order.venue_order_id.clone_from(&event.venue_order_id);
    }
    if !info.state.is_terminal() {
        if let Some(qty) = event.order_qty.filter(|q| q.is_finite() && *q > 0.0) {
            info.order.quantity = qty;
        }
        if let Some(price) = event.order_price.filter(|p| p.is_finite() && *p > 0.0) {
            info.order.price = price;
        }
    }

    match event.kind {
        OrderEventKind::Fill => {
            if info.state == OrderState::Pending {
                transitions.push(step(info, OrderEventKind::Ack, now_us));
            }
            if info.state.is_terminal() {
                transitions.push(Transition::Ignored {
                    state: info.state,
                    kind: OrderEventKind::Fill,
                });
            } else {
                fill_delta = info.record_fill(event.fill(), now_us);
                if info.state == OrderState::Acknowledged && info.filled_qty > 0.0 {
                    transitions.push(step(info, OrderEventKind::Fill, now_us));
                }
                if info.state == OrderState::PartiallyFilled && info.is_fully_filled() {
                    transitions.push(step(info, OrderEventKind::Fill, now_us));
                }
            }
        }
        kind => {
            let transition = step(info, kind, now_us);
            if transition.is_applied()
                && matches!(kind, OrderEventKind::Cancel | OrderEventKind::Reject)
            {
                info.reason.clone_from(&event.reason);
            }
            transitions.push(transition);
        }
    }

    OrderUpdate {
        previous,
        state: info.state,
        transitions,
        fill_delta,
        synthesized,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::{Value, json};

    use crate::application::ports::{
        ChannelKind, EventPublishError, HttpMethod, NoOpEventPublisher, RestQuery,
    };
    use crate::domain::canonical::{AccountBalance, PositionUpdate};
    use crate::error::ErrorKind;
    use crate::resilience::{ResilienceConfig, RetryPolicy};

    // ------------------------------------------------------------------
    // Hand-written collaborators
    // ------------------------------------------------------------------

    #[derive(Default)]
    struct MockGateway {
        sends: Mutex<Vec<OrderRequest>>,
        cancels: Mutex<Vec<ClOrdId>>,
        modifies: Mutex<Vec<(ClOrdId, f64, Option<f64>)>>,
        failures: Mutex<Option<ErrorKind>>,
        calls: AtomicU32,
    }

    impl MockGateway {
        fn failing(kind: ErrorKind) -> Self {
            let gateway = Self::default();
            *gateway.failures.lock() = Some(kind);
            gateway
        }

        fn outcome(&self) -> GatewayResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match *self.failures.lock() {
                Some(ErrorKind::NetworkError) => Err(GatewayError::network("connection reset")),
                Some(ErrorKind::ApiError) => Err(GatewayError::api("insufficient margin")),
                Some(_) => Err(GatewayError::system("unexpected")),
                None => Ok(()),
            }
        }
    }

    #[async_trait]
    impl OrderGatewayPort for MockGateway {
        fn venue(&self) -> Venue {
            Venue::Binance
        }

        async fn send_order(&self, request: &OrderRequest) -> GatewayResult<()> {
            self.sends.lock().push(request.clone());
            self.outcome()
        }

        async fn cancel_order(&self, order: &Order) -> GatewayResult<()> {
            self.cancels.lock().push(order.cl_ord_id.clone());
            self.outcome()
        }

        async fn modify_order(
            &self,
            order: &Order,
            new_quantity: f64,
            new_price: Option<f64>,
        ) -> GatewayResult<()> {
            self.modifies
                .lock()
                .push((order.cl_ord_id.clone(), new_quantity, new_price));
            self.outcome()
        }
    }

    #[derive(Default)]
    struct MockRest {
        fail_path: Option<&'static str>,
        requests: Mutex<Vec<RestQuery>>,
    }

    #[async_trait]
    impl ReconciliationPort for MockRest {
        async fn request(&self, query: &RestQuery) -> GatewayResult<Value> {
            self.requests.lock().push(query.clone());
            if self.fail_path == Some(query.path.as_str()) {
                return Err(GatewayError::api("forbidden"));
            }
            Ok(json!({ "path": query.path }))
        }
    }

    /// Serves canned snapshot records regardless of body.
    #[derive(Default)]
    struct MockSnapshots {
        open_orders: Vec<OrderEvent>,
        positions: Vec<PositionUpdate>,
        balances: Vec<AccountBalance>,
    }

    impl SnapshotProtocol for MockSnapshots {
        fn snapshot_query(&self, kind: SnapshotKind) -> RestQuery {
            RestQuery::get(format!("/{}", kind.as_str())).signed()
        }

        fn decode_snapshot(
            &self,
            kind: SnapshotKind,
            _body: &Value,
        ) -> GatewayResult<Vec<CanonicalEvent>> {
            Ok(match kind {
                SnapshotKind::OpenOrders => self
                    .open_orders
                    .iter()
                    .cloned()
                    .map(CanonicalEvent::Order)
                    .collect(),
                SnapshotKind::Positions => self
                    .positions
                    .iter()
                    .cloned()
                    .map(CanonicalEvent::Position)
                    .collect(),
                SnapshotKind::Balances => self
                    .balances
                    .iter()
                    .cloned()
                    .map(CanonicalEvent::Balance)
                    .collect(),
            })
        }
    }

    #[derive(Default)]
    struct RecordingPublisher {
        events: Mutex<Vec<CanonicalEvent>>,
    }

    #[async_trait]
    impl EventPublisherPort for RecordingPublisher {
        async fn publish_events(
            &self,
            events: Vec<CanonicalEvent>,
        ) -> Result<(), EventPublishError> {
            self.events.lock().extend(events);
            Ok(())
        }
    }

    // ------------------------------------------------------------------
    // Fixtures
    // ------------------------------------------------------------------

    fn fast_resilience() -> Arc<ResilienceManager> {
        Arc::new(ResilienceManager::new(ResilienceConfig {
            retry: RetryPolicy {
                max_retries: 2,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
                backoff_multiplier: 1.0,
                jitter_factor: 0.0,
            },
            rate_limit_per_second: 1_000,
            ..ResilienceConfig::default()
        }))
    }

    struct Harness {
        coordinator: Arc<OrderLifecycleCoordinator>,
        gateway: Arc<MockGateway>,
        rest: Arc<MockRest>,
        publisher: Arc<RecordingPublisher>,
    }

    fn harness_with(gateway: MockGateway, rest: MockRest, snapshots: MockSnapshots) -> Harness {
        let gateway = Arc::new(gateway);
        let rest = Arc::new(rest);
        let publisher = Arc::new(RecordingPublisher::default());
        let coordinator = Arc::new(OrderLifecycleCoordinator::new(
            fast_resilience(),
            Arc::clone(&publisher) as Arc<dyn EventPublisherPort>,
        ));
        coordinator.register_venue(
            Venue::Binance,
            VenueLink {
                orders: Arc::clone(&gateway) as Arc<dyn OrderGatewayPort>,
                rest: Arc::clone(&rest) as Arc<dyn ReconciliationPort>,
                snapshots: Arc::new(snapshots),
            },
        );
        Harness {
            coordinator,
            gateway,
            rest,
            publisher,
        }
    }

    fn harness() -> Harness {
        harness_with(
            MockGateway::default(),
            MockRest::default(),
            MockSnapshots::default(),
        )
    }

    fn request(id: &str) -> OrderRequest {
        OrderRequest {
            cl_ord_id: ClOrdId::new(id),
            venue: Venue::Binance,
            symbol: "BTCUSDT".into(),
            side: OrderSide::Buy,
            order_type: OrderType::Limit,
            quantity: 0.1,
            price: 50_000.0,
        }
    }

    fn event(id: &str, kind: OrderEventKind) -> OrderEvent {
        OrderEvent::new(Venue::Binance, ClOrdId::new(id), "BTCUSDT", kind, 1_000)
    }

    fn fill(id: &str, qty: f64, price: f64) -> OrderEvent {
        let mut e = event(id, OrderEventKind::Fill);
        e.fill_qty = qty;
        e.fill_price = price;
        e
    }

    // ------------------------------------------------------------------
    // Outbound
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn send_records_pending_entry() {
        let h = harness();
        h.coordinator.send_order(request("c-1")).await.unwrap();

        let info = h.coordinator.query_order(&ClOrdId::new("c-1")).unwrap();
        assert_eq!(info.state, OrderState::Pending);
        assert_eq!(info.retry_count, 0);
        assert_eq!(h.gateway.sends.lock().len(), 1);
        assert_eq!(h.coordinator.open_orders().len(), 1);
    }

    #[tokio::test]
    async fn invalid_request_never_reaches_venue() {
        let h = harness();
        let mut bad = request("c-1");
        bad.quantity = 0.0;

        let err = h.coordinator.send_order(bad).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationError);
        assert!(h.gateway.sends.lock().is_empty());
        assert!(h.coordinator.orders().is_empty());
    }

    #[tokio::test]
    async fn duplicate_cl_ord_id_is_refused() {
        let h = harness();
        h.coordinator.send_order(request("c-1")).await.unwrap();
        let err = h.coordinator.send_order(request("c-1")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationError);
        assert_eq!(err.context_value("cl_ord_id"), Some("c-1"));
        assert_eq!(h.gateway.sends.lock().len(), 1);
    }

    #[tokio::test]
    async fn unknown_venue_is_a_validation_error() {
        let h = harness();
        let mut req = request("c-1");
        req.venue = Venue::Deribit;
        let err = h.coordinator.send_order(req).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationError);
    }

    #[tokio::test]
    async fn failed_send_is_rejected_and_published() {
        let h = harness_with(
            MockGateway::failing(ErrorKind::NetworkError),
            MockRest::default(),
            MockSnapshots::default(),
        );
        let mut updates = h.coordinator.subscribe();

        let err = h.coordinator.send_order(request("c-1")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NetworkError);
        assert_eq!(h.gateway.calls.load(Ordering::SeqCst), 3);

        let info = h.coordinator.query_order(&ClOrdId::new("c-1")).unwrap();
        assert_eq!(info.state, OrderState::Rejected);
        assert_eq!(info.retry_count, 2);
        assert!(info.reason.unwrap().contains("connection reset"));

        let published = h.publisher.events.lock().clone();
        assert!(matches!(
            &published[..],
            [CanonicalEvent::Order(e)] if e.kind == OrderEventKind::Reject
        ));
        assert!(matches!(
            updates.try_recv(),
            Ok(CanonicalEvent::Order(e)) if e.kind == OrderEventKind::Reject
        ));
        assert_eq!(h.coordinator.resilience.dead_letters().len(), 1);
    }

    #[tokio::test]
    async fn api_errors_are_not_retried() {
        let h = harness_with(
            MockGateway::failing(ErrorKind::ApiError),
            MockRest::default(),
            MockSnapshots::default(),
        );
        let err = h.coordinator.send_order(request("c-1")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ApiError);
        assert_eq!(h.gateway.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausted_rate_limit_blocks_send() {
        let gateway = Arc::new(MockGateway::default());
        let resilience = Arc::new(ResilienceManager::new(ResilienceConfig::default()));
        resilience.configure_service(
            "binance.orders",
            crate::resilience::ServiceLimits {
                circuit_breaker: crate::resilience::CircuitBreakerConfig::default(),
                rate_limit_per_second: 1,
            },
        );
        let coordinator =
            OrderLifecycleCoordinator::new(resilience, Arc::new(NoOpEventPublisher));
        coordinator.register_venue(
            Venue::Binance,
            VenueLink {
                orders: Arc::clone(&gateway) as Arc<dyn OrderGatewayPort>,
                rest: Arc::new(MockRest::default()),
                snapshots: Arc::new(MockSnapshots::default()),
            },
        );

        coordinator.send_order(request("c-1")).await.unwrap();
        let err = coordinator.send_order(request("c-2")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RateLimitError);
        assert!(coordinator.query_order(&ClOrdId::new("c-2")).is_none());
        assert_eq!(gateway.sends.lock().len(), 1);
    }

    #[tokio::test]
    async fn cancel_requires_live_order() {
        let h = harness();
        let missing = h
            .coordinator
            .cancel_order(&ClOrdId::new("nope"))
            .await
            .unwrap_err();
        assert_eq!(missing.kind(), ErrorKind::ValidationError);

        h.coordinator.send_order(request("c-1")).await.unwrap();
        h.coordinator
            .on_order_event(event("c-1", OrderEventKind::Ack))
            .await;
        h.coordinator
            .cancel_order(&ClOrdId::new("c-1"))
            .await
            .unwrap();
        assert_eq!(h.gateway.cancels.lock().as_slice(), &[ClOrdId::new("c-1")]);

        h.coordinator
            .on_order_event(event("c-1", OrderEventKind::Cancel))
            .await;
        let err = h
            .coordinator
            .cancel_order(&ClOrdId::new("c-1"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationError);
        assert_eq!(h.gateway.cancels.lock().len(), 1);
    }

    #[tokio::test]
    async fn modify_validates_and_forwards() {
        let h = harness();
        h.coordinator.send_order(request("c-1")).await.unwrap();

        let err = h
            .coordinator
            .modify_order(&ClOrdId::new("c-1"), -1.0, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationError);

        let err = h
            .coordinator
            .modify_order(&ClOrdId::new("c-1"), 0.2, Some(0.0))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationError);

        h.coordinator
            .modify_order(&ClOrdId::new("c-1"), 0.2, Some(51_000.0))
            .await
            .unwrap();
        assert_eq!(
            h.gateway.modifies.lock().as_slice(),
            &[(ClOrdId::new("c-1"), 0.2, Some(51_000.0))]
        );
    }

    // ------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn ack_then_full_fill_reaches_filled() {
        let h = harness();
        h.coordinator.send_order(request("c-1")).await.unwrap();

        h.coordinator
            .on_order_event(event("c-1", OrderEventKind::Ack))
            .await;
        let update = h
            .coordinator
            .on_order_event(fill("c-1", 0.1, 50_000.0))
            .await;

        assert_eq!(update.previous, OrderState::Acknowledged);
        assert_eq!(update.state, OrderState::Filled);
        assert_eq!(update.transitions.len(), 2);
        let info = h.coordinator.query_order(&ClOrdId::new("c-1")).unwrap();
        assert!((info.avg_fill_price - 50_000.0).abs() < f64::EPSILON);
        assert!((info.filled_qty - 0.1).abs() < 1e-12);
        assert!(h.coordinator.open_orders().is_empty());
    }

    #[tokio::test]
    async fn partial_fills_accumulate_vwap() {
        let h = harness();
        h.coordinator.send_order(request("c-1")).await.unwrap();
        h.coordinator
            .on_order_event(event("c-1", OrderEventKind::Ack))
            .await;

        let first = h.coordinator.on_order_event(fill("c-1", 0.04, 100.0)).await;
        assert_eq!(first.state, OrderState::PartiallyFilled);
        let second = h.coordinator.on_order_event(fill("c-1", 0.06, 200.0)).await;
        assert_eq!(second.state, OrderState::Filled);

        let info = h.coordinator.query_order(&ClOrdId::new("c-1")).unwrap();
        assert!((info.avg_fill_price - 160.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn fill_on_pending_applies_implied_ack() {
        let h = harness();
        h.coordinator.send_order(request("c-1")).await.unwrap();

        let update = h.coordinator.on_order_event(fill("c-1", 0.05, 100.0)).await;
        assert_eq!(
            update.transitions,
            vec![
                Transition::Applied {
                    from: OrderState::Pending,
                    to: OrderState::Acknowledged
                },
                Transition::Applied {
                    from: OrderState::Acknowledged,
                    to: OrderState::PartiallyFilled
                },
            ]
        );
    }

    #[tokio::test]
    async fn duplicate_cumulative_fill_adds_nothing() {
        let h = harness();
        h.coordinator.send_order(request("c-1")).await.unwrap();
        let mut report = fill("c-1", 0.04, 100.0);
        report.cumulative_qty = Some(0.04);

        h.coordinator.on_order_event(report.clone()).await;
        let update = h.coordinator.on_order_event(report).await;
        assert!(!update.changed());
        let info = h.coordinator.query_order(&ClOrdId::new("c-1")).unwrap();
        assert!((info.filled_qty - 0.04).abs() < 1e-12);
    }

    #[tokio::test]
    async fn terminal_orders_ignore_further_events() {
        let h = harness();
        h.coordinator.send_order(request("c-1")).await.unwrap();
        let mut reject = event("c-1", OrderEventKind::Reject);
        reject.reason = Some("post only would cross".into());
        h.coordinator.on_order_event(reject).await;

        let update = h.coordinator.on_order_event(fill("c-1", 0.1, 1.0)).await;
        assert_eq!(update.state, OrderState::Rejected);
        assert!(!update.changed());

        let info = h.coordinator.query_order(&ClOrdId::new("c-1")).unwrap();
        assert_eq!(info.reason.as_deref(), Some("post only would cross"));
        assert!(info.filled_qty.abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn cancel_on_pending_is_ignored() {
        let h = harness();
        h.coordinator.send_order(request("c-1")).await.unwrap();
        let update = h
            .coordinator
            .on_order_event(event("c-1", OrderEventKind::Cancel))
            .await;
        assert_eq!(
            update.transitions,
            vec![Transition::Ignored {
                state: OrderState::Pending,
                kind: OrderEventKind::Cancel
            }]
        );
    }

    #[tokio::test]
    async fn unknown_order_is_synthesized() {
        let h = harness();
        let mut ack = event("ext-1", OrderEventKind::Ack);
        ack.side = Some(OrderSide::Sell);
        ack.order_qty = Some(2.0);
        ack.order_price = Some(3_000.0);

        let update = h.coordinator.on_order_event(ack).await;
        assert!(update.synthesized);
        assert_eq!(update.state, OrderState::Acknowledged);

        let info = h.coordinator.query_order(&ClOrdId::new("ext-1")).unwrap();
        assert_eq!(info.order.side, OrderSide::Sell);
        assert_eq!(info.order.order_type, OrderType::Limit);
        assert!((info.order.quantity - 2.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn amend_ack_updates_order_terms() {
        let h = harness();
        h.coordinator.send_order(request("c-1")).await.unwrap();
        h.coordinator
            .on_order_event(event("c-1", OrderEventKind::Ack))
            .await;

        let mut amended = event("c-1", OrderEventKind::Ack);
        amended.order_qty = Some(0.3);
        amended.order_price = Some(49_000.0);
        h.coordinator.on_order_event(amended).await;

        let info = h.coordinator.query_order(&ClOrdId::new("c-1")).unwrap();
        assert_eq!(info.state, OrderState::Acknowledged);
        assert!((info.order.quantity - 0.3).abs() < f64::EPSILON);
        assert!((info.order.price - 49_000.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn market_data_is_forwarded() {
        let h = harness();
        let mut updates = h.coordinator.subscribe();
        let balance =
            AccountBalance::from_wallet_available(Venue::Binance, "USDT", 100.0, 60.0, 5).unwrap();

        h.coordinator
            .handle_event(CanonicalEvent::Balance(balance.clone()))
            .await;

        assert_eq!(
            h.publisher.events.lock().as_slice(),
            &[CanonicalEvent::Balance(balance.clone())]
        );
        assert_eq!(updates.try_recv().unwrap(), CanonicalEvent::Balance(balance));
    }

    // ------------------------------------------------------------------
    // Reconciliation
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn reconcile_replays_snapshots_and_reports_gaps() {
        let mut listed = event("c-1", OrderEventKind::Fill);
        listed.cumulative_qty = Some(0.05);
        listed.avg_price = Some(50_000.0);
        let snapshots = MockSnapshots {
            open_orders: vec![listed],
            positions: vec![
                PositionUpdate::from_signed(Venue::Binance, "BTCUSDT", -0.1, 50_000.0, 1.0, 5)
                    .unwrap(),
            ],
            balances: vec![
                AccountBalance::from_wallet_available(Venue::Binance, "USDT", 10.0, 10.0, 5)
                    .unwrap(),
            ],
        };
        let h = harness_with(MockGateway::default(), MockRest::default(), snapshots);

        for id in ["c-1", "c-2"] {
            h.coordinator.send_order(request(id)).await.unwrap();
            h.coordinator
                .on_order_event(event(id, OrderEventKind::Ack))
                .await;
        }
        h.coordinator.send_order(request("c-3")).await.unwrap();

        let report = h.coordinator.reconcile(Venue::Binance).await.unwrap();
        assert_eq!(report.open_orders, 1);
        assert_eq!(report.positions, 1);
        assert_eq!(report.balances, 1);
        assert_eq!(report.missing_at_venue, vec![ClOrdId::new("c-2")]);
        assert!(!report.is_success());

        let info = h.coordinator.query_order(&ClOrdId::new("c-1")).unwrap();
        assert_eq!(info.state, OrderState::PartiallyFilled);
        let paths: Vec<_> = h
            .rest
            .requests
            .lock()
            .iter()
            .map(|q| (q.method, q.path.clone()))
            .collect();
        assert_eq!(
            paths,
            vec![
                (HttpMethod::Get, "/open_orders".to_string()),
                (HttpMethod::Get, "/positions".to_string()),
                (HttpMethod::Get, "/balances".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn reconcile_continues_past_failed_snapshot() {
        let rest = MockRest {
            fail_path: Some("/positions"),
            ..MockRest::default()
        };
        let h = harness_with(MockGateway::default(), rest, MockSnapshots::default());

        let report = h.coordinator.reconcile(Venue::Binance).await.unwrap();
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].starts_with("positions"));
        assert_eq!(h.rest.requests.lock().len(), 3);
    }

    // ------------------------------------------------------------------
    // Pump
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn run_applies_records_and_reconciles_on_reconnect() {
        let h = harness();
        let (tx, rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let pump = tokio::spawn(Arc::clone(&h.coordinator).run(rx, cancel.clone()));

        tx.send(SessionEvent::Record {
            channel: ChannelKind::Private,
            event: CanonicalEvent::Order(event("ext-9", OrderEventKind::Ack)),
            received_at_us: 1,
        })
        .await
        .unwrap();
        tx.send(SessionEvent::Reconnected {
            venue: Venue::Binance,
            channel: ChannelKind::Private,
            attempts: 2,
        })
        .await
        .unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while h.rest.requests.lock().len() < 3 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(h.rest.requests.lock().len(), 3);
        assert_eq!(
            h.coordinator
                .query_order(&ClOrdId::new("ext-9"))
                .map(|info| info.state),
            Some(OrderState::Acknowledged)
        );

        cancel.cancel();
        pump.await.unwrap();
    }

    #[tokio::test]
    async fn run_stops_when_senders_drop() {
        let h = harness();
        let (tx, rx) = mpsc::channel::<SessionEvent>(1);
        drop(tx);
        tokio::time::timeout(
            Duration::from_secs(1),
            Arc::clone(&h.coordinator).run(rx, CancellationToken::new()),
        )
        .await
        .unwrap();
    }
}
