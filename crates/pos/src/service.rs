//! The point-of-sale application service.
//!
//! `PosService` is the single entry point for cashiers, supervisors and the
//! payment callback. Every mutating operation follows the same shape:
//!
//! ```text
//! resolve actor + authorize
//!   ↓
//! load aggregates, decide inside a UnitOfWork          ┐
//!   ↓                                                  │ retried on version
//! commit every touched stream at once                  ┘ conflicts
//!   ↓
//! refresh read models, emit one audit record
//! ```
//!
//! The operations themselves live in `shifts`, `sales` and `stock`.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

use retailpos_auth::{Actor, IdentityProvider, Permission, authorize};
use retailpos_cash::{CashRegister, CashShift, RegisterId, ShiftId};
use retailpos_core::{Aggregate, AggregateId, AggregateRoot, UserId};
use retailpos_events::{EventBus, EventEnvelope, InMemoryEventBus, Subscription};
use retailpos_infra::audit::{AuditOutcome, AuditRecord, AuditSink};
use retailpos_infra::command_dispatcher::{CommandDispatcher, Loaded, UnitOfWork};
use retailpos_infra::config::PosConfig;
use retailpos_infra::event_store::{EventStore, InMemoryEventStore};
use retailpos_infra::external::{BranchDirectory, Catalog};
use retailpos_infra::projections::{StockLevelRow, StockLevelsProjection};
use retailpos_infra::read_model::InMemoryBranchStore;
use retailpos_inventory::{StockRecord, StockRecordId};
use retailpos_sales::{SalesOrder, SalesOrderId};

use crate::error::PosError;

pub type EnvelopeBus = InMemoryEventBus<EventEnvelope<JsonValue>>;

type StockLevels = StockLevelsProjection<Arc<InMemoryBranchStore<StockRecordId, StockLevelRow>>>;

/// Collaborators owned by other systems.
#[derive(Clone)]
pub struct PosPorts {
    pub identity: Arc<dyn IdentityProvider>,
    pub catalog: Arc<dyn Catalog>,
    pub branches: Arc<dyn BranchDirectory>,
    pub audit: Arc<dyn AuditSink>,
}

pub struct PosService<S = Arc<InMemoryEventStore>, B = Arc<EnvelopeBus>> {
    pub(crate) dispatcher: CommandDispatcher<S, B>,
    pub(crate) ports: PosPorts,
    pub(crate) config: PosConfig,
    stock_levels: StockLevels,
    stock_feed: Mutex<Subscription<EventEnvelope<JsonValue>>>,
}

impl PosService {
    /// A service backed by the in-memory store and bus.
    pub fn in_memory(ports: PosPorts, config: PosConfig) -> Self {
        let dispatcher = CommandDispatcher::new(Arc::new(InMemoryEventStore::new()), Arc::new(EnvelopeBus::new()));
        Self::new(dispatcher, ports, config)
    }
}

/// What an audit record is about; the outcome is filled in by [`PosService::audited`].
pub(crate) struct AuditScope {
    action: &'static str,
    entity: &'static str,
    entity_id: Option<String>,
    actor: UserId,
    before: Option<JsonValue>,
}

impl AuditScope {
    pub(crate) fn new(action: &'static str, entity: &'static str, actor: UserId) -> Self {
        Self {
            action,
            entity,
            entity_id: None,
            actor,
            before: None,
        }
    }

    pub(crate) fn entity_id(mut self, id: impl ToString) -> Self {
        self.entity_id = Some(id.to_string());
        self
    }

    pub(crate) fn before(mut self, snapshot: Option<JsonValue>) -> Self {
        self.before = snapshot;
        self
    }
}

impl<S, B> PosService<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(dispatcher: CommandDispatcher<S, B>, ports: PosPorts, config: PosConfig) -> Self {
        let stock_feed = Mutex::new(dispatcher.bus().subscribe());
        Self {
            dispatcher,
            ports,
            config,
            stock_levels: StockLevelsProjection::new(Arc::new(InMemoryBranchStore::new())),
            stock_feed,
        }
    }

    pub fn config(&self) -> &PosConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &CommandDispatcher<S, B> {
        &self.dispatcher
    }

    /// Resolve who is calling. Unknown users are rejected outright.
    pub(crate) fn actor(&self, user_id: UserId) -> Result<Actor, PosError> {
        self.ports
            .identity
            .resolve(user_id)
            .ok_or_else(|| PosError::Unauthorized(format!("unknown user {user_id}")))
    }

    pub(crate) fn authorized(&self, user_id: UserId, permission: &Permission) -> Result<Actor, PosError> {
        let actor = self.actor(user_id)?;
        authorize(&actor, permission)?;
        Ok(actor)
    }

    /// Run `attempt` until it stops losing version races, at most
    /// `max_commit_attempts` times.
    pub(crate) fn with_retry<T>(
        &self,
        operation: &'static str,
        mut attempt: impl FnMut() -> Result<T, PosError>,
    ) -> Result<T, PosError> {
        let max = self.config.max_commit_attempts.max(1);
        let mut n = 1;
        loop {
            match attempt() {
                Err(PosError::ConcurrencyConflict(msg)) if n < max => {
                    tracing::warn!(operation, attempt = n, %msg, "version conflict, retrying");
                    n += 1;
                }
                Err(PosError::ConcurrencyConflict(msg)) => {
                    tracing::warn!(operation, attempts = n, %msg, "giving up after repeated version conflicts");
                    return Err(PosError::ConcurrencyConflict(format!(
                        "{operation}: gave up after {n} attempts ({msg})"
                    )));
                }
                other => return other,
            }
        }
    }

    /// Emit exactly one audit record for `result` and pass it through.
    pub(crate) fn audited<T: Serialize>(&self, scope: AuditScope, result: Result<T, PosError>) -> Result<T, PosError> {
        let outcome = match &result {
            Ok(_) => {
                tracing::info!(
                    action = scope.action,
                    entity_id = scope.entity_id.as_deref(),
                    actor = %scope.actor,
                    "operation succeeded"
                );
                AuditOutcome::Succeeded
            }
            Err(e) => {
                // Internal failures were already logged with their detail.
                if !matches!(e, PosError::Internal { .. }) {
                    tracing::warn!(
                        action = scope.action,
                        entity_id = scope.entity_id.as_deref(),
                        actor = %scope.actor,
                        error = %e,
                        "operation rejected"
                    );
                }
                AuditOutcome::Failed { reason: e.to_string() }
            }
        };

        self.ports.audit.record(AuditRecord {
            action: scope.action.to_string(),
            entity: scope.entity.to_string(),
            entity_id: scope.entity_id,
            actor: scope.actor,
            before: scope.before,
            after: result.as_ref().ok().and_then(|v| serde_json::to_value(v).ok()),
            outcome,
            recorded_at: Utc::now(),
        });

        result
    }

    pub(crate) fn load<A>(&self, aggregate_id: AggregateId, make: impl FnOnce(AggregateId) -> A) -> Result<Loaded<A>, PosError>
    where
        A: Aggregate,
        A::Event: DeserializeOwned,
    {
        Ok(self.dispatcher.load(aggregate_id, make)?)
    }

    pub(crate) fn load_register(&self, id: RegisterId) -> Result<Loaded<CashRegister>, PosError> {
        self.load(id.0, |a| CashRegister::empty(RegisterId::new(a)))
    }

    pub(crate) fn load_shift(&self, id: ShiftId) -> Result<Loaded<CashShift>, PosError> {
        self.load(id.0, |a| CashShift::empty(ShiftId::new(a)))
    }

    pub(crate) fn load_order(&self, id: SalesOrderId) -> Result<Loaded<SalesOrder>, PosError> {
        self.load(id.0, |a| SalesOrder::empty(SalesOrderId::new(a)))
    }

    pub(crate) fn load_stock(&self, id: StockRecordId) -> Result<Loaded<StockRecord>, PosError> {
        self.load(id.0, |a| StockRecord::empty(StockRecordId::new(a)))
    }

    /// JSON snapshot of an aggregate for the audit trail, if it exists.
    pub(crate) fn snapshot<A: Serialize + AggregateRoot>(loaded: &Loaded<A>) -> Option<JsonValue> {
        if loaded.state().version() == 0 {
            return None;
        }
        serde_json::to_value(loaded.state()).ok()
    }

    pub(crate) fn commit(&self, unit: UnitOfWork) -> Result<(), PosError> {
        let committed = self.dispatcher.commit(unit)?;
        tracing::debug!(events = committed.len(), "unit of work committed");
        self.refresh_stock_levels();
        Ok(())
    }

    /// Feed newly published inventory envelopes into the stock levels projection.
    pub(crate) fn refresh_stock_levels(&self) {
        let Ok(feed) = self.stock_feed.lock() else {
            tracing::error!("stock feed lock poisoned; projection not refreshed");
            return;
        };
        if let Err(e) = self.stock_levels.catch_up(&feed) {
            tracing::error!(error = %e, "stock levels projection could not apply an envelope");
        }
    }

    pub(crate) fn stock_levels(&self) -> &StockLevels {
        &self.stock_levels
    }
}
