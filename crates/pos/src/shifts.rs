//! Registers and the shifts worked on them.

use chrono::Utc;
use serde_json::Value as JsonValue;

use retailpos_auth::{Permission, authorize, authorize_shift_close};
use retailpos_cash::{
    AnnotateShift, BeginShift, CashCount, CashMovement, CashRegister, CashShift, CloseShift,
    EndShift, MovementId, MovementKind, OpenShift, ProvisionRegister, RecordMovement,
    RegisterCommand, RegisterId, RegisterSettings, SetRegisterActive, ShiftCommand, ShiftId,
};
use retailpos_core::{Aggregate, AggregateId, BranchId, Money, PaymentMethod, UserId};
use retailpos_events::{EventBus, EventEnvelope};
use retailpos_infra::event_store::EventStore;

use crate::error::PosError;
use crate::service::{AuditScope, PosService};

#[derive(Debug, Clone)]
pub struct ProvisionRegisterRequest {
    pub branch_id: BranchId,
    pub code: String,
    pub name: String,
    pub terminal_id: Option<String>,
    pub settings: RegisterSettings,
}

#[derive(Debug, Clone)]
pub struct OpenShiftRequest {
    pub register_id: RegisterId,
    pub opening_amount: Money,
    pub opening_count: Option<CashCount>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CloseShiftRequest {
    pub shift_id: ShiftId,
    pub counted: Money,
    pub count: Option<CashCount>,
    pub notes: Option<String>,
}

/// A manual movement: expense, withdrawal, extra income or refund.
#[derive(Debug, Clone)]
pub struct MovementRequest {
    pub shift_id: ShiftId,
    pub kind: MovementKind,
    pub concept: String,
    pub amount: Money,
    pub method: PaymentMethod,
    pub reference: Option<String>,
}

impl<S, B> PosService<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn provision_register(&self, actor_id: UserId, request: ProvisionRegisterRequest) -> Result<CashRegister, PosError> {
        let register_id = RegisterId::new(AggregateId::new());
        let scope = AuditScope::new("pos.register.provision", CashRegister::AGGREGATE_TYPE, actor_id).entity_id(register_id);
        let result = self.try_provision_register(actor_id, register_id, request);
        self.audited(scope, result)
    }

    fn try_provision_register(
        &self,
        actor_id: UserId,
        register_id: RegisterId,
        request: ProvisionRegisterRequest,
    ) -> Result<CashRegister, PosError> {
        self.authorized(actor_id, &Permission::REGISTER_MANAGE)?;

        let branch = self
            .ports
            .branches
            .resolve(request.branch_id)
            .ok_or_else(|| PosError::not_found(format!("branch {}", request.branch_id)))?;
        if !branch.active {
            return Err(PosError::invalid_state(format!("branch '{}' is inactive", branch.name)));
        }

        let mut register = self.load_register(register_id)?;
        let mut unit = self.dispatcher.begin();
        unit.execute(
            &mut register,
            RegisterCommand::Provision(ProvisionRegister {
                register_id,
                branch_id: request.branch_id,
                code: request.code,
                name: request.name,
                terminal_id: request.terminal_id,
                settings: request.settings,
                occurred_at: Utc::now(),
            }),
        )?;
        self.commit(unit)?;

        Ok(register.into_state())
    }

    /// Deactivating a register with an open shift is refused.
    pub fn set_register_active(&self, actor_id: UserId, register_id: RegisterId, active: bool) -> Result<CashRegister, PosError> {
        let scope = AuditScope::new("pos.register.set_active", CashRegister::AGGREGATE_TYPE, actor_id)
            .entity_id(register_id)
            .before(self.load_register(register_id).ok().as_ref().and_then(Self::snapshot));

        let result = self.authorized(actor_id, &Permission::REGISTER_MANAGE).and_then(|_| {
            self.with_retry("set_register_active", || {
                let mut register = self.load_register(register_id)?;
                let mut unit = self.dispatcher.begin();
                unit.execute(
                    &mut register,
                    RegisterCommand::SetActive(SetRegisterActive { register_id, active, occurred_at: Utc::now() }),
                )?;
                self.commit(unit)?;
                Ok(register.into_state())
            })
        });

        self.audited(scope, result)
    }

    pub fn register(&self, register_id: RegisterId) -> Result<CashRegister, PosError> {
        let register = self.load_register(register_id)?.into_state();
        if !register.exists() {
            return Err(PosError::not_found(format!("register {register_id}")));
        }
        Ok(register)
    }

    /// The open shift of a register, if any.
    pub fn current_shift(&self, register_id: RegisterId) -> Result<Option<CashShift>, PosError> {
        match self.register(register_id)?.open_shift() {
            Some(shift_id) => Ok(Some(self.shift(shift_id)?)),
            None => Ok(None),
        }
    }

    pub fn shift(&self, shift_id: ShiftId) -> Result<CashShift, PosError> {
        let shift = self.load_shift(shift_id)?.into_state();
        if !shift.exists() {
            return Err(PosError::not_found(format!("shift {shift_id}")));
        }
        Ok(shift)
    }

    /// Open a shift for the calling cashier.
    ///
    /// The register stream and the new shift stream are committed together, so
    /// two cashiers racing for the same register cannot both get a shift.
    pub fn open_shift(&self, actor_id: UserId, request: OpenShiftRequest) -> Result<CashShift, PosError> {
        let shift_id = ShiftId::new(AggregateId::new());
        let scope = AuditScope::new("pos.shift.open", CashShift::AGGREGATE_TYPE, actor_id).entity_id(shift_id);
        let result = self.try_open_shift(actor_id, shift_id, &request);
        self.audited(scope, result)
    }

    fn try_open_shift(&self, actor_id: UserId, shift_id: ShiftId, request: &OpenShiftRequest) -> Result<CashShift, PosError> {
        if request.opening_amount.is_negative() {
            return Err(PosError::validation("opening amount cannot be negative"));
        }
        let actor = self.authorized(actor_id, &Permission::SHIFT_OPEN)?;

        self.with_retry("open_shift", || {
            let mut register = self.load_register(request.register_id)?;
            let branch_id = register
                .state()
                .branch_id()
                .ok_or_else(|| PosError::not_found(format!("register {}", request.register_id)))?;
            let mut shift = self.load_shift(shift_id)?;
            let now = Utc::now();

            let mut unit = self.dispatcher.begin();
            unit.execute(
                &mut register,
                RegisterCommand::BeginShift(BeginShift {
                    register_id: request.register_id,
                    shift_id,
                    cashier_id: actor.user_id,
                    occurred_at: now,
                }),
            )?;
            unit.execute(
                &mut shift,
                ShiftCommand::Open(OpenShift {
                    shift_id,
                    register_id: request.register_id,
                    branch_id,
                    cashier_id: actor.user_id,
                    opening_amount: request.opening_amount,
                    opening_count: request.opening_count.clone(),
                    notes: request.notes.clone(),
                    occurred_at: now,
                }),
            )?;
            self.commit(unit)?;

            Ok(shift.into_state())
        })
    }

    /// Close a shift: the cashier who opened it, or a supervisor/admin.
    pub fn close_shift(&self, actor_id: UserId, request: CloseShiftRequest) -> Result<CashShift, PosError> {
        let scope = AuditScope::new("pos.shift.close", CashShift::AGGREGATE_TYPE, actor_id)
            .entity_id(request.shift_id)
            .before(self.load_shift(request.shift_id).ok().as_ref().and_then(Self::snapshot));
        let result = self.try_close_shift(actor_id, &request);
        self.audited(scope, result)
    }

    fn try_close_shift(&self, actor_id: UserId, request: &CloseShiftRequest) -> Result<CashShift, PosError> {
        let actor = self.actor(actor_id)?;

        self.with_retry("close_shift", || {
            let mut shift = self.load_shift(request.shift_id)?;
            let (Some(cashier_id), Some(register_id)) = (shift.state().cashier_id(), shift.state().register_id()) else {
                return Err(PosError::not_found(format!("shift {}", request.shift_id)));
            };
            authorize_shift_close(&actor, cashier_id)?;
            let mut register = self.load_register(register_id)?;
            let now = Utc::now();

            let mut unit = self.dispatcher.begin();
            unit.execute(
                &mut shift,
                ShiftCommand::Close(CloseShift {
                    shift_id: request.shift_id,
                    counted: request.counted,
                    count: request.count.clone(),
                    notes: request.notes.clone(),
                    tolerance: self.config.out_of_balance_tolerance,
                    closed_by: actor.user_id,
                    occurred_at: now,
                }),
            )?;
            unit.execute(
                &mut register,
                RegisterCommand::EndShift(EndShift { register_id, shift_id: request.shift_id, occurred_at: now }),
            )?;
            self.commit(unit)?;

            let closed = shift.into_state();
            if let Some(closing) = closed.closing().filter(|c| c.out_of_balance) {
                tracing::warn!(
                    shift_id = %request.shift_id,
                    expected = %closing.expected,
                    counted = %closing.counted,
                    difference = %closing.difference,
                    "shift closed out of balance"
                );
            }
            Ok(closed)
        })
    }

    /// Supervisor note on a closed shift.
    pub fn annotate_shift(&self, actor_id: UserId, shift_id: ShiftId, note: &str) -> Result<CashShift, PosError> {
        let scope = AuditScope::new("pos.shift.annotate", CashShift::AGGREGATE_TYPE, actor_id)
            .entity_id(shift_id)
            .before(self.load_shift(shift_id).ok().as_ref().and_then(Self::snapshot));

        let result = self.authorized(actor_id, &Permission::SHIFT_ANNOTATE).and_then(|actor| {
            self.with_retry("annotate_shift", || {
                let mut shift = self.load_shift(shift_id)?;
                let mut unit = self.dispatcher.begin();
                unit.execute(
                    &mut shift,
                    ShiftCommand::Annotate(AnnotateShift {
                        shift_id,
                        supervisor_id: actor.user_id,
                        note: note.to_string(),
                        occurred_at: Utc::now(),
                    }),
                )?;
                self.commit(unit)?;
                Ok(shift.into_state())
            })
        });

        self.audited(scope, result)
    }

    /// Record a manual movement. Outflows need a supervisor, who is recorded as
    /// the authorizer.
    pub fn record_movement(&self, actor_id: UserId, request: MovementRequest) -> Result<CashMovement, PosError> {
        let movement_id = MovementId::new();
        let scope = AuditScope::new("pos.shift.record_movement", CashShift::AGGREGATE_TYPE, actor_id)
            .entity_id(request.shift_id)
            .before(self.load_shift(request.shift_id).ok().as_ref().and_then(Self::snapshot));
        let result = self.try_record_movement(actor_id, movement_id, &request);
        self.audited(scope, result)
    }

    fn try_record_movement(
        &self,
        actor_id: UserId,
        movement_id: MovementId,
        request: &MovementRequest,
    ) -> Result<CashMovement, PosError> {
        if request.kind == MovementKind::Sale {
            return Err(PosError::validation("sale movements are only recorded by registering a sale"));
        }
        let actor = self.authorized(actor_id, &Permission::MOVEMENT_RECORD)?;
        let authorized_by = if request.kind.is_outflow() {
            authorize(&actor, &Permission::OUTFLOW_AUTHORIZE)?;
            Some(actor.user_id)
        } else {
            None
        };

        self.with_retry("record_movement", || {
            let mut shift = self.load_shift(request.shift_id)?;
            let mut unit = self.dispatcher.begin();
            unit.execute(
                &mut shift,
                ShiftCommand::RecordMovement(RecordMovement {
                    shift_id: request.shift_id,
                    movement_id,
                    order_id: None,
                    kind: request.kind,
                    concept: request.concept.clone(),
                    amount: request.amount,
                    method: request.method,
                    reference: request.reference.clone(),
                    authorized_by,
                    recorded_by: actor.user_id,
                    occurred_at: Utc::now(),
                }),
            )?;
            self.commit(unit)?;

            shift
                .state()
                .movements()
                .iter()
                .find(|m| m.id == movement_id)
                .cloned()
                .ok_or_else(|| PosError::internal(format!("movement {movement_id} missing after commit")))
        })
    }
}
