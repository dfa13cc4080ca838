use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use retailpos_core::{Aggregate, AggregateId, AggregateRoot, BranchId, DomainError, PaymentMethod, UserId};
use retailpos_events::Event;

use crate::shift::ShiftId;

/// Cash register identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegisterId(pub AggregateId);

impl RegisterId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for RegisterId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Per-register configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterSettings {
    pub accepted_methods: Vec<PaymentMethod>,
    pub receipt_footer: Option<String>,
}

impl Default for RegisterSettings {
    fn default() -> Self {
        Self {
            accepted_methods: PaymentMethod::ALL.to_vec(),
            receipt_footer: None,
        }
    }
}

impl RegisterSettings {
    pub fn accepts(&self, method: PaymentMethod) -> bool {
        self.accepted_methods.contains(&method)
    }
}

/// Aggregate root: CashRegister.
///
/// The register stream is where "at most one open shift" is decided: a shift
/// can only start by appending `ShiftBegan` here at the version that was read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CashRegister {
    id: RegisterId,
    branch_id: Option<BranchId>,
    code: String,
    name: String,
    terminal_id: Option<String>,
    active: bool,
    settings: RegisterSettings,
    open_shift: Option<ShiftId>,
    last_opened_by: Option<UserId>,
    shifts_opened: u32,
    version: u64,
    #[serde(skip)]
    created: bool,
}

impl CashRegister {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: RegisterId) -> Self {
        Self {
            id,
            branch_id: None,
            code: String::new(),
            name: String::new(),
            terminal_id: None,
            active: false,
            settings: RegisterSettings::default(),
            open_shift: None,
            last_opened_by: None,
            shifts_opened: 0,
            version: 0,
            created: false,
        }
    }

    pub fn exists(&self) -> bool {
        self.created
    }

    pub fn branch_id(&self) -> Option<BranchId> {
        self.branch_id
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn terminal_id(&self) -> Option<&str> {
        self.terminal_id.as_deref()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn settings(&self) -> &RegisterSettings {
        &self.settings
    }

    pub fn open_shift(&self) -> Option<ShiftId> {
        self.open_shift
    }

    pub fn last_opened_by(&self) -> Option<UserId> {
        self.last_opened_by
    }

    /// Shifts ever opened here; the open shift, if any, is number `shifts_opened()`.
    pub fn shifts_opened(&self) -> u32 {
        self.shifts_opened
    }
}

impl AggregateRoot for CashRegister {
    type Id = RegisterId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: ProvisionRegister.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionRegister {
    pub register_id: RegisterId,
    pub branch_id: BranchId,
    pub code: String,
    pub name: String,
    pub terminal_id: Option<String>,
    pub settings: RegisterSettings,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SetRegisterActive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetRegisterActive {
    pub register_id: RegisterId,
    pub active: bool,
    pub occurred_at: DateTime<Utc>,
}

/// Command: BeginShift. Issued together with the shift's own `OpenShift`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeginShift {
    pub register_id: RegisterId,
    pub shift_id: ShiftId,
    pub cashier_id: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: EndShift. Issued together with the shift's own `CloseShift`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndShift {
    pub register_id: RegisterId,
    pub shift_id: ShiftId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegisterCommand {
    Provision(ProvisionRegister),
    SetActive(SetRegisterActive),
    BeginShift(BeginShift),
    EndShift(EndShift),
}

/// Event: RegisterProvisioned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterProvisioned {
    pub register_id: RegisterId,
    pub branch_id: BranchId,
    pub code: String,
    pub name: String,
    pub terminal_id: Option<String>,
    pub settings: RegisterSettings,
    pub occurred_at: DateTime<Utc>,
}

/// Event: RegisterActivationChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterActivationChanged {
    pub register_id: RegisterId,
    pub active: bool,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ShiftBegan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShiftBegan {
    pub register_id: RegisterId,
    pub shift_id: ShiftId,
    pub cashier_id: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ShiftEnded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShiftEnded {
    pub register_id: RegisterId,
    pub shift_id: ShiftId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegisterEvent {
    RegisterProvisioned(RegisterProvisioned),
    RegisterActivationChanged(RegisterActivationChanged),
    ShiftBegan(ShiftBegan),
    ShiftEnded(ShiftEnded),
}

impl Event for RegisterEvent {
    fn event_type(&self) -> &'static str {
        match self {
            RegisterEvent::RegisterProvisioned(_) => "cash.register.provisioned",
            RegisterEvent::RegisterActivationChanged(_) => "cash.register.activation_changed",
            RegisterEvent::ShiftBegan(_) => "cash.register.shift_began",
            RegisterEvent::ShiftEnded(_) => "cash.register.shift_ended",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            RegisterEvent::RegisterProvisioned(e) => e.occurred_at,
            RegisterEvent::RegisterActivationChanged(e) => e.occurred_at,
            RegisterEvent::ShiftBegan(e) => e.occurred_at,
            RegisterEvent::ShiftEnded(e) => e.occurred_at,
        }
    }
}

impl Aggregate for CashRegister {
    const AGGREGATE_TYPE: &'static str = "cash.register";

    type Command = RegisterCommand;
    type Event = RegisterEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            RegisterEvent::RegisterProvisioned(e) => {
                self.id = e.register_id;
                self.branch_id = Some(e.branch_id);
                self.code = e.code.clone();
                self.name = e.name.clone();
                self.terminal_id = e.terminal_id.clone();
                self.settings = e.settings.clone();
                self.active = true;
                self.created = true;
            }
            RegisterEvent::RegisterActivationChanged(e) => {
                self.active = e.active;
            }
            RegisterEvent::ShiftBegan(e) => {
                self.open_shift = Some(e.shift_id);
                self.last_opened_by = Some(e.cashier_id);
                self.shifts_opened += 1;
            }
            RegisterEvent::ShiftEnded(_) => {
                self.open_shift = None;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            RegisterCommand::Provision(cmd) => self.handle_provision(cmd),
            RegisterCommand::SetActive(cmd) => self.handle_set_active(cmd),
            RegisterCommand::BeginShift(cmd) => self.handle_begin_shift(cmd),
            RegisterCommand::EndShift(cmd) => self.handle_end_shift(cmd),
        }
    }
}

impl CashRegister {
    fn ensure_exists(&self, register_id: RegisterId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("register {register_id}")));
        }
        if self.id != register_id {
            return Err(DomainError::invalid_state("register_id mismatch"));
        }
        Ok(())
    }

    fn handle_provision(&self, cmd: &ProvisionRegister) -> Result<Vec<RegisterEvent>, DomainError> {
        if self.created {
            return Err(DomainError::invalid_state("register already exists"));
        }
        if cmd.code.trim().is_empty() {
            return Err(DomainError::validation("code cannot be empty"));
        }
        if cmd.name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        if cmd.settings.accepted_methods.is_empty() {
            return Err(DomainError::validation("a register must accept at least one payment method"));
        }

        Ok(vec![RegisterEvent::RegisterProvisioned(RegisterProvisioned {
            register_id: cmd.register_id,
            branch_id: cmd.branch_id,
            code: cmd.code.trim().to_string(),
            name: cmd.name.trim().to_string(),
            terminal_id: cmd.terminal_id.clone(),
            settings: cmd.settings.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_set_active(&self, cmd: &SetRegisterActive) -> Result<Vec<RegisterEvent>, DomainError> {
        self.ensure_exists(cmd.register_id)?;

        if self.active == cmd.active {
            return Ok(Vec::new());
        }
        if !cmd.active && self.open_shift.is_some() {
            return Err(DomainError::invalid_state(
                "cannot deactivate a register while a shift is open",
            ));
        }

        Ok(vec![RegisterEvent::RegisterActivationChanged(RegisterActivationChanged {
            register_id: cmd.register_id,
            active: cmd.active,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_begin_shift(&self, cmd: &BeginShift) -> Result<Vec<RegisterEvent>, DomainError> {
        self.ensure_exists(cmd.register_id)?;

        if !self.active {
            return Err(DomainError::invalid_state("register is not active"));
        }
        if let Some(open) = self.open_shift {
            return Err(DomainError::invalid_state(format!(
                "register already has an open shift ({open})"
            )));
        }

        Ok(vec![RegisterEvent::ShiftBegan(ShiftBegan {
            register_id: cmd.register_id,
            shift_id: cmd.shift_id,
            cashier_id: cmd.cashier_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_end_shift(&self, cmd: &EndShift) -> Result<Vec<RegisterEvent>, DomainError> {
        self.ensure_exists(cmd.register_id)?;

        if self.open_shift != Some(cmd.shift_id) {
            return Err(DomainError::invalid_state(format!(
                "shift {} is not the open shift of this register",
                cmd.shift_id
            )));
        }

        Ok(vec![RegisterEvent::ShiftEnded(ShiftEnded {
            register_id: cmd.register_id,
            shift_id: cmd.shift_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}
