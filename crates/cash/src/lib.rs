//! Cash domain module (event-sourced).
//!
//! Registers, the shifts worked on them, and the append-only ledger of cash
//! movements each shift owns. Pure domain logic: no IO, no storage.

pub mod movement;
pub mod register;
pub mod shift;

pub use movement::{CashMovement, MethodTotals, MovementId, MovementKind, Settlement, ShiftTotals, summarize};
pub use register::{
    BeginShift, CashRegister, EndShift, ProvisionRegister, RegisterActivationChanged,
    RegisterCommand, RegisterEvent, RegisterId, RegisterProvisioned, RegisterSettings,
    SetRegisterActive, ShiftBegan, ShiftEnded,
};
pub use shift::{
    AnnotateShift, CashCount, CashShift, CloseShift, DenominationCount, MovementRecorded,
    OpenShift, RecordMovement, SaleSettled, SettleSale, ShiftAnnotated, ShiftClosed, ShiftClosing,
    ShiftCommand, ShiftEvent, ShiftId, ShiftOpened, ShiftStatus, SupervisorNote,
};
