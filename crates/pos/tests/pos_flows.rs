//! End-to-end flows through `PosService` on the in-memory backends.
//!
//! Store → dispatcher → bus → stock levels projection, with the audit sink
//! captured for inspection.

use std::sync::{Arc, Barrier};

use proptest::prelude::*;

use retailpos_auth::{Actor, InMemoryIdentityProvider, Role};
use retailpos_cash::{MovementKind, RegisterId, RegisterSettings, ShiftId, ShiftStatus};
use retailpos_core::{AggregateId, AggregateRoot, BranchId, Money, PaymentMethod, ProductId, UserId, VariantId};
use retailpos_infra::audit::{AuditOutcome, InMemoryAuditSink};
use retailpos_infra::config::PosConfig;
use retailpos_infra::event_store::EventStore;
use retailpos_infra::external::{BranchInfo, CatalogEntry, InMemoryBranchDirectory, InMemoryCatalog};
use retailpos_inventory::StockRecord;
use retailpos_pos::{
    CloseShiftRequest, MovementRequest, OpenShiftRequest, PosError, PosPorts, PosService,
    ProvisionRegisterRequest, ProvisionStockRequest, RefundSaleRequest, RegisterSaleRequest,
    SaleLineRequest,
};
use retailpos_sales::{OrderStatus, PaymentStatus, ProductSnapshot, SalesOrder, SalesOrderId};

struct Fixture {
    pos: PosService,
    audit: Arc<InMemoryAuditSink>,
    identity: Arc<InMemoryIdentityProvider>,
    catalog: Arc<InMemoryCatalog>,
    branch_id: BranchId,
    variant_id: VariantId,
    admin: UserId,
    supervisor: UserId,
    cashier: UserId,
    register_id: RegisterId,
}

impl Fixture {
    fn new() -> Self {
        Self::with_config(PosConfig::default())
    }

    fn with_config(config: PosConfig) -> Self {
        let branch_id = BranchId::new();
        let branches = Arc::new(InMemoryBranchDirectory::new());
        branches.insert(BranchInfo { id: branch_id, name: "Downtown".to_string(), active: true });

        let catalog = Arc::new(InMemoryCatalog::new());
        let identity = Arc::new(InMemoryIdentityProvider::new());
        let audit = Arc::new(InMemoryAuditSink::new());

        let admin = UserId::new();
        let supervisor = UserId::new();
        let cashier = UserId::new();
        identity.register(Actor::new(admin, "Admin", vec![Role::ADMIN]));
        identity.register(Actor::new(supervisor, "Sofia", vec![Role::SUPERVISOR]));
        identity.register(Actor::new(cashier, "Ana", vec![Role::CASHIER]));

        let pos = PosService::in_memory(
            PosPorts {
                identity: identity.clone(),
                catalog: catalog.clone(),
                branches,
                audit: audit.clone(),
            },
            config,
        );

        let mut fixture = Self {
            pos,
            audit,
            identity,
            catalog,
            branch_id,
            variant_id: VariantId::new(),
            admin,
            supervisor,
            cashier,
            register_id: RegisterId::new(AggregateId::new()),
        };
        fixture.variant_id = fixture.add_variant("Polo shirt", Money::new(75, 0));
        fixture.register_id = fixture.add_register("R1");
        fixture
    }

    fn add_variant(&self, name: &str, price: Money) -> VariantId {
        let variant_id = VariantId::new();
        self.catalog.insert(
            variant_id,
            CatalogEntry {
                snapshot: ProductSnapshot {
                    product_id: ProductId::new(),
                    sku: name.to_uppercase().replace(' ', "-"),
                    name: name.to_string(),
                    size: Some("M".to_string()),
                    color: None,
                },
                base_price: price,
            },
        );
        self.pos
            .provision_stock(self.admin, ProvisionStockRequest::new(variant_id, self.branch_id))
            .unwrap();
        variant_id
    }

    fn add_register(&self, code: &str) -> RegisterId {
        let register = self
            .pos
            .provision_register(
                self.admin,
                ProvisionRegisterRequest {
                    branch_id: self.branch_id,
                    code: code.to_string(),
                    name: format!("Register {code}"),
                    terminal_id: None,
                    settings: RegisterSettings::default(),
                },
            )
            .unwrap();
        *register.id()
    }

    fn receive(&self, variant_id: VariantId, quantity: i64) {
        self.pos
            .receive_stock(self.admin, variant_id, self.branch_id, quantity, Money::new(30, 0))
            .unwrap();
    }

    fn open_on(&self, cashier: UserId, register_id: RegisterId, opening: Money) -> ShiftId {
        let shift = self
            .pos
            .open_shift(
                cashier,
                OpenShiftRequest { register_id, opening_amount: opening, opening_count: None, notes: None },
            )
            .unwrap();
        *shift.id()
    }

    fn open(&self, opening: Money) -> ShiftId {
        self.open_on(self.cashier, self.register_id, opening)
    }

    fn sell(&self, shift_id: ShiftId, quantity: i64) -> Result<SalesOrder, PosError> {
        self.pos.register_sale(
            self.cashier,
            RegisterSaleRequest::new(shift_id, vec![SaleLineRequest::new(self.variant_id, quantity)], PaymentMethod::Cash),
        )
    }

    fn close(&self, shift_id: ShiftId, counted: Money) -> Result<retailpos_cash::CashShift, PosError> {
        self.pos
            .close_shift(self.cashier, CloseShiftRequest { shift_id, counted, count: None, notes: None })
    }

    fn record(&self) -> StockRecord {
        self.pos.stock_record(self.variant_id, self.branch_id).unwrap()
    }
}

#[test]
fn sale_reserves_stock_and_appends_an_unsettled_sale_movement() {
    let f = Fixture::new();
    f.receive(f.variant_id, 10);
    let shift_id = f.open(Money::new(200, 0));

    let order = f.sell(shift_id, 2).unwrap();

    let totals = order.totals();
    assert_eq!(totals.subtotal, Money::new(150, 0));
    assert_eq!(totals.tax, Money::new(27, 0));
    assert_eq!(totals.total, Money::new(177, 0));
    assert!(order.is_awaiting_payment());

    let record = f.record();
    assert_eq!(record.reserved(), 2);
    assert_eq!(record.available(), 10);

    let shift = f.pos.shift(shift_id).unwrap();
    assert_eq!(shift.movements().len(), 1);
    let movement = &shift.movements()[0];
    assert_eq!(movement.kind, MovementKind::Sale);
    assert_eq!(movement.amount, Money::new(177, 0));
    assert_eq!(movement.order_id, Some(order.id().0));
    assert_eq!(movement.concept, format!("sale {}", order.order_number()));
    assert!(!shift.is_settled(movement));
}

#[test]
fn order_numbers_follow_register_shift_and_sale_sequence() {
    let f = Fixture::new();
    f.receive(f.variant_id, 10);
    let first_shift = f.open(Money::ZERO);
    let first = f.sell(first_shift, 1).unwrap();
    let second = f.sell(first_shift, 1).unwrap();
    assert_eq!(first.order_number(), "R1-0001-0001");
    assert_eq!(second.order_number(), "R1-0001-0002");

    f.close(first_shift, Money::ZERO).unwrap();
    let next_shift = f.open(Money::ZERO);
    assert_eq!(f.sell(next_shift, 1).unwrap().order_number(), "R1-0002-0001");

    let sales = f.pos.shift_sales(first_shift).unwrap();
    let numbers: Vec<&str> = sales.iter().map(|o| o.order_number()).collect();
    assert_eq!(numbers, ["R1-0001-0001", "R1-0001-0002"]);
    assert_eq!(sales[0].id(), first.id());
    assert_eq!(f.pos.shift_sales(next_shift).unwrap().len(), 1);
    assert!(matches!(f.pos.shift_sales(ShiftId::new(AggregateId::new())), Err(PosError::NotFound(_))));
}

#[test]
fn payment_reference_is_kept_on_the_sale_movement() {
    let f = Fixture::new();
    f.receive(f.variant_id, 5);
    let shift_id = f.open(Money::ZERO);

    let mut request =
        RegisterSaleRequest::new(shift_id, vec![SaleLineRequest::new(f.variant_id, 1)], PaymentMethod::Card);
    request.payment_reference = Some("AUTH-4411".to_string());
    let order = f.pos.register_sale(f.cashier, request).unwrap();

    let shift = f.pos.shift(shift_id).unwrap();
    let movement = shift.sale_movement(order.id().0).unwrap();
    assert_eq!(movement.reference.as_deref(), Some("AUTH-4411"));
    assert_eq!(movement.method, PaymentMethod::Card);
}

#[test]
fn amounts_past_the_money_range_are_rejected_and_audited() {
    let f = Fixture::new();
    f.receive(f.variant_id, 10);
    let shift_id = f.open(Money::ZERO);

    let doubled = f.pos.register_sale(
        f.cashier,
        RegisterSaleRequest::new(
            shift_id,
            vec![SaleLineRequest::new(f.variant_id, i64::MAX), SaleLineRequest::new(f.variant_id, i64::MAX)],
            PaymentMethod::Cash,
        ),
    );
    assert!(matches!(doubled, Err(PosError::Validation(_))), "{doubled:?}");
    assert_eq!(f.audit.for_action("pos.sale.register").len(), 1);

    let pricey = f.pos.register_sale(
        f.cashier,
        RegisterSaleRequest::new(
            shift_id,
            vec![SaleLineRequest::new(f.variant_id, 2).at_price(Money::from_cents(i64::MAX / 2 + 1))],
            PaymentMethod::Cash,
        ),
    );
    assert!(matches!(pricey, Err(PosError::Validation(_))), "{pricey:?}");
    let attempts = f.audit.for_action("pos.sale.register");
    assert_eq!(attempts.len(), 2);
    assert!(attempts.iter().all(|r| !r.outcome.is_success()));

    let flood = f.pos.receive_stock(f.admin, f.variant_id, f.branch_id, i64::MAX, Money::new(1, 0));
    assert!(matches!(flood, Err(PosError::Validation(_))), "{flood:?}");
    let receipts = f.audit.for_action("pos.stock.receive");
    assert_eq!(receipts.len(), 2);
    assert!(!receipts[1].outcome.is_success());

    let record = f.record();
    assert_eq!((record.available(), record.reserved()), (10, 0));
    assert!(f.pos.shift(shift_id).unwrap().movements().is_empty());
}

#[test]
fn unconfirmed_sales_do_not_count_toward_expected_cash() {
    let f = Fixture::new();
    f.receive(f.variant_id, 10);
    let shift_id = f.open(Money::new(200, 0));
    f.sell(shift_id, 2).unwrap();

    let closed = f.close(shift_id, Money::new(195, 0)).unwrap();

    let closing = closed.closing().unwrap();
    assert_eq!(closing.expected, Money::new(200, 0));
    assert_eq!(closing.difference, Money::new(-5, 0));
    assert!(closing.out_of_balance);
    assert_eq!(closed.status(), ShiftStatus::Closed);
    assert_eq!(f.pos.current_shift(f.register_id).unwrap(), None);
}

#[test]
fn out_of_balance_only_beyond_the_tolerance() {
    let within = Fixture::new();
    let shift_id = within.open(Money::new(200, 0));
    let closing = within.close(shift_id, Money::new(201, 0)).unwrap().closing().cloned().unwrap();
    assert_eq!(closing.difference, Money::new(1, 0));
    assert!(!closing.out_of_balance);

    let beyond = Fixture::new();
    let shift_id = beyond.open(Money::new(200, 0));
    let closing = beyond.close(shift_id, Money::new(198, 99)).unwrap().closing().cloned().unwrap();
    assert_eq!(closing.difference, Money::from_cents(-101));
    assert!(closing.out_of_balance);
}

#[test]
fn short_stock_rejects_the_sale_and_writes_nothing() {
    let f = Fixture::new();
    f.receive(f.variant_id, 3);
    let shift_id = f.open(Money::new(200, 0));

    let err = f.sell(shift_id, 5).unwrap_err();

    let PosError::InsufficientStock(shortfalls) = &err else {
        panic!("expected InsufficientStock, got {err:?}");
    };
    assert_eq!(shortfalls.len(), 1);
    assert_eq!((shortfalls[0].requested, shortfalls[0].reservable), (5, 3));

    let record = f.record();
    assert_eq!((record.available(), record.reserved()), (3, 0));
    assert!(f.pos.shift(shift_id).unwrap().movements().is_empty());

    let failed = f.audit.for_action("pos.sale.register");
    assert_eq!(failed.len(), 1);
    assert!(!failed[0].outcome.is_success());
    let order_id: AggregateId = failed[0].entity_id.as_deref().unwrap().parse().unwrap();
    assert!(matches!(f.pos.order(SalesOrderId::new(order_id)), Err(PosError::NotFound(_))));
    assert!(f.pos.dispatcher().store().load_stream(order_id).unwrap().is_empty());
}

#[test]
fn every_short_line_is_reported() {
    let f = Fixture::new();
    let hat = f.add_variant("Hat", Money::new(20, 0));
    f.receive(f.variant_id, 1);
    f.receive(hat, 2);
    let shift_id = f.open(Money::ZERO);

    let err = f
        .pos
        .register_sale(
            f.cashier,
            RegisterSaleRequest::new(
                shift_id,
                vec![
                    SaleLineRequest::new(f.variant_id, 2),
                    SaleLineRequest::new(hat, 1),
                    SaleLineRequest::new(hat, 2),
                ],
                PaymentMethod::Card,
            ),
        )
        .unwrap_err();

    let PosError::InsufficientStock(shortfalls) = err else {
        panic!("expected InsufficientStock");
    };
    assert_eq!(shortfalls.len(), 2);
    assert!(shortfalls.iter().any(|s| s.variant_id == hat && s.requested == 3 && s.reservable == 2));
}

#[test]
fn racing_sales_for_the_last_unit_never_both_succeed() {
    let f = Fixture::new();
    f.receive(f.variant_id, 1);

    let other_cashier = UserId::new();
    f.identity.register(Actor::new(other_cashier, "Luis", vec![Role::CASHIER]));
    let second_register = f.add_register("R2");
    let shifts = [
        (f.cashier, f.open(Money::ZERO)),
        (other_cashier, f.open_on(other_cashier, second_register, Money::ZERO)),
    ];

    let barrier = Barrier::new(shifts.len());
    let results: Vec<Result<SalesOrder, PosError>> = std::thread::scope(|s| {
        let handles: Vec<_> = shifts
            .iter()
            .map(|&(cashier, shift_id)| {
                let (f, barrier) = (&f, &barrier);
                s.spawn(move || {
                    barrier.wait();
                    f.pos.register_sale(
                        cashier,
                        RegisterSaleRequest::new(shift_id, vec![SaleLineRequest::new(f.variant_id, 1)], PaymentMethod::Cash),
                    )
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(
        results.iter().any(|r| matches!(r, Err(PosError::InsufficientStock(_)))),
        "loser should see the stock gone: {results:?}"
    );
    let record = f.record();
    assert_eq!((record.available(), record.reserved()), (1, 1));
}

#[test]
fn racing_opens_on_one_register_leave_a_single_shift() {
    const CASHIERS: usize = 6;
    const ROUNDS: usize = 4;

    let f = Fixture::new();
    let cashiers: Vec<UserId> = (0..CASHIERS)
        .map(|n| {
            let id = UserId::new();
            f.identity.register(Actor::new(id, format!("Cashier {n}"), vec![Role::CASHIER]));
            id
        })
        .collect();

    for round in 0..ROUNDS {
        let barrier = Barrier::new(CASHIERS);
        let results: Vec<Result<retailpos_cash::CashShift, PosError>> = std::thread::scope(|s| {
            let handles: Vec<_> = cashiers
                .iter()
                .map(|&cashier| {
                    let (f, barrier) = (&f, &barrier);
                    s.spawn(move || {
                        barrier.wait();
                        f.pos.open_shift(
                            cashier,
                            OpenShiftRequest {
                                register_id: f.register_id,
                                opening_amount: Money::ZERO,
                                opening_count: None,
                                notes: None,
                            },
                        )
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let opened: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
        assert_eq!(opened.len(), 1, "round {round}: {results:?}");
        assert!(
            results.iter().filter(|r| r.is_err()).all(|r| matches!(r, Err(PosError::InvalidState(_)))),
            "round {round}: {results:?}"
        );

        let winner = opened[0];
        assert_eq!(f.pos.current_shift(f.register_id).unwrap().as_ref().map(|s| *s.id()), Some(*winner.id()));
        f.pos
            .close_shift(
                f.supervisor,
                CloseShiftRequest { shift_id: *winner.id(), counted: Money::ZERO, count: None, notes: None },
            )
            .unwrap();
    }

    assert_eq!(f.audit.for_action("pos.shift.open").len(), CASHIERS * ROUNDS);
    assert_eq!(f.pos.register(f.register_id).unwrap().shifts_opened(), ROUNDS as u32);
}

#[test]
fn confirming_payment_deducts_stock_and_settles_the_sale() {
    let f = Fixture::new();
    f.receive(f.variant_id, 10);
    let shift_id = f.open(Money::new(200, 0));
    let order = f.sell(shift_id, 2).unwrap();

    let paid = f
        .pos
        .confirm_payment(f.cashier, *order.id(), PaymentMethod::Cash, Some("till".to_string()))
        .unwrap();

    assert_eq!(paid.payment_status(), PaymentStatus::Processed);
    assert_eq!(paid.status(), OrderStatus::Confirmed);
    let record = f.record();
    assert_eq!((record.available(), record.reserved()), (8, 0));

    let shift = f.pos.shift(shift_id).unwrap();
    let movement = shift.sale_movement(order.id().0).unwrap();
    assert!(shift.is_settled(movement));
    assert_eq!(shift.settlement_for(movement.id).unwrap().reference.as_deref(), Some("till"));
    assert_eq!(shift.expected_cash(), Money::new(377, 0));
    assert_eq!(shift.totals().income.cash, Money::new(177, 0));
}

#[test]
fn confirming_a_card_payment_leaves_expected_cash_alone() {
    let f = Fixture::new();
    f.receive(f.variant_id, 10);
    let shift_id = f.open(Money::new(200, 0));
    let order = f.sell(shift_id, 1).unwrap();

    f.pos.confirm_payment(f.cashier, *order.id(), PaymentMethod::Card, None).unwrap();

    let shift = f.pos.shift(shift_id).unwrap();
    assert_eq!(shift.expected_cash(), Money::new(200, 0));
    assert_eq!(shift.totals().income.card, order.totals().total);

    let movement = shift.sale_movement(order.id().0).unwrap();
    assert_eq!(movement.method, PaymentMethod::Cash, "the recorded movement is never rewritten");
    let settlement = shift.settlement_for(movement.id).unwrap();
    assert_eq!((settlement.method, settlement.amount), (PaymentMethod::Card, order.totals().total));
    assert_eq!(settlement.order_id, order.id().0);
}

#[test]
fn cancelling_releases_stock_and_keeps_the_movement_unsettled() {
    let f = Fixture::new();
    f.receive(f.variant_id, 10);
    let shift_id = f.open(Money::new(200, 0));
    let order = f.sell(shift_id, 3).unwrap();

    let cancelled = f
        .pos
        .cancel_sale(f.cashier, *order.id(), Some("customer changed mind".to_string()))
        .unwrap();

    assert_eq!(cancelled.status(), OrderStatus::Cancelled);
    let record = f.record();
    assert_eq!((record.available(), record.reserved()), (10, 0));

    let shift = f.pos.shift(shift_id).unwrap();
    assert!(!shift.is_settled(shift.sale_movement(order.id().0).unwrap()));
    assert_eq!(shift.expected_cash(), Money::new(200, 0));

    let again = f.pos.cancel_sale(f.cashier, *order.id(), None).unwrap_err();
    assert!(matches!(again, PosError::InvalidState(_)));
    assert_eq!(f.record().reserved(), 0);
}

#[test]
fn failed_payment_cancels_and_releases() {
    let f = Fixture::new();
    f.receive(f.variant_id, 4);
    let shift_id = f.open(Money::ZERO);
    let order = f.sell(shift_id, 4).unwrap();

    let failed = f.pos.fail_payment(f.cashier, *order.id(), "card declined").unwrap();

    assert_eq!(failed.payment_status(), PaymentStatus::Failed);
    assert_eq!(failed.status(), OrderStatus::Cancelled);
    assert_eq!(f.record().reservable(), 4);
    assert!(f.sell(shift_id, 4).is_ok());
}

#[test]
fn refund_returns_items_and_pays_money_back() {
    let f = Fixture::new();
    f.receive(f.variant_id, 10);
    let shift_id = f.open(Money::new(200, 0));
    let order = f.sell(shift_id, 2).unwrap();
    f.pos.confirm_payment(f.cashier, *order.id(), PaymentMethod::Cash, None).unwrap();

    let request = RefundSaleRequest { order_id: *order.id(), shift_id, reason: "damaged seam".to_string() };
    let denied = f.pos.refund_sale(f.cashier, request.clone()).unwrap_err();
    assert!(matches!(denied, PosError::Unauthorized(_)));

    let refunded = f.pos.refund_sale(f.supervisor, request).unwrap();

    assert_eq!(refunded.payment_status(), PaymentStatus::Refunded);
    assert_eq!(f.record().available(), 10);
    let shift = f.pos.shift(shift_id).unwrap();
    let refund = shift.movements().iter().find(|m| m.kind == MovementKind::Refund).unwrap();
    assert_eq!(refund.amount, Money::new(177, 0));
    assert_eq!(refund.authorized_by, Some(f.supervisor));
    assert_eq!(shift.expected_cash(), Money::new(200, 0));
}

#[test]
fn payment_confirmed_after_close_leaves_the_closed_shift_untouched() {
    let f = Fixture::new();
    f.receive(f.variant_id, 10);
    let shift_id = f.open(Money::new(50, 0));
    let order = f.sell(shift_id, 1).unwrap();
    f.close(shift_id, Money::new(50, 0)).unwrap();

    f.pos.confirm_payment(f.supervisor, *order.id(), PaymentMethod::Cash, None).unwrap();

    let shift = f.pos.shift(shift_id).unwrap();
    assert!(!shift.is_settled(shift.sale_movement(order.id().0).unwrap()));
    assert!(shift.settlements().is_empty());
    assert_eq!(shift.closing().unwrap().expected, Money::new(50, 0));
    assert_eq!((f.record().available(), f.record().reserved()), (9, 0));
}

#[test]
fn a_register_has_at_most_one_open_shift() {
    let f = Fixture::new();
    let first = f.open(Money::ZERO);

    let err = f
        .pos
        .open_shift(
            f.supervisor,
            OpenShiftRequest { register_id: f.register_id, opening_amount: Money::ZERO, opening_count: None, notes: None },
        )
        .unwrap_err();

    assert!(matches!(err, PosError::InvalidState(_)));
    assert_eq!(*f.pos.current_shift(f.register_id).unwrap().unwrap().id(), first);

    f.close(first, Money::ZERO).unwrap();
    f.open(Money::ZERO);
}

#[test]
fn a_register_with_an_open_shift_cannot_be_deactivated() {
    let f = Fixture::new();
    let shift_id = f.open(Money::ZERO);

    let err = f.pos.set_register_active(f.supervisor, f.register_id, false).unwrap_err();
    assert!(matches!(err, PosError::InvalidState(_)));

    f.close(shift_id, Money::ZERO).unwrap();
    let register = f.pos.set_register_active(f.supervisor, f.register_id, false).unwrap();
    assert!(!register.is_active());

    let reopen = f.pos.open_shift(
        f.cashier,
        OpenShiftRequest { register_id: f.register_id, opening_amount: Money::ZERO, opening_count: None, notes: None },
    );
    assert!(matches!(reopen, Err(PosError::InvalidState(_))));
}

#[test]
fn selling_on_a_closed_shift_is_rejected() {
    let f = Fixture::new();
    f.receive(f.variant_id, 5);
    let shift_id = f.open(Money::ZERO);
    f.close(shift_id, Money::ZERO).unwrap();

    assert!(matches!(f.sell(shift_id, 1), Err(PosError::InvalidState(_))));
    assert_eq!(f.record().reserved(), 0);
}

#[test]
fn registers_only_take_the_methods_they_accept() {
    let f = Fixture::new();
    f.receive(f.variant_id, 5);
    let register = f
        .pos
        .provision_register(
            f.admin,
            ProvisionRegisterRequest {
                branch_id: f.branch_id,
                code: "CASH-ONLY".to_string(),
                name: "Kiosk".to_string(),
                terminal_id: Some("T-9".to_string()),
                settings: RegisterSettings { accepted_methods: vec![PaymentMethod::Cash], receipt_footer: None },
            },
        )
        .unwrap();
    let shift_id = f.open_on(f.cashier, *register.id(), Money::ZERO);

    let err = f
        .pos
        .register_sale(
            f.cashier,
            RegisterSaleRequest::new(shift_id, vec![SaleLineRequest::new(f.variant_id, 1)], PaymentMethod::Digital),
        )
        .unwrap_err();

    assert!(matches!(err, PosError::Validation(_)));
}

#[test]
fn only_the_owner_or_a_supervisor_closes_a_shift() {
    let f = Fixture::new();
    let stranger = UserId::new();
    f.identity.register(Actor::new(stranger, "Other cashier", vec![Role::CASHIER]));
    let shift_id = f.open(Money::ZERO);

    let err = f
        .pos
        .close_shift(stranger, CloseShiftRequest { shift_id, counted: Money::ZERO, count: None, notes: None })
        .unwrap_err();
    assert!(matches!(err, PosError::Unauthorized(_)));

    let closed = f
        .pos
        .close_shift(f.supervisor, CloseShiftRequest { shift_id, counted: Money::ZERO, count: None, notes: None })
        .unwrap();
    assert_eq!(closed.closing().unwrap().closed_by, f.supervisor);

    f.pos.annotate_shift(f.supervisor, shift_id, "drawer checked twice").unwrap();
    assert!(matches!(
        f.pos.annotate_shift(f.cashier, shift_id, "me too"),
        Err(PosError::Unauthorized(_))
    ));
}

#[test]
fn outflows_need_a_supervisor() {
    let f = Fixture::new();
    let shift_id = f.open(Money::new(100, 0));
    let expense = MovementRequest {
        shift_id,
        kind: MovementKind::Expense,
        concept: "cleaning supplies".to_string(),
        amount: Money::new(12, 50),
        method: PaymentMethod::Cash,
        reference: None,
    };

    assert!(matches!(f.pos.record_movement(f.cashier, expense.clone()), Err(PosError::Unauthorized(_))));

    let recorded = f.pos.record_movement(f.supervisor, expense).unwrap();
    assert_eq!(recorded.authorized_by, Some(f.supervisor));

    let income = f
        .pos
        .record_movement(
            f.cashier,
            MovementRequest {
                shift_id,
                kind: MovementKind::ExtraIncome,
                concept: "found in drawer".to_string(),
                amount: Money::new(2, 0),
                method: PaymentMethod::Cash,
                reference: None,
            },
        )
        .unwrap();
    assert_eq!(income.authorized_by, None);
    assert_eq!(f.pos.shift(shift_id).unwrap().expected_cash(), Money::new(89, 50));

    let sale = f.pos.record_movement(
        f.supervisor,
        MovementRequest {
            shift_id,
            kind: MovementKind::Sale,
            concept: "manual sale".to_string(),
            amount: Money::new(1, 0),
            method: PaymentMethod::Cash,
            reference: None,
        },
    );
    assert!(matches!(sale, Err(PosError::Validation(_))));
}

#[test]
fn unknown_or_inactive_users_are_turned_away() {
    let f = Fixture::new();
    f.receive(f.variant_id, 5);
    let shift_id = f.open(Money::ZERO);

    let nobody = f.pos.register_sale(
        UserId::new(),
        RegisterSaleRequest::new(shift_id, vec![SaleLineRequest::new(f.variant_id, 1)], PaymentMethod::Cash),
    );
    assert!(matches!(nobody, Err(PosError::Unauthorized(_))));

    f.identity.deactivate(f.cashier);
    assert!(matches!(f.sell(shift_id, 1), Err(PosError::Unauthorized(_))));

    let provision = f.pos.provision_register(
        f.supervisor,
        ProvisionRegisterRequest {
            branch_id: BranchId::new(),
            code: "X".to_string(),
            name: "Nowhere".to_string(),
            terminal_id: None,
            settings: RegisterSettings::default(),
        },
    );
    assert!(matches!(provision, Err(PosError::NotFound(_))));
    assert_eq!(f.record().reserved(), 0);
}

#[test]
fn every_operation_leaves_exactly_one_audit_record() {
    let f = Fixture::new();
    f.receive(f.variant_id, 5);
    let shift_id = f.open(Money::ZERO);
    let order = f.sell(shift_id, 1).unwrap();
    let _ = f.sell(shift_id, 50);
    f.pos.confirm_payment(f.cashier, *order.id(), PaymentMethod::Cash, None).unwrap();
    f.close(shift_id, order.totals().total).unwrap();

    let count = |action: &str| f.audit.for_action(action).len();
    assert_eq!(count("pos.register.provision"), 1);
    assert_eq!(count("pos.stock.provision"), 1);
    assert_eq!(count("pos.stock.receive"), 1);
    assert_eq!(count("pos.shift.open"), 1);
    assert_eq!(count("pos.sale.register"), 2);
    assert_eq!(count("pos.sale.confirm_payment"), 1);
    assert_eq!(count("pos.shift.close"), 1);
    assert_eq!(f.audit.records().len(), 8);

    let confirm = &f.audit.for_action("pos.sale.confirm_payment")[0];
    assert_eq!(confirm.outcome, AuditOutcome::Succeeded);
    assert_eq!(confirm.actor, f.cashier);
    assert!(confirm.before.is_some());
    assert!(confirm.after.is_some());
}

#[test]
fn report_reconciles_the_shift() {
    let f = Fixture::new();
    let hat = f.add_variant("Hat", Money::new(20, 0));
    f.receive(f.variant_id, 10);
    f.receive(hat, 10);
    let shift_id = f.open(Money::new(100, 0));

    let kept = f
        .pos
        .register_sale(
            f.cashier,
            RegisterSaleRequest::new(
                shift_id,
                vec![SaleLineRequest::new(f.variant_id, 2), SaleLineRequest::new(hat, 1)],
                PaymentMethod::Cash,
            ),
        )
        .unwrap();
    f.pos.confirm_payment(f.cashier, *kept.id(), PaymentMethod::Cash, None).unwrap();
    let dropped = f.sell(shift_id, 1).unwrap();
    f.pos.cancel_sale(f.cashier, *dropped.id(), None).unwrap();
    let pending = f.sell(shift_id, 1).unwrap();
    f.pos
        .record_movement(
            f.supervisor,
            MovementRequest {
                shift_id,
                kind: MovementKind::Withdrawal,
                concept: "bank deposit".to_string(),
                amount: Money::new(50, 0),
                method: PaymentMethod::Cash,
                reference: Some("DEP-1".to_string()),
            },
        )
        .unwrap();

    // 100 + 200.60 (170 + 18%) - 50
    let expected = Money::from_cents(25_060);
    f.close(shift_id, expected).unwrap();

    let report = f.pos.shift_report(shift_id).unwrap();
    assert_eq!(report.register_name, "Register R1");
    assert_eq!(report.branch_name.as_deref(), Some("Downtown"));
    assert_eq!(report.cashier_name.as_deref(), Some("Ana"));
    assert_eq!(report.status, ShiftStatus::Closed);
    assert!(report.duration_minutes.is_some());
    assert_eq!(report.expected_cash, expected);
    assert_eq!(report.difference, Some(Money::ZERO));
    assert!(!report.out_of_balance);

    assert_eq!(report.transaction_count, 3);
    assert_eq!(report.income.cash, kept.totals().total);
    assert_eq!(report.outflow.cash, Money::new(50, 0));
    assert_eq!(report.settled_sale_count, 1);
    assert_eq!(report.settled_sales_total, kept.totals().total);
    assert_eq!(report.pending_sales_total, pending.totals().total);
    assert_eq!(report.average_ticket, kept.totals().total);

    let sales = report.by_kind.iter().find(|k| k.kind == MovementKind::Sale).unwrap();
    assert_eq!(sales.count, 3);

    let polo = report.items.iter().find(|i| i.variant_id == f.variant_id).unwrap();
    assert_eq!((polo.quantity, polo.revenue), (3, Money::new(225, 0)));
    assert_eq!(polo.product_name, "Polo shirt");
    assert_eq!(report.items.len(), 2);
}

#[test]
fn low_stock_lists_records_whose_available_falls_to_minimum() {
    let f = Fixture::new();
    let scarf = f.add_variant("Scarf", Money::new(15, 0));
    f.receive(f.variant_id, 6);
    f.receive(scarf, 50);
    let shift_id = f.open(Money::ZERO);

    assert!(f.pos.low_stock(f.branch_id).is_empty());
    assert!(f.pos.validate_stock(f.variant_id, 6, f.branch_id).unwrap());

    let order = f.sell(shift_id, 2).unwrap();
    assert!(f.pos.low_stock(f.branch_id).is_empty(), "reservations alone do not lower available");
    f.pos.confirm_payment(f.cashier, *order.id(), PaymentMethod::Card, None).unwrap();

    let low = f.pos.low_stock(f.branch_id);
    assert_eq!(low.len(), 1);
    assert_eq!(low[0].variant_id, f.variant_id);
    assert_eq!(low[0].reservable(), 4);
    assert!(!f.pos.validate_stock(f.variant_id, 5, f.branch_id).unwrap());
    assert!(matches!(f.pos.validate_stock(VariantId::new(), 1, f.branch_id), Err(PosError::NotFound(_))));
    assert!(matches!(f.pos.validate_stock(f.variant_id, 1, BranchId::new()), Err(PosError::NotFound(_))));
    assert!(matches!(f.pos.validate_stock(f.variant_id, 0, f.branch_id), Err(PosError::Validation(_))));
    assert_eq!(f.pos.branch_stock(f.branch_id).len(), 2);
}

#[derive(Debug, Clone)]
enum Step {
    Sell(i64),
    Confirm,
    Cancel,
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        (1i64..=4).prop_map(Step::Sell),
        Just(Step::Confirm),
        Just(Step::Cancel),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 256, .. ProptestConfig::default() })]

    #[test]
    fn stock_and_cash_stay_consistent(initial in 0i64..12, steps in prop::collection::vec(step(), 1..12)) {
        let f = Fixture::new();
        if initial > 0 {
            f.receive(f.variant_id, initial);
        }
        let shift_id = f.open(Money::new(100, 0));

        let mut open_orders: Vec<(SalesOrderId, i64)> = Vec::new();
        let mut sold = 0i64;
        let mut cash_in = Money::ZERO;

        for step in steps {
            match step {
                Step::Sell(qty) => {
                    let reservable = f.record().reservable();
                    match f.sell(shift_id, qty) {
                        Ok(order) => {
                            prop_assert!(qty <= reservable);
                            open_orders.push((*order.id(), qty));
                        }
                        Err(PosError::InsufficientStock(_)) => prop_assert!(qty > reservable),
                        Err(other) => prop_assert!(false, "unexpected error {other:?}"),
                    }
                }
                Step::Confirm => {
                    if let Some((order_id, qty)) = open_orders.pop() {
                        let paid = f.pos.confirm_payment(f.cashier, order_id, PaymentMethod::Cash, None).unwrap();
                        sold += qty;
                        cash_in += paid.totals().total;
                    }
                }
                Step::Cancel => {
                    if let Some((order_id, _)) = open_orders.pop() {
                        f.pos.cancel_sale(f.cashier, order_id, None).unwrap();
                    }
                }
            }

            let record = f.record();
            let outstanding: i64 = open_orders.iter().map(|(_, q)| q).sum();
            prop_assert_eq!(record.available(), initial - sold);
            prop_assert_eq!(record.reserved(), outstanding);
            prop_assert!(record.reservable() >= 0);
            prop_assert_eq!(f.pos.shift(shift_id).unwrap().expected_cash(), Money::new(100, 0) + cash_in);
        }
    }
}
