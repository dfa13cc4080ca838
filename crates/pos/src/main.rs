//! Walks one shift end to end against the in-memory backends and prints the
//! reconciliation report.

use std::sync::Arc;

use anyhow::Context;

use retailpos_auth::{Actor, InMemoryIdentityProvider, Role};
use retailpos_cash::RegisterSettings;
use retailpos_core::{AggregateRoot, BranchId, Money, PaymentMethod, ProductId, UserId, VariantId};
use retailpos_infra::audit::TracingAuditSink;
use retailpos_infra::config::PosConfig;
use retailpos_infra::external::{BranchInfo, CatalogEntry, InMemoryBranchDirectory, InMemoryCatalog};
use retailpos_pos::{
    CloseShiftRequest, OpenShiftRequest, PosPorts, PosService, ProvisionRegisterRequest,
    ProvisionStockRequest, RegisterSaleRequest, SaleLineRequest,
};
use retailpos_sales::ProductSnapshot;

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    retailpos_observability::init();

    let config = PosConfig::from_env().context("invalid point-of-sale configuration")?;

    let branch_id = BranchId::new();
    let branches = Arc::new(InMemoryBranchDirectory::new());
    branches.insert(BranchInfo { id: branch_id, name: "Downtown".to_string(), active: true });

    let variant_id = VariantId::new();
    let catalog = Arc::new(InMemoryCatalog::new());
    catalog.insert(
        variant_id,
        CatalogEntry {
            snapshot: ProductSnapshot {
                product_id: ProductId::new(),
                sku: "POLO-M-BLU".to_string(),
                name: "Polo shirt".to_string(),
                size: Some("M".to_string()),
                color: Some("blue".to_string()),
            },
            base_price: Money::new(75, 0),
        },
    );

    let admin = UserId::new();
    let cashier = UserId::new();
    let identity = Arc::new(InMemoryIdentityProvider::new());
    identity.register(Actor::new(admin, "Store admin", vec![Role::ADMIN]));
    identity.register(Actor::new(cashier, "Ana", vec![Role::CASHIER]));

    let pos = PosService::in_memory(
        PosPorts { identity, catalog, branches, audit: Arc::new(TracingAuditSink) },
        config,
    );

    let register = pos.provision_register(
        admin,
        ProvisionRegisterRequest {
            branch_id,
            code: "R1".to_string(),
            name: "Front desk".to_string(),
            terminal_id: None,
            settings: RegisterSettings::default(),
        },
    )?;
    pos.provision_stock(admin, ProvisionStockRequest::new(variant_id, branch_id))?;
    pos.receive_stock(admin, variant_id, branch_id, 10, Money::new(30, 0))?;

    let shift = pos.open_shift(
        cashier,
        OpenShiftRequest {
            register_id: *register.id(),
            opening_amount: Money::new(100, 0),
            opening_count: None,
            notes: None,
        },
    )?;
    let shift_id = *shift.id();

    let order = pos.register_sale(
        cashier,
        RegisterSaleRequest::new(shift_id, vec![SaleLineRequest::new(variant_id, 2)], PaymentMethod::Cash),
    )?;
    pos.confirm_payment(admin, *order.id(), PaymentMethod::Cash, None)?;

    let expected = pos.shift(shift_id)?.expected_cash();
    pos.close_shift(cashier, CloseShiftRequest { shift_id, counted: expected, count: None, notes: None })?;

    let report = pos.shift_report(shift_id)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
