//! Order lines and the deterministic totals computed from them.

use serde::{Deserialize, Serialize};

use retailpos_core::money::checked_sum;
use retailpos_core::{DomainError, Money, ProductId, ValueObject, VariantId};

/// Sales tax applied to the discounted subtotal (18%).
pub const DEFAULT_TAX_RATE_BPS: u32 = 1800;

/// What the product looked like when it was sold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductSnapshot {
    pub product_id: ProductId,
    pub sku: String,
    pub name: String,
    pub size: Option<String>,
    pub color: Option<String>,
}

impl ValueObject for ProductSnapshot {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub line_no: u32,
    pub variant_id: VariantId,
    pub quantity: i64,
    pub unit_price: Money,
    pub unit_discount: Money,
    pub product: ProductSnapshot,
}

impl OrderLine {
    pub fn net_unit_price(&self) -> Money {
        self.unit_price - self.unit_discount
    }

    /// `quantity * (unit_price - unit_discount)`.
    pub fn line_total(&self) -> Result<Money, DomainError> {
        self.net_unit_price()
            .checked_times(self.quantity)
            .ok_or_else(|| DomainError::validation(format!("line {}: amount out of range", self.line_no)))
    }

    fn validate(&self) -> Result<(), DomainError> {
        if self.quantity <= 0 {
            return Err(DomainError::validation(format!("line {}: quantity must be positive", self.line_no)));
        }
        if self.unit_price.is_negative() {
            return Err(DomainError::validation(format!("line {}: unit price cannot be negative", self.line_no)));
        }
        if self.unit_discount.is_negative() || self.unit_discount > self.unit_price {
            return Err(DomainError::validation(format!(
                "line {}: unit discount must be between 0 and the unit price",
                self.line_no
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderTotals {
    pub subtotal: Money,
    pub discount_total: Money,
    pub tax: Money,
    pub shipping: Money,
    pub total: Money,
    pub tax_rate_bps: u32,
}

/// Totals for a set of lines.
///
/// `tax = round_half_up((subtotal - discount_total) * rate)` and
/// `total = subtotal - discount_total + tax + shipping`.
pub fn compute_totals(
    lines: &[OrderLine],
    discount_total: Money,
    shipping: Money,
    tax_rate_bps: u32,
) -> Result<OrderTotals, DomainError> {
    for line in lines {
        line.validate()?;
    }
    if shipping.is_negative() {
        return Err(DomainError::validation("shipping cannot be negative"));
    }

    let line_totals = lines.iter().map(OrderLine::line_total).collect::<Result<Vec<_>, _>>()?;
    let subtotal = checked_sum(line_totals).ok_or_else(out_of_range)?;
    if discount_total.is_negative() || discount_total > subtotal {
        return Err(DomainError::validation(format!(
            "discount total {discount_total} must be between 0 and the subtotal {subtotal}"
        )));
    }

    let taxable = subtotal - discount_total;
    let tax = taxable.apply_rate_bps(tax_rate_bps).ok_or_else(out_of_range)?;
    let total = checked_sum([taxable, tax, shipping]).ok_or_else(out_of_range)?;
    Ok(OrderTotals {
        subtotal,
        discount_total,
        tax,
        shipping,
        total,
        tax_rate_bps,
    })
}

fn out_of_range() -> DomainError {
    DomainError::validation("order amounts out of range")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn line(line_no: u32, quantity: i64, unit_price: Money, unit_discount: Money) -> OrderLine {
        OrderLine {
            line_no,
            variant_id: VariantId::new(),
            quantity,
            unit_price,
            unit_discount,
            product: ProductSnapshot {
                product_id: ProductId::new(),
                sku: format!("SKU-{line_no}"),
                name: "Blusa".to_string(),
                size: Some("M".to_string()),
                color: None,
            },
        }
    }

    #[test]
    fn two_units_at_75_make_177() {
        let lines = [line(1, 2, Money::new(75, 0), Money::ZERO)];
        let totals = compute_totals(&lines, Money::ZERO, Money::ZERO, DEFAULT_TAX_RATE_BPS).unwrap();
        assert_eq!(totals.subtotal, Money::new(150, 0));
        assert_eq!(totals.tax, Money::new(27, 0));
        assert_eq!(totals.total, Money::new(177, 0));
    }

    #[test]
    fn discounts_and_shipping() {
        let lines = [
            line(1, 3, Money::new(20, 0), Money::new(2, 50)),
            line(2, 1, Money::new(10, 0), Money::ZERO),
        ];
        // subtotal = 3 * 17.50 + 10 = 62.50; taxable = 52.50; tax = 9.45
        let totals = compute_totals(&lines, Money::new(10, 0), Money::new(8, 0), DEFAULT_TAX_RATE_BPS).unwrap();
        assert_eq!(totals.subtotal, Money::new(62, 50));
        assert_eq!(totals.tax, Money::new(9, 45));
        assert_eq!(totals.total, Money::new(69, 95));
    }

    #[test]
    fn discount_beyond_subtotal_is_rejected() {
        let lines = [line(1, 1, Money::new(10, 0), Money::ZERO)];
        assert!(matches!(
            compute_totals(&lines, Money::new(10, 1), Money::ZERO, DEFAULT_TAX_RATE_BPS),
            Err(DomainError::Validation(_))
        ));
        assert!(matches!(
            compute_totals(&lines, Money::from_cents(-1), Money::ZERO, DEFAULT_TAX_RATE_BPS),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn unit_discount_above_price_is_rejected() {
        let lines = [line(1, 1, Money::new(10, 0), Money::new(11, 0))];
        assert!(compute_totals(&lines, Money::ZERO, Money::ZERO, DEFAULT_TAX_RATE_BPS).is_err());
    }

    #[test]
    fn amounts_past_the_money_range_are_validation_errors() {
        let huge = Money::from_cents(i64::MAX / 2 + 1);
        let lines = [line(1, 2, huge, Money::ZERO)];
        assert!(matches!(
            compute_totals(&lines, Money::ZERO, Money::ZERO, DEFAULT_TAX_RATE_BPS),
            Err(DomainError::Validation(_))
        ));

        let lines = [line(1, 1, huge, Money::ZERO), line(2, 1, huge, Money::ZERO)];
        assert!(matches!(
            compute_totals(&lines, Money::ZERO, Money::ZERO, DEFAULT_TAX_RATE_BPS),
            Err(DomainError::Validation(_))
        ));

        let lines = [line(1, 1, Money::from_cents(i64::MAX - 10), Money::ZERO)];
        assert!(matches!(
            compute_totals(&lines, Money::ZERO, Money::ZERO, DEFAULT_TAX_RATE_BPS),
            Err(DomainError::Validation(_))
        ));
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 256, .. ProptestConfig::default() })]

        #[test]
        fn totals_follow_the_formula(
            raw in proptest::collection::vec((1i64..20, 0i64..50_000, 0i64..100), 1..8),
            discount_pct in 0i64..=100,
            shipping in 0i64..5_000,
        ) {
            let lines: Vec<OrderLine> = raw
                .iter()
                .enumerate()
                .map(|(i, (q, price, disc_pct))| {
                    let price = Money::from_cents(*price);
                    let disc = Money::from_cents(price.cents() * disc_pct / 100);
                    line(i as u32 + 1, *q, price, disc)
                })
                .collect();
            let subtotal: i64 = lines.iter().map(|l| l.quantity * (l.unit_price.cents() - l.unit_discount.cents())).sum();
            let discount = Money::from_cents(subtotal * discount_pct / 100);

            let totals = compute_totals(&lines, discount, Money::from_cents(shipping), 1800).unwrap();
            let taxable = subtotal - discount.cents();
            // Half-up to the cent of taxable * 0.18.
            let tax = (taxable * 1800 + 5_000) / 10_000;

            prop_assert_eq!(totals.subtotal.cents(), subtotal);
            prop_assert_eq!(totals.tax.cents(), tax);
            prop_assert_eq!(totals.total.cents(), taxable + tax + shipping);
        }
    }
}
