//! Product snapshots and the stock ledger.

use common::ProductId;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::money::Money;

/// Product as returned by the inventory service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub price: Money,
    pub stock: u32,
}

/// Stock count of one product.
///
/// The count is unsigned, and [`StockLedgerEntry::reserve`] refuses any
/// decrement that would take it below zero, leaving the entry untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLedgerEntry {
    pub product_id: ProductId,
    pub stock_count: u32,
}

impl StockLedgerEntry {
    pub fn new(product_id: ProductId, stock_count: u32) -> Self {
        Self {
            product_id,
            stock_count,
        }
    }

    /// Decrements the count by `quantity`, returning the new count.
    pub fn reserve(&mut self, quantity: u32) -> Result<u32, DomainError> {
        if quantity == 0 {
            return Err(DomainError::InvalidQuantity { quantity: 0 });
        }
        let remaining =
            self.stock_count
                .checked_sub(quantity)
                .ok_or(DomainError::InsufficientStock {
                    product_id: self.product_id,
                    available: self.stock_count,
                    requested: quantity,
                })?;
        self.stock_count = remaining;
        Ok(remaining)
    }

    /// Increments the count by `quantity`, returning the new count.
    pub fn release(&mut self, quantity: u32) -> Result<u32, DomainError> {
        if quantity == 0 {
            return Err(DomainError::InvalidQuantity { quantity: 0 });
        }
        self.stock_count = self.stock_count.saturating_add(quantity);
        Ok(self.stock_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_decrements() {
        let mut entry = StockLedgerEntry::new(ProductId::new(1), 10);
        assert_eq!(entry.reserve(5), Ok(5));
        assert_eq!(entry.stock_count, 5);
    }

    #[test]
    fn test_reserve_entire_stock() {
        let mut entry = StockLedgerEntry::new(ProductId::new(1), 3);
        assert_eq!(entry.reserve(3), Ok(0));
    }

    #[test]
    fn test_over_reservation_leaves_entry_unchanged() {
        let mut entry = StockLedgerEntry::new(ProductId::new(1), 4);
        let err = entry.reserve(5).unwrap_err();
        assert_eq!(
            err,
            DomainError::InsufficientStock {
                product_id: ProductId::new(1),
                available: 4,
                requested: 5,
            }
        );
        assert_eq!(entry.stock_count, 4);
    }

    #[test]
    fn test_release_restores_count() {
        let mut entry = StockLedgerEntry::new(ProductId::new(1), 10);
        entry.reserve(5).unwrap();
        assert_eq!(entry.release(5), Ok(10));
    }

    #[test]
    fn test_zero_quantity_rejected() {
        let mut entry = StockLedgerEntry::new(ProductId::new(1), 10);
        assert!(entry.reserve(0).is_err());
        assert!(entry.release(0).is_err());
        assert_eq!(entry.stock_count, 10);
    }
}
