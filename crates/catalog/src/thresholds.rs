use serde::{Deserialize, Serialize};

use pharmledger_core::{DomainError, DomainResult, ValueObject};

/// Stock thresholds configured per drug (in dispensing units).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockThresholds {
    pub minimum: i64,
    pub maximum: i64,
    pub reorder_quantity: i64,
}

impl ValueObject for StockThresholds {}

/// Classification of a derived stock figure against the thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockStatus {
    OutOfStock,
    BelowMinimum,
    ReorderPoint,
    Normal,
    Overstocked,
}

impl StockThresholds {
    pub fn new(minimum: i64, maximum: i64, reorder_quantity: i64) -> DomainResult<Self> {
        let t = Self {
            minimum,
            maximum,
            reorder_quantity,
        };
        t.validate()?;
        Ok(t)
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.minimum < 0 {
            return Err(DomainError::validation("minimum stock cannot be negative"));
        }
        if self.maximum < self.minimum {
            return Err(DomainError::validation(
                "maximum stock cannot be below minimum stock",
            ));
        }
        if self.reorder_quantity <= 0 {
            return Err(DomainError::validation("reorder quantity must be positive"));
        }
        Ok(())
    }

    /// Reorder point: the minimum plus one reorder lot of cover.
    pub fn reorder_point(&self) -> i64 {
        self.minimum + self.reorder_quantity
    }

    /// Pure low-stock detection, evaluated on read.
    pub fn classify(&self, current_stock: i64) -> StockStatus {
        if current_stock <= 0 {
            StockStatus::OutOfStock
        } else if current_stock < self.minimum {
            StockStatus::BelowMinimum
        } else if current_stock <= self.reorder_point() {
            StockStatus::ReorderPoint
        } else if self.maximum > 0 && current_stock > self.maximum {
            StockStatus::Overstocked
        } else {
            StockStatus::Normal
        }
    }

    /// Quantity to order to bring `current_stock` back up to the maximum.
    pub fn suggested_order(&self, current_stock: i64) -> i64 {
        match self.classify(current_stock) {
            StockStatus::OutOfStock | StockStatus::BelowMinimum | StockStatus::ReorderPoint => {
                (self.maximum - current_stock.max(0)).max(self.reorder_quantity)
            }
            StockStatus::Normal | StockStatus::Overstocked => 0,
        }
    }
}
