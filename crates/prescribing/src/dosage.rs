use serde::{Deserialize, Serialize};

use pharmledger_core::{DomainError, DomainResult, ValueObject};

/// Administration frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    OnceDaily,
    TwiceDaily,
    ThreeTimesDaily,
    FourTimesDaily,
    Every4Hours,
    Every6Hours,
    Every8Hours,
    Every12Hours,
    /// PRN: no fixed schedule, quantity must be stated explicitly.
    AsNeeded,
    /// Single immediate dose.
    Stat,
}

impl Frequency {
    /// Doses per day, when the schedule is fixed.
    pub fn daily_multiplier(&self) -> Option<i64> {
        match self {
            Frequency::OnceDaily => Some(1),
            Frequency::TwiceDaily | Frequency::Every12Hours => Some(2),
            Frequency::ThreeTimesDaily | Frequency::Every8Hours => Some(3),
            Frequency::FourTimesDaily | Frequency::Every6Hours => Some(4),
            Frequency::Every4Hours => Some(6),
            Frequency::AsNeeded | Frequency::Stat => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    Oral,
    Sublingual,
    Intravenous,
    Intramuscular,
    Subcutaneous,
    Topical,
    Inhalation,
    Rectal,
    Ophthalmic,
    Other,
}

/// How a drug is to be taken. Quantities are in dispensing units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dosage {
    /// Units per administration.
    pub dose: i64,
    pub frequency: Frequency,
    pub route: Route,
    pub duration_days: i64,
    /// Explicit quantity that replaces the computed one.
    pub quantity_override: Option<i64>,
}

impl ValueObject for Dosage {}

impl Dosage {
    /// Quantity to dispense: dose × daily multiplier × days, unless overridden.
    pub fn required_quantity(&self) -> DomainResult<i64> {
        if self.dose <= 0 {
            return Err(DomainError::validation("dose must be positive"));
        }
        if let Some(quantity) = self.quantity_override {
            if quantity <= 0 {
                return Err(DomainError::validation("quantity override must be positive"));
            }
            return Ok(quantity);
        }
        match self.frequency {
            Frequency::Stat => Ok(self.dose),
            Frequency::AsNeeded => Err(DomainError::validation(
                "as-needed orders must state the quantity to dispense",
            )),
            fixed => {
                if self.duration_days <= 0 {
                    return Err(DomainError::validation("duration must be at least one day"));
                }
                let per_day = fixed.daily_multiplier().unwrap_or(1);
                Ok(self.dose * per_day * self.duration_days)
            }
        }
    }
}
