use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use pharmledger_core::{Aggregate, AggregateRoot, DomainError, typed_id};
use pharmledger_events::{Command, Event};

use crate::reference::CategoryId;
use crate::thresholds::StockThresholds;

typed_id!(
    /// Drug identifier.
    DrugId
);

/// Formulary standing of a drug in the hospital.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormularyStatus {
    Formulary,
    NonFormulary,
    Restricted,
}

/// Controlled-substance and safety flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlFlags {
    pub narcotic: bool,
    pub psychotropic: bool,
    pub high_alert: bool,
}

impl ControlFlags {
    pub fn is_controlled(&self) -> bool {
        self.narcotic || self.psychotropic
    }

    /// Controlled or high-alert drugs go through dual checks (verification,
    /// counseling).
    pub fn requires_dual_check(&self) -> bool {
        self.is_controlled() || self.high_alert
    }
}

/// Aggregate root: Drug.
///
/// Holds identity and policy only. On-hand stock is never stored here; it is
/// derived from batch state by the inventory ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Drug {
    id: DrugId,
    code: String,
    generic_name: String,
    brand_name: Option<String>,
    strength: String,
    unit: String,
    category_id: Option<CategoryId>,
    thresholds: StockThresholds,
    controls: ControlFlags,
    formulary_status: FormularyStatus,
    discontinued: bool,
    version: u64,
    created: bool,
}

impl Drug {
    /// Create an empty, not-yet-registered aggregate instance for rehydration.
    pub fn empty(id: DrugId) -> Self {
        Self {
            id,
            code: String::new(),
            generic_name: String::new(),
            brand_name: None,
            strength: String::new(),
            unit: String::new(),
            category_id: None,
            thresholds: StockThresholds {
                minimum: 0,
                maximum: 0,
                reorder_quantity: 1,
            },
            controls: ControlFlags::default(),
            formulary_status: FormularyStatus::Formulary,
            discontinued: false,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> DrugId {
        self.id
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn generic_name(&self) -> &str {
        &self.generic_name
    }

    pub fn brand_name(&self) -> Option<&str> {
        self.brand_name.as_deref()
    }

    pub fn strength(&self) -> &str {
        &self.strength
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn category_id(&self) -> Option<CategoryId> {
        self.category_id
    }

    pub fn thresholds(&self) -> StockThresholds {
        self.thresholds
    }

    pub fn controls(&self) -> ControlFlags {
        self.controls
    }

    pub fn formulary_status(&self) -> FormularyStatus {
        self.formulary_status
    }

    pub fn is_registered(&self) -> bool {
        self.created
    }

    pub fn is_active(&self) -> bool {
        self.created && !self.discontinued
    }

    pub fn requires_dual_check(&self) -> bool {
        self.controls.requires_dual_check()
    }

    /// Therapeutic equivalence used for substitution: same generic and strength.
    pub fn is_equivalent_to(&self, other: &Drug) -> bool {
        self.id != other.id
            && self.generic_name.eq_ignore_ascii_case(&other.generic_name)
            && self.strength.eq_ignore_ascii_case(&other.strength)
    }
}

impl AggregateRoot for Drug {
    type Id = DrugId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: RegisterDrug.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterDrug {
    pub drug_id: DrugId,
    pub code: String,
    pub generic_name: String,
    pub brand_name: Option<String>,
    pub strength: String,
    pub unit: String,
    pub category_id: Option<CategoryId>,
    pub thresholds: StockThresholds,
    pub controls: ControlFlags,
    pub formulary_status: FormularyStatus,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdateStockThresholds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateStockThresholds {
    pub drug_id: DrugId,
    pub thresholds: StockThresholds,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ChangeFormularyStatus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeFormularyStatus {
    pub drug_id: DrugId,
    pub status: FormularyStatus,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DiscontinueDrug.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscontinueDrug {
    pub drug_id: DrugId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DrugCommand {
    RegisterDrug(RegisterDrug),
    UpdateStockThresholds(UpdateStockThresholds),
    ChangeFormularyStatus(ChangeFormularyStatus),
    DiscontinueDrug(DiscontinueDrug),
}

impl Command for DrugCommand {
    fn target_aggregate_id(&self) -> pharmledger_core::AggregateId {
        match self {
            DrugCommand::RegisterDrug(c) => c.drug_id.0,
            DrugCommand::UpdateStockThresholds(c) => c.drug_id.0,
            DrugCommand::ChangeFormularyStatus(c) => c.drug_id.0,
            DrugCommand::DiscontinueDrug(c) => c.drug_id.0,
        }
    }
}

/// Event: DrugRegistered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrugRegistered {
    pub drug_id: DrugId,
    pub code: String,
    pub generic_name: String,
    pub brand_name: Option<String>,
    pub strength: String,
    pub unit: String,
    pub category_id: Option<CategoryId>,
    pub thresholds: StockThresholds,
    pub controls: ControlFlags,
    pub formulary_status: FormularyStatus,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockThresholdsUpdated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockThresholdsUpdated {
    pub drug_id: DrugId,
    pub thresholds: StockThresholds,
    pub occurred_at: DateTime<Utc>,
}

/// Event: FormularyStatusChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormularyStatusChanged {
    pub drug_id: DrugId,
    pub from: FormularyStatus,
    pub to: FormularyStatus,
    pub occurred_at: DateTime<Utc>,
}

/// Event: DrugDiscontinued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrugDiscontinued {
    pub drug_id: DrugId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DrugEvent {
    DrugRegistered(DrugRegistered),
    StockThresholdsUpdated(StockThresholdsUpdated),
    FormularyStatusChanged(FormularyStatusChanged),
    DrugDiscontinued(DrugDiscontinued),
}

impl DrugEvent {
    pub fn drug_id(&self) -> DrugId {
        match self {
            DrugEvent::DrugRegistered(e) => e.drug_id,
            DrugEvent::StockThresholdsUpdated(e) => e.drug_id,
            DrugEvent::FormularyStatusChanged(e) => e.drug_id,
            DrugEvent::DrugDiscontinued(e) => e.drug_id,
        }
    }
}

impl Event for DrugEvent {
    fn event_type(&self) -> &'static str {
        match self {
            DrugEvent::DrugRegistered(_) => "catalog.drug.registered",
            DrugEvent::StockThresholdsUpdated(_) => "catalog.drug.thresholds_updated",
            DrugEvent::FormularyStatusChanged(_) => "catalog.drug.formulary_changed",
            DrugEvent::DrugDiscontinued(_) => "catalog.drug.discontinued",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            DrugEvent::DrugRegistered(e) => e.occurred_at,
            DrugEvent::StockThresholdsUpdated(e) => e.occurred_at,
            DrugEvent::FormularyStatusChanged(e) => e.occurred_at,
            DrugEvent::DrugDiscontinued(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Drug {
    type Command = DrugCommand;
    type Event = DrugEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            DrugEvent::DrugRegistered(e) => {
                self.id = e.drug_id;
                self.code = e.code.clone();
                self.generic_name = e.generic_name.clone();
                self.brand_name = e.brand_name.clone();
                self.strength = e.strength.clone();
                self.unit = e.unit.clone();
                self.category_id = e.category_id;
                self.thresholds = e.thresholds;
                self.controls = e.controls;
                self.formulary_status = e.formulary_status;
                self.discontinued = false;
                self.created = true;
            }
            DrugEvent::StockThresholdsUpdated(e) => {
                self.thresholds = e.thresholds;
            }
            DrugEvent::FormularyStatusChanged(e) => {
                self.formulary_status = e.to;
            }
            DrugEvent::DrugDiscontinued(_) => {
                self.discontinued = true;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            DrugCommand::RegisterDrug(cmd) => self.handle_register(cmd),
            DrugCommand::UpdateStockThresholds(cmd) => self.handle_thresholds(cmd),
            DrugCommand::ChangeFormularyStatus(cmd) => self.handle_formulary(cmd),
            DrugCommand::DiscontinueDrug(cmd) => self.handle_discontinue(cmd),
        }
    }
}

impl Drug {
    fn ensure_drug_id(&self, drug_id: DrugId) -> Result<(), DomainError> {
        if self.id != drug_id {
            return Err(DomainError::invariant("drug_id mismatch"));
        }
        Ok(())
    }

    fn ensure_active(&self, drug_id: DrugId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_drug_id(drug_id)?;
        if self.discontinued {
            return Err(DomainError::invalid_state("drug is discontinued"));
        }
        Ok(())
    }

    fn handle_register(&self, cmd: &RegisterDrug) -> Result<Vec<DrugEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("drug already registered"));
        }
        if cmd.code.trim().is_empty() {
            return Err(DomainError::validation("drug code cannot be empty"));
        }
        if cmd.generic_name.trim().is_empty() {
            return Err(DomainError::validation("generic name cannot be empty"));
        }
        if cmd.unit.trim().is_empty() {
            return Err(DomainError::validation("dispensing unit cannot be empty"));
        }
        cmd.thresholds.validate()?;

        Ok(vec![DrugEvent::DrugRegistered(DrugRegistered {
            drug_id: cmd.drug_id,
            code: cmd.code.trim().to_string(),
            generic_name: cmd.generic_name.trim().to_string(),
            brand_name: cmd.brand_name.clone(),
            strength: cmd.strength.trim().to_string(),
            unit: cmd.unit.trim().to_string(),
            category_id: cmd.category_id,
            thresholds: cmd.thresholds,
            controls: cmd.controls,
            formulary_status: cmd.formulary_status,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_thresholds(&self, cmd: &UpdateStockThresholds) -> Result<Vec<DrugEvent>, DomainError> {
        self.ensure_active(cmd.drug_id)?;
        cmd.thresholds.validate()?;
        if cmd.thresholds == self.thresholds {
            return Ok(vec![]);
        }
        Ok(vec![DrugEvent::StockThresholdsUpdated(StockThresholdsUpdated {
            drug_id: cmd.drug_id,
            thresholds: cmd.thresholds,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_formulary(&self, cmd: &ChangeFormularyStatus) -> Result<Vec<DrugEvent>, DomainError> {
        self.ensure_active(cmd.drug_id)?;
        if cmd.status == self.formulary_status {
            return Ok(vec![]);
        }
        Ok(vec![DrugEvent::FormularyStatusChanged(FormularyStatusChanged {
            drug_id: cmd.drug_id,
            from: self.formulary_status,
            to: cmd.status,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_discontinue(&self, cmd: &DiscontinueDrug) -> Result<Vec<DrugEvent>, DomainError> {
        self.ensure_active(cmd.drug_id)?;
        if cmd.reason.trim().is_empty() {
            return Err(DomainError::validation("discontinuation reason is required"));
        }
        Ok(vec![DrugEvent::DrugDiscontinued(DrugDiscontinued {
            drug_id: cmd.drug_id,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }
}
