//! Pure reference data: drug categories and suppliers.

use serde::{Deserialize, Serialize};

use pharmledger_core::{DomainError, DomainResult, Entity, typed_id};

typed_id!(
    /// Drug category identifier.
    CategoryId
);

typed_id!(
    /// Supplier identifier.
    SupplierId
);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrugCategory {
    pub id: CategoryId,
    pub code: String,
    pub name: String,
    pub parent_id: Option<CategoryId>,
}

impl DrugCategory {
    pub fn new(
        id: CategoryId,
        code: impl Into<String>,
        name: impl Into<String>,
        parent_id: Option<CategoryId>,
    ) -> DomainResult<Self> {
        let code = code.into();
        let name = name.into();
        if code.trim().is_empty() || name.trim().is_empty() {
            return Err(DomainError::validation("category code and name are required"));
        }
        if parent_id == Some(id) {
            return Err(DomainError::validation("category cannot be its own parent"));
        }
        Ok(Self {
            id,
            code,
            name,
            parent_id,
        })
    }
}

impl Entity for DrugCategory {
    type Id = CategoryId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Supplier {
    pub id: SupplierId,
    pub code: String,
    pub name: String,
    /// Where quality-issue notifications are sent.
    pub contact_email: Option<String>,
    pub active: bool,
}

impl Supplier {
    pub fn new(
        id: SupplierId,
        code: impl Into<String>,
        name: impl Into<String>,
        contact_email: Option<String>,
    ) -> DomainResult<Self> {
        let code = code.into();
        let name = name.into();
        if code.trim().is_empty() || name.trim().is_empty() {
            return Err(DomainError::validation("supplier code and name are required"));
        }
        if let Some(email) = &contact_email {
            if !email.contains('@') {
                return Err(DomainError::validation("supplier contact email is malformed"));
            }
        }
        Ok(Self {
            id,
            code,
            name,
            contact_email,
            active: true,
        })
    }
}

impl Entity for Supplier {
    type Id = SupplierId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
