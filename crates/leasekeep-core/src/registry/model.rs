//! Model kinds and their descriptors.

use std::fmt;
use std::str::FromStr;

/// Every entity kind that takes part in backup, restore and wipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ModelKind {
    /// Staff accounts.
    User,
    /// Tenants and prospects.
    Customer,
    /// Buildings managed by a staff user.
    Property,
    /// Rentable units inside a property.
    Unit,
    /// Rental agreements between a customer and a unit.
    Contract,
    /// Files attached to a contract.
    ContractDocument,
    /// Billing periods of a contract.
    Invoice,
    /// Payments applied to an invoice.
    Payment,
    /// Repair requests for a unit.
    MaintenanceTicket,
    /// Append-only staff activity log.
    AuditLog,
    /// Key/value application settings.
    Setting,
}

impl ModelKind {
    /// All kinds in declaration order.
    pub const ALL: [ModelKind; 11] = [
        ModelKind::User,
        ModelKind::Customer,
        ModelKind::Property,
        ModelKind::Unit,
        ModelKind::Contract,
        ModelKind::ContractDocument,
        ModelKind::Invoice,
        ModelKind::Payment,
        ModelKind::MaintenanceTicket,
        ModelKind::AuditLog,
        ModelKind::Setting,
    ];

    /// The model name used in archives and logs.
    pub fn name(self) -> &'static str {
        match self {
            ModelKind::User => "User",
            ModelKind::Customer => "Customer",
            ModelKind::Property => "Property",
            ModelKind::Unit => "Unit",
            ModelKind::Contract => "Contract",
            ModelKind::ContractDocument => "ContractDocument",
            ModelKind::Invoice => "Invoice",
            ModelKind::Payment => "Payment",
            ModelKind::MaintenanceTicket => "MaintenanceTicket",
            ModelKind::AuditLog => "AuditLog",
            ModelKind::Setting => "Setting",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when a name does not match any model kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownModelName(pub String);

impl fmt::Display for UnknownModelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown model '{}'", self.0)
    }
}

impl std::error::Error for UnknownModelName {}

impl FromStr for ModelKind {
    type Err = UnknownModelName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ModelKind::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| UnknownModelName(s.to_string()))
    }
}

/// A foreign key from one model to another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForeignKey {
    /// Field on the declaring model holding the parent's identity.
    pub field: &'static str,
    /// Parent model.
    pub references: ModelKind,
}

impl ForeignKey {
    /// Create a foreign key.
    pub const fn new(field: &'static str, references: ModelKind) -> Self {
        Self { field, references }
    }
}

/// Static description of one model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelDescriptor {
    /// Model kind.
    pub kind: ModelKind,
    /// Identity field used as the cursor and upsert key.
    pub identity: &'static str,
    /// Soft-delete timestamp field, if the model has one.
    pub deletion_marker: Option<&'static str>,
    /// Foreign keys to parent models.
    pub foreign_keys: Vec<ForeignKey>,
}

impl ModelDescriptor {
    /// Create a descriptor keyed by `id` with no marker and no parents.
    pub fn new(kind: ModelKind) -> Self {
        Self {
            kind,
            identity: "id",
            deletion_marker: None,
            foreign_keys: Vec::new(),
        }
    }

    /// Set the identity field.
    pub fn with_identity(mut self, field: &'static str) -> Self {
        self.identity = field;
        self
    }

    /// Set the soft-delete marker field.
    pub fn with_deletion_marker(mut self, field: &'static str) -> Self {
        self.deletion_marker = Some(field);
        self
    }

    /// Add a foreign key.
    pub fn references(mut self, field: &'static str, parent: ModelKind) -> Self {
        self.foreign_keys.push(ForeignKey::new(field, parent));
        self
    }

    /// Model name.
    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    /// Parent models, deduplicated, in declaration order.
    pub fn dependencies(&self) -> Vec<ModelKind> {
        let mut deps: Vec<ModelKind> = Vec::with_capacity(self.foreign_keys.len());
        for fk in &self.foreign_keys {
            if !deps.contains(&fk.references) {
                deps.push(fk.references);
            }
        }
        deps
    }

    /// Whether this model references `parent`.
    pub fn depends_on(&self, parent: ModelKind) -> bool {
        self.foreign_keys.iter().any(|fk| fk.references == parent)
    }
}

/// Soft-delete marker shared by the models that have one.
pub const DELETED_AT: &str = "deletedAt";

/// The declared foreign-key graph of the application schema.
pub fn declared_models() -> Vec<ModelDescriptor> {
    use ModelKind::*;

    vec![
        ModelDescriptor::new(User).with_deletion_marker(DELETED_AT),
        ModelDescriptor::new(Customer).with_deletion_marker(DELETED_AT),
        ModelDescriptor::new(Property)
            .with_deletion_marker(DELETED_AT)
            .references("managerId", User),
        ModelDescriptor::new(Unit)
            .with_deletion_marker(DELETED_AT)
            .references("propertyId", Property),
        ModelDescriptor::new(Contract)
            .with_deletion_marker(DELETED_AT)
            .references("customerId", Customer)
            .references("unitId", Unit),
        ModelDescriptor::new(ContractDocument)
            .references("contractId", Contract)
            .references("uploadedById", User),
        ModelDescriptor::new(Invoice)
            .with_deletion_marker(DELETED_AT)
            .references("contractId", Contract),
        ModelDescriptor::new(Payment)
            .with_deletion_marker(DELETED_AT)
            .references("invoiceId", Invoice),
        ModelDescriptor::new(MaintenanceTicket)
            .with_deletion_marker(DELETED_AT)
            .references("unitId", Unit)
            .references("customerId", Customer)
            .references("assigneeId", User),
        ModelDescriptor::new(AuditLog).references("userId", User),
        ModelDescriptor::new(Setting).with_identity("key"),
    ]
}
