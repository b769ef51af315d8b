//! Warehouses: physical locations, their contact data and optional capacity profile.

use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockroom_core::{DomainError, DomainResult, Entity, MAX_QUANTITY, UserId, WarehouseId};

use crate::validate;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub line1: String,
    pub line2: Option<String>,
    pub city: String,
    pub state: Option<String>,
    pub postal_code: String,
    pub country: String,
}

impl Address {
    pub fn validate(&self) -> DomainResult<()> {
        validate::not_blank("address.line1", &self.line1)?;
        validate::max_len("address.line1", &self.line1, 200)?;
        if let Some(line2) = &self.line2 {
            validate::max_len("address.line2", line2, 200)?;
        }
        validate::not_blank("address.city", &self.city)?;
        validate::max_len("address.city", &self.city, 100)?;
        if let Some(state) = &self.state {
            validate::max_len("address.state", state, 100)?;
        }
        validate::postal_code(&self.postal_code)?;
        validate::country(&self.country)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewWarehouse {
    pub code: String,
    pub name: String,
    pub address: Address,
    pub manager_id: Option<UserId>,
    pub phone: Option<String>,
    pub email: Option<String>,
}

/// Field changes for an existing warehouse. The code is not patchable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarehousePatch {
    pub name: Option<String>,
    pub address: Option<Address>,
    pub phone: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarehouseRecord {
    pub id: WarehouseId,
    pub code: String,
    pub name: String,
    pub address: Address,
    pub manager_id: Option<UserId>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(into = "WarehouseRecord")]
pub struct Warehouse {
    rec: WarehouseRecord,
}

fn validate_name(name: &str) -> DomainResult<()> {
    validate::not_blank("name", name)?;
    validate::max_len("name", name, 200)
}

fn validate_contact(phone: Option<&str>, email: Option<&str>) -> DomainResult<()> {
    if let Some(phone) = phone {
        validate::phone(phone)?;
    }
    if let Some(email) = email {
        validate::email(email)?;
    }
    Ok(())
}

impl Warehouse {
    pub fn create(id: WarehouseId, new: NewWarehouse, now: DateTime<Utc>) -> DomainResult<Self> {
        validate::warehouse_code(&new.code)?;
        validate_name(&new.name)?;
        new.address.validate()?;
        validate_contact(new.phone.as_deref(), new.email.as_deref())?;
        Ok(Self {
            rec: WarehouseRecord {
                id,
                code: new.code,
                name: new.name,
                address: new.address,
                manager_id: new.manager_id,
                phone: new.phone,
                email: new.email,
                is_active: true,
                created_at: now,
                updated_at: now,
            },
        })
    }

    pub fn restore(rec: WarehouseRecord) -> DomainResult<Self> {
        validate::warehouse_code(&rec.code)
            .map_err(|e| DomainError::internal(format!("stored warehouse {}: {}", rec.id, e.message())))?;
        Ok(Self { rec })
    }

    pub fn record(&self) -> &WarehouseRecord {
        &self.rec
    }

    pub fn into_record(self) -> WarehouseRecord {
        self.rec
    }

    pub fn code(&self) -> &str {
        &self.rec.code
    }

    pub fn name(&self) -> &str {
        &self.rec.name
    }

    pub fn manager_id(&self) -> Option<UserId> {
        self.rec.manager_id
    }

    pub fn is_active(&self) -> bool {
        self.rec.is_active
    }

    /// Validates the whole patch before applying any of it.
    pub fn apply(&mut self, patch: WarehousePatch, now: DateTime<Utc>) -> DomainResult<()> {
        if let Some(name) = &patch.name {
            validate_name(name)?;
        }
        if let Some(address) = &patch.address {
            address.validate()?;
        }
        validate_contact(patch.phone.as_deref(), patch.email.as_deref())?;

        if let Some(name) = patch.name {
            self.rec.name = name;
        }
        if let Some(address) = patch.address {
            self.rec.address = address;
        }
        if patch.phone.is_some() {
            self.rec.phone = patch.phone;
        }
        if patch.email.is_some() {
            self.rec.email = patch.email;
        }
        self.rec.updated_at = now;
        Ok(())
    }

    pub fn assign_manager(&mut self, manager: Option<UserId>, now: DateTime<Utc>) {
        self.rec.manager_id = manager;
        self.rec.updated_at = now;
    }

    pub fn deactivate(&mut self, now: DateTime<Utc>) {
        self.rec.is_active = false;
        self.rec.updated_at = now;
    }

    pub fn activate(&mut self, now: DateTime<Utc>) {
        self.rec.is_active = true;
        self.rec.updated_at = now;
    }
}

impl Entity for Warehouse {
    type Id = WarehouseId;

    fn id(&self) -> &Self::Id {
        &self.rec.id
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.rec.updated_at
    }
}

impl From<Warehouse> for WarehouseRecord {
    fn from(value: Warehouse) -> Self {
        value.rec
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarehouseKind {
    Retail,
    Wholesale,
    Distribution,
    Fulfillment,
    Return,
}

impl WarehouseKind {
    pub fn as_str(self) -> &'static str {
        match self {
            WarehouseKind::Retail => "retail",
            WarehouseKind::Wholesale => "wholesale",
            WarehouseKind::Distribution => "distribution",
            WarehouseKind::Fulfillment => "fulfillment",
            WarehouseKind::Return => "return",
        }
    }
}

impl FromStr for WarehouseKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "retail" => Ok(WarehouseKind::Retail),
            "wholesale" => Ok(WarehouseKind::Wholesale),
            "distribution" => Ok(WarehouseKind::Distribution),
            "fulfillment" => Ok(WarehouseKind::Fulfillment),
            "return" => Ok(WarehouseKind::Return),
            other => Err(DomainError::invalid(format!("unknown warehouse type '{other}'"))),
        }
    }
}

/// Capacity and facility profile attached to a warehouse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarehouseExtension {
    pub kind: WarehouseKind,
    pub capacity: Option<i64>,
    pub square_footage: Option<i64>,
    pub dock_count: Option<i32>,
    pub temperature_controlled: bool,
    pub security_level: i32,
}

impl WarehouseExtension {
    pub fn new(kind: WarehouseKind) -> Self {
        Self {
            kind,
            capacity: None,
            square_footage: None,
            dock_count: None,
            temperature_controlled: false,
            security_level: 0,
        }
    }

    pub fn validate(&self) -> DomainResult<()> {
        if let Some(capacity) = self.capacity {
            validate::range("capacity", capacity, 0, MAX_QUANTITY)?;
        }
        if let Some(sq) = self.square_footage {
            validate::range("square_footage", sq, 0, MAX_QUANTITY)?;
        }
        if let Some(docks) = self.dock_count {
            validate::range("dock_count", i64::from(docks), 0, 9_999)?;
        }
        validate::range("security_level", i64::from(self.security_level), 0, 10)
    }
}

/// A warehouse together with its extension record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WarehouseExtended {
    pub base: Warehouse,
    pub ext: WarehouseExtension,
}

impl WarehouseExtended {
    pub fn new(base: Warehouse, ext: WarehouseExtension) -> DomainResult<Self> {
        ext.validate()?;
        Ok(Self { base, ext })
    }

    pub fn set_capacity(&mut self, capacity: Option<i64>, now: DateTime<Utc>) -> DomainResult<()> {
        if let Some(c) = capacity {
            validate::range("capacity", c, 0, MAX_QUANTITY)?;
        }
        self.ext.capacity = capacity;
        self.base.rec.updated_at = now;
        Ok(())
    }

    /// Percent of capacity in use, capped at 100. `None` without a positive capacity.
    pub fn utilization(&self, current_stock: i64) -> Option<f64> {
        utilization_percent(current_stock, self.ext.capacity?)
    }
}

pub fn utilization_percent(current_stock: i64, capacity: i64) -> Option<f64> {
    if capacity <= 0 {
        return None;
    }
    Some((current_stock.max(0) as f64 / capacity as f64 * 100.0).min(100.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-04-01T00:00:00Z").unwrap().with_timezone(&Utc)
    }

    fn test_new() -> NewWarehouse {
        NewWarehouse {
            code: "WH-MAIN".into(),
            name: "Main warehouse".into(),
            address: Address {
                line1: "1 Dock Road".into(),
                line2: None,
                city: "Rotterdam".into(),
                state: None,
                postal_code: "3011 AA".into(),
                country: "NL".into(),
            },
            manager_id: None,
            phone: Some("+31 10 123 4567".into()),
            email: Some("main@example.com".into()),
        }
    }

    #[test]
    fn create_validates_fields() {
        let wh = Warehouse::create(WarehouseId::new(), test_new(), test_now()).unwrap();
        assert!(wh.is_active());
        assert_eq!(wh.code(), "WH-MAIN");

        let mut bad = test_new();
        bad.code = "wh main".into();
        assert!(Warehouse::create(WarehouseId::new(), bad, test_now()).is_err());

        let mut bad = test_new();
        bad.name = "n".repeat(201);
        assert!(Warehouse::create(WarehouseId::new(), bad, test_now()).is_err());

        let mut bad = test_new();
        bad.address.country = "Netherlands".into();
        assert!(Warehouse::create(WarehouseId::new(), bad, test_now()).is_err());
    }

    #[test]
    fn patch_is_all_or_nothing() {
        let mut wh = Warehouse::create(WarehouseId::new(), test_new(), test_now()).unwrap();
        let before = wh.clone();
        let patch = WarehousePatch {
            name: Some("Renamed".into()),
            email: Some("broken".into()),
            ..WarehousePatch::default()
        };
        assert!(wh.apply(patch, test_now()).is_err());
        assert_eq!(wh, before);

        wh.apply(WarehousePatch { name: Some("Renamed".into()), ..Default::default() }, test_now())
            .unwrap();
        assert_eq!(wh.name(), "Renamed");
        assert_eq!(wh.code(), "WH-MAIN");
    }

    #[test]
    fn deactivation_is_a_flag() {
        let mut wh = Warehouse::create(WarehouseId::new(), test_new(), test_now()).unwrap();
        wh.deactivate(test_now());
        assert!(!wh.is_active());
        let manager = UserId::new();
        wh.assign_manager(Some(manager), test_now());
        assert_eq!(wh.manager_id(), Some(manager));
    }

    #[test]
    fn extension_bounds() {
        let mut ext = WarehouseExtension::new(WarehouseKind::Distribution);
        ext.dock_count = Some(10_000);
        assert!(ext.validate().is_err());
        ext.dock_count = Some(12);
        ext.security_level = 11;
        assert!(ext.validate().is_err());
        ext.security_level = 10;
        assert!(ext.validate().is_ok());
    }

    #[test]
    fn utilization_is_capped() {
        let base = Warehouse::create(WarehouseId::new(), test_new(), test_now()).unwrap();
        let mut ext = WarehouseExtended::new(base, WarehouseExtension::new(WarehouseKind::Retail)).unwrap();
        assert_eq!(ext.utilization(50), None);
        ext.set_capacity(Some(200), test_now()).unwrap();
        assert_eq!(ext.utilization(50), Some(25.0));
        assert_eq!(ext.utilization(500), Some(100.0));
        ext.set_capacity(Some(0), test_now()).unwrap();
        assert_eq!(ext.utilization(50), None);
        assert!(ext.set_capacity(Some(-1), test_now()).is_err());
    }

    #[test]
    fn kind_names() {
        for k in ["retail", "wholesale", "distribution", "fulfillment", "return"] {
            assert_eq!(k.parse::<WarehouseKind>().unwrap().as_str(), k);
        }
        assert!("depot".parse::<WarehouseKind>().is_err());
    }
}
