//! Price lists
//!
//! A service (a cloud) prices its items per hour. Default items apply to
//! every service of a resource type until the service overrides the key in
//! its own price list.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use conductor_rbac::ResourceType;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::error::{CostError, CostResult};
use crate::estimate::ScopeRef;
use crate::period::hours_in_month;

/// Kind of priced item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PriceItemType {
    #[default]
    Flavor,
    Storage,
    LicenseApplication,
    LicenseOs,
    Support,
    Network,
    Usage,
}

impl PriceItemType {
    /// Get the string representation of the item type.
    pub fn as_str(&self) -> &'static str {
        match self {
            PriceItemType::Flavor => "flavor",
            PriceItemType::Storage => "storage",
            PriceItemType::LicenseApplication => "license-application",
            PriceItemType::LicenseOs => "license-os",
            PriceItemType::Support => "support",
            PriceItemType::Network => "network",
            PriceItemType::Usage => "usage",
        }
    }

    /// Parse an item type from its string representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "flavor" => Some(PriceItemType::Flavor),
            "storage" => Some(PriceItemType::Storage),
            "license-application" => Some(PriceItemType::LicenseApplication),
            "license-os" => Some(PriceItemType::LicenseOs),
            "support" => Some(PriceItemType::Support),
            "network" => Some(PriceItemType::Network),
            "usage" => Some(PriceItemType::Usage),
            _ => None,
        }
    }
}

impl fmt::Display for PriceItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Round a price to cents.
pub fn round_price(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Monthly cost of an hourly rate, as a two decimal string.
pub fn monthly_rate(hourly: f64, now: DateTime<Utc>) -> String {
    format!("{:.2}", hourly * hours_in_month(now) as f64)
}

/// Hourly price of an item of a service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceListItem {
    /// Unique item ID
    #[serde(rename = "uuid")]
    pub id: Uuid,
    /// Item key, e.g. a flavor name
    pub key: String,
    /// Hourly rate
    pub value: f64,
    /// Units label
    pub units: String,
    /// Kind of item
    pub item_type: PriceItemType,
    /// Service the price belongs to
    pub service: ScopeRef,
    /// Resource type the item prices
    pub resource_type: ResourceType,
    /// Entered by hand rather than imported from a backend
    pub is_manually_input: bool,
}

impl PriceListItem {
    /// Create an item. The value is rounded to cents.
    pub fn new(service: ScopeRef, key: impl Into<String>, value: f64, item_type: PriceItemType) -> Self {
        Self {
            id: Uuid::now_v7(),
            key: key.into(),
            value: round_price(value),
            units: String::new(),
            item_type,
            service,
            resource_type: ResourceType::Instance,
            is_manually_input: false,
        }
    }

    /// Set the units label.
    pub fn with_units(mut self, units: impl Into<String>) -> Self {
        self.units = units.into();
        self
    }

    /// Set the priced resource type.
    pub fn with_resource_type(mut self, resource_type: ResourceType) -> Self {
        self.resource_type = resource_type;
        self
    }

    /// Mark the item as entered by hand.
    pub fn manually_input(mut self) -> Self {
        self.is_manually_input = true;
        self
    }

    /// Cost of the item for the month of `now`.
    pub fn monthly_rate(&self, now: DateTime<Utc>) -> String {
        monthly_rate(self.value, now)
    }
}

/// Price applied to all services of a resource type unless overridden.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefaultPriceListItem {
    /// Unique item ID
    #[serde(rename = "uuid")]
    pub id: Uuid,
    /// Display name
    pub name: String,
    /// Item key
    pub key: String,
    /// Hourly rate
    pub value: f64,
    /// Units label
    pub units: String,
    /// Kind of item
    pub item_type: PriceItemType,
    /// Resource type the item prices
    pub resource_type: ResourceType,
}

impl DefaultPriceListItem {
    /// Create a default item. The value is rounded to cents.
    pub fn new(
        name: impl Into<String>,
        key: impl Into<String>,
        value: f64,
        item_type: PriceItemType,
        resource_type: ResourceType,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            name: name.into(),
            key: key.into(),
            value: round_price(value),
            units: String::new(),
            item_type,
            resource_type,
        }
    }

    /// Cost of the item for the month of `now`.
    pub fn monthly_rate(&self, now: DateTime<Utc>) -> String {
        monthly_rate(self.value, now)
    }

    /// Materialize the default for a service.
    pub fn for_service(&self, service: ScopeRef) -> PriceListItem {
        PriceListItem {
            id: Uuid::now_v7(),
            key: self.key.clone(),
            value: self.value,
            units: self.units.clone(),
            item_type: self.item_type,
            service,
            resource_type: self.resource_type,
            is_manually_input: false,
        }
    }
}

/// Price list of a service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceList {
    /// Unique price list ID
    #[serde(rename = "uuid")]
    pub id: Uuid,
    /// Priced service
    pub service: ScopeRef,
    /// Items of the list
    pub items: Vec<PriceListItem>,
}

/// Store of price lists and default items.
#[derive(Debug, Default)]
pub struct PriceListBook {
    lists: BTreeMap<Uuid, PriceList>,
    defaults: BTreeMap<Uuid, DefaultPriceListItem>,
}

impl PriceListBook {
    /// Create an empty book.
    pub fn new() -> Self {
        Self::default()
    }

    // ----- Price lists -----

    /// Create the price list of a service.
    ///
    /// # Errors
    ///
    /// - `DuplicatePriceList` when the service already has one
    /// - `DuplicateItem` when two items share a key
    pub fn create(&mut self, service: ScopeRef, items: Vec<PriceListItem>) -> CostResult<PriceList> {
        if self.lists.values().any(|list| list.service == service) {
            return Err(CostError::DuplicatePriceList);
        }
        let list = PriceList {
            id: Uuid::now_v7(),
            service,
            items: Self::bind_items(service, items)?,
        };
        info!(
            price_list_id = %list.id,
            service_id = %service.id,
            items = list.items.len(),
            "Price list created"
        );
        self.lists.insert(list.id, list.clone());
        Ok(list)
    }

    /// Update a price list. Given items replace all existing items.
    pub fn update(&mut self, id: Uuid, items: Option<Vec<PriceListItem>>) -> CostResult<PriceList> {
        let list = self
            .lists
            .get_mut(&id)
            .ok_or_else(|| CostError::not_found("price_list", id))?;
        if let Some(items) = items {
            list.items = Self::bind_items(list.service, items)?;
            info!(price_list_id = %id, items = list.items.len(), "Price list items replaced");
        }
        Ok(list.clone())
    }

    /// Get a price list.
    pub fn get(&self, id: Uuid) -> CostResult<&PriceList> {
        self.lists.get(&id).ok_or_else(|| CostError::not_found("price_list", id))
    }

    /// Delete a price list.
    pub fn delete(&mut self, id: Uuid) -> CostResult<PriceList> {
        self.lists.remove(&id).ok_or_else(|| CostError::not_found("price_list", id))
    }

    fn bind_items(service: ScopeRef, items: Vec<PriceListItem>) -> CostResult<Vec<PriceListItem>> {
        let mut bound: Vec<PriceListItem> = Vec::with_capacity(items.len());
        for mut item in items {
            if bound.iter().any(|existing| existing.key == item.key) {
                return Err(CostError::DuplicateItem { key: item.key });
            }
            item.service = service;
            bound.push(item);
        }
        Ok(bound)
    }

    // ----- Items -----

    /// Items priced for a service.
    pub fn items_for(&self, service: ScopeRef) -> Vec<&PriceListItem> {
        self.lists
            .values()
            .filter(|list| list.service == service)
            .flat_map(|list| list.items.iter())
            .collect()
    }

    /// Add an item, creating the service's price list when needed.
    ///
    /// # Errors
    ///
    /// `DuplicateItem` when the service already prices the key
    pub fn add_item(&mut self, item: PriceListItem) -> CostResult<PriceListItem> {
        if self.items_for(item.service).iter().any(|i| i.key == item.key) {
            return Err(CostError::DuplicateItem { key: item.key });
        }
        self.upsert_item(item)
    }

    /// Insert an item or replace the service's item with the same key.
    pub fn upsert_item(&mut self, item: PriceListItem) -> CostResult<PriceListItem> {
        let service = item.service;
        let list_id = match self.lists.values().find(|list| list.service == service) {
            Some(list) => list.id,
            None => self.create(service, Vec::new())?.id,
        };
        let list = self
            .lists
            .get_mut(&list_id)
            .ok_or_else(|| CostError::not_found("price_list", list_id))?;
        match list.items.iter_mut().find(|existing| existing.key == item.key) {
            Some(existing) => {
                existing.value = item.value;
                existing.units = item.units.clone();
                existing.item_type = item.item_type;
                existing.resource_type = item.resource_type;
                existing.is_manually_input = item.is_manually_input;
                Ok(existing.clone())
            }
            None => {
                list.items.push(item.clone());
                Ok(item)
            }
        }
    }

    // ----- Defaults -----

    /// Register a default item.
    pub fn add_default(&mut self, item: DefaultPriceListItem) -> DefaultPriceListItem {
        self.defaults.insert(item.id, item.clone());
        item
    }

    /// Defaults of a resource type.
    pub fn defaults_for(&self, resource_type: ResourceType) -> Vec<&DefaultPriceListItem> {
        self.defaults
            .values()
            .filter(|item| item.resource_type == resource_type)
            .collect()
    }

    /// Effective hourly price of a key for a service: the service's own item
    /// when present, otherwise the default of the resource type.
    pub fn price_of(&self, service: ScopeRef, resource_type: ResourceType, key: &str) -> Option<f64> {
        self.items_for(service)
            .into_iter()
            .find(|item| item.key == key && item.resource_type == resource_type)
            .map(|item| item.value)
            .or_else(|| {
                self.defaults_for(resource_type)
                    .into_iter()
                    .find(|item| item.key == key)
                    .map(|item| item.value)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn cloud() -> ScopeRef {
        ScopeRef::new(ResourceType::Cloud, Uuid::now_v7())
    }

    #[test]
    fn test_item_rounding_and_monthly_rate() {
        let item = PriceListItem::new(cloud(), "m1.small", 0.1234, PriceItemType::Flavor);
        assert_eq!(item.value, 0.12);

        let april = Utc.with_ymd_and_hms(2015, 4, 1, 0, 0, 0).unwrap();
        assert_eq!(item.monthly_rate(april), "86.40");
        assert_eq!(PriceItemType::LicenseOs.to_string(), "license-os");
        assert_eq!(PriceItemType::parse("license-application"), Some(PriceItemType::LicenseApplication));
    }

    #[test]
    fn test_one_list_per_service() {
        let mut book = PriceListBook::new();
        let service = cloud();
        book.create(service, vec![]).unwrap();
        let err = book.create(service, vec![]).unwrap_err();
        assert_eq!(err.to_string(), "Service can not have more than one price list");
    }

    #[test]
    fn test_update_replaces_items() {
        let mut book = PriceListBook::new();
        let service = cloud();
        let list = book
            .create(
                service,
                vec![
                    PriceListItem::new(service, "ram", 1.0, PriceItemType::Flavor),
                    PriceListItem::new(service, "storage", 2.0, PriceItemType::Storage),
                ],
            )
            .unwrap();

        let unchanged = book.update(list.id, None).unwrap();
        assert_eq!(unchanged.items.len(), 2);

        let replaced = book
            .update(list.id, Some(vec![PriceListItem::new(service, "cpu", 3.0, PriceItemType::Flavor)]))
            .unwrap();
        assert_eq!(replaced.items.len(), 1);
        assert_eq!(book.items_for(service)[0].key, "cpu");
    }

    #[test]
    fn test_item_key_unique_per_service() {
        let mut book = PriceListBook::new();
        let first = cloud();
        let second = cloud();
        book.add_item(PriceListItem::new(first, "ram", 1.0, PriceItemType::Flavor)).unwrap();
        assert!(book.add_item(PriceListItem::new(second, "ram", 1.0, PriceItemType::Flavor)).is_ok());

        let err = book
            .add_item(PriceListItem::new(first, "ram", 2.0, PriceItemType::Flavor))
            .unwrap_err();
        assert!(matches!(err, CostError::DuplicateItem { .. }));

        let updated = book
            .upsert_item(PriceListItem::new(first, "ram", 2.0, PriceItemType::Flavor))
            .unwrap();
        assert_eq!(updated.value, 2.0);
        assert_eq!(book.items_for(first).len(), 1);
    }

    #[test]
    fn test_price_falls_back_to_default() {
        let mut book = PriceListBook::new();
        let service = cloud();
        book.add_default(DefaultPriceListItem::new(
            "Small",
            "m1.small",
            0.5,
            PriceItemType::Flavor,
            ResourceType::Instance,
        ));
        assert_eq!(book.price_of(service, ResourceType::Instance, "m1.small"), Some(0.5));

        book.add_item(PriceListItem::new(service, "m1.small", 0.4, PriceItemType::Flavor))
            .unwrap();
        assert_eq!(book.price_of(service, ResourceType::Instance, "m1.small"), Some(0.4));
        assert_eq!(book.price_of(service, ResourceType::Instance, "m1.large"), None);
    }
}
