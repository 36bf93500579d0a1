//! Invoices and orders
//!
//! Invoice changes return the signal the caller must send once the change is
//! stored, so audit logging stays with the signal receivers. Orders follow the
//! lifecycle of the resource they were placed for.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use conductor_events::{InvoiceEvent, Signal, SignalKind};
use conductor_iaas::{InstanceState, Transition};
use conductor_rbac::ResourceType;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{CostError, CostResult};
use crate::price_list::round_price;

/// Payment state of an invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceState {
    #[default]
    Pending,
    Paid,
    Canceled,
}

impl InvoiceState {
    /// Get the string representation of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceState::Pending => "pending",
            InvoiceState::Paid => "paid",
            InvoiceState::Canceled => "canceled",
        }
    }
}

/// Monthly invoice of a customer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    /// Unique invoice ID
    #[serde(rename = "uuid")]
    pub id: Uuid,
    /// Invoiced customer
    pub customer_id: Uuid,
    /// Amount due
    pub amount: f64,
    /// Invoiced period
    pub date: NaiveDate,
    /// Payment state
    pub state: InvoiceState,
    /// When the invoice was created
    pub created_at: DateTime<Utc>,
}

impl Invoice {
    /// Audit event for an invoice signal, if the signal is logged.
    ///
    /// Deletion is logged on pre-delete while the invoice still exists.
    pub fn event_for(&self, signal: &Signal, customer_name: &str) -> Option<InvoiceEvent> {
        let invoice_id = self.id;
        let customer_id = self.customer_id;
        let customer_name = customer_name.to_string();
        let invoice_date = self.date.format("%Y-%m").to_string();
        match signal.kind {
            SignalKind::PostSave { created: true } => Some(InvoiceEvent::Created {
                invoice_id,
                customer_id,
                customer_name,
                invoice_date,
            }),
            SignalKind::PostSave { created: false } => Some(InvoiceEvent::Updated {
                invoice_id,
                customer_id,
                customer_name,
                invoice_date,
            }),
            SignalKind::PreDelete => Some(InvoiceEvent::Deleted {
                invoice_id,
                customer_id,
                customer_name,
                invoice_date,
            }),
            _ => None,
        }
    }
}

/// Store of invoices.
#[derive(Debug, Default)]
pub struct InvoiceBook {
    invoices: BTreeMap<Uuid, Invoice>,
}

impl InvoiceBook {
    /// Create an empty book.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an invoice.
    pub fn create(&mut self, customer_id: Uuid, amount: f64, date: NaiveDate) -> (Invoice, Signal) {
        let invoice = Invoice {
            id: Uuid::now_v7(),
            customer_id,
            amount: round_price(amount),
            date,
            state: InvoiceState::Pending,
            created_at: Utc::now(),
        };
        info!(invoice_id = %invoice.id, customer_id = %customer_id, amount = invoice.amount, "Invoice created");
        self.invoices.insert(invoice.id, invoice.clone());
        let signal = Signal::saved(ResourceType::Invoice, invoice.id, true);
        (invoice, signal)
    }

    /// Change the amount or state of an invoice.
    pub fn update(
        &mut self,
        id: Uuid,
        amount: Option<f64>,
        state: Option<InvoiceState>,
    ) -> CostResult<(Invoice, Signal)> {
        let invoice = self
            .invoices
            .get_mut(&id)
            .ok_or_else(|| CostError::not_found("invoice", id))?;
        if let Some(amount) = amount {
            invoice.amount = round_price(amount);
        }
        if let Some(state) = state {
            invoice.state = state;
        }
        Ok((invoice.clone(), Signal::saved(ResourceType::Invoice, id, false)))
    }

    /// Signal to send before deleting an invoice.
    pub fn deleting(&self, id: Uuid) -> CostResult<Signal> {
        self.get(id)?;
        Ok(Signal::deleting(ResourceType::Invoice, id))
    }

    /// Delete an invoice.
    pub fn delete(&mut self, id: Uuid) -> CostResult<(Invoice, Signal)> {
        let invoice = self
            .invoices
            .remove(&id)
            .ok_or_else(|| CostError::not_found("invoice", id))?;
        info!(invoice_id = %id, "Invoice deleted");
        Ok((invoice, Signal::deleted(ResourceType::Invoice, id)))
    }

    /// Get an invoice.
    pub fn get(&self, id: Uuid) -> CostResult<&Invoice> {
        self.invoices.get(&id).ok_or_else(|| CostError::not_found("invoice", id))
    }

    /// Invoices of a customer, oldest period first.
    pub fn of_customer(&self, customer_id: Uuid) -> Vec<&Invoice> {
        let mut invoices: Vec<&Invoice> = self
            .invoices
            .values()
            .filter(|i| i.customer_id == customer_id)
            .collect();
        invoices.sort_by_key(|i| i.date);
        invoices
    }
}

/// Lifecycle state of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderState {
    #[default]
    Pending,
    Subscribed,
    Terminated,
}

impl OrderState {
    /// Get the string representation of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderState::Pending => "pending",
            OrderState::Subscribed => "subscribed",
            OrderState::Terminated => "terminated",
        }
    }
}

impl fmt::Display for OrderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Purchase of a billed resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Ordered resource
    pub resource_id: Uuid,
    /// Lifecycle state
    pub state: OrderState,
    /// When the subscription started
    pub subscribed_at: Option<DateTime<Utc>>,
    /// When the subscription ended
    pub terminated_at: Option<DateTime<Utc>>,
}

impl Order {
    /// Create a pending order.
    pub fn new(resource_id: Uuid) -> Self {
        Self {
            resource_id,
            state: OrderState::Pending,
            subscribed_at: None,
            terminated_at: None,
        }
    }

    /// Start billing the resource.
    pub fn subscribe(&mut self) -> CostResult<()> {
        if self.state != OrderState::Pending {
            return Err(CostError::IncorrectOrderState {
                action: "subscribed",
                state: self.state.as_str(),
            });
        }
        self.state = OrderState::Subscribed;
        self.subscribed_at = Some(Utc::now());
        info!(resource_id = %self.resource_id, "Order subscribed");
        Ok(())
    }

    /// Stop billing the resource.
    pub fn terminate(&mut self) -> CostResult<()> {
        if self.state == OrderState::Terminated {
            return Err(CostError::IncorrectOrderState {
                action: "terminated",
                state: self.state.as_str(),
            });
        }
        self.state = OrderState::Terminated;
        self.terminated_at = Some(Utc::now());
        info!(resource_id = %self.resource_id, "Order terminated");
        Ok(())
    }
}

/// Subscribe the order once its resource first comes online.
///
/// # Returns
///
/// Whether the order was subscribed
pub fn track_order(order: &mut Order, transition: Transition, source: InstanceState) -> CostResult<bool> {
    if source == InstanceState::Provisioning && transition == Transition::SetOnline {
        order.subscribe()?;
        return Ok(true);
    }
    debug!(resource_id = %order.resource_id, transition = transition.as_str(), "Order not affected");
    Ok(false)
}

/// Terminate the order of a deleted resource.
pub fn terminate_purchase(order: &mut Order) -> CostResult<()> {
    order.terminate()
}

/// Store of orders keyed by resource.
#[derive(Debug, Default)]
pub struct OrderBook {
    orders: BTreeMap<Uuid, Order>,
}

impl OrderBook {
    /// Create an empty book.
    pub fn new() -> Self {
        Self::default()
    }

    /// Place a pending order for a resource, keeping an existing one.
    pub fn place(&mut self, resource_id: Uuid) -> &Order {
        self.orders
            .entry(resource_id)
            .or_insert_with(|| Order::new(resource_id))
    }

    /// Order of a resource.
    pub fn get(&self, resource_id: Uuid) -> Option<&Order> {
        self.orders.get(&resource_id)
    }

    /// Mutable order of a resource.
    pub fn get_mut(&mut self, resource_id: Uuid) -> Option<&mut Order> {
        self.orders.get_mut(&resource_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2015, 6, 1).unwrap()
    }

    #[test]
    fn test_invoice_signals() {
        let mut book = InvoiceBook::new();
        let customer = Uuid::now_v7();

        let (invoice, signal) = book.create(customer, 100.456, date());
        assert_eq!(invoice.amount, 100.46);
        assert_eq!(signal.kind, SignalKind::PostSave { created: true });
        assert_eq!(signal.sender, ResourceType::Invoice);

        let (updated, signal) = book.update(invoice.id, None, Some(InvoiceState::Paid)).unwrap();
        assert_eq!(updated.state, InvoiceState::Paid);
        assert_eq!(signal.kind, SignalKind::PostSave { created: false });

        let deleting = book.deleting(invoice.id).unwrap();
        assert_eq!(deleting.kind, SignalKind::PreDelete);
        let (_, deleted) = book.delete(invoice.id).unwrap();
        assert_eq!(deleted.kind, SignalKind::PostDelete);
        assert!(book.get(invoice.id).is_err());
        assert!(book.deleting(invoice.id).is_err());
    }

    #[test]
    fn test_invoice_events() {
        let mut book = InvoiceBook::new();
        let (invoice, signal) = book.create(Uuid::now_v7(), 10.0, date());

        let event = invoice.event_for(&signal, "Acme").unwrap().to_event();
        assert_eq!(event.event_type, "invoice_creation_succeeded");
        assert_eq!(
            event.message,
            "Invoice for customer Acme for the period of 2015-06 has been created."
        );

        let deleted = invoice
            .event_for(&Signal::deleting(ResourceType::Invoice, invoice.id), "Acme")
            .unwrap();
        assert_eq!(deleted.event_type(), "invoice_deletion_succeeded");
        assert!(invoice
            .event_for(&Signal::deleted(ResourceType::Invoice, invoice.id), "Acme")
            .is_none());
    }

    #[test]
    fn test_track_order() {
        let mut order = Order::new(Uuid::now_v7());
        assert!(!track_order(&mut order, Transition::SetOnline, InstanceState::Starting).unwrap());
        assert!(!track_order(&mut order, Transition::SetOffline, InstanceState::Provisioning).unwrap());
        assert_eq!(order.state, OrderState::Pending);

        assert!(track_order(&mut order, Transition::SetOnline, InstanceState::Provisioning).unwrap());
        assert_eq!(order.state, OrderState::Subscribed);
        assert!(order.subscribed_at.is_some());
    }

    #[test]
    fn test_terminate_purchase() {
        let mut book = OrderBook::new();
        let resource = Uuid::now_v7();
        book.place(resource);
        let order = book.get_mut(resource).unwrap();

        terminate_purchase(order).unwrap();
        assert_eq!(order.state, OrderState::Terminated);
        assert!(terminate_purchase(order).is_err());
        assert!(order.subscribe().is_err());
    }
}
