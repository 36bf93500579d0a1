//! # Conductor Cost
//!
//! Cost tracking and billing for Conductor customers.
//!
//! ## Overview
//!
//! The conductor-cost crate handles:
//! - **Periods**: "YYYY.MM" months and month ranges
//! - **Estimates**: Monthly price estimates attached to any estimated scope
//! - **Price lists**: Hourly prices per service with defaults per resource type
//! - **Billing**: Invoices and the orders of billed resources
//! - **Strategies**: Customer cost estimates from the billing backend
//!
//! ## Architecture
//!
//! ```text
//! BillingBackend ──→ IaasCostTracking ──→ PriceEstimateBook
//!                                            (customer, project, cloud,
//!                                             membership, instance)
//! PriceListBook ──→ hourly rate ──→ monthly_rate(now)
//! InvoiceBook ──→ (Invoice, Signal) ──→ SignalDispatcher
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use conductor_cost::{PriceEstimateBook, ScopeRef, YearMonth};
//! use conductor_rbac::ResourceType;
//! use serde_json::json;
//! use uuid::Uuid;
//!
//! let mut book = PriceEstimateBook::new();
//! let period: YearMonth = "2015.06".parse().unwrap();
//! let vm = ScopeRef::new(ResourceType::Instance, Uuid::now_v7());
//! book.create_manual(vm, period, 42.0, json!({"flavor": 40.0, "storage": 2.0}))
//!     .unwrap();
//! ```

pub mod billing;
pub mod error;
pub mod estimate;
pub mod period;
pub mod price_list;
pub mod strategy;

pub use billing::{
    terminate_purchase, track_order, Invoice, InvoiceBook, InvoiceState, Order, OrderBook,
    OrderState,
};
pub use error::{CostError, CostResult};
pub use estimate::{EstimateFilter, PriceEstimate, PriceEstimateBook, ScopeRef};
pub use period::{days_in_month, hours_in_month, YearMonth, YearMonthRange};
pub use price_list::{
    monthly_rate, round_price, DefaultPriceListItem, PriceItemType, PriceList, PriceListBook,
    PriceListItem,
};
pub use strategy::{record_customer_estimates, BillingBackend, CostTrackingStrategy, IaasCostTracking};
