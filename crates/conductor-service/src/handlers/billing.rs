//! Invoice and order receivers

use std::sync::Arc;

use async_trait::async_trait;
use conductor_cost::{terminate_purchase, track_order};
use conductor_events::{Signal, SignalHandler, SignalKind, SignalName, SignalResult};
use conductor_iaas::{InstanceState, Transition};
use conductor_rbac::ResourceType;
use tracing::{debug, info};

use super::{attributed, receiver_error, Route};
use crate::conductor::ConductorState;

pub(super) fn routes() -> Vec<Route> {
    let log_invoice: Arc<LogInvoice> = Arc::new(LogInvoice);
    vec![
        Route::new(
            "billing.log_invoice_saved",
            SignalName::PostSave,
            &[ResourceType::Invoice],
            log_invoice.clone(),
        ),
        Route::new(
            "billing.log_invoice_deleted",
            SignalName::PreDelete,
            &[ResourceType::Invoice],
            log_invoice,
        ),
        Route::new(
            "billing.track_order",
            SignalName::PostTransition,
            &[ResourceType::Instance],
            Arc::new(TrackOrder),
        ),
        Route::new(
            "billing.terminate_purchase",
            SignalName::PreDelete,
            &[ResourceType::Instance],
            Arc::new(TerminatePurchase),
        ),
    ]
}

struct LogInvoice;

#[async_trait]
impl SignalHandler<ConductorState> for LogInvoice {
    async fn handle(&self, ctx: &ConductorState, signal: &Signal) -> SignalResult<()> {
        let invoice = ctx
            .invoices
            .read()
            .await
            .get(signal.instance_id)
            .map_err(|e| receiver_error("billing.log_invoice", e))?
            .clone();
        let customer_name = ctx
            .structure
            .read()
            .await
            .customer(invoice.customer_id)?
            .name
            .clone();
        if let Some(event) = invoice.event_for(signal, &customer_name) {
            ctx.emit(attributed(event.to_event(), signal)).await;
        }
        Ok(())
    }
}

struct TrackOrder;

#[async_trait]
impl SignalHandler<ConductorState> for TrackOrder {
    async fn handle(&self, ctx: &ConductorState, signal: &Signal) -> SignalResult<()> {
        let SignalKind::PostTransition { from, transition, .. } = &signal.kind else {
            return Ok(());
        };
        let (Some(transition), Some(source)) = (Transition::parse(transition), InstanceState::parse(from)) else {
            return Ok(());
        };
        let mut orders = ctx.orders.write().await;
        let Some(order) = orders.get_mut(signal.instance_id) else {
            debug!(resource_id = %signal.instance_id, "Resource has no order");
            return Ok(());
        };
        if track_order(order, transition, source).map_err(|e| receiver_error("billing.track_order", e))? {
            info!(resource_id = %signal.instance_id, "Order subscribed");
        }
        Ok(())
    }
}

struct TerminatePurchase;

#[async_trait]
impl SignalHandler<ConductorState> for TerminatePurchase {
    async fn handle(&self, ctx: &ConductorState, signal: &Signal) -> SignalResult<()> {
        let mut orders = ctx.orders.write().await;
        if let Some(order) = orders.get_mut(signal.instance_id) {
            terminate_purchase(order).map_err(|e| receiver_error("billing.terminate_purchase", e))?;
            info!(resource_id = %signal.instance_id, "Order terminated");
        }
        Ok(())
    }
}
