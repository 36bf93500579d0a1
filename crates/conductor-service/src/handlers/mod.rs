//! Signal receivers
//!
//! Receivers are connected once, in a fixed order, by [`connect_all`].
//! Within one signal they run in that order, so vetoes are connected before
//! the receivers that log or clean up.
//!
//! Pre-delete receivers still see the object. Post-delete receivers only get
//! its ID.

mod billing;
mod linking;
mod resources;
mod structure;
mod users;

use std::sync::Arc;

use conductor_events::{Event, Receiver, Signal, SignalDispatcher, SignalError, SignalHandler, SignalName};
use conductor_rbac::ResourceType;

use crate::conductor::ConductorState;

/// Receiver connected to several signals or senders.
struct Route {
    dispatch_uid: &'static str,
    signal: SignalName,
    senders: &'static [ResourceType],
    handler: Arc<dyn SignalHandler<ConductorState>>,
}

impl Route {
    fn new(
        dispatch_uid: &'static str,
        signal: SignalName,
        senders: &'static [ResourceType],
        handler: Arc<dyn SignalHandler<ConductorState>>,
    ) -> Self {
        Self {
            dispatch_uid,
            signal,
            senders,
            handler,
        }
    }

    fn into_receiver(self) -> Receiver<ConductorState> {
        self.senders.iter().fold(
            Receiver::new(self.dispatch_uid, self.signal, self.handler),
            |receiver, sender| receiver.from_sender(*sender),
        )
    }
}

/// Connect every receiver of the service.
///
/// # Returns
///
/// The number of receivers connected by this call
pub async fn connect_all(dispatcher: &SignalDispatcher<ConductorState>) -> usize {
    let mut connected = 0;
    let routes = structure::routes()
        .into_iter()
        .chain(linking::routes())
        .chain(resources::routes())
        .chain(billing::routes())
        .chain(users::routes());
    for route in routes {
        if dispatcher.connect(route.into_receiver()).await {
            connected += 1;
        }
    }
    tracing::debug!(connected, "Signal receivers connected");
    connected
}

/// Attach the acting user of a signal to an event.
fn attributed(event: Event, signal: &Signal) -> Event {
    match signal.actor {
        Some(actor) => event.with_user(actor),
        None => event,
    }
}

/// Turn a failure of another crate into a receiver error.
fn receiver_error(dispatch_uid: &str, error: impl std::fmt::Display) -> SignalError {
    SignalError::receiver(dispatch_uid, error.to_string())
}
