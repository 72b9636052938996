//! Event dispatcher
//!
//! Sits between the connection manager and the handler registry. Control
//! events update the session before they are delivered like any other.

use crate::events::Event;
use crate::gateway::ConnectionState;
use crate::handlers::HandlerRegistry;
use crate::session::Session;
use chrono::Utc;

/// Routes decoded events into the session and its handlers
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    registry: HandlerRegistry,
}

impl EventDispatcher {
    pub fn new(registry: HandlerRegistry) -> Self {
        Self { registry }
    }

    /// Observe `event` on behalf of the connection manager, then deliver it
    ///
    /// Returns the number of handler deliveries scheduled.
    pub fn handle(&self, session: &Session, event: Event) -> usize {
        match &event {
            Event::Ready(ready) => {
                tracing::info!(
                    session_id = %ready.session_id,
                    user = %ready.user.tag(),
                    guilds = ready.guilds.len(),
                    "Session ready"
                );
                session.with_state_mut(|state| {
                    state.session_id = Some(ready.session_id.clone());
                    state.resume_gateway_url = ready.resume_gateway_url.clone();
                    state.connection = ConnectionState::Connected;
                });

                let delivered = self.registry.dispatch(session, event);
                session.with_state_mut(|state| state.data_ready = true);
                return delivered;
            }
            Event::Resumed(_) => {
                tracing::info!(sequence = ?session.sequence(), "Session resumed");
                session.with_state_mut(|state| {
                    state.connection = ConnectionState::Connected;
                    state.data_ready = true;
                });
            }
            Event::HeartbeatAck(_) => {
                session.with_state_mut(|state| state.last_heartbeat_ack = Some(Utc::now()));
                tracing::trace!(latency = ?session.heartbeat_latency(), "Heartbeat acknowledged");
            }
            _ => {}
        }

        self.registry.dispatch(session, event)
    }
}
