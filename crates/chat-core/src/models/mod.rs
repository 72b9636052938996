//! Entity records as they appear inside gateway and REST payloads
//!
//! Only the fields the client reads are modelled; unknown fields are ignored
//! and missing optional fields fall back to defaults.

mod channel;
mod guild;
mod message;
mod presence;
mod user;

pub use channel::Channel;
pub use guild::{Guild, Member, Role, UnavailableGuild};
pub use message::Message;
pub use presence::{Activity, ActivityType};
pub use user::User;
