//! Dispatch payload decoding

use crate::events::{Event, EventType, RawEvent};
use serde_json::Value;

/// Decode the `d` of a dispatch frame named `name`
///
/// Names the client does not model, and the names of synthetic events,
/// yield [`Event::Unknown`] with the data untouched. A missing `d` decodes
/// as an empty object.
pub fn decode_event(name: &str, data: Option<Value>) -> Result<Event, serde_json::Error> {
    let data = match data {
        Some(Value::Null) | None => Value::Object(serde_json::Map::new()),
        Some(data) => data,
    };

    match EventType::from_str(name) {
        Some(event_type) if !event_type.is_synthetic() => Event::from_dispatch(event_type, data),
        _ => Ok(Event::Unknown(RawEvent {
            name: name.to_string(),
            data,
        })),
    }
}
