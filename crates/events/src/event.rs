use std::collections::BTreeMap;

/// Free-form string metadata carried alongside an event payload.
///
/// Producers outside the fleet may attach arbitrary entries; the fleet itself
/// only reads and writes the retry counter (see [`crate::retry_count`]).
pub type Properties = BTreeMap<String, String>;

/// A distributed event (event transfer object).
///
/// Events are:
/// - **cloneable** (a retry republishes the same payload)
/// - **self-describing** via a stable type name used for routing and logs
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name/type identifier (e.g. "tenancy.tenant.created").
    fn event_type(&self) -> &'static str;
}

/// Events that carry a mutable [`Properties`] bag.
///
/// The bag is the only part of an event that changes after publication.
pub trait HasProperties {
    fn properties(&self) -> &Properties;

    fn properties_mut(&mut self) -> &mut Properties;
}
