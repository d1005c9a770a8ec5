//! Line key derivation.
//!
//! A cart line's identity is the triple (service, fulfillment mode,
//! provider). [`derive_key`] turns that triple into a [`LineKey`] string:
//! the components are escaped and joined with [`SEPARATOR`], and an absent
//! provider is written as the bare [`NO_PROVIDER`] sentinel. Escaping keeps
//! the mapping injective: an id containing `|` or `~` can never produce the
//! same key as a different triple.
//!
//! Nothing else about a line (name, price, category, position) takes part in
//! its identity, so repricing a service updates the existing line instead of
//! creating a second one.

use bazaar_core::{FulfillmentMode, LineKey, ProviderId, ServiceId};

/// Joins the key components.
pub const SEPARATOR: char = '|';

/// Stands in for an absent provider id.
pub const NO_PROVIDER: char = '~';

const ESCAPE: char = '\\';

/// Derive the identity of a cart line.
///
/// Pure and total: equal inputs always produce equal keys and distinct
/// inputs always produce distinct keys.
#[must_use]
pub fn derive_key(
    service_id: &ServiceId,
    mode: FulfillmentMode,
    provider_id: Option<&ProviderId>,
) -> LineKey {
    let mut key = String::with_capacity(service_id.as_str().len() + 16);
    push_escaped(&mut key, service_id.as_str());
    key.push(SEPARATOR);
    key.push_str(mode.as_str());
    key.push(SEPARATOR);
    match provider_id {
        Some(provider) => push_escaped(&mut key, provider.as_str()),
        None => key.push(NO_PROVIDER),
    }
    LineKey::new(key)
}

fn push_escaped(out: &mut String, component: &str) {
    for c in component.chars() {
        if matches!(c, SEPARATOR | NO_PROVIDER | ESCAPE) {
            out.push(ESCAPE);
        }
        out.push(c);
    }
}
