//! Cart line types.
//!
//! [`LineInput`] is what callers hand to the store: plain values gathered
//! from the catalog and provider APIs. [`CartLine`] is what the store keeps
//! and persists. A line's key and total are always derived from its other
//! fields; there is no way to set either directly.

use bazaar_core::{FulfillmentMode, LineKey, Price, ProviderId, ServiceId};
use serde::{Deserialize, Serialize};

use crate::key::derive_key;
use crate::totals::line_total;

/// Values describing one purchasable line, as supplied by a caller.
///
/// `quantity` is signed so that callers can pass the raw value of a stepper
/// or form; anything `<= 0` means "this line should not exist".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineInput {
    pub service_id: ServiceId,
    pub service_name: String,
    pub category: Option<String>,
    pub fulfillment_mode: FulfillmentMode,
    pub quantity: i64,
    pub unit_price: Price,
    /// Required for `Direct` lines, ignored for `Basic` ones.
    pub provider_id: Option<ProviderId>,
    pub provider_name: Option<String>,
}

impl LineInput {
    /// A line whose provider is assigned automatically.
    #[must_use]
    pub fn basic(
        service_id: impl Into<ServiceId>,
        service_name: impl Into<String>,
        unit_price: Price,
        quantity: i64,
    ) -> Self {
        Self {
            service_id: service_id.into(),
            service_name: service_name.into(),
            category: None,
            fulfillment_mode: FulfillmentMode::Basic,
            quantity,
            unit_price,
            provider_id: None,
            provider_name: None,
        }
    }

    /// A line booked with a specific provider.
    #[must_use]
    pub fn direct(
        service_id: impl Into<ServiceId>,
        service_name: impl Into<String>,
        unit_price: Price,
        quantity: i64,
        provider_id: impl Into<ProviderId>,
    ) -> Self {
        Self {
            fulfillment_mode: FulfillmentMode::Direct,
            provider_id: Some(provider_id.into()),
            ..Self::basic(service_id, service_name, unit_price, quantity)
        }
    }

    /// Set the catalog category.
    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Set the provider's display name.
    #[must_use]
    pub fn with_provider_name(mut self, name: impl Into<String>) -> Self {
        self.provider_name = Some(name.into());
        self
    }

    /// Set the quantity.
    #[must_use]
    pub const fn with_quantity(mut self, quantity: i64) -> Self {
        self.quantity = quantity;
        self
    }

    /// Provider that takes part in identity and conflict checks.
    ///
    /// Always `None` for `Basic` lines.
    #[must_use]
    pub fn effective_provider(&self) -> Option<&ProviderId> {
        effective_provider(self.fulfillment_mode, self.provider_id.as_ref())
    }

    /// The key a line built from this input would have.
    #[must_use]
    pub fn line_key(&self) -> LineKey {
        derive_key(
            &self.service_id,
            self.fulfillment_mode,
            self.effective_provider(),
        )
    }
}

/// One line of the cart.
///
/// Serialized in camelCase with `lineTotal` included, so the stored snapshot
/// reads the same as the records the web client renders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    line_key: LineKey,
    service_id: ServiceId,
    service_name: String,
    category: Option<String>,
    fulfillment_mode: FulfillmentMode,
    quantity: u32,
    unit_price: Price,
    line_total: Price,
    provider_id: Option<ProviderId>,
    provider_name: Option<String>,
}

impl CartLine {
    /// Build a line from caller input.
    ///
    /// Returns `None` when the input quantity is `<= 0`.
    #[must_use]
    pub fn from_input(input: LineInput) -> Option<Self> {
        let quantity = stored_quantity(input.quantity)?;
        let line_key = input.line_key();
        Some(Self {
            line_key,
            service_id: input.service_id,
            service_name: input.service_name,
            category: input.category,
            fulfillment_mode: input.fulfillment_mode,
            quantity,
            unit_price: input.unit_price,
            line_total: line_total(quantity, input.unit_price),
            provider_id: input.provider_id,
            provider_name: input.provider_name,
        })
    }

    #[must_use]
    pub const fn line_key(&self) -> &LineKey {
        &self.line_key
    }

    #[must_use]
    pub const fn service_id(&self) -> &ServiceId {
        &self.service_id
    }

    #[must_use]
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    #[must_use]
    pub fn category(&self) -> Option<&str> {
        self.category.as_deref()
    }

    #[must_use]
    pub const fn fulfillment_mode(&self) -> FulfillmentMode {
        self.fulfillment_mode
    }

    #[must_use]
    pub const fn quantity(&self) -> u32 {
        self.quantity
    }

    #[must_use]
    pub const fn unit_price(&self) -> Price {
        self.unit_price
    }

    #[must_use]
    pub const fn line_total(&self) -> Price {
        self.line_total
    }

    #[must_use]
    pub const fn provider_id(&self) -> Option<&ProviderId> {
        self.provider_id.as_ref()
    }

    #[must_use]
    pub fn provider_name(&self) -> Option<&str> {
        self.provider_name.as_deref()
    }

    /// Provider that takes part in identity and conflict checks.
    #[must_use]
    pub fn effective_provider(&self) -> Option<&ProviderId> {
        effective_provider(self.fulfillment_mode, self.provider_id.as_ref())
    }

    /// Replace the mutable fields with those of `input`.
    ///
    /// The caller guarantees `input` derives to this line's key and has a
    /// positive quantity.
    pub(crate) fn overwrite(&mut self, input: LineInput, quantity: u32) {
        debug_assert_eq!(input.line_key(), self.line_key);
        self.service_name = input.service_name;
        self.category = input.category;
        self.unit_price = input.unit_price;
        self.provider_id = input.provider_id;
        self.provider_name = input.provider_name;
        self.set_quantity(quantity);
    }

    pub(crate) fn set_quantity(&mut self, quantity: u32) {
        self.quantity = quantity;
        self.line_total = line_total(quantity, self.unit_price);
    }

    /// Re-derive key and total from the other fields.
    ///
    /// Used on snapshots read from storage, which may have been written by an
    /// older client or edited by hand. Zero-quantity lines are dropped.
    pub(crate) fn normalized(mut self) -> Option<Self> {
        if self.quantity == 0 {
            return None;
        }
        self.line_key = derive_key(
            &self.service_id,
            self.fulfillment_mode,
            self.effective_provider(),
        );
        self.line_total = line_total(self.quantity, self.unit_price);
        Some(self)
    }
}

/// Convert a caller quantity to a stored one.
///
/// `<= 0` means absent; values above `u32::MAX` saturate.
#[must_use]
pub fn stored_quantity(quantity: i64) -> Option<u32> {
    if quantity <= 0 {
        return None;
    }
    Some(u32::try_from(quantity).unwrap_or(u32::MAX))
}

fn effective_provider(
    mode: FulfillmentMode,
    provider_id: Option<&ProviderId>,
) -> Option<&ProviderId> {
    match mode {
        FulfillmentMode::Direct => provider_id,
        FulfillmentMode::Basic => None,
    }
}
