//! Cart commands.
//!
//! Lines are addressed by the same triple that identifies them in the store:
//! service, fulfillment mode and (for `direct` lines) provider.

use std::io::Write;

use bazaar_cart::{CartStore, CartView, LineInput};
use bazaar_core::{FulfillmentMode, LineKey, Price, PriceError};
use clap::Args;
use rust_decimal::Decimal;
use thiserror::Error;

/// Errors that can occur while running a cart command.
#[derive(Debug, Error)]
pub enum CommandError {
    /// Negative price.
    #[error("Invalid price: {0}")]
    Price(#[from] PriceError),

    /// `direct` line without a provider.
    #[error("Direct lines need --provider")]
    MissingProvider,

    /// Adding the line would mix fulfillment contexts.
    #[error("{0} would mix fulfillment contexts with the cart; use --replace or --force")]
    Conflict(LineKey),

    /// The addressed line is not in the cart.
    #[error("No line {0} in the cart")]
    UnknownLine(LineKey),

    #[error("Failed to write output: {0}")]
    Output(#[from] std::io::Error),

    #[error("Failed to encode cart: {0}")]
    Json(#[from] serde_json::Error),
}

/// Identifies one cart line.
#[derive(Debug, Args)]
pub struct LineArgs {
    /// Service id
    #[arg(short, long)]
    pub service: String,

    /// Fulfillment mode (`basic` or `direct`)
    #[arg(short, long, default_value = "basic")]
    pub mode: FulfillmentMode,

    /// Provider id (required for `direct`, ignored for `basic`)
    #[arg(long)]
    pub provider: Option<String>,
}

impl LineArgs {
    fn input(&self, name: &str, unit_price: Price, quantity: i64) -> Result<LineInput, CommandError> {
        match self.mode {
            FulfillmentMode::Direct => {
                let provider = self.provider.as_deref().ok_or(CommandError::MissingProvider)?;
                Ok(LineInput::direct(
                    self.service.as_str(),
                    name,
                    unit_price,
                    quantity,
                    provider,
                ))
            }
            FulfillmentMode::Basic => Ok(LineInput::basic(
                self.service.as_str(),
                name,
                unit_price,
                quantity,
            )),
        }
    }

    fn key(&self) -> Result<LineKey, CommandError> {
        Ok(self.input(&self.service, Price::ZERO, 1)?.line_key())
    }
}

/// Arguments of `add`.
#[derive(Debug, Args)]
pub struct AddArgs {
    #[command(flatten)]
    pub line: LineArgs,

    /// Service display name
    #[arg(short, long)]
    pub name: String,

    /// Unit price (e.g. 19.99)
    #[arg(short, long)]
    pub price: Decimal,

    /// Quantity; 0 or less removes the line
    #[arg(short, long, default_value_t = 1, allow_negative_numbers = true)]
    pub qty: i64,

    /// Catalog category
    #[arg(short, long)]
    pub category: Option<String>,

    /// Provider display name
    #[arg(long)]
    pub provider_name: Option<String>,

    /// Empty the cart before adding
    #[arg(long)]
    pub replace: bool,

    /// Add even if the line conflicts with the cart
    #[arg(long, conflicts_with = "replace")]
    pub force: bool,
}

/// Print the cart.
pub fn show(store: &CartStore, json: bool) -> Result<(), CommandError> {
    let view = store.snapshot();
    let mut out = std::io::stdout().lock();
    if json {
        writeln!(out, "{}", serde_json::to_string_pretty(&view)?)?;
    } else {
        out.write_all(render(&view).as_bytes())?;
    }
    Ok(())
}

/// Insert or overwrite a line.
pub fn add(store: &CartStore, args: AddArgs) -> Result<(), CommandError> {
    let price = Price::new(args.price)?;
    let mut input = args.line.input(&args.name, price, args.qty)?;
    if let Some(category) = args.category {
        input = input.with_category(category);
    }
    if let Some(provider_name) = args.provider_name {
        input = input.with_provider_name(provider_name);
    }
    let key = input.line_key();

    if args.replace {
        store.reset_and_add(input);
        tracing::info!("Replaced cart with {key}");
    } else if !args.force && store.check_conflict(&input) {
        return Err(CommandError::Conflict(key));
    } else {
        store.upsert(input);
        tracing::info!("Updated {key}");
    }
    Ok(())
}

/// Change the quantity of a line.
pub fn set_quantity(store: &CartStore, line: &LineArgs, quantity: i64) -> Result<(), CommandError> {
    let key = existing_key(store, line)?;
    store.update_quantity(&key, quantity);
    tracing::info!("Set {key} to {quantity}");
    Ok(())
}

/// Remove a line.
pub fn remove(store: &CartStore, line: &LineArgs) -> Result<(), CommandError> {
    let key = existing_key(store, line)?;
    store.remove(&key);
    tracing::info!("Removed {key}");
    Ok(())
}

/// Empty the cart.
pub fn clear(store: &CartStore) {
    store.clear();
    tracing::info!("Cart cleared");
}

/// Report whether adding a line would conflict with the cart.
pub fn check(store: &CartStore, line: &LineArgs) -> Result<(), CommandError> {
    let conflict = store.check_conflict(&line.input(&line.service, Price::ZERO, 1)?);
    let mut out = std::io::stdout().lock();
    writeln!(out, "{}", if conflict { "conflict" } else { "ok" })?;
    Ok(())
}

fn existing_key(store: &CartStore, line: &LineArgs) -> Result<LineKey, CommandError> {
    let key = line.key()?;
    if store.get(&key).is_none() {
        return Err(CommandError::UnknownLine(key));
    }
    Ok(key)
}

/// Plain-text listing of a cart view.
fn render(view: &CartView) -> String {
    use std::fmt::Write as _;

    if view.is_empty() {
        return "Cart is empty\n".to_string();
    }

    let mut text = String::new();
    for line in &view.lines {
        let provider = line
            .provider_name()
            .or_else(|| line.provider_id().map(bazaar_core::ProviderId::as_str))
            .map(|provider| format!(" with {provider}"))
            .unwrap_or_default();
        let _ = writeln!(
            text,
            "{:>3} x {} ({}{}) @ {} = {}",
            line.quantity(),
            line.service_name(),
            line.fulfillment_mode(),
            provider,
            line.unit_price().display(),
            line.line_total().display(),
        );
    }
    let _ = writeln!(
        text,
        "{} item(s), total {}",
        view.totals.total_items,
        view.totals.total_amount.display()
    );
    text
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use bazaar_cart::{CartStorage, MemoryStore};

    fn store() -> CartStore {
        CartStore::open(
            CartStorage::new(Arc::new(MemoryStore::new()), "cart"),
            Duration::from_millis(300),
        )
    }

    fn line(service: &str, mode: FulfillmentMode, provider: Option<&str>) -> LineArgs {
        LineArgs {
            service: service.to_string(),
            mode,
            provider: provider.map(str::to_string),
        }
    }

    fn add_args(line: LineArgs, price: &str, qty: i64) -> AddArgs {
        AddArgs {
            line,
            name: "Service".to_string(),
            price: price.parse().unwrap(),
            qty,
            category: None,
            provider_name: None,
            replace: false,
            force: false,
        }
    }

    #[tokio::test]
    async fn test_add_refuses_conflict_without_force() {
        let store = store();
        add(&store, add_args(line("a", FulfillmentMode::Direct, Some("p1")), "80", 1)).unwrap();

        let err = add(&store, add_args(line("b", FulfillmentMode::Direct, Some("p2")), "80", 1))
            .unwrap_err();
        assert!(matches!(err, CommandError::Conflict(_)));
        assert_eq!(store.lines().len(), 1);

        let mut forced = add_args(line("b", FulfillmentMode::Direct, Some("p2")), "80", 1);
        forced.force = true;
        add(&store, forced).unwrap();
        assert_eq!(store.lines().len(), 2);
    }

    #[tokio::test]
    async fn test_add_replace_resets_cart() {
        let store = store();
        add(&store, add_args(line("a", FulfillmentMode::Basic, None), "10", 2)).unwrap();
        let mut replace = add_args(line("b", FulfillmentMode::Direct, Some("p2")), "80", 1);
        replace.replace = true;
        add(&store, replace).unwrap();

        let lines = store.lines();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].service_id().as_str(), "b");
    }

    #[tokio::test]
    async fn test_add_rejects_negative_price_and_missing_provider() {
        let store = store();
        let err = add(&store, add_args(line("a", FulfillmentMode::Basic, None), "-1", 1)).unwrap_err();
        assert!(matches!(err, CommandError::Price(_)));

        let err = add(&store, add_args(line("a", FulfillmentMode::Direct, None), "5", 1)).unwrap_err();
        assert!(matches!(err, CommandError::MissingProvider));
    }

    #[tokio::test]
    async fn test_set_quantity_and_remove_need_existing_line() {
        let store = store();
        let basic = line("a", FulfillmentMode::Basic, None);
        assert!(matches!(
            set_quantity(&store, &basic, 2),
            Err(CommandError::UnknownLine(_))
        ));

        add(&store, add_args(line("a", FulfillmentMode::Basic, None), "10", 1)).unwrap();
        set_quantity(&store, &basic, 4).unwrap();
        assert_eq!(store.totals().total_items, 4);

        remove(&store, &basic).unwrap();
        assert!(store.lines().is_empty());
    }

    #[tokio::test]
    async fn test_render() {
        let store = store();
        assert_eq!(render(&store.snapshot()), "Cart is empty\n");

        let mut args = add_args(line("a", FulfillmentMode::Direct, Some("p1")), "19.99", 2);
        args.name = "Plumbing".to_string();
        args.provider_name = Some("Pat".to_string());
        add(&store, args).unwrap();

        let text = render(&store.snapshot());
        assert!(text.contains("2 x Plumbing (direct with Pat) @ $19.99 = $39.98"));
        assert!(text.ends_with("2 item(s), total $39.98\n"));
    }
}
