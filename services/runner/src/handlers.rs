//! Demonstration handlers bound by the shipped flow documents.
//!
//! They stand in for the clinic, interview and hotel back ends and only
//! validate and echo what the model collected.

use anyhow::Context;
use parley_core::HandlerRegistry;
use parley_core::function::Arguments;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// Date of birth on file for the intake demo patient.
pub const PATIENT_BIRTHDAY: &str = "1983-01-01";

/// Items the room-service kitchen can currently prepare.
pub const MENU: &[&str] = &[
    "club sandwich",
    "caesar salad",
    "margherita pizza",
    "cheeseburger",
    "french fries",
    "chocolate cake",
    "sparkling water",
    "coffee",
];

/// Builds the registry used by `parley validate` and `parley chat`.
pub fn demo_registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();

    registry.register_fn("verify_birthday", |args| async move { verify_birthday(&args) });
    for (name, field) in [
        ("record_prescriptions", "prescriptions"),
        ("record_allergies", "allergies"),
        ("record_conditions", "conditions"),
        ("record_visit_reasons", "visit_reasons"),
    ] {
        registry.register_fn(name, move |args| async move { record_list(&args, field) });
    }
    registry.register_fn("check_menu_item", |args| async move { check_menu_item(&args) });

    let next_order = Arc::new(AtomicU64::new(1001));
    registry.register_fn("place_order", move |args| {
        let order_id = next_order.fetch_add(1, Ordering::Relaxed);
        async move { place_order(&args, order_id) }
    });

    registry
}

fn verify_birthday(args: &Arguments) -> anyhow::Result<Value> {
    let birthday = args
        .get("birthday")
        .and_then(Value::as_str)
        .context("'birthday' must be a string")?;
    let verified = birthday.trim() == PATIENT_BIRTHDAY;
    info!(verified, "Birthday checked");
    Ok(json!({ "verified": verified }))
}

fn record_list(args: &Arguments, field: &str) -> anyhow::Result<Value> {
    let entries = args
        .get(field)
        .and_then(Value::as_array)
        .with_context(|| format!("'{field}' must be a list"))?;
    info!(field, count = entries.len(), "Recorded intake entries");
    Ok(json!({ "count": entries.len() }))
}

fn check_menu_item(args: &Arguments) -> anyhow::Result<Value> {
    let item = args
        .get("item")
        .and_then(Value::as_str)
        .context("'item' must be a string")?
        .trim()
        .to_lowercase();
    let available = MENU.contains(&item.as_str());
    info!(%item, available, "Menu item checked");
    Ok(json!({ "available": available, "item": item }))
}

fn place_order(args: &Arguments, order_id: u64) -> anyhow::Result<Value> {
    let items = args
        .get("items")
        .and_then(Value::as_array)
        .context("'items' must be a list")?;
    if items.is_empty() {
        anyhow::bail!("an order needs at least one item");
    }
    let order_id = format!("RS-{order_id}");
    info!(%order_id, items = items.len(), "Order placed");
    Ok(json!({ "order_id": order_id, "items": items }))
}
