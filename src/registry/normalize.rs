//! Normalization of raw row changes into [`StatusUpdate`]s.
//!
//! Each topic family decides which raw changes are status changes at all and
//! projects the row images down to the status columns it cares about.

use chrono::Utc;
use serde_json::Value;

use crate::event::{
    ChangeOperation, InventoryChange, OrderChange, PartModificationChange, Row, StatusChange,
    StatusUpdate,
};
use crate::registry::topic::Topic;
use crate::source::RawChange;

const PHYSICAL: &str = "physical_status";
const BUSINESS: &str = "business_status";
const STATUS: &str = "status";
const OLD_PART_NUMBER: &str = "old_part_number";
const NEW_PART_NUMBER: &str = "new_part_number";

/// Normalizes `raw` for `topic`, or returns `None` if it is not a status change.
#[must_use]
pub fn normalize(topic: Topic, raw: &RawChange) -> Option<StatusUpdate> {
    match topic {
        Topic::InventoryStatus => normalize_inventory(raw),
        Topic::OrderStatus(_) => normalize_order(raw),
        Topic::PartNumberModifications => normalize_part_modification(raw),
    }
}

fn field<'a>(row: Option<&'a Row>, key: &str) -> Option<&'a Value> {
    row.and_then(|r| r.get(key)).filter(|v| !v.is_null())
}

fn text(row: Option<&Row>, key: &str) -> Option<String> {
    field(row, key).map(|v| match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}

fn project(row: Option<&Row>, keys: &[&str]) -> Row {
    let mut out = Row::new();
    for key in keys {
        if let Some(v) = field(row, key) {
            out.insert((*key).to_string(), v.clone());
        }
    }
    out
}

fn record_id(raw: &RawChange) -> String {
    text(raw.after.as_ref(), "id")
        .or_else(|| text(raw.before.as_ref(), "id"))
        .unwrap_or_default()
}

fn actor(raw: &RawChange) -> Option<String> {
    let after = raw.after.as_ref();
    text(after, "status_updated_by").or_else(|| text(after, "updated_by"))
}

fn build(raw: &RawChange, keys: &[&str], new_keys: &[&str], change: StatusChange) -> StatusUpdate {
    let old_status = project(raw.before.as_ref(), keys);
    let new_status = project(raw.after.as_ref(), new_keys);
    StatusUpdate::new(raw.table.clone(), record_id(raw), raw.operation, change)
        .with_images(old_status, new_status)
        .at(raw.commit_timestamp.unwrap_or_else(Utc::now))
        .by(actor(raw))
}

fn normalize_inventory(raw: &RawChange) -> Option<StatusUpdate> {
    let before = raw.before.as_ref();
    let after = raw.after.as_ref();

    let relevant = match raw.operation {
        ChangeOperation::Update => {
            field(before, PHYSICAL) != field(after, PHYSICAL)
                || field(before, BUSINESS) != field(after, BUSINESS)
        }
        ChangeOperation::Insert => field(after, PHYSICAL).is_some() && field(after, BUSINESS).is_some(),
        ChangeOperation::Delete => false,
    };
    if !relevant {
        return None;
    }

    let change = InventoryChange {
        old_physical: text(before, PHYSICAL).and_then(|s| s.parse().ok()),
        new_physical: text(after, PHYSICAL).and_then(|s| s.parse().ok()),
        old_business: text(before, BUSINESS).and_then(|s| s.parse().ok()),
        new_business: text(after, BUSINESS).and_then(|s| s.parse().ok()),
    };
    let keys = [PHYSICAL, BUSINESS];
    Some(build(raw, &keys, &keys, StatusChange::Inventory(change)))
}

fn normalize_order(raw: &RawChange) -> Option<StatusUpdate> {
    if raw.operation != ChangeOperation::Update {
        return None;
    }
    let old_status = text(raw.before.as_ref(), STATUS);
    let new_status = text(raw.after.as_ref(), STATUS);
    if old_status == new_status {
        return None;
    }

    let change = StatusChange::Order(OrderChange {
        old_status,
        new_status,
    });
    Some(build(raw, &[STATUS], &[STATUS], change))
}

fn normalize_part_modification(raw: &RawChange) -> Option<StatusUpdate> {
    let before = raw.before.as_ref();
    let after = raw.after.as_ref();
    let current = after.or(before);

    let change = StatusChange::PartModification(PartModificationChange {
        old_status: text(before, STATUS),
        new_status: text(after, STATUS),
        old_part_number: text(current, OLD_PART_NUMBER),
        new_part_number: text(current, NEW_PART_NUMBER),
    });

    let mut update = build(raw, &[STATUS], &[STATUS, OLD_PART_NUMBER, NEW_PART_NUMBER], change);
    if after.is_none() {
        // Deletes still identify the part numbers involved.
        update.new_status = project(before, &[OLD_PART_NUMBER, NEW_PART_NUMBER]);
    }
    Some(update)
}
