//! Grow-only deep merge of JSON state.
//!
//! Arrays gain the incoming elements they do not already contain, objects are merged
//! key by key, and anything else is overwritten by the incoming value. Nothing is ever
//! removed, which is what makes concurrent merges commute for array and object state.

use serde_json::Value;

/// Finds `item` in `items`, returning its index.
pub type ArrayLookup<'a> = &'a dyn Fn(&[Value], &Value) -> Option<usize>;

fn position_of(items: &[Value], item: &Value) -> Option<usize> {
    items.iter().position(|existing| existing == item)
}

/// Merge `incoming` into `target` using structural equality for array elements.
pub fn merge_state(target: &mut Value, incoming: &Value) {
    merge_state_with(target, incoming, &position_of);
}

/// Merge `incoming` into `target`, deciding array membership with `lookup`.
pub fn merge_state_with(target: &mut Value, incoming: &Value, lookup: ArrayLookup<'_>) {
    match (target, incoming) {
        (Value::Array(items), Value::Array(additions)) => {
            for item in additions {
                if lookup(items, item).is_none() {
                    items.push(item.clone());
                }
            }
        }
        (Value::Object(fields), Value::Object(additions)) => {
            for (key, value) in additions {
                match fields.get_mut(key) {
                    Some(existing) => merge_state_with(existing, value, lookup),
                    None => {
                        fields.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (target, incoming) => *target = incoming.clone(),
    }
}
