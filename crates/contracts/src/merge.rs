//! Layered deep merge over value trees

use serde_json::Value;

/// Merge `overlay` onto `base`, returning the combined tree.
///
/// Objects merge key by key, recursively. Everything else in the overlay
/// (arrays, scalars, `null`) replaces the base value atomically; arrays
/// are never concatenated.
pub fn deep_merge(base: &Value, overlay: &Value) -> Value {
    let mut merged = base.clone();
    merge_into(&mut merged, overlay);
    merged
}

/// In-place variant of [`deep_merge`]
pub fn merge_into(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(base_value) => merge_into(base_value, overlay_value),
                    None => {
                        base_map.insert(key.clone(), overlay_value.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}

/// Fold several layers, lowest precedence first
pub fn merge_layers<'a>(layers: impl IntoIterator<Item = &'a Value>) -> Value {
    let mut merged = Value::Object(Default::default());
    for layer in layers {
        merge_into(&mut merged, layer);
    }
    merged
}
