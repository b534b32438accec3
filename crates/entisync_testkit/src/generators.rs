//! Property-based test generators using proptest.
//!
//! Keys never collide with the default identity fields.

use entisync_core::{Attributes, Value};
use proptest::prelude::*;

/// Strategy for attribute names outside the identity fields.
pub fn attribute_key_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z_]{0,11}")
        .expect("Invalid regex")
        .prop_filter("identity fields are reserved", |k| {
            k != "id" && k != "client_id"
        })
}

/// Strategy for scalar attribute values.
pub fn scalar_value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Integer),
        "[a-zA-Z0-9 ]{0,16}".prop_map(Value::Text),
    ]
}

/// Strategy for arbitrary (possibly nested) attribute values.
pub fn value_strategy() -> impl Strategy<Value = Value> {
    scalar_value_strategy().prop_recursive(3, 16, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map("[a-z]{1,6}", inner, 0..4).prop_map(Value::Map),
        ]
    })
}

/// Strategy for attribute maps without identity fields.
pub fn attributes_strategy(max_len: usize) -> impl Strategy<Value = Attributes> {
    prop::collection::btree_map(attribute_key_strategy(), value_strategy(), 0..=max_len)
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn keys_avoid_identity_fields(key in attribute_key_strategy()) {
            prop_assert!(key != "id" && key != "client_id");
            prop_assert!(!key.is_empty());
        }

        #[test]
        fn attributes_respect_max_len(attrs in attributes_strategy(3)) {
            prop_assert!(attrs.len() <= 3);
        }
    }
}
