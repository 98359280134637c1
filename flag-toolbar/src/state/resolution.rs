use crate::state::models::{FlagOverride, FlagValue, Variant};

/// Computes the value handed back to application code.
///
/// A flag override wins outright, even on variant flags, so a variant flag can
/// be forced fully off. A variant override keeps whatever the evaluator's
/// variant carried (payload included) but swaps the name and forces it on;
/// without an evaluated variant to start from, a bare one is synthesized.
///
/// Both the engine and the client wrapper go through this function so the
/// recorded and the returned values never disagree.
pub fn resolve_override(
    default_value: &FlagValue,
    flag_override: Option<&FlagOverride>,
) -> FlagValue {
    match flag_override {
        None => default_value.clone(),
        Some(FlagOverride::Flag { value }) => FlagValue::Bool(*value),
        Some(FlagOverride::Variant { variant_key }) => match default_value.as_variant() {
            Some(variant) => FlagValue::Variant(Variant {
                name: variant_key.clone(),
                enabled: true,
                ..variant.clone()
            }),
            None => FlagValue::Variant(Variant::new(variant_key.clone(), true)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::models::VariantPayload;
    use test_case::test_case;

    fn blue_with_payload() -> FlagValue {
        FlagValue::Variant(Variant {
            name: "blue".to_string(),
            enabled: false,
            payload: Some(VariantPayload {
                payload_type: "string".to_string(),
                value: "sky".to_string(),
            }),
            feature_enabled: Some(true),
            extra: Default::default(),
        })
    }

    #[test_case(FlagValue::Bool(true) ; "boolean default")]
    #[test_case(FlagValue::Null ; "never evaluated")]
    #[test_case(FlagValue::Variant(Variant::new("blue", true)) ; "variant default")]
    fn test_no_override_returns_default(default_value: FlagValue) {
        assert_eq!(resolve_override(&default_value, None), default_value);
    }

    #[test_case(FlagValue::Bool(true), false ; "forces boolean off")]
    #[test_case(FlagValue::Bool(false), true ; "forces boolean on")]
    #[test_case(FlagValue::Variant(Variant::new("blue", true)), false ; "forces variant flag off")]
    #[test_case(FlagValue::Null, true ; "forces unknown flag on")]
    fn test_flag_override_returns_boolean(default_value: FlagValue, forced: bool) {
        assert_eq!(
            resolve_override(&default_value, Some(&FlagOverride::flag(forced))),
            FlagValue::Bool(forced)
        );
    }

    #[test]
    fn test_variant_override_keeps_payload() {
        let resolved =
            resolve_override(&blue_with_payload(), Some(&FlagOverride::variant("green")));

        let FlagValue::Variant(variant) = resolved else {
            panic!("expected a variant");
        };
        assert_eq!(variant.name, "green");
        assert!(variant.enabled);
        assert_eq!(variant.payload.unwrap().value, "sky");
        assert_eq!(variant.feature_enabled, Some(true));
    }

    #[test_case(FlagValue::Null ; "never evaluated")]
    #[test_case(FlagValue::Bool(false) ; "boolean default")]
    fn test_variant_override_synthesizes_variant(default_value: FlagValue) {
        assert_eq!(
            resolve_override(&default_value, Some(&FlagOverride::variant("beta"))),
            FlagValue::Variant(Variant::new("beta", true))
        );
    }

    #[test]
    fn test_resolution_is_repeatable() {
        let flag_override = FlagOverride::variant("green");
        let first = resolve_override(&blue_with_payload(), Some(&flag_override));
        let second = resolve_override(&blue_with_payload(), Some(&flag_override));
        assert_eq!(first, second);
    }
}
