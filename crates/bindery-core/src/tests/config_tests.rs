use std::collections::HashMap;

use crate::EngineConfig;

fn from_vars(vars: &[(&str, &str)]) -> EngineConfig {
    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect();
    EngineConfig::from_lookup(|name| vars.get(name).cloned())
}

#[test]
fn no_variables_means_defaults() {
    assert_eq!(from_vars(&[]), EngineConfig::default());
    assert_eq!(EngineConfig::default().idle_yield_threshold, 100);
    assert_eq!(EngineConfig::default().reserved_sigil, '$');
}

#[test]
fn variables_override_defaults() {
    let config = from_vars(&[
        (EngineConfig::IDLE_YIELD_THRESHOLD_VAR, " 8 "),
        (EngineConfig::OPTIONAL_MEMBER_ACCESS_VAR, "true"),
        (EngineConfig::TRACE_VAR, "1"),
    ]);
    assert_eq!(config.idle_yield_threshold, 8);
    assert!(config.optional_member_access);
    assert!(config.trace_statements);
}

#[test]
fn unparsable_threshold_is_ignored() {
    let config = from_vars(&[(EngineConfig::IDLE_YIELD_THRESHOLD_VAR, "lots")]);
    assert_eq!(config.idle_yield_threshold, 100);
}

#[test]
fn falsy_flag_spellings() {
    for raw in ["0", "false", "OFF", "no", ""] {
        let config = from_vars(&[(EngineConfig::TRACE_VAR, raw)]);
        assert!(!config.trace_statements, "{raw:?}");
    }
}

#[test]
fn builders_chain() {
    let config = EngineConfig::default()
        .with_reserved_sigil('#')
        .with_signal_errors_by_default(false)
        .with_idle_yield_threshold(0);
    assert_eq!(config.reserved_sigil, '#');
    assert!(!config.signal_errors_by_default);
    assert_eq!(config.idle_yield_threshold, 0);
}

#[test]
fn guard_limits_default_and_clamp() {
    let config = EngineConfig::default();
    assert_eq!(config.max_call_depth, 64);
    assert_eq!(config.max_array_length, 1 << 20);

    let config = EngineConfig::default()
        .with_max_call_depth(16)
        .with_max_array_length(usize::MAX);
    assert_eq!(config.max_call_depth, 16);
    assert_eq!(config.max_array_length, EngineConfig::ARRAY_LENGTH_CEILING);
}
