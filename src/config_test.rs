use super::*;
use std::collections::HashMap;

fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
        .collect();
    move |key| map.get(key).cloned()
}

#[test]
fn database_url_is_required() {
    let err = Config::from_lookup(lookup_from(&[])).unwrap_err();
    assert!(matches!(err, ConfigError::Missing("DATABASE_URL")));
}

#[test]
fn defaults_apply_when_unset() {
    let config = Config::from_lookup(lookup_from(&[("DATABASE_URL", "postgres://x")])).unwrap();
    assert_eq!(config.port, 3000);
    assert_eq!(config.db_max_connections, 5);
    assert_eq!(config.invitation_ttl_hours, 168);
    assert_eq!(config.presence_timeout, Duration::from_secs(30));
    assert_eq!(config.dice_roll_delay, Duration::from_millis(1000));
    assert!(!config.cookie_secure);
}

#[test]
fn overrides_are_parsed() {
    let config = Config::from_lookup(lookup_from(&[
        ("DATABASE_URL", "postgres://x"),
        ("PORT", "8080"),
        ("PRESENCE_TIMEOUT_SECS", "5"),
        ("DICE_ROLL_DELAY_MS", "0"),
        ("COOKIE_SECURE", "yes"),
    ]))
    .unwrap();
    assert_eq!(config.port, 8080);
    assert_eq!(config.presence_timeout, Duration::from_secs(5));
    assert_eq!(config.dice_roll_delay, Duration::ZERO);
    assert!(config.cookie_secure);
}

#[test]
fn invalid_number_is_rejected() {
    let err =
        Config::from_lookup(lookup_from(&[("DATABASE_URL", "postgres://x"), ("PORT", "eighty")])).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid { key: "PORT", .. }));
}

#[test]
fn zero_presence_intervals_are_rejected() {
    for key in ["PRESENCE_SWEEP_SECS", "PRESENCE_TIMEOUT_SECS"] {
        let err = Config::from_lookup(lookup_from(&[("DATABASE_URL", "postgres://x"), (key, "0")])).unwrap_err();
        match err {
            ConfigError::Invalid { key: rejected, value } => {
                assert_eq!(rejected, key);
                assert_eq!(value, "0");
            }
            other => panic!("expected Invalid for {key}, got {other:?}"),
        }
    }
}

#[test]
fn presence_sweep_override_is_parsed() {
    let config = Config::from_lookup(lookup_from(&[("DATABASE_URL", "postgres://x"), ("PRESENCE_SWEEP_SECS", "2")]))
        .unwrap();
    assert_eq!(config.presence_sweep, Duration::from_secs(2));
}

#[test]
fn parse_bool_accepts_common_spellings() {
    assert_eq!(parse_bool("ON"), Some(true));
    assert_eq!(parse_bool(" 0 "), Some(false));
    assert_eq!(parse_bool("maybe"), None);
}
