//! Configuration surface: file loading, trust anchor wiring, and the
//! hard init failures.

mod common;

use std::io::Write;
use std::sync::Arc;

use common::*;
use vordr::config::ValidatorConfig;
use vordr::error::ConfigError;
use vordr::resolver::ValidatingResolver;

#[test]
fn oversized_nsec3_iteration_config_fails_at_init() {
    let result = ValidatorConfig::from_properties([("nsec3.iterations.512", "2147483647")]);
    assert!(matches!(
        result,
        Err(ConfigError::Nsec3IterationsOutOfRange {
            key_size: 512,
            value: 2_147_483_647,
        })
    ));
}

#[test]
fn trust_anchor_file_is_loaded_at_init() {
    let key = ZoneKey::new("example.ch");
    let mut file = tempfile::NamedTempFile::new().unwrap();
    let dnskey = &key.dnskey;
    writeln!(
        file,
        "example.ch. 3600 IN DNSKEY {} {} {} {}",
        dnskey.flags,
        dnskey.protocol,
        dnskey.algorithm,
        base64_encode(&dnskey.public_key),
    )
    .unwrap();

    let mut config = ValidatorConfig::default();
    config.trust_anchor_file = Some(file.path().to_path_buf());

    let stub = Arc::new(StubResolver::new());
    assert!(ValidatingResolver::new(stub, config).is_ok());
}

#[test]
fn missing_anchors_fail_init() {
    let mut config = ValidatorConfig::default();
    config.use_root_anchors = false;

    let stub = Arc::new(StubResolver::new());
    assert!(matches!(
        ValidatingResolver::new(stub, config),
        Err(ConfigError::NoTrustAnchors)
    ));
}

#[test]
fn malformed_anchor_file_fails_init() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "example.ch. 3600 IN DS broken").unwrap();

    let mut config = ValidatorConfig::default();
    config.trust_anchor_file = Some(file.path().to_path_buf());

    let stub = Arc::new(StubResolver::new());
    assert!(matches!(
        ValidatingResolver::new(stub, config),
        Err(ConfigError::AnchorFile(_))
    ));
}

#[test]
fn toml_round_trip_matches_properties() {
    let from_toml = ValidatorConfig::from_toml_str(
        r#"
        harden_algo_downgrade = false
        max_validate_rrsigs = 12

        [nsec3_iterations]
        1024 = 99
        "#,
    )
    .unwrap();
    let from_props = ValidatorConfig::from_properties([
        ("harden.algo.downgrade", "false"),
        ("max.validate.rrsigs", "12"),
        ("nsec3.iterations.1024", "99"),
    ])
    .unwrap();

    assert_eq!(from_toml.harden_algo_downgrade, from_props.harden_algo_downgrade);
    assert_eq!(from_toml.max_validate_rrsigs, from_props.max_validate_rrsigs);
    assert_eq!(
        from_toml.max_iterations_for_key_bits(1024),
        from_props.max_iterations_for_key_bits(1024)
    );
}

fn base64_encode(data: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(data)
}
