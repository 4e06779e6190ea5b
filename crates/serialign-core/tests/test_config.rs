use serialign_core::config::{
    AltCriterion, AverageConfig, ChainStrategy, SeriesConfig, Similarity,
};

#[test]
fn series_config_toml_round_trip() {
    let toml_str = r#"
        chain = "direct"
        reverse_roles = true
        compute_inverse = true
        reduce_deformations = true

        [registration]
        start_level = 1
        stop_level = 4
        alt_start_level = 2
        alt_criterion = "energy"
        lambda = 0.1
        similarity = "ssd"

        [reduce]
        consistency_weight = 2.0
    "#;

    let config: SeriesConfig = toml::from_str(toml_str).unwrap();
    assert_eq!(config.chain, ChainStrategy::Direct);
    assert!(config.reverse_roles);
    assert_eq!(config.registration.start_level, 1);
    assert_eq!(config.registration.stop_level, Some(4));
    assert_eq!(config.registration.alt_criterion, AltCriterion::Energy);
    assert_eq!(config.registration.similarity, Similarity::Ssd);
    assert_eq!(config.reduce.consistency_weight, 2.0);
    // Unspecified reduce fields keep their defaults.
    assert_eq!(config.reduce.data_weight, 1.0);

    let serialized = toml::to_string(&config).unwrap();
    let reparsed: SeriesConfig = toml::from_str(&serialized).unwrap();
    assert_eq!(reparsed.registration.lambda, config.registration.lambda);
    assert_eq!(reparsed.chain, config.chain);
}

#[test]
fn defaults_use_ncc_and_chained_refinement() {
    let config = SeriesConfig::default();
    assert_eq!(config.registration.similarity, Similarity::Ncc);
    assert_eq!(config.chain, ChainStrategy::ChainedRefined);
    assert_eq!(config.registration.alt_criterion, AltCriterion::DomainOverlap);
    assert!(config.validate().is_ok());
}

#[test]
fn reduce_without_inverse_is_a_config_error() {
    let config = SeriesConfig {
        reduce_deformations: true,
        ..Default::default()
    };
    assert!(config.validate().is_err());
}

#[test]
fn average_config_rejects_zero_factor() {
    let config = AverageConfig {
        super_resolution_factor: 0,
        ..Default::default()
    };
    assert!(config.validate().is_err());
}

#[test]
fn average_config_rejects_non_positive_frame_weights() {
    let config = AverageConfig {
        frame_weights: Some(vec![1.0, 0.0]),
        ..Default::default()
    };
    assert!(config.validate().is_err());

    let nan = AverageConfig {
        frame_weights: Some(vec![f64::NAN]),
        ..Default::default()
    };
    assert!(nan.validate().is_err());
}
