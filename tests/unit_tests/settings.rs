use spectre::settings::{Factorization, NccSettings, SolverSettings};

#[test]
fn solver_settings_serde_roundtrip() {
    let settings = SolverSettings {
        factorization: Factorization::FullPivotLu,
    };
    let json = serde_json::to_string(&settings).unwrap();
    assert!(json.contains("full_pivot_lu"));
    let parsed: SolverSettings = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, settings);
}

#[test]
fn missing_settings_fall_back_to_defaults() {
    let solver: SolverSettings = serde_json::from_str("{}").unwrap();
    assert_eq!(solver, SolverSettings::default());
    assert_eq!(solver.factorization, Factorization::PartialPivotLu);

    let ncc: NccSettings = serde_json::from_str(r#"{"cutoff":1e-6}"#).unwrap();
    assert_eq!(ncc.cutoff, 1e-6);
    assert_eq!(ncc.max_terms, None);
}

#[test]
fn unknown_factorization_is_rejected() {
    let result = serde_json::from_str::<SolverSettings>(r#"{"factorization":"cholesky"}"#);
    assert!(result.is_err());
}
