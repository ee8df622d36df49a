//! Unit tests for `AppError` display prefixes and conversions.

use cell_handoff::AppError;

#[test]
fn every_variant_has_its_prefix() {
    let cases = [
        (AppError::Config("x".into()), "config: x"),
        (AppError::Startup("x".into()), "startup: x"),
        (AppError::Motion("x".into()), "motion: x"),
        (AppError::EmptyHistory("x".into()), "empty history: x"),
        (AppError::Desync("x".into()), "desync: x"),
        (AppError::InvalidTransition("x".into()), "invalid transition: x"),
        (AppError::Vision("x".into()), "vision: x"),
        (AppError::Io("x".into()), "io: x"),
        (AppError::Shutdown("x".into()), "shutdown: x"),
    ];
    for (err, expected) in cases {
        assert_eq!(err.to_string(), expected);
    }
}

#[test]
fn motion_error_message_no_trailing_period() {
    let err = AppError::Motion("protective stop".into());
    assert!(!err.to_string().ends_with('.'));
}

#[test]
fn only_shutdown_is_shutdown() {
    assert!(AppError::Shutdown("stop".into()).is_shutdown());
    assert!(!AppError::Motion("stop".into()).is_shutdown());
}

#[test]
fn io_error_converts_to_io_variant() {
    let err: AppError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
    assert!(matches!(err, AppError::Io(_)));
    assert_eq!(err.to_string(), "io: gone");
}

#[test]
fn toml_error_converts_to_config_variant() {
    let parse: Result<toml::Value, _> = toml::from_str("not = [valid");
    let err: AppError = parse.unwrap_err().into();
    assert!(err.to_string().starts_with("config: invalid config"));
}

#[test]
fn implements_std_error() {
    fn takes_error(_: &dyn std::error::Error) {}
    let err = AppError::Desync("a".into());
    takes_error(&err);
    assert!(format!("{err:?}").contains("Desync"));
}
