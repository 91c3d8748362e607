use super::*;
use std::collections::HashMap;

fn settings(vars: &[(&str, &str)]) -> Result<Settings, SettingsError> {
    let vars: HashMap<String, String> = vars.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())).collect();
    Settings::from_lookup(|key| vars.get(key).cloned())
}

#[test]
fn token_is_required() {
    assert_eq!(settings(&[]), Err(SettingsError::Missing { var: "CHAT_WIDGET_API_TOKEN" }));
    assert_eq!(
        settings(&[("CHAT_WIDGET_API_TOKEN", "  ")]),
        Err(SettingsError::Missing { var: "CHAT_WIDGET_API_TOKEN" })
    );
}

#[test]
fn defaults_apply_when_only_token_is_set() {
    let settings = settings(&[("CHAT_WIDGET_API_TOKEN", "tok")]).expect("settings");
    assert_eq!(settings.api_base_url, DEFAULT_API_BASE_URL);
    assert_eq!(settings.ws_url, "ws://127.0.0.1:3000/ws");
    assert_eq!(settings.codec, Codec::Json);
    assert_eq!(settings.auth_mode, AuthMode::ConnectTime);
    assert_eq!(settings.reconnect_backoff, Duration::from_millis(DEFAULT_RECONNECT_MS));
    assert_eq!(settings.typing_delay, Duration::from_millis(DEFAULT_TYPING_DELAY_MS));
    assert_eq!(settings.request_timeout, None);
    assert!(!settings.validate_email);
    assert_eq!(settings.ticket_category, "support");
    assert_eq!(settings.storage_dir, PathBuf::from(DEFAULT_STORAGE_DIR));
    assert_eq!(settings.utc_offset, UtcOffset::UTC);
}

#[test]
fn https_base_derives_wss_and_trims_slash() {
    let settings =
        settings(&[("CHAT_WIDGET_API_TOKEN", "tok"), ("CHAT_WIDGET_API_BASE_URL", "https://support.example.com/")])
            .expect("settings");
    assert_eq!(settings.api_base_url, "https://support.example.com");
    assert_eq!(settings.ws_url, "wss://support.example.com/ws");
}

#[test]
fn explicit_values_override_defaults() {
    let settings = settings(&[
        ("CHAT_WIDGET_API_TOKEN", "tok"),
        ("CHAT_WIDGET_WS_URL", "wss://rt.example.com/ws/"),
        ("CHAT_WIDGET_CODEC", "socketio"),
        ("CHAT_WIDGET_SOCKETIO_NAMESPACE", "/user"),
        ("CHAT_WIDGET_AUTH_MODE", "first_message"),
        ("CHAT_WIDGET_RECONNECT_MS", "500"),
        ("CHAT_WIDGET_TYPING_DELAY_MS", "0"),
        ("CHAT_WIDGET_REQUEST_TIMEOUT_SECS", "15"),
        ("CHAT_WIDGET_VALIDATE_EMAIL", "true"),
        ("CHAT_WIDGET_TICKET_CATEGORY", "billing"),
        ("CHAT_WIDGET_UTC_OFFSET_MINUTES", "-300"),
    ])
    .expect("settings");
    assert_eq!(settings.ws_url, "wss://rt.example.com/ws/");
    assert_eq!(settings.codec, Codec::SocketIo { namespace: "/user".into() });
    assert_eq!(settings.auth_mode, AuthMode::FirstMessage);
    assert_eq!(settings.reconnect_backoff, Duration::from_millis(500));
    assert_eq!(settings.typing_delay, Duration::ZERO);
    assert_eq!(settings.request_timeout, Some(Duration::from_secs(15)));
    assert!(settings.validate_email);
    assert_eq!(settings.utc_offset.whole_minutes(), -300);

    let options = settings.session_options();
    assert_eq!(options.ticket_category, "billing");
    assert_eq!(options.api_token, "tok");
}

#[test]
fn unparsable_numbers_fall_back_to_defaults() {
    let settings = settings(&[("CHAT_WIDGET_API_TOKEN", "tok"), ("CHAT_WIDGET_RECONNECT_MS", "soon")]).expect("settings");
    assert_eq!(settings.reconnect_backoff, Duration::from_millis(DEFAULT_RECONNECT_MS));
}

#[test]
fn unknown_enumerations_are_errors() {
    assert!(matches!(
        settings(&[("CHAT_WIDGET_API_TOKEN", "tok"), ("CHAT_WIDGET_CODEC", "grpc")]),
        Err(SettingsError::Invalid { var: "CHAT_WIDGET_CODEC", .. })
    ));
    assert!(matches!(
        settings(&[("CHAT_WIDGET_API_TOKEN", "tok"), ("CHAT_WIDGET_AUTH_MODE", "cookie")]),
        Err(SettingsError::Invalid { var: "CHAT_WIDGET_AUTH_MODE", .. })
    ));
    assert!(matches!(
        settings(&[("CHAT_WIDGET_API_TOKEN", "tok"), ("CHAT_WIDGET_API_BASE_URL", "ftp://x")]),
        Err(SettingsError::Invalid { var: "CHAT_WIDGET_API_BASE_URL", .. })
    ));
}
