use thiserror::Error;

/// Why a settings load was rejected.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse settings JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// Parsed, but failed `RelaySettings::validate`.
    #[error("invalid settings value: {0}")]
    InvalidValue(String),
}

pub type Result<T> = std::result::Result<T, SettingsError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RelaySettings;

    #[test]
    fn non_http_backend_url_names_the_key() {
        let mut settings = RelaySettings::default();
        settings.client.backend_url = "localhost:3000".into();
        let err = settings.validate().unwrap_err();
        assert!(matches!(err, SettingsError::InvalidValue(_)));
        assert_eq!(
            err.to_string(),
            concat!(
                "invalid settings value: ",
                "client.backendUrl must be an http(s) URL, got \"localhost:3000\""
            )
        );
    }

    #[test]
    fn zero_event_capacity_is_rejected() {
        let mut settings = RelaySettings::default();
        settings.server.event_capacity = 0;
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("server.eventCapacity"));
    }

    #[test]
    fn malformed_file_surfaces_as_json_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{\"server\": ").unwrap();
        let err = crate::loader::load_settings_from_path(&path).unwrap_err();
        assert!(matches!(err, SettingsError::Json(_)));
    }
}
