//! User-visible message catalog.
//!
//! Messages are looked up by key and locale. Unknown locales fall back to the
//! configured default, then to English.

use axum::http::HeaderMap;
use axum::http::header::ACCEPT_LANGUAGE;

/// Messages the control surface shows to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKey {
    TransitionRejected,
    TransitionFailed,
    NoPreviousState,
    StorageUnavailable,
}

/// Locales with a translation.
pub const SUPPORTED_LOCALES: &[&str] = &["en", "es"];

fn lookup(locale: &str, key: MessageKey) -> Option<&'static str> {
    let message = match (locale, key) {
        ("en", MessageKey::TransitionRejected) => "Transition rejected",
        ("en", MessageKey::TransitionFailed) => "Transition failed",
        ("en", MessageKey::NoPreviousState) => "Nothing to roll back",
        ("en", MessageKey::StorageUnavailable) => "Workflow state could not be saved",
        ("es", MessageKey::TransitionRejected) => "Transición rechazada",
        ("es", MessageKey::TransitionFailed) => "La transición falló",
        ("es", MessageKey::NoPreviousState) => "No hay nada que revertir",
        ("es", MessageKey::StorageUnavailable) => {
            "No se pudo guardar el estado del flujo de trabajo"
        }
        _ => return None,
    };
    Some(message)
}

/// Message catalog bound to a default locale.
#[derive(Debug, Clone)]
pub struct Catalog {
    default_locale: String,
}

impl Catalog {
    #[must_use]
    pub fn new(default_locale: impl Into<String>) -> Self {
        Self {
            default_locale: default_locale.into(),
        }
    }

    #[must_use]
    pub fn default_locale(&self) -> &str {
        &self.default_locale
    }

    /// Picks the first supported language from `Accept-Language`, or the
    /// default locale.
    #[must_use]
    pub fn locale_for(&self, headers: &HeaderMap) -> String {
        headers
            .get(ACCEPT_LANGUAGE)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| {
                value
                    .split(',')
                    .filter_map(|tag| tag.split(';').next())
                    .map(|tag| tag.trim().split('-').next().unwrap_or("").to_ascii_lowercase())
                    .find(|tag| SUPPORTED_LOCALES.contains(&tag.as_str()))
            })
            .unwrap_or_else(|| self.default_locale.clone())
    }

    /// Translates `key` into `locale`.
    #[must_use]
    pub fn translate(&self, locale: &str, key: MessageKey) -> &'static str {
        lookup(locale, key)
            .or_else(|| lookup(&self.default_locale, key))
            .or_else(|| lookup("en", key))
            .unwrap_or("error")
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new("en")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn every_key_is_translated_in_every_locale() {
        let keys = [
            MessageKey::TransitionRejected,
            MessageKey::TransitionFailed,
            MessageKey::NoPreviousState,
            MessageKey::StorageUnavailable,
        ];
        for locale in SUPPORTED_LOCALES {
            for key in keys {
                assert!(lookup(locale, key).is_some(), "{locale} {key:?}");
            }
        }
    }

    #[test]
    fn unknown_locale_falls_back() {
        let catalog = Catalog::new("es");
        assert_eq!(
            catalog.translate("fr", MessageKey::TransitionRejected),
            "Transición rechazada"
        );

        let catalog = Catalog::new("de");
        assert_eq!(
            catalog.translate("fr", MessageKey::TransitionRejected),
            "Transition rejected"
        );
    }

    #[test]
    fn locale_from_accept_language() {
        let catalog = Catalog::default();
        let mut headers = HeaderMap::new();
        assert_eq!(catalog.locale_for(&headers), "en");

        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("fr-CA, es-MX;q=0.8, en;q=0.5"));
        assert_eq!(catalog.locale_for(&headers), "es");
    }
}
