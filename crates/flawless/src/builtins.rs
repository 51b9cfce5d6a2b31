//! Built-in units constructed from configuration sections.

use std::sync::Arc;
use std::time::Duration;

use http::Method;

use flawless_config::{ConfigError, CorsSection, CsrfSection, RateLimitSection};
use flawless_middleware::stages::{
    self, CorsMiddleware, CsrfMiddleware, CsrfStore, KeyExtractor, RateLimitMiddleware,
};

pub(crate) fn cors(section: &CorsSection) -> Result<CorsMiddleware, ConfigError> {
    let methods = section
        .allow_methods
        .iter()
        .map(|name| parse_method(name))
        .collect::<Result<Vec<_>, _>>()?;

    let mut builder = CorsMiddleware::builder()
        .allow_origins(section.allow_origins.iter().cloned())
        .allow_methods(methods)
        .allow_headers(section.allow_headers.iter().cloned())
        .expose_headers(section.expose_headers.iter().cloned())
        .allow_credentials(section.allow_credentials);
    if let Some(secs) = section.max_age_secs {
        builder = builder.max_age(Duration::from_secs(secs));
    }
    Ok(builder.build())
}

pub(crate) fn rate_limit(section: &RateLimitSection) -> Result<RateLimitMiddleware, ConfigError> {
    let key = KeyExtractor::parse(&section.key).ok_or_else(|| {
        ConfigError::invalid_value("rate_limit.key", format!("unrecognized key '{}'", section.key))
    })?;
    Ok(RateLimitMiddleware::builder()
        .capacity(section.capacity)
        .window_secs(section.window_secs)
        .algorithm(section.algorithm)
        .key_extractor(key)
        .build())
}

pub(crate) fn csrf(section: &CsrfSection) -> (CsrfMiddleware, Arc<CsrfStore>) {
    let store = Arc::new(CsrfStore::new(Duration::from_secs(section.token_ttl_secs)));
    let builder = section.exempt_paths.iter().fold(
        CsrfMiddleware::builder()
            .store(Arc::clone(&store))
            .header_name(section.header_name.as_str())
            .session_cookie(section.session_cookie.as_str()),
        |builder, path| builder.exempt_path(path.as_str()),
    );
    (builder.build(), store)
}

fn parse_method(name: &str) -> Result<Method, ConfigError> {
    Method::from_bytes(name.trim().to_ascii_uppercase().as_bytes())
        .map_err(|_| ConfigError::invalid_value("cors.allow_methods", format!("'{name}' is not a method")))
}
