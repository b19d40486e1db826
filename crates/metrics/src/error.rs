use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("prometheus error: {0}")]
    PrometheusErr(String),
    #[cfg(feature = "api")]
    #[error("io error starting metrics server: {0}")]
    Io(#[from] std::io::Error),
}
