//! Placeholder backends that never produce a connection.

use crate::container_management::backend::BackendSpec;
use crate::container_management::director::Director;
use crate::container_management::registry::DirectorOptions;
use crate::error_handling::types::DirectorError;
use crate::network::backend_conn::BackendConn;

#[derive(Debug, Clone)]
pub struct StubBackend {
    kind: String,
}

impl StubBackend {
    pub fn new(kind: impl Into<String>) -> Self {
        StubBackend { kind: kind.into() }
    }

    pub async fn connect(&self, name: &str) -> Result<BackendConn, DirectorError> {
        Err(DirectorError::NotImplemented(format!(
            "{} backend cannot dial {}",
            self.kind, name
        )))
    }
}

/// Constructor registered under `"vm-stub"`.
pub fn new_director(options: DirectorOptions) -> Result<Director, DirectorError> {
    Director::from_options(options, BackendSpec::Stub)
}

/// Fallback for unknown backend kinds.
pub fn new_dummy(mut options: DirectorOptions) -> Result<Director, DirectorError> {
    options.kind = "dummy".to_string();
    Director::from_options(options, BackendSpec::Stub)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stub_never_dials() {
        let res = StubBackend::new("vm-stub").connect("miel-10.0.0.1").await;
        assert!(matches!(res, Err(DirectorError::NotImplemented(_))));
    }
}
