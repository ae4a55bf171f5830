//! Scoped use of an authenticated fabric connection.

use std::future::Future;
use std::sync::Arc;

use tracing::{info, warn};
use vmforge_common::FleetError;
use vmforge_providers::ComputeApi;

#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Log in, run `body`, then log out and close the transport.
///
/// Release runs whether `body` succeeded or not, and a failed logout never
/// skips the close. When login itself fails the transport is still closed.
pub async fn with_session<T, F, Fut>(
    api: Arc<dyn ComputeApi>,
    credentials: &Credentials,
    body: F,
) -> Result<T, FleetError>
where
    F: FnOnce(Arc<dyn ComputeApi>) -> Fut,
    Fut: Future<Output = Result<T, FleetError>>,
{
    if let Err(e) = login(api.as_ref(), credentials).await {
        close_transport(api.as_ref()).await;
        return Err(e);
    }

    let outcome = body(Arc::clone(&api)).await;
    release(api.as_ref()).await;
    outcome
}

async fn login(api: &dyn ComputeApi, credentials: &Credentials) -> Result<(), FleetError> {
    match api.login(&credentials.username, &credentials.password).await {
        Ok(true) => {
            info!(user = %credentials.username, "Authenticated");
            Ok(())
        }
        Ok(false) => Err(FleetError::Connection("authentication failed".to_string())),
        Err(e) => Err(FleetError::Connection(format!("{:#}", e))),
    }
}

async fn release(api: &dyn ComputeApi) {
    if let Err(e) = api.logout().await {
        warn!(error = %format!("{:#}", e), "Error during logout");
    }
    close_transport(api).await;
}

async fn close_transport(api: &dyn ComputeApi) {
    match api.close().await {
        Ok(()) => info!("Disconnected"),
        Err(e) => warn!(error = %format!("{:#}", e), "Error while closing connection"),
    }
}
