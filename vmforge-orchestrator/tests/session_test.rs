mod common;

use std::sync::Arc;

use vmforge_common::FleetError;
use vmforge_orchestrator::{with_session, Credentials};
use vmforge_providers::mock::{Call, MockComputeApi};
use vmforge_providers::ComputeApi;

fn credentials() -> Credentials {
    Credentials {
        username: "root".to_string(),
        password: "secret".to_string(),
    }
}

fn handle(mock: &Arc<MockComputeApi>) -> Arc<dyn ComputeApi> {
    Arc::clone(mock) as Arc<dyn ComputeApi>
}

#[tokio::test]
async fn test_session_wraps_body_with_login_and_release() {
    common::init_tracing();
    let mock = Arc::new(MockComputeApi::new());

    let count = with_session(handle(&mock), &credentials(), |api| async move {
        let vms = api
            .query_vms()
            .await
            .map_err(|e| FleetError::remote("vm.query", e))?;
        Ok(vms.len())
    })
    .await
    .unwrap();

    assert_eq!(count, 0);
    assert_eq!(
        mock.calls(),
        vec![
            Call::Login { username: "root".to_string() },
            Call::Query,
            Call::Logout,
            Call::Close,
        ]
    );
}

#[tokio::test]
async fn test_body_error_still_releases() {
    let mock = Arc::new(MockComputeApi::new());

    let err = with_session(handle(&mock), &credentials(), |_api| async move {
        Err::<(), _>(FleetError::Interrupted)
    })
    .await
    .unwrap_err();

    assert!(matches!(err, FleetError::Interrupted));
    let calls = mock.calls();
    assert_eq!(&calls[calls.len() - 2..], &[Call::Logout, Call::Close]);
}

#[tokio::test]
async fn test_logout_failure_still_closes() {
    let mock = Arc::new(MockComputeApi::new());
    mock.fail_logout();

    with_session(handle(&mock), &credentials(), |_api| async move { Ok(()) })
        .await
        .unwrap();

    assert_eq!(mock.calls().last(), Some(&Call::Close));
}

#[tokio::test]
async fn test_close_failure_does_not_mask_outcome() {
    let mock = Arc::new(MockComputeApi::new());
    mock.fail_close();

    let value = with_session(handle(&mock), &credentials(), |_api| async move { Ok(7) })
        .await
        .unwrap();

    assert_eq!(value, 7);
}

#[tokio::test]
async fn test_rejected_login_skips_body() {
    for reject in [true, false] {
        let mock = Arc::new(MockComputeApi::new());
        if reject {
            mock.reject_login();
        } else {
            mock.fail_login();
        }
        let mut ran = false;

        let err = with_session(handle(&mock), &credentials(), |_api| {
            ran = true;
            async move { Ok(()) }
        })
        .await
        .unwrap_err();

        assert!(matches!(err, FleetError::Connection(_)));
        assert!(err.is_fatal());
        assert!(!ran);
        assert_eq!(
            mock.calls(),
            vec![Call::Login { username: "root".to_string() }, Call::Close]
        );
    }
}
