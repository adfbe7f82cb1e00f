/// Helpers for tests that need a live Docker daemon
use bollard::Docker;

/// Connects to the local daemon and pings it.
pub async fn local_docker() -> Option<Docker> {
    let docker = Docker::connect_with_local_defaults().ok()?;
    docker.ping().await.ok()?;
    Some(docker)
}

/// Binds a pinged local daemon to `$docker`, or skips the calling async test.
#[macro_export]
macro_rules! require_docker {
    ($docker:ident) => {
        let Some($docker) = $crate::test_utils::local_docker().await else {
            eprintln!("Test ignored: Docker not available");
            return;
        };
    };
}
