//! Engine connection and typed endpoint surface.
//!
//! Wraps the Docker Engine API client behind an explicit, caller-owned handle.
//! The handle is built once per target from [`ConnectionOptions`] and validated
//! with a liveness ping; there is no process-wide singleton, so tests and
//! multi-target callers construct their own handles.

use std::path::PathBuf;

use bollard::auth::DockerCredentials;
use bollard::image::{CreateImageOptions, RemoveImageOptions};
use bollard::models::{ImageDeleteResponseItem, ImageInspect};
use bollard::{Docker, API_DEFAULT_VERSION};
use bytes::Bytes;
use futures::{Stream, StreamExt};

use crate::error::{ProbeError, Result};

/// Timeout for engine API calls, in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 120;

/// Fixed file names for TLS client identity under the cert directory.
const TLS_KEY_FILE: &str = "key.pem";
const TLS_CERT_FILE: &str = "cert.pem";
const TLS_CA_FILE: &str = "ca.pem";

/// Transport target for the image engine.
#[derive(Debug, Clone, Default)]
pub struct ConnectionOptions {
    /// Remote engine host (e.g., "tcp://10.0.0.5:2376"). None targets the
    /// OS-default local socket.
    pub host: Option<String>,
    /// Directory holding `key.pem`/`cert.pem`/`ca.pem` for TLS client
    /// identity. Absent certs with a remote host means plain HTTP, not an
    /// error.
    pub cert_path: Option<PathBuf>,
}

impl ConnectionOptions {
    /// Target the OS-default local socket.
    pub fn local() -> Self {
        Self::default()
    }

    /// Resolve options from the environment.
    ///
    /// Reads `DOCKER_HOST` and `DOCKER_CERT_PATH`; both are optional.
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("DOCKER_HOST").ok().filter(|h| !h.is_empty()),
            cert_path: std::env::var_os("DOCKER_CERT_PATH")
                .filter(|p| !p.is_empty())
                .map(PathBuf::from),
        }
    }
}

/// Caller-owned handle to a pinged image engine.
pub struct Engine {
    docker: Docker,
}

impl Engine {
    /// Build a client for the configured target and verify it with a ping.
    ///
    /// A connection-refused ping failure carries a hint that the engine's
    /// daemon may not be running. All connect failures map to
    /// [`ProbeError::ConnectionUnavailable`].
    pub async fn connect(options: &ConnectionOptions) -> Result<Self> {
        let docker = Self::build_client(options)?;

        match docker.ping().await {
            Ok(_) => {
                tracing::debug!(host = ?options.host, "Engine ping succeeded");
                Ok(Self { docker })
            }
            Err(err) => {
                let message = err.to_string();
                let hint = if message.contains("Connection refused") {
                    Some(
                        "the engine daemon does not appear to be running on the target"
                            .to_string(),
                    )
                } else {
                    None
                };
                if let Some(ref hint) = hint {
                    tracing::warn!(%message, %hint, "Engine ping failed");
                } else {
                    tracing::warn!(%message, "Engine ping failed");
                }
                Err(ProbeError::ConnectionUnavailable { message, hint })
            }
        }
    }

    fn build_client(options: &ConnectionOptions) -> Result<Docker> {
        let built = match &options.host {
            None => Docker::connect_with_socket_defaults(),
            Some(host) => match &options.cert_path {
                Some(dir) => Docker::connect_with_ssl(
                    host,
                    &dir.join(TLS_KEY_FILE),
                    &dir.join(TLS_CERT_FILE),
                    &dir.join(TLS_CA_FILE),
                    REQUEST_TIMEOUT_SECS,
                    API_DEFAULT_VERSION,
                ),
                None => Docker::connect_with_http(host, REQUEST_TIMEOUT_SECS, API_DEFAULT_VERSION),
            },
        };

        built.map_err(|err| ProbeError::ConnectionUnavailable {
            message: err.to_string(),
            hint: None,
        })
    }

    /// Inspect an image by reference (`GET images/{ref}/json`).
    ///
    /// A 404 maps to [`ProbeError::ImageNotFound`]; other failures surface as
    /// engine faults.
    pub async fn inspect_image(&self, reference: &str) -> Result<ImageInspect> {
        self.docker
            .inspect_image(reference)
            .await
            .map_err(|err| match err {
                bollard::errors::Error::DockerResponseServerError {
                    status_code: 404, ..
                } => ProbeError::ImageNotFound(reference.to_string()),
                other => ProbeError::Engine(other),
            })
    }

    /// Pull an image through the engine (`POST images/create?fromImage=`).
    ///
    /// Drains the progress stream to completion; progress items are logged but
    /// never interpreted. Only transport failures are reported.
    pub async fn pull_image(&self, reference: &str) -> Result<()> {
        let options = CreateImageOptions {
            from_image: reference.to_string(),
            ..Default::default()
        };

        let mut progress = self.docker.create_image(Some(options), None, None);
        while let Some(step) = progress.next().await {
            let info = step?;
            tracing::trace!(status = ?info.status, progress = ?info.progress, "Pull progress");
        }

        tracing::debug!(%reference, "Pull request completed");
        Ok(())
    }

    /// Stream a full image export (`GET images/{ref}/get`).
    ///
    /// The returned stream yields raw tar bytes and is backpressure-coupled:
    /// it is read only as fast as the consumer drains it.
    pub fn export_stream(
        &self,
        reference: &str,
    ) -> impl Stream<Item = std::result::Result<Bytes, bollard::errors::Error>> {
        self.docker.export_image(reference)
    }

    /// Remove an image from the engine (`DELETE images/{ref}?force=`).
    pub async fn remove_image(
        &self,
        reference: &str,
        force: bool,
    ) -> Result<Vec<ImageDeleteResponseItem>> {
        let options = RemoveImageOptions {
            force,
            ..Default::default()
        };

        self.docker
            .remove_image(reference, Some(options), None::<DockerCredentials>)
            .await
            .map_err(|err| match err {
                bollard::errors::Error::DockerResponseServerError {
                    status_code: 404, ..
                } => ProbeError::ImageNotFound(reference.to_string()),
                other => ProbeError::Engine(other),
            })
    }
}
