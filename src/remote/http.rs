//! Workspace API backend.
//!
//! Container allocation and commit go through the API management gateway,
//! authenticated with the workspace key and subscription key. Blobs are
//! written straight to the pre-signed container URL the gateway hands back
//! in the `Location` header.

use reqwest::blocking::{Client, Response};
use reqwest::header::LOCATION;
use reqwest::{StatusCode, Url};
use tracing::debug;

use super::{ContainerHandle, RemoteContainer, RemoteError};
use crate::bundle::WorkspaceCredentials;
use crate::config::RemoteConfig;
use crate::error::CourierError;

const API_KEY_HEADER: &str = "Api-Key";
const SUBSCRIPTION_KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";
const BLOB_TYPE_HEADER: &str = "x-ms-blob-type";

/// Talks to the workspace API on behalf of one set of credentials.
pub struct HttpContainerService {
    client: Client,
    base_url: Url,
    credentials: WorkspaceCredentials,
}

impl std::fmt::Debug for HttpContainerService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpContainerService")
            .field("base_url", &self.base_url.as_str())
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}

impl HttpContainerService {
    pub fn new(
        config: &RemoteConfig,
        credentials: &WorkspaceCredentials,
    ) -> Result<Self, CourierError> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| CourierError::Config(format!("remote.base_url: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(CourierError::Config(
                "remote.base_url must be an absolute http(s) URL".into(),
            ));
        }
        if config.timeout_secs == 0 {
            return Err(CourierError::Config(
                "remote.timeout_secs must be at least 1".into(),
            ));
        }
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| CourierError::Config(format!("http client: {e}")))?;
        Ok(Self {
            client,
            base_url,
            credentials: credentials.clone(),
        })
    }

    /// `{base}/api/workspace/{workspace}/files/containers[/{id}]`
    fn containers_url(&self, workspace: &str, id: Option<&str>) -> Result<Url, RemoteError> {
        endpoint(&self.base_url, workspace, id)
    }
}

fn endpoint(base: &Url, workspace: &str, id: Option<&str>) -> Result<Url, RemoteError> {
    let mut url = base.clone();
    {
        let mut segments = url
            .path_segments_mut()
            .map_err(|_| RemoteError::protocol("base url cannot carry a path"))?;
        segments
            .pop_if_empty()
            .extend(["api", "workspace", workspace, "files", "containers"]);
        if let Some(id) = id {
            segments.push(id);
        }
    }
    Ok(url)
}

/// The URL of blob `name` inside a pre-signed container URL: the blob name
/// becomes the last path segment and the signature query is kept.
pub(crate) fn blob_url(location: &str, name: &str) -> Result<Url, RemoteError> {
    let mut url = Url::parse(location)
        .map_err(|e| RemoteError::protocol(format!("container location: {e}")))?;
    url.path_segments_mut()
        .map_err(|_| RemoteError::protocol("container location cannot carry a path"))?
        .pop_if_empty()
        .push(name);
    Ok(url)
}

fn classify_transport(err: reqwest::Error) -> RemoteError {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RemoteError::transient(err.to_string())
    } else {
        RemoteError::protocol(err.to_string())
    }
}

fn classify_status(status: StatusCode) -> Result<(), RemoteError> {
    if status.is_success() {
        Ok(())
    } else if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        Err(RemoteError::transient(format!("status {status}")))
    } else {
        Err(RemoteError::rejected(format!("status {status}")))
    }
}

fn check(response: Result<Response, reqwest::Error>) -> Result<Response, RemoteError> {
    let response = response.map_err(classify_transport)?;
    classify_status(response.status())?;
    Ok(response)
}

impl RemoteContainer for HttpContainerService {
    fn create_container(
        &self,
        workspace: &str,
        title: &str,
    ) -> Result<ContainerHandle, RemoteError> {
        let url = self.containers_url(workspace, None)?;
        debug!(%url, title, "allocating container");
        let response = check(
            self.client
                .post(url)
                .query(&[("title", title)])
                .header(API_KEY_HEADER, &self.credentials.workspace_key)
                .header(SUBSCRIPTION_KEY_HEADER, &self.credentials.subscription_key)
                .send(),
        )?;

        let location = response
            .headers()
            .get(LOCATION)
            .ok_or_else(|| RemoteError::protocol("response has no Location header"))?
            .to_str()
            .map_err(|_| RemoteError::protocol("Location header is not ASCII"))?;
        // Reject a location we could not address blobs under.
        blob_url(location, "blob")?;
        Ok(ContainerHandle::new(workspace, location))
    }

    fn put_blob(
        &self,
        handle: &ContainerHandle,
        name: &str,
        bytes: &[u8],
    ) -> Result<(), RemoteError> {
        let url = blob_url(handle.location(), name)?;
        debug!(container = handle.id(), blob = name, size = bytes.len(), "uploading blob");
        check(
            self.client
                .put(url)
                .header(BLOB_TYPE_HEADER, "BlockBlob")
                .body(bytes.to_vec())
                .send(),
        )?;
        Ok(())
    }

    fn commit_container(&self, handle: &ContainerHandle) -> Result<(), RemoteError> {
        let url = self.containers_url(handle.workspace(), Some(handle.id()))?;
        debug!(%url, "committing container");
        check(
            self.client
                .patch(url)
                .header(API_KEY_HEADER, &self.credentials.workspace_key)
                .header(SUBSCRIPTION_KEY_HEADER, &self.credentials.subscription_key)
                .send(),
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::RemoteErrorKind;

    #[test]
    fn test_endpoint_layout() {
        let base = Url::parse("https://gw.example/v1").unwrap();
        assert_eq!(
            endpoint(&base, "W1", None).unwrap().as_str(),
            "https://gw.example/v1/api/workspace/W1/files/containers"
        );
        assert_eq!(
            endpoint(&base, "my ws", Some("c-42")).unwrap().as_str(),
            "https://gw.example/v1/api/workspace/my%20ws/files/containers/c-42"
        );

        let trailing = Url::parse("https://gw.example/v1/").unwrap();
        assert_eq!(
            endpoint(&trailing, "W1", None).unwrap().as_str(),
            "https://gw.example/v1/api/workspace/W1/files/containers"
        );
    }

    #[test]
    fn test_blob_url_keeps_signature() {
        let url = blob_url("https://acct.blob.example/c-42?sv=2024&sig=abc", "a b.txt").unwrap();
        assert_eq!(
            url.as_str(),
            "https://acct.blob.example/c-42/a%20b.txt?sv=2024&sig=abc"
        );
    }

    #[test]
    fn test_bad_location_is_protocol_error() {
        let err = blob_url("not a url", "a.txt").unwrap_err();
        assert_eq!(err.kind(), RemoteErrorKind::Protocol);
    }

    #[test]
    fn test_status_classification() {
        assert!(classify_status(StatusCode::CREATED).is_ok());
        assert!(classify_status(StatusCode::SERVICE_UNAVAILABLE)
            .unwrap_err()
            .is_transient());
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS)
            .unwrap_err()
            .is_transient());
        assert_eq!(
            classify_status(StatusCode::FORBIDDEN).unwrap_err().kind(),
            RemoteErrorKind::Rejected
        );
    }

    #[test]
    fn test_rejects_relative_base_url() {
        let config = RemoteConfig {
            base_url: "/v1".into(),
            ..RemoteConfig::default()
        };
        let creds = WorkspaceCredentials::new("k", "s", "u");
        assert!(matches!(
            HttpContainerService::new(&config, &creds),
            Err(CourierError::Config(_))
        ));
    }
}
