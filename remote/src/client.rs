use crate::error::RemoteError;
use crate::location::Location;
use reqwest::Client;

/// Downloads archives, detached signatures, and published keys. Local
/// paths and HTTP locations are handled uniformly so import and fetch
/// share one code path.
pub struct FetchClient {
    client: Client,
}

impl FetchClient {
    pub fn new() -> Result<Self, RemoteError> {
        let client = Client::builder()
            .user_agent(concat!("brig/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(FetchClient { client })
    }

    pub async fn fetch(&self, location: &Location) -> Result<Vec<u8>, RemoteError> {
        tracing::debug!(%location, "fetching");
        match location {
            Location::Path(path) => match tokio::fs::read(path).await {
                Ok(bytes) => Ok(bytes),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    Err(RemoteError::NotFound(location.to_string()))
                }
                Err(e) => Err(e.into()),
            },
            Location::Url(url) => {
                let response = self.client.get(url).send().await?;
                if response.status() == reqwest::StatusCode::NOT_FOUND {
                    return Err(RemoteError::NotFound(location.to_string()));
                }
                if !response.status().is_success() {
                    return Err(RemoteError::Status {
                        location: location.to_string(),
                        status: response.status().as_u16(),
                    });
                }
                Ok(response.bytes().await?.to_vec())
            }
        }
    }

    /// Like [`fetch`](Self::fetch), but absence is a state, not an
    /// error: used for signatures when unsigned images are allowed.
    pub async fn fetch_optional(&self, location: &Location) -> Result<Option<Vec<u8>>, RemoteError> {
        match self.fetch(location).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(RemoteError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fetch_local_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("blob");
        tokio::fs::write(&path, b"contents").await.unwrap();

        let client = FetchClient::new().unwrap();
        let location = Location::Path(path);
        assert_eq!(client.fetch(&location).await.unwrap(), b"contents");
    }

    #[tokio::test]
    async fn test_fetch_missing_local_file() {
        let client = FetchClient::new().unwrap();
        let location = Location::Path("/definitely/not/here".into());
        assert!(matches!(
            client.fetch(&location).await,
            Err(RemoteError::NotFound(_))
        ));
        assert!(client.fetch_optional(&location).await.unwrap().is_none());
    }
}
