use crate::config::Config;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};

/// Turns texts into vectors, one vector per text, in input order.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    texts: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Client for the batch embedding service (`POST /embed-batch`).
///
/// A call is a single request with no retry. Any failure is logged here and
/// handed back as an `Err`; wrap the client in `retry::Retrying` to add a
/// retry policy.
#[derive(Clone)]
pub struct EmbeddingClient {
    http: reqwest::Client,
    url: String,
    dimensions: Option<usize>,
}

impl EmbeddingClient {
    pub fn new(config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.embedding_timeout_secs))
            .build()?;
        Ok(Self::with_client(
            http,
            &config.embedding_url,
            config.embedding_dimensions,
        ))
    }

    pub fn with_client(http: reqwest::Client, url: &str, dimensions: Option<usize>) -> Self {
        Self {
            http,
            url: url.to_string(),
            dimensions,
        }
    }

    async fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        debug!("Requesting batch embedding for {} texts from {}", texts.len(), self.url);

        let response = self
            .http
            .post(&self.url)
            .json(&EmbedRequest { texts })
            .send()
            .await?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(Error::UpstreamStatus(status.as_u16()));
        }

        let body = response.bytes().await?;
        let embeddings = parse_embeddings(&body, texts.len(), self.dimensions)?;
        debug!("Received {} embeddings from {}", embeddings.len(), self.url);
        Ok(embeddings)
    }
}

#[async_trait]
impl Embedder for EmbeddingClient {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Err(Error::InputInvalid("no texts provided for embedding"));
        }

        self.request(texts).await.map_err(|e| {
            error!("Embedding request to {} failed: {}", self.url, e);
            e
        })
    }
}

/// Validates an `/embed-batch` response body.
///
/// The body must be `{"embeddings": [[f32, ...], ...]}` with exactly
/// `expected` vectors of finite floats, all of the same non-zero length (equal
/// to `dimensions` when given).
pub fn parse_embeddings(
    body: &[u8],
    expected: usize,
    dimensions: Option<usize>,
) -> Result<Vec<Vec<f32>>> {
    let parsed: EmbedResponse = serde_json::from_slice(body)
        .map_err(|e| Error::UpstreamShape(format!("unexpected body: {}", e)))?;

    if parsed.embeddings.len() != expected {
        return Err(Error::UpstreamShape(format!(
            "expected {} embeddings, got {}",
            expected,
            parsed.embeddings.len()
        )));
    }

    let dims = match dimensions {
        Some(d) => d,
        None => parsed.embeddings.first().map(Vec::len).unwrap_or(0),
    };
    if dims == 0 {
        return Err(Error::UpstreamShape("empty embedding vector".to_string()));
    }

    for (i, vector) in parsed.embeddings.iter().enumerate() {
        if vector.len() != dims {
            return Err(Error::UpstreamShape(format!(
                "embedding {} has {} dimensions, expected {}",
                i,
                vector.len(),
                dims
            )));
        }
        // Out-of-range numbers deserialize to infinity.
        if vector.iter().any(|v| !v.is_finite()) {
            return Err(Error::UpstreamShape(format!(
                "embedding {} has a non-finite element",
                i
            )));
        }
    }

    Ok(parsed.embeddings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};
    use serde_json::json;

    #[test]
    fn test_parse_valid_response() {
        let body = br#"{"embeddings": [[0.1, 0.2], [0.3, 0.4]]}"#;
        let embeddings = parse_embeddings(body, 2, None).unwrap();
        assert_eq!(embeddings, vec![vec![0.1, 0.2], vec![0.3, 0.4]]);

        let embeddings = parse_embeddings(body, 2, Some(2)).unwrap();
        assert_eq!(embeddings.len(), 2);
    }

    #[test]
    fn test_cardinality_mismatch_is_shape_error() {
        let body = br#"{"embeddings": [[0.1, 0.2]]}"#;
        let err = parse_embeddings(body, 2, None).unwrap_err();
        assert!(matches!(err, Error::UpstreamShape(_)));
    }

    #[test]
    fn test_malformed_bodies_are_shape_errors() {
        let bodies: [&[u8]; 5] = [
            br#"{}"#,
            br#"{"embeddings": "nope"}"#,
            br#"{"embeddings": [["a", "b"]]}"#,
            b"not json",
            b"",
        ];
        for body in bodies {
            let err = parse_embeddings(body, 1, None).unwrap_err();
            assert!(matches!(err, Error::UpstreamShape(_)), "body {:?}", body);
        }
    }

    #[test]
    fn test_dimension_checks() {
        let ragged = br#"{"embeddings": [[0.1, 0.2], [0.3]]}"#;
        assert!(matches!(
            parse_embeddings(ragged, 2, None),
            Err(Error::UpstreamShape(_))
        ));

        let body = br#"{"embeddings": [[0.1, 0.2]]}"#;
        assert!(matches!(
            parse_embeddings(body, 1, Some(384)),
            Err(Error::UpstreamShape(_))
        ));

        let empty = br#"{"embeddings": [[]]}"#;
        assert!(matches!(
            parse_embeddings(empty, 1, None),
            Err(Error::UpstreamShape(_))
        ));
    }

    #[test]
    fn test_non_finite_elements_are_shape_errors() {
        let body = br#"{"embeddings": [[1e40, 0.2]]}"#;
        let err = parse_embeddings(body, 1, None).unwrap_err();
        assert!(matches!(err, Error::UpstreamShape(_)));

        let body = br#"{"embeddings": [[0.1, 0.2], [-1e39, 0.0]]}"#;
        assert!(matches!(
            parse_embeddings(body, 2, Some(2)),
            Err(Error::UpstreamShape(_))
        ));
    }

    fn texts(items: &[&str]) -> Vec<String> {
        items.iter().map(|t| t.to_string()).collect()
    }

    fn client_for(server: &MockServer) -> EmbeddingClient {
        EmbeddingClient::with_client(reqwest::Client::new(), &server.url("/embed-batch"), None)
    }

    #[tokio::test]
    async fn test_embed_batch_round_trip() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/embed-batch")
                    .json_body(json!({ "texts": ["hi", "there"] }));
                then.status(200)
                    .json_body(json!({ "embeddings": [[0.1, 0.2], [0.3, 0.4]] }));
            })
            .await;

        let embeddings = client_for(&server)
            .embed(&texts(&["hi", "there"]))
            .await
            .unwrap();
        mock.assert_async().await;
        assert_eq!(embeddings, vec![vec![0.1, 0.2], vec![0.3, 0.4]]);
    }

    #[tokio::test]
    async fn test_server_error_status() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/embed-batch");
                then.status(500).body("boom");
            })
            .await;

        let err = client_for(&server).embed(&texts(&["hi"])).await.unwrap_err();
        assert!(matches!(err, Error::UpstreamStatus(500)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_only_200_is_success() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/embed-batch");
                then.status(201).json_body(json!({ "embeddings": [[0.1, 0.2]] }));
            })
            .await;

        let err = client_for(&server).embed(&texts(&["hi"])).await.unwrap_err();
        assert!(matches!(err, Error::UpstreamStatus(201)));
    }

    #[tokio::test]
    async fn test_http_cardinality_mismatch() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/embed-batch");
                then.status(200).json_body(json!({ "embeddings": [[0.1, 0.2]] }));
            })
            .await;

        let err = client_for(&server)
            .embed(&texts(&["a", "b"]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UpstreamShape(_)));
    }

    #[tokio::test]
    async fn test_http_non_finite_vector_rejected() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/embed-batch");
                then.status(200)
                    .header("content-type", "application/json")
                    .body(r#"{"embeddings": [[1e40, 0.2]]}"#);
            })
            .await;

        let err = client_for(&server).embed(&texts(&["hi"])).await.unwrap_err();
        assert!(matches!(err, Error::UpstreamShape(_)));
    }

    #[tokio::test]
    async fn test_unreachable_service_is_transport_error() {
        let client =
            EmbeddingClient::with_client(reqwest::Client::new(), "http://127.0.0.1:1/embed-batch", None);
        let err = client.embed(&texts(&["hi"])).await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_empty_input_rejected_before_request() {
        // Unroutable URL: the call must fail on validation, not on the network.
        let client =
            EmbeddingClient::with_client(reqwest::Client::new(), "http://127.0.0.1:9/embed-batch", None);
        let err = client.embed(&[]).await.unwrap_err();
        assert!(matches!(err, Error::InputInvalid(_)));
    }
}
