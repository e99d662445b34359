//! HTTP transport for outgoing calls

use super::error::TransportError;
use super::{Transport, TransportResponse, XinsCallRequest};
use crate::request::HttpMethod;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::header::{self, HeaderValue};
use hyper::{Method, Request, Uri};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded; charset=UTF-8";

/// Sends calls to one XINS endpoint over plain HTTP.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    url: String,
    client: Client<HttpConnector, Full<Bytes>>,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(url: &str) -> Result<Self, TransportError> {
        let uri: Uri = url
            .parse()
            .map_err(|_| TransportError::InvalidUrl(url.to_string()))?;
        if uri.scheme_str() != Some("http") || uri.host().is_none() {
            return Err(TransportError::InvalidUrl(url.to_string()));
        }

        Ok(Self {
            url: url.to_string(),
            client: Client::builder(TokioExecutor::new()).build_http(),
            timeout: DEFAULT_TIMEOUT,
        })
    }

    /// Limits the whole exchange, from connecting to the last body byte.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn build_request(&self, call: &XinsCallRequest) -> Result<Request<Full<Bytes>>, TransportError> {
        let encoded = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(call.wire_parameters())
            .finish();

        let builder = Request::builder();
        let request = match call.call_config().http_method {
            HttpMethod::Post => builder
                .method(Method::POST)
                .uri(&self.url)
                .header(header::CONTENT_TYPE, HeaderValue::from_static(FORM_CONTENT_TYPE))
                .body(Full::new(Bytes::from(encoded))),
            HttpMethod::Get => {
                let separator = if self.url.contains('?') { '&' } else { '?' };
                builder
                    .method(Method::GET)
                    .uri(format!("{}{}{}", self.url, separator, encoded))
                    .body(Full::new(Bytes::new()))
            }
        };
        request.map_err(|e| TransportError::Http {
            target: self.url.clone(),
            detail: e.to_string(),
        })
    }

    async fn exchange(&self, call: &XinsCallRequest) -> Result<TransportResponse, TransportError> {
        let request = self.build_request(call)?;
        let response = self.client.request(request).await.map_err(|e| {
            if e.is_connect() {
                TransportError::Connect {
                    target: self.url.clone(),
                    detail: e.to_string(),
                }
            } else {
                TransportError::Http {
                    target: self.url.clone(),
                    detail: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| TransportError::Http {
                target: self.url.clone(),
                detail: e.to_string(),
            })?
            .to_bytes();
        debug!(
            "Call to {} returned {} with {} bytes",
            self.url,
            status,
            body.len()
        );
        Ok(TransportResponse { status, body })
    }
}

impl Transport for HttpTransport {
    fn target(&self) -> &str {
        &self.url
    }

    fn send(
        &self,
        call: &XinsCallRequest,
    ) -> impl Future<Output = Result<TransportResponse, TransportError>> + Send {
        async move {
            timeout(self.timeout, self.exchange(call))
                .await
                .map_err(|_| TransportError::Timeout {
                    target: self.url.clone(),
                    timeout: self.timeout,
                })?
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::CallConfig;

    #[test]
    fn test_url_validation() {
        assert!(HttpTransport::new("http://127.0.0.1:8080/api").is_ok());
        assert!(matches!(
            HttpTransport::new("not a url"),
            Err(TransportError::InvalidUrl(_))
        ));
        assert!(matches!(
            HttpTransport::new("https://example.com/"),
            Err(TransportError::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn test_post_request_shape() {
        let transport = HttpTransport::new("http://127.0.0.1:8080/api").unwrap();
        let mut call = XinsCallRequest::new("Echo").unwrap();
        call.set_parameter("text", Some("a b")).unwrap();

        let request = transport.build_request(&call).unwrap();
        assert_eq!(request.method(), Method::POST);
        assert_eq!(request.uri(), "http://127.0.0.1:8080/api");
        assert_eq!(request.headers()[header::CONTENT_TYPE], FORM_CONTENT_TYPE);

        let body = request.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"_function=Echo&_convention=_xins-std&text=a+b");
    }

    #[test]
    fn test_get_request_shape() {
        let transport = HttpTransport::new("http://127.0.0.1:8080/api?x=1").unwrap();
        let mut call = XinsCallRequest::new("Echo").unwrap();
        call.set_call_config(CallConfig::new(false, HttpMethod::Get));

        let request = transport.build_request(&call).unwrap();
        assert_eq!(request.method(), Method::GET);
        assert_eq!(
            request.uri(),
            "http://127.0.0.1:8080/api?x=1&_function=Echo&_convention=_xins-std"
        );
    }

    #[tokio::test]
    async fn test_connection_refused() {
        // Bind and drop to find a port nobody listens on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport = HttpTransport::new(&format!("http://{}/", addr)).unwrap();
        let call = XinsCallRequest::new("Echo").unwrap();
        let err = transport.send(&call).await.unwrap_err();
        assert!(matches!(err, TransportError::Connect { .. }));
    }
}
