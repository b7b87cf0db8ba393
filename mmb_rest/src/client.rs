//! Generic, connection-pooled REST client shared by every venue connector.
//! Every verb routes through `RestHeaders::add_specific_headers` and is
//! handed the outgoing body too, so the same client serves Binance's
//! header-only signing as well as OKX's and Bybit's body-inclusive
//! signatures.

use std::fmt::{self, Debug, Display, Formatter};

use bytes::Bytes;
use hyper::client::HttpConnector;
use hyper::http::request::Builder;
use hyper::{Body, Client, Method, Request, StatusCode, Uri};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use uuid::Uuid;

use crate::error::RestError;

#[derive(Copy, Clone)]
pub enum RequestType {
    Get,
    Put,
    Post,
    Delete,
}

impl RequestType {
    pub const fn as_str(&self) -> &'static str {
        match *self {
            RequestType::Get => "GET",
            RequestType::Put => "PUT",
            RequestType::Post => "POST",
            RequestType::Delete => "DELETE",
        }
    }
}

impl Display for RequestType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Debug for RequestType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Venue-specific headers (API key, passphrase, signature placement). One
/// impl per venue connector. `body` is empty for GET/PUT/DELETE and the
/// wire-ready request body for POST; venues whose signature covers the
/// body (OKX) need it, venues that sign via query parameter alone
/// (Binance) ignore it.
pub trait RestHeaders {
    fn add_specific_headers(&self, builder: Builder, uri: &Uri, request_type: RequestType, body: &[u8]) -> Builder;
}

#[derive(Eq, PartialEq, Clone)]
pub struct RestResponse {
    pub status: StatusCode,
    pub content: String,
}

impl Debug for RestResponse {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let cut: std::borrow::Cow<str> = if self.content.len() > 1500 {
            std::borrow::Cow::Owned(self.content.chars().take(1500).collect())
        } else {
            std::borrow::Cow::Borrowed(&self.content)
        };
        write!(f, "status: {:?} content: {cut}", self.status)
    }
}

/// Lets a venue recognize error codes embedded in an otherwise-2xx response
/// body (many venues report errors this way instead of via HTTP status).
pub trait ErrorHandler: Sized {
    fn check_spec_rest_error(&self, response: &RestResponse) -> Result<(), RestError>;
}

#[derive(Default)]
pub struct ErrorHandlerEmpty;

impl ErrorHandler for ErrorHandlerEmpty {
    fn check_spec_rest_error(&self, _response: &RestResponse) -> Result<(), RestError> {
        Ok(())
    }
}

pub struct ErrorHandlerData<ErrHandler: ErrorHandler + Send + Sync + 'static> {
    empty_response_is_ok: bool,
    account_label: String,
    error_handler: ErrHandler,
}

impl<ErrHandler: ErrorHandler + Send + Sync + 'static> ErrorHandlerData<ErrHandler> {
    pub fn new(empty_response_is_ok: bool, account_label: String, error_handler: ErrHandler) -> Self {
        Self {
            empty_response_is_ok,
            account_label,
            error_handler,
        }
    }

    fn request_log(&self, action_name: &str, request_id: &Uuid) {
        log::trace!("{action_name} request {request_id} on {}", self.account_label);
    }

    fn response_log(&self, action_name: &str, response: &RestResponse, request_id: &Uuid) {
        log::trace!(
            "{action_name} response on {}: {response:?}, request_id: {request_id}",
            self.account_label
        );
    }

    fn get_rest_error(&self, response: &RestResponse) -> Result<(), RestError> {
        match response.status {
            StatusCode::UNAUTHORIZED => Err(RestError::Auth(response.content.clone())),
            StatusCode::GATEWAY_TIMEOUT | StatusCode::SERVICE_UNAVAILABLE => Err(RestError::Server {
                status: response.status,
                body: response.content.clone(),
            }),
            status if status.is_client_error() => match self.error_handler.check_spec_rest_error(response) {
                Ok(()) => Err(RestError::Client {
                    status,
                    body: response.content.clone(),
                }),
                Err(err) => Err(err),
            },
            status if status.is_server_error() => Err(RestError::Server {
                status,
                body: response.content.clone(),
            }),
            _ if response.content.is_empty() && self.empty_response_is_ok => Ok(()),
            _ => self.error_handler.check_spec_rest_error(response),
        }
    }
}

const KEEP_ALIVE: &str = "keep-alive";

pub struct RestClient<ErrHandler: ErrorHandler + Send + Sync + 'static, SpecHeaders: RestHeaders + Send + Sync + 'static> {
    client: Client<HttpsConnector<HttpConnector>>,
    error_handler: ErrorHandlerData<ErrHandler>,
    headers: SpecHeaders,
}

impl<ErrHandler, SpecHeaders> RestClient<ErrHandler, SpecHeaders>
where
    ErrHandler: ErrorHandler + Send + Sync + 'static,
    SpecHeaders: RestHeaders + Send + Sync + 'static,
{
    pub fn new(error_handler: ErrorHandlerData<ErrHandler>, headers: SpecHeaders) -> Self {
        Self {
            client: create_client(),
            error_handler,
            headers,
        }
    }

    pub async fn get(&self, uri: Uri, action_name: &'static str) -> Result<RestResponse, RestError> {
        let request_id = Uuid::new_v4();
        self.error_handler.request_log(action_name, &request_id);

        let builder = Request::builder().method(Method::GET);
        let req = self
            .headers
            .add_specific_headers(builder, &uri, RequestType::Get, &[])
            .uri(uri)
            .header(hyper::header::CONNECTION, KEEP_ALIVE)
            .body(Body::empty())
            .expect("building a GET request from static parts cannot fail");

        self.send(req, action_name, &request_id).await
    }

    pub async fn put(&self, uri: Uri, action_name: &'static str) -> Result<RestResponse, RestError> {
        let request_id = Uuid::new_v4();
        self.error_handler.request_log(action_name, &request_id);

        let builder = Request::builder().method(Method::PUT);
        let req = self
            .headers
            .add_specific_headers(builder, &uri, RequestType::Put, &[])
            .uri(uri)
            .header(hyper::header::CONNECTION, KEEP_ALIVE)
            .body(Body::empty())
            .expect("building a PUT request from static parts cannot fail");

        self.send(req, action_name, &request_id).await
    }

    pub async fn post(&self, uri: Uri, query: Option<Bytes>, action_name: &'static str) -> Result<RestResponse, RestError> {
        let request_id = Uuid::new_v4();
        self.error_handler.request_log(action_name, &request_id);

        let builder = Request::builder().method(Method::POST);
        let body_bytes = query.clone().unwrap_or_default();
        let req = self
            .headers
            .add_specific_headers(builder, &uri, RequestType::Post, &body_bytes)
            .uri(uri)
            .header(hyper::header::CONNECTION, KEEP_ALIVE)
            .body(match query {
                Some(query) => Body::from(query),
                None => Body::empty(),
            })
            .expect("building a POST request from static parts cannot fail");

        self.send(req, action_name, &request_id).await
    }

    pub async fn delete(&self, uri: Uri, action_name: &'static str) -> Result<RestResponse, RestError> {
        let request_id = Uuid::new_v4();
        self.error_handler.request_log(action_name, &request_id);

        let builder = Request::builder().method(Method::DELETE);
        let req = self
            .headers
            .add_specific_headers(builder, &uri, RequestType::Delete, &[])
            .uri(uri)
            .header(hyper::header::CONNECTION, KEEP_ALIVE)
            .body(Body::empty())
            .expect("building a DELETE request from static parts cannot fail");

        self.send(req, action_name, &request_id).await
    }

    async fn send(&self, req: Request<Body>, action_name: &'static str, request_id: &Uuid) -> Result<RestResponse, RestError> {
        let response = self.client.request(req).await?;
        let status = response.status();
        let body = hyper::body::to_bytes(response.into_body()).await?;
        let content = String::from_utf8_lossy(&body).into_owned();

        let outcome = RestResponse { status, content };
        self.error_handler.response_log(action_name, &outcome, request_id);
        self.error_handler.get_rest_error(&outcome)?;

        Ok(outcome)
    }
}

fn create_client() -> Client<HttpsConnector<HttpConnector>> {
    let https = HttpsConnectorBuilder::new()
        .with_native_roots()
        .https_only()
        .enable_http1()
        .enable_http2()
        .build();
    Client::builder().build::<_, Body>(https)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_response_is_ok_when_configured_so() {
        struct NeverCalled;
        impl ErrorHandler for NeverCalled {
            fn check_spec_rest_error(&self, _response: &RestResponse) -> Result<(), RestError> {
                panic!("should not be reached: status already resolved the outcome")
            }
        }
        let handler = ErrorHandlerData::new(true, "test-account".to_string(), NeverCalled);
        let response = RestResponse {
            status: StatusCode::OK,
            content: String::new(),
        };
        assert!(handler.get_rest_error(&response).is_ok());
    }

    #[test]
    fn unauthorized_maps_to_auth_error() {
        let handler = ErrorHandlerData::new(false, "test-account".to_string(), ErrorHandlerEmpty);
        let response = RestResponse {
            status: StatusCode::UNAUTHORIZED,
            content: "bad signature".to_string(),
        };
        assert!(matches!(handler.get_rest_error(&response), Err(RestError::Auth(_))));
    }

    #[test]
    fn server_error_status_maps_to_server_error() {
        let handler = ErrorHandlerData::new(false, "test-account".to_string(), ErrorHandlerEmpty);
        let response = RestResponse {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            content: "oops".to_string(),
        };
        assert!(matches!(handler.get_rest_error(&response), Err(RestError::Server { .. })));
    }

    #[test]
    fn client_error_status_delegates_to_handler_first() {
        struct AlwaysFlags;
        impl ErrorHandler for AlwaysFlags {
            fn check_spec_rest_error(&self, response: &RestResponse) -> Result<(), RestError> {
                Err(RestError::Client {
                    status: response.status,
                    body: format!("venue-specific: {}", response.content),
                })
            }
        }
        let handler = ErrorHandlerData::new(false, "test-account".to_string(), AlwaysFlags);
        let response = RestResponse {
            status: StatusCode::BAD_REQUEST,
            content: "bad param".to_string(),
        };
        match handler.get_rest_error(&response) {
            Err(RestError::Client { body, .. }) => assert!(body.contains("venue-specific")),
            other => panic!("expected a venue-annotated client error, got {other:?}"),
        }
    }
}
