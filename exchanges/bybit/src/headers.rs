//! `RestHeaders`/`ErrorHandler` for Bybit, modeled on the header set
//! `BybitRequestSigner` produces in
//! `other_examples/.../barter-execution-src-client-bybit-client.rs.rs`
//! (`X-BAPI-API-KEY`/`X-BAPI-SIGN`/`X-BAPI-TIMESTAMP`/
//! `X-BAPI-RECV-WINDOW`, hex-encoded HMAC) adapted to this crate's
//! `RestHeaders` seam; the exact signed-message layout
//! (`timestamp + api_key + recv_window + query_or_body`) is Bybit's
//! documented v5 convention, not reproduced verbatim in the pack (DESIGN.md).

use hyper::header::CONTENT_TYPE;
use hyper::http::request::Builder;
use hyper::Uri;
use mmb_rest::{hmac_sha256_hex, ErrorHandler, RequestType, RestError, RestHeaders, RestResponse};
use mmb_utils::time::now_ms;
use serde::Deserialize;

const RECV_WINDOW_MS: &str = "5000";

pub struct BybitHeaders {
    pub api_key: String,
    pub secret: String,
}

impl RestHeaders for BybitHeaders {
    fn add_specific_headers(&self, builder: Builder, uri: &Uri, _request_type: RequestType, body: &[u8]) -> Builder {
        let timestamp = now_ms().to_string();
        let query_or_body = if body.is_empty() {
            uri.query().unwrap_or("").to_string()
        } else {
            String::from_utf8_lossy(body).into_owned()
        };
        let message = signing_message(&timestamp, &self.api_key, &query_or_body);
        let signature = hmac_sha256_hex(&self.secret, message.as_bytes());

        builder
            .header(CONTENT_TYPE, "application/json")
            .header("X-BAPI-API-KEY", &self.api_key)
            .header("X-BAPI-SIGN", signature)
            .header("X-BAPI-TIMESTAMP", timestamp)
            .header("X-BAPI-RECV-WINDOW", RECV_WINDOW_MS)
    }
}

/// `timestamp + api_key + recv_window + query_or_body`, Bybit's documented
/// v5 pre-sign message layout. A free function so a literal fixture can pin
/// it down without going through `now_ms()`.
fn signing_message(timestamp: &str, api_key: &str, query_or_body: &str) -> String {
    format!("{timestamp}{api_key}{RECV_WINDOW_MS}{query_or_body}")
}

#[derive(Deserialize)]
struct BybitErrorBody {
    #[serde(rename = "retCode")]
    ret_code: i64,
    #[serde(rename = "retMsg")]
    ret_msg: String,
}

#[derive(Default)]
pub struct BybitErrorHandler;

impl ErrorHandler for BybitErrorHandler {
    /// Bybit returns HTTP 200 for nearly every application error, with
    /// `retCode` set to a nonzero value.
    fn check_spec_rest_error(&self, response: &RestResponse) -> Result<(), RestError> {
        let Ok(error) = serde_json::from_str::<BybitErrorBody>(&response.content) else {
            return Ok(());
        };
        if error.ret_code == 0 {
            return Ok(());
        }
        Err(RestError::Client {
            status: response.status,
            body: format!("bybit error {}: {}", error.ret_code, error.ret_msg),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::StatusCode;

    #[test]
    fn zero_ret_code_passes() {
        let handler = BybitErrorHandler;
        let response = RestResponse {
            status: StatusCode::OK,
            content: r#"{"retCode":0,"retMsg":"OK","result":{}}"#.to_string(),
        };
        assert!(handler.check_spec_rest_error(&response).is_ok());
    }

    #[test]
    fn nonzero_ret_code_is_surfaced() {
        let handler = BybitErrorHandler;
        let response = RestResponse {
            status: StatusCode::OK,
            content: r#"{"retCode":10001,"retMsg":"params error","result":{}}"#.to_string(),
        };
        let err = handler.check_spec_rest_error(&response).unwrap_err();
        assert!(err.to_string().contains("10001"));
    }

    #[test]
    fn signature_matches_known_fixture() {
        let message = signing_message("1700000000000", "key", "symbol=BTCUSDT");
        let signature = hmac_sha256_hex("s", message.as_bytes());
        assert_eq!(signature, "e7aa3f101fc947ab4efad339d48432eb207a33a9b784ea2501fa0dd0fd6914ab");
    }
}
