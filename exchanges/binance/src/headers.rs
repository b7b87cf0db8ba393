//! `RestHeaders`/`ErrorHandler` impls for Binance, grounded on
//! `RestHeadersBinance`/`ErrorHandlerBinance` in
//! `exchanges/binance/src/binance.rs`.

use hyper::header::CONTENT_TYPE;
use hyper::http::request::Builder;
use hyper::Uri;
use mmb_rest::{ErrorHandler, RequestType, RestError, RestHeaders, RestResponse};
use serde::Deserialize;

pub struct BinanceHeaders {
    pub api_key: String,
    pub is_usd_m_futures: bool,
}

impl RestHeaders for BinanceHeaders {
    fn add_specific_headers(&self, builder: Builder, _uri: &Uri, _request_type: RequestType, _body: &[u8]) -> Builder {
        let builder = if self.is_usd_m_futures {
            builder.header(CONTENT_TYPE, "application/x-www-form-urlencoded")
        } else {
            builder
        };
        builder.header("X-MBX-APIKEY", &self.api_key)
    }
}

#[derive(Deserialize)]
struct BinanceErrorBody {
    msg: String,
    code: i64,
}

#[derive(Default)]
pub struct BinanceErrorHandler;

impl ErrorHandler for BinanceErrorHandler {
    fn check_spec_rest_error(&self, response: &RestResponse) -> Result<(), RestError> {
        // Binance embeds an error even in some 2xx bodies, and is
        // inconsistent about which of `success`/`code` it includes.
        if !(response.content.contains(r#""success":false"#) || response.content.contains(r#""code""#)) {
            return Ok(());
        }
        let error: BinanceErrorBody = match serde_json::from_str::<BinanceErrorBody>(&response.content) {
            Ok(error) => error,
            Err(_) => {
                return Err(RestError::Client {
                    status: response.status,
                    body: response.content.clone(),
                })
            }
        };
        Err(RestError::Client {
            status: response.status,
            body: format!("binance error {}: {}", error.code, error.msg),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::StatusCode;

    #[test]
    fn ok_body_without_error_markers_passes() {
        let handler = BinanceErrorHandler;
        let response = RestResponse {
            status: StatusCode::OK,
            content: r#"{"listenKey":"abc"}"#.to_string(),
        };
        assert!(handler.check_spec_rest_error(&response).is_ok());
    }

    #[test]
    fn embedded_error_in_2xx_body_is_surfaced() {
        let handler = BinanceErrorHandler;
        let response = RestResponse {
            status: StatusCode::OK,
            content: r#"{"code":-1121,"msg":"Invalid symbol."}"#.to_string(),
        };
        let err = handler.check_spec_rest_error(&response).unwrap_err();
        assert!(err.to_string().contains("-1121"));
    }
}
