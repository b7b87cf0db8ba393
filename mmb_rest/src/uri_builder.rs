//! Incremental query-string construction without intermediate `String`
//! allocation per key.

use std::fmt::Display;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use hyper::http::uri::{Parts, PathAndQuery};
use hyper::Uri;

pub type QueryKey = &'static str;

pub struct UriBuilder {
    // path and query share one buffer; query starts at `query_start`.
    buffer: BytesMut,
    query_start: usize,
}

impl UriBuilder {
    pub fn new(capacity: usize, path: &str) -> Self {
        let mut buf = BytesMut::with_capacity(capacity);
        buf.extend_from_slice(path.as_bytes());
        buf.put_u8(b'?');
        let query_start = buf.len();
        Self {
            buffer: buf,
            query_start,
        }
    }

    pub fn from_path(path: &str) -> Self {
        Self::new(1024, path)
    }

    fn add_static_part(&mut self, key: QueryKey) {
        let buf = &mut self.buffer;
        if buf.len() > self.query_start {
            buf.put_u8(b'&');
        }
        buf.extend_from_slice(key.as_bytes());
        buf.put_u8(b'=');
    }

    pub fn add_kv(&mut self, key: QueryKey, value: impl Display) {
        self.add_static_part(key);
        use std::fmt::Write;
        if let Err(err) = write!(self.buffer, "{value}") {
            panic!("unable to add parameter to query with key {key}: {err}");
        }
    }

    pub fn ensure_free_size(&mut self, need_capacity: usize) {
        if self.buffer.remaining() < need_capacity {
            self.buffer.reserve(need_capacity)
        }
    }

    pub fn query(&self) -> &[u8] {
        &self.buffer[self.query_start..]
    }

    pub fn build_uri_and_query(self, host: &str, add_query_to_uri: bool) -> (Uri, Bytes) {
        let buffer = self.buffer.freeze();
        let query = buffer.slice(self.query_start..);

        let path_and_query = match add_query_to_uri {
            false => buffer.slice(..self.query_start - 1),
            true if buffer.len() == self.query_start => buffer.slice(..self.query_start - 1),
            true => buffer,
        };
        let path_and_query = PathAndQuery::from_maybe_shared(path_and_query)
            .expect("unable to build PathAndQuery from UriBuilder");

        let mut parts = Parts::default();
        parts.scheme = Some("https".try_into().expect("static scheme"));
        parts.authority = Some(host.try_into().expect("unable to build authority for url"));
        parts.path_and_query = Some(path_and_query);

        let uri = Uri::from_parts(parts).expect("unable to build url from parts");
        (uri, query)
    }

    pub fn build_uri(self, host: &str, add_query_to_uri: bool) -> Uri {
        self.build_uri_and_query(host, add_query_to_uri).0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn build_query_by_builder() {
        let mut builder = UriBuilder::from_path("/path");
        builder.add_kv("symbol", "LTCBTC");
        builder.add_kv("side", "BUY");
        builder.add_kv("type", "LIMIT");
        builder.add_kv("timeInForce", "GTC");
        builder.add_kv("quantity", "1");
        builder.add_kv("price", "0.1");
        builder.add_kv("recvWindow", "5000");
        builder.add_kv("timestamp", "1499827319559");

        let expected = b"symbol=LTCBTC&side=BUY&type=LIMIT&timeInForce=GTC&quantity=1&price=0.1&recvWindow=5000&timestamp=1499827319559";
        assert_eq!(builder.query(), expected);
    }

    #[test]
    fn build_uri_with_query_by_builder() {
        let mut builder = UriBuilder::from_path("/path");
        builder.add_kv("key", "value");
        builder.add_kv("key2", 32);
        builder.add_kv("key3", dec!(42));
        assert_eq!(builder.query(), b"key=value&key2=32&key3=42");

        let uri = builder.build_uri("host.com", true);
        assert_eq!(uri, Uri::from_static("https://host.com/path?key=value&key2=32&key3=42"));
    }

    #[test]
    fn build_uri_without_query_by_builder() {
        let mut builder = UriBuilder::from_path("/path");
        builder.add_kv("key", "value");
        let uri = builder.build_uri("host.com", false);
        assert_eq!(uri, Uri::from_static("https://host.com/path"));
    }

    #[test]
    fn build_uri_from_empty_builder() {
        let builder = UriBuilder::from_path("/path");
        assert_eq!(builder.query(), b"");
        let uri = builder.build_uri("host.com", true);
        assert_eq!(uri, Uri::from_static("https://host.com/path"));
    }
}
