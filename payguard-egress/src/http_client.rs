//! Shared HTTPS client construction.

use hyper::client::HttpConnector;
use hyper::{Body, Client};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};

/// Hyper client type used by every outbound collaborator.
pub type HttpsClient = Client<HttpsConnector<HttpConnector>, Body>;

/// Builds an HTTPS client trusting the webpki root set.
#[must_use]
pub fn build_https_client() -> HttpsClient {
    let connector = HttpsConnectorBuilder::new()
        .with_webpki_roots()
        .https_or_http()
        .enable_http1()
        .build();

    Client::builder().build::<_, Body>(connector)
}
