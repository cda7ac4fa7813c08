use rkyv::{Archive, Deserialize, Serialize};

/// The endpoint proxied requests are received on.
pub const PROXY_ENDPOINT: &str = "/proxy/req";

#[repr(C)]
#[derive(Serialize, Deserialize, Archive, Debug, Clone, PartialEq, Eq)]
#[archive(check_bytes)]
#[archive_attr(derive(Debug))]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[repr(C)]
#[derive(Serialize, Deserialize, Archive, Debug, Clone, PartialEq, Eq)]
#[archive(check_bytes)]
#[archive_attr(derive(Debug))]
/// A request forwarded to the owner of its keys.
pub struct ProxyRequest {
    /// The sender's ring checksum when the request was routed.
    pub checksum: u32,
    pub keys: Vec<String>,
    /// The address of the member which forwarded the request.
    pub source: String,
    /// The application endpoint the request is meant for.
    pub endpoint: String,
    pub headers: Vec<Header>,
    pub body: Vec<u8>,
}

impl ProxyRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

#[repr(C)]
#[derive(Serialize, Deserialize, Archive, Debug, Clone, PartialEq, Eq)]
#[archive(check_bytes)]
#[archive_attr(derive(Debug))]
pub struct ProxyResponse {
    pub status_code: u16,
    pub headers: Vec<Header>,
    pub body: Vec<u8>,
}

impl ProxyResponse {
    pub fn new(status_code: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status_code,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(Header::new(name, value));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

#[derive(Debug, Clone, Default)]
/// A request issued by the application before it is routed.
pub struct OutgoingRequest {
    pub keys: Vec<String>,
    pub endpoint: String,
    pub headers: Vec<Header>,
    pub body: Vec<u8>,
}

impl OutgoingRequest {
    pub fn new(endpoint: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            endpoint: endpoint.into(),
            body: body.into(),
            ..Default::default()
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.keys.push(key.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(Header::new(name, value));
        self
    }

    pub(crate) fn into_proxy_request(self, checksum: u32, source: &str) -> ProxyRequest {
        ProxyRequest {
            checksum,
            keys: self.keys,
            source: source.to_string(),
            endpoint: self.endpoint,
            headers: self.headers,
            body: self.body,
        }
    }
}

fn find_header<'a>(headers: &'a [Header], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.as_str())
}
