use std::borrow::Cow;
use std::fmt::{self, Display, Formatter};
use std::io;
use thiserror::Error;

const METHOD_GET: &'static str = "GET";
const METHOD_POST: &'static str = "POST";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    GET,
    POST,
    OTHER,
}

impl Method {
    /// Classifies a request line by substring, so `XGETX /` still counts as a GET.
    /// The match is case-sensitive and GET wins over POST.
    pub fn classify(request_line: &str) -> Self {
        if request_line.contains(METHOD_GET) {
            Method::GET
        } else if request_line.contains(METHOD_POST) {
            Method::POST
        } else {
            Method::OTHER
        }
    }
}

impl Display for Method {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Method::GET => write!(f, "GET"),
            Method::POST => write!(f, "POST"),
            Method::OTHER => write!(f, "OTHER"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Version {
    V1,
    V11,
}

impl Version {
    pub fn parse(version: &str) -> Option<Self> {
        match version {
            "HTTP/1.0" => Some(Version::V1),
            "HTTP/1.1" => Some(Version::V11),
            _ => None,
        }
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Version::V1 => write!(f, "HTTP/1.0"),
            Version::V11 => write!(f, "HTTP/1.1"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Ok,
    BadRequest,
}

impl Status {
    /// Reason phrase written after the code. The success line carries none.
    pub fn message(&self) -> Option<&'static str> {
        match self {
            Status::Ok => None,
            Status::BadRequest => Some("ERROR"),
        }
    }
}

impl Display for Status {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Status::Ok => write!(f, "200"),
            Status::BadRequest => write!(f, "400"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Header<'a> {
    pub name: Cow<'a, str>,
    pub value: Cow<'a, str>
}

impl<'a> Header<'a> {
    pub fn new<N: Into<Cow<'a, str>>, V: Into<Cow<'a, str>>>(name: N, value: V) -> Self {
        Self { name: name.into(), value: value.into() }
    }

    pub fn from<T: ToHeader>(to_header: T) -> Self {
        Self::new(T::name(), to_header.value())
    }

    pub fn construct(&self) -> String {
        format!("{}: {}", self.name, self.value)
    }
}

pub trait ToHeader {
    fn name() -> &'static str;
    fn value(&self) -> &'static str;
}

const CONTENT_TYPE_HTML: &'static str = "text/html; charset=UTF-8";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContentType {
    HTML,
}

impl ToHeader for ContentType {
    fn name() -> &'static str { "Content-Type" }
    fn value(&self) -> &'static str {
        match self {
            ContentType::HTML => CONTENT_TYPE_HTML
        }
    }
}

/// Transport failure while reading a request. Malformed input is never reported here.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("failed to read request: {0}")]
    IO(#[from] io::Error),
}

/// Why a POST body could not be turned into a chat message.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum FormError {
    #[error("form body has no '&' separator")]
    Separator,
    #[error("form body has an empty username")]
    Username,
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {address}: {source}")]
    Bind { address: String, source: io::Error },
    #[error("failed to write response: {0}")]
    IO(#[from] io::Error),
    #[error("failed to render page: {0}")]
    Template(#[from] minijinja::Error),
}
