use std::borrow::Cow;
use std::fmt;
use std::net::SocketAddr;

/// Method prefix stripped from the request line.
const METHOD_PREFIX: &str = "GET /";

/// Start of the protocol version suffix.
const PROTOCOL_SUFFIX: &str = " HTTP";

/// Extracts the route path from a raw request line.
///
/// Every `GET /` is removed, then everything from the first ` HTTP`
/// onward, then any trailing line terminator. Nothing is validated: a
/// line that does not look like a request passes through partially
/// transformed and simply fails to route.
///
/// ```
/// # use lineserve::extract_path;
/// assert_eq!(extract_path("GET /users/alice HTTP/1.1\r\n"), "users/alice");
/// assert_eq!(extract_path("GET / HTTP/1.1\r\n"), "");
/// ```
pub fn extract_path(line: &str) -> String {
    let mut path = line.replace(METHOD_PREFIX, "");
    if let Some(at) = path.find(PROTOCOL_SUFFIX) {
        path.truncate(at);
    }
    let trimmed = path.trim_end_matches(['\r', '\n']).len();
    path.truncate(trimmed);
    path
}

/// The single line read from a connection, with its extracted path.
#[derive(Debug, Clone)]
pub struct Request {
    line: String,
    path: String,
    peer: Option<SocketAddr>,
}

impl Request {
    pub fn new(line: impl Into<String>, peer: Option<SocketAddr>) -> Self {
        let line = line.into();
        let path = extract_path(&line);
        Self { line, path, peer }
    }

    /// The request line exactly as received, terminator included.
    pub fn line(&self) -> &str {
        &self.line
    }

    /// The route path, without the leading `/`.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }
}

/// Append-only buffer a handler writes the response body into.
///
/// Text and raw bytes can be mixed; the body goes out exactly as written.
/// Also implements [`fmt::Write`], so `write!` works on it.
#[derive(Debug, Default, Clone)]
pub struct Response {
    buffer: Vec<u8>,
}

impl Response {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `text` to the body.
    pub fn write(&mut self, text: impl AsRef<str>) {
        self.buffer.extend_from_slice(text.as_ref().as_bytes());
    }

    /// Appends raw bytes, e.g. the contents of a binary file.
    pub fn write_bytes(&mut self, bytes: impl AsRef<[u8]>) {
        self.buffer.extend_from_slice(bytes.as_ref());
    }

    /// The body accumulated so far, as text. Invalid UTF-8 is replaced.
    pub fn render(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.buffer)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_body(self) -> Vec<u8> {
        self.buffer
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

impl fmt::Write for Response {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.write(s);
        Ok(())
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// The three statuses the server answers with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    NotFound,
    ServerError,
}

impl Status {
    pub fn code(self) -> u16 {
        match self {
            Status::Ok => 200,
            Status::NotFound => 404,
            Status::ServerError => 500,
        }
    }

    pub fn reason(self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::NotFound => "NOT FOUND",
            Status::ServerError => "SERVER ERROR",
        }
    }

    /// Fixed body sent with this status, if any. Successful responses carry
    /// the handler's buffer instead.
    pub fn canned_body(self) -> Option<&'static str> {
        match self {
            Status::Ok => None,
            Status::NotFound => Some("404 - Not Found"),
            Status::ServerError => Some("500 - Server Error"),
        }
    }

    /// Status line and headers, up to and including the blank line.
    pub fn head(self) -> String {
        format!(
            "HTTP/1.1 {}/{}\r\nContent-type:text/html\r\n\r\n",
            self.code(),
            self.reason()
        )
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code(), self.reason())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt::Write as _;

    /// Tests extraction from a well-formed request line.
    #[test]
    fn test_extract_path() {
        assert_eq!(
            extract_path("GET /users/alice/books/42 HTTP/1.1\r\n"),
            "users/alice/books/42"
        );
        assert_eq!(extract_path("GET /index.html?x=1 HTTP/1.0\n"), "index.html?x=1");
        assert_eq!(extract_path("GET / HTTP/1.1\r\n"), "");
    }

    /// Tests that malformed lines pass through partially transformed.
    #[test]
    fn test_extract_path_malformed() {
        assert_eq!(extract_path("POST /login HTTP/1.1\r\n"), "POST /login");
        assert_eq!(extract_path("GET /no-version\r\n"), "no-version");
        assert_eq!(extract_path("garbage"), "garbage");
        assert_eq!(extract_path(""), "");
    }

    /// Tests that the request keeps its raw line and peer.
    #[test]
    fn test_request() {
        let peer: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        let request = Request::new("GET /a HTTP/1.1\r\n", Some(peer));

        assert_eq!(request.line(), "GET /a HTTP/1.1\r\n");
        assert_eq!(request.path(), "a");
        assert_eq!(request.peer_addr(), Some(peer));
    }

    /// Tests that writes accumulate in order.
    #[test]
    fn test_response_buffer() {
        let mut response = Response::new();
        assert!(response.is_empty());

        response.write("<p>");
        write!(response, "{} wrote {}", "alice", 42).unwrap();
        response.write(String::from("</p>"));

        assert_eq!(response.render(), "<p>alice wrote 42</p>");
        assert_eq!(response.to_string(), "<p>alice wrote 42</p>");
        assert_eq!(response.into_body(), b"<p>alice wrote 42</p>");
    }

    /// Tests that raw bytes pass through untouched.
    #[test]
    fn test_response_bytes() {
        let mut response = Response::new();
        response.write_bytes([0x89, b'P', b'N', b'G', 0xff]);
        response.write("!");

        assert_eq!(response.as_bytes(), [0x89, b'P', b'N', b'G', 0xff, b'!']);
        assert_eq!(response.render(), "\u{fffd}PNG\u{fffd}!");
    }

    /// Tests the wire form of each status.
    #[test]
    fn test_status_head() {
        assert_eq!(Status::Ok.head(), "HTTP/1.1 200/OK\r\nContent-type:text/html\r\n\r\n");
        assert_eq!(
            Status::NotFound.head(),
            "HTTP/1.1 404/NOT FOUND\r\nContent-type:text/html\r\n\r\n"
        );
        assert_eq!(Status::ServerError.canned_body(), Some("500 - Server Error"));
        assert_eq!(Status::Ok.canned_body(), None);
        assert_eq!(Status::NotFound.to_string(), "404 NOT FOUND");
    }
}
