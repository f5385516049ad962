//! HTTP status codes registered with IANA.
//!
//! See <https://www.iana.org/assignments/http-status-codes/http-status-codes.xhtml>.

use std::fmt;

macro_rules! status_codes {
    ($($variant:ident = $code:literal => $reason:literal,)+) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u16)]
        pub enum StatusCode {
            Unknown = 0,
            $($variant = $code,)+
        }

        impl StatusCode {
            /// Every registered status, in numeric order.
            pub const ALL: &'static [StatusCode] = &[$(StatusCode::$variant,)+];

            pub fn from_u16(code: u16) -> StatusCode {
                match code {
                    $($code => StatusCode::$variant,)+
                    _ => StatusCode::Unknown,
                }
            }

            pub fn reason_phrase(self) -> &'static str {
                match self {
                    StatusCode::Unknown => "Unknown",
                    $(StatusCode::$variant => $reason,)+
                }
            }
        }
    };
}

status_codes! {
    Continue = 100 => "Continue",
    SwitchingProtocols = 101 => "Switching Protocols",
    Processing = 102 => "Processing",
    EarlyHints = 103 => "Early Hints",

    Ok = 200 => "OK",
    Created = 201 => "Created",
    Accepted = 202 => "Accepted",
    NonAuthoritativeInformation = 203 => "Non-Authoritative Information",
    NoContent = 204 => "No Content",
    ResetContent = 205 => "Reset Content",
    PartialContent = 206 => "Partial Content",
    MultiStatus = 207 => "Multi-Status",
    AlreadyReported = 208 => "Already Reported",
    ImUsed = 226 => "IM Used",

    MultipleChoices = 300 => "Multiple Choices",
    MovedPermanently = 301 => "Moved Permanently",
    Found = 302 => "Found",
    SeeOther = 303 => "See Other",
    NotModified = 304 => "Not Modified",
    UseProxy = 305 => "Use Proxy",
    SwitchProxy = 306 => "Switch Proxy",
    TemporaryRedirect = 307 => "Temporary Redirect",
    PermanentRedirect = 308 => "Permanent Redirect",

    BadRequest = 400 => "Bad Request",
    Unauthorized = 401 => "Unauthorized",
    PaymentRequired = 402 => "Payment Required",
    Forbidden = 403 => "Forbidden",
    NotFound = 404 => "Not Found",
    MethodNotAllowed = 405 => "Method Not Allowed",
    NotAcceptable = 406 => "Not Acceptable",
    ProxyAuthenticationRequired = 407 => "Proxy Authentication Required",
    RequestTimeout = 408 => "Request Timeout",
    Conflict = 409 => "Conflict",
    Gone = 410 => "Gone",
    LengthRequired = 411 => "Length Required",
    PreconditionFailed = 412 => "Precondition Failed",
    PayloadTooLarge = 413 => "Payload Too Large",
    UriTooLong = 414 => "URI Too Long",
    UnsupportedMediaType = 415 => "Unsupported Media Type",
    RangeNotSatisfiable = 416 => "Range Not Satisfiable",
    ExpectationFailed = 417 => "Expectation Failed",
    ImATeapot = 418 => "I'm a teapot",
    MisdirectedRequest = 421 => "Misdirected Request",
    UnprocessableEntity = 422 => "Unprocessable Entity",
    Locked = 423 => "Locked",
    FailedDependency = 424 => "Failed Dependency",
    TooEarly = 425 => "Too Early",
    UpgradeRequired = 426 => "Upgrade Required",
    PreconditionRequired = 428 => "Precondition Required",
    TooManyRequests = 429 => "Too Many Requests",
    RequestHeaderFieldsTooLarge = 431 => "Request Header Fields Too Large",
    UnavailableForLegalReasons = 451 => "Unavailable For Legal Reasons",

    InternalServerError = 500 => "Internal Server Error",
    NotImplemented = 501 => "Not Implemented",
    BadGateway = 502 => "Bad Gateway",
    ServiceUnavailable = 503 => "Service Unavailable",
    GatewayTimeout = 504 => "Gateway Timeout",
    HttpVersionNotSupported = 505 => "HTTP Version Not Supported",
    VariantAlsoNegotiates = 506 => "Variant Also Negotiates",
    InsufficientStorage = 507 => "Insufficient Storage",
    LoopDetected = 508 => "Loop Detected",
    NotExtended = 510 => "Not Extended",
    NetworkAuthenticationRequired = 511 => "Network Authentication Required",
}

impl StatusCode {
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    pub fn is_informational(self) -> bool {
        (100..200).contains(&self.as_u16())
    }

    pub fn is_success(self) -> bool {
        (200..300).contains(&self.as_u16())
    }

    pub fn is_redirection(self) -> bool {
        (300..400).contains(&self.as_u16())
    }

    pub fn is_client_error(self) -> bool {
        (400..500).contains(&self.as_u16())
    }

    pub fn is_server_error(self) -> bool {
        (500..600).contains(&self.as_u16())
    }

    /// Statuses that never carry a message body.
    pub fn forbids_body(self) -> bool {
        self.is_informational()
            || matches!(self, StatusCode::NoContent | StatusCode::NotModified)
    }
}

impl Default for StatusCode {
    fn default() -> Self {
        StatusCode::Unknown
    }
}

impl From<StatusCode> for u16 {
    fn from(status: StatusCode) -> u16 {
        status.as_u16()
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.as_u16(), self.reason_phrase())
    }
}
