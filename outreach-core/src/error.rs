use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Reddit API error: {0}")]
    RedditApi(#[from] RedditApiError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Captcha error: {0}")]
    Captcha(#[from] CaptchaError),

    #[error("Session store error: {0}")]
    Session(#[from] SessionError),

    #[error("Message error: {0}")]
    Message(#[from] MessageError),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Operation cancelled")]
    Cancelled,
}

#[derive(Error, Debug, Clone)]
pub enum RedditApiError {
    #[error("Authentication failed: {reason}")]
    AuthenticationFailed { reason: String },

    #[error("Login page unavailable: HTTP {status_code}")]
    LoginPageUnavailable { status_code: u16 },

    #[error("Rate limit exceeded. Retry after {retry_after} seconds")]
    RateLimitExceeded { retry_after: u64 },

    #[error("Forbidden access to resource: {resource}")]
    Forbidden { resource: String },

    #[error("Community not found: {community}")]
    CommunityNotFound { community: String },

    #[error("Post not found: {post_id}")]
    PostNotFound { post_id: String },

    #[error("Request timeout")]
    RequestTimeout,

    #[error("Invalid API response: {details}")]
    InvalidResponse { details: String },

    #[error("Unexpected HTTP {status_code} from {endpoint}")]
    UnexpectedStatus { status_code: u16, endpoint: String },

    #[error("Server error: {status_code}")]
    ServerError { status_code: u16 },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("Invalid configuration format: {details}")]
    InvalidFormat { details: String },

    #[error("Invalid value for {field}: {value}")]
    InvalidValue { field: String, value: String },

    #[error("Invalid proxy {proxy}: {reason}")]
    InvalidProxy { proxy: String, reason: String },

    #[error("SOCKS5 proxy {proxy} requested but SOCKS support is not compiled in (enable the `socks` feature)")]
    SocksUnsupported { proxy: String },

    #[error("Encryption key invalid or missing")]
    InvalidEncryptionKey,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CaptchaError {
    #[error("Captcha solving disabled: no API key configured")]
    Disabled,

    #[error("Captcha task creation failed: {reason}")]
    TaskCreationFailed { reason: String },

    #[error("Captcha task {task_id} failed: {reason}")]
    TaskFailed { task_id: String, reason: String },

    #[error("Captcha task {task_id} not ready after {attempts} polls")]
    PollExhausted { task_id: String, attempts: u32 },

    #[error("Captcha solution for task {task_id} carried no token")]
    EmptySolution { task_id: String },

    #[error("Captcha solving cancelled")]
    Cancelled,

    #[error("Captcha service request failed: {reason}")]
    Transport { reason: String },
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Failed to write session state to {path}: {source}")]
    WriteFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode session state: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MessageError {
    #[error("Message too long: {length} characters, max {max}")]
    TooLong { length: usize, max: usize },

    #[error("Missing idempotency key")]
    MissingIdempotencyKey,
}
