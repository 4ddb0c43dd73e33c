//! HTTP API adapter.

pub mod evaluation_http;

pub use evaluation_http::{
    ErrorResponse, EvaluationHttpServer, HttpConfig, JobResponse, API_KEY_HEADER, USER_HEADER,
};
