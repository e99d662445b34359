//! XINS: remote function calls over HTTP
//!
//! A server exposes an [`Api`] of named functions. Each HTTP request is
//! handled by one of the calling conventions (`_xins-std`, `_xins-xml`,
//! `_xins-json`), which turns it into a [`FunctionRequest`] and writes the
//! [`FunctionResult`] back in its own wire format. The [`client`] module
//! calls such servers and classifies their results.

pub mod api;
pub mod client;
pub mod convention;
pub mod element;
pub mod engine;
pub mod function;
pub mod http;
pub mod request;
pub mod result;
pub mod result_outputter;
pub mod result_parser;
pub mod server;

pub use api::{Api, ApiError, FnFunction, Function};
pub use convention::{CallingConvention, ConventionError, ConventionManager};
pub use element::{Element, ElementBuilder, ElementError};
pub use engine::Engine;
pub use function::{ComboKind, FunctionSpec, ParamCombo, ParamSpec, ParamType};
pub use http::{HttpRequest, HttpResponse};
pub use request::{CallConfig, FunctionRequest, HttpMethod, RequestError};
pub use result::{CallResultData, FunctionResult, Parameters};
pub use result_outputter::{result_to_bytes, write_result};
pub use result_parser::{ParseError, parse_result};
pub use server::{ServerLimits, run_server, serve};
