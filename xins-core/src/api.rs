//! Function registry and invocation
//!
//! An [`Api`] owns the functions it exposes. Invoking a function checks the
//! input against its [`FunctionSpec`], runs it with panics contained, and
//! checks successful output before the result leaves the registry.

use crate::element::{Element, ElementBuilder, ElementError};
use crate::function::FunctionSpec;
use crate::request::{FunctionRequest, RequestError, validate_function_name};
use crate::result::{
    CallResultData, ERR_DISABLED_FUNCTION, ERR_INTERNAL_ERROR, ERR_INVALID_REQUEST,
    ERR_INVALID_RESPONSE, FunctionResult,
};
use dashmap::DashSet;
use std::any::Any;
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Instant;
use tracing::{debug, error, warn};

pub const NO_OP: &str = "_NoOp";
pub const GET_VERSION: &str = "_GetVersion";
pub const GET_FUNCTION_LIST: &str = "_GetFunctionList";

/// Output parameter carrying the panic message of a failed function.
pub const EXCEPTION_MESSAGE_PARAMETER: &str = "_exception.message";

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("no such function \"{0}\"")]
    NoSuchFunction(String),
    #[error("function \"{0}\" is already registered")]
    DuplicateFunction(String),
    #[error(transparent)]
    InvalidName(#[from] RequestError),
}

/// A function an API exposes.
pub trait Function: Send + Sync {
    fn spec(&self) -> &FunctionSpec;

    fn call(&self, request: &FunctionRequest) -> FunctionResult;
}

/// A [`Function`] backed by a closure.
pub struct FnFunction<F> {
    spec: FunctionSpec,
    implementation: F,
}

impl<F> FnFunction<F>
where
    F: Fn(&FunctionRequest) -> FunctionResult + Send + Sync,
{
    pub fn new(spec: FunctionSpec, implementation: F) -> Self {
        Self {
            spec,
            implementation,
        }
    }
}

impl<F> Function for FnFunction<F>
where
    F: Fn(&FunctionRequest) -> FunctionResult + Send + Sync,
{
    fn spec(&self) -> &FunctionSpec {
        &self.spec
    }

    fn call(&self, request: &FunctionRequest) -> FunctionResult {
        (self.implementation)(request)
    }
}

pub struct Api {
    name: String,
    functions: HashMap<String, Box<dyn Function>>,
    disabled: DashSet<String>,
}

impl Api {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            functions: HashMap::new(),
            disabled: DashSet::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Adds a function under the name its spec declares.
    pub fn register(&mut self, function: impl Function + 'static) -> Result<(), ApiError> {
        let name = function.spec().name().to_string();
        validate_function_name(&name)?;
        if is_meta_function(&name) || self.functions.contains_key(&name) {
            return Err(ApiError::DuplicateFunction(name));
        }
        debug!("Registered function {} in API {}", name, self.name);
        self.functions.insert(name, Box::new(function));
        Ok(())
    }

    pub fn with_function(mut self, function: impl Function + 'static) -> Result<Self, ApiError> {
        self.register(function)?;
        Ok(self)
    }

    pub fn spec(&self, name: &str) -> Option<&FunctionSpec> {
        self.functions.get(name).map(|f| f.spec())
    }

    /// Registered function names, sorted.
    pub fn function_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn disable(&self, name: &str) -> Result<(), ApiError> {
        self.ensure_exists(name)?;
        self.disabled.insert(name.to_string());
        debug!("Disabled function {}", name);
        Ok(())
    }

    pub fn enable(&self, name: &str) -> Result<(), ApiError> {
        self.ensure_exists(name)?;
        self.disabled.remove(name);
        debug!("Enabled function {}", name);
        Ok(())
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.functions.contains_key(name) && !self.disabled.contains(name)
    }

    fn ensure_exists(&self, name: &str) -> Result<(), ApiError> {
        if self.functions.contains_key(name) {
            Ok(())
        } else {
            Err(ApiError::NoSuchFunction(name.to_string()))
        }
    }

    /// Runs the requested function.
    ///
    /// Only an unknown name is an error; every other failure is reported as
    /// a result carrying one of the standard error codes.
    pub fn invoke(&self, request: &FunctionRequest) -> Result<FunctionResult, ApiError> {
        let name = request.function_name();
        if is_meta_function(name) {
            return Ok(self.invoke_meta(name));
        }

        let function = self
            .functions
            .get(name)
            .ok_or_else(|| ApiError::NoSuchFunction(name.to_string()))?;
        if self.disabled.contains(name) {
            return Ok(CallResultData::error(ERR_DISABLED_FUNCTION));
        }

        let spec = function.spec();
        match spec.validate_input(request.parameters()) {
            Ok(None) => {}
            Ok(Some(violations)) => {
                debug!("Invalid input for function {}", name);
                return Ok(CallResultData::error(ERR_INVALID_REQUEST).with_data(violations));
            }
            Err(e) => return Ok(internal_error(name, &e.to_string())),
        }

        let start = Instant::now();
        let result = match catch_unwind(AssertUnwindSafe(|| function.call(request))) {
            Ok(result) => result,
            Err(payload) => return Ok(internal_error(name, &panic_message(payload.as_ref()))),
        };
        debug!(
            "Function {} finished in {:?} with {}",
            name,
            start.elapsed(),
            result.error_code().unwrap_or("success")
        );

        match result.error_code() {
            None => match spec.validate_output(result.parameters()) {
                Ok(None) => Ok(result),
                Ok(Some(violations)) => {
                    warn!("Function {} returned invalid output", name);
                    Ok(CallResultData::error(ERR_INVALID_RESPONSE).with_data(violations))
                }
                Err(e) => Ok(internal_error(name, &e.to_string())),
            },
            Some(code) => {
                if !spec.accepts_error_code(code) {
                    warn!("Function {} returned undeclared error code {}", name, code);
                }
                Ok(result)
            }
        }
    }

    fn invoke_meta(&self, name: &str) -> FunctionResult {
        match name {
            GET_VERSION => CallResultData::success()
                .with_param("xins.version", env!("CARGO_PKG_VERSION"))
                .with_param("api.name", &self.name),
            GET_FUNCTION_LIST => match self.function_list() {
                Ok(list) => CallResultData::success().with_data(list),
                Err(e) => internal_error(name, &e.to_string()),
            },
            _ => CallResultData::success(),
        }
    }

    fn function_list(&self) -> Result<Element, ElementError> {
        let mut data = Element::new("data")?;
        for name in self.function_names() {
            let enabled = if self.disabled.contains(name) { "false" } else { "true" };
            data.add_child(
                ElementBuilder::new("function")?
                    .attribute("name", name)
                    .attribute("enabled", enabled)
                    .build(),
            );
        }
        Ok(data)
    }
}

impl std::fmt::Debug for Api {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Api")
            .field("name", &self.name)
            .field("functions", &self.function_names())
            .finish()
    }
}

pub fn is_meta_function(name: &str) -> bool {
    matches!(name, NO_OP | GET_VERSION | GET_FUNCTION_LIST)
}

fn internal_error(function: &str, message: &str) -> FunctionResult {
    error!("Function {} failed: {}", function, message);
    CallResultData::error(ERR_INTERNAL_ERROR).with_param(EXCEPTION_MESSAGE_PARAMETER, message)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "function panicked".to_string()
    }
}
