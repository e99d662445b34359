//! Functions served by `xins-server` out of the box

use xins_core::{
    Api, ApiError, CallResultData, ComboKind, FnFunction, FunctionRequest, FunctionResult,
    FunctionSpec, ParamCombo, ParamSpec, ParamType,
};

pub fn api(name: &str) -> Result<Api, ApiError> {
    Api::new(name)
        .with_function(FnFunction::new(
            FunctionSpec::new("Echo")
                .input(ParamSpec::required("text", ParamType::Text))
                .output(ParamSpec::required("text", ParamType::Text)),
            echo,
        ))?
        .with_function(FnFunction::new(
            FunctionSpec::new("Add")
                .input(ParamSpec::required("a", ParamType::Int64))
                .input(ParamSpec::required("b", ParamType::Int64))
                .output(ParamSpec::required("sum", ParamType::Int64))
                .error_code("Overflow"),
            add,
        ))?
        .with_function(FnFunction::new(
            FunctionSpec::new("Greet")
                .input(ParamSpec::optional("name", ParamType::Text))
                .input(ParamSpec::optional("nickname", ParamType::Text))
                .combo(ParamCombo::new(ComboKind::ExclusiveOr, &["name", "nickname"]))
                .output(ParamSpec::required("greeting", ParamType::Text)),
            greet,
        ))
}

fn echo(request: &FunctionRequest) -> FunctionResult {
    CallResultData::success().with_param("text", request.parameter("text").unwrap_or_default())
}

fn add(request: &FunctionRequest) -> FunctionResult {
    let operand = |name| {
        request
            .parameter(name)
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or_default()
    };
    match operand("a").checked_add(operand("b")) {
        Some(sum) => CallResultData::success().with_param("sum", &sum.to_string()),
        None => CallResultData::error("Overflow"),
    }
}

fn greet(request: &FunctionRequest) -> FunctionResult {
    let who = request
        .parameter("name")
        .or_else(|| request.parameter("nickname"))
        .unwrap_or("stranger");
    CallResultData::success().with_param("greeting", &format!("Hello, {}!", who))
}
