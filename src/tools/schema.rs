//! 工具参数 Schema：schemars 生成 + 派发前运行时校验
//!
//! 内置工具用 schemars 从参数结构体派生 Schema；validate_args 在派发前按
//! type / required / 属性类型校验实参，不合法的调用不会触碰工具代码。

use schemars::{schema_for, JsonSchema};
use serde_json::Value;

/// 从参数结构体派生 JSON Schema（内置工具的 parameters_schema 实现）
pub fn schema_value<T: JsonSchema>() -> Value {
    let schema = schema_for!(T);
    serde_json::to_value(schema).unwrap_or_else(|_| serde_json::json!({"type": "object"}))
}

/// 按 Schema 校验实参；返回首个违例的描述
///
/// 支持子集：顶层 type=object、required 列表、properties 内的 type 检查。
/// 未声明的额外属性放行（远程工具的 Schema 往往不完整）。
pub fn validate_args(schema: &Value, args: &Value) -> Result<(), String> {
    let Some(schema_obj) = schema.as_object() else {
        return Ok(());
    };

    if schema_obj.get("type").and_then(Value::as_str) == Some("object") && !args.is_object() {
        return Err(format!("arguments must be a JSON object, got: {args}"));
    }
    let empty = serde_json::Map::new();
    let args_obj = args.as_object().unwrap_or(&empty);

    if let Some(required) = schema_obj.get("required").and_then(Value::as_array) {
        for key in required.iter().filter_map(Value::as_str) {
            if !args_obj.contains_key(key) {
                return Err(format!("missing required argument '{key}'"));
            }
        }
    }

    if let Some(props) = schema_obj.get("properties").and_then(Value::as_object) {
        for (key, prop_schema) in props {
            let Some(value) = args_obj.get(key) else {
                continue;
            };
            let Some(expected) = prop_schema.get("type").and_then(Value::as_str) else {
                continue;
            };
            if !type_matches(expected, value) {
                return Err(format!(
                    "argument '{key}' should be of type {expected}, got: {value}"
                ));
            }
        }
    }

    Ok(())
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "boolean" => value.is_boolean(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bash_schema() -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": { "type": "string" },
                "timeout_secs": { "type": "integer" }
            },
            "required": ["command"]
        })
    }

    #[test]
    fn test_valid_args_pass() {
        let args = serde_json::json!({"command": "ls", "timeout_secs": 5});
        assert!(validate_args(&bash_schema(), &args).is_ok());
    }

    #[test]
    fn test_missing_required_rejected() {
        let args = serde_json::json!({"timeout_secs": 5});
        let err = validate_args(&bash_schema(), &args).unwrap_err();
        assert!(err.contains("command"));
    }

    #[test]
    fn test_wrong_type_rejected() {
        let args = serde_json::json!({"command": 42});
        let err = validate_args(&bash_schema(), &args).unwrap_err();
        assert!(err.contains("string"));
    }

    #[test]
    fn test_non_object_args_rejected() {
        let err = validate_args(&bash_schema(), &serde_json::json!("ls")).unwrap_err();
        assert!(err.contains("object"));
    }

    #[test]
    fn test_extra_properties_allowed() {
        let args = serde_json::json!({"command": "ls", "verbose": true});
        assert!(validate_args(&bash_schema(), &args).is_ok());
    }

    #[test]
    fn test_derived_schema_has_required_fields() {
        #[derive(JsonSchema)]
        #[allow(dead_code)]
        struct Params {
            path: String,
            content: String,
        }
        let schema = schema_value::<Params>();
        let required = schema["required"].as_array().unwrap();
        assert!(required.iter().any(|v| v == "path"));
        assert!(required.iter().any(|v| v == "content"));
    }
}
