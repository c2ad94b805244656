use crate::sql::{ScalarValue, SqlExpr};

/// A method call whose receiver and arguments already translated.
#[derive(Debug, Clone, PartialEq)]
pub struct TranslatedCall {
    pub method: String,
    pub object: Option<SqlExpr>,
    pub args: Vec<SqlExpr>,
}

/// Provider extension point: turn a host method call into SQL, or decline.
pub trait MethodCallTranslator {
    fn translate(&self, call: &TranslatedCall) -> Option<SqlExpr>;
}

/// Provider extension point for instance members without a column mapping.
pub trait MemberTranslator {
    fn translate(&self, object: &SqlExpr, member: &str) -> Option<SqlExpr>;
}

/// Baseline translations every provider gets: the common string and math
/// functions, rendered as portable SQL function calls.
#[derive(Debug, Default)]
pub struct DefaultMethodCallTranslator;

impl MethodCallTranslator for DefaultMethodCallTranslator {
    fn translate(&self, call: &TranslatedCall) -> Option<SqlExpr> {
        let unary = |name: &str, arg: SqlExpr| SqlExpr::Function { name: name.into(), args: vec![arg] };
        match (call.method.as_str(), call.object.as_ref(), call.args.as_slice()) {
            ("to_upper", Some(obj), []) => Some(unary("UPPER", obj.clone())),
            ("to_lower", Some(obj), []) => Some(unary("LOWER", obj.clone())),
            ("trim", Some(obj), []) => Some(unary("TRIM", obj.clone())),
            ("len" | "length", Some(obj), []) => Some(unary("LENGTH", obj.clone())),
            ("abs", None, [arg]) => Some(unary("ABS", arg.clone())),
            ("abs", Some(obj), []) => Some(unary("ABS", obj.clone())),
            ("starts_with", Some(obj), [SqlExpr::Literal(ScalarValue::String(prefix))]) => {
                // wildcard characters in the prefix would change meaning
                if prefix.contains('%') || prefix.contains('_') {
                    return None;
                }
                Some(SqlExpr::Like {
                    expr: Box::new(obj.clone()),
                    pattern: Box::new(SqlExpr::Literal(ScalarValue::String(format!("{}%", prefix)))),
                })
            }
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
pub struct DefaultMemberTranslator;

impl MemberTranslator for DefaultMemberTranslator {
    fn translate(&self, object: &SqlExpr, member: &str) -> Option<SqlExpr> {
        match member {
            "Length" => Some(SqlExpr::Function { name: "LENGTH".into(), args: vec![object.clone()] }),
            _ => None,
        }
    }
}
