use crate::query_model::Expr;
use crate::sql::BinaryOp;

/// Detects the null-check guard the front end emits for optional
/// navigations and collapses it to the guarded access:
///
///   `x != null ? x.Member : null`  =>  `x.Member`
///   `x == null ? null : x.Member`  =>  `x.Member`
///
/// SQL three-valued logic already yields NULL when `x` is NULL, so the
/// guard is redundant. The guarded branch may be wrapped in a cast. When
/// the guarded branch is itself an equality the rewrite is unsound (the
/// comparison would turn NULL into UNKNOWN instead of false), so the shape
/// is left alone.
pub fn try_remove_null_check(expr: &Expr) -> Option<Expr> {
    let Expr::Conditional { test, if_true, if_false } = expr else {
        return None;
    };
    let (guarded_object, accessed) = match &**test {
        Expr::Binary { op: BinaryOp::NotEq, left, right } if right.is_null_literal() => {
            if !if_false.is_null_literal() {
                return None;
            }
            (left, if_true)
        }
        Expr::Binary { op: BinaryOp::Eq, left, right } if right.is_null_literal() => {
            if !if_true.is_null_literal() {
                return None;
            }
            (left, if_false)
        }
        _ => return None,
    };
    member_access_on(accessed, guarded_object).cloned()
}

/// The accessed expression must be a member chain rooted at the guarded
/// object, possibly behind a cast.
fn member_access_on<'a>(accessed: &'a Expr, object: &Expr) -> Option<&'a Expr> {
    match accessed {
        Expr::Cast { expr, .. } => member_access_on(expr, object).map(|_| accessed),
        Expr::Property { object: inner, .. } => {
            if roots_at(inner, object) { Some(accessed) } else { None }
        }
        _ => None,
    }
}

fn roots_at(expr: &Expr, object: &Expr) -> bool {
    if expr == object {
        return true;
    }
    match expr {
        Expr::Property { object: inner, .. } => roots_at(inner, object),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query_model::QuerySource;
    use crate::sql::ScalarKind;

    fn guarded_member() -> (Expr, Expr) {
        let p = QuerySource::entity("p", "Product");
        let member = Expr::property(Expr::source(&p), "Name");
        let test = Expr::not_eq(Expr::source(&p), Expr::null());
        (member.clone(), Expr::Conditional {
            test: Box::new(test),
            if_true: Box::new(member),
            if_false: Box::new(Expr::null()),
        })
    }

    #[test]
    fn removes_not_null_guard() {
        let (member, conditional) = guarded_member();
        assert_eq!(try_remove_null_check(&conditional), Some(member));
    }

    #[test]
    fn removes_inverted_guard() {
        let p = QuerySource::entity("p", "Product");
        let member = Expr::property(Expr::source(&p), "Name");
        let conditional = Expr::Conditional {
            test: Box::new(Expr::eq(Expr::source(&p), Expr::null())),
            if_true: Box::new(Expr::null()),
            if_false: Box::new(member.clone()),
        };
        assert_eq!(try_remove_null_check(&conditional), Some(member));
    }

    #[test]
    fn cast_wrapped_member_is_accepted() {
        let p = QuerySource::entity("p", "Product");
        let member = Expr::Cast {
            expr: Box::new(Expr::property(Expr::source(&p), "Price")),
            kind: ScalarKind::Float,
        };
        let conditional = Expr::Conditional {
            test: Box::new(Expr::not_eq(Expr::source(&p), Expr::null())),
            if_true: Box::new(member.clone()),
            if_false: Box::new(Expr::null()),
        };
        assert_eq!(try_remove_null_check(&conditional), Some(member));
    }

    #[test]
    fn equality_in_guarded_branch_blocks_removal() {
        let p = QuerySource::entity("p", "Product");
        let comparison = Expr::eq(
            Expr::property(Expr::source(&p), "Name"),
            Expr::lit(crate::sql::ScalarValue::String("x".into())),
        );
        let conditional = Expr::Conditional {
            test: Box::new(Expr::not_eq(Expr::source(&p), Expr::null())),
            if_true: Box::new(comparison),
            if_false: Box::new(Expr::null()),
        };
        assert_eq!(try_remove_null_check(&conditional), None);
    }

    #[test]
    fn unrelated_member_blocks_removal() {
        let p = QuerySource::entity("p", "Product");
        let q = QuerySource::entity("q", "Order");
        let conditional = Expr::Conditional {
            test: Box::new(Expr::not_eq(Expr::source(&p), Expr::null())),
            if_true: Box::new(Expr::property(Expr::source(&q), "Total")),
            if_false: Box::new(Expr::null()),
        };
        assert_eq!(try_remove_null_check(&conditional), None);
    }
}
