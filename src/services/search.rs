use sea_orm::sea_query::{Expr, Func, IntoColumnRef, LikeExpr, SimpleExpr};

const ESCAPE: char = '\\';

/// Case-insensitive substring match of `column` against `search`.
///
/// `%`, `_` and the escape character in `search` match literally.
pub(crate) fn lower_like<T>(column: T, search: &str) -> SimpleExpr
where
    T: IntoColumnRef,
{
    let pattern = LikeExpr::new(contains_pattern(search)).escape(ESCAPE);
    Expr::expr(Func::lower(Expr::col(column))).like(pattern)
}

fn contains_pattern(search: &str) -> String {
    let mut pattern = String::with_capacity(search.len() + 2);
    pattern.push('%');
    for c in search.to_lowercase().chars() {
        if matches!(c, '%' | '_' | ESCAPE) {
            pattern.push(ESCAPE);
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}
