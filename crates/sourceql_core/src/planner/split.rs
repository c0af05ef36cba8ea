use crate::ast::{BinaryOperator, Node, NodeRef};

/// Recursively split an expression on AND, putting the split expressions in
/// `out`.
pub fn split_conjunction(expr: &NodeRef, out: &mut Vec<NodeRef>) {
    match expr.as_ref() {
        Node::Binary(binary) if binary.op == BinaryOperator::And => {
            split_conjunction(&binary.left, out);
            split_conjunction(&binary.right, out);
        }
        _ => out.push(expr.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{and, eq, field, gt, lit, or};

    #[test]
    fn split_conjunction_none() {
        let expr = lit(4);
        let mut out = Vec::new();
        split_conjunction(&expr, &mut out);
        assert_eq!(vec![expr], out);
    }

    #[test]
    fn split_conjunction_nested_and() {
        let a = gt(field("a"), lit(1));
        let b = eq(field("b"), lit("x"));
        let c = or(field("c"), field("d"));
        let expr = and(a.clone(), and(b.clone(), c.clone()));

        let mut out = Vec::new();
        split_conjunction(&expr, &mut out);
        assert_eq!(vec![a, b, c], out);
    }
}
