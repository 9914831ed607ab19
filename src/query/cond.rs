//! Predicate trees handed to the optimizer.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::schema::{Collation, Field, TableShare};
use crate::types::{FieldId, FieldSet, Value};

/// Comparison operator.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CmpOp {
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `=`
    Eq,
    /// `<=>`, equality where NULL equals NULL.
    NullSafeEq,
    /// `>=`
    Ge,
    /// `>`
    Gt,
    /// `<>`
    Ne,
}

impl CmpOp {
    /// Operator obtained by swapping the operands.
    pub fn reversed(self) -> CmpOp {
        match self {
            CmpOp::Lt => CmpOp::Gt,
            CmpOp::Le => CmpOp::Ge,
            CmpOp::Ge => CmpOp::Le,
            CmpOp::Gt => CmpOp::Lt,
            op @ (CmpOp::Eq | CmpOp::NullSafeEq | CmpOp::Ne) => op,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Eq => "=",
            CmpOp::NullSafeEq => "<=>",
            CmpOp::Ge => ">=",
            CmpOp::Gt => ">",
            CmpOp::Ne => "<>",
        }
    }

    fn holds(self, ord: Ordering) -> bool {
        match self {
            CmpOp::Lt => ord == Ordering::Less,
            CmpOp::Le => ord != Ordering::Greater,
            CmpOp::Eq | CmpOp::NullSafeEq => ord == Ordering::Equal,
            CmpOp::Ge => ord != Ordering::Less,
            CmpOp::Gt => ord == Ordering::Greater,
            CmpOp::Ne => ord != Ordering::Equal,
        }
    }
}

/// One side of a comparison.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operand {
    /// Column of the table being optimized.
    Field(FieldId),
    /// Literal known at optimization time.
    Const(Value),
    /// Value known only while executing, such as a column of an earlier join
    /// table.
    Deferred,
}

impl Operand {
    pub fn as_field(&self) -> Option<FieldId> {
        match self {
            Operand::Field(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_const(&self) -> Option<&Value> {
        match self {
            Operand::Const(v) => Some(v),
            _ => None,
        }
    }
}

impl From<Value> for Operand {
    fn from(value: Value) -> Self {
        Operand::Const(value)
    }
}

impl From<FieldId> for Operand {
    fn from(field: FieldId) -> Self {
        Operand::Field(field)
    }
}

/// Boolean predicate over one table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Cond {
    /// Conjunction.
    And {
        /// Conjuncts.
        args: Vec<Cond>,
    },
    /// Disjunction.
    Or {
        /// Disjuncts.
        args: Vec<Cond>,
    },
    /// Constant truth value.
    Const {
        /// Value of the predicate.
        value: bool,
    },
    /// Bare column used as a boolean.
    Field {
        /// Column.
        field: FieldId,
    },
    /// Binary comparison.
    Cmp {
        /// Operator.
        cmp: CmpOp,
        /// Left operand.
        left: Operand,
        /// Right operand.
        right: Operand,
        /// Explicit comparison collation, if one was forced.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        collation: Option<Collation>,
    },
    /// `expr [NOT] BETWEEN low AND high`.
    Between {
        /// Tested expression.
        expr: Operand,
        /// Lower bound.
        low: Operand,
        /// Upper bound.
        high: Operand,
        /// `NOT BETWEEN`.
        #[serde(default)]
        negated: bool,
    },
    /// `field [NOT] IN (list)`.
    In {
        /// Tested column.
        field: FieldId,
        /// List members.
        list: Vec<Operand>,
        /// `NOT IN`.
        #[serde(default)]
        negated: bool,
    },
    /// `field LIKE pattern [ESCAPE escape]`.
    Like {
        /// Tested column.
        field: FieldId,
        /// Pattern; NULL never matches.
        pattern: Value,
        /// Escape character, `\` when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        escape: Option<char>,
    },
    /// `field IS [NOT] NULL`.
    IsNull {
        /// Tested column.
        field: FieldId,
        /// `IS NOT NULL`.
        #[serde(default)]
        negated: bool,
    },
    /// Equality class: every member equals every other and the constant.
    MultiEqual {
        /// Members of the class.
        fields: Vec<FieldId>,
        /// Constant the class is bound to.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        constant: Option<Value>,
    },
    /// Predicate the optimizer cannot analyse, referencing `fields`.
    Opaque {
        /// Referenced columns.
        #[serde(default)]
        fields: Vec<FieldId>,
    },
}

impl Cond {
    pub fn and(args: Vec<Cond>) -> Cond {
        Cond::And { args }
    }

    pub fn or(args: Vec<Cond>) -> Cond {
        Cond::Or { args }
    }

    /// `field op value`.
    pub fn cmp(field: FieldId, cmp: CmpOp, value: impl Into<Value>) -> Cond {
        Cond::Cmp {
            cmp,
            left: Operand::Field(field),
            right: Operand::Const(value.into()),
            collation: None,
        }
    }

    pub fn eq(field: FieldId, value: impl Into<Value>) -> Cond {
        Cond::cmp(field, CmpOp::Eq, value)
    }

    pub fn lt(field: FieldId, value: impl Into<Value>) -> Cond {
        Cond::cmp(field, CmpOp::Lt, value)
    }

    pub fn le(field: FieldId, value: impl Into<Value>) -> Cond {
        Cond::cmp(field, CmpOp::Le, value)
    }

    pub fn gt(field: FieldId, value: impl Into<Value>) -> Cond {
        Cond::cmp(field, CmpOp::Gt, value)
    }

    pub fn ge(field: FieldId, value: impl Into<Value>) -> Cond {
        Cond::cmp(field, CmpOp::Ge, value)
    }

    pub fn ne(field: FieldId, value: impl Into<Value>) -> Cond {
        Cond::cmp(field, CmpOp::Ne, value)
    }

    pub fn between(field: FieldId, low: impl Into<Value>, high: impl Into<Value>) -> Cond {
        Cond::Between {
            expr: Operand::Field(field),
            low: Operand::Const(low.into()),
            high: Operand::Const(high.into()),
            negated: false,
        }
    }

    pub fn not_between(field: FieldId, low: impl Into<Value>, high: impl Into<Value>) -> Cond {
        Cond::Between {
            expr: Operand::Field(field),
            low: Operand::Const(low.into()),
            high: Operand::Const(high.into()),
            negated: true,
        }
    }

    pub fn in_list<V: Into<Value>>(field: FieldId, list: impl IntoIterator<Item = V>) -> Cond {
        Cond::In {
            field,
            list: list.into_iter().map(|v| Operand::Const(v.into())).collect(),
            negated: false,
        }
    }

    pub fn not_in<V: Into<Value>>(field: FieldId, list: impl IntoIterator<Item = V>) -> Cond {
        Cond::In {
            field,
            list: list.into_iter().map(|v| Operand::Const(v.into())).collect(),
            negated: true,
        }
    }

    pub fn like(field: FieldId, pattern: impl Into<Value>) -> Cond {
        Cond::Like {
            field,
            pattern: pattern.into(),
            escape: None,
        }
    }

    pub fn is_null(field: FieldId) -> Cond {
        Cond::IsNull {
            field,
            negated: false,
        }
    }

    pub fn is_not_null(field: FieldId) -> Cond {
        Cond::IsNull {
            field,
            negated: true,
        }
    }

    /// Columns referenced anywhere in the predicate.
    pub fn fields(&self) -> FieldSet {
        let mut set = FieldSet::new();
        self.collect_fields(&mut set);
        set
    }

    fn collect_fields(&self, set: &mut FieldSet) {
        let operand = |op: &Operand, set: &mut FieldSet| {
            if let Operand::Field(f) = op {
                set.set(*f);
            }
        };
        match self {
            Cond::And { args } | Cond::Or { args } => {
                for arg in args {
                    arg.collect_fields(set);
                }
            }
            Cond::Const { .. } => {}
            Cond::Field { field }
            | Cond::Like { field, .. }
            | Cond::IsNull { field, .. } => set.set(*field),
            Cond::Cmp { left, right, .. } => {
                operand(left, set);
                operand(right, set);
            }
            Cond::Between {
                expr, low, high, ..
            } => {
                operand(expr, set);
                operand(low, set);
                operand(high, set);
            }
            Cond::In { field, list, .. } => {
                set.set(*field);
                for item in list {
                    operand(item, set);
                }
            }
            Cond::MultiEqual { fields, .. } | Cond::Opaque { fields } => {
                for f in fields {
                    set.set(*f);
                }
            }
        }
    }

    /// Evaluates the predicate on a row with SQL three-valued logic.
    ///
    /// `None` means UNKNOWN. Deferred operands and opaque predicates are
    /// UNKNOWN as well, which callers treat as "keep the row".
    pub fn eval(&self, share: &TableShare, row: &[Value]) -> Option<bool> {
        match self {
            Cond::And { args } => {
                let mut unknown = false;
                for arg in args {
                    match arg.eval(share, row) {
                        Some(false) => return Some(false),
                        None => unknown = true,
                        Some(true) => {}
                    }
                }
                if unknown {
                    None
                } else {
                    Some(true)
                }
            }
            Cond::Or { args } => {
                let mut unknown = false;
                for arg in args {
                    match arg.eval(share, row) {
                        Some(true) => return Some(true),
                        None => unknown = true,
                        Some(false) => {}
                    }
                }
                if unknown {
                    None
                } else {
                    Some(false)
                }
            }
            Cond::Const { value } => Some(*value),
            Cond::Field { field } => truthy(&row[field.0 as usize]),
            Cond::Cmp {
                cmp, left, right, ..
            } => {
                let field = left
                    .as_field()
                    .or_else(|| right.as_field())
                    .map(|f| share.field(f));
                let l = resolve(left, row)?;
                let r = resolve(right, row)?;
                if *cmp == CmpOp::NullSafeEq {
                    return Some(match (l.is_null(), r.is_null()) {
                        (true, true) => true,
                        (false, false) => compare(field, l, r)? == Ordering::Equal,
                        _ => false,
                    });
                }
                if l.is_null() || r.is_null() {
                    return None;
                }
                Some(cmp.holds(compare(field, l, r)?))
            }
            Cond::Between {
                expr,
                low,
                high,
                negated,
            } => {
                let field = [expr, low, high]
                    .into_iter()
                    .find_map(|op| op.as_field())
                    .map(|f| share.field(f));
                let v = resolve(expr, row)?;
                let lo = resolve(low, row)?;
                let hi = resolve(high, row)?;
                if v.is_null() || lo.is_null() || hi.is_null() {
                    return None;
                }
                let inside = compare(field, v, lo)? != Ordering::Less
                    && compare(field, v, hi)? != Ordering::Greater;
                Some(inside != *negated)
            }
            Cond::In {
                field,
                list,
                negated,
            } => {
                let def = share.field(*field);
                let v = &row[field.0 as usize];
                if v.is_null() {
                    return None;
                }
                let mut unknown = false;
                for item in list {
                    let item = resolve(item, row)?;
                    if item.is_null() {
                        unknown = true;
                        continue;
                    }
                    if compare(Some(def), v, item)? == Ordering::Equal {
                        return Some(!*negated);
                    }
                }
                if unknown {
                    None
                } else {
                    Some(*negated)
                }
            }
            Cond::Like {
                field,
                pattern,
                escape,
            } => {
                let def = share.field(*field);
                let v = &row[field.0 as usize];
                if v.is_null() || pattern.is_null() {
                    return None;
                }
                let fold = def.collation() == Collation::CaseInsensitive;
                let text = fold_case(v.render(), fold);
                let pat = fold_case(pattern.render(), fold);
                Some(like_match(&text, &pat, escape.unwrap_or('\\')))
            }
            Cond::IsNull { field, negated } => Some(row[field.0 as usize].is_null() != *negated),
            Cond::MultiEqual { fields, constant } => {
                let mut values = fields.iter().map(|f| (share.field(*f), &row[f.0 as usize]));
                let (first_def, first) = values.next()?;
                if first.is_null() {
                    return None;
                }
                if let Some(c) = constant {
                    if c.is_null() {
                        return None;
                    }
                    if compare(Some(first_def), first, c)? != Ordering::Equal {
                        return Some(false);
                    }
                }
                for (def, v) in values {
                    if v.is_null() {
                        return None;
                    }
                    if compare(Some(def), v, first)? != Ordering::Equal {
                        return Some(false);
                    }
                }
                Some(true)
            }
            Cond::Opaque { .. } => None,
        }
    }
}

fn resolve<'a>(op: &'a Operand, row: &'a [Value]) -> Option<&'a Value> {
    match op {
        Operand::Field(f) => Some(&row[f.0 as usize]),
        Operand::Const(v) => Some(v),
        Operand::Deferred => None,
    }
}

fn truthy(v: &Value) -> Option<bool> {
    match v {
        Value::Null => None,
        Value::Int(i) => Some(*i != 0),
        Value::UInt(u) => Some(*u != 0),
        Value::Real(f) => Some(*f != 0.0),
        Value::Str(s) => Some(s.trim().parse::<f64>().map(|f| f != 0.0).unwrap_or(false)),
        Value::Date(_) | Value::DateTime(_) => Some(true),
    }
}

fn fold_case(s: String, fold: bool) -> String {
    if fold {
        s.to_lowercase()
    } else {
        s
    }
}

/// Compares two non-NULL values in the domain of `field`.
fn compare(field: Option<&Field>, a: &Value, b: &Value) -> Option<Ordering> {
    let Some(field) = field else {
        return Some(a.cmp(b));
    };
    if field.is_string() {
        let fold = field.collation() == Collation::CaseInsensitive;
        let a = fold_case(a.render(), fold);
        let b = fold_case(b.render(), fold);
        return Some(a.cmp(&b));
    }
    let coerce = |v: &Value| match v {
        Value::Str(s) if field.cmp_type() == crate::types::ResultType::Int
            && !matches!(field.ty, crate::schema::FieldType::Integer { .. }) =>
        {
            Value::parse_temporal(s).unwrap_or_else(|| v.clone())
        }
        Value::Str(s) => s
            .trim()
            .parse::<f64>()
            .map(Value::Real)
            .unwrap_or_else(|_| v.clone()),
        _ => v.clone(),
    };
    let (a, b) = (coerce(a), coerce(b));
    if field.is_timestamp() {
        let secs = |v: &Value| match v {
            Value::Int(i) => Some(*i),
            other => crate::schema::temporal_seconds(other),
        };
        return Some(secs(&a)?.cmp(&secs(&b)?));
    }
    Some(a.cmp(&b))
}

/// SQL `LIKE` matching with `%` and `_` wildcards.
pub fn like_match(text: &str, pattern: &str, escape: char) -> bool {
    let text: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        if c == escape {
            match chars.next() {
                Some(next) => tokens.push(LikeToken::Literal(next)),
                None => tokens.push(LikeToken::Literal(c)),
            }
        } else if c == '%' {
            tokens.push(LikeToken::Many);
        } else if c == '_' {
            tokens.push(LikeToken::One);
        } else {
            tokens.push(LikeToken::Literal(c));
        }
    }
    // dp[j]: pattern[..i] matches text[..j]
    let mut dp = vec![false; text.len() + 1];
    dp[0] = true;
    for token in &tokens {
        let mut next = vec![false; text.len() + 1];
        match token {
            LikeToken::Many => {
                let mut seen = false;
                for j in 0..=text.len() {
                    seen |= dp[j];
                    next[j] = seen;
                }
            }
            LikeToken::One => {
                for j in 1..=text.len() {
                    next[j] = dp[j - 1];
                }
            }
            LikeToken::Literal(c) => {
                for j in 1..=text.len() {
                    next[j] = dp[j - 1] && text[j - 1] == *c;
                }
            }
        }
        dp = next;
    }
    dp[text.len()]
}

enum LikeToken {
    Literal(char),
    One,
    Many,
}
