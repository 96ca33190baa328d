//! Grouping and aggregate computation for STATS queries.

use super::eval::order_values;
use super::schema::Schema;
use super::types::{AggregateFn, ComputeSpec, FieldRef};
use crate::store::{lookup, Row};
use indexmap::IndexMap;
use rustc_hash::FxBuildHasher;
use serde_json::Value;
use std::cmp::Ordering;

/// Partition `rows` by `group_by` and compute every spec per group.
///
/// Null and missing group values share one bucket. Groups are emitted in
/// first-seen order. With no grouping the whole input is one group, even
/// when it is empty.
pub fn aggregate(rows: &[Row], group_by: &[FieldRef], compute: &[ComputeSpec], input: &Schema) -> Vec<Row> {
    let mut groups: IndexMap<String, (Vec<Value>, Vec<&Row>), FxBuildHasher> = IndexMap::default();
    if group_by.is_empty() {
        groups.insert(String::new(), (Vec::new(), Vec::new()));
    }

    for row in rows {
        let key: Vec<Value> = group_by
            .iter()
            .map(|field| lookup(row, field).cloned().unwrap_or(Value::Null))
            .collect();
        let hashed = if group_by.is_empty() {
            String::new()
        } else {
            serde_json::to_string(&key).unwrap_or_default()
        };
        groups
            .entry(hashed)
            .or_insert_with(|| (key, Vec::new()))
            .1
            .push(row);
    }

    groups
        .into_values()
        .map(|(key, members)| {
            let mut out = Row::new();
            for (field, value) in group_by.iter().zip(key) {
                out.insert(field.column(), value);
            }
            for spec in compute {
                out.insert(spec.name.clone(), compute_one(spec, &members, input));
            }
            out
        })
        .collect()
}

fn compute_one(spec: &ComputeSpec, members: &[&Row], input: &Schema) -> Value {
    let Some(field) = &spec.field else {
        return Value::from(members.len() as i64);
    };
    let values: Vec<&Value> = members
        .iter()
        .filter_map(|row| lookup(row, field))
        .filter(|v| !v.is_null())
        .collect();

    match spec.func {
        AggregateFn::Count => Value::from(values.len() as i64),
        AggregateFn::Sum => sum(&values),
        AggregateFn::Avg => {
            let numbers: Vec<f64> = values.iter().filter_map(|v| v.as_f64()).collect();
            if numbers.is_empty() {
                return Value::Null;
            }
            let mean = numbers.iter().sum::<f64>() / numbers.len() as f64;
            serde_json::Number::from_f64(mean)
                .map(Value::Number)
                .unwrap_or(Value::Null)
        }
        AggregateFn::Min => extreme(&values, input.field_type(field), Ordering::Less),
        AggregateFn::Max => extreme(&values, input.field_type(field), Ordering::Greater),
    }
}

/// Integer sum while every input is an integer, float otherwise.
fn sum(values: &[&Value]) -> Value {
    let mut int_total: Option<i64> = Some(0);
    let mut float_total = 0.0f64;
    for value in values {
        let Value::Number(n) = value else {
            continue;
        };
        float_total += n.as_f64().unwrap_or(0.0);
        int_total = match (int_total, n.as_i64()) {
            (Some(total), Some(i)) => total.checked_add(i),
            _ => None,
        };
    }
    match int_total {
        Some(total) => Value::from(total),
        None => serde_json::Number::from_f64(float_total)
            .map(Value::Number)
            .unwrap_or(Value::Null),
    }
}

fn extreme(values: &[&Value], ty: Option<super::types::FieldType>, wanted: Ordering) -> Value {
    let mut best: Option<&Value> = None;
    for value in values {
        best = match best {
            Some(current) if order_values(value, current, ty) != wanted => Some(current),
            _ => Some(value),
        };
    }
    best.cloned().unwrap_or(Value::Null)
}
