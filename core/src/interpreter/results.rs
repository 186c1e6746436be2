//! Typed reads from the result cache
//!
//! Every accessor is pure: a miss of any kind yields `None` or `0` and the
//! cache is left untouched. Positions are 1-based, in return order.

use mlua::{LuaSerdeExt, Table, Value};

use super::state::Interpreter;

impl Interpreter {
    /// Number of values stored by the last successful execute
    pub fn result_count(&self) -> Option<usize> {
        self.results.as_ref().map(Vec::len)
    }

    fn result_at(&self, pos: usize) -> Option<&Value> {
        let index = pos.checked_sub(1)?;
        self.results.as_ref()?.get(index)
    }

    fn result_table(&self, pos: usize) -> Option<&Table> {
        match self.result_at(pos)? {
            Value::Table(table) => Some(table),
            _ => None,
        }
    }

    /// String at `pos`; numbers are converted, anything else misses
    pub fn result_string(&self, pos: usize) -> Option<String> {
        let value = self.result_at(pos)?.clone();
        self.coerce_string(value)
    }

    /// Integer at `pos`, truncating floats; `0` on a miss
    pub fn result_int(&self, pos: usize) -> i64 {
        match self.result_at(pos) {
            Some(value) => self.coerce_int(value.clone()),
            None => 0,
        }
    }

    /// String field `field` of the table at `pos`
    pub fn result_field_string(&self, pos: usize, field: &str) -> Option<String> {
        let value = self.result_table(pos)?.get::<Value>(field).ok()?;
        self.coerce_string(value)
    }

    /// Integer field `field` of the table at `pos`; `0` on a miss
    pub fn result_field_int(&self, pos: usize, field: &str) -> i64 {
        self.result_table(pos)
            .and_then(|table| table.get::<Value>(field).ok())
            .map(|value| self.coerce_int(value))
            .unwrap_or(0)
    }

    /// Whether the table at `pos` has a non-nil `field`
    pub fn result_has_field(&self, pos: usize, field: &str) -> bool {
        self.result_table(pos)
            .and_then(|table| table.get::<Value>(field).ok())
            .is_some_and(|value| !value.is_nil())
    }

    /// Every cached value as JSON; values serde can't express become `"<type>"`
    pub fn results_json(&self) -> Vec<serde_json::Value> {
        let Some(results) = &self.results else {
            return Vec::new();
        };
        results
            .iter()
            .map(|value| {
                self.lua
                    .from_value::<serde_json::Value>(value.clone())
                    .unwrap_or_else(|_| serde_json::Value::String(format!("<{}>", value.type_name())))
            })
            .collect()
    }

    fn coerce_string(&self, value: Value) -> Option<String> {
        if !matches!(value, Value::String(_) | Value::Integer(_) | Value::Number(_)) {
            return None;
        }
        let text = self.lua.coerce_string(value).ok()??;
        Some(text.to_string_lossy().to_string())
    }

    fn coerce_int(&self, value: Value) -> i64 {
        match value {
            Value::Integer(i) => i,
            Value::Number(n) => truncate(n),
            Value::String(_) => match self.lua.coerce_integer(value.clone()) {
                Ok(Some(i)) => i,
                _ => match self.lua.coerce_number(value) {
                    Ok(Some(n)) => truncate(n),
                    _ => 0,
                },
            },
            _ => 0,
        }
    }
}

fn truncate(n: f64) -> i64 {
    if n.is_finite() {
        n.trunc() as i64
    } else {
        0
    }
}
