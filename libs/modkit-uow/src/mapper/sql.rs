//! SQL text assembly with positional parameters.

use super::types::DbValue;

/// A named, typed command parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub value: DbValue,
}

impl Parameter {
    #[must_use]
    pub fn new(name: impl Into<String>, value: DbValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// SQL text plus its parameters, in `$n` order.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedCommand {
    pub text: String,
    pub parameters: Vec<Parameter>,
}

#[derive(Debug, Default)]
pub(crate) struct SqlWriter {
    sql: String,
    params: Vec<Parameter>,
}

impl SqlWriter {
    pub(crate) fn new(head: &str) -> Self {
        Self {
            sql: head.to_owned(),
            params: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, fragment: &str) -> &mut Self {
        self.sql.push_str(fragment);
        self
    }

    /// Appends `$n` for a new parameter named `<property>_<n>`.
    pub(crate) fn push_param(&mut self, property: &str, value: DbValue) -> &mut Self {
        let position = self.params.len() + 1;
        self.params
            .push(Parameter::new(format!("{property}_{position}"), value));
        self.sql.push('$');
        self.sql.push_str(&position.to_string());
        self
    }

    pub(crate) fn finish(self) -> GeneratedCommand {
        GeneratedCommand {
            text: self.sql,
            parameters: self.params,
        }
    }
}

/// `$1, $2, ..., $n`
pub(crate) fn placeholders(from: usize, count: usize) -> String {
    (from..from + count)
        .map(|n| format!("${n}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Escapes `LIKE` metacharacters; `PostgreSQL` uses `\` as the default escape.
pub(crate) fn like_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '%' | '_' | '\\' => {
                out.push('\\');
                out.push(ch);
            }
            c => out.push(c),
        }
    }
    out
}
