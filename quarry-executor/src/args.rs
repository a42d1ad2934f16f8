//! Call arguments as evaluated by the interpreter.

use crate::{ExecutorError, Value};

/// Positional and keyword arguments of one call.
#[derive(Debug, Default)]
pub(crate) struct Args {
    pub(crate) positional: Vec<Value>,
    pub(crate) keywords: Vec<(String, Value)>,
}

impl Args {
    pub(crate) fn new(positional: Vec<Value>, keywords: Vec<(String, Value)>) -> Self {
        Self {
            positional,
            keywords,
        }
    }

    pub(crate) fn positional(positional: Vec<Value>) -> Self {
        Self::new(positional, Vec::new())
    }

    /// Remove and return the keyword argument `name`.
    pub(crate) fn take_keyword(&mut self, name: &str) -> Option<Value> {
        let index = self.keywords.iter().position(|(k, _)| k == name)?;
        Some(self.keywords.remove(index).1)
    }

    /// Take the keyword arguments that remain, in call order.
    pub(crate) fn take_keywords(&mut self) -> Vec<(String, Value)> {
        std::mem::take(&mut self.keywords)
    }

    /// The positional arguments, rejecting any keyword that was not consumed.
    pub(crate) fn finish(self, func: &str) -> Result<Vec<Value>, ExecutorError> {
        if let Some((name, _)) = self.keywords.first() {
            return Err(ExecutorError::type_error(format!(
                "{func}() got an unexpected keyword argument '{name}'"
            )));
        }
        Ok(self.positional)
    }

    /// Like [`Args::finish`], also requiring between `min` and `max` positionals.
    pub(crate) fn finish_between(
        self,
        func: &str,
        min: usize,
        max: usize,
    ) -> Result<Vec<Value>, ExecutorError> {
        let positional = self.finish(func)?;
        if positional.len() < min || positional.len() > max {
            let expected = if min == max {
                format!("{min}")
            } else {
                format!("{min} to {max}")
            };
            return Err(ExecutorError::type_error(format!(
                "{func}() takes {expected} positional argument{} but {} were given",
                if max == 1 { "" } else { "s" },
                positional.len()
            )));
        }
        Ok(positional)
    }

    /// Exactly `n` positionals and no keywords.
    pub(crate) fn finish_exact(self, func: &str, n: usize) -> Result<Vec<Value>, ExecutorError> {
        self.finish_between(func, n, n)
    }
}

/// Integer argument, accepting bools the way Python does.
pub(crate) fn int_arg(value: &Value, func: &str) -> Result<i64, ExecutorError> {
    value.as_int().ok_or_else(|| {
        ExecutorError::type_error(format!(
            "{func}() expected an integer, got '{}'",
            value.type_name()
        ))
    })
}

/// Non-negative count argument such as `head(n)`.
pub(crate) fn count_arg(value: &Value, func: &str) -> Result<usize, ExecutorError> {
    let n = int_arg(value, func)?;
    usize::try_from(n)
        .map_err(|_| ExecutorError::value_error(format!("{func}() expected a non-negative count, got {n}")))
}

pub(crate) fn str_arg<'v>(value: &'v Value, func: &str) -> Result<&'v str, ExecutorError> {
    value.as_str().ok_or_else(|| {
        ExecutorError::type_error(format!(
            "{func}() expected a str, got '{}'",
            value.type_name()
        ))
    })
}
