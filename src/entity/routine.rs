//! Stored routine invocation.
//!
//! Functions are called with `SELECT * FROM name(...)`, procedures with
//! `CALL name(...)`. Arguments are bound positionally or by name and cast to
//! the declared parameter types.

use crate::db::driver::Statement;
use crate::db::sql::{Placeholders, quote_ident};
use crate::entity::Context;
use crate::error::{DbError, DbResult};
use crate::models::{ReturnKind, RoutineDescription, RoutineKind, Row, Value};
use tracing::debug;

/// Result of a routine call, shaped by its declared return.
#[derive(Debug, Clone, PartialEq)]
pub enum RoutineResult {
    Unit,
    Records(Vec<Row>),
    Scalar(Value),
}

impl RoutineResult {
    pub fn into_scalar(self) -> Option<Value> {
        match self {
            Self::Scalar(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_records(self) -> Option<Vec<Row>> {
        match self {
            Self::Records(rows) => Some(rows),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Routine {
    ctx: Context,
    description: RoutineDescription,
}

impl Routine {
    pub(crate) fn new(ctx: Context, description: RoutineDescription) -> Self {
        Self { ctx, description }
    }

    pub fn name(&self) -> &str {
        &self.description.name
    }

    pub fn description(&self) -> &RoutineDescription {
        &self.description
    }

    /// Declared return shape. A function returning a composite type is
    /// expanded into columns by `SELECT * FROM`, so it yields records.
    pub fn return_kind(&self) -> ReturnKind {
        match self.description.return_kind() {
            ReturnKind::Scalar
                if self
                    .description
                    .return_type
                    .as_deref()
                    .is_some_and(|t| self.ctx.model().registry().composite(t).is_some()) =>
            {
                ReturnKind::Records
            }
            kind => kind,
        }
    }

    /// Call with positional arguments.
    pub fn call(&self, args: Vec<Value>) -> DbResult<RoutineResult> {
        self.call_named(args, Vec::new())
    }

    /// Call with positional arguments followed by named ones.
    pub fn call_named(
        &self,
        positional: Vec<Value>,
        named: Vec<(String, Value)>,
    ) -> DbResult<RoutineResult> {
        let statement = self.statement(positional, named)?;
        debug!(routine = %self.description.name, sql = %statement.sql, "Calling routine");
        let rows = self.ctx.session().fetch(&statement)?;
        Ok(match self.return_kind() {
            ReturnKind::Void => RoutineResult::Unit,
            ReturnKind::Records => RoutineResult::Records(rows),
            ReturnKind::Scalar => RoutineResult::Scalar(
                rows.into_iter()
                    .next()
                    .and_then(|row| row.into_values().into_iter().next())
                    .unwrap_or(Value::Null),
            ),
        })
    }

    fn statement(&self, positional: Vec<Value>, named: Vec<(String, Value)>) -> DbResult<Statement> {
        if !self.ctx.backend().supports_routines() {
            return Err(DbError::unsupported(format!(
                "calling routine {} on {}",
                self.description.name,
                self.ctx.backend()
            )));
        }
        let params = &self.description.in_params;
        if positional.len() > params.len() {
            return Err(DbError::invalid_input(format!(
                "{} takes at most {} arguments, got {}",
                self.description.name,
                params.len(),
                positional.len()
            )));
        }

        let mut placeholders = Placeholders::new(self.ctx.backend());
        let mut args = Vec::with_capacity(positional.len() + named.len());
        let mut values = Vec::with_capacity(positional.len() + named.len());
        for (param, value) in params.iter().zip(positional.iter()) {
            args.push(placeholders.next(Some(param.udt_name.as_str())));
            values.push(value.clone());
        }
        for (name, value) in named {
            let position = params
                .iter()
                .position(|p| p.name.as_deref() == Some(name.as_str()))
                .ok_or_else(|| DbError::unknown_field(&self.description.name, name.as_str()))?;
            if position < positional.len() {
                return Err(DbError::invalid_input(format!(
                    "{} got multiple values for argument '{}'",
                    self.description.name, name
                )));
            }
            args.push(format!(
                "{} => {}",
                quote_ident(&name),
                placeholders.next(Some(params[position].udt_name.as_str()))
            ));
            values.push(value);
        }

        let call = format!("{}({})", quote_ident(&self.description.name), args.join(", "));
        let sql = match self.description.kind {
            RoutineKind::Procedure => format!("CALL {}", call),
            RoutineKind::Function => format!("SELECT * FROM {}", call),
        };
        Ok(Statement::new(sql).bind_all(values))
    }
}
