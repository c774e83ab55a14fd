//! Grouped aggregation over a single column.
//!
//! `MIN`, `MAX`, `SUM`, `AVG` and `COUNT` are defined over `Int` columns;
//! `Str` columns support `COUNT` only. Results are `Int`, `AVG` rounds
//! toward zero, and groups come out in ascending order of their key.

use std::collections::BTreeMap;
use std::fmt;

use strata::tuple::TdItem;
use strata::{Field, Tuple, TupleDesc, Type};

use crate::errors::ExecutionError;
use crate::executor::Executor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateOp {
    Min,
    Max,
    Sum,
    Avg,
    Count,
}

impl AggregateOp {
    pub fn supports(self, field_type: Type) -> bool {
        match field_type {
            Type::Int => true,
            Type::Str => self == AggregateOp::Count,
        }
    }
}

impl fmt::Display for AggregateOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AggregateOp::Min => "min",
            AggregateOp::Max => "max",
            AggregateOp::Sum => "sum",
            AggregateOp::Avg => "avg",
            AggregateOp::Count => "count",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Default, Clone)]
struct AggregateState {
    count: i64,
    sum: i64,
    min: Option<i32>,
    max: Option<i32>,
}

impl AggregateState {
    fn merge(&mut self, value: &Field) {
        self.count += 1;
        if let Field::Int(v) = value {
            self.sum += i64::from(*v);
            self.min = Some(self.min.map_or(*v, |m| m.min(*v)));
            self.max = Some(self.max.map_or(*v, |m| m.max(*v)));
        }
    }

    /// `None` when the operator has no value for an empty group.
    fn finish(&self, op: AggregateOp) -> Option<i32> {
        match op {
            AggregateOp::Count => Some(self.count as i32),
            AggregateOp::Sum => Some(self.sum as i32),
            AggregateOp::Avg if self.count == 0 => None,
            AggregateOp::Avg => Some((self.sum / self.count) as i32),
            AggregateOp::Min => self.min,
            AggregateOp::Max => self.max,
        }
    }
}

pub struct AggregateExecutor<'a> {
    child: Box<dyn Executor + 'a>,
    agg_field: usize,
    group_field: Option<usize>,
    op: AggregateOp,
    desc: TupleDesc,
    results: Option<std::vec::IntoIter<Tuple>>,
}

impl<'a> AggregateExecutor<'a> {
    pub fn new(
        child: Box<dyn Executor + 'a>,
        agg_field: usize,
        group_field: Option<usize>,
        op: AggregateOp,
    ) -> Result<Self, ExecutionError> {
        let child_desc = child.tuple_desc();
        let agg_type = child_desc
            .field_type(agg_field)
            .ok_or_else(|| ExecutionError::ColumnNotFound(format!("#{agg_field}")))?;
        if !op.supports(agg_type) {
            return Err(ExecutionError::UnsupportedAggregate(format!(
                "{op} over {agg_type}"
            )));
        }

        let mut items = Vec::with_capacity(2);
        if let Some(g) = group_field {
            let item = child_desc
                .items()
                .get(g)
                .cloned()
                .ok_or_else(|| ExecutionError::ColumnNotFound(format!("#{g}")))?;
            items.push(item);
        }
        let agg_name = child_desc.field_name(agg_field).unwrap_or_default();
        items.push(TdItem {
            field_type: Type::Int,
            name: format!("{op}({agg_name})"),
        });

        Ok(Self {
            child,
            agg_field,
            group_field,
            op,
            desc: TupleDesc::from_items(items),
            results: None,
        })
    }

    pub fn group_field(&self) -> Option<usize> {
        self.group_field
    }

    pub fn aggregate_field(&self) -> usize {
        self.agg_field
    }

    pub fn op(&self) -> AggregateOp {
        self.op
    }

    fn aggregate(&mut self) -> Result<Vec<Tuple>, ExecutionError> {
        let mut groups: BTreeMap<Option<Field>, AggregateState> = BTreeMap::new();
        while let Some(tuple) = self.child.next()? {
            let key = match self.group_field {
                Some(g) => Some(field_at(&tuple, g)?.clone()),
                None => None,
            };
            groups
                .entry(key)
                .or_default()
                .merge(field_at(&tuple, self.agg_field)?);
        }
        if self.group_field.is_none() && groups.is_empty() {
            groups.insert(None, AggregateState::default());
        }

        let op = self.op;
        Ok(groups
            .into_iter()
            .filter_map(|(key, state)| {
                let value = Field::Int(state.finish(op)?);
                Some(Tuple::new(key.into_iter().chain([value]).collect()))
            })
            .collect())
    }
}

fn field_at(tuple: &Tuple, i: usize) -> Result<&Field, ExecutionError> {
    tuple
        .field(i)
        .ok_or_else(|| ExecutionError::SchemaMismatch(format!("tuple ({tuple}) has no column #{i}")))
}

impl<'a> Executor for AggregateExecutor<'a> {
    fn tuple_desc(&self) -> &TupleDesc {
        &self.desc
    }

    fn open(&mut self) -> Result<(), ExecutionError> {
        self.child.open()?;
        let results = self.aggregate()?;
        self.results = Some(results.into_iter());
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Tuple>, ExecutionError> {
        let results = self.results.as_mut().ok_or(ExecutionError::NotOpen)?;
        Ok(results.next())
    }

    fn rewind(&mut self) -> Result<(), ExecutionError> {
        self.close();
        self.open()
    }

    fn close(&mut self) {
        self.child.close();
        self.results = None;
    }
}
