//! Row rewrite rules
//!
//! Brokers occasionally rename an asset while the ISIN stays the same, or
//! export a row that needs a manual correction. A JSON file of rules
//! rewrites such rows before they are classified:
//!
//! ```json
//! [
//!   {
//!     "condition": [
//!       {"index": 0, "value": "2019-06-01", "operator": "<"},
//!       {"index": 3, "value": "DNB SMB"}
//!     ],
//!     "replacement": [{"index": 3, "value": "DNB SMB A"}]
//!   }
//! ]
//! ```
//!
//! Column indices follow the export layout: 0 date, 1 account, 2 category,
//! 3 asset, 4 quantity, 5 price, 6 amount, 7 courtage, 8 currency, 9 ISIN.

use anyhow::{anyhow, bail, Context, Result};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use std::cmp::Ordering;
use std::path::Path;
use tracing::debug;

use super::avanza_csv::parse_number;
use super::RawTransaction;

const COLUMN_COUNT: usize = 10;

#[derive(Debug, Deserialize)]
struct RuleSpec {
    condition: Vec<ConditionSpec>,
    replacement: Vec<ReplacementSpec>,
}

#[derive(Debug, Deserialize)]
struct ConditionSpec {
    index: usize,
    value: Value,
    operator: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReplacementSpec {
    index: usize,
    value: Value,
}

#[derive(Debug, Clone, PartialEq)]
enum Cell {
    Date(NaiveDate),
    Number(Decimal),
    Text(String),
}

impl Cell {
    fn compare(&self, other: &Cell) -> Option<Ordering> {
        match (self, other) {
            (Cell::Date(a), Cell::Date(b)) => Some(a.cmp(b)),
            (Cell::Number(a), Cell::Number(b)) => Some(a.cmp(b)),
            (Cell::Text(a), Cell::Text(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Operator {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
}

impl Operator {
    fn parse(text: &str) -> Result<Self> {
        match text {
            "==" => Ok(Operator::Eq),
            "!=" => Ok(Operator::Ne),
            ">" => Ok(Operator::Gt),
            "<" => Ok(Operator::Lt),
            ">=" => Ok(Operator::Ge),
            "<=" => Ok(Operator::Le),
            other => bail!("Unknown operator '{}'", other),
        }
    }

    fn holds(&self, ordering: Option<Ordering>) -> bool {
        match (self, ordering) {
            (Operator::Ne, None) => true,
            (_, None) => false,
            (Operator::Eq, Some(o)) => o == Ordering::Equal,
            (Operator::Ne, Some(o)) => o != Ordering::Equal,
            (Operator::Gt, Some(o)) => o == Ordering::Greater,
            (Operator::Lt, Some(o)) => o == Ordering::Less,
            (Operator::Ge, Some(o)) => o != Ordering::Less,
            (Operator::Le, Some(o)) => o != Ordering::Greater,
        }
    }
}

#[derive(Debug, Clone)]
struct Condition {
    column: usize,
    operator: Operator,
    value: Cell,
}

#[derive(Debug, Clone)]
struct Rule {
    conditions: Vec<Condition>,
    replacements: Vec<(usize, Cell)>,
}

impl Rule {
    fn matches(&self, row: &RawTransaction) -> bool {
        self.conditions.iter().all(|c| {
            let cell = get_cell(row, c.column);
            c.operator.holds(cell.compare(&c.value))
        })
    }
}

/// Loaded rewrite rules
#[derive(Debug, Clone, Default)]
pub struct SpecialCases {
    rules: Vec<Rule>,
}

impl SpecialCases {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read special cases file {:?}", path))?;
        Self::from_json(&text).with_context(|| format!("Invalid special cases file {:?}", path))
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let specs: Vec<RuleSpec> =
            serde_json::from_str(text).context("Failed to parse special cases JSON")?;

        let mut rules = Vec::with_capacity(specs.len());
        for (idx, spec) in specs.into_iter().enumerate() {
            let conditions = spec
                .condition
                .into_iter()
                .map(|c| {
                    let operator = Operator::parse(c.operator.as_deref().unwrap_or("=="))?;
                    let value = to_cell(c.index, &c.value)?;
                    Ok(Condition {
                        column: c.index,
                        operator,
                        value,
                    })
                })
                .collect::<Result<Vec<_>>>()
                .with_context(|| format!("Invalid condition in rule {}", idx))?;

            let replacements = spec
                .replacement
                .into_iter()
                .map(|r| Ok((r.index, to_cell(r.index, &r.value)?)))
                .collect::<Result<Vec<_>>>()
                .with_context(|| format!("Invalid replacement in rule {}", idx))?;

            rules.push(Rule {
                conditions,
                replacements,
            });
        }

        debug!("Loaded {} special case rules", rules.len());
        Ok(Self { rules })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rewrite a row with every matching rule, in file order
    pub fn apply(&self, mut row: RawTransaction) -> RawTransaction {
        for rule in &self.rules {
            if rule.matches(&row) {
                for (column, value) in &rule.replacements {
                    set_cell(&mut row, *column, value.clone());
                }
            }
        }
        row
    }
}

fn is_numeric_column(column: usize) -> bool {
    (4..=7).contains(&column)
}

fn to_cell(column: usize, value: &Value) -> Result<Cell> {
    if column >= COLUMN_COUNT {
        bail!("Column index {} out of range (0-{})", column, COLUMN_COUNT - 1);
    }

    let text = match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        other => bail!("Unsupported value {} for column {}", other, column),
    };

    if column == 0 {
        let date = NaiveDate::parse_from_str(&text, "%Y-%m-%d")
            .map_err(|_| anyhow!("Invalid date '{}' (expected YYYY-MM-DD)", text))?;
        Ok(Cell::Date(date))
    } else if is_numeric_column(column) {
        Ok(Cell::Number(parse_number(&text)?))
    } else {
        Ok(Cell::Text(text))
    }
}

fn get_cell(row: &RawTransaction, column: usize) -> Cell {
    match column {
        0 => Cell::Date(row.date),
        1 => Cell::Text(row.account.clone()),
        2 => Cell::Text(row.category.clone()),
        3 => Cell::Text(row.asset_name.clone()),
        4 => Cell::Number(row.quantity),
        5 => Cell::Number(row.unit_price),
        6 => Cell::Number(row.total_amount),
        7 => Cell::Number(row.fee),
        8 => Cell::Text(row.currency.clone()),
        _ => Cell::Text(row.isin.clone()),
    }
}

fn set_cell(row: &mut RawTransaction, column: usize, value: Cell) {
    match (column, value) {
        (0, Cell::Date(d)) => row.date = d,
        (1, Cell::Text(s)) => row.account = s,
        (2, Cell::Text(s)) => row.category = s,
        (3, Cell::Text(s)) => row.asset_name = s,
        (4, Cell::Number(n)) => row.quantity = n,
        (5, Cell::Number(n)) => row.unit_price = n,
        (6, Cell::Number(n)) => row.total_amount = n,
        (7, Cell::Number(n)) => row.fee = n,
        (8, Cell::Text(s)) => row.currency = s,
        (9, Cell::Text(s)) => row.isin = s,
        // to_cell only builds cells matching their column
        _ => {}
    }
}
