use chrono::NaiveDate;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MarketError {
    #[error("column {symbol} has {got} rows, index has {expected}")]
    ColumnLength {
        symbol: String,
        expected: usize,
        got: usize,
    },
}

/// Date-indexed columnar price table keyed by symbol.
///
/// Missing observations are stored as NaN so that sparse symbols can share one
/// index; pairwise reads drop incomplete rows.
#[derive(Debug, Clone, Default)]
pub struct PriceTable {
    index: Vec<NaiveDate>,
    columns: HashMap<String, Vec<f64>>,
}

impl PriceTable {
    pub fn new(index: Vec<NaiveDate>) -> Self {
        Self {
            index,
            columns: HashMap::new(),
        }
    }

    pub fn insert_column(&mut self, symbol: &str, prices: Vec<f64>) -> Result<(), MarketError> {
        if prices.len() != self.index.len() {
            return Err(MarketError::ColumnLength {
                symbol: symbol.to_string(),
                expected: self.index.len(),
                got: prices.len(),
            });
        }
        self.columns.insert(symbol.to_string(), prices);
        Ok(())
    }

    /// Number of rows in the shared index.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn index(&self) -> &[NaiveDate] {
        &self.index
    }

    pub fn has_column(&self, symbol: &str) -> bool {
        self.columns.contains_key(symbol)
    }

    pub fn column(&self, symbol: &str) -> Option<&[f64]> {
        self.columns.get(symbol).map(|v| v.as_slice())
    }

    pub fn symbols(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.columns.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Row-aligned values for two symbols with incomplete rows dropped.
    /// Returns None when either column is absent.
    pub fn joined(&self, a: &str, b: &str) -> Option<Vec<(f64, f64)>> {
        let col_a = self.columns.get(a)?;
        let col_b = self.columns.get(b)?;
        let rows = col_a
            .iter()
            .zip(col_b.iter())
            .filter(|(x, y)| !x.is_nan() && !y.is_nan())
            .map(|(x, y)| (*x, *y))
            .collect();
        Some(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dates(n: usize) -> Vec<NaiveDate> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        (0..n)
            .map(|i| start + chrono::Duration::days(i as i64))
            .collect()
    }

    #[test]
    fn rejects_mismatched_column_length() {
        let mut table = PriceTable::new(dates(5));
        let err = table.insert_column("AAPL", vec![1.0; 4]).unwrap_err();
        assert!(matches!(err, MarketError::ColumnLength { got: 4, .. }));
    }

    #[test]
    fn joined_drops_incomplete_rows() {
        let mut table = PriceTable::new(dates(4));
        table
            .insert_column("A", vec![1.0, f64::NAN, 3.0, 4.0])
            .unwrap();
        table
            .insert_column("B", vec![10.0, 20.0, f64::NAN, 40.0])
            .unwrap();
        let rows = table.joined("A", "B").unwrap();
        assert_eq!(rows, vec![(1.0, 10.0), (4.0, 40.0)]);
    }

    #[test]
    fn joined_is_none_for_missing_symbol() {
        let mut table = PriceTable::new(dates(2));
        table.insert_column("A", vec![1.0, 2.0]).unwrap();
        assert!(table.joined("A", "MISSING").is_none());
    }
}
