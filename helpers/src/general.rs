use std::cmp::Ordering;
use std::error::Error;
use std::fmt;

/// InputValueError is used if some simulation option or parameter does not fulfill the posed
/// requirements, e.g., a non-positive vehicle mass or terrain multipliers in the wrong order.
#[derive(Debug, Clone)]
pub struct InputValueError {
    pub parameter: String,
    pub reason: String,
}

impl InputValueError {
    pub fn new(parameter: &str, reason: &str) -> InputValueError {
        InputValueError {
            parameter: parameter.to_owned(),
            reason: reason.to_owned(),
        }
    }
}

impl fmt::Display for InputValueError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Invalid input value for {}: {}", self.parameter, self.reason)
    }
}

impl Error for InputValueError {}

/// argmax returns the index of the maximum value in the array x, `None` if x is empty. On ties
/// the first index wins.
pub fn argmax<T: std::cmp::PartialOrd + std::marker::Copy>(x: &[T]) -> Option<usize> {
    let mut iter = x.iter().enumerate();
    let (mut idx_max, &first) = iter.next()?;
    let mut val_max = first;

    for (i, &val) in iter {
        if val > val_max {
            val_max = val;
            idx_max = i;
        }
    }

    Some(idx_max)
}

#[derive(Debug, Clone, Copy)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// argsort returns the indices that would sort an array. Incomparable values (NaN) are treated
/// as equal, the sort is stable.
pub fn argsort<T: std::cmp::PartialOrd>(x: &[T], order: SortOrder) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..x.len()).collect();
    match order {
        SortOrder::Ascending => {
            indices.sort_by(|&a, &b| x[a].partial_cmp(&x[b]).unwrap_or(Ordering::Equal))
        }
        SortOrder::Descending => {
            indices.sort_by(|&a, &b| x[b].partial_cmp(&x[a]).unwrap_or(Ordering::Equal))
        }
    }
    indices
}
