// Results Consumers
//
// Strategies that turn the row stream of a select into its final shape: a
// list, the first row, or a scrollable cursor. A consumer owns the row
// source once it is handed over and finishes it even when reading fails.

use std::fmt;
use std::marker::PhantomData;

use crate::exec::error::{ExecError, ExecResult};
use crate::exec::row::{FromDomainValue, RowProcessingState, RowReader, SeenResults};
use crate::exec::scroll::ScrollableResults;
use crate::exec::values::JdbcValues;
use crate::jdbc::ScrollMode;

/// Consumes the rows of one executed select
pub trait ResultsConsumer<'a> {
    type Output;

    fn consume(
        &self,
        values: Box<dyn JdbcValues + 'a>,
        reader: RowReader,
        state: RowProcessingState<'a>,
    ) -> ExecResult<Self::Output>;

    /// Cursor type the statement must be prepared with
    fn scroll_mode(&self) -> ScrollMode {
        ScrollMode::ForwardOnly
    }

    /// Whether rows read by this consumer may be served from or written
    /// to the result cache
    fn can_result_be_cached(&self) -> bool {
        true
    }

    /// Number of results, for statistics
    fn result_size(&self, _output: &Self::Output) -> Option<usize> {
        None
    }
}

/// Finish the row source; after-load callbacks run only when consumption
/// succeeded
pub(crate) fn finish_consumption<T>(
    result: ExecResult<T>,
    values: &mut dyn JdbcValues,
    state: &mut RowProcessingState<'_>,
) -> ExecResult<T> {
    let finished = values.finish_up();
    match (result, finished) {
        (Ok(output), Ok(())) => {
            state.finish_up();
            Ok(output)
        }
        (Ok(_), Err(e)) | (Err(e), Ok(())) => Err(e),
        (Err(e), Err(cleanup)) => Err(e.with_suppressed(cleanup)),
    }
}

/// How the list consumer treats repeated results
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UniqueSemantic {
    /// Keep every row
    None,
    /// Keep every row, even for entity results
    Never,
    /// Drop repeated results
    Filter,
    /// Fail on a repeated result unless it comes from a collection fetch
    Assert,
    /// Drop repeated entities when each row is a single entity
    #[default]
    Allow,
}

/// Drains every row into a vector
pub struct ListResultsConsumer<T> {
    semantic: UniqueSemantic,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ListResultsConsumer<T> {
    pub fn new(semantic: UniqueSemantic) -> Self {
        Self {
            semantic,
            _marker: PhantomData,
        }
    }

    pub fn semantic(&self) -> UniqueSemantic {
        self.semantic
    }
}

impl<T> Default for ListResultsConsumer<T> {
    fn default() -> Self {
        Self::new(UniqueSemantic::default())
    }
}

impl<T> fmt::Debug for ListResultsConsumer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListResultsConsumer").field("semantic", &self.semantic).finish()
    }
}

impl<'a, T: FromDomainValue> ResultsConsumer<'a> for ListResultsConsumer<T> {
    type Output = Vec<T>;

    fn consume(
        &self,
        mut values: Box<dyn JdbcValues + 'a>,
        reader: RowReader,
        mut state: RowProcessingState<'a>,
    ) -> ExecResult<Vec<T>> {
        let mapping = reader.mapping();
        let dedupe = match self.semantic {
            UniqueSemantic::None | UniqueSemantic::Never => false,
            UniqueSemantic::Filter | UniqueSemantic::Assert => true,
            UniqueSemantic::Allow => mapping.is_single_entity_result(),
        };
        let fetches = mapping.has_collection_fetches();

        let read: ExecResult<Vec<T>> = (|| {
            let mut results = Vec::new();
            let mut seen = SeenResults::default();
            while values.next()? {
                let value = reader.read_row(values.current_row(), &mut state)?;
                if dedupe && !seen.insert(&value) {
                    if self.semantic == UniqueSemantic::Assert && !fetches {
                        return Err(ExecError::DuplicateRow(format!("{:?}", value)));
                    }
                    continue;
                }
                results.push(T::from_domain_value(value)?);
            }
            Ok(results)
        })();
        finish_consumption(read, values.as_mut(), &mut state)
    }

    fn result_size(&self, output: &Vec<T>) -> Option<usize> {
        Some(output.len())
    }
}

/// Reads only the first row; with `unique` the remaining rows are checked
/// for a second distinct result
pub struct SingleResultConsumer<T> {
    require_unique: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<T> SingleResultConsumer<T> {
    pub fn new() -> Self {
        Self {
            require_unique: false,
            _marker: PhantomData,
        }
    }

    pub fn unique() -> Self {
        Self {
            require_unique: true,
            _marker: PhantomData,
        }
    }
}

impl<T> Default for SingleResultConsumer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for SingleResultConsumer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingleResultConsumer")
            .field("require_unique", &self.require_unique)
            .finish()
    }
}

impl<'a, T: FromDomainValue> ResultsConsumer<'a> for SingleResultConsumer<T> {
    type Output = Option<T>;

    fn consume(
        &self,
        mut values: Box<dyn JdbcValues + 'a>,
        reader: RowReader,
        mut state: RowProcessingState<'a>,
    ) -> ExecResult<Option<T>> {
        let read: ExecResult<Option<T>> = (|| {
            if !values.next()? {
                return Ok(None);
            }
            let first = reader.read_row(values.current_row(), &mut state)?;
            if self.require_unique {
                let mut seen = SeenResults::default();
                seen.insert(&first);
                while values.next()? {
                    let value = reader.read_row(values.current_row(), &mut state)?;
                    seen.insert(&value);
                }
                if seen.len() > 1 {
                    return Err(ExecError::NonUniqueResult(seen.len()));
                }
            }
            T::from_domain_value(first).map(Some)
        })();
        finish_consumption(read, values.as_mut(), &mut state)
    }

    // A partially read result must not be cached as if complete
    fn can_result_be_cached(&self) -> bool {
        self.require_unique
    }

    fn result_size(&self, output: &Option<T>) -> Option<usize> {
        Some(usize::from(output.is_some()))
    }
}

/// Hands the row source to a cursor instead of draining it
pub struct ScrollableResultsConsumer<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> ScrollableResultsConsumer<T> {
    pub fn new() -> Self {
        Self { _marker: PhantomData }
    }
}

impl<T> Default for ScrollableResultsConsumer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for ScrollableResultsConsumer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ScrollableResultsConsumer")
    }
}

impl<'a, T: FromDomainValue> ResultsConsumer<'a> for ScrollableResultsConsumer<T> {
    type Output = ScrollableResults<'a, T>;

    fn consume(
        &self,
        values: Box<dyn JdbcValues + 'a>,
        reader: RowReader,
        state: RowProcessingState<'a>,
    ) -> ExecResult<ScrollableResults<'a, T>> {
        Ok(ScrollableResults::new(values, reader, state))
    }

    fn scroll_mode(&self) -> ScrollMode {
        ScrollMode::ScrollInsensitive
    }

    fn can_result_be_cached(&self) -> bool {
        false
    }
}
